//! Contact form.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;

use crate::contact::{Contact, ContactService};
use crate::error::Result;
use crate::validation::Payload;

#[derive(Debug, Serialize)]
pub struct Response {
    success: bool,
    data: Contact,
    message: &'static str,
}

/// Handler to submit the contact form.
pub async fn handler(
    State(service): State<ContactService>,
    payload: Payload,
) -> Result<(StatusCode, Json<Response>)> {
    let contact = service.submit(&payload).await?;

    Ok((
        StatusCode::CREATED,
        Json(Response {
            success: true,
            data: contact,
            message: "Form submitted successfully",
        }),
    ))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::mail::Template;
    use crate::{make_request, testing};

    #[tokio::test]
    async fn test_contact_handler() {
        let ctx = testing::context();
        let app = crate::app(ctx.state.clone());

        let body = json!({
            "name": "Jo",
            "phoneNumber": "06 123 4567",
            "city": "Lyon",
            "message": "Any cricket near Lyon?"
        });
        let response =
            make_request(app.clone(), Method::POST, "/contact", body.to_string()).await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = testing::json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["city"], "Lyon");
        assert!(ctx.mail.last(Template::ContactMessage).is_some());

        let response = make_request(
            app,
            Method::POST,
            "/contact",
            json!({ "name": "Jo" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = testing::json(response).await;
        assert_eq!(body["errors"].as_array().unwrap().len(), 3);
    }
}
