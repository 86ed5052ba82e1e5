//! Password recovery.

use axum::Json;
use axum::extract::State;

use crate::error::Result;
use crate::router::Message;
use crate::user::UserService;
use crate::validation::Payload;

/// Handler to issue a reset token. Answers the same for unknown emails.
pub async fn forgot(
    State(service): State<UserService>,
    payload: Payload,
) -> Result<Json<Message>> {
    service.forgot_password(&payload).await?;

    Ok(Json(Message {
        message: "If your email is registered, you will receive password reset instructions",
    }))
}

pub async fn reset(State(service): State<UserService>, payload: Payload) -> Result<Json<Message>> {
    service.reset_password(&payload).await?;

    Ok(Json(Message {
        message: "Password has been reset successfully",
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::mail::Template;
    use crate::user::Role;
    use crate::{make_request, testing};

    #[tokio::test]
    async fn test_reset_flow() {
        let ctx = testing::context();
        let app = crate::app(ctx.state.clone());
        testing::insert_user(&ctx, "jo@x.com", Role::Player, true).await;

        let unknown = make_request(
            app.clone(),
            Method::POST,
            "/users/forgot-password",
            json!({ "email": "nobody@x.com" }).to_string(),
        )
        .await;
        let known = make_request(
            app.clone(),
            Method::POST,
            "/users/forgot-password",
            json!({ "email": "jo@x.com" }).to_string(),
        )
        .await;
        assert_eq!(unknown.status(), StatusCode::OK);
        assert_eq!(known.status(), StatusCode::OK);
        assert_eq!(testing::json(unknown).await, testing::json(known).await);

        let token = ctx.mail.last(Template::PasswordReset).unwrap().data["token"].clone();
        let body = json!({
            "email": "jo@x.com",
            "token": token,
            "newPassword": "secret2"
        })
        .to_string();

        let response = make_request(
            app.clone(),
            Method::POST,
            "/users/reset-password",
            body.clone(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response =
            make_request(app.clone(), Method::POST, "/users/reset-password", body).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let login = json!({ "email": "jo@x.com", "password": "secret2" }).to_string();
        let response = make_request(app, Method::POST, "/users/login", login).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
