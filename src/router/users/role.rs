//! Role change requests.

use std::collections::HashMap;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use serde::Serialize;

use crate::error::Result;
use crate::role::{RoleRequest, RoleService, Status};
use crate::router::lenient_payload;
use crate::user::Role;
use crate::validation::Payload;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submitted {
    message: &'static str,
    request_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolved {
    message: String,
    request_id: String,
    user_id: String,
    status: Status,
    /// Role granted by an approval.
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<Role>,
}

/// Handler to apply for a new role.
pub async fn submit(
    State(service): State<RoleService>,
    payload: Payload,
) -> Result<(StatusCode, Json<Submitted>)> {
    let request = service.submit(&payload).await?;

    Ok((
        StatusCode::CREATED,
        Json(Submitted {
            message: "Role change request submitted successfully",
            request_id: request.id,
        }),
    ))
}

/// Handler listing pending requests. `userId` may be given in the query
/// string or in a JSON body.
pub async fn list(
    State(service): State<RoleService>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Result<Json<Vec<RoleRequest>>> {
    let payload = lenient_payload(query, &body)?;
    Ok(Json(service.list_pending(&payload).await?))
}

pub async fn manage(
    State(service): State<RoleService>,
    payload: Payload,
) -> Result<Json<Resolved>> {
    let request = service.resolve(&payload).await?;
    let action = match request.status {
        Status::Approved => "approved",
        _ => "rejected",
    };

    Ok(Json(Resolved {
        message: format!("Role change request {action} successfully"),
        role: (request.status == Status::Approved).then_some(request.requested_role),
        request_id: request.id,
        user_id: request.user_id,
        status: request.status,
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::role::RoleRequestStore;
    use crate::user::Role;
    use crate::{make_request, testing};

    #[tokio::test]
    async fn test_request_lifecycle() {
        let ctx = testing::context();
        let app = crate::app(ctx.state.clone());
        let user = testing::insert_user(&ctx, "jo@x.com", Role::Player, true).await;
        let admin = testing::insert_user(&ctx, "admin@x.com", Role::Admin, true).await;

        let body = testing::role_body(&user.id).to_string();
        let response =
            make_request(app.clone(), Method::POST, "/users/role-change", body.clone()).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let request_id = testing::json(response).await["requestId"]
            .as_str()
            .unwrap()
            .to_owned();

        let response =
            make_request(app.clone(), Method::POST, "/users/submit-role-change", body).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let path = format!("/users/role-requests?userId={}", user.id);
        let response = make_request(app.clone(), Method::GET, &path, String::default()).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let path = format!("/users/role-requests?userId={}", admin.id);
        let response = make_request(app.clone(), Method::GET, &path, String::default()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(testing::json(response).await[0]["id"], request_id.as_str());

        let decision = json!({ "requestId": request_id, "action": "approve" }).to_string();
        let response = make_request(
            app.clone(),
            Method::POST,
            "/users/manage-role-request",
            decision.clone(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = testing::json(response).await;
        assert_eq!(body["role"], "organizer");
        assert_eq!(body["message"], "Role change request approved successfully");

        let response =
            make_request(app, Method::POST, "/users/manage-role-request", decision).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        assert!(ctx.state.db.role_requests.find_pending().await.unwrap().is_empty());
    }
}
