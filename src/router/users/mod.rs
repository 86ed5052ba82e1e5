//! Users-related HTTP API.
mod account;
mod password;
mod profile;
mod role;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use serde::Serialize;

use crate::AppState;
use crate::config::Uploads;
use crate::upload::{ProfileImage, body_limit};
use crate::user::{Profile, User};

/// Profile returned after a successful authentication step.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Authenticated {
    message: &'static str,
    user_id: String,
    user: Profile,
}

impl Authenticated {
    fn new(message: &'static str, user: &User) -> Self {
        Self {
            message,
            user_id: user.id.clone(),
            user: Profile::from(user),
        }
    }
}

pub fn router(uploads: &Uploads) -> Router<AppState> {
    Router::new()
        // `POST /users/signup` goes to `signup`.
        .route("/signup", post(account::signup))
        .route("/verify-otp", post(account::verify_otp))
        .route("/login", post(account::login))
        .route("/me", post(account::me))
        .route("/organizers", get(account::organizers))
        .route("/players", get(account::players))
        .route("/forgot-password", post(password::forgot))
        .route("/reset-password", post(password::reset))
        // `POST /users/update-profile` accepts JSON or multipart with a `profileImage`.
        .route(
            "/update-profile",
            post(profile::handler)
                .layer(DefaultBodyLimit::max(body_limit::<ProfileImage>(uploads))),
        )
        .route("/role-change", post(role::submit))
        .route("/submit-role-change", post(role::submit))
        // `GET /users/role-requests?userId=` and its `POST` form go to `list`.
        .route("/role-requests", get(role::list).post(role::list))
        .route("/manage-role-request", post(role::manage))
}
