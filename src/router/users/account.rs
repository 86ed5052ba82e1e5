//! Registration, verification and lookups.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;

use super::Authenticated;
use crate::error::Result;
use crate::user::{Profile, Role, UserService};
use crate::validation::Payload;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registered {
    message: &'static str,
    user_id: String,
    full_name: String,
    email: String,
    role: Role,
}

/// Handler to create user.
pub async fn signup(
    State(service): State<UserService>,
    payload: Payload,
) -> Result<(StatusCode, Json<Registered>)> {
    let user = service.signup(&payload).await?;

    Ok((
        StatusCode::CREATED,
        Json(Registered {
            message: "User registered. Please verify OTP sent to your email.",
            user_id: user.id,
            full_name: user.full_name,
            email: user.email,
            role: user.role,
        }),
    ))
}

pub async fn verify_otp(
    State(service): State<UserService>,
    payload: Payload,
) -> Result<Json<Authenticated>> {
    let user = service.verify_otp(&payload).await?;
    Ok(Json(Authenticated::new("OTP verified successfully", &user)))
}

pub async fn login(
    State(service): State<UserService>,
    payload: Payload,
) -> Result<Json<Authenticated>> {
    let user = service.login(&payload).await?;
    Ok(Json(Authenticated::new("Login successful", &user)))
}

pub async fn me(State(service): State<UserService>, payload: Payload) -> Result<Json<Profile>> {
    let user = service.me(&payload).await?;
    Ok(Json(Profile::from(&user)))
}

pub async fn organizers(State(service): State<UserService>) -> Result<Json<Vec<Profile>>> {
    let users = service.organizers().await?;
    Ok(Json(users.iter().map(Profile::from).collect()))
}

pub async fn players(State(service): State<UserService>) -> Result<Json<Vec<Profile>>> {
    let users = service.players().await?;
    Ok(Json(users.iter().map(Profile::from).collect()))
}
