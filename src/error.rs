//! Error handler for matchday.

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::JsonRejection;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use sqlx::Error as SQLxError;
use thiserror::Error;
use validator::{ValidationError, ValidationErrors};

pub type Result<T> = std::result::Result<T, ServerError>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    #[error("error parsing form data")]
    ParsingForm(BoxError),

    #[error(transparent)]
    Axum(#[from] JsonRejection),

    #[error(transparent)]
    MultipartRejection(#[from] MultipartRejection),

    #[error(transparent)]
    Multipart(#[from] MultipartError),

    #[error("SQL request failed: {0}")]
    Sql(#[from] SQLxError),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("user already exists")]
    EmailTaken,

    #[error("user already verified")]
    AlreadyVerified,

    #[error("invalid OTP")]
    InvalidCode,

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("email is not verified")]
    Unverified,

    #[error("user must be verified to request a role change")]
    NotVerified,

    #[error("a pending role change request already exists")]
    DuplicatePending,

    #[error("request has already been processed")]
    AlreadyResolved,

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("no password reset in progress")]
    NoActiveReset,

    #[error("invalid reset token")]
    InvalidToken,

    #[error("reset token has expired")]
    TokenExpired,

    #[error("notification delivery failed: {0}")]
    DeliveryFailed(#[source] BoxError),

    #[error("file storage failed: {0}")]
    Upload(#[from] std::io::Error),

    #[error(transparent)]
    Crypto(#[from] crate::crypto::CryptoError),

    #[error("internal server error, {details}")]
    Internal {
        details: String,
        source: Option<BoxError>,
    },
}

impl ServerError {
    /// Build a validation error holding a single field issue.
    pub fn field(field: &'static str, code: &'static str, message: impl Into<String>) -> Self {
        let message: String = message.into();
        let mut errors = ValidationErrors::new();
        errors.add(field, ValidationError::new(code).with_message(message.into()));
        Self::Validation(errors)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ServerError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ServerError::Unverified
            | ServerError::NotVerified
            | ServerError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Sql(_)
            | ServerError::DeliveryFailed(_)
            | ServerError::Upload(_)
            | ServerError::Crypto(_)
            | ServerError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Multipart(err) => err.status(),
            ServerError::MultipartRejection(err) => err.status(),
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Stable, human readable message of the error family.
    fn title(&self) -> &'static str {
        match self {
            ServerError::Validation(_) => "There were validation errors with your request.",
            ServerError::ParsingForm(_)
            | ServerError::Axum(_)
            | ServerError::Multipart(_)
            | ServerError::MultipartRejection(_) => "Server error during data parsing.",
            ServerError::NotFound(_) => "Resource not found.",
            ServerError::EmailTaken => "User already exists.",
            ServerError::AlreadyVerified => "User already verified.",
            ServerError::InvalidCode => "Invalid OTP.",
            ServerError::InvalidCredentials => "Invalid email or password.",
            ServerError::Unverified => "Please verify your email with OTP.",
            ServerError::NotVerified => "User must be verified to request role change.",
            ServerError::DuplicatePending => "A pending role change request already exists.",
            ServerError::AlreadyResolved => "Request has already been processed.",
            ServerError::Forbidden(_) => "Forbidden.",
            ServerError::NoActiveReset => "Token not found. Please request a new password reset.",
            ServerError::InvalidToken => "Invalid token. Please check and try again.",
            ServerError::TokenExpired => "Token has expired. Please request a new password reset.",
            ServerError::DeliveryFailed(_) => "Failed to deliver notification.",
            _ => "Internal server error.",
        }
    }
}

/// Structure for detailed error responses.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    r#type: Option<String>,
    title: String,
    status: u16,
    detail: String,
    instance: Option<String>,
    errors: Option<Vec<FieldError>>,
}

impl ResponseError {
    /// Update error status code.
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code.as_u16();
        self
    }

    /// Update `title` field.
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.into();
        self
    }

    /// Add detailed error.
    pub fn details(mut self, description: &str) -> Self {
        self.detail = description.into();
        self
    }

    /// Automatically add errors field.
    pub fn errors(mut self, errors: &ValidationErrors) -> Self {
        self.errors = Some(parse_validation_errors(errors));
        self
    }

    /// Transform [`ResponseError`] into axum [`Response`].
    pub fn into_response(self) -> std::result::Result<Response, axum::http::Error> {
        if let Ok(body) = serde_json::to_string(&self) {
            Response::builder()
                .status(self.status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.into())
        } else {
            Ok(internal_server_error())
        }
    }
}

impl Default for ResponseError {
    fn default() -> Self {
        Self {
            r#type: None,
            title: "Internal server error.".to_owned(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            detail: String::default(),
            instance: None,
            errors: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct FieldError {
    field: String,
    message: String,
}

fn parse_validation_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    let mut fields: Vec<FieldError> = errors
        .field_errors()
        .iter()
        .flat_map(|(field, issues)| {
            issues.iter().map(move |issue| FieldError {
                field: field.to_string(),
                message: issue.to_string(),
            })
        })
        .collect();
    fields.sort_by(|a, b| a.field.cmp(&b.field));
    fields
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let response = ResponseError::default()
            .title(self.title())
            .details(&self.to_string())
            .status(status);

        let response = match &self {
            ServerError::Validation(validation_errors) => response.errors(validation_errors),

            _ if status.is_server_error() => {
                tracing::error!(err = %self, "server returned {} status", status.as_u16());

                ResponseError::default().title(self.title()).status(status)
            },

            _ => response,
        };

        response
            .into_response()
            .unwrap_or_else(|_| internal_server_error())
    }
}

fn internal_server_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/json")
        .body(
            serde_json::json!({
                "type": null,
                "title": "Internal server error.",
                "status": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                "detail": null,
                "instance": null,
                "errors": null,
            })
            .to_string()
            .into(),
        )
        .unwrap_or_else(|_| Response::new("Internal server error".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_validation_errors_are_listed() {
        let mut errors = ValidationErrors::new();
        errors.add("sport", ValidationError::new("enum").with_message("bad sport".into()));
        errors.add("age", ValidationError::new("range").with_message("too young".into()));

        let response = ServerError::Validation(errors).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["errors"][0]["field"], "age");
        assert_eq!(body["errors"][0]["message"], "too young");
        assert_eq!(body["errors"][1]["field"], "sport");
    }

    #[tokio::test]
    async fn test_internal_details_are_hidden() {
        let err = ServerError::Internal {
            details: "connection refused on 10.0.0.3".into(),
            source: None,
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(!body.contains("10.0.0.3"));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ServerError::InvalidCredentials.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ServerError::Unverified.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ServerError::NotFound("event").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ServerError::EmailTaken.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ServerError::AlreadyResolved.status_code(), StatusCode::BAD_REQUEST);
    }
}
