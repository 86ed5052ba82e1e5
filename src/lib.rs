//! Matchday is the backend of a sports event application: accounts,
//! organizer onboarding, events and contact messages.

#![forbid(unsafe_code)]
mod clock;
mod contact;
mod crypto;
mod database;
pub mod error;
mod event;
mod id;
mod mail;
mod role;
mod router;
pub mod telemetry;
mod upload;
mod user;
mod validation;

pub mod config;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{Method, StatusCode, header};
use axum::routing::{get, post};
use axum::{Router, middleware as AxumMiddleware};
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::services::ServeDir;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

pub use error::ServerError;

const CONFIG_PATH: &str = "CONFIG_PATH";

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: Method,
    path: &str,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    app.oneshot(
        Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(axum::body::Body::from(body))
            .unwrap(),
    )
    .await
    .unwrap()
}

/// Send a `multipart/form-data` request.
#[cfg(test)]
pub async fn make_multipart_request(
    app: Router,
    method: Method,
    path: &str,
    parts: &[testing::Part<'_>],
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    let (content_type, body) = testing::multipart(parts);
    app.oneshot(
        Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, content_type)
            .body(axum::body::Body::from(body))
            .unwrap(),
    )
    .await
    .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub db: database::Database,
    pub crypto: Arc<crypto::Crypto>,
    pub mail: Arc<dyn mail::NotificationGateway>,
    pub clock: Arc<dyn clock::Clock>,
    pub media: upload::MediaStore,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(10)))
        // Remove senstive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
                .allow_headers(Any),
        );

    let uploads = &state.config.uploads;
    let routes = Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::handler))
        // `POST /contact` goes to `contact`.
        .route("/contact", post(router::contact::handler))
        .nest("/users", router::users::router(uploads))
        .nest("/events", router::events::router(uploads))
        .route_layer(AxumMiddleware::from_fn(telemetry::track));

    // serve stored media back under their public prefix.
    let prefix = state.media.public_prefix();
    let routes = if prefix.starts_with('/') && prefix.len() > 1 {
        routes.nest_service(prefix, ServeDir::new(state.media.directory()))
    } else {
        routes
    };

    routes.with_state(state).layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state() -> Result<AppState, Box<dyn std::error::Error>>
{
    // read configuration file. let it in memory.
    let path = std::env::var(CONFIG_PATH).unwrap_or_default();
    let config = config::Configuration::default()
        .path(path.into())
        .read()?;

    let storage = config.policy.role_requests;
    let db = match config.postgres {
        Some(ref postgres) => database::Database::postgres(postgres, storage).await?,
        None => {
            tracing::warn!(
                "missing `postgres` entry on `config.yaml` file, documents are kept in memory"
            );
            database::Database::memory(storage)
        },
    };

    let crypto = Arc::new(crypto::Crypto::new(config.argon2.clone())?);

    // handle mail sender.
    let mail: Arc<dyn mail::NotificationGateway> = match &config.mail {
        Some(cfg) => Arc::new(mail::RabbitMqGateway::new(cfg).await?),
        None => {
            tracing::warn!("missing `mail` entry on `config.yaml` file, notifications are only logged");
            Arc::new(mail::LogGateway)
        },
    };

    Ok(AppState {
        media: upload::MediaStore::new(&config.uploads),
        config,
        db,
        crypto,
        mail,
        clock: Arc::new(clock::SystemClock::new()),
    })
}

/// Fixtures shared by tests.
#[cfg(test)]
pub mod testing {
    use std::sync::Arc;

    use chrono::{DateTime, TimeZone, Utc};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tempfile::TempDir;

    use crate::AppState;
    use crate::clock::FixedClock;
    use crate::config::{self, Configuration};
    use crate::crypto::Crypto;
    use crate::database::Database;
    use crate::mail::RecordingGateway;
    use crate::upload::MediaStore;
    use crate::user::{Role, User, UserBuilder, UserRepository};
    use crate::validation::Payload;

    pub const PASSWORD: &str = "secret1";
    const BOUNDARY: &str = "matchday-test-boundary";

    /// Argon2 parameters cheap enough for tests.
    pub fn light_argon2() -> config::Argon2 {
        config::Argon2 {
            memory_cost: 1024,
            iterations: 1,
            parallelism: 1,
            hash_length: 32,
        }
    }

    pub fn config() -> Configuration {
        let mut config = Configuration::default();
        config.name = "matchday".into();
        config.operations_inbox = "ops@matchday.test".into();
        config.argon2 = Some(light_argon2());
        config
    }

    /// Instant every test context starts at.
    pub fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 6, 1, 12, 0, 0).unwrap()
    }

    pub struct TestContext {
        pub state: AppState,
        pub clock: Arc<FixedClock>,
        pub mail: Arc<RecordingGateway>,
        _uploads: TempDir,
    }

    pub fn context() -> TestContext {
        context_with(config())
    }

    /// Build a context over the in-memory store. Uploads go to a
    /// temporary directory removed with the context.
    pub fn context_with(mut config: Configuration) -> TestContext {
        let uploads = tempfile::tempdir().unwrap();
        config.uploads.directory = uploads.path().to_path_buf();

        let clock = Arc::new(FixedClock::new(now()));
        let mail = Arc::new(RecordingGateway::default());
        let state = AppState {
            db: Database::memory(config.policy.role_requests),
            crypto: Arc::new(Crypto::new(config.argon2.clone()).unwrap()),
            mail: mail.clone(),
            clock: clock.clone(),
            media: MediaStore::new(&config.uploads),
            config: Arc::new(config),
        };

        TestContext {
            state,
            clock,
            mail,
            _uploads: uploads,
        }
    }

    pub fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => Payload::from(map),
            other => panic!("payload must be an object, got {other}"),
        }
    }

    /// Verified user with a fresh identifier. The password is not hashed.
    pub fn user(email: &str, role: Role) -> User {
        let mut user = UserBuilder::new()
            .full_name("Jo Martin")
            .email(email)
            .password_hash(PASSWORD)
            .build(crate::id::generate(now()), "123456".into(), now());
        user.role = role;
        user.is_verified = true;
        user.otp = None;
        user
    }

    /// Store a user whose password is [`PASSWORD`].
    pub async fn insert_user(ctx: &TestContext, email: &str, role: Role, verified: bool) -> User {
        let mut user = user(email, role);
        user.password = ctx.state.crypto.pwd.hash_password(PASSWORD).unwrap();
        if !verified {
            user.is_verified = false;
            user.otp = Some("123456".into());
        }
        ctx.state.db.users.insert(&user).await.unwrap();
        user
    }

    /// Valid event creation body owned by `user_id`.
    pub fn event_body(user_id: &str) -> Value {
        json!({
            "userId": user_id,
            "eventTitle": "Sunday Five-a-side",
            "description": "Friendly games on the riverside pitch",
            "date": "2030-06-02",
            "time": "18:30",
            "location": "Parc de la Tete d'Or",
            "country": "France",
            "city": "Lyon",
            "sport": "soccer",
            "organizerName": "Jo Martin",
            "organizerGender": "Male",
            "contactNumber1": "0612345678",
            "teamSizeLimit": 8,
            "maxPlayersPerTeam": 7,
            "category": "tournament",
            "type": "Tournament",
            "registrationLimit": 16,
            "playerGender": "Mixed",
            "age": 16,
            "registrationFee": 10,
            "eventFeeMethod": "Per Team",
            "rules": "[\"no tackles\", \"bring shin guards\"]",
            "features": ["floodlights"]
        })
    }

    pub fn event_payload(user_id: &str) -> Payload {
        payload(event_body(user_id))
    }

    /// Valid role change request body for `user_id`.
    pub fn role_body(user_id: &str) -> Value {
        json!({
            "userId": user_id,
            "fullName": "Jo Martin",
            "email": "jo@x.com",
            "phoneNumber1": "0612345678",
            "phoneNumber2": "0478123456",
            "organizerType": "business",
            "city": "Lyon",
            "region": "Auvergne-Rhone-Alpes",
            "address": "12 quai Victor Augagneur",
            "sports": ["Football", "Tennis"],
            "eventTypes": ["Tournament"],
            "bankName": "Banque Populaire",
            "accountNumber": "FR7612345678901234567890123"
        })
    }

    pub fn role_payload(user_id: &str) -> Payload {
        payload(role_body(user_id))
    }

    /// Part of a multipart body.
    pub enum Part<'a> {
        Text(&'a str, &'a str),
        File {
            name: &'a str,
            file_name: &'a str,
            content_type: &'a str,
            bytes: &'a [u8],
        },
    }

    impl<'a> Part<'a> {
        pub fn text(name: &'a str, value: &'a str) -> Self {
            Part::Text(name, value)
        }

        pub fn file(
            name: &'a str,
            file_name: &'a str,
            content_type: &'a str,
            bytes: &'a [u8],
        ) -> Self {
            Part::File {
                name,
                file_name,
                content_type,
                bytes,
            }
        }
    }

    /// Encode `parts`, returning the content type and the body.
    pub fn multipart(parts: &[Part]) -> (String, Vec<u8>) {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match part {
                Part::Text(name, value) => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n")
                            .as_bytes(),
                    );
                    body.extend_from_slice(value.as_bytes());
                },
                Part::File {
                    name,
                    file_name,
                    content_type,
                    bytes,
                } => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{name}\"; \
                             filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(bytes);
                },
            }
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        (format!("multipart/form-data; boundary={BOUNDARY}"), body)
    }

    /// Read a JSON response body.
    pub async fn json(response: axum::http::Response<axum::body::Body>) -> Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }
}
