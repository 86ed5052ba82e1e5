//! Events-related HTTP API.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::AppState;
use crate::config::Uploads;
use crate::error::Result;
use crate::event::{Event, EventService, OrganizerEvents};
use crate::router::{Message, lenient_payload};
use crate::upload::{EventMedia, Form, body_limit};
use crate::validation::Payload;

#[derive(Debug, Serialize)]
pub struct Saved {
    message: &'static str,
    event: Event,
}

pub fn router(uploads: &Uploads) -> Router<AppState> {
    let limit = DefaultBodyLimit::max(body_limit::<EventMedia>(uploads));

    Router::new()
        // `POST /events/create-event` accepts JSON or multipart with `media` files.
        .route("/create-event", post(create).layer(limit))
        .route("/events", get(list))
        // `PUT /events/events/{id}` appends uploaded `media`.
        .route(
            "/events/{id}",
            get(find).put(update).delete(delete).layer(limit),
        )
        .route("/organizer-events", post(organizer_events))
}

/// Handler to create an event.
///
/// Uploaded media are removed if the event is refused.
async fn create(
    State(service): State<EventService>,
    form: Form<EventMedia>,
) -> Result<(StatusCode, Json<Saved>)> {
    let event = service.create(&form.payload, form.media).await?;
    form.guard.commit();

    Ok((
        StatusCode::CREATED,
        Json(Saved {
            message: "Event created successfully",
            event,
        }),
    ))
}

async fn list(State(service): State<EventService>) -> Result<Json<Vec<Event>>> {
    Ok(Json(service.list().await?))
}

async fn find(
    State(service): State<EventService>,
    Path(id): Path<String>,
) -> Result<Json<Event>> {
    Ok(Json(service.get(&id).await?))
}

async fn update(
    State(service): State<EventService>,
    Path(id): Path<String>,
    form: Form<EventMedia>,
) -> Result<Json<Saved>> {
    let event = service.update(&id, &form.payload, form.media).await?;
    form.guard.commit();

    Ok(Json(Saved {
        message: "Event updated successfully",
        event,
    }))
}

/// Handler to delete an event. The caller `userId` may be given in the
/// query string or in a JSON body.
async fn delete(
    State(service): State<EventService>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Result<Json<Message>> {
    let payload = lenient_payload(query, &body)?;
    service.delete(&id, &payload).await?;

    Ok(Json(Message {
        message: "Event deleted successfully",
    }))
}

async fn organizer_events(
    State(service): State<EventService>,
    payload: Payload,
) -> Result<Json<OrganizerEvents>> {
    Ok(Json(service.list_for_organizer(&payload).await?))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::{Value, json};

    use crate::testing::{self, Part};
    use crate::user::Role;
    use crate::{make_multipart_request, make_request};

    fn stored_files(ctx: &testing::TestContext) -> usize {
        std::fs::read_dir(ctx.state.media.directory().join("events"))
            .map(|entries| entries.count())
            .unwrap_or_default()
    }

    fn parts(body: &Value) -> Vec<(String, String)> {
        body.as_object()
            .unwrap()
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                (key.clone(), value)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_create_with_media() {
        let ctx = testing::context();
        let app = crate::app(ctx.state.clone());
        let organizer = testing::insert_user(&ctx, "org@x.com", Role::Organizer, true).await;

        let fields = parts(&testing::event_body(&organizer.id));
        let mut form: Vec<Part> = fields
            .iter()
            .map(|(key, value)| Part::text(key, value))
            .collect();
        form.push(Part::file("media", "pitch.jpg", "image/jpeg", b"jpg"));

        let response =
            make_multipart_request(app.clone(), Method::POST, "/events/create-event", &form)
                .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = testing::json(response).await;
        let id = body["event"]["id"].as_str().unwrap().to_owned();
        assert_eq!(body["event"]["sport"], "Football");
        assert_eq!(body["event"]["media"].as_array().unwrap().len(), 1);
        assert_eq!(stored_files(&ctx), 1);

        let path = format!("/events/events/{id}");
        let response = make_multipart_request(
            app.clone(),
            Method::PUT,
            &path,
            &[
                Part::text("eventTitle", "New Name"),
                Part::file("media", "team.png", "image/png", b"png"),
            ],
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = testing::json(response).await;
        assert_eq!(body["event"]["eventTitle"], "New Name");
        assert_eq!(body["event"]["media"].as_array().unwrap().len(), 2);
        assert_eq!(stored_files(&ctx), 2);

        let response = make_request(app, Method::GET, &path, String::default()).await;
        assert_eq!(testing::json(response).await["eventTitle"], "New Name");
    }

    #[tokio::test]
    async fn test_delete_removes_media() {
        let ctx = testing::context();
        let app = crate::app(ctx.state.clone());
        let organizer = testing::insert_user(&ctx, "org@x.com", Role::Organizer, true).await;

        let fields = parts(&testing::event_body(&organizer.id));
        let mut form: Vec<Part> = fields
            .iter()
            .map(|(key, value)| Part::text(key, value))
            .collect();
        form.push(Part::file("media", "pitch.jpg", "image/jpeg", b"jpg"));
        form.push(Part::file("media", "goal.mp4", "video/mp4", b"mp4"));

        let response =
            make_multipart_request(app.clone(), Method::POST, "/events/create-event", &form)
                .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let id = testing::json(response).await["event"]["id"]
            .as_str()
            .unwrap()
            .to_owned();
        assert_eq!(stored_files(&ctx), 2);

        let path = format!("/events/events/{id}?userId={}", organizer.id);
        let response = make_request(app, Method::DELETE, &path, String::default()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(stored_files(&ctx), 0);
    }

    #[tokio::test]
    async fn test_refused_event_removes_media() {
        let ctx = testing::context();
        let app = crate::app(ctx.state.clone());
        let player = testing::insert_user(&ctx, "jo@x.com", Role::Player, true).await;

        let fields = parts(&testing::event_body(&player.id));
        let mut form: Vec<Part> = fields
            .iter()
            .map(|(key, value)| Part::text(key, value))
            .collect();
        form.push(Part::file("media", "pitch.jpg", "image/jpeg", b"jpg"));

        let response =
            make_multipart_request(app.clone(), Method::POST, "/events/create-event", &form)
                .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(stored_files(&ctx), 0);

        let response = make_multipart_request(
            app,
            Method::PUT,
            "/events/events/65f1c2a9b3e4d5f6a7b8c9d0",
            &[Part::file("media", "team.png", "image/png", b"png")],
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(stored_files(&ctx), 0);
    }

    #[tokio::test]
    async fn test_organizer_listing_and_delete() {
        let ctx = testing::context();
        let app = crate::app(ctx.state.clone());
        let organizer = testing::insert_user(&ctx, "org@x.com", Role::Organizer, true).await;
        let other = testing::insert_user(&ctx, "other@x.com", Role::Organizer, true).await;

        let response = make_request(
            app.clone(),
            Method::POST,
            "/events/create-event",
            testing::event_body(&organizer.id).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let id = testing::json(response).await["event"]["id"]
            .as_str()
            .unwrap()
            .to_owned();

        let response = make_request(
            app.clone(),
            Method::POST,
            "/events/organizer-events",
            json!({ "userId": organizer.id, "query": "five-a-side" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = testing::json(response).await;
        assert_eq!(body["upcomingEvents"].as_array().unwrap().len(), 1);
        assert!(body["pastEvents"].as_array().unwrap().is_empty());

        let path = format!("/events/events/{id}?userId={}", other.id);
        let response =
            make_request(app.clone(), Method::DELETE, &path, String::default()).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let path = format!("/events/events/{id}");
        let response = make_request(
            app.clone(),
            Method::DELETE,
            &path,
            json!({ "userId": organizer.id }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = make_request(app, Method::GET, &path, String::default()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
