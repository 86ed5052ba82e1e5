//! Profile edition.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::error::Result;
use crate::upload::{Form, ProfileImage};
use crate::user::{Profile, UserService};

#[derive(Debug, Serialize)]
pub struct Response {
    message: &'static str,
    user: Profile,
}

/// Handler to update profile, optionally replacing the profile image.
///
/// The uploaded image is removed if the update fails.
pub async fn handler(
    State(service): State<UserService>,
    form: Form<ProfileImage>,
) -> Result<Json<Response>> {
    let image = form.media.first().cloned();
    let user = service.update_profile(&form.payload, image).await?;
    form.guard.commit();

    Ok(Json(Response {
        message: "Profile updated successfully",
        user: Profile::from(&user),
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::testing::{self, Part};
    use crate::user::Role;
    use crate::{make_multipart_request, make_request};

    #[tokio::test]
    async fn test_update_with_image() {
        let ctx = testing::context();
        let app = crate::app(ctx.state.clone());
        let user = testing::insert_user(&ctx, "jo@x.com", Role::Player, true).await;

        let response = make_multipart_request(
            app,
            Method::POST,
            "/users/update-profile",
            &[
                Part::text("userId", &user.id),
                Part::text("location", "Nantes"),
                Part::text("age", "31"),
                Part::file("profileImage", "me.png", "image/png", b"png"),
            ],
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = testing::json(response).await;
        assert_eq!(body["user"]["location"], "Nantes");
        assert_eq!(body["user"]["age"], 31);
        assert_eq!(body["user"]["fullName"], user.full_name);

        let image = body["user"]["profileImage"].as_str().unwrap();
        let file = image.rsplit('/').next().unwrap();
        assert!(ctx.state.media.directory().join("profile").join(file).is_file());
    }

    #[tokio::test]
    async fn test_replaced_image_is_removed() {
        let ctx = testing::context();
        let app = crate::app(ctx.state.clone());
        let user = testing::insert_user(&ctx, "jo@x.com", Role::Player, true).await;

        let mut images = Vec::new();
        for name in ["first.png", "second.png"] {
            let response = make_multipart_request(
                app.clone(),
                Method::POST,
                "/users/update-profile",
                &[
                    Part::text("userId", &user.id),
                    Part::file("profileImage", name, "image/png", b"png"),
                ],
            )
            .await;
            assert_eq!(response.status(), StatusCode::OK);

            let body = testing::json(response).await;
            images.push(body["user"]["profileImage"].as_str().unwrap().to_owned());
        }

        let profile = ctx.state.media.directory().join("profile");
        let file = |image: &str| profile.join(image.rsplit('/').next().unwrap());
        assert!(!file(&images[0]).exists());
        assert!(file(&images[1]).is_file());

        let response = make_request(
            app,
            Method::POST,
            "/users/update-profile",
            json!({ "userId": user.id, "country": "France" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(file(&images[1]).is_file());
    }

    #[tokio::test]
    async fn test_failed_update_removes_image() {
        let ctx = testing::context();
        let app = crate::app(ctx.state.clone());
        testing::insert_user(&ctx, "jo@x.com", Role::Player, true).await;
        let sam = testing::insert_user(&ctx, "sam@x.com", Role::Player, true).await;

        let response = make_multipart_request(
            app.clone(),
            Method::POST,
            "/users/update-profile",
            &[
                Part::text("userId", &sam.id),
                Part::text("email", "jo@x.com"),
                Part::file("profileImage", "me.png", "image/png", b"png"),
            ],
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let profile = ctx.state.media.directory().join("profile");
        assert_eq!(std::fs::read_dir(profile).unwrap().count(), 0);

        let response = make_request(
            app,
            Method::POST,
            "/users/update-profile",
            json!({ "userId": "65f1c2a9b3e4d5f6a7b8c9d0", "country": "France" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
