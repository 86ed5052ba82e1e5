//! Media ingestion.
//!
//! File parts are streamed to disk while the request is parsed. Every
//! stored file is tracked by an [`UploadGuard`] and removed again unless
//! the handler commits it.
use std::marker::PhantomData;
use std::path::PathBuf;

use axum::extract::{FromRequest, Multipart, Request};
use axum::http::header;
use chrono::Utc;
use rand::Rng;
use rand::rngs::OsRng;
use tokio::io::AsyncWriteExt;

use crate::AppState;
use crate::config::Uploads;
use crate::error::{Result, ServerError};
use crate::validation::Payload;

const MULTIPART: &str = "multipart/form-data";
const SUFFIX_RANGE: u32 = 1_000_000_000;

/// Size and count limits of one upload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_bytes: usize,
    pub max_files: usize,
}

/// Kind of file accepted by a route.
pub trait UploadKind: Send + Sync + 'static {
    /// Multipart field carrying the files.
    const FIELD: &'static str;
    /// Sub-directory, also used in the public reference.
    const DIRECTORY: &'static str;
    /// Accepted content types with the extension given to stored files.
    const ACCEPTED: &'static [(&'static str, &'static str)];
    /// Message returned for any other content type.
    const REJECTED: &'static str;

    fn limits(uploads: &Uploads) -> Limits;

    fn extension(content_type: Option<&str>) -> Option<&'static str> {
        let content_type = content_type?.trim();
        Self::ACCEPTED
            .iter()
            .find(|(accepted, _)| accepted.eq_ignore_ascii_case(content_type))
            .map(|(_, extension)| *extension)
    }
}

/// Single profile picture.
pub struct ProfileImage;

impl UploadKind for ProfileImage {
    const FIELD: &'static str = "profileImage";
    const DIRECTORY: &'static str = "profile";
    const ACCEPTED: &'static [(&'static str, &'static str)] = &[
        ("image/jpeg", ".jpg"),
        ("image/jpg", ".jpg"),
        ("image/png", ".png"),
    ];
    const REJECTED: &'static str = "Only JPEG, PNG, and JPG files are allowed";

    fn limits(uploads: &Uploads) -> Limits {
        Limits {
            max_bytes: uploads.profile_max_bytes,
            max_files: 1,
        }
    }
}

/// Pictures and videos attached to an event.
pub struct EventMedia;

impl UploadKind for EventMedia {
    const FIELD: &'static str = "media";
    const DIRECTORY: &'static str = "events";
    const ACCEPTED: &'static [(&'static str, &'static str)] = &[
        ("image/jpeg", ".jpg"),
        ("image/jpg", ".jpg"),
        ("image/png", ".png"),
        ("image/gif", ".gif"),
        ("video/mp4", ".mp4"),
        ("video/mpeg", ".mpeg"),
    ];
    const REJECTED: &'static str = "Invalid file type";

    fn limits(uploads: &Uploads) -> Limits {
        Limits {
            max_bytes: uploads.event_max_bytes,
            max_files: uploads.event_max_files,
        }
    }
}

/// Largest request body accepted on a route taking `K` files.
pub fn body_limit<K: UploadKind>(uploads: &Uploads) -> usize {
    const FORM_FIELDS: usize = 1024 * 1024;

    let limits = K::limits(uploads);
    limits
        .max_bytes
        .saturating_mul(limits.max_files)
        .saturating_add(FORM_FIELDS)
}

/// Files written during one request.
///
/// Dropping the guard deletes them; [`UploadGuard::commit`] keeps them.
#[derive(Debug, Default)]
pub struct UploadGuard {
    paths: Vec<PathBuf>,
}

impl UploadGuard {
    fn track(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    /// Keep every tracked file.
    pub fn commit(mut self) {
        self.paths.clear();
    }
}

impl Drop for UploadGuard {
    fn drop(&mut self) {
        for path in self.paths.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::debug!(path = %path.display(), "orphaned upload removed"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {},
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "cannot remove orphaned upload")
                },
            }
        }
    }
}

/// Local disk storage for uploaded media.
#[derive(Debug, Clone)]
pub struct MediaStore {
    directory: PathBuf,
    public_prefix: String,
    uploads: Uploads,
}

impl MediaStore {
    /// Create a new [`MediaStore`].
    pub fn new(uploads: &Uploads) -> Self {
        Self {
            directory: uploads.directory.clone(),
            public_prefix: uploads.public_prefix.trim_end_matches('/').to_owned(),
            uploads: uploads.clone(),
        }
    }

    /// Directory holding stored files.
    pub fn directory(&self) -> &PathBuf {
        &self.directory
    }

    /// Prefix of every returned reference.
    pub fn public_prefix(&self) -> &str {
        &self.public_prefix
    }

    /// Path on disk of a reference handed out by this store, `None` for
    /// anything else.
    fn path_of(&self, reference: &str) -> Option<PathBuf> {
        let relative = reference
            .strip_prefix(self.public_prefix.as_str())?
            .strip_prefix('/')?;
        let (directory, file) = relative.split_once('/')?;
        let plain = |segment: &str| {
            !segment.is_empty()
                && segment != "."
                && segment != ".."
                && !segment.contains(['/', '\\'])
        };

        (plain(directory) && plain(file)).then(|| self.directory.join(directory).join(file))
    }

    /// Delete stored files that are no longer referenced. Failures are
    /// logged and skipped.
    pub async fn remove(&self, references: &[String]) {
        for reference in references {
            let Some(path) = self.path_of(reference) else {
                tracing::warn!(%reference, "not a stored media reference");
                continue;
            };

            match tokio::fs::remove_file(&path).await {
                Ok(()) => tracing::debug!(path = %path.display(), "media removed"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {},
                Err(err) => tracing::warn!(path = %path.display(), %err, "cannot remove media"),
            }
        }
    }

    /// Read every part of `multipart`, storing `K` files and collecting
    /// text fields.
    async fn receive<K: UploadKind>(&self, multipart: &mut Multipart) -> Result<Form<K>> {
        let limits = K::limits(&self.uploads);
        let mut payload = Payload::new();
        let mut media = Vec::new();
        let mut guard = UploadGuard::default();

        while let Some(mut field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_owned) else {
                continue;
            };

            if field.file_name().is_none() {
                payload.append(&name, field.text().await?);
                continue;
            }

            if name != K::FIELD {
                return Err(ServerError::field(
                    K::FIELD,
                    "file_field",
                    format!("unexpected file field `{name}`"),
                ));
            }

            if media.len() >= limits.max_files {
                return Err(ServerError::field(
                    K::FIELD,
                    "file_count",
                    format!("at most {} files are allowed", limits.max_files),
                ));
            }

            let extension = K::extension(field.content_type())
                .ok_or_else(|| ServerError::field(K::FIELD, "file_type", K::REJECTED))?;

            let directory = self.directory.join(K::DIRECTORY);
            tokio::fs::create_dir_all(&directory).await?;

            let file_name = format!(
                "{}-{}{}",
                Utc::now().timestamp_millis(),
                OsRng.gen_range(0..SUFFIX_RANGE),
                extension
            );
            let path = directory.join(&file_name);
            let mut file = tokio::fs::File::create(&path).await?;
            guard.track(path);

            let mut size = 0;
            while let Some(chunk) = field.chunk().await? {
                size += chunk.len();
                if size > limits.max_bytes {
                    return Err(ServerError::field(
                        K::FIELD,
                        "file_size",
                        format!("files must not exceed {} bytes", limits.max_bytes),
                    ));
                }
                file.write_all(&chunk).await?;
            }
            file.flush().await?;

            tracing::debug!(file = %file_name, size, kind = K::DIRECTORY, "upload stored");
            media.push(format!("{}/{}/{}", self.public_prefix, K::DIRECTORY, file_name));
        }

        Ok(Form {
            payload,
            media,
            guard,
            kind: PhantomData,
        })
    }
}

/// Request body given either as JSON or as multipart form data holding
/// `K` files.
pub struct Form<K> {
    pub payload: Payload,
    /// References of the stored files, in upload order.
    pub media: Vec<String>,
    pub guard: UploadGuard,
    kind: PhantomData<K>,
}

impl<K: UploadKind> FromRequest<AppState> for Form<K> {
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self> {
        let is_multipart = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with(MULTIPART));

        if !is_multipart {
            return Ok(Self {
                payload: Payload::from_request(req, state).await?,
                media: Vec::new(),
                guard: UploadGuard::default(),
                kind: PhantomData,
            });
        }

        let mut multipart = Multipart::from_request(req, state).await?;
        state.media.receive::<K>(&mut multipart).await
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Method;

    use super::*;
    use crate::testing::{self, Part};

    fn request(parts: &[Part]) -> Request {
        let (content_type, body) = testing::multipart(parts);
        Request::builder()
            .method(Method::POST)
            .uri("/")
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body))
            .unwrap()
    }

    fn stored(store: &MediaStore, reference: &str) -> PathBuf {
        let relative = reference
            .strip_prefix(store.public_prefix())
            .unwrap()
            .trim_start_matches('/');
        store.directory().join(relative)
    }

    #[tokio::test]
    async fn test_files_and_fields() {
        let ctx = testing::context();
        let req = request(&[
            Part::text("eventTitle", "Sunday Five-a-side"),
            Part::text("rules", "[\"no tackles\"]"),
            Part::file("media", "pitch.png", "image/png", b"png"),
            Part::file("media", "warmup.mp4", "video/mp4", b"mp4"),
        ]);

        let form = Form::<EventMedia>::from_request(req, &ctx.state).await.unwrap();
        assert_eq!(form.payload.text("eventTitle").unwrap(), "Sunday Five-a-side");
        assert_eq!(form.payload.list("rules").unwrap(), vec!["no tackles"]);
        assert_eq!(form.media.len(), 2);
        assert!(form.media[0].starts_with("/uploads/events/"));
        assert!(form.media[1].ends_with(".mp4"));

        let paths: Vec<PathBuf> = form
            .media
            .iter()
            .map(|reference| stored(&ctx.state.media, reference))
            .collect();
        assert!(paths.iter().all(|path| path.is_file()));

        form.guard.commit();
        assert!(paths.iter().all(|path| path.is_file()));
    }

    #[tokio::test]
    async fn test_uncommitted_files_are_removed() {
        let ctx = testing::context();
        let req = request(&[Part::file("profileImage", "me.jpg", "image/jpeg", b"jpg")]);

        let form = Form::<ProfileImage>::from_request(req, &ctx.state).await.unwrap();
        let path = stored(&ctx.state.media, &form.media[0]);
        assert!(path.is_file());

        drop(form);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_remove_only_touches_stored_media() {
        let ctx = testing::context();
        let req = request(&[Part::file("profileImage", "me.jpg", "image/jpeg", b"jpg")]);
        let form = Form::<ProfileImage>::from_request(req, &ctx.state).await.unwrap();
        let path = stored(&ctx.state.media, &form.media[0]);
        form.guard.commit();

        let outside = ctx.state.media.directory().join("keep.txt");
        std::fs::write(&outside, b"keep").unwrap();

        ctx.state
            .media
            .remove(&[
                "/uploads/profile/../keep.txt".to_owned(),
                "/elsewhere/profile/keep.txt".to_owned(),
                "/uploads/profile/missing.png".to_owned(),
                form.media[0].clone(),
            ])
            .await;

        assert!(!path.exists());
        assert!(outside.is_file());
    }

    #[tokio::test]
    async fn test_rejected_files() {
        let ctx = testing::context();

        let req = request(&[Part::file("profileImage", "me.gif", "image/gif", b"gif")]);
        let err = Form::<ProfileImage>::from_request(req, &ctx.state)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ServerError::Validation(_)));

        let req = request(&[
            Part::file("profileImage", "a.png", "image/png", b"a"),
            Part::file("profileImage", "b.png", "image/png", b"b"),
        ]);
        let err = Form::<ProfileImage>::from_request(req, &ctx.state)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ServerError::Validation(_)));

        // the first file was stored before the second one was refused.
        let profile = ctx.state.media.directory().join(ProfileImage::DIRECTORY);
        let left = std::fs::read_dir(&profile)
            .map(|entries| entries.count())
            .unwrap_or_default();
        assert_eq!(left, 0);
    }

    #[tokio::test]
    async fn test_size_limit() {
        let mut config = testing::config();
        config.uploads.event_max_bytes = 8;
        let ctx = testing::context_with(config);

        let req = request(&[Part::file("media", "big.png", "image/png", &[0; 64])]);
        let err = Form::<EventMedia>::from_request(req, &ctx.state)
            .await
            .err()
            .unwrap();

        let ServerError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        assert!(errors.field_errors().contains_key("media"));

        let events = ctx.state.media.directory().join(EventMedia::DIRECTORY);
        assert_eq!(std::fs::read_dir(events).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_json_body() {
        let ctx = testing::context();
        let req = Request::builder()
            .method(Method::POST)
            .uri("/")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"userId":"65f1c2a9b3e4d5f6a7b8c9d0"}"#))
            .unwrap();

        let form = Form::<ProfileImage>::from_request(req, &ctx.state).await.unwrap();
        assert!(form.media.is_empty());
        assert!(form.payload.contains("userId"));
    }

    #[test]
    fn test_body_limit() {
        let uploads = Uploads::default();
        assert!(body_limit::<EventMedia>(&uploads) > uploads.event_max_bytes * 5);
        assert!(body_limit::<ProfileImage>(&uploads) > uploads.profile_max_bytes);
    }
}
