//! Configuration manager for matchday.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::AppState;
use crate::validation::PhoneFormat;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const DEFAULT_OPERATIONS_INBOX: &str = "operations@localhost";
const VERSION: &str = env!("CARGO_PKG_VERSION");

const MIB: usize = 1024 * 1024;

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    /// Domain name of current instance.
    pub url: String,
    favicon: Option<String>,
    #[serde(default)]
    version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Mailbox receiving role requests and contact messages.
    #[serde(default = "default_operations_inbox", skip_serializing)]
    pub operations_inbox: String,
    /// Related to PostgreSQL configuration.
    #[serde(skip_serializing)]
    pub postgres: Option<Postgres>,
    /// Related to Argon2 configuration.
    #[serde(skip_serializing)]
    pub argon2: Option<Argon2>,
    /// Related to automatic mail sending.
    #[serde(skip_serializing)]
    pub mail: Option<Mail>,
    /// Related to uploaded media.
    #[serde(default, skip_serializing)]
    pub uploads: Uploads,
    /// Business rules which differ between deployments.
    #[serde(default, skip_serializing)]
    pub policy: Policy,
    /// Format checks which differ between call sites.
    #[serde(default, skip_serializing)]
    pub validation: Validation,
}

fn default_operations_inbox() -> String {
    DEFAULT_OPERATIONS_INBOX.to_owned()
}

/// PostgreSQL configuration.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Postgres {
    /// Hostname:(?port) for PostgreSQL instance.
    pub address: String,
    /// Database name.
    pub database: Option<String>,
    /// Username credential to connect.
    pub username: Option<String>,
    /// Password credential to connect.
    pub password: Option<String>,
    /// Maximum pool connections.
    pub pool_size: Option<u32>,
}

/// Argon2 configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Argon2 {
    /// Memory used while hashing.
    pub memory_cost: u32,
    /// Iterations of hash.
    pub iterations: u32,
    /// Parallelism degree.
    pub parallelism: u32,
    /// Output hash length.
    pub hash_length: usize,
}

impl Default for Argon2 {
    fn default() -> Self {
        Self {
            memory_cost: 1024 * 64, // 64 MiB.
            iterations: 4,
            parallelism: 2,
            hash_length: 32,
        }
    }
}

/// RabbitMQ transport towards the mail service.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mail {
    /// Hostname:(?port) for RabbitMQ instance.
    pub address: String,
    /// RabbitMQ default vhost.
    pub vhost: Option<String>,
    /// RabbitMQ username to access queue.
    pub username: String,
    /// RabbitMQ password to access queue.
    pub password: String,
    /// Max channel connections.
    pub pool: Option<u16>,
    /// Queue name to send mailing events.
    pub queue: String,
    /// `From` address of outgoing mails.
    pub sender: Option<String>,
}

/// Uploaded files configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Uploads {
    /// Directory holding stored files.
    pub directory: PathBuf,
    /// Prefix of the references handed back to clients.
    pub public_prefix: String,
    /// Maximum size of a profile image.
    pub profile_max_bytes: usize,
    /// Maximum size of a single event media file.
    pub event_max_bytes: usize,
    /// Maximum media files attached per request.
    pub event_max_files: usize,
}

impl Default for Uploads {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("uploads"),
            public_prefix: "/uploads".into(),
            profile_max_bytes: 5 * MIB,
            event_max_bytes: 50 * MIB,
            event_max_files: 5,
        }
    }
}

/// Where role change requests are persisted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleRequestStorage {
    /// Dedicated collection referencing the user.
    #[default]
    Standalone,
    /// Sub-list embedded in the user document.
    Embedded,
}

/// Deployment toggles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    pub role_requests: RoleRequestStorage,
    /// Reject role change requests from accounts without a verified email.
    pub role_change_requires_verification: bool,
    /// Only the owning organizer may delete an event.
    pub delete_requires_owner: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            role_requests: RoleRequestStorage::Standalone,
            role_change_requires_verification: true,
            delete_requires_owner: true,
        }
    }
}

/// Phone number format enforced per call site. `None` disables the check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Validation {
    pub event_contact: Option<PhoneFormat>,
    pub role_request: Option<PhoneFormat>,
    pub contact_form: Option<PhoneFormat>,
}

impl Default for Validation {
    fn default() -> Self {
        Self {
            event_contact: Some(PhoneFormat::Digits),
            role_request: Some(PhoneFormat::Digits),
            contact_form: None,
        }
    }
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Instance favicon.
    pub fn favicon(&self) -> Option<&str> {
        self.favicon.as_deref()
    }

    /// Running version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Normalizes a URL string by ensuring it starts with a valid scheme
    /// (`http` or `https`).
    fn normalize_url(&self, url: &str) -> Result<String, url::ParseError> {
        let url_with_scheme =
            if url.starts_with("http://") || url.starts_with("https://") {
                url.to_string()
            } else {
                format!("https://{url}")
            };

        let parsed_url = Url::parse(&url_with_scheme)?;
        Ok(parsed_url.to_string())
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location.
    pub fn read(self) -> Result<Arc<Self>, url::ParseError> {
        let file_path = if self.path.is_file() {
            &self.path
        } else {
            &Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        match File::open(file_path) {
            Ok(file) => {
                let mut config: Configuration =
                    match serde_yaml::from_reader(file) {
                        Ok(config) => config,
                        Err(err) => {
                            return Ok(Arc::new(self.error(err)));
                        },
                    };

                // set app version.
                config.version = VERSION.to_owned();

                // normalize URLs.
                if !config.url.is_empty() {
                    config.url = self.normalize_url(&config.url)?;
                }
                config.favicon = config
                    .favicon
                    .map(|f| self.normalize_url(&f))
                    .transpose()?;

                Ok(Arc::new(config))
            },
            Err(err) => Ok(Arc::new(self.error(err))),
        }
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "`config.yaml` file not found");
        Self {
            version: VERSION.to_owned(),
            operations_inbox: default_operations_inbox(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_read_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
name: matchday
url: matchday.example
policy:
  role_requests: embedded
  delete_requires_owner: false
validation:
  event_contact: grouped
uploads:
  directory: /var/lib/matchday
"#
        )
        .unwrap();

        let config = Configuration::default()
            .path(file.path().to_path_buf())
            .read()
            .unwrap();

        assert_eq!(config.name, "matchday");
        assert_eq!(config.url, "https://matchday.example/");
        assert_eq!(config.version(), VERSION);
        assert_eq!(config.operations_inbox, DEFAULT_OPERATIONS_INBOX);
        assert_eq!(config.policy.role_requests, RoleRequestStorage::Embedded);
        assert!(config.policy.role_change_requires_verification);
        assert!(!config.policy.delete_requires_owner);
        assert_eq!(config.validation.event_contact, Some(PhoneFormat::Grouped));
        assert_eq!(config.validation.role_request, Some(PhoneFormat::Digits));
        assert_eq!(config.uploads.directory, PathBuf::from("/var/lib/matchday"));
        assert_eq!(config.uploads.event_max_files, 5);
        assert!(config.postgres.is_none());
    }
}
