//! Send emails for account, role and contact updates.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use lapin::options::{BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::uri::{
    AMQPAuthority, AMQPQueryString, AMQPScheme, AMQPUri, AMQPUserInfo,
};
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, RecoveryConfig,
};
use rand::distributions::{Alphanumeric, DistString};
use rand::rngs::OsRng;
use serde::Serialize;
use serde_json::json;
use url::Url;

use crate::config::Mail;
use crate::contact::Contact;
use crate::error::ServerError;
use crate::role::{RoleRequest, Status};

const DEFAULT_AMPQ_HOST: &str = "localhost";
const DEFAULT_AMPQ_PORT: u16 = 5672;
const DEFAULT_AMPQ_VHOST: &str = "/";

const CONTENT_ENCODING: &str = "utf8";
const CONTENT_TYPE: &str = "application/cloudevents+json";
const DATA_CONTENT_TYPE: &str = "application/json";
const CLOUDEVENT_VERSION: &str = "1.0";
const ID_LENGTH: usize = 12;
/// Longest wait for the transport, kept below the request timeout.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

const SIGNATURE: &str = "Thank you,\nMatchday Team";

pub type Result<T> = std::result::Result<T, MailError>;

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("invalid rabbitmq address: {0}")]
    Address(#[from] url::ParseError),
    #[error("unsupported rabbitmq scheme `{0}`")]
    Scheme(String),
    #[error(transparent)]
    Amqp(#[from] lapin::Error),
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
    #[error("{0}")]
    Rejected(String),
    #[error("transport did not answer within {0:?}")]
    Timeout(Duration),
}

impl From<MailError> for ServerError {
    fn from(err: MailError) -> Self {
        ServerError::DeliveryFailed(Box::new(err))
    }
}

/// Maily templates list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    /// Email verification code.
    Otp,
    /// Password reset code.
    PasswordReset,
    /// Confirm a password change.
    PasswordChanged,
    /// Alert operations of a new role change request.
    RoleRequestSubmitted,
    /// Tell the requester the outcome of a role change request.
    RoleRequestResolved,
    /// Forward a contact form message to operations.
    ContactMessage,
}

impl Template {
    pub fn as_str(self) -> &'static str {
        match self {
            Template::Otp => "otp",
            Template::PasswordReset => "password_reset",
            Template::PasswordChanged => "password_changed",
            Template::RoleRequestSubmitted => "role_request_submitted",
            Template::RoleRequestResolved => "role_request_resolved",
            Template::ContactMessage => "contact_message",
        }
    }
}

/// A rendered email.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub template: Template,
    /// Template variables.
    pub data: serde_json::Value,
}

impl Notification {
    pub fn otp(to: &str, full_name: &str, code: &str) -> Self {
        Self {
            to: to.to_owned(),
            subject: "Your OTP for Account Verification".into(),
            body: format!(
                "Hello {full_name},\n\nYour OTP for account verification is: {code}\n\n\
                 Please enter this OTP to verify your account.\n\n{SIGNATURE}"
            ),
            template: Template::Otp,
            data: json!({ "fullName": full_name, "otp": code }),
        }
    }

    pub fn password_reset(to: &str, full_name: &str, token: &str) -> Self {
        Self {
            to: to.to_owned(),
            subject: "Password Reset Instructions".into(),
            body: format!(
                "Hello {full_name},\n\nYou requested a password reset. Please use the \
                 following code to reset your password:\n\n{token}\n\nThis code will \
                 expire in 1 hour. If you did not request this, please ignore this \
                 email and your password will remain unchanged.\n\n{SIGNATURE}"
            ),
            template: Template::PasswordReset,
            data: json!({ "fullName": full_name, "token": token }),
        }
    }

    pub fn password_changed(to: &str, full_name: &str) -> Self {
        Self {
            to: to.to_owned(),
            subject: "Password Reset Successful".into(),
            body: format!(
                "Hello {full_name},\n\nYour password has been successfully reset.\n\
                 If you did not request this change, please contact us \
                 immediately.\n\n{SIGNATURE}"
            ),
            template: Template::PasswordChanged,
            data: json!({ "fullName": full_name }),
        }
    }

    pub fn role_request_submitted(inbox: &str, request: &RoleRequest) -> Self {
        let details = &request.details;
        Self {
            to: inbox.to_owned(),
            subject: format!("New Role Change Request from {}", details.full_name),
            body: format!(
                "New Role Change Request\n\n\
                 Request ID: {}\nUser ID: {}\nRequested role: {}\nFull Name: {}\n\
                 Email: {}\nPhone Number 1: {}\nPhone Number 2: {}\n\
                 Organizer Type: {}\nCity: {}\nRegion: {}\nAddress: {}\n\
                 Sports: {}\nEvent Types: {}\nBank Name: {}\nAccount Number: {}\n\n\
                 Please review and approve or reject this request.",
                request.id,
                request.user_id,
                request.requested_role,
                details.full_name,
                details.email,
                details.phone_number1,
                details.phone_number2,
                details.organizer_type,
                details.city,
                details.region,
                details.address,
                details.sports.join(", "),
                details.event_types.join(", "),
                details.bank_name,
                details.account_number,
            ),
            template: Template::RoleRequestSubmitted,
            data: json!(request),
        }
    }

    pub fn role_request_resolved(request: &RoleRequest) -> Self {
        let outcome = match request.status {
            Status::Approved => "Approved",
            _ => "Rejected",
        };
        let follow_up = match request.status {
            Status::Approved => format!(
                "You can now access {} features.",
                request.requested_role
            ),
            _ => "Please contact support for more details.".to_owned(),
        };

        Self {
            to: request.details.email.clone(),
            subject: format!("Role Change Request {outcome}"),
            body: format!(
                "Hello {},\n\nYour request to change your role to {} has been {}.\n\
                 {follow_up}\n\n{SIGNATURE}",
                request.details.full_name,
                request.requested_role,
                outcome.to_lowercase(),
            ),
            template: Template::RoleRequestResolved,
            data: json!({
                "requestId": request.id,
                "fullName": request.details.full_name,
                "requestedRole": request.requested_role,
                "status": request.status,
            }),
        }
    }

    pub fn contact_message(inbox: &str, contact: &Contact) -> Self {
        Self {
            to: inbox.to_owned(),
            subject: format!("New Contact Form Submission from {}", contact.name),
            body: format!(
                "New Contact Form Submission\n\nName: {}\nPhone Number: {}\n\
                 City: {}\nMessage: {}",
                contact.name, contact.phone_number, contact.city, contact.message
            ),
            template: Template::ContactMessage,
            data: json!(contact),
        }
    }
}

/// Port for sending emails.
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    /// Hand `notification` over to the mail transport.
    async fn send(&self, notification: &Notification) -> Result<()>;

    /// Longest time [`deliver`] waits for [`NotificationGateway::send`].
    fn timeout(&self) -> Duration {
        DELIVERY_TIMEOUT
    }
}

/// Send `notification` and count the outcome.
pub async fn deliver(
    gateway: &dyn NotificationGateway,
    notification: &Notification,
) -> Result<()> {
    let timeout = gateway.timeout();
    let result = tokio::time::timeout(timeout, gateway.send(notification))
        .await
        .unwrap_or_else(|_| Err(MailError::Timeout(timeout)));
    let outcome = if result.is_ok() { "sent" } else { "failed" };

    metrics::counter!(
        "notifications_total",
        "template" => notification.template.as_str(),
        "outcome" => outcome,
    )
    .increment(1);

    match &result {
        Ok(()) => tracing::trace!(template = notification.template.as_str(), "event sent"),
        Err(err) => tracing::error!(
            template = notification.template.as_str(),
            %err,
            "failed to send event"
        ),
    }

    result
}

#[derive(Debug, Serialize)]
struct Cloudevent<'a> {
    specversion: &'static str,
    r#type: &'static str,
    source: &'static str,
    id: String,
    time: String,
    datacontenttype: &'static str,
    data: Content<'a>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    from: Option<&'a str>,
    #[serde(flatten)]
    notification: &'a Notification,
}

/// RabbitMQ-based gateway feeding the mail service.
pub struct RabbitMqGateway {
    queue: String,
    sender: Option<String>,
    conn: Arc<Connection>,
}

impl RabbitMqGateway {
    /// Create a new [`RabbitMqGateway`].
    pub async fn new(config: &Mail) -> Result<Self> {
        let addr = Url::parse(&config.address)?;
        let uri = AMQPUri {
            scheme: AMQPScheme::from_str(addr.scheme())
                .map_err(|_| MailError::Scheme(addr.scheme().to_owned()))?,
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: config.username.clone(),
                    password: config.password.clone(),
                },
                host: addr.host_str().unwrap_or(DEFAULT_AMPQ_HOST).into(),
                port: addr.port().unwrap_or(DEFAULT_AMPQ_PORT),
            },
            vhost: config
                .vhost
                .clone()
                .unwrap_or(DEFAULT_AMPQ_VHOST.to_string()),
            query: AMQPQueryString {
                channel_max: config.pool,
                ..Default::default()
            },
        };

        let recovery_config =
            RecoveryConfig::default().auto_recover_connection();
        let conn_config = ConnectionProperties::default()
            .with_connection_name("matchday_mail_client".into())
            .with_experimental_recovery_config(recovery_config);
        let conn = Connection::connect_uri(uri, conn_config).await?;

        tracing::info!(%addr, queue = %config.queue, "rabbitmq connected");

        Ok(Self {
            queue: config.queue.clone(),
            sender: config.sender.clone(),
            conn: Arc::new(conn),
        })
    }

    async fn create_channel(&self) -> Result<Channel> {
        let channel = self.conn.create_channel().await?;
        channel
            .queue_declare(
                &self.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(channel)
    }

    fn create_event(data: Content) -> Cloudevent {
        let id = Alphanumeric.sample_string(&mut OsRng, ID_LENGTH);
        Cloudevent {
            specversion: CLOUDEVENT_VERSION,
            r#type: "com.matchday.email",
            source: "com.matchday.api",
            id,
            time: Utc::now().to_rfc3339(),
            datacontenttype: DATA_CONTENT_TYPE,
            data,
        }
    }
}

#[async_trait]
impl NotificationGateway for RabbitMqGateway {
    async fn send(&self, notification: &Notification) -> Result<()> {
        let channel = self.create_channel().await?;

        let payload = Self::create_event(Content {
            from: self.sender.as_deref(),
            notification,
        });
        let payload = serde_json::to_vec(&payload)?;

        channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_content_encoding(CONTENT_ENCODING.into())
                    .with_content_type(CONTENT_TYPE.into()),
            )
            .await?;

        Ok(())
    }
}

/// Gateway used when no mail transport is configured.
#[derive(Debug, Default)]
pub struct LogGateway;

#[async_trait]
impl NotificationGateway for LogGateway {
    async fn send(&self, notification: &Notification) -> Result<()> {
        tracing::debug!(
            to = %notification.to,
            template = notification.template.as_str(),
            subject = %notification.subject,
            "mail transport not configured, notification logged"
        );
        Ok(())
    }
}

/// Gateway keeping every notification in memory.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingGateway {
    sent: std::sync::Mutex<Vec<Notification>>,
    failing: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl RecordingGateway {
    /// Make every following send fail, or succeed again.
    pub fn fail(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn last(&self, template: Template) -> Option<Notification> {
        self.sent()
            .into_iter()
            .rev()
            .find(|notification| notification.template == template)
    }
}

#[cfg(test)]
#[async_trait]
impl NotificationGateway for RecordingGateway {
    async fn send(&self, notification: &Notification) -> Result<()> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(MailError::Rejected("smtp unavailable".into()));
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Gateway whose transport never answers.
#[cfg(test)]
#[derive(Debug)]
pub struct StalledGateway {
    pub timeout: Duration,
}

#[cfg(test)]
#[async_trait]
impl NotificationGateway for StalledGateway {
    async fn send(&self, _notification: &Notification) -> Result<()> {
        std::future::pending::<Result<()>>().await
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cloudevent_shape() {
        let notification = Notification::otp("jo@x.com", "Jo", "123456");
        let event = RabbitMqGateway::create_event(Content {
            from: Some("noreply@matchday.example"),
            notification: &notification,
        });
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["specversion"], "1.0");
        assert_eq!(value["type"], "com.matchday.email");
        assert_eq!(value["data"]["to"], "jo@x.com");
        assert_eq!(value["data"]["from"], "noreply@matchday.example");
        assert_eq!(value["data"]["template"], "otp");
        assert_eq!(value["data"]["data"]["otp"], "123456");
        assert_eq!(value["id"].as_str().unwrap().len(), ID_LENGTH);
    }

    #[tokio::test]
    async fn test_deliver_reports_failures() {
        let gateway = RecordingGateway::default();
        let notification = Notification::password_changed("jo@x.com", "Jo");

        assert!(deliver(&gateway, &notification).await.is_ok());
        gateway.fail(true);
        assert!(deliver(&gateway, &notification).await.is_err());
        assert_eq!(gateway.sent(), vec![notification]);
    }

    #[tokio::test]
    async fn test_deliver_gives_up_on_stalled_transport() {
        let gateway = StalledGateway {
            timeout: Duration::from_millis(20),
        };
        let notification = Notification::password_changed("jo@x.com", "Jo");

        let err = deliver(&gateway, &notification).await.unwrap_err();
        assert!(matches!(err, MailError::Timeout(_)));
    }
}
