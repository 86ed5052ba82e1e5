//! Contact form: stored once, forwarded to operations.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::clock::Clock;
use crate::error::Result;
use crate::mail::{Notification, NotificationGateway, deliver};
use crate::validation::{PhoneFormat, Payload, Rule, Ruleset, validate};

/// Contact message as saved on database.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub phone_number: String,
    pub city: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Port for contact message persistence.
#[async_trait]
pub trait ContactRepository: Send + Sync {
    async fn insert(&self, contact: &Contact) -> Result<()>;
}

/// Contact form manager.
#[derive(Clone)]
pub struct ContactService {
    repo: Arc<dyn ContactRepository>,
    mail: Arc<dyn NotificationGateway>,
    clock: Arc<dyn Clock>,
    inbox: String,
    phone: Option<PhoneFormat>,
}

impl FromRef<AppState> for ContactService {
    fn from_ref(state: &AppState) -> ContactService {
        ContactService {
            repo: Arc::clone(&state.db.contacts),
            mail: Arc::clone(&state.mail),
            clock: Arc::clone(&state.clock),
            inbox: state.config.operations_inbox.clone(),
            phone: state.config.validation.contact_form,
        }
    }
}

impl ContactService {
    /// Store a message and forward it to operations.
    ///
    /// A failed forward is reported but the message stays stored.
    pub async fn submit(&self, payload: &Payload) -> Result<Contact> {
        let mut phone = vec![Rule::Required];
        phone.extend(self.phone.map(Rule::Phone));

        let rules = Ruleset::new()
            .required("name")
            .field("phoneNumber", phone)
            .required("city")
            .required("message");
        validate(payload, &rules)?;

        let contact = Contact {
            id: crate::id::generate(self.clock.now()),
            name: payload.require("name")?,
            phone_number: payload.require("phoneNumber")?,
            city: payload.require("city")?,
            message: payload.require("message")?,
            created_at: self.clock.now(),
        };
        self.repo.insert(&contact).await?;

        deliver(
            self.mail.as_ref(),
            &Notification::contact_message(&self.inbox, &contact),
        )
        .await?;

        Ok(contact)
    }
}
