//! Role change requests: a player applies to become organizer or admin.
mod service;

pub use service::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::user::Role;
use crate::validation::vocabulary;

vocabulary! {
    /// Lifecycle of a [`RoleRequest`]. Approved and rejected are terminal.
    pub enum Status {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
    }
}

vocabulary! {
    /// Decision taken by an administrator.
    pub enum Action {
        Approve => "approve",
        Reject => "reject",
    }
}

vocabulary! {
    /// Legal form of an applicant.
    pub enum OrganizerType {
        Business => "Business/Club" ["business", "club"],
        Individual => "Individual Organizer" ["individual"],
    }
}

impl Action {
    /// Status reached once the action is applied.
    pub fn status(self) -> Status {
        match self {
            Action::Approve => Status::Approved,
            Action::Reject => Status::Rejected,
        }
    }
}

/// Contact and organizational details submitted by the applicant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Details {
    pub full_name: String,
    pub email: String,
    pub phone_number1: String,
    pub phone_number2: String,
    pub organizer_type: OrganizerType,
    pub city: String,
    pub region: String,
    pub address: String,
    pub sports: Vec<String>,
    pub event_types: Vec<String>,
    pub bank_name: String,
    pub account_number: String,
}

/// Role change request as saved on database.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleRequest {
    pub id: String,
    pub user_id: String,
    pub requested_role: Role,
    pub status: Status,
    #[serde(flatten)]
    pub details: Details,
    pub created_at: DateTime<Utc>,
}

/// Port for role request persistence.
///
/// Implemented both as a standalone collection and as a list embedded in
/// user documents.
#[async_trait]
pub trait RoleRequestStore: Send + Sync {
    /// Save a pending request.
    ///
    /// Fails with `DuplicatePending` when the user already has one.
    async fn create(&self, request: &RoleRequest) -> Result<()>;

    /// Find a request using its identifier.
    async fn find(&self, id: &str) -> Result<Option<RoleRequest>>;

    /// List every pending request, oldest first.
    async fn find_pending(&self) -> Result<Vec<RoleRequest>>;

    /// Move a pending request to `status`.
    ///
    /// An approval grants the requested role to the requester in the same
    /// atomic write, so the user role and the request status never
    /// disagree. Returns `false` when the request is missing or no longer
    /// pending, and fails with `NotFound` when the requester is gone.
    async fn resolve(&self, request: &RoleRequest, status: Status) -> Result<bool>;
}
