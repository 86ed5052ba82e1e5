use std::sync::Arc;

use axum::extract::FromRef;

use crate::AppState;
use crate::clock::Clock;
use crate::error::{Result, ServerError};
use crate::mail::{Notification, NotificationGateway, deliver};
use crate::role::{Action, Details, OrganizerType, RoleRequest, RoleRequestStore, Status};
use crate::user::{Role, UserRepository};
use crate::validation::{Payload, PhoneFormat, Rule, Ruleset, Vocabulary, validate};

/// Role change request manager.
#[derive(Clone)]
pub struct RoleService {
    store: Arc<dyn RoleRequestStore>,
    users: Arc<dyn UserRepository>,
    mail: Arc<dyn NotificationGateway>,
    clock: Arc<dyn Clock>,
    inbox: String,
    phone: Option<PhoneFormat>,
    requires_verification: bool,
}

impl FromRef<AppState> for RoleService {
    fn from_ref(state: &AppState) -> RoleService {
        RoleService {
            store: Arc::clone(&state.db.role_requests),
            users: Arc::clone(&state.db.users),
            mail: Arc::clone(&state.mail),
            clock: Arc::clone(&state.clock),
            inbox: state.config.operations_inbox.clone(),
            phone: state.config.validation.role_request,
            requires_verification: state.config.policy.role_change_requires_verification,
        }
    }
}

impl RoleService {
    fn rules(&self) -> Ruleset {
        let phone = || {
            let mut rules = vec![Rule::Required];
            rules.extend(self.phone.map(Rule::Phone));
            rules
        };

        Ruleset::new()
            .field("userId", [Rule::Required, Rule::ObjectId])
            .required("fullName")
            .field("email", [Rule::Required, Rule::Email])
            .field("phoneNumber1", phone())
            .field("phoneNumber2", phone())
            .field(
                "organizerType",
                [Rule::Required, Rule::one_of::<OrganizerType>()],
            )
            .required("city")
            .required("region")
            .required("address")
            .field("sports", [Rule::Required, Rule::List])
            .field("eventTypes", [Rule::Required, Rule::List])
            .required("bankName")
            .required("accountNumber")
            .field("requestedRole", [Rule::one_of::<Role>()])
    }

    /// Record a pending request and alert operations.
    pub async fn submit(&self, payload: &Payload) -> Result<RoleRequest> {
        validate(payload, &self.rules())?;

        let requested_role = payload
            .vocabulary::<Role>("requestedRole")
            .unwrap_or(Role::Organizer);
        if requested_role == Role::Player {
            return Err(ServerError::field(
                "requestedRole",
                "enum",
                format!(
                    "'{requested_role}' is not a valid requestedRole; expected one of: {}, {}",
                    Role::Organizer.label(),
                    Role::Admin.label()
                ),
            ));
        }

        let user = self
            .users
            .find_by_id(&payload.require("userId")?.to_lowercase())
            .await?
            .ok_or(ServerError::NotFound("user"))?;
        if self.requires_verification && !user.is_verified {
            return Err(ServerError::NotVerified);
        }

        let details = Details {
            full_name: payload.require("fullName")?,
            email: payload.require("email")?,
            phone_number1: payload.require("phoneNumber1")?,
            phone_number2: payload.require("phoneNumber2")?,
            organizer_type: payload
                .vocabulary("organizerType")
                .ok_or_else(|| {
                    ServerError::field("organizerType", "enum", "organizerType is invalid")
                })?,
            city: payload.require("city")?,
            region: payload.require("region")?,
            address: payload.require("address")?,
            sports: payload.list("sports").unwrap_or_default(),
            event_types: payload.list("eventTypes").unwrap_or_default(),
            bank_name: payload.require("bankName")?,
            account_number: payload.require("accountNumber")?,
        };

        let now = self.clock.now();
        let request = RoleRequest {
            id: crate::id::generate(now),
            user_id: user.id,
            requested_role,
            status: Status::Pending,
            details,
            created_at: now,
        };

        self.store.create(&request).await?;
        metrics::counter!("role_requests_total", "status" => Status::Pending.label())
            .increment(1);
        tracing::info!(
            request_id = %request.id,
            user_id = %request.user_id,
            role = %request.requested_role,
            "role change requested"
        );

        deliver(
            self.mail.as_ref(),
            &Notification::role_request_submitted(&self.inbox, &request),
        )
        .await?;

        Ok(request)
    }

    /// Pending requests, only visible to administrators.
    pub async fn list_pending(&self, payload: &Payload) -> Result<Vec<RoleRequest>> {
        validate(
            payload,
            &Ruleset::new().field("userId", [Rule::Required, Rule::ObjectId]),
        )?;

        let requester = self
            .users
            .find_by_id(&payload.require("userId")?.to_lowercase())
            .await?
            .ok_or(ServerError::NotFound("user"))?;
        if requester.role != Role::Admin {
            return Err(ServerError::Forbidden(
                "Only administrators can view role requests",
            ));
        }

        self.store.find_pending().await
    }

    /// Approve or reject a pending request and tell the requester.
    ///
    /// On approval the role is granted by the write that closes the request.
    pub async fn resolve(&self, payload: &Payload) -> Result<RoleRequest> {
        let rules = Ruleset::new()
            .field("requestId", [Rule::Required, Rule::ObjectId])
            .field("action", [Rule::Required, Rule::one_of::<Action>()]);
        validate(payload, &rules)?;

        let action: Action = payload.vocabulary("action").ok_or_else(|| {
            ServerError::field("action", "enum", "action must be approve or reject")
        })?;
        let request = self
            .store
            .find(&payload.require("requestId")?.to_lowercase())
            .await?
            .ok_or(ServerError::NotFound("role request"))?;
        if request.status != Status::Pending {
            return Err(ServerError::AlreadyResolved);
        }

        let status = action.status();
        if !self.store.resolve(&request, status).await? {
            return Err(ServerError::AlreadyResolved);
        }

        metrics::counter!("role_requests_total", "status" => status.label()).increment(1);
        tracing::info!(request_id = %request.id, %status, "role change request resolved");

        let resolved = RoleRequest { status, ..request };
        deliver(
            self.mail.as_ref(),
            &Notification::role_request_resolved(&resolved),
        )
        .await?;

        Ok(resolved)
    }
}
