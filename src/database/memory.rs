//! In-memory document store.
//!
//! Every check-and-write runs under a single write lock, which gives the
//! same guarantees as the unique indexes of the PostgreSQL adapter.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::config::RoleRequestStorage;
use crate::contact::{Contact, ContactRepository};
use crate::error::{Result, ServerError};
use crate::event::{Event, EventRepository, EventUpdate};
use crate::role::{RoleRequest, RoleRequestStore, Status};
use crate::user::{ProfileUpdate, ResetToken, Role, User, UserRepository};

/// User document, optionally holding its role change requests.
#[derive(Debug, Clone)]
struct UserDocument {
    user: User,
    role_requests: Vec<RoleRequest>,
}

#[derive(Debug, Default)]
struct Documents {
    users: HashMap<String, UserDocument>,
    role_requests: Vec<RoleRequest>,
    events: Vec<Event>,
    contacts: Vec<Contact>,
}

impl Documents {
    fn user_mut(&mut self, id: &str) -> Option<&mut User> {
        self.users.get_mut(id).map(|document| &mut document.user)
    }

    fn email_taken(&self, email: &str, except: Option<&str>) -> bool {
        self.users.values().any(|document| {
            document.user.email == email && Some(document.user.id.as_str()) != except
        })
    }

    /// Role change requests of the active storage strategy.
    fn requests(&self, storage: RoleRequestStorage) -> Vec<&RoleRequest> {
        match storage {
            RoleRequestStorage::Standalone => self.role_requests.iter().collect(),
            RoleRequestStorage::Embedded => self
                .users
                .values()
                .flat_map(|document| document.role_requests.iter())
                .collect(),
        }
    }

    fn requests_mut(&mut self, storage: RoleRequestStorage) -> Vec<&mut RoleRequest> {
        match storage {
            RoleRequestStorage::Standalone => self.role_requests.iter_mut().collect(),
            RoleRequestStorage::Embedded => self
                .users
                .values_mut()
                .flat_map(|document| document.role_requests.iter_mut())
                .collect(),
        }
    }
}

/// Document store kept in process memory.
#[derive(Clone)]
pub struct MemoryStore {
    storage: RoleRequestStorage,
    documents: Arc<RwLock<Documents>>,
}

impl MemoryStore {
    /// Create a new empty [`MemoryStore`].
    pub fn new(storage: RoleRequestStorage) -> Self {
        Self {
            storage,
            documents: Arc::new(RwLock::new(Documents::default())),
        }
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn insert(&self, user: &User) -> Result<()> {
        let mut documents = self.documents.write().await;
        if documents.email_taken(&user.email, None) {
            return Err(ServerError::EmailTaken);
        }

        documents.users.insert(
            user.id.clone(),
            UserDocument {
                user: user.clone(),
                role_requests: Vec::new(),
            },
        );
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>> {
        let documents = self.documents.read().await;
        Ok(documents.users.get(id).map(|document| document.user.clone()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let documents = self.documents.read().await;
        Ok(documents
            .users
            .values()
            .find(|document| document.user.email == email)
            .map(|document| document.user.clone()))
    }

    async fn find_by_role(&self, role: Role) -> Result<Vec<User>> {
        let documents = self.documents.read().await;
        let mut users: Vec<User> = documents
            .users
            .values()
            .filter(|document| document.user.role == role)
            .map(|document| document.user.clone())
            .collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(users)
    }

    async fn update_profile(
        &self,
        id: &str,
        update: &ProfileUpdate,
    ) -> Result<Option<User>> {
        let mut documents = self.documents.write().await;
        if let Some(email) = &update.email {
            if documents.email_taken(email, Some(id)) {
                return Err(ServerError::EmailTaken);
            }
        }

        Ok(documents.user_mut(id).map(|user| {
            update.apply(user);
            user.clone()
        }))
    }

    async fn mark_verified(&self, id: &str) -> Result<bool> {
        let mut documents = self.documents.write().await;
        match documents.user_mut(id) {
            Some(user) if !user.is_verified => {
                user.is_verified = true;
                user.otp = None;
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn set_reset_token(&self, id: &str, reset: &ResetToken) -> Result<()> {
        let mut documents = self.documents.write().await;
        if let Some(user) = documents.user_mut(id) {
            user.reset = Some(reset.clone());
        }
        Ok(())
    }

    async fn consume_reset_token(
        &self,
        id: &str,
        token: &str,
        password: &str,
    ) -> Result<bool> {
        let mut documents = self.documents.write().await;
        match documents.user_mut(id) {
            Some(user)
                if user.reset.as_ref().is_some_and(|reset| reset.token == token) =>
            {
                user.password = password.to_owned();
                user.reset = None;
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.documents.write().await.users.remove(id);
        Ok(())
    }
}

#[async_trait]
impl RoleRequestStore for MemoryStore {
    async fn create(&self, request: &RoleRequest) -> Result<()> {
        let mut documents = self.documents.write().await;
        let pending = documents.requests(self.storage).into_iter().any(|stored| {
            stored.user_id == request.user_id && stored.status == Status::Pending
        });
        if pending {
            return Err(ServerError::DuplicatePending);
        }

        match self.storage {
            RoleRequestStorage::Standalone => documents.role_requests.push(request.clone()),
            RoleRequestStorage::Embedded => documents
                .users
                .get_mut(&request.user_id)
                .ok_or(ServerError::NotFound("user"))?
                .role_requests
                .push(request.clone()),
        }
        Ok(())
    }

    async fn find(&self, id: &str) -> Result<Option<RoleRequest>> {
        let documents = self.documents.read().await;
        Ok(documents
            .requests(self.storage)
            .into_iter()
            .find(|request| request.id == id)
            .cloned())
    }

    async fn find_pending(&self) -> Result<Vec<RoleRequest>> {
        let documents = self.documents.read().await;
        let mut pending: Vec<RoleRequest> = documents
            .requests(self.storage)
            .into_iter()
            .filter(|request| request.status == Status::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(pending)
    }

    async fn resolve(&self, request: &RoleRequest, status: Status) -> Result<bool> {
        let mut documents = self.documents.write().await;
        let Some(pending) = documents
            .requests(self.storage)
            .into_iter()
            .find(|stored| stored.id == request.id && stored.status == Status::Pending)
            .cloned()
        else {
            return Ok(false);
        };

        if status == Status::Approved {
            documents
                .user_mut(&pending.user_id)
                .ok_or(ServerError::NotFound("user"))?
                .role = pending.requested_role;
        }

        for stored in documents.requests_mut(self.storage) {
            if stored.id == pending.id {
                stored.status = status;
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl EventRepository for MemoryStore {
    async fn insert(&self, event: &Event) -> Result<()> {
        self.documents.write().await.events.push(event.clone());
        Ok(())
    }

    async fn find(&self, id: &str) -> Result<Option<Event>> {
        let documents = self.documents.read().await;
        Ok(documents.events.iter().find(|event| event.id == id).cloned())
    }

    async fn list(&self) -> Result<Vec<Event>> {
        let mut events = self.documents.read().await.events.clone();
        events.sort_by(|a, b| a.date.cmp(&b.date));
        Ok(events)
    }

    async fn find_by_organizer(
        &self,
        user_id: &str,
        search: Option<&str>,
    ) -> Result<Vec<Event>> {
        let mut events: Vec<Event> = self
            .documents
            .read()
            .await
            .events
            .iter()
            .filter(|event| event.user_id == user_id)
            .filter(|event| search.is_none_or(|search| event.matches(search)))
            .cloned()
            .collect();
        events.sort_by(|a, b| a.date.cmp(&b.date));
        Ok(events)
    }

    async fn update(&self, id: &str, update: &EventUpdate) -> Result<Option<Event>> {
        let mut documents = self.documents.write().await;
        Ok(documents
            .events
            .iter_mut()
            .find(|stored| stored.id == id)
            .map(|stored| {
                update.apply(stored);
                stored.clone()
            }))
    }

    async fn delete(&self, id: &str) -> Result<Option<Event>> {
        let mut documents = self.documents.write().await;
        Ok(documents
            .events
            .iter()
            .position(|event| event.id == id)
            .map(|index| documents.events.remove(index)))
    }
}

#[async_trait]
impl ContactRepository for MemoryStore {
    async fn insert(&self, contact: &Contact) -> Result<()> {
        self.documents.write().await.contacts.push(contact.clone());
        Ok(())
    }
}
