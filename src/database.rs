//! database (db) union structure.
mod memory;
mod postgres;

use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::postgres::PgPoolOptions;

use crate::AppState;
use crate::config::{self, RoleRequestStorage};
use crate::contact::ContactRepository;
use crate::event::EventRepository;
use crate::role::RoleRequestStore;
use crate::user::UserRepository;

pub const DEFAULT_CREDENTIALS: &str = "postgres";
pub const DEFAULT_DATABASE_NAME: &str = "matchday";
pub const DEFAULT_POOL_SIZE: u32 = 10;

/// Stores shared by every route.
#[derive(Clone)]
pub struct Database {
    pub users: Arc<dyn UserRepository>,
    pub role_requests: Arc<dyn RoleRequestStore>,
    pub events: Arc<dyn EventRepository>,
    pub contacts: Arc<dyn ContactRepository>,
}

impl Database {
    /// Connect to PostgreSQL and run pending migrations.
    pub async fn postgres(
        config: &config::Postgres,
        storage: RoleRequestStorage,
    ) -> Result<Self, sqlx::Error> {
        let username = config.username.as_deref().unwrap_or(DEFAULT_CREDENTIALS);
        let password = config.password.as_deref().unwrap_or(DEFAULT_CREDENTIALS);
        let db = config.database.as_deref().unwrap_or(DEFAULT_DATABASE_NAME);
        let hostname = &config.address;

        let addr = format!("postgres://{username}:{password}@{hostname}/{db}");
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size.unwrap_or(DEFAULT_POOL_SIZE))
            .connect(&addr)
            .await?;

        tracing::info!(%hostname, %db, "postgres connected");

        // execute migrations scripts on start.
        sqlx::migrate!().run(&pool).await?;

        let role_requests: Arc<dyn RoleRequestStore> = match storage {
            RoleRequestStorage::Standalone => {
                Arc::new(postgres::PgRoleRequestStore::new(pool.clone()))
            },
            RoleRequestStorage::Embedded => {
                Arc::new(postgres::PgEmbeddedRoleRequestStore::new(pool.clone()))
            },
        };

        Ok(Self {
            users: Arc::new(postgres::PgUserRepository::new(pool.clone())),
            role_requests,
            events: Arc::new(postgres::PgEventRepository::new(pool.clone())),
            contacts: Arc::new(postgres::PgContactRepository::new(pool)),
        })
    }

    /// Keep every document in process memory.
    pub fn memory(storage: RoleRequestStorage) -> Self {
        let store = memory::MemoryStore::new(storage);

        Self {
            users: Arc::new(store.clone()),
            role_requests: Arc::new(store.clone()),
            events: Arc::new(store.clone()),
            contacts: Arc::new(store),
        }
    }
}

impl FromRef<AppState> for Database {
    fn from_ref(app_state: &AppState) -> Database {
        app_state.db.clone()
    }
}
