//! PostgreSQL adapters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};

use crate::contact::{Contact, ContactRepository};
use crate::error::{Result, ServerError};
use crate::event::{Event, EventRepository, EventUpdate};
use crate::role::{Details, RoleRequest, RoleRequestStore, Status};
use crate::user::{ProfileUpdate, ResetToken, Role, User, UserRepository};
use crate::validation::Vocabulary;

const EMAIL_INDEX: &str = "users_email_idx";
const PENDING_INDEX: &str = "role_requests_one_pending_idx";

const USER_COLUMNS: &str = r#"
    id, full_name, email, password, phone_number, location, country,
    gender, age, description, profile_image, role, otp, is_verified,
    reset_token, reset_expires, created_at
"#;

const EVENT_COLUMNS: &str = r#"
    id, user_id, event_title, description, date, time, location, country,
    city, sport, organizer_name, organizer_gender, contact_number1,
    contact_number2, team_size_limit, max_players_per_team, category, type,
    registration_limit, player_gender, age, registration_fee,
    event_fee_method, rules, features, media, participants, is_completed,
    created_at
"#;

/// Parse a stored vocabulary label.
fn decode<T: Vocabulary>(column: &str, value: &str) -> Result<T> {
    T::parse(value).ok_or_else(|| ServerError::Internal {
        details: format!("unknown {column} `{value}` stored in database"),
        source: None,
    })
}

/// Turn a violation of `index` into `conflict`.
fn unique(err: sqlx::Error, index: &str, conflict: ServerError) -> ServerError {
    let violated = err
        .as_database_error()
        .is_some_and(|db| db.is_unique_violation() && db.constraint() == Some(index));

    if violated { conflict } else { err.into() }
}

/// User record as stored in the database.
#[derive(Debug, Clone, FromRow)]
struct UserRecord {
    id: String,
    full_name: String,
    email: String,
    password: String,
    phone_number: Option<String>,
    location: String,
    country: String,
    gender: Option<String>,
    age: Option<i32>,
    description: String,
    profile_image: Option<String>,
    role: String,
    otp: Option<String>,
    is_verified: bool,
    reset_token: Option<String>,
    reset_expires: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl UserRecord {
    fn try_into_user(self) -> Result<User> {
        let reset = match (self.reset_token, self.reset_expires) {
            (Some(token), Some(expires_at)) => Some(ResetToken { token, expires_at }),
            _ => None,
        };

        Ok(User {
            gender: self
                .gender
                .as_deref()
                .map(|gender| decode("gender", gender))
                .transpose()?,
            role: decode("role", &self.role)?,
            id: self.id,
            full_name: self.full_name,
            email: self.email,
            password: self.password,
            phone_number: self.phone_number,
            location: self.location,
            country: self.country,
            age: self.age,
            description: self.description,
            profile_image: self.profile_image,
            otp: self.otp,
            is_verified: self.is_verified,
            reset,
            created_at: self.created_at,
        })
    }
}

/// PostgreSQL user repository.
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    /// Create a new [`PgUserRepository`].
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_one(&self, filter: &str, value: &str) -> Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE {filter} = $1");
        sqlx::query_as::<_, UserRecord>(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?
            .map(UserRecord::try_into_user)
            .transpose()
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn insert(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (
                id, full_name, email, password, phone_number, location,
                country, gender, age, description, profile_image, role, otp,
                is_verified, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(&user.id)
        .bind(&user.full_name)
        .bind(&user.email)
        .bind(&user.password)
        .bind(&user.phone_number)
        .bind(&user.location)
        .bind(&user.country)
        .bind(user.gender.map(Vocabulary::label))
        .bind(user.age)
        .bind(&user.description)
        .bind(&user.profile_image)
        .bind(user.role.label())
        .bind(&user.otp)
        .bind(user.is_verified)
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(|err| unique(err, EMAIL_INDEX, ServerError::EmailTaken))?;

        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>> {
        self.find_one("id", id).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        self.find_one("lower(email)", &email.to_lowercase()).await
    }

    async fn find_by_role(&self, role: Role) -> Result<Vec<User>> {
        let query =
            format!("SELECT {USER_COLUMNS} FROM users WHERE role = $1 ORDER BY created_at, id");
        sqlx::query_as::<_, UserRecord>(&query)
            .bind(role.label())
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(UserRecord::try_into_user)
            .collect()
    }

    async fn update_profile(
        &self,
        id: &str,
        update: &ProfileUpdate,
    ) -> Result<Option<User>> {
        let query = format!(
            r#"
            UPDATE users
            SET
                full_name = COALESCE($2, full_name),
                email = COALESCE($3, email),
                phone_number = COALESCE($4, phone_number),
                location = COALESCE($5, location),
                country = COALESCE($6, country),
                gender = COALESCE($7, gender),
                age = COALESCE($8, age),
                description = COALESCE($9, description),
                profile_image = COALESCE($10, profile_image)
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );

        sqlx::query_as::<_, UserRecord>(&query)
            .bind(id)
            .bind(&update.full_name)
            .bind(&update.email)
            .bind(&update.phone_number)
            .bind(&update.location)
            .bind(&update.country)
            .bind(update.gender.map(Vocabulary::label))
            .bind(update.age)
            .bind(&update.description)
            .bind(&update.profile_image)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| unique(err, EMAIL_INDEX, ServerError::EmailTaken))?
            .map(UserRecord::try_into_user)
            .transpose()
    }

    async fn mark_verified(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET is_verified = TRUE, otp = NULL
            WHERE id = $1 AND NOT is_verified
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_reset_token(&self, id: &str, reset: &ResetToken) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET reset_token = $2, reset_expires = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&reset.token)
        .bind(reset.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn consume_reset_token(
        &self,
        id: &str,
        token: &str,
        password: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET password = $3, reset_token = NULL, reset_expires = NULL
            WHERE id = $1 AND reset_token = $2
            "#,
        )
        .bind(id)
        .bind(token)
        .bind(password)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

/// Role change request record as stored in its own table.
#[derive(Debug, Clone, FromRow)]
struct RoleRequestRecord {
    id: String,
    user_id: String,
    requested_role: String,
    status: String,
    #[sqlx(json)]
    details: Details,
    created_at: DateTime<Utc>,
}

impl RoleRequestRecord {
    fn try_into_request(self) -> Result<RoleRequest> {
        Ok(RoleRequest {
            requested_role: decode("requested_role", &self.requested_role)?,
            status: decode("status", &self.status)?,
            id: self.id,
            user_id: self.user_id,
            details: self.details,
            created_at: self.created_at,
        })
    }
}

/// Role change requests kept in the `role_requests` table.
pub struct PgRoleRequestStore {
    pool: PgPool,
}

impl PgRoleRequestStore {
    /// Create a new [`PgRoleRequestStore`].
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoleRequestStore for PgRoleRequestStore {
    async fn create(&self, request: &RoleRequest) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO role_requests (
                id, user_id, requested_role, status, details, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&request.id)
        .bind(&request.user_id)
        .bind(request.requested_role.label())
        .bind(request.status.label())
        .bind(Json(&request.details))
        .bind(request.created_at)
        .execute(&self.pool)
        .await
        .map_err(|err| unique(err, PENDING_INDEX, ServerError::DuplicatePending))?;

        Ok(())
    }

    async fn find(&self, id: &str) -> Result<Option<RoleRequest>> {
        sqlx::query_as::<_, RoleRequestRecord>(
            r#"
            SELECT id, user_id, requested_role, status, details, created_at
            FROM role_requests
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(RoleRequestRecord::try_into_request)
        .transpose()
    }

    async fn find_pending(&self) -> Result<Vec<RoleRequest>> {
        sqlx::query_as::<_, RoleRequestRecord>(
            r#"
            SELECT id, user_id, requested_role, status, details, created_at
            FROM role_requests
            WHERE status = 'pending'
            ORDER BY created_at, id
            "#,
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(RoleRequestRecord::try_into_request)
        .collect()
    }

    async fn resolve(&self, request: &RoleRequest, status: Status) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        // concurrent decisions wait here, then see the request closed.
        let pending: Option<(String, String)> = sqlx::query_as(
            r#"
            SELECT user_id, requested_role
            FROM role_requests
            WHERE id = $1 AND status = 'pending'
            FOR UPDATE
            "#,
        )
        .bind(&request.id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((user_id, requested_role)) = pending else {
            return Ok(false);
        };

        if status == Status::Approved {
            let role: Role = decode("requested_role", &requested_role)?;
            let granted = sqlx::query("UPDATE users SET role = $2 WHERE id = $1")
                .bind(&user_id)
                .bind(role.label())
                .execute(&mut *tx)
                .await?;

            if granted.rows_affected() != 1 {
                return Err(ServerError::NotFound("user"));
            }
        }

        sqlx::query("UPDATE role_requests SET status = $2 WHERE id = $1")
            .bind(&request.id)
            .bind(status.label())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }
}

/// Role change requests embedded in the `users.role_requests` JSONB list.
pub struct PgEmbeddedRoleRequestStore {
    pool: PgPool,
}

impl PgEmbeddedRoleRequestStore {
    /// Create a new [`PgEmbeddedRoleRequestStore`].
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoleRequestStore for PgEmbeddedRoleRequestStore {
    async fn create(&self, request: &RoleRequest) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET role_requests = role_requests || jsonb_build_array($2::jsonb)
            WHERE id = $1 AND NOT role_requests @> '[{"status": "pending"}]'
            "#,
        )
        .bind(&request.user_id)
        .bind(Json(request))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
                .bind(&request.user_id)
                .fetch_one(&self.pool)
                .await?;

        if exists {
            Err(ServerError::DuplicatePending)
        } else {
            Err(ServerError::NotFound("user"))
        }
    }

    async fn find(&self, id: &str) -> Result<Option<RoleRequest>> {
        let request: Option<(Json<RoleRequest>,)> = sqlx::query_as(
            r#"
            SELECT request
            FROM users, jsonb_array_elements(users.role_requests) AS request
            WHERE request->>'id' = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(request.map(|(Json(request),)| request))
    }

    async fn find_pending(&self) -> Result<Vec<RoleRequest>> {
        let requests: Vec<(Json<RoleRequest>,)> = sqlx::query_as(
            r#"
            SELECT request
            FROM users, jsonb_array_elements(users.role_requests) AS request
            WHERE request->>'status' = 'pending'
            ORDER BY (request->>'createdAt')::timestamptz, request->>'id'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(requests.into_iter().map(|(Json(request),)| request).collect())
    }

    async fn resolve(&self, request: &RoleRequest, status: Status) -> Result<bool> {
        // role and request live in the same row, one statement covers both.
        let result = sqlx::query(
            r#"
            UPDATE users
            SET role = CASE WHEN $2::text = 'approved' THEN $3 ELSE role END,
            role_requests = (
                SELECT jsonb_agg(
                    CASE WHEN element.request->>'id' = $1
                        THEN jsonb_set(element.request, '{status}', to_jsonb($2::text))
                        ELSE element.request
                    END
                    ORDER BY element.position
                )
                FROM jsonb_array_elements(users.role_requests)
                    WITH ORDINALITY AS element(request, position)
            )
            WHERE role_requests @> jsonb_build_array(
                jsonb_build_object('id', $1::text, 'status', 'pending')
            )
            "#,
        )
        .bind(&request.id)
        .bind(status.label())
        .bind(request.requested_role.label())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

/// Event record as stored in the database.
#[derive(Debug, Clone, FromRow)]
struct EventRecord {
    id: String,
    user_id: String,
    event_title: String,
    description: String,
    date: DateTime<Utc>,
    time: String,
    location: String,
    country: String,
    city: String,
    sport: String,
    organizer_name: String,
    organizer_gender: String,
    contact_number1: String,
    contact_number2: Option<String>,
    team_size_limit: i32,
    max_players_per_team: i32,
    category: String,
    #[sqlx(rename = "type")]
    kind: String,
    registration_limit: i32,
    player_gender: String,
    age: i32,
    registration_fee: f64,
    event_fee_method: String,
    rules: Vec<String>,
    features: Vec<String>,
    media: Vec<String>,
    participants: Vec<String>,
    is_completed: bool,
    created_at: DateTime<Utc>,
}

impl EventRecord {
    fn try_into_event(self) -> Result<Event> {
        Ok(Event {
            sport: decode("sport", &self.sport)?,
            organizer_gender: decode("organizer_gender", &self.organizer_gender)?,
            category: decode("category", &self.category)?,
            r#type: decode("type", &self.kind)?,
            player_gender: decode("player_gender", &self.player_gender)?,
            event_fee_method: decode("event_fee_method", &self.event_fee_method)?,
            id: self.id,
            user_id: self.user_id,
            event_title: self.event_title,
            description: self.description,
            date: self.date,
            time: self.time,
            location: self.location,
            country: self.country,
            city: self.city,
            organizer_name: self.organizer_name,
            contact_number1: self.contact_number1,
            contact_number2: self.contact_number2,
            team_size_limit: self.team_size_limit,
            max_players_per_team: self.max_players_per_team,
            registration_limit: self.registration_limit,
            age: self.age,
            registration_fee: self.registration_fee,
            rules: self.rules,
            features: self.features,
            media: self.media,
            participants: self.participants,
            is_completed: self.is_completed,
            created_at: self.created_at,
        })
    }
}

/// PostgreSQL event repository.
pub struct PgEventRepository {
    pool: PgPool,
}

impl PgEventRepository {
    /// Create a new [`PgEventRepository`].
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventRepository for PgEventRepository {
    async fn insert(&self, event: &Event) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO events (
                id, user_id, event_title, description, date, time, location,
                country, city, sport, organizer_name, organizer_gender,
                contact_number1, contact_number2, team_size_limit,
                max_players_per_team, category, type, registration_limit,
                player_gender, age, registration_fee, event_fee_method, rules,
                features, media, participants, is_completed, created_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26,
                $27, $28, $29
            )
            "#,
        )
        .bind(&event.id)
        .bind(&event.user_id)
        .bind(&event.event_title)
        .bind(&event.description)
        .bind(event.date)
        .bind(&event.time)
        .bind(&event.location)
        .bind(&event.country)
        .bind(&event.city)
        .bind(event.sport.label())
        .bind(&event.organizer_name)
        .bind(event.organizer_gender.label())
        .bind(&event.contact_number1)
        .bind(&event.contact_number2)
        .bind(event.team_size_limit)
        .bind(event.max_players_per_team)
        .bind(event.category.label())
        .bind(event.r#type.label())
        .bind(event.registration_limit)
        .bind(event.player_gender.label())
        .bind(event.age)
        .bind(event.registration_fee)
        .bind(event.event_fee_method.label())
        .bind(&event.rules)
        .bind(&event.features)
        .bind(&event.media)
        .bind(&event.participants)
        .bind(event.is_completed)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(&self, id: &str) -> Result<Option<Event>> {
        let query = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1");
        sqlx::query_as::<_, EventRecord>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(EventRecord::try_into_event)
            .transpose()
    }

    async fn list(&self) -> Result<Vec<Event>> {
        let query = format!("SELECT {EVENT_COLUMNS} FROM events ORDER BY date, id");
        sqlx::query_as::<_, EventRecord>(&query)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(EventRecord::try_into_event)
            .collect()
    }

    async fn find_by_organizer(
        &self,
        user_id: &str,
        search: Option<&str>,
    ) -> Result<Vec<Event>> {
        let query = format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE user_id = $1 AND (
                $2::text IS NULL
                OR position(lower($2) in lower(event_title)) > 0
                OR position(lower($2) in lower(description)) > 0
                OR position(lower($2) in lower(location)) > 0
            )
            ORDER BY date, id
            "#
        );

        sqlx::query_as::<_, EventRecord>(&query)
            .bind(user_id)
            .bind(search)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(EventRecord::try_into_event)
            .collect()
    }

    async fn update(&self, id: &str, update: &EventUpdate) -> Result<Option<Event>> {
        let query = format!(
            r#"
            UPDATE events
            SET
                event_title = COALESCE($2, event_title),
                description = COALESCE($3, description),
                date = COALESCE($4, date),
                time = COALESCE($5, time),
                location = COALESCE($6, location),
                country = COALESCE($7, country),
                city = COALESCE($8, city),
                sport = COALESCE($9, sport),
                organizer_name = COALESCE($10, organizer_name),
                organizer_gender = COALESCE($11, organizer_gender),
                contact_number1 = COALESCE($12, contact_number1),
                contact_number2 = CASE WHEN $13 THEN $14 ELSE contact_number2 END,
                team_size_limit = COALESCE($15, team_size_limit),
                max_players_per_team = COALESCE($16, max_players_per_team),
                category = COALESCE($17, category),
                type = COALESCE($18, type),
                registration_limit = COALESCE($19, registration_limit),
                player_gender = COALESCE($20, player_gender),
                age = COALESCE($21, age),
                registration_fee = COALESCE($22, registration_fee),
                event_fee_method = COALESCE($23, event_fee_method),
                rules = COALESCE($24, rules),
                features = COALESCE($25, features),
                media = media || $26
            WHERE id = $1
            RETURNING {EVENT_COLUMNS}
            "#
        );

        let (date, time) = update.schedule.clone().unzip();

        sqlx::query_as::<_, EventRecord>(&query)
            .bind(id)
            .bind(&update.event_title)
            .bind(&update.description)
            .bind(date)
            .bind(time)
            .bind(&update.location)
            .bind(&update.country)
            .bind(&update.city)
            .bind(update.sport.map(Vocabulary::label))
            .bind(&update.organizer_name)
            .bind(update.organizer_gender.map(Vocabulary::label))
            .bind(&update.contact_number1)
            .bind(update.contact_number2.is_some())
            .bind(update.contact_number2.clone().flatten())
            .bind(update.team_size_limit)
            .bind(update.max_players_per_team)
            .bind(update.category.map(Vocabulary::label))
            .bind(update.r#type.map(Vocabulary::label))
            .bind(update.registration_limit)
            .bind(update.player_gender.map(Vocabulary::label))
            .bind(update.age)
            .bind(update.registration_fee)
            .bind(update.event_fee_method.map(Vocabulary::label))
            .bind(&update.rules)
            .bind(&update.features)
            .bind(&update.media)
            .fetch_optional(&self.pool)
            .await?
            .map(EventRecord::try_into_event)
            .transpose()
    }

    async fn delete(&self, id: &str) -> Result<Option<Event>> {
        let query = format!("DELETE FROM events WHERE id = $1 RETURNING {EVENT_COLUMNS}");
        sqlx::query_as::<_, EventRecord>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(EventRecord::try_into_event)
            .transpose()
    }
}

/// PostgreSQL contact message repository.
pub struct PgContactRepository {
    pool: PgPool,
}

impl PgContactRepository {
    /// Create a new [`PgContactRepository`].
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContactRepository for PgContactRepository {
    async fn insert(&self, contact: &Contact) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO contacts (id, name, phone_number, city, message, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&contact.id)
        .bind(&contact.name)
        .bind(&contact.phone_number)
        .bind(&contact.city)
        .bind(&contact.message)
        .bind(contact.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
