use std::sync::Arc;

use axum::extract::FromRef;
use chrono::Duration;

use crate::AppState;
use crate::clock::Clock;
use crate::crypto::{self, Crypto};
use crate::error::{Result, ServerError};
use crate::mail::{Notification, NotificationGateway, deliver};
use crate::upload::MediaStore;
use crate::user::{
    Gender, ProfileUpdate, ResetToken, Role, User, UserBuilder, UserRepository,
    normalize_email,
};
use crate::validation::{Payload, Rule, Ruleset, validate};

/// Lifetime of a password reset token.
pub const RESET_TOKEN_HOURS: i64 = 1;
const MIN_PASSWORD_LENGTH: usize = 6;
const MIN_AGE: f64 = 13.0;

/// User manager.
#[derive(Clone)]
pub struct UserService {
    repo: Arc<dyn UserRepository>,
    crypto: Arc<Crypto>,
    mail: Arc<dyn NotificationGateway>,
    clock: Arc<dyn Clock>,
    media: MediaStore,
}

impl FromRef<AppState> for UserService {
    fn from_ref(state: &AppState) -> UserService {
        UserService {
            repo: Arc::clone(&state.db.users),
            crypto: Arc::clone(&state.crypto),
            mail: Arc::clone(&state.mail),
            clock: Arc::clone(&state.clock),
            media: state.media.clone(),
        }
    }
}

impl UserService {
    /// Register an unverified player and send its verification code.
    ///
    /// The account is removed again when the code cannot be delivered.
    pub async fn signup(&self, payload: &Payload) -> Result<User> {
        let rules = Ruleset::new()
            .required("fullName")
            .field("email", [Rule::Required, Rule::Email])
            .field(
                "password",
                [Rule::Required, Rule::MinLength(MIN_PASSWORD_LENGTH)],
            )
            .field("gender", [Rule::one_of::<Gender>()])
            .field("age", [Rule::Min(MIN_AGE), Rule::Integer]);
        validate(payload, &rules)?;

        let password = self
            .crypto
            .pwd
            .hash_password(payload.require("password")?)?;
        let otp = crypto::otp_code();
        let now = self.clock.now();

        let user = UserBuilder::new()
            .full_name(payload.require("fullName")?)
            .email(&payload.require("email")?)
            .password_hash(password)
            .location(payload.text("location"))
            .country(payload.text("country"))
            .gender(payload.vocabulary("gender"))
            .age(payload.integer("age"))
            .build(crate::id::generate(now), otp.clone(), now);

        // a dropped request must not stop between insert and rollback.
        let repo = Arc::clone(&self.repo);
        let mail = Arc::clone(&self.mail);
        let account = user.clone();
        tokio::spawn(async move {
            register(repo.as_ref(), mail.as_ref(), &account, &otp).await
        })
        .await
        .map_err(|err| ServerError::Internal {
            details: "signup task stopped".to_owned(),
            source: Some(Box::new(err)),
        })??;

        metrics::counter!("accounts_created_total").increment(1);
        tracing::info!(user_id = %user.id, "account created");

        Ok(user)
    }

    /// Confirm the email address of a user with its one-time code.
    pub async fn verify_otp(&self, payload: &Payload) -> Result<User> {
        let rules = Ruleset::new()
            .field("userId", [Rule::Required, Rule::ObjectId])
            .required("otp");
        validate(payload, &rules)?;

        let user = self.find(&payload.require("userId")?).await?;
        if user.is_verified {
            return Err(ServerError::AlreadyVerified);
        }
        if user.otp.as_deref() != Some(payload.require("otp")?.as_str()) {
            return Err(ServerError::InvalidCode);
        }

        if !self.repo.mark_verified(&user.id).await? {
            return Err(ServerError::AlreadyVerified);
        }

        Ok(User {
            otp: None,
            is_verified: true,
            ..user
        })
    }

    /// Check credentials of a verified user.
    pub async fn login(&self, payload: &Payload) -> Result<User> {
        let rules = Ruleset::new().required("email").required("password");
        validate(payload, &rules)?;

        let email = normalize_email(&payload.require("email")?);
        let Some(user) = self.repo.find_by_email(&email).await? else {
            // unknown emails cost one hash check, like a wrong password.
            self.crypto.pwd.verify_decoy(payload.require("password")?);
            return Err(ServerError::InvalidCredentials);
        };

        if !self
            .crypto
            .pwd
            .verify_password(payload.require("password")?, &user.password)
        {
            return Err(ServerError::InvalidCredentials);
        }
        if !user.is_verified {
            return Err(ServerError::Unverified);
        }

        Ok(user)
    }

    /// Issue a reset token when the email belongs to an account.
    ///
    /// Succeeds for unknown emails and undelivered tokens alike.
    pub async fn forgot_password(&self, payload: &Payload) -> Result<()> {
        validate(payload, &Ruleset::new().required("email"))?;

        let email = normalize_email(&payload.require("email")?);
        let Some(user) = self.repo.find_by_email(&email).await? else {
            tracing::debug!("password reset requested for unknown email");
            return Ok(());
        };

        let reset = ResetToken {
            token: crypto::reset_token(),
            expires_at: self.clock.now() + Duration::hours(RESET_TOKEN_HOURS),
        };
        self.repo.set_reset_token(&user.id, &reset).await?;

        let notification =
            Notification::password_reset(&user.email, &user.full_name, &reset.token);
        if let Err(err) = deliver(self.mail.as_ref(), &notification).await {
            tracing::warn!(user_id = %user.id, error = %err, "reset token not delivered");
        }

        Ok(())
    }

    /// Replace the password of a user holding a valid reset token.
    pub async fn reset_password(&self, payload: &Payload) -> Result<()> {
        let rules = Ruleset::new()
            .required("email")
            .required("token")
            .field(
                "newPassword",
                [Rule::Required, Rule::MinLength(MIN_PASSWORD_LENGTH)],
            );
        validate(payload, &rules)?;

        let email = normalize_email(&payload.require("email")?);
        let user = self
            .repo
            .find_by_email(&email)
            .await?
            .ok_or(ServerError::NoActiveReset)?;
        let reset = user.reset.as_ref().ok_or(ServerError::NoActiveReset)?;

        let token = payload.require("token")?;
        if reset.token != token {
            return Err(ServerError::InvalidToken);
        }
        if self.clock.now() > reset.expires_at {
            return Err(ServerError::TokenExpired);
        }

        let password = self
            .crypto
            .pwd
            .hash_password(payload.require("newPassword")?)?;
        if !self
            .repo
            .consume_reset_token(&user.id, &token, &password)
            .await?
        {
            return Err(ServerError::NoActiveReset);
        }

        deliver(
            self.mail.as_ref(),
            &Notification::password_changed(&user.email, &user.full_name),
        )
        .await?;

        Ok(())
    }

    /// Profile of the user in `userId`.
    pub async fn me(&self, payload: &Payload) -> Result<User> {
        validate(
            payload,
            &Ruleset::new().field("userId", [Rule::Required, Rule::ObjectId]),
        )?;
        self.find(&payload.require("userId")?).await
    }

    pub async fn organizers(&self) -> Result<Vec<User>> {
        self.by_role(Role::Organizer, "organizers").await
    }

    pub async fn players(&self) -> Result<Vec<User>> {
        self.by_role(Role::Player, "players").await
    }

    async fn by_role(&self, role: Role, name: &'static str) -> Result<Vec<User>> {
        let users = self.repo.find_by_role(role).await?;
        if users.is_empty() {
            return Err(ServerError::NotFound(name));
        }
        Ok(users)
    }

    /// Overwrite the present profile fields of the user in `userId`. A
    /// replaced profile image is deleted from storage.
    pub async fn update_profile(
        &self,
        payload: &Payload,
        profile_image: Option<String>,
    ) -> Result<User> {
        let rules = Ruleset::new()
            .field("userId", [Rule::Required, Rule::ObjectId])
            .field("email", [Rule::Email])
            .field("gender", [Rule::one_of::<Gender>()])
            .field("age", [Rule::Min(MIN_AGE), Rule::Integer]);
        validate(payload, &rules)?;

        let update = ProfileUpdate {
            full_name: payload.text("fullName"),
            email: payload.text("email").map(|email| normalize_email(&email)),
            phone_number: payload.text("phoneNumber"),
            location: payload.text("location"),
            country: payload.text("country"),
            gender: payload.vocabulary("gender"),
            age: payload.integer("age"),
            description: payload.text("description"),
            profile_image,
        };

        let previous = match update.profile_image {
            Some(_) => self.find(&payload.require("userId")?).await?.profile_image,
            None => None,
        };

        let id = payload.require("userId")?.to_lowercase();
        let user = self
            .repo
            .update_profile(&id, &update)
            .await?
            .ok_or(ServerError::NotFound("user"))?;

        let replaced = previous.filter(|image| user.profile_image.as_ref() != Some(image));
        if let Some(image) = replaced {
            self.media.remove(&[image]).await;
        }

        Ok(user)
    }

    async fn find(&self, id: &str) -> Result<User> {
        self.repo
            .find_by_id(&id.to_lowercase())
            .await?
            .ok_or(ServerError::NotFound("user"))
    }
}

/// Store `user` and send its code, removing the account when the code is
/// not delivered.
async fn register(
    repo: &dyn UserRepository,
    mail: &dyn NotificationGateway,
    user: &User,
    otp: &str,
) -> Result<()> {
    repo.insert(user).await?;

    let notification = Notification::otp(&user.email, &user.full_name, otp);
    if let Err(err) = deliver(mail, &notification).await {
        if let Err(rollback) = repo.delete(&user.id).await {
            tracing::error!(
                user_id = %user.id,
                error = %rollback,
                "failed to remove account after undelivered code"
            );
        }
        return Err(err.into());
    }

    Ok(())
}
