//! User persistence port.

use async_trait::async_trait;

use crate::error::Result;
use crate::user::{ProfileUpdate, ResetToken, Role, User};

/// Port for user persistence operations.
///
/// Every method is a single atomic document operation.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a new [`User`].
    ///
    /// Fails with `EmailTaken` when the email is already registered.
    async fn insert(&self, user: &User) -> Result<()>;

    /// Find a user using its identifier.
    async fn find_by_id(&self, id: &str) -> Result<Option<User>>;

    /// Find a user using its normalized email.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    /// List users holding `role`.
    async fn find_by_role(&self, role: Role) -> Result<Vec<User>>;

    /// Overwrite present profile fields and return the stored user.
    ///
    /// Fails with `EmailTaken` when the new email belongs to someone else.
    async fn update_profile(
        &self,
        id: &str,
        update: &ProfileUpdate,
    ) -> Result<Option<User>>;

    /// Mark an unverified user as verified and clear its code.
    ///
    /// Returns `false` when the user is missing or was already verified.
    async fn mark_verified(&self, id: &str) -> Result<bool>;

    /// Store a password reset token with its expiry.
    async fn set_reset_token(&self, id: &str, reset: &ResetToken) -> Result<()>;

    /// Replace the password and clear the reset pair, only if `token` is
    /// still the active one.
    async fn consume_reset_token(
        &self,
        id: &str,
        token: &str,
        password: &str,
    ) -> Result<bool>;

    /// Hard delete a user. Only used to undo a failed signup.
    async fn delete(&self, id: &str) -> Result<()>;
}
