//! Typed builder for User.

use chrono::{DateTime, Utc};

use crate::user::{Gender, Role, User, normalize_email};

/// [`User`] builder.
#[derive(Debug, Clone)]
pub struct UserBuilder<Email, Password> {
    email: Email,
    password: Password,
    full_name: String,
    location: String,
    country: String,
    gender: Option<Gender>,
    age: Option<i32>,
}

/// Value is missing on [`UserBuilder`].
#[derive(Debug, Clone)]
pub struct Missing;

/// Value is present on [`UserBuilder`].
#[derive(Debug, Clone)]
pub struct Present<T>(pub T);

impl UserBuilder<Missing, Missing> {
    /// Create a new [`UserBuilder`].
    pub fn new() -> Self {
        Self {
            email: Missing,
            password: Missing,
            full_name: String::default(),
            location: String::default(),
            country: String::default(),
            gender: None,
            age: None,
        }
    }
}

impl Default for UserBuilder<Missing, Missing> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Password> UserBuilder<Missing, Password> {
    /// Update `email` field on [`UserBuilder`].
    pub fn email(self, email: &str) -> UserBuilder<Present<String>, Password> {
        UserBuilder {
            email: Present(normalize_email(email)),
            password: self.password,
            full_name: self.full_name,
            location: self.location,
            country: self.country,
            gender: self.gender,
            age: self.age,
        }
    }
}

impl<Email> UserBuilder<Email, Missing> {
    /// Update `password` field on [`UserBuilder`] with an already hashed
    /// password.
    pub fn password_hash(
        self,
        hash: impl Into<String>,
    ) -> UserBuilder<Email, Present<String>> {
        UserBuilder {
            email: self.email,
            password: Present(hash.into()),
            full_name: self.full_name,
            location: self.location,
            country: self.country,
            gender: self.gender,
            age: self.age,
        }
    }
}

impl<Email, Password> UserBuilder<Email, Password> {
    /// Update `full_name` field on [`UserBuilder`].
    pub fn full_name(mut self, full_name: impl ToString) -> Self {
        self.full_name = full_name.to_string();
        self
    }

    /// Update `location` field on [`UserBuilder`].
    pub fn location(mut self, location: Option<String>) -> Self {
        self.location = location.unwrap_or_default();
        self
    }

    /// Update `country` field on [`UserBuilder`].
    pub fn country(mut self, country: Option<String>) -> Self {
        self.country = country.unwrap_or_default();
        self
    }

    /// Update `gender` field on [`UserBuilder`].
    pub fn gender(mut self, gender: Option<Gender>) -> Self {
        self.gender = gender;
        self
    }

    /// Update `age` field on [`UserBuilder`].
    pub fn age(mut self, age: Option<i32>) -> Self {
        self.age = age;
        self
    }
}

impl UserBuilder<Present<String>, Present<String>> {
    /// Build an unverified player waiting for `otp`.
    pub fn build(self, id: String, otp: String, now: DateTime<Utc>) -> User {
        User {
            id,
            full_name: self.full_name,
            email: self.email.0,
            password: self.password.0,
            phone_number: None,
            location: self.location,
            country: self.country,
            gender: self.gender,
            age: self.age,
            description: String::default(),
            profile_image: None,
            role: Role::Player,
            otp: Some(otp),
            is_verified: false,
            reset: None,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build() {
        let now = Utc::now();
        let user = UserBuilder::new()
            .full_name("Jo")
            .email("  Jo@X.com ")
            .password_hash("$argon2id$...")
            .age(Some(20))
            .build("65f1c2a9b3e4d5f6a7b8c9d0".into(), "123456".into(), now);

        assert_eq!(user.email, "jo@x.com");
        assert_eq!(user.role, Role::Player);
        assert_eq!(user.otp.as_deref(), Some("123456"));
        assert!(!user.is_verified);
        assert!(user.reset.is_none());
        assert_eq!(user.age, Some(20));
    }
}
