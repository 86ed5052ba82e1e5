mod builder;
mod repository;
mod service;

pub use builder::*;
pub use repository::*;
pub use service::*;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::validation::vocabulary;

vocabulary! {
    /// Access level of an account.
    pub enum Role {
        Player => "player" ["user"],
        Organizer => "organizer",
        Admin => "admin",
    }
}

vocabulary! {
    /// Gender declared on a profile.
    pub enum Gender {
        Male => "Male",
        Female => "Female",
        Other => "Neither Male Nor Female" ["other", "neither"],
    }
}

/// Pending password reset. Token and expiry only exist together.
#[derive(Clone, Debug, PartialEq)]
pub struct ResetToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// User as saved on database.
#[derive(Clone, Debug, PartialEq)]
pub struct User {
    pub id: String,
    pub full_name: String,
    /// Trimmed and lower-cased.
    pub email: String,
    /// PHC string.
    pub password: String,
    pub phone_number: Option<String>,
    pub location: String,
    pub country: String,
    pub gender: Option<Gender>,
    pub age: Option<i32>,
    pub description: String,
    pub profile_image: Option<String>,
    pub role: Role,
    pub otp: Option<String>,
    pub is_verified: bool,
    pub reset: Option<ResetToken>,
    pub created_at: DateTime<Utc>,
}

/// Public view of a [`User`].
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub user_id: String,
    pub full_name: String,
    pub email: String,
    pub phone_number: Option<String>,
    pub location: String,
    pub country: String,
    pub gender: Option<Gender>,
    pub age: Option<i32>,
    pub description: String,
    pub profile_image: Option<String>,
    pub role: Role,
    pub is_verified: bool,
}

impl From<&User> for Profile {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id.clone(),
            full_name: user.full_name.clone(),
            email: user.email.clone(),
            phone_number: user.phone_number.clone(),
            location: user.location.clone(),
            country: user.country.clone(),
            gender: user.gender,
            age: user.age,
            description: user.description.clone(),
            profile_image: user.profile_image.clone(),
            role: user.role,
            is_verified: user.is_verified,
        }
    }
}

/// Profile fields to overwrite. `None` keeps the stored value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub location: Option<String>,
    pub country: Option<String>,
    pub gender: Option<Gender>,
    pub age: Option<i32>,
    pub description: Option<String>,
    pub profile_image: Option<String>,
}

impl ProfileUpdate {
    /// Apply the update on `user`.
    pub fn apply(&self, user: &mut User) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *target = value.clone();
            }
        }

        set(&mut user.full_name, &self.full_name);
        set(&mut user.email, &self.email);
        set(&mut user.location, &self.location);
        set(&mut user.country, &self.country);
        set(&mut user.description, &self.description);
        if self.phone_number.is_some() {
            user.phone_number = self.phone_number.clone();
        }
        if self.gender.is_some() {
            user.gender = self.gender;
        }
        if self.age.is_some() {
            user.age = self.age;
        }
        if self.profile_image.is_some() {
            user.profile_image = self.profile_image.clone();
        }
    }
}

/// Normalize an email address for storage and lookups.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
