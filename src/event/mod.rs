//! Organizer-owned sport events.
mod service;

pub use service::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::validation::vocabulary;

vocabulary! {
    pub enum Sport {
        Football => "Football" ["soccer"],
        Basketball => "Basketball",
        Tennis => "Tennis",
        Cricket => "Cricket",
        Other => "Other",
    }
}

vocabulary! {
    pub enum Category {
        Amateur => "Amateur",
        Professional => "Professional",
        Recreational => "Recreational" ["friendlymatch", "friendly match"],
        Competitive => "Competitive" ["tournament"],
    }
}

vocabulary! {
    pub enum EventType {
        Tournament => "Tournament",
        League => "League",
        Friendly => "Friendly",
        Training => "Training",
    }
}

vocabulary! {
    /// Who may register.
    pub enum PlayerGender {
        Male => "Male",
        Female => "Female",
        Mixed => "Mixed",
        Any => "Any" ["other"],
    }
}

vocabulary! {
    pub enum OrganizerGender {
        Male => "Male",
        Female => "Female",
        Other => "Other",
    }
}

vocabulary! {
    /// How the registration fee is collected.
    pub enum FeeMethod {
        PerTeam => "Per Team" ["per_team", "perteam"],
        PerPlayer => "Per Player" ["per_player", "perplayer"],
        Free => "Free",
        PayPal => "PayPal",
        Stripe => "Stripe",
        Other => "Other",
    }
}

/// Event as saved on database.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    /// Owning organizer.
    pub user_id: String,
    pub event_title: String,
    pub description: String,
    /// Date and time combined in UTC.
    pub date: DateTime<Utc>,
    /// Time of day as submitted.
    pub time: String,
    pub location: String,
    pub country: String,
    pub city: String,
    pub sport: Sport,
    pub organizer_name: String,
    pub organizer_gender: OrganizerGender,
    pub contact_number1: String,
    pub contact_number2: Option<String>,
    pub team_size_limit: i32,
    pub max_players_per_team: i32,
    pub category: Category,
    pub r#type: EventType,
    pub registration_limit: i32,
    pub player_gender: PlayerGender,
    /// Minimum age of players.
    pub age: i32,
    pub registration_fee: f64,
    pub event_fee_method: FeeMethod,
    pub rules: Vec<String>,
    pub features: Vec<String>,
    pub media: Vec<String>,
    pub participants: Vec<String>,
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Whether a case-insensitive `search` occurs in the title,
    /// description or location.
    pub fn matches(&self, search: &str) -> bool {
        let search = search.to_lowercase();
        [&self.event_title, &self.description, &self.location]
            .iter()
            .any(|text| text.to_lowercase().contains(&search))
    }
}

/// Fields changed by an event update. `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventUpdate {
    pub event_title: Option<String>,
    pub description: Option<String>,
    /// Combined instant and the time of day it was built from.
    pub schedule: Option<(DateTime<Utc>, String)>,
    pub location: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub sport: Option<Sport>,
    pub organizer_name: Option<String>,
    pub organizer_gender: Option<OrganizerGender>,
    pub contact_number1: Option<String>,
    /// `Some(None)` clears the second number.
    pub contact_number2: Option<Option<String>>,
    pub team_size_limit: Option<i32>,
    pub max_players_per_team: Option<i32>,
    pub category: Option<Category>,
    pub r#type: Option<EventType>,
    pub registration_limit: Option<i32>,
    pub player_gender: Option<PlayerGender>,
    pub age: Option<i32>,
    pub registration_fee: Option<f64>,
    pub event_fee_method: Option<FeeMethod>,
    pub rules: Option<Vec<String>>,
    pub features: Option<Vec<String>>,
    /// Appended to the stored list.
    pub media: Vec<String>,
}

impl EventUpdate {
    /// Apply the update on `event`.
    pub fn apply(&self, event: &mut Event) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *target = value.clone();
            }
        }

        set(&mut event.event_title, &self.event_title);
        set(&mut event.description, &self.description);
        set(&mut event.location, &self.location);
        set(&mut event.country, &self.country);
        set(&mut event.city, &self.city);
        set(&mut event.sport, &self.sport);
        set(&mut event.organizer_name, &self.organizer_name);
        set(&mut event.organizer_gender, &self.organizer_gender);
        set(&mut event.contact_number1, &self.contact_number1);
        set(&mut event.contact_number2, &self.contact_number2);
        set(&mut event.team_size_limit, &self.team_size_limit);
        set(&mut event.max_players_per_team, &self.max_players_per_team);
        set(&mut event.category, &self.category);
        set(&mut event.r#type, &self.r#type);
        set(&mut event.registration_limit, &self.registration_limit);
        set(&mut event.player_gender, &self.player_gender);
        set(&mut event.age, &self.age);
        set(&mut event.registration_fee, &self.registration_fee);
        set(&mut event.event_fee_method, &self.event_fee_method);
        set(&mut event.rules, &self.rules);
        set(&mut event.features, &self.features);
        if let Some((date, time)) = &self.schedule {
            event.date = *date;
            event.time = time.clone();
        }
        event.media.extend_from_slice(&self.media);
    }
}

/// Port for event persistence.
#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn insert(&self, event: &Event) -> Result<()>;

    async fn find(&self, id: &str) -> Result<Option<Event>>;

    /// Every event, soonest first.
    async fn list(&self) -> Result<Vec<Event>>;

    /// Events owned by `user_id`, filtered with [`Event::matches`].
    async fn find_by_organizer(
        &self,
        user_id: &str,
        search: Option<&str>,
    ) -> Result<Vec<Event>>;

    /// Apply `update` in a single write and return the stored event.
    /// Fields absent from the update are left as stored.
    async fn update(&self, id: &str, update: &EventUpdate) -> Result<Option<Event>>;

    /// Remove an event and return it as it was last stored.
    async fn delete(&self, id: &str) -> Result<Option<Event>>;
}
