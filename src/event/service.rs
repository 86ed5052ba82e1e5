use std::sync::Arc;

use axum::extract::FromRef;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::AppState;
use crate::clock::Clock;
use crate::error::{Result, ServerError};
use crate::event::{
    Category, Event, EventRepository, EventType, EventUpdate, FeeMethod,
    OrganizerGender, PlayerGender, Sport,
};
use crate::upload::MediaStore;
use crate::user::{Role, UserRepository};
use crate::validation::{
    Payload, PhoneFormat, Rule, Ruleset, Vocabulary, combine_schedule,
    validate,
};

const PAST_SCHEDULE: &str = "Event date and time cannot be in the past";
const INVALID_SCHEDULE: &str = "Invalid date or time format";

/// Events of one organizer split around the current instant.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizerEvents {
    /// Scheduled now or later and not completed.
    pub upcoming_events: Vec<Event>,
    /// Everything else.
    pub past_events: Vec<Event>,
}

impl OrganizerEvents {
    fn partition(events: Vec<Event>, now: DateTime<Utc>) -> Self {
        let (upcoming_events, past_events): (Vec<Event>, Vec<Event>) = events
            .into_iter()
            .partition(|event| event.date >= now && !event.is_completed);
        Self {
            upcoming_events,
            past_events,
        }
    }
}

/// Event manager.
#[derive(Clone)]
pub struct EventService {
    events: Arc<dyn EventRepository>,
    users: Arc<dyn UserRepository>,
    clock: Arc<dyn Clock>,
    media: MediaStore,
    phone: Option<PhoneFormat>,
    delete_requires_owner: bool,
}

impl FromRef<AppState> for EventService {
    fn from_ref(state: &AppState) -> EventService {
        EventService {
            events: Arc::clone(&state.db.events),
            users: Arc::clone(&state.db.users),
            clock: Arc::clone(&state.clock),
            media: state.media.clone(),
            phone: state.config.validation.event_contact,
            delete_requires_owner: state.config.policy.delete_requires_owner,
        }
    }
}

impl EventService {
    /// Rules of every event field. Creation requires fields and checks the
    /// schedule against `now`.
    fn rules(&self, now: Option<DateTime<Utc>>) -> Ruleset {
        let creating = now.is_some();
        let phone = || self.phone.map(Rule::Phone);
        let field = |rules: Ruleset, name, checks: Vec<Rule>| {
            let mut all = Vec::with_capacity(checks.len() + 1);
            if creating {
                all.push(Rule::Required);
            }
            all.extend(checks);
            rules.field(name, all)
        };

        let date = match now {
            Some(not_before) => Rule::Schedule {
                time_field: "time",
                not_before,
            },
            None => Rule::Date,
        };

        let rules = Ruleset::new();
        let rules = field(rules, "eventTitle", vec![]);
        let rules = field(rules, "description", vec![]);
        let rules = field(rules, "date", vec![date]);
        let rules = field(rules, "time", vec![Rule::Time]);
        let rules = field(rules, "location", vec![]);
        let rules = field(rules, "country", vec![]);
        let rules = field(rules, "city", vec![]);
        let rules = field(rules, "sport", vec![Rule::one_of::<Sport>()]);
        let rules = field(rules, "organizerName", vec![]);
        let rules = field(
            rules,
            "organizerGender",
            vec![Rule::one_of::<OrganizerGender>()],
        );
        let rules = field(rules, "contactNumber1", phone().into_iter().collect());
        let rules = field(rules, "teamSizeLimit", vec![Rule::Min(1.0), Rule::Integer]);
        let rules = field(rules, "maxPlayersPerTeam", vec![Rule::Min(1.0), Rule::Integer]);
        let rules = field(rules, "category", vec![Rule::one_of::<Category>()]);
        let rules = field(rules, "type", vec![Rule::one_of::<EventType>()]);
        let rules = field(rules, "registrationLimit", vec![Rule::Min(1.0), Rule::Integer]);
        let rules = field(rules, "playerGender", vec![Rule::one_of::<PlayerGender>()]);
        let rules = field(rules, "age", vec![Rule::Min(1.0), Rule::Integer]);
        let rules = field(rules, "registrationFee", vec![Rule::Min(0.0)]);
        let rules = field(rules, "eventFeeMethod", vec![Rule::one_of::<FeeMethod>()]);

        rules
            .field("contactNumber2", phone())
            .field("rules", [Rule::List])
            .field("features", [Rule::List])
    }

    /// Find the organizer referenced by the `userId` field.
    async fn organizer(&self, payload: &Payload, forbidden: &'static str) -> Result<String> {
        validate(
            payload,
            &Ruleset::new().field("userId", [Rule::Required, Rule::ObjectId]),
        )?;
        let user_id = payload.require("userId")?.to_lowercase();

        let user = self
            .users
            .find_by_id(&user_id)
            .await?
            .ok_or(ServerError::NotFound("user"))?;
        if user.role != Role::Organizer {
            return Err(ServerError::Forbidden(forbidden));
        }

        Ok(user.id)
    }

    /// Create an event owned by the organizer in `userId`.
    pub async fn create(&self, payload: &Payload, media: Vec<String>) -> Result<Event> {
        let user_id = self
            .organizer(payload, "Only organizers can create events")
            .await?;

        let now = self.clock.now();
        validate(payload, &self.rules(Some(now)))?;

        let time = payload.require("time")?;
        let date = combine_schedule(&payload.require("date")?, &time).ok_or_else(|| {
            ServerError::field("date", "schedule", INVALID_SCHEDULE)
        })?;

        let event = Event {
            id: crate::id::generate(now),
            user_id,
            event_title: payload.require("eventTitle")?,
            description: payload.require("description")?,
            date,
            time,
            location: payload.require("location")?,
            country: payload.require("country")?,
            city: payload.require("city")?,
            sport: pick(payload, "sport")?,
            organizer_name: payload.require("organizerName")?,
            organizer_gender: pick(payload, "organizerGender")?,
            contact_number1: payload.require("contactNumber1")?,
            contact_number2: payload.text("contactNumber2"),
            team_size_limit: whole(payload, "teamSizeLimit")?,
            max_players_per_team: whole(payload, "maxPlayersPerTeam")?,
            category: pick(payload, "category")?,
            r#type: pick(payload, "type")?,
            registration_limit: whole(payload, "registrationLimit")?,
            player_gender: pick(payload, "playerGender")?,
            age: whole(payload, "age")?,
            registration_fee: payload.number("registrationFee").unwrap_or_default(),
            event_fee_method: pick(payload, "eventFeeMethod")?,
            rules: payload.list("rules").unwrap_or_default(),
            features: payload.list("features").unwrap_or_default(),
            media,
            participants: Vec::new(),
            is_completed: false,
            created_at: now,
        };

        self.events.insert(&event).await?;
        metrics::counter!("events_created_total").increment(1);
        tracing::debug!(event_id = %event.id, user_id = %event.user_id, "event created");

        Ok(event)
    }

    pub async fn list(&self) -> Result<Vec<Event>> {
        self.events.list().await
    }

    pub async fn get(&self, id: &str) -> Result<Event> {
        check_id(id)?;
        self.events
            .find(&id.to_lowercase())
            .await?
            .ok_or(ServerError::NotFound("event"))
    }

    /// Merge present, non-empty fields into the stored event and append
    /// `media` to its list.
    pub async fn update(&self, id: &str, payload: &Payload, media: Vec<String>) -> Result<Event> {
        let event = self.get(id).await?;
        validate(payload, &self.rules(None))?;

        // a lone date or time is completed with the stored half.
        let schedule = if payload.is_present("date") || payload.is_present("time") {
            let date = payload
                .text("date")
                .unwrap_or_else(|| event.date.date_naive().to_string());
            let time = payload.text("time").unwrap_or_else(|| event.time.clone());

            let schedule = combine_schedule(&date, &time).ok_or_else(|| {
                ServerError::field("date", "schedule", INVALID_SCHEDULE)
            })?;
            if schedule < self.clock.now() {
                return Err(ServerError::field("date", "schedule", PAST_SCHEDULE));
            }
            Some((schedule, time))
        } else {
            None
        };

        let list = |key: &str| {
            payload
                .is_present(key)
                .then(|| payload.list(key).unwrap_or_default())
        };

        let update = EventUpdate {
            event_title: payload.text("eventTitle"),
            description: payload.text("description"),
            schedule,
            location: payload.text("location"),
            country: payload.text("country"),
            city: payload.text("city"),
            sport: payload.vocabulary("sport"),
            organizer_name: payload.text("organizerName"),
            organizer_gender: payload.vocabulary("organizerGender"),
            contact_number1: payload.text("contactNumber1"),
            contact_number2: payload
                .contains("contactNumber2")
                .then(|| payload.text("contactNumber2")),
            team_size_limit: payload.integer("teamSizeLimit"),
            max_players_per_team: payload.integer("maxPlayersPerTeam"),
            category: payload.vocabulary("category"),
            r#type: payload.vocabulary("type"),
            registration_limit: payload.integer("registrationLimit"),
            player_gender: payload.vocabulary("playerGender"),
            age: payload.integer("age"),
            registration_fee: payload.number("registrationFee"),
            event_fee_method: payload.vocabulary("eventFeeMethod"),
            rules: list("rules"),
            features: list("features"),
            media,
        };

        self.events
            .update(&event.id, &update)
            .await?
            .ok_or(ServerError::NotFound("event"))
    }

    /// Remove an event and its stored media. When ownership is enforced,
    /// `userId` must be the owning organizer.
    pub async fn delete(&self, id: &str, payload: &Payload) -> Result<()> {
        let event = self.get(id).await?;

        if self.delete_requires_owner {
            validate(
                payload,
                &Ruleset::new().field("userId", [Rule::Required, Rule::ObjectId]),
            )?;
            if payload.require("userId")?.to_lowercase() != event.user_id {
                return Err(ServerError::Forbidden(
                    "Only the organizer of this event can delete it",
                ));
            }
        }

        let deleted = self
            .events
            .delete(&event.id)
            .await?
            .ok_or(ServerError::NotFound("event"))?;
        self.media.remove(&deleted.media).await;

        tracing::debug!(event_id = %event.id, "event deleted");
        Ok(())
    }

    /// Events of the organizer in `userId`, optionally filtered by the
    /// `query` field.
    pub async fn list_for_organizer(&self, payload: &Payload) -> Result<OrganizerEvents> {
        let user_id = self
            .organizer(payload, "Only organizers can view events")
            .await?;
        let search = payload.text("query");

        let events = self
            .events
            .find_by_organizer(&user_id, search.as_deref())
            .await?;

        Ok(OrganizerEvents::partition(events, self.clock.now()))
    }
}

fn check_id(id: &str) -> Result<()> {
    if crate::id::is_object_id(id) {
        Ok(())
    } else {
        Err(ServerError::field("id", "object_id", "Invalid event ID format"))
    }
}

fn pick<T: Vocabulary>(payload: &Payload, key: &'static str) -> Result<T> {
    payload
        .vocabulary(key)
        .ok_or_else(|| ServerError::field(key, "enum", format!("{key} is invalid")))
}

fn whole(payload: &Payload, key: &'static str) -> Result<i32> {
    payload
        .integer(key)
        .ok_or_else(|| ServerError::field(key, "range", format!("{key} must be a number")))
}
