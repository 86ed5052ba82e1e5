//! HTTP API.
pub mod contact;
pub mod events;
pub mod status;
pub mod users;

use std::collections::HashMap;

use axum::body::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Result, ServerError};
use crate::validation::Payload;

/// Confirmation body.
#[derive(Debug, Serialize)]
pub struct Message {
    pub message: &'static str,
}

/// Build a payload from query parameters, overridden by an optional JSON
/// object body.
///
/// Used by routes clients commonly call without a body (`GET`, `DELETE`).
fn lenient_payload(query: HashMap<String, String>, body: &Bytes) -> Result<Payload> {
    let mut map: Map<String, Value> = query
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect();

    if !body.iter().all(u8::is_ascii_whitespace) {
        let fields: Map<String, Value> = serde_json::from_slice(body)
            .map_err(|err| ServerError::ParsingForm(Box::new(err)))?;
        map.extend(fields);
    }

    Ok(Payload::from(map))
}
