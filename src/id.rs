//! Document identifiers.
//!
//! An identifier is 12 bytes rendered as 24 lowercase hexadecimal
//! characters: 4 bytes of big-endian Unix seconds followed by 8 random bytes.

use chrono::{DateTime, Utc};
use rand::RngCore;
use rand::rngs::OsRng;

const TIMESTAMP_BYTES: usize = 4;
const RANDOM_BYTES: usize = 8;
pub const ID_LENGTH: usize = (TIMESTAMP_BYTES + RANDOM_BYTES) * 2;

/// Generate a new identifier stamped with `now`.
pub fn generate(now: DateTime<Utc>) -> String {
    let mut bytes = [0u8; TIMESTAMP_BYTES + RANDOM_BYTES];
    let seconds = now.timestamp().clamp(0, u32::MAX as i64) as u32;
    bytes[..TIMESTAMP_BYTES].copy_from_slice(&seconds.to_be_bytes());
    OsRng.fill_bytes(&mut bytes[TIMESTAMP_BYTES..]);
    hex::encode(bytes)
}

/// Check that `value` has the shape of an identifier.
pub fn is_object_id(value: &str) -> bool {
    value.len() == ID_LENGTH && value.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate() {
        let now = DateTime::from_timestamp(0x6650_0000, 0).unwrap();
        let id = generate(now);

        assert!(is_object_id(&id));
        assert!(id.starts_with("66500000"));
        assert_ne!(id, generate(now));
    }

    #[test]
    fn test_is_object_id() {
        assert!(is_object_id("65f1c2a9b3e4d5f6a7b8c9d0"));
        assert!(is_object_id("65F1C2A9B3E4D5F6A7B8C9D0"));
        assert!(!is_object_id("65f1c2a9b3e4d5f6a7b8c9d"));
        assert!(!is_object_id("65f1c2a9b3e4d5f6a7b8c9zz"));
        assert!(!is_object_id(""));
    }
}
