//! Cryptogragic logics.

use argon2::password_hash::{
    PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::{Argon2, Params, Version};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};

use crate::config::Argon2 as ArgonConfig;

const RESET_TOKEN_BYTES: usize = 32;

type Result<T> = std::result::Result<T, CryptoError>;

#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
    #[error("argon2 error: {0}")]
    Argon2(String),
}

/// Cryptographic manager.
pub struct Crypto {
    pub pwd: PasswordManager,
}

impl Crypto {
    /// Create a new [`Crypto`].
    pub fn new(config: Option<ArgonConfig>) -> Result<Self> {
        Ok(Self {
            pwd: PasswordManager::new(config)?,
        })
    }
}

/// Password manager that uses Argon2id and PHC string format for hashing and
/// verification.
pub struct PasswordManager {
    params: Params,
    /// Hash of a random secret, checked when no account matches.
    decoy: String,
}

impl PasswordManager {
    /// Create a new [`PasswordManager`].
    pub fn new(config: Option<ArgonConfig>) -> Result<Self> {
        let config = config.unwrap_or_default();

        let params = Params::new(
            config.memory_cost,
            config.iterations,
            config.parallelism,
            Some(config.hash_length),
        )
        .map_err(|err| CryptoError::Argon2(err.to_string()))?;

        let mut manager = Self {
            params,
            decoy: String::new(),
        };
        manager.decoy = manager.hash_password(reset_token())?;

        Ok(manager)
    }

    fn argon2(&self) -> Argon2<'_> {
        Argon2::new(
            argon2::Algorithm::Argon2id,
            Version::V0x13,
            self.params.clone(),
        )
    }

    /// Hash password using Argon2id.
    pub fn hash_password(&self, password: impl AsRef<[u8]>) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(password.as_ref(), &salt)
            .map_err(|e| CryptoError::Argon2(e.to_string()))?;

        Ok(hash.to_string())
    }

    /// Verify password against a PHC string.
    ///
    /// A malformed stored hash is reported as a mismatch.
    pub fn verify_password(
        &self,
        password: impl AsRef<[u8]>,
        phc_hash: &str,
    ) -> bool {
        let Ok(parsed) = PasswordHash::new(phc_hash) else {
            return false;
        };

        self.argon2()
            .verify_password(password.as_ref(), &parsed)
            .is_ok()
    }

    /// Run a verification against the decoy hash, costing as much as
    /// checking a real account.
    pub fn verify_decoy(&self, password: impl AsRef<[u8]>) -> bool {
        self.verify_password(password, &self.decoy)
    }
}

/// Draw a six digits one-time code.
pub fn otp_code() -> String {
    OsRng.gen_range(100_000..=999_999u32).to_string()
}

/// Generate an hex-encoded password reset token.
pub fn reset_token() -> String {
    let mut bytes = [0u8; RESET_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::light_argon2 as light;

    #[test]
    fn test_hash_and_verify() {
        let pwd = PasswordManager::new(Some(light())).unwrap();
        let hash = pwd.hash_password("secret1").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(pwd.verify_password("secret1", &hash));
        assert!(!pwd.verify_password("secret2", &hash));
        assert!(!pwd.verify_password("secret1", "not-a-phc-string"));
    }

    #[test]
    fn test_decoy_uses_configured_cost() {
        let pwd = PasswordManager::new(Some(light())).unwrap();
        let decoy = PasswordHash::new(&pwd.decoy).unwrap();

        assert_eq!(decoy.algorithm.as_str(), "argon2id");
        assert_eq!(decoy.params.get_decimal("m"), Some(1024));
        assert_eq!(decoy.params.get_decimal("t"), Some(1));
        assert!(!pwd.verify_decoy("secret1"));
    }

    #[test]
    fn test_salted_hashes_differ() {
        let pwd = PasswordManager::new(Some(light())).unwrap();
        assert_ne!(
            pwd.hash_password("secret1").unwrap(),
            pwd.hash_password("secret1").unwrap()
        );
    }

    #[test]
    fn test_otp_code() {
        for _ in 0..100 {
            let code = otp_code();
            assert_eq!(code.len(), 6);
            assert!(code.bytes().all(|b| b.is_ascii_digit()));
        }
    }

    #[test]
    fn test_reset_token() {
        let token = reset_token();
        assert_eq!(token.len(), RESET_TOKEN_BYTES * 2);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, reset_token());
    }
}
