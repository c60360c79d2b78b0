//! Password hashing, verification and policy.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

use crate::{
    config::PasswordConfig,
    errors::{Error, Result},
};

/// Argon2 hashing parameters.
#[derive(Debug, Clone, Copy)]
pub struct Argon2Params {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Argon2Params {
    /// Create Argon2 instance with these parameters.
    fn to_argon2(self) -> Result<Argon2<'static>> {
        let params = Params::new(self.memory_kib, self.iterations, self.parallelism, None).map_err(|e| Error::Internal {
            operation: format!("create argon2 params: {e}"),
        })?;

        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

impl Default for Argon2Params {
    /// Secure defaults for production (Argon2id RFC recommendations)
    fn default() -> Self {
        Self {
            memory_kib: 19456, // 19 MB
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl From<&PasswordConfig> for Argon2Params {
    fn from(config: &PasswordConfig) -> Self {
        Self {
            memory_kib: config.argon2_memory_kib,
            iterations: config.argon2_iterations,
            parallelism: config.argon2_parallelism,
        }
    }
}

/// Hash a password using Argon2id.
pub fn hash_password(input: &str, params: Argon2Params) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = params.to_argon2()?;

    let hash = argon2.hash_password(input.as_bytes(), &salt).map_err(|e| Error::Internal {
        operation: format!("hash password: {e}"),
    })?;

    Ok(hash.to_string())
}

/// Verify a password against a hash.
///
/// Note: Verification uses the parameters embedded in the hash itself.
pub fn verify_password(input: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash).map_err(|e| Error::Internal {
        operation: format!("parse hash: {e}"),
    })?;

    let argon2 = Argon2::default();
    Ok(argon2.verify_password(input.as_bytes(), &parsed_hash).is_ok())
}

/// Hash on a blocking thread to avoid stalling the async runtime
pub async fn hash_password_blocking(input: String, params: Argon2Params) -> Result<String> {
    tokio::task::spawn_blocking(move || hash_password(&input, params))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password hashing task: {e}"),
        })?
}

pub async fn verify_password_blocking(input: String, hash: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || verify_password(&input, &hash))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password verification task: {e}"),
        })?
}

/// Reject passwords outside the configured length bounds
pub fn check_policy(password: &str, config: &PasswordConfig) -> Result<()> {
    let length = password.chars().count();
    if length < config.min_length {
        return Err(Error::Validation {
            message: format!("Password must be at least {} characters", config.min_length),
        });
    }
    if length > config.max_length {
        return Err(Error::Validation {
            message: format!("Password must be no more than {} characters", config.max_length),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Cheap parameters so the suite stays fast
    fn test_params() -> Argon2Params {
        Argon2Params {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn test_password_hashing() {
        let hash = hash_password("test_password_123", test_params()).unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("test_password_123", &hash).unwrap());
        assert!(!verify_password("wrong_password", &hash).unwrap());
    }

    #[test]
    fn test_same_input_different_hashes() {
        let hash1 = hash_password("same_password", test_params()).unwrap();
        let hash2 = hash_password("same_password", test_params()).unwrap();

        // Same input should produce different hashes due to salt
        assert_ne!(hash1, hash2);
        assert!(verify_password("same_password", &hash1).unwrap());
        assert!(verify_password("same_password", &hash2).unwrap());
    }

    #[test]
    fn test_garbage_hash_is_internal_error() {
        assert!(matches!(verify_password("pw", "not-a-hash"), Err(Error::Internal { .. })));
    }

    #[test]
    fn test_policy_bounds() {
        let config = PasswordConfig {
            min_length: 8,
            max_length: 12,
            ..Default::default()
        };
        assert!(check_policy("short", &config).is_err());
        assert!(check_policy("just-right", &config).is_ok());
        assert!(check_policy("much-too-long-password", &config).is_err());
    }

    #[tokio::test]
    async fn test_blocking_variants() {
        let hash = hash_password_blocking("pw-blocking".to_string(), test_params()).await.unwrap();
        assert!(verify_password_blocking("pw-blocking".to_string(), hash).await.unwrap());
    }
}
