//! # Password hashing and policy
//!
//! Argon2id hashing that treats the hash as opaque storage, with OWASP
//! parameters. `PasswordPolicy` layers config-driven strength
//! requirements on top, producing the exact error kinds the auth
//! service contract specifies.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use shared::errors::{AlyxError, AlyxResult};

/// OWASP-recommended parameters: 64 MiB memory, 3 iterations, 4 lanes.
#[derive(Clone)]
pub struct PasswordHasher {
    argon2: Argon2<'static>,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl PasswordHasher {
    pub fn new() -> Self {
        let params = Params::new(64 * 1024, 3, 4, None).expect("static argon2 params are always valid");
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        Self { argon2 }
    }

    pub fn hash(&self, password: &str) -> AlyxResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AlyxError::Internal(format!("password hashing failed: {e}")))
    }

    pub fn verify(&self, password: &str, hash: &str) -> AlyxResult<bool> {
        let parsed = PasswordHash::new(hash).map_err(|_| AlyxError::PasswordHashMismatch)?;
        match self.argon2.verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(AlyxError::Internal(format!("password verification failed: {e}"))),
        }
    }
}

impl std::fmt::Debug for PasswordHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordHasher").finish_non_exhaustive()
    }
}

/// Config-driven password requirements, checked before hashing.
#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub require_upper: bool,
    pub require_lower: bool,
    pub require_digit: bool,
    pub require_special: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self { min_length: 10, require_upper: true, require_lower: true, require_digit: true, require_special: true }
    }
}

const SPECIAL_CHARS: &str = "!@#$%^&*()_+-=[]{}|;:,.<>?";

impl PasswordPolicy {
    /// Returns the first violated requirement, if any, as the exact error
    /// kind the auth service contract names.
    pub fn validate(&self, password: &str) -> AlyxResult<()> {
        if password.len() < self.min_length {
            return Err(AlyxError::PasswordTooShort { min_length: self.min_length });
        }
        if self.require_upper && !password.chars().any(|c| c.is_uppercase()) {
            return Err(AlyxError::PasswordNoUppercase);
        }
        if self.require_lower && !password.chars().any(|c| c.is_lowercase()) {
            return Err(AlyxError::PasswordNoLowercase);
        }
        if self.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            return Err(AlyxError::PasswordNoNumber);
        }
        if self.require_special && !password.chars().any(|c| SPECIAL_CHARS.contains(c)) {
            return Err(AlyxError::PasswordNoSpecial);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify_round_trips() {
        let hasher = PasswordHasher::new();
        let hash = hasher.hash("Str0ng&Pass!").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("Str0ng&Pass!", &hash).unwrap());
        assert!(!hasher.verify("wrong", &hash).unwrap());
    }

    #[test]
    fn same_password_hashes_differently_each_time() {
        let hasher = PasswordHasher::new();
        let a = hasher.hash("Str0ng&Pass!").unwrap();
        let b = hasher.hash("Str0ng&Pass!").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn policy_rejects_in_the_documented_order() {
        let policy = PasswordPolicy::default();
        assert_eq!(policy.validate("short").unwrap_err().error_code(), "PASSWORD_TOO_SHORT");
        assert_eq!(policy.validate("alllowercase1!").unwrap_err().error_code(), "PASSWORD_NO_UPPERCASE");
        assert_eq!(policy.validate("ALLUPPERCASE1!").unwrap_err().error_code(), "PASSWORD_NO_LOWERCASE");
        assert_eq!(policy.validate("NoDigitsHere!!").unwrap_err().error_code(), "PASSWORD_NO_NUMBER");
        assert_eq!(policy.validate("NoSpecialChars1").unwrap_err().error_code(), "PASSWORD_NO_SPECIAL");
        assert!(policy.validate("Str0ng&Pass!").is_ok());
    }

    #[test]
    fn relaxed_policy_permits_simple_passwords() {
        let policy = PasswordPolicy {
            min_length: 4,
            require_upper: false,
            require_lower: false,
            require_digit: false,
            require_special: false,
        };
        assert!(policy.validate("abcd").is_ok());
    }
}
