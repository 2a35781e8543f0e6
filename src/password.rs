//! Password hashing and verification.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

use tokio::sync::OnceCell;

use crate::errors::AppError;

/// Argon2 hashing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Argon2Params {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Argon2Params {
    /// Minimum-cost parameters for test suites.
    pub fn testing() -> Self {
        Self {
            memory_kib: Params::MIN_M_COST,
            iterations: 1,
            parallelism: 1,
        }
    }

    fn to_argon2(self) -> Result<Argon2<'static>, AppError> {
        let params = Params::new(self.memory_kib, self.iterations, self.parallelism, None).map_err(
            |e| AppError::Internal {
                operation: format!("create argon2 params: {e}"),
            },
        )?;

        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

impl Default for Argon2Params {
    /// Argon2id RFC recommendations
    fn default() -> Self {
        Self {
            memory_kib: 19456, // 19 MB
            iterations: 2,
            parallelism: 1,
        }
    }
}

fn hash_blocking(password: &str, params: Argon2Params) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = params
        .to_argon2()?
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal {
            operation: format!("hash password: {e}"),
        })?;

    Ok(hash.to_string())
}

/// Verification uses the parameters embedded in the PHC string. Anything that does not
/// parse as one (plaintext, foreign formats) never verifies.
fn verify_blocking(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Hash a password on the blocking pool.
pub async fn hash_password(password: &str, params: Argon2Params) -> Result<String, AppError> {
    let password = password.to_owned();
    tokio::task::spawn_blocking(move || hash_blocking(&password, params))
        .await
        .map_err(|e| AppError::Internal {
            operation: format!("join hashing task: {e}"),
        })?
}

/// Verify a password against a stored hash on the blocking pool.
pub async fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    let password = password.to_owned();
    let hash = hash.to_owned();
    tokio::task::spawn_blocking(move || verify_blocking(&password, &hash))
        .await
        .map_err(|e| AppError::Internal {
            operation: format!("join verification task: {e}"),
        })
}

/// True when `hash` parses as a PHC string, i.e. the account is on the modern format.
pub fn is_phc_hash(hash: &str) -> bool {
    PasswordHash::new(hash).is_ok()
}

static DUMMY_HASH: OnceCell<String> = OnceCell::const_new();

// Computed on the blocking pool the first time it is needed.
async fn dummy_hash(params: Argon2Params) -> Result<&'static str, AppError> {
    DUMMY_HASH
        .get_or_try_init(|| hash_password("university-api-dummy-password", params))
        .await
        .map(String::as_str)
}

/// Burns one verification for a login that has nothing to verify against (unknown name,
/// unusable stored hash), so every failure path costs the same as a wrong password.
pub async fn verify_against_dummy(password: &str, params: Argon2Params) {
    match dummy_hash(params).await {
        Ok(hash) => {
            let _ = verify_password(password, hash).await;
        }
        Err(e) => tracing::error!(error = %e, "failed to prepare dummy password hash"),
    }
}
