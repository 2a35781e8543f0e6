//! Credential Verifier: login name + password against the stored hash.

use crate::{
    config::LegacyMigration,
    errors::AppError,
    models::Identity,
    password::{self, Argon2Params},
    repository::Repository,
};

/// VerifiedIdentity
///
/// The identity matched by a successful credential check.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedIdentity {
    pub id: i32,
    pub username: String,
    pub role_id: i32,
    pub role_name: String,
}

impl From<Identity> for VerifiedIdentity {
    fn from(identity: Identity) -> Self {
        Self {
            id: identity.id,
            username: identity.username,
            role_id: identity.role_id,
            role_name: identity.role_name,
        }
    }
}

/// verify_credentials
///
/// Looks up exactly one active identity by exact login name and verifies the password
/// against its Argon2 hash. Unknown login names, unusable stored hashes and wrong
/// passwords all yield `InvalidCredentials`, and all pay for one hash verification.
///
/// The `legacy` allow-list is consulted only for accounts whose stored hash is not a PHC
/// string yet. A listed pair re-hashes the password and persists it before the identity
/// is returned; once migrated, the account never reaches the allow-list again. `legacy`
/// is inert unless explicitly enabled in configuration.
pub async fn verify_credentials(
    repo: &dyn Repository,
    legacy: &LegacyMigration,
    hashing: Argon2Params,
    username: &str,
    password: &str,
) -> Result<VerifiedIdentity, AppError> {
    if username.is_empty() || password.is_empty() {
        return Err(AppError::InvalidCredentials);
    }

    let Some(identity) = repo.find_identity_by_username(username).await? else {
        password::verify_against_dummy(password, hashing).await;
        tracing::debug!("login rejected: no active identity for login name");
        return Err(AppError::InvalidCredentials);
    };

    if password::is_phc_hash(&identity.password_hash) {
        if password::verify_password(password, &identity.password_hash).await? {
            return Ok(identity.into());
        }
        tracing::debug!(user_id = identity.id, "login rejected: password mismatch");
        return Err(AppError::InvalidCredentials);
    }

    // Unmigrated account.
    password::verify_against_dummy(password, hashing).await;

    if legacy.allows(username, password) {
        let migrated = password::hash_password(password, hashing).await?;
        repo.update_password_hash(identity.id, &migrated).await?;
        tracing::warn!(
            user_id = identity.id,
            "legacy credential accepted and migrated to argon2id"
        );
        return Ok(identity.into());
    }

    tracing::debug!(user_id = identity.id, "login rejected: stored hash not migrated");
    Err(AppError::InvalidCredentials)
}
