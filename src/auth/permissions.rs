//! Permission Authority and the typed permission gate.

use std::marker::PhantomData;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};

use crate::{
    auth::AuthUser, config::AppConfig, errors::AppError, repository::Repository,
    repository::RepositoryState,
};

/// is_granted
///
/// True iff the identity's role has a grant row for exactly `permission`. Always asks
/// the store; there is no cache to go stale after a grant or revoke.
pub async fn is_granted(
    repo: &dyn Repository,
    user: &AuthUser,
    permission: &str,
) -> Result<bool, AppError> {
    Ok(repo.role_has_permission(user.role_id, permission).await?)
}

/// require
///
/// `is_granted`, with `false` turned into `Forbidden`.
pub async fn require(
    repo: &dyn Repository,
    user: &AuthUser,
    permission: &str,
) -> Result<(), AppError> {
    if is_granted(repo, user, permission).await? {
        Ok(())
    } else {
        Err(AppError::Forbidden {
            permission: permission.to_string(),
        })
    }
}

/// Capability
///
/// Type-level name of a permission, consumed by the `Authorized` extractor.
pub trait Capability: Send + Sync + 'static {
    const NAME: &'static str;
}

macro_rules! capabilities {
    ($($(#[$doc:meta])* $ty:ident => $name:literal),* $(,)?) => {
        $(
            $(#[$doc])*
            pub struct $ty;

            impl Capability for $ty {
                const NAME: &'static str = $name;
            }
        )*
    };
}

capabilities! {
    /// List and read user accounts.
    UsersView => "users.view",
    /// Provision new user accounts.
    UsersCreate => "users.create",
    /// Edit user accounts, including password and role.
    UsersEdit => "users.edit",
    /// Deactivate user accounts.
    UsersDelete => "users.delete",
    /// Read roles and their grants.
    RolesView => "roles.view",
    /// Grant and revoke permissions on roles.
    RolesEdit => "roles.edit",
}

/// Authorized Extractor
///
/// Resolves `AuthUser` (Token Authenticator) and then asks the Permission Authority for
/// `C::NAME`. Extractors run before the handler body, so a handler taking
/// `Authorized<C>` never executes for a caller lacking the permission.
///
/// Rejection: 401 for any authentication failure, 403 when the permission is missing.
pub struct Authorized<C: Capability> {
    pub user: AuthUser,
    capability: PhantomData<C>,
}

impl<S, C> FromRequestParts<S> for Authorized<C>
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
    C: Capability,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        let repo = RepositoryState::from_ref(state);

        require(repo.as_ref(), &user, C::NAME).await?;

        Ok(Self {
            user,
            capability: PhantomData,
        })
    }
}
