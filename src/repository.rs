use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres, query_builder::QueryBuilder};

use crate::{
    errors::StoreError,
    models::{
        Identity, NewSession, NewUser, Role, SessionIdentity, SessionRecord, UserPatch,
        UserProfile,
    },
};

/// Repository Trait
///
/// The injected data-access interface of the credential store. Every component of the
/// authentication pipeline receives it explicitly; nothing reaches for a global client.
///
/// **Send + Sync + async_trait** make `Arc<dyn Repository>` shareable across Axum's
/// asynchronous task boundaries.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Credentials ---
    // Exact, case-sensitive match on an active identity.
    async fn find_identity_by_username(&self, username: &str)
    -> Result<Option<Identity>, StoreError>;
    async fn update_password_hash(&self, user_id: i32, password_hash: &str)
    -> Result<(), StoreError>;

    // --- Grants ---
    async fn role_has_permission(&self, role_id: i32, permission: &str)
    -> Result<bool, StoreError>;
    // Sorted by name.
    async fn role_permissions(&self, role_id: i32) -> Result<Vec<String>, StoreError>;

    // --- Sessions ---
    // Inserts a new row (never reuses one) and stamps the identity's last login.
    async fn create_session(&self, session: NewSession) -> Result<SessionRecord, StoreError>;
    // Only matches when both the session and its identity are active.
    async fn find_active_session(&self, token_hash: &str)
    -> Result<Option<SessionIdentity>, StoreError>;
    // Returns true when an active row was closed.
    async fn close_session(&self, token_hash: &str) -> Result<bool, StoreError>;

    // --- User Administration ---
    async fn list_users(&self) -> Result<Vec<UserProfile>, StoreError>;
    async fn get_user(&self, id: i32) -> Result<Option<UserProfile>, StoreError>;
    async fn create_user(&self, user: NewUser) -> Result<UserProfile, StoreError>;
    async fn update_user(&self, id: i32, patch: UserPatch)
    -> Result<Option<UserProfile>, StoreError>;
    /// Soft deactivation. Also closes every session of the identity.
    async fn deactivate_user(&self, id: i32) -> Result<bool, StoreError>;

    // --- Roles ---
    async fn list_roles(&self) -> Result<Vec<Role>, StoreError>;
    async fn get_role(&self, id: i32) -> Result<Option<Role>, StoreError>;
    /// Returns false when the role or the permission does not exist. Granting twice is a no-op.
    async fn grant_permission(&self, role_id: i32, permission: &str) -> Result<bool, StoreError>;
    async fn revoke_permission(&self, role_id: i32, permission: &str) -> Result<bool, StoreError>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;

const USER_SELECT: &str = r#"
    SELECT u.id, u.first_name, u.last_name, u.email, u.username, u.role_id,
           r.name AS role_name, u.active, u.created_at, u.last_login_at
    FROM users u
    JOIN roles r ON r.id = u.role_id
"#;

/// PostgresRepository
///
/// `Repository` backed by PostgreSQL. All statements are parameterized.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn find_identity_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Identity>, StoreError> {
        let identity = sqlx::query_as::<_, Identity>(
            r#"SELECT u.id, u.username, u.password_hash, u.role_id, r.name AS role_name, u.active
               FROM users u
               JOIN roles r ON r.id = u.role_id
               WHERE u.username = $1 AND u.active = TRUE"#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(identity)
    }

    async fn update_password_hash(
        &self,
        user_id: i32,
        password_hash: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET password_hash = $1 WHERE id = $2")
            .bind(password_hash)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn role_has_permission(
        &self,
        role_id: i32,
        permission: &str,
    ) -> Result<bool, StoreError> {
        let granted = sqlx::query_scalar::<_, bool>(
            r#"SELECT EXISTS (
                   SELECT 1 FROM role_permissions rp
                   JOIN permissions p ON p.id = rp.permission_id
                   WHERE rp.role_id = $1 AND p.name = $2
               )"#,
        )
        .bind(role_id)
        .bind(permission)
        .fetch_one(&self.pool)
        .await?;

        Ok(granted)
    }

    async fn role_permissions(&self, role_id: i32) -> Result<Vec<String>, StoreError> {
        let names = sqlx::query_scalar::<_, String>(
            r#"SELECT p.name FROM permissions p
               JOIN role_permissions rp ON rp.permission_id = p.id
               WHERE rp.role_id = $1
               ORDER BY p.name"#,
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(names)
    }

    /// create_session
    ///
    /// Insert and last-login stamp share one transaction; the row is committed before
    /// this returns, so the caller can hand out the token.
    async fn create_session(&self, session: NewSession) -> Result<SessionRecord, StoreError> {
        let mut tx = self.pool.begin().await?;

        let record = sqlx::query_as::<_, SessionRecord>(
            r#"INSERT INTO sessions (id, user_id, token_hash, ip_address, user_agent, created_at, expires_at, active)
               VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE)
               RETURNING id, user_id, token_hash, ip_address, user_agent, created_at, expires_at, active"#,
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(&session.token_hash)
        .bind(&session.ip_address)
        .bind(&session.user_agent)
        .bind(session.created_at)
        .bind(session.expires_at)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE users SET last_login_at = $1 WHERE id = $2")
            .bind(session.created_at)
            .bind(session.user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(record)
    }

    async fn find_active_session(
        &self,
        token_hash: &str,
    ) -> Result<Option<SessionIdentity>, StoreError> {
        let session = sqlx::query_as::<_, SessionIdentity>(
            r#"SELECT s.id AS session_id, u.id AS user_id, u.username, u.role_id, r.name AS role_name
               FROM sessions s
               JOIN users u ON u.id = s.user_id
               JOIN roles r ON r.id = u.role_id
               WHERE s.token_hash = $1 AND s.active = TRUE AND u.active = TRUE"#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    async fn close_session(&self, token_hash: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE sessions SET active = FALSE, closed_at = now() WHERE token_hash = $1 AND active = TRUE",
        )
        .bind(token_hash)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_users(&self) -> Result<Vec<UserProfile>, StoreError> {
        let sql = format!("{USER_SELECT} ORDER BY u.id");
        let users = sqlx::query_as::<_, UserProfile>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }

    async fn get_user(&self, id: i32) -> Result<Option<UserProfile>, StoreError> {
        let sql = format!("{USER_SELECT} WHERE u.id = $1");
        let user = sqlx::query_as::<_, UserProfile>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn create_user(&self, user: NewUser) -> Result<UserProfile, StoreError> {
        let created = sqlx::query_as::<_, UserProfile>(
            r#"WITH inserted AS (
                   INSERT INTO users (first_name, last_name, email, username, password_hash, role_id, active)
                   VALUES ($1, $2, $3, $4, $5, $6, TRUE)
                   RETURNING *
               )
               SELECT i.id, i.first_name, i.last_name, i.email, i.username, i.role_id,
                      r.name AS role_name, i.active, i.created_at, i.last_login_at
               FROM inserted i
               JOIN roles r ON r.id = i.role_id"#,
        )
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.role_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    /// update_user
    ///
    /// Each present field of the patch becomes one bound `SET` clause; an empty patch is
    /// a plain read.
    async fn update_user(
        &self,
        id: i32,
        patch: UserPatch,
    ) -> Result<Option<UserProfile>, StoreError> {
        if patch.is_empty() {
            return self.get_user(id).await;
        }

        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("WITH updated AS (UPDATE users SET ");
        {
            let mut set = builder.separated(", ");
            if let Some(first_name) = patch.first_name {
                set.push("first_name = ").push_bind_unseparated(first_name);
            }
            if let Some(last_name) = patch.last_name {
                set.push("last_name = ").push_bind_unseparated(last_name);
            }
            if let Some(email) = patch.email {
                set.push("email = ").push_bind_unseparated(email);
            }
            if let Some(username) = patch.username {
                set.push("username = ").push_bind_unseparated(username);
            }
            if let Some(password_hash) = patch.password_hash {
                set.push("password_hash = ").push_bind_unseparated(password_hash);
            }
            if let Some(role_id) = patch.role_id {
                set.push("role_id = ").push_bind_unseparated(role_id);
            }
            if let Some(active) = patch.active {
                set.push("active = ").push_bind_unseparated(active);
            }
        }
        builder.push(" WHERE id = ");
        builder.push_bind(id);
        builder.push(
            r#" RETURNING *)
               SELECT u.id, u.first_name, u.last_name, u.email, u.username, u.role_id,
                      r.name AS role_name, u.active, u.created_at, u.last_login_at
               FROM updated u
               JOIN roles r ON r.id = u.role_id"#,
        );

        let updated = builder
            .build_query_as::<UserProfile>()
            .fetch_optional(&self.pool)
            .await?;

        Ok(updated)
    }

    async fn deactivate_user(&self, id: i32) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("UPDATE users SET active = FALSE WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE sessions SET active = FALSE, closed_at = now() WHERE user_id = $1 AND active = TRUE",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_roles(&self) -> Result<Vec<Role>, StoreError> {
        let roles = sqlx::query_as::<_, Role>("SELECT id, name FROM roles ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(roles)
    }

    async fn get_role(&self, id: i32) -> Result<Option<Role>, StoreError> {
        let role = sqlx::query_as::<_, Role>("SELECT id, name FROM roles WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(role)
    }

    async fn grant_permission(&self, role_id: i32, permission: &str) -> Result<bool, StoreError> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"WITH target AS (
                   SELECT r.id AS role_id, p.id AS permission_id
                   FROM roles r CROSS JOIN permissions p
                   WHERE r.id = $1 AND p.name = $2
               ),
               granted AS (
                   INSERT INTO role_permissions (role_id, permission_id)
                   SELECT role_id, permission_id FROM target
                   ON CONFLICT DO NOTHING
               )
               SELECT EXISTS (SELECT 1 FROM target)"#,
        )
        .bind(role_id)
        .bind(permission)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn revoke_permission(&self, role_id: i32, permission: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"DELETE FROM role_permissions rp
               USING permissions p
               WHERE rp.permission_id = p.id AND rp.role_id = $1 AND p.name = $2"#,
        )
        .bind(role_id)
        .bind(permission)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

// --- In-Memory Store ---

#[derive(Debug, Clone)]
struct StoredUser {
    profile: UserProfile,
    password_hash: String,
}

#[derive(Default)]
struct MemoryState {
    roles: BTreeMap<i32, String>,
    permissions: BTreeSet<String>,
    grants: BTreeSet<(i32, String)>,
    users: BTreeMap<i32, StoredUser>,
    // Keyed by token hash.
    sessions: HashMap<String, SessionRecord>,
    next_user_id: i32,
}

/// InMemoryRepository
///
/// A fake credential store used by the test suite. Mirrors the constraints of the
/// Postgres schema (unique username/email, role foreign key) and can simulate an
/// unreachable store or failing session writes.
#[derive(Default)]
pub struct InMemoryRepository {
    state: Mutex<MemoryState>,
    unavailable: AtomicBool,
    fail_session_writes: AtomicBool,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a role. Builder-style for test setup.
    pub fn with_role(self, id: i32, name: &str) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.roles.insert(id, name.to_string());
        }
        self
    }

    /// Adds a permission to the catalog and grants it to `role_id`.
    pub fn with_grant(self, role_id: i32, permission: &str) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.permissions.insert(permission.to_string());
            state.grants.insert((role_id, permission.to_string()));
        }
        self
    }

    /// Adds a permission to the catalog without granting it.
    pub fn with_permission(self, permission: &str) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.permissions.insert(permission.to_string());
        }
        self
    }

    /// Inserts an active user directly (bypassing validation) and returns its id.
    pub fn seed_user(&self, username: &str, password_hash: &str, role_id: i32) -> i32 {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.next_user_id += 1;
        let id = state.next_user_id;
        let role_name = state.roles.get(&role_id).cloned().unwrap_or_default();
        state.users.insert(
            id,
            StoredUser {
                profile: UserProfile {
                    id,
                    first_name: username.to_string(),
                    last_name: String::new(),
                    email: format!("{username}@universidad.test"),
                    username: username.to_string(),
                    role_id,
                    role_name,
                    active: true,
                    created_at: Utc::now(),
                    last_login_at: None,
                },
                password_hash: password_hash.to_string(),
            },
        );
        id
    }

    /// Simulates a store that cannot be reached.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes `create_session` fail with a non-retryable store error.
    pub fn set_fail_session_writes(&self, fail: bool) {
        self.fail_session_writes.store(fail, Ordering::SeqCst);
    }

    pub fn password_hash_of(&self, username: &str) -> Option<String> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .users
            .values()
            .find(|u| u.profile.username == username)
            .map(|u| u.password_hash.clone())
    }

    pub fn sessions_of(&self, user_id: i32) -> Vec<SessionRecord> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store offline".to_string()));
        }
        self.state
            .lock()
            .map_err(|_| StoreError::Other("in-memory store poisoned".to_string()))
    }
}

impl MemoryState {
    fn check_unique(&self, id: Option<i32>, username: &str, email: &str) -> Result<(), StoreError> {
        for user in self.users.values().filter(|u| Some(u.profile.id) != id) {
            if user.profile.username == username {
                return Err(StoreError::Conflict {
                    constraint: "users_username_key".to_string(),
                });
            }
            if user.profile.email == email {
                return Err(StoreError::Conflict {
                    constraint: "users_email_key".to_string(),
                });
            }
        }
        Ok(())
    }

    fn role_name(&self, role_id: i32) -> Result<String, StoreError> {
        self.roles.get(&role_id).cloned().ok_or_else(|| {
            StoreError::InvalidReference(format!("role {role_id} does not exist"))
        })
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn find_identity_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Identity>, StoreError> {
        let state = self.state()?;
        Ok(state
            .users
            .values()
            .find(|u| u.profile.active && u.profile.username == username)
            .map(|u| Identity {
                id: u.profile.id,
                username: u.profile.username.clone(),
                password_hash: u.password_hash.clone(),
                role_id: u.profile.role_id,
                role_name: u.profile.role_name.clone(),
                active: u.profile.active,
            }))
    }

    async fn update_password_hash(
        &self,
        user_id: i32,
        password_hash: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state()?;
        if let Some(user) = state.users.get_mut(&user_id) {
            user.password_hash = password_hash.to_string();
        }
        Ok(())
    }

    async fn role_has_permission(
        &self,
        role_id: i32,
        permission: &str,
    ) -> Result<bool, StoreError> {
        let state = self.state()?;
        Ok(state.grants.contains(&(role_id, permission.to_string())))
    }

    async fn role_permissions(&self, role_id: i32) -> Result<Vec<String>, StoreError> {
        let state = self.state()?;
        Ok(state
            .grants
            .iter()
            .filter(|(role, _)| *role == role_id)
            .map(|(_, name)| name.clone())
            .collect())
    }

    async fn create_session(&self, session: NewSession) -> Result<SessionRecord, StoreError> {
        let mut state = self.state()?;
        if self.fail_session_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Other("session insert rejected".to_string()));
        }
        if !state.users.contains_key(&session.user_id) {
            return Err(StoreError::InvalidReference(format!(
                "user {} does not exist",
                session.user_id
            )));
        }
        if state.sessions.contains_key(&session.token_hash) {
            return Err(StoreError::Conflict {
                constraint: "sessions_token_hash_key".to_string(),
            });
        }

        let record = SessionRecord {
            id: session.id,
            user_id: session.user_id,
            token_hash: session.token_hash.clone(),
            ip_address: session.ip_address,
            user_agent: session.user_agent,
            created_at: session.created_at,
            expires_at: session.expires_at,
            active: true,
        };
        state.sessions.insert(session.token_hash, record.clone());
        if let Some(user) = state.users.get_mut(&session.user_id) {
            user.profile.last_login_at = Some(session.created_at);
        }
        Ok(record)
    }

    async fn find_active_session(
        &self,
        token_hash: &str,
    ) -> Result<Option<SessionIdentity>, StoreError> {
        let state = self.state()?;
        let Some(session) = state.sessions.get(token_hash).filter(|s| s.active) else {
            return Ok(None);
        };
        Ok(state
            .users
            .get(&session.user_id)
            .filter(|u| u.profile.active)
            .map(|u| SessionIdentity {
                session_id: session.id,
                user_id: u.profile.id,
                username: u.profile.username.clone(),
                role_id: u.profile.role_id,
                role_name: u.profile.role_name.clone(),
            }))
    }

    async fn close_session(&self, token_hash: &str) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        match state.sessions.get_mut(token_hash) {
            Some(session) if session.active => {
                session.active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_users(&self) -> Result<Vec<UserProfile>, StoreError> {
        let state = self.state()?;
        Ok(state.users.values().map(|u| u.profile.clone()).collect())
    }

    async fn get_user(&self, id: i32) -> Result<Option<UserProfile>, StoreError> {
        let state = self.state()?;
        Ok(state.users.get(&id).map(|u| u.profile.clone()))
    }

    async fn create_user(&self, user: NewUser) -> Result<UserProfile, StoreError> {
        let mut state = self.state()?;
        state.check_unique(None, &user.username, &user.email)?;
        let role_name = state.role_name(user.role_id)?;

        state.next_user_id += 1;
        let profile = UserProfile {
            id: state.next_user_id,
            first_name: user.first_name,
            last_name: user.last_name,
            email: user.email,
            username: user.username,
            role_id: user.role_id,
            role_name,
            active: true,
            created_at: Utc::now(),
            last_login_at: None,
        };
        state.users.insert(
            profile.id,
            StoredUser {
                profile: profile.clone(),
                password_hash: user.password_hash,
            },
        );
        Ok(profile)
    }

    async fn update_user(
        &self,
        id: i32,
        patch: UserPatch,
    ) -> Result<Option<UserProfile>, StoreError> {
        let mut state = self.state()?;
        let Some(current) = state.users.get(&id).cloned() else {
            return Ok(None);
        };

        let username = patch
            .username
            .clone()
            .unwrap_or_else(|| current.profile.username.clone());
        let email = patch
            .email
            .clone()
            .unwrap_or_else(|| current.profile.email.clone());
        state.check_unique(Some(id), &username, &email)?;

        let mut updated = current;
        if let Some(role_id) = patch.role_id {
            updated.profile.role_name = state.role_name(role_id)?;
            updated.profile.role_id = role_id;
        }
        if let Some(first_name) = patch.first_name {
            updated.profile.first_name = first_name;
        }
        if let Some(last_name) = patch.last_name {
            updated.profile.last_name = last_name;
        }
        if let Some(active) = patch.active {
            updated.profile.active = active;
        }
        if let Some(password_hash) = patch.password_hash {
            updated.password_hash = password_hash;
        }
        updated.profile.username = username;
        updated.profile.email = email;

        let profile = updated.profile.clone();
        state.users.insert(id, updated);
        Ok(Some(profile))
    }

    async fn deactivate_user(&self, id: i32) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        let Some(user) = state.users.get_mut(&id) else {
            return Ok(false);
        };
        user.profile.active = false;
        for session in state.sessions.values_mut().filter(|s| s.user_id == id) {
            session.active = false;
        }
        Ok(true)
    }

    async fn list_roles(&self) -> Result<Vec<Role>, StoreError> {
        let state = self.state()?;
        Ok(state
            .roles
            .iter()
            .map(|(id, name)| Role {
                id: *id,
                name: name.clone(),
            })
            .collect())
    }

    async fn get_role(&self, id: i32) -> Result<Option<Role>, StoreError> {
        let state = self.state()?;
        Ok(state.roles.get(&id).map(|name| Role {
            id,
            name: name.clone(),
        }))
    }

    async fn grant_permission(&self, role_id: i32, permission: &str) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        if !state.roles.contains_key(&role_id) || !state.permissions.contains(permission) {
            return Ok(false);
        }
        state.grants.insert((role_id, permission.to_string()));
        Ok(true)
    }

    async fn revoke_permission(&self, role_id: i32, permission: &str) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        Ok(state.grants.remove(&(role_id, permission.to_string())))
    }
}
