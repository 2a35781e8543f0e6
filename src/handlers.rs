use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};

use crate::{
    AppState,
    activity::{ActivityRecord, record_activity},
    auth::{
        AuthUser, RequestMeta, bearer_token, credentials,
        permissions::{
            Authorized, RolesEdit, RolesView, UsersCreate, UsersDelete, UsersEdit, UsersView,
        },
        session, token,
    },
    errors::{AppError, ErrorBody},
    models::{
        CreateUserRequest, LoginRequest, LoginResponse, LoginUser, MeResponse, MessageResponse,
        NewUser, Role, UpdateUserRequest, UserPatch, UserProfile,
    },
    password,
};

fn require_non_empty(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::BadRequest {
            message: format!("{field} must not be empty"),
        });
    }
    Ok(())
}

async fn require_role(state: &AppState, role_id: i32) -> Result<(), AppError> {
    match state.repo.get_role(role_id).await? {
        Some(_) => Ok(()),
        None => Err(AppError::BadRequest {
            message: format!("Role {role_id} does not exist"),
        }),
    }
}

// --- Authentication ---

/// login
///
/// [Public Route] Verifies credentials, issues a token bound to a new session row and
/// returns the identity with its role's permissions.
///
/// Unknown login name and wrong password produce the same 401.
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = LoginResponse),
        (status = 400, description = "Missing username or password", body = ErrorBody),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
        (status = 503, description = "Store unavailable", body = ErrorBody)
    )
)]
pub async fn login(
    State(state): State<AppState>,
    meta: RequestMeta,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    if payload.username.is_empty() || payload.password.is_empty() {
        return Err(AppError::BadRequest {
            message: "Username and password are required".to_string(),
        });
    }

    let identity = credentials::verify_credentials(
        state.repo.as_ref(),
        &state.config.legacy,
        state.config.hashing,
        &payload.username,
        &payload.password,
    )
    .await?;

    // Read before issuing so a failure here cannot leave a session nobody holds a token for.
    let permissions = state.repo.role_permissions(identity.role_id).await?;

    let issued = session::issue_session(
        state.repo.as_ref(),
        &state.config.jwt_secret,
        &identity,
        &meta,
    )
    .await?;

    record_activity(
        state.activity.as_ref(),
        ActivityRecord::new(
            "login",
            Some(identity.id),
            Some(identity.username.clone()),
            &meta,
        ),
    )
    .await;

    Ok(Json(LoginResponse {
        user: LoginUser {
            id: identity.id,
            username: identity.username,
            role: Role {
                id: identity.role_id,
                name: identity.role_name,
            },
            permissions,
        },
        token: issued.token,
        session_id: issued.session_id,
    }))
}

/// logout
///
/// [Public Route] Closes the session bound to the bearer token. Idempotent: a missing,
/// unknown, expired or already closed token still gets a 200.
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses(
        (status = 200, description = "Session closed", body = MessageResponse),
        (status = 503, description = "Store unavailable", body = ErrorBody)
    )
)]
pub async fn logout(
    State(state): State<AppState>,
    meta: RequestMeta,
    headers: HeaderMap,
) -> Result<Json<MessageResponse>, AppError> {
    let bearer = bearer_token(&headers);

    let closed = match bearer {
        Some(presented) => session::terminate_session(state.repo.as_ref(), presented).await?,
        None => false,
    };

    // Expired tokens still name their holder for the activity record.
    let holder =
        bearer.and_then(|t| token::decode_token_ignoring_expiry(t, &state.config.jwt_secret).ok());
    record_activity(
        state.activity.as_ref(),
        ActivityRecord::new(
            "logout",
            holder.as_ref().and_then(|claims| claims.identity_id()),
            holder.map(|claims| claims.username),
            &meta,
        ),
    )
    .await;

    let message = if closed {
        "Session closed successfully"
    } else {
        "Session closed"
    };
    Ok(Json(MessageResponse::new(message)))
}

/// get_me
///
/// [Authenticated Route] The caller's authenticated context and current permissions.
#[utoipa::path(
    get,
    path = "/api/auth/me",
    responses(
        (status = 200, description = "Current identity", body = MeResponse),
        (status = 401, description = "Not authenticated", body = ErrorBody)
    )
)]
pub async fn get_me(
    user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<MeResponse>, AppError> {
    let permissions = state.repo.role_permissions(user.role_id).await?;

    Ok(Json(MeResponse {
        id: user.id,
        username: user.username,
        role: Role {
            id: user.role_id,
            name: user.role_name,
        },
        session_id: user.session_id,
        permissions,
    }))
}

// --- User Administration ---

/// list_users
///
/// [users.view] Every user account, active or not, ordered by id.
#[utoipa::path(
    get,
    path = "/api/users",
    responses(
        (status = 200, description = "Users", body = [UserProfile]),
        (status = 401, description = "Not authenticated", body = ErrorBody),
        (status = 403, description = "Missing users.view", body = ErrorBody)
    )
)]
pub async fn list_users(
    _: Authorized<UsersView>,
    State(state): State<AppState>,
) -> Result<Json<Vec<UserProfile>>, AppError> {
    Ok(Json(state.repo.list_users().await?))
}

/// get_user
///
/// [users.view]
#[utoipa::path(
    get,
    path = "/api/users/{id}",
    params(("id" = i32, Path, description = "User ID")),
    responses(
        (status = 200, description = "Found", body = UserProfile),
        (status = 404, description = "Not Found", body = ErrorBody)
    )
)]
pub async fn get_user(
    _: Authorized<UsersView>,
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<UserProfile>, AppError> {
    state
        .repo
        .get_user(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound {
            resource: "User".to_string(),
        })
}

/// create_user
///
/// [users.create] Provisions an active account. The password is stored as an Argon2id
/// hash only.
#[utoipa::path(
    post,
    path = "/api/users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "Created", body = UserProfile),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 409, description = "Username or email taken", body = ErrorBody)
    )
)]
pub async fn create_user(
    Authorized { user, .. }: Authorized<UsersCreate>,
    State(state): State<AppState>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserProfile>), AppError> {
    require_non_empty("first_name", &payload.first_name)?;
    require_non_empty("last_name", &payload.last_name)?;
    require_non_empty("email", &payload.email)?;
    require_non_empty("username", &payload.username)?;
    require_non_empty("password", &payload.password)?;
    require_role(&state, payload.role_id).await?;

    let password_hash = password::hash_password(&payload.password, state.config.hashing).await?;

    let created = state
        .repo
        .create_user(NewUser {
            first_name: payload.first_name,
            last_name: payload.last_name,
            email: payload.email,
            username: payload.username,
            password_hash,
            role_id: payload.role_id,
        })
        .await?;

    tracing::info!(user_id = created.id, created_by = user.id, "user created");
    Ok((StatusCode::CREATED, Json(created)))
}

/// update_user
///
/// [users.edit] Partial update: only the fields present in the body change. A new
/// password is re-hashed before storage.
#[utoipa::path(
    put,
    path = "/api/users/{id}",
    params(("id" = i32, Path, description = "User ID")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "Updated", body = UserProfile),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 404, description = "Not Found", body = ErrorBody),
        (status = 409, description = "Username or email taken", body = ErrorBody)
    )
)]
pub async fn update_user(
    Authorized { user, .. }: Authorized<UsersEdit>,
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<UserProfile>, AppError> {
    for (field, value) in [
        ("first_name", &payload.first_name),
        ("last_name", &payload.last_name),
        ("email", &payload.email),
        ("username", &payload.username),
        ("password", &payload.password),
    ] {
        if let Some(value) = value {
            require_non_empty(field, value)?;
        }
    }
    if let Some(role_id) = payload.role_id {
        require_role(&state, role_id).await?;
    }

    let password_hash = match &payload.password {
        Some(plain) => Some(password::hash_password(plain, state.config.hashing).await?),
        None => None,
    };

    let patch = UserPatch {
        first_name: payload.first_name,
        last_name: payload.last_name,
        email: payload.email,
        username: payload.username,
        password_hash,
        role_id: payload.role_id,
        active: payload.active,
    };

    let updated = state
        .repo
        .update_user(id, patch)
        .await?
        .ok_or_else(|| AppError::NotFound {
            resource: "User".to_string(),
        })?;

    tracing::info!(user_id = id, updated_by = user.id, "user updated");
    Ok(Json(updated))
}

/// delete_user
///
/// [users.delete] Soft deactivation; the row is kept. The user's sessions are closed.
#[utoipa::path(
    delete,
    path = "/api/users/{id}",
    params(("id" = i32, Path, description = "User ID")),
    responses(
        (status = 200, description = "Deactivated", body = MessageResponse),
        (status = 404, description = "Not Found", body = ErrorBody)
    )
)]
pub async fn delete_user(
    Authorized { user, .. }: Authorized<UsersDelete>,
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<MessageResponse>, AppError> {
    if !state.repo.deactivate_user(id).await? {
        return Err(AppError::NotFound {
            resource: "User".to_string(),
        });
    }

    tracing::info!(user_id = id, deactivated_by = user.id, "user deactivated");
    Ok(Json(MessageResponse::new("User deactivated")))
}

// --- Roles & Grants ---

/// list_roles
///
/// [roles.view]
#[utoipa::path(
    get,
    path = "/api/roles",
    responses((status = 200, description = "Roles", body = [Role]))
)]
pub async fn list_roles(
    _: Authorized<RolesView>,
    State(state): State<AppState>,
) -> Result<Json<Vec<Role>>, AppError> {
    Ok(Json(state.repo.list_roles().await?))
}

/// get_role_permissions
///
/// [roles.view] Permission names granted to a role, sorted.
#[utoipa::path(
    get,
    path = "/api/roles/{id}/permissions",
    params(("id" = i32, Path, description = "Role ID")),
    responses(
        (status = 200, description = "Granted permissions", body = [String]),
        (status = 404, description = "Not Found", body = ErrorBody)
    )
)]
pub async fn get_role_permissions(
    _: Authorized<RolesView>,
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<Vec<String>>, AppError> {
    if state.repo.get_role(id).await?.is_none() {
        return Err(AppError::NotFound {
            resource: "Role".to_string(),
        });
    }
    Ok(Json(state.repo.role_permissions(id).await?))
}

/// grant_permission
///
/// [roles.edit] Takes effect on the very next permission check.
#[utoipa::path(
    put,
    path = "/api/roles/{id}/permissions/{name}",
    params(
        ("id" = i32, Path, description = "Role ID"),
        ("name" = String, Path, description = "Permission name")
    ),
    responses(
        (status = 204, description = "Granted"),
        (status = 404, description = "Unknown role or permission", body = ErrorBody)
    )
)]
pub async fn grant_permission(
    Authorized { user, .. }: Authorized<RolesEdit>,
    State(state): State<AppState>,
    Path((role_id, permission)): Path<(i32, String)>,
) -> Result<StatusCode, AppError> {
    if !state.repo.grant_permission(role_id, &permission).await? {
        return Err(AppError::NotFound {
            resource: "Role or permission".to_string(),
        });
    }

    tracing::info!(role_id, permission = %permission, granted_by = user.id, "permission granted");
    Ok(StatusCode::NO_CONTENT)
}

/// revoke_permission
///
/// [roles.edit] Idempotent.
#[utoipa::path(
    delete,
    path = "/api/roles/{id}/permissions/{name}",
    params(
        ("id" = i32, Path, description = "Role ID"),
        ("name" = String, Path, description = "Permission name")
    ),
    responses((status = 204, description = "Revoked"))
)]
pub async fn revoke_permission(
    Authorized { user, .. }: Authorized<RolesEdit>,
    State(state): State<AppState>,
    Path((role_id, permission)): Path<(i32, String)>,
) -> Result<StatusCode, AppError> {
    if state.repo.revoke_permission(role_id, &permission).await? {
        tracing::info!(role_id, permission = %permission, revoked_by = user.id, "permission revoked");
    }
    Ok(StatusCode::NO_CONTENT)
}
