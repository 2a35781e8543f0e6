/// Router Module Index
///
/// Routes are split by how much the caller must prove before a handler runs.

/// Routes open to anonymous callers: health, login, logout.
pub mod public;

/// Routes behind the `auth_middleware` route layer: any live session.
pub mod authenticated;

/// User and role administration. Every handler takes an `Authorized<C>` extractor naming
/// the permission it requires.
pub mod admin;
