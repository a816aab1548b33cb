/// Router Module Index
///
/// Routes are split by who may reach them. Access control is attached to each router
/// as a layer in `create_router`, never left to individual handlers.

/// Routes open to anonymous callers (sign-in, registration, token refresh).
/// Login and registration additionally sit behind the stricter auth limiter.
pub mod public;

/// Routes behind the auth gate. Any role is accepted.
pub mod authenticated;

/// Routes behind the auth gate and the admin role guard.
pub mod admin;
