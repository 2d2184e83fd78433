//! Authentication module for Clubboard

pub mod jwt;
pub mod middleware;
#[cfg(test)]
mod middleware_tests;

pub use jwt::{Claims, JwtVerifier, Role};
pub use middleware::{require_admin, require_club, AuthError, AuthState, AuthUser};
