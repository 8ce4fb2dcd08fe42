//! HTTP middleware for Rowguard Core

pub mod auth;

pub use auth::{AuthError, AuthPrincipal, PrincipalTokenReader};
