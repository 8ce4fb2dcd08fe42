//! Rowguard Core - row-level authorization engine
//!
//! Multi-tenant, role-hierarchical access control over identities,
//! organizations and the protected resources identities own.

pub mod api;
pub mod config;
pub mod context;
pub mod domain;
pub mod error;
pub mod middleware;
pub mod migration;
pub mod policy;
pub mod repository;
pub mod resolver;
pub mod server;
pub mod service;
pub mod state;
pub mod telemetry;

// Re-export commonly used types
pub use config::Config;
pub use error::{AppError, Result};
