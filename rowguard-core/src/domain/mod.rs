//! Domain models for Rowguard Core

pub mod common;
pub mod identity;
pub mod organization;
pub mod principal;
pub mod resource;
pub mod role;

pub use common::*;
pub use identity::*;
pub use organization::*;
pub use principal::*;
pub use resource::*;
pub use role::*;
