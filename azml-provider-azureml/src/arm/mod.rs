//! Azure Resource Manager plumbing: authentication, HTTP client and typed IDs

pub mod auth;
pub mod client;
pub mod error;
pub mod id;

pub use auth::{ClientSecretCredential, StaticTokenCredential, TokenCredential};
pub use client::{ArmClient, DEFAULT_ENDPOINT};
pub use error::ArmError;
pub use id::IdParseError;
