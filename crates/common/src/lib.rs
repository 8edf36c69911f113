//! Shared types for the OAuth2 token store workspace.

pub mod client;
pub mod token;
pub mod types;

pub use client::ClientInfo;
pub use token::{Credential, TokenInfo};
pub use types::{RunId, new_record_id};
