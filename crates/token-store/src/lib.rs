//! OAuth2 token store on a document database.
//!
//! A grant with an access token touches three collections: the serialized
//! payload, the access token index, and an optional refresh token index.
//! [`TokenStore`] writes them atomically, through a native transaction on
//! replica sets and through an intent-logged saga everywhere else.
//!
//! [`ClientStore`] keeps registered client credentials.

pub mod client;
pub mod config;
pub mod error;
pub mod store;

pub use client::{ClientRecord, ClientStore};
pub use config::StoreConfig;
pub use error::{Result, TokenStoreError};
pub use store::TokenStore;

pub use common::{ClientInfo, Credential, TokenInfo};
pub use saga::SweepReport;
