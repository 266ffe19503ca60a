//! Container registry access.
//!
//! Only what tag resolution needs: normalize an image name, run the v2
//! ping/challenge handshake and list every tag of one repository.
//!
//! ## Architecture
//!
//! - `reference`: image splitting and docker-style name normalization
//! - `challenge`: `WWW-Authenticate` parsing from the `/v2/` ping
//! - `auth`: credentials and the bearer/basic authorizer
//! - `client`: the [`TagLister`] implementation over HTTP
//!
//! ## Example
//!
//! ```rust,ignore
//! use tag_resolver::registry::{RegistryClient, RegistryClientConfig};
//!
//! let client = RegistryClient::new(RegistryClientConfig::default())?;
//! let tags = client.tags(None, "alpine").await?;
//! ```

pub mod auth;
pub mod challenge;
pub mod client;
pub mod error;
pub mod reference;

pub use auth::{Authorizer, Credential};
pub use challenge::{Challenge, ChallengeContext};
pub use client::{RegistryClient, RegistryClientConfig, TagLister};
pub use error::RegistryError;
pub use reference::{ImageName, ReferenceError, split_image};
