//! docsync core library: domain types, configuration, errors.
//!
//! - [`types`]: documents, namespaces, fingerprints, pool bounds
//! - [`config`]: YAML / key-value configuration loading
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod types;

pub use config::{AppConfig, ArchiveConfig, StoreConfig, TunnelConfig};
pub use error::ConfigError;
pub use types::{CollectionName, Document, Fingerprint, Namespace, PoolBounds};
