//! OpenSASE Catalog Classifications
//!
//! Keeps catalog items (products and greeting cards) in order under the
//! taxons they are filed in.
//!
//! ## Features
//! - Per-taxon ordered lists with dense 1-based positions
//! - Create, reposition, delete and wholesale replacement from either side
//! - Per-taxon serialization over an in-memory or PostgreSQL store
//! - Taxon previews for storefront listings
//! - HTTP API with 0-indexed repositioning for sortable admin lists

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod preview;
pub mod store;

pub use config::Config;
pub use domain::{Classification, ClassificationEvent, ClassificationId, ItemKind, ItemRef, OrderedAssociation, TaxonId};
pub use error::{ClassificationError, Result};
pub use store::{ClassificationStore, InMemoryClassificationStore, PgClassificationStore};
