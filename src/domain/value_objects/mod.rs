//! Value Objects for classifications

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Taxon identity. Taxons live elsewhere; only the key is known here.
pub type TaxonId = Uuid;

/// Identity of a single classification record.
pub type ClassificationId = Uuid;

/// The kinds of catalog item that can be filed under a taxon.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Product,
    Greetingcard,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Product => "product", Self::Greetingcard => "greetingcard" }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for ItemKind {
    type Err = ItemKindError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "product" => Ok(Self::Product),
            "greetingcard" => Ok(Self::Greetingcard),
            other => Err(ItemKindError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)] pub struct ItemKindError(pub String);
impl std::error::Error for ItemKindError {}
impl fmt::Display for ItemKindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "Unknown item kind: {}", self.0) }
}

/// Opaque catalog item identity: which kind of item, and which one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemRef {
    pub kind: ItemKind,
    pub id: Uuid,
}

impl ItemRef {
    pub fn new(kind: ItemKind, id: Uuid) -> Self { Self { kind, id } }
    pub fn product(id: Uuid) -> Self { Self::new(ItemKind::Product, id) }
    pub fn greetingcard(id: Uuid) -> Self { Self::new(ItemKind::Greetingcard, id) }
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}:{}", self.kind, self.id) }
}
