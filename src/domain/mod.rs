//! Classification domain: value objects, the ordered association aggregate
//! and the events raised when it changes.

pub mod aggregates;
pub mod events;
pub mod value_objects;

pub use aggregates::{Classification, Member, OrderedAssociation};
pub use events::ClassificationEvent;
pub use value_objects::{ClassificationId, ItemKind, ItemRef, TaxonId};
