//! Aggregates module
pub mod classification;
pub mod ordered_association;

pub use classification::{Classification, TaxonClassifications};
pub use ordered_association::{stamp, AssociationError, Member, OrderedAssociation, Reordered};
