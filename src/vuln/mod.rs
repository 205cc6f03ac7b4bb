pub mod attributes;
pub mod builder;
pub mod finalizer;
pub mod model;

pub use attributes::{AttributeValue, Searchable, ALL_SEARCH_FIELDS};
pub use builder::VulnerabilityBuilder;
pub use finalizer::{CategoryFallbacks, CategoryScores};
pub use model::{AuditState, Priority, RequestData, SourceFile, Vulnerability};
