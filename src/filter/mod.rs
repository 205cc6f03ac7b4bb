pub mod attributes;
pub mod comparer;
pub mod engine;
pub mod query;
pub mod selector;
pub mod template;

pub use attributes::attribute_name;
pub use comparer::Comparer;
pub use engine::FilterEngine;
pub use query::{Operator, QueryNode, SearchQuery, SearchTree};
pub use selector::{priority_query, resolve_priorities, FilterSelection, FilterSetSelector};
pub use template::{
    parse_filter_template, Filter, FilterSet, FilterTemplate, FolderDefinition, TagDefinition, TagValue,
};
