pub mod credentials;
pub mod parser;
pub mod schema;
pub mod security;
pub mod types;

pub use types::*;
pub use parser::{load_tag_mapping, parse_config, validate_conflicts};
