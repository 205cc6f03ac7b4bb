pub mod model;
pub mod parser;

pub use model::*;
pub use parser::parse_fvdl;
