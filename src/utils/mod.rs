pub mod formatting;
pub mod text;
pub mod truncation;
pub mod xml;
