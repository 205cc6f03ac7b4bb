pub mod markup;
pub mod render;
pub mod template;

pub use markup::strip_tags;
pub use render::{DescriptionRenderer, RenderContext};
pub use template::{parse_template, TemplateNode};
