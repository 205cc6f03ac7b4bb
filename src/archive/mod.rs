pub mod extract;
pub mod handle;
pub mod source_index;

pub use extract::ExtractedArchive;
pub use handle::{
    FprArchive, AUDIT_ENTRY, FILTER_TEMPLATE_ENTRY, FVDL_ENTRY, REMEDIATIONS_ENTRY,
    SOURCE_INDEX_ENTRY,
};
