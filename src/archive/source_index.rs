use std::collections::HashMap;

use tracing::debug;

use crate::errors::AuditError;
use crate::utils::xml::parse_document;

/// Parse the properties-style source manifest:
/// `<entry key="relative/path">src-archive/internal/path</entry>`.
pub fn parse_source_index(bytes: &[u8]) -> Result<HashMap<String, String>, AuditError> {
    let root = parse_document(bytes)?;
    let mut index = HashMap::new();
    for entry in root.children_named("entry") {
        let Some(key) = entry.attr("key") else {
            debug!("Skipping source index entry without key");
            continue;
        };
        let internal = entry.text().trim().to_string();
        if internal.is_empty() {
            continue;
        }
        index.insert(key.to_string(), internal);
    }
    Ok(index)
}
