//! JSON file import/export for graph documents.

use std::path::Path;

use tracing::info;

use loom_core::document::GraphDocument;

use crate::error::StoreError;

/// Write the document as pretty JSON, creating parent directories.
/// The file is written to a sibling temp path first and renamed into place.
pub fn export_json(doc: &GraphDocument, path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = doc.to_json()?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    info!(graph_id = %doc.name, path = %path.display(), "graph exported");
    Ok(())
}

pub fn import_json(path: &Path) -> Result<GraphDocument, StoreError> {
    let raw = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => StoreError::NotFound(path.display().to_string()),
        _ => StoreError::Io(e.to_string()),
    })?;
    Ok(GraphDocument::from_json(&raw)?)
}
