//! Plain-text rendering of retrieved documents.

use crate::retrieval::RetrievedDocument;
use std::fmt::Write;

/// Render documents as the context block handed to the model.
///
/// Order is preserved and documents are numbered from 1. Metadata is
/// printed as compact JSON.
pub fn render_context(documents: &[RetrievedDocument]) -> String {
    let mut out = String::from("Context:\n\n");
    for (idx, doc) in documents.iter().enumerate() {
        let metadata = serde_json::to_string(&doc.metadata).unwrap_or_else(|_| "{}".into());
        let _ = write!(
            out,
            "Document {}:\nContent: {}\nMetadata: {}\n\n",
            idx + 1,
            doc.content,
            metadata
        );
    }
    out
}
