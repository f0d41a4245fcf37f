//! Node classification
//!
//! Classification is structural, not declared. Rules are applied in order, first match wins:
//!
//! 1. reached via an "item" relation ⇒ Item
//! 2. has an `extent` field or the type marker "Collection" ⇒ Collection
//! 3. otherwise ⇒ Catalog

use crate::document::Document;
use crate::node::NodeKind;
use serde_json::Value;

/// Relation followed from a Catalog to its sub-catalogs and collections
pub const CHILD_REL: &str = "child";

/// Relation followed from a Collection to its items
pub const ITEM_REL: &str = "item";

const COLLECTION_MARKER: &str = "Collection";

/// Result of classifying a fetched document
#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    pub kind: NodeKind,
    pub document: Document,
    /// Catalog with neither child nor item links (treated as an empty catalog)
    pub ambiguous: bool,
}

/// Classify a parsed document reached through `rel` (`None` for the root)
pub fn classify(value: Value, rel: Option<&str>) -> serde_json::Result<Classified> {
    let document = Document::from_value(value)?;
    let kind = kind_of(&document, rel);

    let ambiguous = kind == NodeKind::Catalog
        && !document.has_links_with_rel(CHILD_REL)
        && !document.has_links_with_rel(ITEM_REL);

    Ok(Classified {
        kind,
        document,
        ambiguous,
    })
}

fn kind_of(document: &Document, rel: Option<&str>) -> NodeKind {
    if rel == Some(ITEM_REL) {
        return NodeKind::Item;
    }
    if document.extent.is_some() || document.type_marker.as_deref() == Some(COLLECTION_MARKER) {
        return NodeKind::Collection;
    }
    NodeKind::Catalog
}
