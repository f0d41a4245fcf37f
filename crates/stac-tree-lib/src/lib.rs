//! STAC Tree Library - Lazy Catalog Tree and Incremental Search Index
//!
//! This library materializes a browsable tree from a linked set of remote STAC JSON documents.
//! Catalogs are descended eagerly, Collections record their item links and only fetch them the
//! first time they are expanded, and every node carries a normalized text fingerprint used to
//! filter the visible tree by free-text search.
//!
//! # Architecture
//!
//! - **[`DocumentFetcher`]**: Resolves references and retrieves JSON documents (HTTP, file, memory)
//! - **[`classify()`]**: Decides whether a fetched document is a Catalog, Collection or Item
//! - **[`CatalogTree`]**: Arena of nodes with parent/child links, load state and change events
//! - **[`ExpansionLatch`]**: Per-node "load once" guard shared by concurrent expansion requests
//! - **[`SearchIndex`]**: Fingerprints and query evaluation with ancestor-visibility propagation
//!
//! # Load Model
//!
//! - **Root load**: fetch root, classify, then depth-first descent over "child" links
//! - **Expansion**: fetch "item" links of a Collection exactly once (retry allowed after failure)
//! - **Failures**: root failure is fatal; any other failure is recorded on the node it concerns

pub mod classify;
pub mod document;
mod event;
pub mod fetcher;
mod latch;
mod node;
pub mod search;
mod tree;

// Public API exports
pub use classify::{CHILD_REL, Classified, ITEM_REL, classify};
pub use event::TreeEvent;
pub use fetcher::{DocumentFetcher, FetchFailure, HttpFetcher, MemoryFetcher};
pub use latch::{ExpansionLatch, LoadState};
pub use node::{
    Asset, Descriptor, Footprint, ItemDetails, Node, NodeId, NodeKind, NodeView, Payload,
};
pub use search::{FingerprintOptions, SearchIndex, VisibilitySet};
pub use tree::{CatalogTree, Config, LoadReport};

/// Error types for the tree
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TreeError {
    #[error(transparent)]
    Fetch(#[from] FetchFailure),

    #[error("Root document {location} contains no usable links")]
    NoUsableLinks { location: String },

    #[error("Expansion of {location} failed for {} of {attempted} items", .failures.len())]
    Expansion {
        location: String,
        attempted: usize,
        failures: Vec<FetchFailure>,
    },

    #[error("Catalog {location} is nested deeper than the maximum depth of {max_depth}")]
    DepthExceeded { location: String, max_depth: usize },

    #[error("Load of {location} was superseded by a newer load")]
    Superseded { location: String },

    #[error("Node {0} is not a collection")]
    NotACollection(NodeId),

    #[error("Node {0} is not a catalog")]
    NotACatalog(NodeId),

    #[error("Unknown node {0}")]
    UnknownNode(NodeId),
}

pub type Result<T> = std::result::Result<T, TreeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that all public types are accessible
        let _: fn() -> Config = Config::default;
        let _: fn(FingerprintOptions) -> SearchIndex = SearchIndex::new;
        let _: fn() -> MemoryFetcher = MemoryFetcher::new;
    }

    #[test]
    fn test_expansion_error_message_counts_failures() {
        let err = TreeError::Expansion {
            location: "https://host/collection.json".to_string(),
            attempted: 3,
            failures: vec![FetchFailure::new("https://host/a.json", "404 Not Found")],
        };
        assert_eq!(
            err.to_string(),
            "Expansion of https://host/collection.json failed for 1 of 3 items"
        );
    }

    #[test]
    fn test_fetch_error_is_transparent() {
        let err: TreeError = FetchFailure::new("https://host/x.json", "timed out").into();
        assert_eq!(err.to_string(), "Failed to load https://host/x.json: timed out");
    }
}
