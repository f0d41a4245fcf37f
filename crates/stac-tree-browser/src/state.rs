//! Browser state management
//!
//! Holds the catalog tree together with the settings that drive one browsing session, and runs
//! the load, expand and query steps in order.

use crate::settings::Settings;
use futures::future::join_all;
use serde::Serialize;
use stac_tree_lib::{
    CatalogTree, DocumentFetcher, LoadReport, LoadState, NodeId, NodeKind, TreeError, TreeEvent,
    VisibilitySet,
};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

/// Main browser state
pub struct BrowserState {
    /// Lazily loaded catalog tree
    pub tree: CatalogTree,

    /// Settings of this session
    pub settings: Settings,

    /// Outcome of the last root load
    pub report: Option<LoadReport>,

    /// Expansions that failed, by Collection
    pub expansion_errors: Vec<(NodeId, TreeError)>,
}

/// Statistics about loaded data
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub catalogs: usize,
    pub collections: usize,
    /// Collections whose items are materialized
    pub loaded_collections: usize,
    pub items: usize,
    /// Localized failures recorded across all nodes
    pub failures: usize,
    /// Nodes visible under the active query
    pub visible: usize,
}

impl Stats {
    pub fn collect(tree: &CatalogTree) -> Self {
        let catalogs = tree.nodes_of_kind(NodeKind::Catalog);
        let collections = tree.nodes_of_kind(NodeKind::Collection);
        let items = tree.nodes_of_kind(NodeKind::Item);

        let loaded_collections = collections
            .iter()
            .filter(|&&id| matches!(tree.load_state(id), Ok(Some(LoadState::Loaded))))
            .count();
        let failures = catalogs
            .iter()
            .chain(&collections)
            .chain(&items)
            .filter_map(|&id| tree.with_node(id, |node| node.failures().len()).ok())
            .sum();

        Self {
            catalogs: catalogs.len(),
            collections: collections.len(),
            loaded_collections,
            items: items.len(),
            failures,
            visible: tree.visibility().len(),
        }
    }
}

impl BrowserState {
    /// Create new browser state from CLI settings
    pub fn new(settings: Settings, fetcher: Arc<dyn DocumentFetcher>) -> Self {
        let tree = CatalogTree::new(fetcher, settings.tree_config());
        Self {
            tree,
            settings,
            report: None,
            expansion_errors: Vec::new(),
        }
    }

    /// Load the tree from the configured root
    pub async fn load(&mut self) -> Result<&LoadReport, TreeError> {
        let reference = self.settings.root_reference();
        let report = self.tree.load_root(&reference).await?;
        for (node, error) in &report.failures {
            tracing::warn!(%node, "{error}");
        }
        Ok(self.report.insert(report))
    }

    /// Open and expand the nodes named by `--expand`, or every Collection with `--expand-all`
    ///
    /// Returns the number of Collections that expanded without error.
    pub async fn expand_requested(&mut self) -> usize {
        let targets: Vec<NodeId> = if self.settings.expand_all {
            self.tree.nodes_of_kind(NodeKind::Collection)
        } else {
            let mut targets = Vec::new();
            for id in &self.settings.expand {
                let found = self.tree.find_by_document_id(id);
                if found.is_empty() {
                    tracing::warn!(id, "No node with this id to expand");
                }
                targets.extend(found);
            }
            targets
        };

        let mut collections = Vec::new();
        for node in targets {
            if let Err(error) = self.tree.set_open(node, true) {
                tracing::warn!(%node, "{error}");
                continue;
            }
            if matches!(self.tree.with_node(node, |n| n.kind()), Ok(NodeKind::Collection)) {
                collections.push(node);
            }
        }

        let outcomes = join_all(
            collections
                .iter()
                .map(|&node| self.tree.request_expansion(node)),
        )
        .await;

        let mut expanded = 0;
        for (node, outcome) in collections.into_iter().zip(outcomes) {
            match outcome {
                Ok(()) => expanded += 1,
                Err(error) => {
                    tracing::warn!(%node, "{error}");
                    self.expansion_errors.push((node, error));
                }
            }
        }
        expanded
    }

    /// Apply the configured query
    pub fn apply_query(&self) -> VisibilitySet {
        self.tree.set_query(&self.settings.query)
    }

    pub fn stats(&self) -> Stats {
        Stats::collect(&self.tree)
    }
}

/// Log tree events until the tree is dropped
pub fn spawn_event_log(tree: &CatalogTree) -> tokio::task::JoinHandle<()> {
    let mut events = tree.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(TreeEvent::NodeFailed { node, error }) => {
                    tracing::debug!(%node, "Failure recorded: {error}");
                }
                Ok(TreeEvent::RootLoaded { root }) => tracing::debug!(%root, "Root loaded"),
                Ok(event) => tracing::trace!(?event, "Tree changed"),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Event log fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use clap::Parser;
    use serde_json::json;
    use stac_tree_lib::MemoryFetcher;

    pub(crate) const ROOT: &str = "https://host/stac/catalog.json";

    /// catalog ─┬─ land (empty catalog)
    ///          └─ ice (collection) ─┬─ melt (item)
    ///                               └─ dry (item)
    pub(crate) fn fixture() -> MemoryFetcher {
        MemoryFetcher::new()
            .with_document(
                ROOT,
                json!({
                    "id": "root",
                    "title": "Earth",
                    "links": [
                        {"rel": "license", "href": "./LICENSE", "title": "Data license"},
                        {"rel": "child", "href": "./land/catalog.json"},
                        {"rel": "child", "href": "./ice/collection.json"}
                    ]
                }),
            )
            .with_document("https://host/stac/land/catalog.json", json!({"id": "land"}))
            .with_document(
                "https://host/stac/ice/collection.json",
                json!({
                    "id": "ice",
                    "title": "Ice sheets",
                    "description": "Polar ice extent",
                    "keywords": ["cryosphere", "glaciers"],
                    "providers": [{"name": "Polar Agency", "roles": ["producer", "host"]}],
                    "extent": {},
                    "links": [
                        {"rel": "item", "href": "./melt.json"},
                        {"rel": "item", "href": "./dry.json"}
                    ]
                }),
            )
            .with_document(
                "https://host/stac/ice/melt.json",
                json!({
                    "id": "melt",
                    "properties": {
                        "description": "Glacier retreat",
                        "datetime": "2020-01-01T00:00:00Z"
                    },
                    "bbox": [-50.0, 60.0, -40.0, 70.0],
                    "assets": {
                        "preview": {"href": "./melt.png", "title": "Preview", "type": "image/png"}
                    }
                }),
            )
            .with_document(
                "https://host/stac/ice/dry.json",
                json!({"id": "dry", "properties": {"description": "Bare rock"}}),
            )
    }

    pub(crate) fn settings(args: &[&str]) -> Settings {
        let args = ["stac-tree-browser", ROOT].into_iter().chain(args.iter().copied());
        Settings::try_parse_from(args).unwrap()
    }

    pub(crate) async fn loaded(args: &[&str]) -> BrowserState {
        let mut state = BrowserState::new(settings(args), Arc::new(fixture()));
        state.load().await.unwrap();
        state
    }

    #[tokio::test]
    async fn test_load_and_stats() {
        let state = loaded(&[]).await;
        assert_eq!(state.report.as_ref().map(|report| report.loaded), Some(3));
        assert_eq!(
            state.stats(),
            Stats {
                catalogs: 2,
                collections: 1,
                loaded_collections: 0,
                items: 0,
                failures: 0,
                visible: 3,
            }
        );
    }

    #[tokio::test]
    async fn test_expand_by_id() {
        let mut state = loaded(&["--expand", "ice", "--expand", "nowhere"]).await;
        assert_eq!(state.expand_requested().await, 1);

        let ice = state.tree.find_by_document_id("ice")[0];
        assert!(state.tree.with_node(ice, |node| node.is_open()).unwrap());
        let stats = state.stats();
        assert_eq!(stats.items, 2);
        assert_eq!(stats.loaded_collections, 1);
    }

    #[tokio::test]
    async fn test_expand_all_records_failures() {
        let fetcher = fixture();
        fetcher.remove("https://host/stac/ice/dry.json");
        let mut state = BrowserState::new(settings(&["--expand-all"]), Arc::new(fetcher));
        state.load().await.unwrap();

        assert_eq!(state.expand_requested().await, 0);
        assert_eq!(state.expansion_errors.len(), 1);
        let stats = state.stats();
        assert_eq!(stats.items, 1);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.loaded_collections, 0);
    }

    #[tokio::test]
    async fn test_query_updates_visible_count() {
        let mut state = loaded(&["--expand-all", "--query", "glacier"]).await;
        state.expand_requested().await;
        let visibility = state.apply_query();
        assert_eq!(visibility.len(), 3);
        assert_eq!(state.stats().visible, 3);
    }

    #[tokio::test]
    async fn test_root_failure_is_returned() {
        let mut state = BrowserState::new(settings(&[]), Arc::new(MemoryFetcher::new()));
        assert!(matches!(state.load().await, Err(TreeError::Fetch(_))));
        assert!(state.report.is_none());
    }
}
