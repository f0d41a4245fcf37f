//! SearchIndex - per-node fingerprints and query visibility
//!
//! Each node gets a lower-cased text fingerprint when it is created. A query is matched as a
//! substring of the fingerprint. Visibility then propagates **upward only**: every ancestor of a
//! matching node is visible so the path to a match stays on screen, while non-matching
//! descendants of a matching node stay hidden.
//!
//! Visibility is always recomputed from scratch from the current query and the current set of
//! fingerprints, never patched incrementally.

use crate::node::{Node, NodeId, NodeKind};
use rayon::prelude::*;
use std::collections::HashSet;

/// Which descriptive fields go into a fingerprint besides title and id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintOptions {
    /// Include the description of Catalogs and Collections (Items always include theirs)
    pub container_description: bool,
    /// Include keywords
    pub keywords: bool,
    /// Include provider names
    pub providers: bool,
}

impl Default for FingerprintOptions {
    fn default() -> Self {
        Self {
            container_description: true,
            keywords: false,
            providers: false,
        }
    }
}

/// Normalized searchable text of a node
pub fn fingerprint(node: &Node, options: &FingerprintOptions) -> String {
    let descriptor = node.descriptor();
    let mut parts: Vec<&str> = Vec::new();

    if let Some(title) = descriptor.title.as_deref() {
        parts.push(title);
    }
    parts.push(&descriptor.id);

    let with_description = node.kind() == NodeKind::Item || options.container_description;
    if with_description && let Some(description) = descriptor.description.as_deref() {
        parts.push(description);
    }
    if options.keywords {
        parts.extend(descriptor.keywords.iter().map(String::as_str));
    }
    if options.providers {
        parts.extend(descriptor.providers.iter().map(|provider| provider.name.as_str()));
    }

    parts.join(" ").to_lowercase()
}

/// Trim and lower-case a raw query
pub fn normalize_query(query: &str) -> String {
    query.trim().to_lowercase()
}

/// Result of evaluating a query over the whole tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisibilitySet {
    query: String,
    visible: HashSet<NodeId>,
    direct: HashSet<NodeId>,
}

impl VisibilitySet {
    /// Normalized query this set was computed for
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Whether a non-empty query filters the tree
    pub fn is_filtered(&self) -> bool {
        !self.query.is_empty()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.visible.contains(&node)
    }

    /// Whether the node itself matches, as opposed to being visible through a descendant
    pub fn is_direct_match(&self, node: NodeId) -> bool {
        self.direct.contains(&node)
    }

    pub fn direct_matches(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.direct.iter().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.visible.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.visible.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Entry {
    parent: Option<NodeId>,
    fingerprint: String,
}

/// Fingerprints of every node, indexed by node id
#[derive(Debug, Clone, Default)]
pub struct SearchIndex {
    options: FingerprintOptions,
    entries: Vec<Entry>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl SearchIndex {
    pub fn new(options: FingerprintOptions) -> Self {
        Self {
            options,
            entries: Vec::new(),
        }
    }

    pub fn options(&self) -> &FingerprintOptions {
        &self.options
    }

    /// Fingerprint `node` with this index's options and store it
    pub fn insert_node(&mut self, node: &Node) {
        let fingerprint = fingerprint(node, &self.options);
        self.insert(node.id(), node.parent(), fingerprint);
    }

    /// Store a fingerprint; nodes are inserted in id order, parents before children
    pub fn insert(&mut self, node: NodeId, parent: Option<NodeId>, fingerprint: String) {
        debug_assert_eq!(node.index(), self.entries.len(), "nodes must be indexed in id order");
        debug_assert!(parent.is_none_or(|parent| parent < node));
        self.entries.push(Entry {
            parent,
            fingerprint,
        });
    }

    pub fn fingerprint_of(&self, node: NodeId) -> Option<&str> {
        self.entries
            .get(node.index())
            .map(|entry| entry.fingerprint.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Compute the visibility set of every indexed node under `query`
    pub fn evaluate(&self, query: &str) -> VisibilitySet {
        #[cfg(feature = "profiling")]
        profiling::scope!("search::evaluate");

        let query = normalize_query(query);
        if query.is_empty() {
            return VisibilitySet {
                query,
                visible: (0..self.entries.len()).map(NodeId).collect(),
                direct: HashSet::new(),
            };
        }

        let direct: HashSet<NodeId> = self
            .entries
            .par_iter()
            .enumerate()
            .filter(|(_, entry)| entry.fingerprint.contains(&query))
            .map(|(index, _)| NodeId(index))
            .collect();

        // Every node already in `visible` has its whole ancestor chain in it too
        let mut visible = HashSet::with_capacity(direct.len() * 2);
        for &node in &direct {
            let mut current = Some(node);
            while let Some(id) = current {
                if !visible.insert(id) {
                    break;
                }
                current = self.entries[id.index()].parent;
            }
        }

        VisibilitySet {
            query,
            visible,
            direct,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{ITEM_REL, classify};
    use serde_json::{Value, json};
    use url::Url;

    fn node(id: usize, parent: Option<usize>, value: Value, rel: Option<&str>) -> Node {
        Node::new(
            NodeId(id),
            parent.map(NodeId),
            0,
            Url::parse("https://host/doc.json").unwrap(),
            classify(value, rel).unwrap(),
        )
    }

    /// root ─┬─ glaciers (collection) ─┬─ melt (item, "glacier" in description)
    ///       │                          └─ dry (item)
    ///       └─ forests (collection) ─── pine (item)
    fn sample_index(options: FingerprintOptions) -> SearchIndex {
        let mut index = SearchIndex::new(options);
        let nodes = [
            node(0, None, json!({"id": "root", "title": "Earth Catalog"}), None),
            node(
                1,
                Some(0),
                json!({"id": "ice", "title": "Polar", "extent": {}, "keywords": ["cryosphere"]}),
                None,
            ),
            node(
                2,
                Some(1),
                json!({"id": "melt", "properties": {"description": "Glacier retreat 2020"}}),
                Some(ITEM_REL),
            ),
            node(
                3,
                Some(1),
                json!({"id": "dry", "properties": {"description": "Rock"}}),
                Some(ITEM_REL),
            ),
            node(
                4,
                Some(0),
                json!({"id": "forests", "extent": {}, "providers": [{"name": "Forest Agency"}]}),
                None,
            ),
            node(5, Some(4), json!({"id": "pine"}), Some(ITEM_REL)),
        ];
        for node in &nodes {
            index.insert_node(node);
        }
        index
    }

    #[test]
    fn test_empty_query_shows_everything() {
        let index = sample_index(FingerprintOptions::default());
        let visibility = index.evaluate("   ");
        assert_eq!(visibility.len(), 6);
        assert!(!visibility.is_filtered());
        assert_eq!(visibility.direct_matches().count(), 0);
    }

    #[test]
    fn test_match_keeps_ancestors_only() {
        let index = sample_index(FingerprintOptions::default());
        let visibility = index.evaluate("  GLACIER ");

        let mut visible: Vec<_> = visibility.iter().map(NodeId::index).collect();
        visible.sort();
        assert_eq!(visible, vec![0, 1, 2]);
        assert!(visibility.is_direct_match(NodeId(2)));
        assert!(!visibility.is_direct_match(NodeId(1)));
        assert_eq!(visibility.query(), "glacier");
    }

    #[test]
    fn test_visibility_does_not_flow_downward() {
        let index = sample_index(FingerprintOptions::default());
        let visibility = index.evaluate("forests");

        assert!(visibility.contains(NodeId(4)));
        assert!(visibility.contains(NodeId(0)));
        assert!(!visibility.contains(NodeId(5)));
    }

    #[test]
    fn test_every_direct_match_has_visible_ancestors() {
        let index = sample_index(FingerprintOptions::default());
        for query in ["e", "o", "r", "melt", "pine", "catalog"] {
            let visibility = index.evaluate(query);
            for node in visibility.direct_matches() {
                let mut parent = index.entries[node.index()].parent;
                while let Some(id) = parent {
                    assert!(visibility.contains(id), "{query}: ancestor {id} of {node} hidden");
                    parent = index.entries[id.index()].parent;
                }
            }
        }
    }

    #[test]
    fn test_no_match_hides_everything() {
        let index = sample_index(FingerprintOptions::default());
        assert!(index.evaluate("volcano").is_empty());
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let item = node(
            0,
            None,
            json!({"id": "X-1", "title": "Scene", "properties": {"description": "Big Glacier"}}),
            Some(ITEM_REL),
        );
        let options = FingerprintOptions::default();
        let first = fingerprint(&item, &options);
        assert_eq!(first, fingerprint(&item, &options));
        assert_eq!(first, "scene x-1 big glacier");
    }

    #[test]
    fn test_container_description_option() {
        let collection =
            node(0, None, json!({"id": "c", "description": "Snow", "extent": {}}), None);
        let with = FingerprintOptions::default();
        let without = FingerprintOptions {
            container_description: false,
            ..FingerprintOptions::default()
        };
        assert_eq!(fingerprint(&collection, &with), "c snow");
        assert_eq!(fingerprint(&collection, &without), "c");
    }

    #[test]
    fn test_keyword_and_provider_options() {
        let default_index = sample_index(FingerprintOptions::default());
        assert!(default_index.evaluate("cryosphere").is_empty());
        assert!(default_index.evaluate("agency").is_empty());

        let rich_index = sample_index(FingerprintOptions {
            keywords: true,
            providers: true,
            ..FingerprintOptions::default()
        });
        assert!(rich_index.evaluate("cryosphere").is_direct_match(NodeId(1)));
        assert!(rich_index.evaluate("agency").is_direct_match(NodeId(4)));
    }

    #[test]
    fn test_index_grows_with_new_nodes() {
        let mut index = sample_index(FingerprintOptions::default());
        assert!(index.evaluate("spruce").is_empty());

        index.insert_node(&node(6, Some(4), json!({"id": "spruce"}), Some(ITEM_REL)));
        let visibility = index.evaluate("spruce");
        assert!(visibility.contains(NodeId(6)));
        assert!(visibility.contains(NodeId(4)));
        assert!(visibility.contains(NodeId(0)));
        assert_eq!(index.fingerprint_of(NodeId(6)), Some("spruce"));
    }
}
