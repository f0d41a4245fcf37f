//! CatalogTree - lazily materialized tree of linked catalog documents
//!
//! The tree owns an arena of [`Node`]s addressed by [`NodeId`], the [`SearchIndex`] built from
//! their fingerprints and the visibility set of the active query. Mutations take the state lock
//! only between fetches: every network round-trip happens with the lock released, and results are
//! applied in link order once the whole batch for one parent has settled.
//!
//! A reload bumps the tree generation. Results of fetches started for an older generation are
//! dropped on arrival.

use crate::classify::{self, CHILD_REL, Classified, ITEM_REL};
use crate::event::TreeEvent;
use crate::fetcher::{self, DocumentFetcher, FetchFailure};
use crate::latch::{ExpansionLatch, LoadState};
use crate::node::{Node, NodeId, NodeKind, NodeView};
use crate::search::{FingerprintOptions, SearchIndex, VisibilitySet, normalize_query};
use crate::{Result, TreeError};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use url::Url;

/// Configuration for a [`CatalogTree`]
#[derive(Debug, Clone)]
pub struct Config {
    /// Which fields feed each node's search fingerprint
    pub fingerprint: FingerprintOptions,
    /// Catalogs at this depth or deeper are not descended
    pub max_depth: usize,
    /// Catalogs at this depth or shallower start open
    pub open_depth: usize,
    /// Capacity of the change event channel
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fingerprint: FingerprintOptions::default(),
            max_depth: 32,
            open_depth: 1,
            event_capacity: 256,
        }
    }
}

/// Outcome of a root load or catalog descent
#[derive(Debug, Clone, PartialEq)]
pub struct LoadReport {
    /// Node the load started from
    pub node: NodeId,
    /// Number of nodes created
    pub loaded: usize,
    /// Localized failures, attributed to the node whose link failed
    pub failures: Vec<(NodeId, TreeError)>,
}

impl LoadReport {
    fn new(node: NodeId) -> Self {
        Self {
            node,
            loaded: 0,
            failures: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

struct TreeState {
    generation: u64,
    nodes: Vec<Node>,
    root: Option<NodeId>,
    index: SearchIndex,
    query: String,
    visibility: VisibilitySet,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl TreeState {
    fn new(generation: u64, options: FingerprintOptions, query: String) -> Self {
        let index = SearchIndex::new(options);
        let visibility = index.evaluate(&query);
        Self {
            generation,
            nodes: Vec::new(),
            root: None,
            index,
            query,
            visibility,
        }
    }

    fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id.index()).ok_or(TreeError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id.index())
            .ok_or(TreeError::UnknownNode(id))
    }

    /// Append a node under `parent` and index it
    fn insert(
        &mut self,
        parent: Option<NodeId>,
        location: Url,
        classified: Classified,
        config: &Config,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        let depth = parent
            .and_then(|parent| self.nodes.get(parent.index()))
            .map_or(0, |parent| parent.depth + 1);

        let mut node = Node::new(id, parent, depth, location, classified);
        node.open = node.kind == NodeKind::Catalog && depth <= config.open_depth;
        self.index.insert_node(&node);

        if let Some(parent) = parent.and_then(|parent| self.nodes.get_mut(parent.index())) {
            parent.children.push(id);
        }
        self.nodes.push(node);
        id
    }

    /// Whether a child of `id` was loaded from `location`
    fn has_child_at(&self, id: NodeId, location: &Url) -> bool {
        self.nodes.get(id.index()).is_some_and(|node| {
            node.children
                .iter()
                .filter_map(|child| self.nodes.get(child.index()))
                .any(|child| child.location == *location)
        })
    }

    /// Resolve the `rel` links of `id` that are not yet materialized among its children
    ///
    /// Links back to `id` or one of its ancestors are left out.
    fn pending_links(&self, id: NodeId, rel: &str) -> Result<(Vec<Url>, Vec<FetchFailure>)> {
        let node = self.node(id)?;
        let existing: HashSet<&Url> = node
            .children
            .iter()
            .filter_map(|child| self.nodes.get(child.index()))
            .map(|child| &child.location)
            .collect();

        let mut pending: Vec<Url> = Vec::new();
        let mut unresolved = Vec::new();
        for link in node.links_with_rel(rel) {
            match fetcher::resolve_reference(&node.location, &link.href) {
                Ok(location) if existing.contains(&location) || pending.contains(&location) => {}
                Ok(location) if self.is_on_path(id, &location) => {
                    tracing::warn!(
                        %location,
                        parent = %node.location,
                        "Skipping link back to an ancestor"
                    );
                }
                Ok(location) => pending.push(location),
                Err(failure) => unresolved.push(failure),
            }
        }
        Ok((pending, unresolved))
    }

    /// Whether `location` is `id` itself or one of its ancestors
    fn is_on_path(&self, id: NodeId, location: &Url) -> bool {
        let mut current = self.nodes.get(id.index());
        while let Some(node) = current {
            if node.location == *location {
                return true;
            }
            current = node.parent.and_then(|parent| self.nodes.get(parent.index()));
        }
        false
    }

    fn refresh_visibility(&mut self) {
        self.visibility = self.index.evaluate(&self.query);
    }
}

struct Shared {
    fetcher: Arc<dyn DocumentFetcher>,
    config: Config,
    state: RwLock<TreeState>,
    latch: ExpansionLatch<(u64, NodeId)>,
    events: broadcast::Sender<TreeEvent>,
}

/// Shared handle to a lazily loaded catalog tree
///
/// Cloning is cheap; all clones see the same tree.
#[derive(Clone)]
pub struct CatalogTree {
    shared: Arc<Shared>,
}

impl CatalogTree {
    pub fn new(fetcher: Arc<dyn DocumentFetcher>, config: Config) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let latch = {
            let events = events.clone();
            ExpansionLatch::new().with_observer(move |&(_, node): &(u64, NodeId), state| {
                tracing::debug!(%node, ?state, "Collection load state changed");
                let _ = events.send(TreeEvent::LoadStateChanged { node, state });
            })
        };
        let state = RwLock::new(TreeState::new(0, config.fingerprint.clone(), String::new()));

        Self {
            shared: Arc::new(Shared {
                fetcher,
                config,
                state,
                latch,
                events,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Receive change events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<TreeEvent> {
        self.shared.events.subscribe()
    }

    fn read(&self) -> RwLockReadGuard<'_, TreeState> {
        self.shared
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TreeState> {
        self.shared
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: TreeEvent) {
        tracing::trace!(?event, "Tree event");
        let _ = self.shared.events.send(event);
    }

    /// Drop the current tree and start a new generation, keeping the active query
    fn reset(&self) -> u64 {
        let generation = {
            let mut state = self.write();
            let generation = state.generation + 1;
            let query = std::mem::take(&mut state.query);
            *state = TreeState::new(generation, self.shared.config.fingerprint.clone(), query);
            generation
        };
        self.shared.latch.clear();
        generation
    }

    /// Load the tree from scratch starting at `reference`
    ///
    /// Any previous tree is discarded first. A failure to fetch or parse the root is fatal; every
    /// failure below the root is recorded on the node whose link failed and listed in the report.
    pub async fn load_root(&self, reference: &str) -> Result<LoadReport> {
        let location = fetcher::root_location(reference)?;
        let generation = self.reset();
        tracing::info!(%location, generation, "Loading catalog root");

        let value = self.shared.fetcher.fetch(&location).await?;
        let classified = classify::classify(value, None).map_err(|err| malformed(&location, err))?;
        let document = &classified.document;
        if !document.has_links_with_rel(CHILD_REL) && !document.has_links_with_rel(ITEM_REL) {
            return Err(TreeError::NoUsableLinks {
                location: location.to_string(),
            });
        }
        let kind = classified.kind;

        let root = {
            let mut state = self.write();
            if state.generation != generation {
                return Err(superseded(&location));
            }
            let root = state.insert(None, location, classified, &self.shared.config);
            state.root = Some(root);
            state.refresh_visibility();
            root
        };
        self.emit(TreeEvent::RootLoaded { root });

        let mut report = LoadReport::new(root);
        report.loaded = 1;
        if kind == NodeKind::Catalog {
            let descent = self.expand_catalog_children(root).await?;
            report.loaded += descent.loaded;
            report.failures = descent.failures;
        }

        tracing::info!(
            nodes = report.loaded,
            failures = report.failures.len(),
            "Catalog tree ready"
        );
        Ok(report)
    }

    /// Depth-first descent over the "child" links below `catalog`
    ///
    /// Siblings are fetched concurrently and appended in link order. Children already present are
    /// not fetched again, links back to the current path are skipped and catalogs at the depth
    /// limit are recorded as failures instead of descended.
    pub async fn expand_catalog_children(&self, catalog: NodeId) -> Result<LoadReport> {
        let (generation, origin) = {
            let state = self.read();
            let node = state.node(catalog)?;
            if node.kind != NodeKind::Catalog {
                return Err(TreeError::NotACatalog(catalog));
            }
            (state.generation, node.location.clone())
        };

        let config = &self.shared.config;
        let mut report = LoadReport::new(catalog);
        let mut worklist = vec![catalog];

        while let Some(current) = worklist.pop() {
            let (location, depth) = {
                let state = self.read();
                let node = state.node(current)?;
                (node.location.clone(), node.depth)
            };

            if depth >= config.max_depth {
                let error = TreeError::DepthExceeded {
                    location: location.to_string(),
                    max_depth: config.max_depth,
                };
                let recorded = {
                    let mut state = self.write();
                    if state.generation != generation {
                        return Err(superseded(&origin));
                    }
                    let failures = &mut state.node_mut(current)?.failures;
                    let recorded = failures
                        .iter()
                        .any(|failure| matches!(failure, TreeError::DepthExceeded { .. }));
                    if !recorded {
                        failures.push(error.clone());
                    }
                    recorded
                };
                if recorded {
                    continue;
                }
                tracing::warn!(%location, "{error}");
                report.failures.push((current, error.clone()));
                self.emit(TreeEvent::NodeFailed {
                    node: current,
                    error,
                });
                continue;
            }

            let (pending, unresolved) = self.read().pending_links(current, CHILD_REL)?;
            let results =
                join_all(pending.iter().map(|child| self.shared.fetcher.fetch(child))).await;

            let mut failures: Vec<TreeError> =
                unresolved.into_iter().map(TreeError::from).collect();
            let mut appended = Vec::new();
            let mut catalogs = Vec::new();
            {
                let mut state = self.write();
                if state.generation != generation {
                    return Err(superseded(&origin));
                }

                for (child, result) in pending.into_iter().zip(results) {
                    let classified = match result.and_then(|value| {
                        classify::classify(value, Some(CHILD_REL))
                            .map_err(|err| malformed(&child, err))
                    }) {
                        Ok(classified) => classified,
                        Err(failure) => {
                            tracing::warn!(parent = %location, "{failure}");
                            failures.push(failure.into());
                            continue;
                        }
                    };

                    // Another descent of the same catalog may have appended it meanwhile
                    if state.has_child_at(current, &child) {
                        continue;
                    }
                    if classified.ambiguous {
                        tracing::warn!(
                            %child,
                            "Document has no child or item links, treating it as an empty catalog"
                        );
                    }

                    let kind = classified.kind;
                    let id = state.insert(Some(current), child, classified, config);
                    appended.push(id);
                    if kind == NodeKind::Catalog {
                        catalogs.push(id);
                    }
                }

                state
                    .node_mut(current)?
                    .failures
                    .extend(failures.iter().cloned());
                state.refresh_visibility();
            }

            report.loaded += appended.len();
            if !appended.is_empty() {
                tracing::debug!(parent = %location, children = appended.len(), "Children appended");
                self.emit(TreeEvent::ChildrenAppended {
                    parent: current,
                    children: appended,
                });
            }
            for error in failures {
                report.failures.push((current, error.clone()));
                self.emit(TreeEvent::NodeFailed {
                    node: current,
                    error,
                });
            }

            // Reversed so the first child is descended first
            worklist.extend(catalogs.into_iter().rev());
        }

        self.emit_filtered_visibility();
        Ok(report)
    }

    /// Request that a Collection's items be materialized
    ///
    /// Items are fetched at most once: concurrent requests share the in-flight load and requests
    /// after a successful load return immediately. After a failure the Collection stays
    /// `Unloaded`, keeps the items that did load and a retry fetches only the missing ones.
    pub async fn request_expansion(&self, collection: NodeId) -> Result<()> {
        let generation = {
            let state = self.read();
            if state.node(collection)?.kind != NodeKind::Collection {
                return Err(TreeError::NotACollection(collection));
            }
            state.generation
        };

        let tree = self.clone();
        self.shared
            .latch
            .run((generation, collection), move || {
                tree.populate_items(generation, collection)
            })
            .await
    }

    async fn populate_items(self, generation: u64, collection: NodeId) -> Result<()> {
        let (location, pending, unresolved) = {
            let state = self.read();
            let (pending, unresolved) = state.pending_links(collection, ITEM_REL)?;
            (state.node(collection)?.location.clone(), pending, unresolved)
        };
        let attempted = pending.len() + unresolved.len();
        tracing::debug!(%location, items = pending.len(), "Expanding collection");

        let results = join_all(pending.iter().map(|item| self.shared.fetcher.fetch(item))).await;

        let mut failures = unresolved;
        let mut appended = Vec::new();
        let mut asset_failures = Vec::new();
        let error = {
            let mut state = self.write();
            if state.generation != generation {
                tracing::debug!(%location, "Discarding items fetched for a previous tree");
                return Err(superseded(&location));
            }

            for (item, result) in pending.into_iter().zip(results) {
                let classified = result.and_then(|value| {
                    classify::classify(value, Some(ITEM_REL)).map_err(|err| malformed(&item, err))
                });
                match classified {
                    Ok(_) if state.has_child_at(collection, &item) => {}
                    Ok(classified) => {
                        let config = &self.shared.config;
                        let id = state.insert(Some(collection), item, classified, config);
                        let recorded = state.node(id)?.failures.iter().cloned();
                        asset_failures.extend(recorded.map(|error| (id, error)));
                        appended.push(id);
                    }
                    Err(failure) => {
                        tracing::warn!(collection = %location, "{failure}");
                        failures.push(failure);
                    }
                }
            }

            let error = (!failures.is_empty()).then(|| TreeError::Expansion {
                location: location.to_string(),
                attempted,
                failures,
            });
            if let Some(error) = &error {
                state.node_mut(collection)?.failures.push(error.clone());
            }
            state.refresh_visibility();
            error
        };

        if !appended.is_empty() {
            tracing::debug!(%location, items = appended.len(), "Items appended");
            self.emit(TreeEvent::ChildrenAppended {
                parent: collection,
                children: appended,
            });
        }
        for (node, error) in asset_failures {
            self.emit(TreeEvent::NodeFailed { node, error });
        }
        self.emit_filtered_visibility();

        match error {
            Some(error) => {
                tracing::warn!(%location, "{error}");
                self.emit(TreeEvent::NodeFailed {
                    node: collection,
                    error: error.clone(),
                });
                Err(error)
            }
            None => Ok(()),
        }
    }

    /// Make `query` the active query and recompute visibility
    ///
    /// Nodes that match directly are opened so the matches are on screen.
    pub fn set_query(&self, query: &str) -> VisibilitySet {
        let visibility = {
            let mut state = self.write();
            state.query = normalize_query(query);
            state.refresh_visibility();

            let matches: Vec<NodeId> = state.visibility.direct_matches().collect();
            for id in matches {
                if let Some(node) = state.nodes.get_mut(id.index()) {
                    node.open = true;
                }
            }
            state.visibility.clone()
        };

        tracing::debug!(
            query = visibility.query(),
            visible = visibility.len(),
            "Query applied"
        );
        self.emit(TreeEvent::VisibilityChanged {
            query: visibility.query().to_string(),
            visible: visibility.len(),
        });
        visibility
    }

    fn emit_filtered_visibility(&self) {
        let changed = {
            let state = self.read();
            let visibility = &state.visibility;
            visibility
                .is_filtered()
                .then(|| (visibility.query().to_string(), visibility.len()))
        };
        if let Some((query, visible)) = changed {
            self.emit(TreeEvent::VisibilityChanged { query, visible });
        }
    }

    /// Evaluate `query` over the current tree without changing the active query
    pub fn evaluate(&self, query: &str) -> VisibilitySet {
        self.read().index.evaluate(query)
    }

    /// Normalized active query
    pub fn query(&self) -> String {
        self.read().query.clone()
    }

    /// Visibility under the active query
    pub fn visibility(&self) -> VisibilitySet {
        self.read().visibility.clone()
    }

    pub fn is_visible(&self, node: NodeId) -> bool {
        self.read().visibility.contains(node)
    }

    pub fn fingerprint(&self, node: NodeId) -> Result<String> {
        let state = self.read();
        state
            .index
            .fingerprint_of(node)
            .map(str::to_string)
            .ok_or(TreeError::UnknownNode(node))
    }

    pub fn root(&self) -> Option<NodeId> {
        self.read().root
    }

    pub fn node_count(&self) -> usize {
        self.read().nodes.len()
    }

    pub fn children(&self, node: NodeId) -> Result<Vec<NodeId>> {
        Ok(self.read().node(node)?.children.clone())
    }

    /// Run `f` with a borrowed node
    pub fn with_node<R>(&self, node: NodeId, f: impl FnOnce(&Node) -> R) -> Result<R> {
        let state = self.read();
        Ok(f(state.node(node)?))
    }

    /// Owned snapshot of a node with its load state and visibility
    pub fn view(&self, node: NodeId) -> Result<NodeView> {
        let state = self.read();
        let snapshot = state.node(node)?.clone();
        let load_state = (snapshot.kind == NodeKind::Collection)
            .then(|| self.shared.latch.state(&(state.generation, node)));
        Ok(NodeView {
            visible: state.visibility.contains(node),
            load_state,
            node: snapshot,
        })
    }

    /// Load state of a Collection's items, `None` for other kinds
    pub fn load_state(&self, node: NodeId) -> Result<Option<LoadState>> {
        let state = self.read();
        let kind = state.node(node)?.kind;
        Ok((kind == NodeKind::Collection)
            .then(|| self.shared.latch.state(&(state.generation, node))))
    }

    pub fn set_open(&self, node: NodeId, open: bool) -> Result<()> {
        self.write().node_mut(node)?.open = open;
        Ok(())
    }

    /// Flip the open state of `node`, expanding it when a Collection opens
    ///
    /// Returns the new open state.
    pub async fn toggle(&self, node: NodeId) -> Result<bool> {
        let (open, expand) = {
            let mut state = self.write();
            let node = state.node_mut(node)?;
            node.open = !node.open;
            (node.open, node.open && node.kind == NodeKind::Collection)
        };
        if expand {
            self.request_expansion(node).await?;
        }
        Ok(open)
    }

    /// Nodes whose document id is `id`, in creation order
    pub fn find_by_document_id(&self, id: &str) -> Vec<NodeId> {
        self.read()
            .nodes
            .iter()
            .filter(|node| node.descriptor.id == id)
            .map(|node| node.id)
            .collect()
    }

    /// Every node of `kind`, in creation order
    pub fn nodes_of_kind(&self, kind: NodeKind) -> Vec<NodeId> {
        self.read()
            .nodes
            .iter()
            .filter(|node| node.kind == kind)
            .map(|node| node.id)
            .collect()
    }
}

fn malformed(location: &Url, err: serde_json::Error) -> FetchFailure {
    FetchFailure::new(location.as_str(), format!("malformed document: {err}"))
}

fn superseded(location: &Url) -> TreeError {
    TreeError::Superseded {
        location: location.to_string(),
    }
}
