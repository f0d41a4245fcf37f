//! Tree nodes
//!
//! A node is created once, when its document is first fetched and classified, and lives as long
//! as the tree generation that created it. Its children list is append-only.

use crate::classify::{CHILD_REL, Classified, ITEM_REL};
use crate::document::{Document, Link, Provider};
use crate::fetcher::resolve_reference;
use crate::latch::LoadState;
use crate::TreeError;
use geo::{BoundingRect, Coord, MultiPoint, Point, Rect};
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use url::Url;

/// Relations that structure the tree rather than describe the node
const STRUCTURAL_RELS: [&str; 5] = ["self", "root", "parent", CHILD_REL, ITEM_REL];

/// Stable identity of a node within one tree generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Classified variant of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeKind {
    Catalog,
    Collection,
    Item,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Catalog => "Catalog",
            Self::Collection => "Collection",
            Self::Item => "Item",
        };
        f.write_str(name)
    }
}

/// Descriptive fields common to every node kind
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Descriptor {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub providers: Vec<Provider>,
    pub keywords: Vec<String>,
    pub links: Vec<Link>,
}

impl Descriptor {
    /// Title, or the id when the document has no title
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .filter(|title| !title.is_empty())
            .unwrap_or(&self.id)
    }
}

/// A downloadable resource attached to an Item
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Asset {
    /// Key of the asset in the Item's `assets` map
    pub key: String,
    /// Absolute location, resolved against the Item's own location
    pub href: Url,
    pub title: Option<String>,
    pub media_type: Option<String>,
    pub roles: Vec<String>,
}

impl Asset {
    pub fn label(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.key)
    }

    /// Whether the asset can be shown inline as a picture
    pub fn is_image(&self) -> bool {
        self.media_type
            .as_deref()
            .is_some_and(|media_type| media_type.starts_with("image/"))
    }
}

/// Item-only fields
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemDetails {
    pub datetime: Option<String>,
    /// West, south, east, north
    pub bbox: Option<[f64; 4]>,
    /// GeoJSON geometry, passed through untouched
    pub geometry: Option<Value>,
    /// Assets ordered by key
    pub assets: Vec<Asset>,
}

impl ItemDetails {
    /// Spatial footprint to hand to a map widget; geometry wins over bbox
    pub fn footprint(&self) -> Option<Footprint<'_>> {
        match (&self.geometry, self.bbox) {
            (Some(geometry), _) => Some(Footprint::Geometry(geometry)),
            (_, Some(bbox)) => Some(Footprint::BoundingBox(bbox)),
            _ => None,
        }
    }
}

/// Spatial footprint of an Item
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Footprint<'a> {
    Geometry(&'a Value),
    BoundingBox([f64; 4]),
}

impl Footprint<'_> {
    /// Bounds to fit the map view to (x = longitude, y = latitude)
    pub fn bounds(&self) -> Option<Rect<f64>> {
        match self {
            Self::BoundingBox([west, south, east, north]) => Some(Rect::new(
                Coord { x: *west, y: *south },
                Coord { x: *east, y: *north },
            )),
            Self::Geometry(geometry) => {
                let mut points = Vec::new();
                collect_points(geometry, &mut points);
                MultiPoint::new(points).bounding_rect()
            }
        }
    }
}

/// Walk GeoJSON `coordinates` (any nesting) and `geometries` collecting positions
fn collect_points(value: &Value, points: &mut Vec<Point<f64>>) {
    if let Some(coordinates) = value.get("coordinates") {
        collect_positions(coordinates, points);
    }
    if let Some(Value::Array(geometries)) = value.get("geometries") {
        for geometry in geometries {
            collect_points(geometry, points);
        }
    }
}

fn collect_positions(value: &Value, points: &mut Vec<Point<f64>>) {
    let Value::Array(values) = value else {
        return;
    };
    match (values.first().and_then(Value::as_f64), values.get(1).and_then(Value::as_f64)) {
        (Some(x), Some(y)) => points.push(Point::new(x, y)),
        _ => {
            for nested in values {
                collect_positions(nested, points);
            }
        }
    }
}

/// Variant-specific data
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Payload {
    Catalog,
    Collection { extent: Option<Value> },
    Item(ItemDetails),
}

/// A node of the catalog tree
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) kind: NodeKind,
    /// Location the document was fetched from; base for all of its references
    pub(crate) location: Url,
    pub(crate) parent: Option<NodeId>,
    pub(crate) depth: usize,
    pub(crate) descriptor: Descriptor,
    pub(crate) payload: Payload,
    pub(crate) children: Vec<NodeId>,
    /// Open/closed state read by the presentation layer
    pub(crate) open: bool,
    /// Localized failures (failed children, failed expansions, bad asset references)
    #[serde(serialize_with = "serialize_failures")]
    pub(crate) failures: Vec<TreeError>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Node {
    /// Build a node from a classified document fetched from `location`
    ///
    /// Item asset references are resolved here; unresolvable ones are dropped and recorded in
    /// the node's failures.
    pub(crate) fn new(
        id: NodeId,
        parent: Option<NodeId>,
        depth: usize,
        location: Url,
        classified: Classified,
    ) -> Self {
        let Classified { kind, document, .. } = classified;
        let mut failures = Vec::new();

        let payload = match kind {
            NodeKind::Catalog => Payload::Catalog,
            NodeKind::Collection => Payload::Collection {
                extent: document.extent.clone(),
            },
            NodeKind::Item => Payload::Item(item_details(&document, &location, &mut failures)),
        };

        let Document {
            id: document_id,
            title,
            description,
            providers,
            keywords,
            links,
            properties,
            ..
        } = document;

        // Items keep title and description under `properties`
        let (title, description) = match kind {
            NodeKind::Item => (
                title.or(properties.title),
                properties.description.or(description),
            ),
            _ => (title, description),
        };

        Self {
            id,
            kind,
            location,
            parent,
            depth,
            descriptor: Descriptor {
                id: document_id,
                title,
                description,
                providers,
                keywords,
                links,
            },
            payload,
            children: Vec::new(),
            open: false,
            failures,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn location(&self) -> &Url {
        &self.location
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Distance from the root (the root has depth 0)
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    pub fn display_title(&self) -> &str {
        self.descriptor.display_title()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn item(&self) -> Option<&ItemDetails> {
        match &self.payload {
            Payload::Item(details) => Some(details),
            _ => None,
        }
    }

    pub fn extent(&self) -> Option<&Value> {
        match &self.payload {
            Payload::Collection { extent } => extent.as_ref(),
            _ => None,
        }
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn failures(&self) -> &[TreeError] {
        &self.failures
    }

    /// Descriptive links (license, about, ...), excluding the structural relations
    pub fn related_links(&self) -> impl Iterator<Item = &Link> {
        self.descriptor
            .links
            .iter()
            .filter(|link| !STRUCTURAL_RELS.contains(&link.rel.as_str()))
    }

    /// Links with the given relation, in document order
    pub fn links_with_rel<'a>(&'a self, rel: &'a str) -> impl Iterator<Item = &'a Link> + 'a {
        self.descriptor.links.iter().filter(move |link| link.rel == rel)
    }
}

fn item_details(document: &Document, location: &Url, failures: &mut Vec<TreeError>) -> ItemDetails {
    let assets = document
        .assets
        .iter()
        .filter_map(|(key, raw)| match resolve_reference(location, &raw.href) {
            Ok(href) => Some(Asset {
                key: key.clone(),
                href,
                title: raw.title.clone(),
                media_type: raw.media_type.clone(),
                roles: raw.roles.clone(),
            }),
            Err(failure) => {
                tracing::warn!(%location, asset = %key, "Dropping asset: {failure}");
                failures.push(failure.into());
                None
            }
        })
        .collect();

    ItemDetails {
        datetime: document
            .properties
            .datetime
            .clone()
            .or_else(|| document.datetime.clone()),
        bbox: document.bbox.as_deref().and_then(|bbox| planar_bbox(bbox, location)),
        geometry: document.geometry.clone(),
        assets,
    }
}

/// Accept 2D `[w, s, e, n]` and 3D `[w, s, zmin, e, n, zmax]` boxes
fn planar_bbox(bbox: &[f64], location: &Url) -> Option<[f64; 4]> {
    match *bbox {
        [west, south, east, north] => Some([west, south, east, north]),
        [west, south, _, east, north, _] => Some([west, south, east, north]),
        _ => {
            tracing::warn!(%location, len = bbox.len(), "Ignoring bbox with unexpected length");
            None
        }
    }
}

fn serialize_failures<S>(failures: &[TreeError], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_seq(failures.iter().map(ToString::to_string))
}

/// Snapshot of a node as seen by the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeView {
    #[serde(flatten)]
    pub node: Node,
    /// Load state of a Collection's items (`None` for other kinds)
    pub load_state: Option<LoadState>,
    /// Visibility under the active query
    pub visible: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use serde_json::json;

    fn build(value: Value, rel: Option<&str>, location: &str) -> Node {
        let classified = classify(value, rel).unwrap();
        Node::new(NodeId(0), None, 0, Url::parse(location).unwrap(), classified)
    }

    #[test]
    fn test_asset_href_resolves_against_item_location() {
        let node = build(
            json!({"id": "x", "assets": {"data": {"href": "data/img.tif", "type": "image/tiff"}}}),
            Some(ITEM_REL),
            "https://host/cat/items/x.json",
        );

        let item = node.item().unwrap();
        assert_eq!(item.assets.len(), 1);
        assert_eq!(item.assets[0].href.as_str(), "https://host/cat/items/data/img.tif");
        assert!(item.assets[0].is_image());
        assert_eq!(item.assets[0].label(), "data");
    }

    #[test]
    fn test_unresolvable_asset_is_recorded() {
        let node = build(
            json!({"id": "x", "assets": {
                "good": {"href": "good.tif"},
                "bad": {"href": "https://[::1"}
            }}),
            Some(ITEM_REL),
            "https://host/items/x.json",
        );

        let item = node.item().unwrap();
        assert_eq!(item.assets.len(), 1);
        assert_eq!(item.assets[0].key, "good");
        assert_eq!(node.failures().len(), 1);
    }

    #[test]
    fn test_item_title_and_description_from_properties() {
        let node = build(
            json!({
                "id": "x",
                "properties": {
                    "title": "Scene",
                    "description": "Glacier melt",
                    "datetime": "2021-06-01T00:00:00Z"
                }
            }),
            Some(ITEM_REL),
            "https://host/items/x.json",
        );

        assert_eq!(node.display_title(), "Scene");
        assert_eq!(node.descriptor().description.as_deref(), Some("Glacier melt"));
        assert_eq!(node.item().unwrap().datetime.as_deref(), Some("2021-06-01T00:00:00Z"));
    }

    #[test]
    fn test_display_title_falls_back_to_id() {
        let node = build(json!({"id": "plain", "title": ""}), None, "https://host/catalog.json");
        assert_eq!(node.display_title(), "plain");
    }

    #[test]
    fn test_three_dimensional_bbox_is_flattened() {
        let node = build(
            json!({"id": "x", "bbox": [1.0, 2.0, -10.0, 3.0, 4.0, 10.0]}),
            Some(ITEM_REL),
            "https://host/items/x.json",
        );
        assert_eq!(node.item().unwrap().bbox, Some([1.0, 2.0, 3.0, 4.0]));
    }

    #[test]
    fn test_footprint_prefers_geometry() {
        let node = build(
            json!({
                "id": "x",
                "bbox": [0.0, 0.0, 100.0, 100.0],
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[10.0, 20.0], [12.0, 20.0], [12.0, 25.0], [10.0, 20.0]]]
                }
            }),
            Some(ITEM_REL),
            "https://host/items/x.json",
        );

        let footprint = node.item().unwrap().footprint().unwrap();
        assert!(matches!(footprint, Footprint::Geometry(_)));
        let bounds = footprint.bounds().unwrap();
        assert_eq!(bounds.min(), Coord { x: 10.0, y: 20.0 });
        assert_eq!(bounds.max(), Coord { x: 12.0, y: 25.0 });
    }

    #[test]
    fn test_footprint_from_bbox() {
        let node = build(
            json!({"id": "x", "bbox": [-5.0, 40.0, 5.0, 50.0]}),
            Some(ITEM_REL),
            "https://host/items/x.json",
        );

        let bounds = node.item().unwrap().footprint().unwrap().bounds().unwrap();
        assert_eq!(bounds.min(), Coord { x: -5.0, y: 40.0 });
        assert_eq!(bounds.max(), Coord { x: 5.0, y: 50.0 });
    }

    #[test]
    fn test_related_links_exclude_structural() {
        let node = build(
            json!({"id": "root", "links": [
                {"rel": "self", "href": "catalog.json"},
                {"rel": "child", "href": "a.json"},
                {"rel": "license", "href": "https://example.com/license", "title": "License"},
                {"rel": "about", "href": "https://example.com"}
            ]}),
            None,
            "https://host/catalog.json",
        );

        let related: Vec<_> = node.related_links().map(|link| link.label()).collect();
        assert_eq!(related, vec!["License", "about"]);
    }

    #[test]
    fn test_collection_keeps_extent() {
        let node = build(
            json!({"id": "c", "extent": {"temporal": {"interval": [[null, null]]}}}),
            Some(CHILD_REL),
            "https://host/c/collection.json",
        );
        assert_eq!(node.kind(), NodeKind::Collection);
        assert!(node.extent().is_some());
        assert!(node.item().is_none());
    }

    #[test]
    fn test_view_serializes_failures_as_text() {
        let mut node = build(json!({"id": "c"}), None, "https://host/catalog.json");
        node.failures
            .push(crate::FetchFailure::new("https://host/a.json", "404 Not Found").into());
        let view = NodeView {
            node,
            load_state: None,
            visible: true,
        };

        let value = serde_json::to_value(&view).unwrap();
        assert_eq!(value["failures"][0], "Failed to load https://host/a.json: 404 Not Found");
        assert_eq!(value["visible"], true);
    }
}
