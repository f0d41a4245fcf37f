//! Input document shapes
//!
//! Lenient serde views over fetched STAC JSON. Every field is optional or defaulted: the tree does
//! not validate documents against the STAC schema, it only extracts what it can display and
//! follow.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A reference from one document to another (or to any external resource)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    /// Relation type, e.g. "child", "item", "license"
    #[serde(default)]
    pub rel: String,
    /// Absolute or relative reference
    pub href: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Media type of the linked resource
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

impl Link {
    /// Label for displaying the link, falling back to its relation
    pub fn label(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.rel)
    }
}

/// An organization capturing or processing the data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Asset entry exactly as found in an Item document (href not yet resolved)
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawAsset {
    pub href: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "type", default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// The `properties` object of an Item
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Properties {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub datetime: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// Union of the fields the tree reads from Catalog, Collection and Item documents
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Document {
    /// Explicit type marker ("Catalog", "Collection", "Feature")
    #[serde(rename = "type", default)]
    pub type_marker: Option<String>,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default)]
    pub providers: Vec<Provider>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub extent: Option<Value>,
    #[serde(default)]
    pub bbox: Option<Vec<f64>>,
    #[serde(default)]
    pub geometry: Option<Value>,
    #[serde(default)]
    pub properties: Properties,
    /// Top-level datetime, accepted as a fallback for `properties.datetime`
    #[serde(default)]
    pub datetime: Option<String>,
    #[serde(default)]
    pub assets: BTreeMap<String, RawAsset>,
}

impl Document {
    /// Parse a fetched JSON value
    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    /// Links with the given relation, in document order
    pub fn links_with_rel<'a>(&'a self, rel: &'a str) -> impl Iterator<Item = &'a Link> + 'a {
        self.links.iter().filter(move |link| link.rel == rel)
    }

    pub fn has_links_with_rel(&self, rel: &str) -> bool {
        self.links_with_rel(rel).next().is_some()
    }
}
