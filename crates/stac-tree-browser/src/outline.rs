//! Outline rendering of the visible tree
//!
//! Nodes are listed depth-first in child order. A node's children are listed when it is open, or,
//! under an active query, when some of them are visible so that every match can be reached.

use crate::BrowserError;
use crate::state::Stats;
use serde::Serialize;
use stac_tree_lib::document::Link;
use stac_tree_lib::{CatalogTree, LoadState, Node, NodeId, NodeKind, NodeView, Payload};
use std::io::Write;

/// What to include in the outline
#[derive(Debug, Clone, Copy, Default)]
pub struct OutlineOptions {
    /// List nodes hidden by the query as well
    pub show_hidden: bool,
    /// Print description, providers, links, bounds and assets under each node
    pub details: bool,
}

/// One line of the outline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutlineRow {
    pub node: NodeId,
    pub level: usize,
}

/// Rows of the outline in display order
pub fn outline(tree: &CatalogTree, options: OutlineOptions) -> Vec<OutlineRow> {
    #[cfg(feature = "profiling")]
    profiling::scope!("outline::outline");

    let visibility = tree.visibility();
    let shown = |node: NodeId| options.show_hidden || visibility.contains(node);

    let mut rows = Vec::new();
    let mut stack: Vec<OutlineRow> = tree
        .root()
        .map(|node| OutlineRow { node, level: 0 })
        .into_iter()
        .collect();

    while let Some(row) = stack.pop() {
        if !shown(row.node) {
            continue;
        }
        rows.push(row);

        let Ok(children) = tree.children(row.node) else {
            continue;
        };
        let open = tree.with_node(row.node, |node| node.is_open()).unwrap_or(false);
        let leads_to_match =
            visibility.is_filtered() && children.iter().any(|&child| visibility.contains(child));
        if open || leads_to_match {
            stack.extend(children.into_iter().rev().map(|node| OutlineRow {
                node,
                level: row.level + 1,
            }));
        }
    }
    rows
}

/// Print the outline as indented text
pub fn write_text<W: Write>(
    tree: &CatalogTree,
    options: OutlineOptions,
    out: &mut W,
) -> Result<(), BrowserError> {
    let visibility = tree.visibility();
    for row in outline(tree, options) {
        let view = tree.view(row.node)?;
        let indent = "  ".repeat(row.level);
        let mut line = format!("{indent}{}", describe(&view));
        if visibility.is_direct_match(row.node) {
            line.push_str(" <match>");
        }
        if !view.visible {
            line.push_str(" (hidden)");
        }
        writeln!(out, "{line}")?;

        if options.details {
            write_details(&view.node, &format!("{indent}    "), out)?;
        }
        for failure in view.node.failures() {
            writeln!(out, "{indent}    ! {failure}")?;
        }
    }
    Ok(())
}

fn write_details<W: Write>(node: &Node, indent: &str, out: &mut W) -> std::io::Result<()> {
    let descriptor = node.descriptor();
    if let Some(description) = descriptor.description.as_deref().filter(|d| !d.is_empty()) {
        writeln!(out, "{indent}{description}")?;
    }
    if !descriptor.keywords.is_empty() {
        writeln!(out, "{indent}keywords: {}", descriptor.keywords.join(", "))?;
    }
    for provider in &descriptor.providers {
        if provider.roles.is_empty() {
            writeln!(out, "{indent}provider: {}", provider.name)?;
        } else {
            writeln!(out, "{indent}provider: {} ({})", provider.name, provider.roles.join(", "))?;
        }
    }
    for link in node.related_links() {
        writeln!(out, "{indent}link: {} {}", link.label(), link.href)?;
    }
    if let Some([west, south, east, north]) = bounds(node) {
        writeln!(out, "{indent}bounds: {west}, {south}, {east}, {north}")?;
    }
    for asset in node.item().map(|item| item.assets.as_slice()).unwrap_or_default() {
        let image = if asset.is_image() { " (image)" } else { "" };
        writeln!(out, "{indent}asset: {} {}{image}", asset.label(), asset.href)?;
    }
    Ok(())
}

/// West, south, east, north of an Item's footprint
fn bounds(node: &Node) -> Option<[f64; 4]> {
    let rect = node.item()?.footprint()?.bounds()?;
    Some([rect.min().x, rect.min().y, rect.max().x, rect.max().y])
}

/// Marker, title, kind and state of one node
fn describe(view: &NodeView) -> String {
    let node = &view.node;
    let marker = match (node.kind(), node.is_open()) {
        (NodeKind::Item, _) => "-",
        (_, true) => "v",
        (_, false) => ">",
    };

    let id = &node.descriptor().id;
    let title = node.display_title();
    let mut text = if title == id {
        format!("{marker} {id} [{}]", node.kind())
    } else {
        format!("{marker} {title} ({id}) [{}]", node.kind())
    };

    match node.payload() {
        Payload::Collection { .. } => match view.load_state {
            Some(LoadState::Loaded) => text.push_str(&format!(" {} items", node.children().len())),
            Some(LoadState::Loading) => text.push_str(" loading"),
            Some(LoadState::Unloaded) | None => text.push_str(" unloaded"),
        },
        Payload::Item(item) => {
            if let Some(datetime) = &item.datetime {
                text.push_str(&format!(" {datetime}"));
            }
            match item.assets.len() {
                0 => {}
                1 => text.push_str(" 1 asset"),
                n => text.push_str(&format!(" {n} assets")),
            }
        }
        Payload::Catalog => {}
    }
    text
}

#[derive(Serialize)]
struct JsonRow {
    level: usize,
    direct_match: bool,
    related_links: Vec<Link>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bounds: Option<[f64; 4]>,
    #[serde(flatten)]
    view: NodeView,
}

#[derive(Serialize)]
struct JsonOutline {
    query: String,
    stats: Stats,
    nodes: Vec<JsonRow>,
}

/// Print the outline and statistics as a JSON document
pub fn write_json<W: Write>(
    tree: &CatalogTree,
    options: OutlineOptions,
    out: &mut W,
) -> Result<(), BrowserError> {
    let visibility = tree.visibility();
    let nodes = outline(tree, options)
        .into_iter()
        .map(|row| {
            let view = tree.view(row.node)?;
            Ok(JsonRow {
                level: row.level,
                direct_match: visibility.is_direct_match(row.node),
                related_links: view.node.related_links().cloned().collect(),
                bounds: bounds(&view.node),
                view,
            })
        })
        .collect::<Result<Vec<_>, BrowserError>>()?;

    let document = JsonOutline {
        query: visibility.query().to_string(),
        stats: Stats::collect(tree),
        nodes,
    };
    serde_json::to_writer_pretty(&mut *out, &document)?;
    writeln!(out)?;
    Ok(())
}
