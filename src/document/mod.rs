// Live document tree abstraction
// The engine never caches nodes or tree shape: every lookup goes through here

//! # Document Module
//!
//! The engine operates on a live, externally mutable tree of nodes. It does
//! not own that tree; it only needs the capabilities in [`DocumentTree`]:
//! attribute access, structural navigation, node removal, text content and
//! target resolution by id or simple selector.
//!
//! Mutating methods take `&self`: the tree is shared (behind an `Arc`) between
//! the engine, running actions and whatever owns the trigger source, so
//! implementations use interior mutability.
//!
//! [`InMemoryDocument`] is the arena-backed implementation used by the CLI and
//! the tests.

pub mod memory;

pub use memory::{InMemoryDocument, NodeSpec};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Result;

/// Opaque handle to a node in a [`DocumentTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// Capabilities the engine and its actions need from a live node tree
pub trait DocumentTree: Send + Sync {
    /// The root node
    fn root(&self) -> NodeId;

    /// First connected node (in document order) whose `id` attribute equals `id`
    fn get_element_by_id(&self, id: &str) -> Option<NodeId>;

    /// Whether the node is still attached to the root
    fn is_connected(&self, node: NodeId) -> bool;

    fn tag_name(&self, node: NodeId) -> Option<String>;

    fn attribute(&self, node: NodeId, name: &str) -> Option<String>;

    fn set_attribute(&self, node: NodeId, name: &str, value: &str) -> Result<()>;

    fn remove_attribute(&self, node: NodeId, name: &str) -> Result<()>;

    fn parent(&self, node: NodeId) -> Option<NodeId>;

    /// Direct children in document order
    fn children(&self, node: NodeId) -> Vec<NodeId>;

    /// Detach the node (and its subtree) from the tree
    fn remove(&self, node: NodeId) -> Result<()>;

    fn text_content(&self, node: NodeId) -> Option<String>;

    fn set_text_content(&self, node: NodeId, text: &str) -> Result<()>;

    /// Resolve a target reference to zero or more connected nodes.
    ///
    /// A bare token is an element id. Otherwise the reference is a
    /// comma-separated list of `#id`, `.class` or `tag` selectors matched in
    /// document order.
    fn resolve_targets(&self, reference: &str) -> Vec<NodeId>;

    fn has_attribute(&self, node: NodeId, name: &str) -> bool {
        self.attribute(node, name).is_some()
    }

    /// The node's non-empty `id` attribute
    fn element_id(&self, node: NodeId) -> Option<String> {
        self.attribute(node, "id").filter(|id| !id.trim().is_empty())
    }

    /// Stable identity used for lifecycle state keys: the element id when
    /// present, otherwise a handle-derived name.
    fn identity(&self, node: NodeId) -> String {
        self.element_id(node).unwrap_or_else(|| node.to_string())
    }

    /// Direct children carrying the given tag (case-insensitive)
    fn children_with_tag(&self, node: NodeId, tag: &str) -> Vec<NodeId> {
        self.children(node)
            .into_iter()
            .filter(|child| {
                self.tag_name(*child)
                    .map(|name| name.eq_ignore_ascii_case(tag))
                    .unwrap_or(false)
            })
            .collect()
    }

    fn classes(&self, node: NodeId) -> Vec<String> {
        self.attribute(node, "class")
            .map(|raw| raw.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    fn has_class(&self, node: NodeId, class: &str) -> bool {
        self.classes(node).iter().any(|c| c == class)
    }

    fn add_class(&self, node: NodeId, class: &str) -> Result<()> {
        let mut classes = self.classes(node);
        if !classes.iter().any(|c| c == class) {
            classes.push(class.to_string());
        }
        self.set_attribute(node, "class", &classes.join(" "))
    }

    fn remove_class(&self, node: NodeId, class: &str) -> Result<()> {
        let classes: Vec<String> = self
            .classes(node)
            .into_iter()
            .filter(|c| c != class)
            .collect();
        self.set_attribute(node, "class", &classes.join(" "))
    }

    /// Toggle a class, returning whether it is present afterwards
    fn toggle_class(&self, node: NodeId, class: &str) -> Result<bool> {
        if self.has_class(node, class) {
            self.remove_class(node, class)?;
            Ok(false)
        } else {
            self.add_class(node, class)?;
            Ok(true)
        }
    }
}
