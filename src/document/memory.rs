// In-memory document tree
// Arena-backed implementation of DocumentTree for tests, tooling and the CLI

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{DocumentTree, NodeId};
use crate::{InvokerError, Result};

/// Serializable description of a subtree, used to load and dump documents as JSON
///
/// ```json
/// { "tag": "body", "children": [
///     { "tag": "button", "attributes": { "id": "save", "commandfor": "status" } },
///     { "tag": "output", "attributes": { "id": "status" }, "text": "idle" }
/// ] }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub tag: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeSpec>,
}

#[derive(Debug, Clone)]
struct NodeData {
    tag: String,
    attributes: BTreeMap<String, String>,
    text: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug, Default)]
struct Arena {
    nodes: HashMap<NodeId, NodeData>,
    next_id: u64,
}

impl Arena {
    fn alloc(&mut self, tag: &str) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            id,
            NodeData {
                tag: tag.to_ascii_lowercase(),
                attributes: BTreeMap::new(),
                text: String::new(),
                parent: None,
                children: Vec::new(),
            },
        );
        id
    }

    fn node(&self, id: NodeId) -> Result<&NodeData> {
        self.nodes
            .get(&id)
            .ok_or_else(|| InvokerError::Document(format!("unknown node {id}")))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut NodeData> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| InvokerError::Document(format!("unknown node {id}")))
    }

    fn detach(&mut self, id: NodeId) -> Result<()> {
        let parent = self.node(id)?.parent;
        if let Some(parent) = parent {
            self.node_mut(parent)?.children.retain(|child| *child != id);
        }
        self.node_mut(id)?.parent = None;
        Ok(())
    }

    fn is_ancestor_or_self(&self, ancestor: NodeId, mut node: NodeId) -> bool {
        loop {
            if node == ancestor {
                return true;
            }
            match self.nodes.get(&node).and_then(|data| data.parent) {
                Some(parent) => node = parent,
                None => return false,
            }
        }
    }

    /// Connected nodes in document order
    fn walk(&self, root: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if let Some(data) = self.nodes.get(&id) {
                order.push(id);
                stack.extend(data.children.iter().rev().copied());
            }
        }
        order
    }

    fn build(&mut self, spec: &NodeSpec) -> NodeId {
        let id = self.alloc(&spec.tag);
        let children: Vec<NodeId> = spec.children.iter().map(|child| self.build(child)).collect();
        for child in &children {
            if let Some(data) = self.nodes.get_mut(child) {
                data.parent = Some(id);
            }
        }
        if let Some(data) = self.nodes.get_mut(&id) {
            data.attributes = spec.attributes.clone();
            data.text = spec.text.clone();
            data.children = children;
        }
        id
    }

    fn dump(&self, id: NodeId) -> NodeSpec {
        match self.nodes.get(&id) {
            Some(data) => NodeSpec {
                tag: data.tag.clone(),
                attributes: data.attributes.clone(),
                text: data.text.clone(),
                children: data.children.iter().map(|child| self.dump(*child)).collect(),
            },
            None => NodeSpec::default(),
        }
    }
}

/// Arena-backed [`DocumentTree`].
///
/// Removed nodes stay in the arena (detached), so handles held by the engine
/// keep answering attribute and child queries, just like detached DOM nodes.
#[derive(Debug)]
pub struct InMemoryDocument {
    arena: RwLock<Arena>,
    root: NodeId,
}

impl InMemoryDocument {
    /// Create an empty document with a `body` root
    pub fn new() -> Self {
        Self::from_spec(&NodeSpec {
            tag: "body".to_string(),
            ..Default::default()
        })
    }

    pub fn from_spec(spec: &NodeSpec) -> Self {
        let mut arena = Arena::default();
        let root = arena.build(spec);
        Self {
            arena: RwLock::new(arena),
            root,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let spec: NodeSpec = serde_json::from_str(json)?;
        Ok(Self::from_spec(&spec))
    }

    /// Snapshot of the connected tree
    pub fn to_spec(&self) -> NodeSpec {
        self.read().dump(self.root)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_spec())?)
    }

    /// Create a detached element
    pub fn create_element(&self, tag: &str) -> NodeId {
        self.write().alloc(tag)
    }

    /// Move `child` under `parent`, detaching it from any previous parent
    pub fn append_child(&self, parent: NodeId, child: NodeId) -> Result<()> {
        let mut arena = self.write();
        arena.node(parent)?;
        arena.node(child)?;
        if arena.is_ancestor_or_self(child, parent) {
            return Err(InvokerError::Document(format!(
                "cannot append {child} inside its own subtree"
            )));
        }
        arena.detach(child)?;
        arena.node_mut(child)?.parent = Some(parent);
        arena.node_mut(parent)?.children.push(child);
        Ok(())
    }

    /// Create an element with the given attributes and append it to `parent`
    pub fn append_element(
        &self,
        parent: NodeId,
        tag: &str,
        attributes: &[(&str, &str)],
    ) -> Result<NodeId> {
        let mut arena = self.write();
        arena.node(parent)?;
        let id = arena.alloc(tag);
        let data = arena.node_mut(id)?;
        for (name, value) in attributes {
            data.attributes.insert(name.to_string(), value.to_string());
        }
        data.parent = Some(parent);
        arena.node_mut(parent)?.children.push(id);
        Ok(id)
    }

    fn read(&self) -> RwLockReadGuard<'_, Arena> {
        self.arena.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Arena> {
        self.arena.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn matches_selector(data: &NodeData, selector: &str) -> bool {
        if let Some(id) = selector.strip_prefix('#') {
            data.attributes.get("id").map(String::as_str) == Some(id)
        } else if let Some(class) = selector.strip_prefix('.') {
            data.attributes
                .get("class")
                .map(|classes| classes.split_whitespace().any(|c| c == class))
                .unwrap_or(false)
        } else {
            data.tag.eq_ignore_ascii_case(selector)
        }
    }
}

impl Default for InMemoryDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentTree for InMemoryDocument {
    fn root(&self) -> NodeId {
        self.root
    }

    fn get_element_by_id(&self, id: &str) -> Option<NodeId> {
        let arena = self.read();
        arena.walk(self.root).into_iter().find(|node| {
            arena
                .nodes
                .get(node)
                .and_then(|data| data.attributes.get("id"))
                .map(String::as_str)
                == Some(id)
        })
    }

    fn is_connected(&self, node: NodeId) -> bool {
        let arena = self.read();
        arena.nodes.contains_key(&node) && arena.is_ancestor_or_self(self.root, node)
    }

    fn tag_name(&self, node: NodeId) -> Option<String> {
        self.read().nodes.get(&node).map(|data| data.tag.clone())
    }

    fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
        self.read()
            .nodes
            .get(&node)
            .and_then(|data| data.attributes.get(name).cloned())
    }

    fn set_attribute(&self, node: NodeId, name: &str, value: &str) -> Result<()> {
        self.write()
            .node_mut(node)?
            .attributes
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn remove_attribute(&self, node: NodeId, name: &str) -> Result<()> {
        self.write().node_mut(node)?.attributes.remove(name);
        Ok(())
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.read().nodes.get(&node).and_then(|data| data.parent)
    }

    fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.read()
            .nodes
            .get(&node)
            .map(|data| data.children.clone())
            .unwrap_or_default()
    }

    fn remove(&self, node: NodeId) -> Result<()> {
        if node == self.root {
            return Err(InvokerError::Document("cannot remove the root".to_string()));
        }
        self.write().detach(node)
    }

    fn text_content(&self, node: NodeId) -> Option<String> {
        self.read().nodes.get(&node).map(|data| data.text.clone())
    }

    fn set_text_content(&self, node: NodeId, text: &str) -> Result<()> {
        self.write().node_mut(node)?.text = text.to_string();
        Ok(())
    }

    fn resolve_targets(&self, reference: &str) -> Vec<NodeId> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Vec::new();
        }

        let is_selector = reference.contains(|c: char| matches!(c, '#' | '.' | ',' | ' '));
        if !is_selector {
            return self.get_element_by_id(reference).into_iter().collect();
        }

        let selectors: Vec<&str> = reference
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        let arena = self.read();
        arena
            .walk(self.root)
            .into_iter()
            .filter(|node| *node != self.root)
            .filter(|node| {
                arena
                    .nodes
                    .get(node)
                    .map(|data| selectors.iter().any(|s| Self::matches_selector(data, s)))
                    .unwrap_or(false)
            })
            .collect()
    }
}
