//! Index-addressed JSON tree under construction.
//!
//! Open elements are referenced by [`NodeId`] so the builder can keep a stack
//! of them while the tree keeps growing.

use serde_json::{Map, Value};

use crate::error::{Result, ReviewError};

/// Key holding text of an element that also has attributes or children
pub const TEXT_KEY: &str = "#text";

/// Handle to a node in the [`Arena`]
pub type NodeId = usize;

#[derive(Debug)]
enum Node {
    /// Element with no attributes, children or text yet
    Pending,
    Text(String),
    Object(Vec<(String, NodeId)>),
    Array(Vec<NodeId>),
}

#[derive(Debug, Default)]
pub struct Arena {
    nodes: Vec<Node>,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    /// New element node, an object when it carries attributes
    pub fn element(&mut self, attributes: Vec<(String, String)>) -> NodeId {
        if attributes.is_empty() {
            return self.alloc(Node::Pending);
        }
        let entries = attributes
            .into_iter()
            .map(|(key, value)| {
                let id = self.alloc(Node::Text(value));
                (key, id)
            })
            .collect();
        self.alloc(Node::Object(entries))
    }

    /// Empty object node
    pub fn object(&mut self) -> NodeId {
        self.alloc(Node::Object(Vec::new()))
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| ReviewError::Transduce(format!("dangling node {id}")))
    }

    /// Turn a pending or text node into an object so it can take children.
    fn make_object(&mut self, id: NodeId) -> Result<()> {
        let text = match self.node_mut(id)? {
            Node::Object(_) => return Ok(()),
            Node::Array(_) => {
                return Err(ReviewError::Transduce("parent element is not an object".into()));
            },
            Node::Pending => None,
            Node::Text(s) => Some(std::mem::take(s)),
        };

        let entries = match text {
            Some(text) => vec![(TEXT_KEY.to_string(), self.alloc(Node::Text(text)))],
            None => Vec::new(),
        };
        *self.node_mut(id)? = Node::Object(entries);
        Ok(())
    }

    /// Insert `child` under `parent` as `name`, folding repeats into an array.
    pub fn insert_child(&mut self, parent: NodeId, name: &str, child: NodeId) -> Result<()> {
        self.make_object(parent)?;

        let existing = match self.node_mut(parent)? {
            Node::Object(entries) => entries.iter().position(|(key, _)| key == name),
            _ => None,
        };
        let Some(index) = existing else {
            if let Node::Object(entries) = self.node_mut(parent)? {
                entries.push((name.to_string(), child));
            }
            return Ok(());
        };

        let current = match self.node_mut(parent)? {
            Node::Object(entries) => entries[index].1,
            _ => return Err(ReviewError::Transduce("parent element is not an object".into())),
        };
        if let Node::Array(items) = self.node_mut(current)? {
            items.push(child);
            return Ok(());
        }

        let array = self.alloc(Node::Array(vec![current, child]));
        if let Node::Object(entries) = self.node_mut(parent)? {
            entries[index].1 = array;
        }
        Ok(())
    }

    /// Append trimmed character data to an element.
    pub fn append_text(&mut self, id: NodeId, text: &str) -> Result<()> {
        let node = self.node_mut(id)?;
        let text_child = match *node {
            Node::Pending => {
                *node = Node::Text(text.to_string());
                return Ok(());
            },
            Node::Text(ref mut s) => {
                s.push_str(text);
                return Ok(());
            },
            Node::Array(_) => {
                return Err(ReviewError::Transduce("text target is not an element".into()));
            },
            Node::Object(ref entries) => entries
                .iter()
                .find(|(key, _)| key == TEXT_KEY)
                .map(|(_, child)| *child),
        };

        match text_child {
            Some(child) => self.append_text(child, text),
            None => {
                let child = self.alloc(Node::Text(text.to_string()));
                if let Node::Object(entries) = self.node_mut(id)? {
                    entries.push((TEXT_KEY.to_string(), child));
                }
                Ok(())
            },
        }
    }

    /// Materialize the subtree rooted at `id`.
    ///
    /// An element that never received content becomes `{}`.
    pub fn to_value(&self, id: NodeId) -> Value {
        match self.nodes.get(id) {
            None | Some(Node::Pending) => Value::Object(Map::new()),
            Some(Node::Text(s)) => Value::String(s.clone()),
            Some(Node::Object(entries)) => Value::Object(
                entries
                    .iter()
                    .map(|(key, child)| (key.clone(), self.to_value(*child)))
                    .collect(),
            ),
            Some(Node::Array(items)) => Value::Array(items.iter().map(|child| self.to_value(*child)).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_then_child_keeps_text() {
        let mut arena = Arena::new();
        let root = arena.object();
        let a = arena.element(Vec::new());
        arena.insert_child(root, "a", a).unwrap();
        arena.append_text(a, "text").unwrap();
        let b = arena.element(Vec::new());
        arena.insert_child(a, "b", b).unwrap();
        arena.append_text(a, "more").unwrap();

        assert_eq!(arena.to_value(root), json!({"a": {"#text": "textmore", "b": {}}}));
    }

    #[test]
    fn test_repeats_fold_into_array() {
        let mut arena = Arena::new();
        let root = arena.object();
        for text in ["1", "2", "3"] {
            let b = arena.element(Vec::new());
            arena.insert_child(root, "b", b).unwrap();
            arena.append_text(b, text).unwrap();
        }
        assert_eq!(arena.to_value(root), json!({"b": ["1", "2", "3"]}));
    }

    #[test]
    fn test_attributes_and_text() {
        let mut arena = Arena::new();
        let el = arena.element(vec![("id".into(), "7".into())]);
        arena.append_text(el, "x").unwrap();
        assert_eq!(arena.to_value(el), json!({"id": "7", "#text": "x"}));
    }

    #[test]
    fn test_array_parent_is_rejected() {
        let mut arena = Arena::new();
        let root = arena.object();
        for _ in 0..2 {
            let b = arena.element(Vec::new());
            arena.insert_child(root, "b", b).unwrap();
        }
        // Node 3 is the folded array.
        let child = arena.element(Vec::new());
        assert!(arena.insert_child(3, "c", child).is_err());
        assert!(arena.append_text(3, "t").is_err());
    }
}
