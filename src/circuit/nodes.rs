//! Node registry.
//!
//! Maps terminal names to dense equation indices. Ground is always index 0
//! and is never solved for; every other node gets the next free index the
//! first time it is seen. The registry is append-only.

use std::collections::HashMap;

use super::types::{Node, NodeId, NodeType};

/// Names that always refer to ground.
pub const GROUND_NAMES: [&str; 2] = ["0", "gnd"];

/// Append-only registry of circuit nodes.
#[derive(Debug, Clone)]
pub struct Nodes {
    nodes: Vec<Node>,
    lookup: HashMap<String, NodeId>,
}

impl Default for Nodes {
    fn default() -> Self {
        Self::new()
    }
}

impl Nodes {
    /// Create a registry holding only ground.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                name: "0".to_string(),
                id: NodeId::GROUND,
                node_type: NodeType::Voltage,
            }],
            lookup: HashMap::new(),
        }
    }

    /// Whether a name refers to ground.
    pub fn is_ground_name(name: &str) -> bool {
        GROUND_NAMES.iter().any(|g| g.eq_ignore_ascii_case(name))
    }

    /// Return the index of a voltage node, registering it if needed.
    pub fn map(&mut self, name: &str) -> NodeId {
        if Self::is_ground_name(name) {
            return NodeId::GROUND;
        }
        if let Some(&id) = self.lookup.get(name) {
            return id;
        }
        self.push(name, NodeType::Voltage)
    }

    /// Allocate a new auxiliary unknown distinct from user-visible pins.
    ///
    /// Internal names are made unique by suffixing when they collide with an
    /// existing node.
    pub fn create(&mut self, name: &str, node_type: NodeType) -> NodeId {
        let mut unique = name.to_string();
        let mut suffix = 1;
        while self.lookup.contains_key(&unique) || Self::is_ground_name(&unique) {
            unique = format!("{}_{}", name, suffix);
            suffix += 1;
        }
        self.push(&unique, node_type)
    }

    fn push(&mut self, name: &str, node_type: NodeType) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            name: name.to_string(),
            id,
            node_type,
        });
        self.lookup.insert(name.to_string(), id);
        id
    }

    /// Find a node by name without registering it.
    pub fn find(&self, name: &str) -> Option<NodeId> {
        if Self::is_ground_name(name) {
            return Some(NodeId::GROUND);
        }
        self.lookup.get(name).copied()
    }

    /// Node at an index.
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Number of equations (excluding ground).
    pub fn count(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Type of the unknown at an equation index.
    pub fn node_type(&self, index: usize) -> NodeType {
        self.nodes
            .get(index)
            .map(|n| n.node_type)
            .unwrap_or(NodeType::Voltage)
    }

    /// Iterate all nodes except ground in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().skip(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ground_is_zero() {
        let mut nodes = Nodes::new();
        assert_eq!(nodes.map("0"), NodeId::GROUND);
        assert_eq!(nodes.map("GND"), NodeId::GROUND);
        assert_eq!(nodes.count(), 0);
    }

    #[test]
    fn test_indices_are_dense() {
        let mut nodes = Nodes::new();
        assert_eq!(nodes.map("in"), NodeId(1));
        assert_eq!(nodes.map("out"), NodeId(2));
        assert_eq!(nodes.map("in"), NodeId(1));
        let branch = nodes.create("V1#branch", NodeType::Current);
        assert_eq!(branch, NodeId(3));
        assert_eq!(nodes.node_type(3), NodeType::Current);
        assert_eq!(nodes.count(), 3);
    }

    #[test]
    fn test_create_makes_unique_names() {
        let mut nodes = Nodes::new();
        nodes.map("a");
        let internal = nodes.create("a", NodeType::Voltage);
        assert_eq!(nodes.get(internal).unwrap().name, "a_1");
        assert_eq!(nodes.find("a"), Some(NodeId(1)));
    }
}
