//! Quest Graph Cursor
//!
//! A player's position on one quest graph: the root of the chain being
//! walked and the node the player currently stands on.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Node identifier, unique within one quest. Negative values are reserved
/// for sentinels.
pub type NodeId = i32;

/// Position of a player on a quest graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cursor {
    pub root: NodeId,
    pub node: NodeId,
}

impl Cursor {
    /// Not on any graph (used once a quest has been completed)
    pub const NONE: Cursor = Cursor { root: -1, node: -1 };

    pub fn new(root: NodeId, node: NodeId) -> Self {
        Self { root, node }
    }

    /// Cursor standing on a chain root
    pub fn at_root(root: NodeId) -> Self {
        Self { root, node: root }
    }

    /// Whether the cursor points into a graph at all
    pub fn is_valid(&self) -> bool {
        self.root >= 0 && self.node >= 0
    }

    pub fn is_at_root(&self) -> bool {
        self.is_valid() && self.root == self.node
    }

    /// Same chain, next node
    pub fn advance(self, next: NodeId) -> Self {
        Self {
            root: self.root,
            node: next,
        }
    }
}

impl Default for Cursor {
    fn default() -> Self {
        Self::NONE
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "({}, {})", self.root, self.node)
        } else {
            write!(f, "(off-graph)")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_positions() {
        let cursor = Cursor::at_root(4);
        assert!(cursor.is_valid());
        assert!(cursor.is_at_root());

        let moved = cursor.advance(7);
        assert_eq!(moved, Cursor::new(4, 7));
        assert!(!moved.is_at_root());
    }

    #[test]
    fn test_none_sentinel() {
        assert!(!Cursor::NONE.is_valid());
        assert!(!Cursor::NONE.is_at_root());
        assert_eq!(Cursor::default(), Cursor::NONE);
        assert_eq!(Cursor::NONE.to_string(), "(off-graph)");
        assert_eq!(Cursor::new(1, 2).to_string(), "(1, 2)");
    }
}
