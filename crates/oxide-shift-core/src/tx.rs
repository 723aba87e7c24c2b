//! Nested transaction bookkeeping.
//!
//! Most SQL engines only have flat transactions. [`TxTree`] emulates nesting
//! on top of a single real transaction: only the outermost node maps to a
//! real `BEGIN`/`COMMIT`/`ROLLBACK`, deeper nodes are virtual. The rules:
//!
//! - a finished node can't be committed or rolled back again,
//! - a node can't be resolved while any of its children is still active,
//! - once a node has rolled back, none of its ancestors may commit.
//!
//! Nodes live in an arena and are addressed by [`TxId`]. The tree doesn't
//! talk to the database; [`crate::db::Session`] pairs it with a connection.

use std::fmt;

/// Violations of the nested transaction rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TxError {
    /// `commit` on a node that has already been committed or rolled back.
    #[error("can't Commit a tx that has been committed or rolled back")]
    CommitFinished,

    /// `rollback` on a node that has already been committed or rolled back.
    #[error("can't Rollback a tx that has been committed or rolled back")]
    RollbackFinished,

    /// `commit` while a child is still active.
    #[error("trying to Commit a transaction that has unfinished children")]
    CommitWithUnfinishedChildren,

    /// `rollback` while a child is still active.
    #[error("trying to Rollback a transaction that has unfinished children")]
    RollbackWithUnfinishedChildren,

    /// `commit` after a descendant rolled back.
    #[error("can't Commit a tx that has rolled back children")]
    CommitAfterChildRollback,

    /// `begin` under a node that has already finished.
    #[error("can't begin a nested tx in a tx that has been committed or rolled back")]
    BeginOnFinished,

    /// The handle doesn't belong to this tree.
    #[error("unknown transaction handle {0}")]
    UnknownTransaction(TxId),
}

/// Handle of a node in a [`TxTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxId(usize);

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Begun, not yet resolved.
    Active,
    /// Committed.
    Committed,
    /// Rolled back.
    RolledBack,
}

/// What resolving a node means for the real transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// A nested node resolved; nothing to send to the database.
    Virtual,
    /// The outermost node resolved; the real transaction has to follow.
    Real,
}

#[derive(Debug)]
struct TxNode {
    parent: Option<TxId>,
    active_children: usize,
    child_rolled_back: bool,
    state: TxState,
}

/// Arena of nested transaction nodes.
#[derive(Debug, Default)]
pub struct TxTree {
    nodes: Vec<TxNode>,
}

impl TxTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a node. `None` starts an outermost node, which the caller
    /// backs with a real transaction.
    pub fn begin(&mut self, parent: Option<TxId>) -> Result<TxId, TxError> {
        if let Some(parent) = parent {
            let node = self.node_mut(parent)?;
            if node.state != TxState::Active {
                return Err(TxError::BeginOnFinished);
            }
            node.active_children += 1;
        }
        self.nodes.push(TxNode {
            parent,
            active_children: 0,
            child_rolled_back: false,
            state: TxState::Active,
        });
        Ok(TxId(self.nodes.len() - 1))
    }

    /// Commits a node.
    pub fn commit(&mut self, id: TxId) -> Result<Resolution, TxError> {
        let node = self.node(id)?;
        if node.state != TxState::Active {
            return Err(TxError::CommitFinished);
        }
        if node.child_rolled_back {
            return Err(TxError::CommitAfterChildRollback);
        }
        if node.active_children != 0 {
            return Err(TxError::CommitWithUnfinishedChildren);
        }
        Ok(self.finish(id, TxState::Committed))
    }

    /// Rolls back a node.
    pub fn rollback(&mut self, id: TxId) -> Result<Resolution, TxError> {
        let node = self.node(id)?;
        if node.state != TxState::Active {
            return Err(TxError::RollbackFinished);
        }
        if node.active_children != 0 {
            return Err(TxError::RollbackWithUnfinishedChildren);
        }
        Ok(self.finish(id, TxState::RolledBack))
    }

    /// State of a node.
    pub fn state(&self, id: TxId) -> Result<TxState, TxError> {
        self.node(id).map(|n| n.state)
    }

    /// Parent of a node, `None` for an outermost node.
    pub fn parent(&self, id: TxId) -> Result<Option<TxId>, TxError> {
        self.node(id).map(|n| n.parent)
    }

    fn finish(&mut self, id: TxId, state: TxState) -> Resolution {
        let node = &mut self.nodes[id.0];
        node.state = state;
        let Some(parent) = node.parent else {
            return Resolution::Real;
        };
        let parent = &mut self.nodes[parent.0];
        parent.active_children -= 1;
        if state == TxState::RolledBack {
            parent.child_rolled_back = true;
        }
        Resolution::Virtual
    }

    fn node(&self, id: TxId) -> Result<&TxNode, TxError> {
        self.nodes.get(id.0).ok_or(TxError::UnknownTransaction(id))
    }

    fn node_mut(&mut self, id: TxId) -> Result<&mut TxNode, TxError> {
        self.nodes.get_mut(id.0).ok_or(TxError::UnknownTransaction(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_levels() -> (TxTree, TxId, TxId, TxId) {
        let mut tree = TxTree::new();
        let top = tree.begin(None).unwrap();
        let child = tree.begin(Some(top)).unwrap();
        let grandchild = tree.begin(Some(child)).unwrap();
        (tree, top, child, grandchild)
    }

    #[test]
    fn test_commit_all() {
        let (mut tree, top, child, grandchild) = three_levels();

        assert_eq!(tree.commit(grandchild), Ok(Resolution::Virtual));
        assert_eq!(tree.commit(child), Ok(Resolution::Virtual));
        assert_eq!(tree.commit(top), Ok(Resolution::Real));
        assert_eq!(tree.state(top), Ok(TxState::Committed));
    }

    #[test]
    fn test_rollback_all() {
        let (mut tree, top, child, grandchild) = three_levels();

        assert_eq!(tree.rollback(grandchild), Ok(Resolution::Virtual));
        assert_eq!(tree.rollback(child), Ok(Resolution::Virtual));
        assert_eq!(tree.rollback(top), Ok(Resolution::Real));
        assert_eq!(tree.state(grandchild), Ok(TxState::RolledBack));
    }

    #[test]
    fn test_commit_after_grandchild_rollback() {
        let (mut tree, top, child, grandchild) = three_levels();

        tree.rollback(grandchild).unwrap();
        assert_eq!(tree.commit(child), Err(TxError::CommitAfterChildRollback));

        // The failed commit leaves the node active so it can still roll back.
        assert_eq!(tree.state(child), Ok(TxState::Active));
        tree.rollback(child).unwrap();
        assert_eq!(tree.commit(top), Err(TxError::CommitAfterChildRollback));
        assert_eq!(tree.rollback(top), Ok(Resolution::Real));
    }

    #[test]
    fn test_commit_after_child_rollback_following_grandchild_commit() {
        let (mut tree, top, child, grandchild) = three_levels();

        tree.commit(grandchild).unwrap();
        tree.rollback(child).unwrap();
        assert_eq!(tree.commit(top), Err(TxError::CommitAfterChildRollback));
    }

    #[test]
    fn test_unfinished_children() {
        let mut tree = TxTree::new();
        let top = tree.begin(None).unwrap();
        let child = tree.begin(Some(top)).unwrap();

        assert_eq!(tree.commit(top), Err(TxError::CommitWithUnfinishedChildren));
        assert_eq!(tree.rollback(top), Err(TxError::RollbackWithUnfinishedChildren));

        tree.commit(child).unwrap();
        assert_eq!(tree.commit(top), Ok(Resolution::Real));
    }

    #[test]
    fn test_finished_nodes() {
        let (mut tree, top, child, grandchild) = three_levels();

        tree.commit(grandchild).unwrap();
        assert_eq!(tree.commit(grandchild), Err(TxError::CommitFinished));
        assert_eq!(tree.rollback(grandchild), Err(TxError::RollbackFinished));

        tree.rollback(child).unwrap();
        assert_eq!(tree.commit(child), Err(TxError::CommitFinished));
        assert_eq!(tree.rollback(child), Err(TxError::RollbackFinished));

        tree.rollback(top).unwrap();
        // Double resolution is reported as such, not as a child rollback.
        assert_eq!(tree.commit(top), Err(TxError::CommitFinished));
        assert_eq!(tree.rollback(top), Err(TxError::RollbackFinished));
    }

    #[test]
    fn test_begin_on_finished() {
        let mut tree = TxTree::new();
        let top = tree.begin(None).unwrap();
        tree.commit(top).unwrap();
        assert_eq!(tree.begin(Some(top)), Err(TxError::BeginOnFinished));
    }

    #[test]
    fn test_siblings() {
        let mut tree = TxTree::new();
        let top = tree.begin(None).unwrap();
        let a = tree.begin(Some(top)).unwrap();
        let b = tree.begin(Some(top)).unwrap();

        tree.commit(a).unwrap();
        assert_eq!(tree.commit(top), Err(TxError::CommitWithUnfinishedChildren));
        tree.commit(b).unwrap();
        assert_eq!(tree.parent(b), Ok(Some(top)));
        assert_eq!(tree.commit(top), Ok(Resolution::Real));
    }

    #[test]
    fn test_unknown_handle() {
        let mut tree = TxTree::new();
        let mut other = TxTree::new();
        other.begin(None).unwrap();
        let foreign = other.begin(None).unwrap();
        assert_eq!(tree.commit(foreign), Err(TxError::UnknownTransaction(foreign)));
    }
}
