//! The sealed operation-tree arena.
//!
//! An [`OperationTree`] owns every node of one source unit plus the interned symbol side
//! tables. Trees are immutable once sealed by the
//! [`OperationTreeBuilder`](crate::operation::OperationTreeBuilder); graph construction and
//! all nested-graph builds share one tree behind an `Arc`.

use std::fmt;

use bitflags::bitflags;

use crate::operation::node::Operation;
use crate::operation::symbol::{FunctionId, FunctionSymbol, Local, LocalId};
use crate::Result;

/// Reference to an operation node inside an [`OperationTree`].
///
/// Ids are dense arena indexes; an id is only meaningful together with the tree that
/// allocated it. Passing an id from another tree fails resolution rather than aliasing a
/// different node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(usize);

impl OperationId {
    /// Creates an operation id from its arena index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the arena index of this operation.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op{}", self.0)
    }
}

bitflags! {
    /// Per-source-unit switches recorded on the tree.
    ///
    /// These mirror external configuration of the originating source unit; graph
    /// construction refuses units whose required switches are unset.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TreeFlags: u32 {
        /// Flow analysis is enabled for this unit.
        ///
        /// When unset, [`ControlFlowGraph::create`](crate::ControlFlowGraph::create) fails
        /// with [`Error::FlowAnalysisDisabled`](crate::Error::FlowAnalysisDisabled).
        const FLOW_ANALYSIS = 0x0001;
    }
}

/// The resolved semantic binding of a source unit.
///
/// Front ends attach a semantic context when the unit's symbols and types have been
/// resolved. Trees assembled without one (for example, synthesized fragments) cannot be
/// lowered into a control flow graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemanticContext {
    name: String,
}

impl SemanticContext {
    /// Creates a semantic context labeled with the originating unit's name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Returns the originating unit's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A sealed operation tree for one source unit.
///
/// The tree owns its operation arena and the interned side tables for locals and
/// local-function symbols. All lookups are index-based and infallible only through the
/// `Option`-returning accessors; dangling ids resolve to `None`.
///
/// # Thread Safety
///
/// `OperationTree` is immutable after sealing and therefore freely shared across threads;
/// graph construction holds it behind an `Arc`.
#[derive(Debug)]
pub struct OperationTree {
    operations: Vec<Operation>,
    locals: Vec<Local>,
    functions: Vec<FunctionSymbol>,
    flags: TreeFlags,
    semantic_context: Option<SemanticContext>,
}

impl OperationTree {
    pub(crate) fn new(
        operations: Vec<Operation>,
        locals: Vec<Local>,
        functions: Vec<FunctionSymbol>,
        flags: TreeFlags,
        semantic_context: Option<SemanticContext>,
    ) -> Self {
        Self {
            operations,
            locals,
            functions,
            flags,
            semantic_context,
        }
    }

    /// Returns the operation with the given id, or `None` if the id is dangling.
    #[must_use]
    pub fn operation(&self, id: OperationId) -> Option<&Operation> {
        self.operations.get(id.index())
    }

    /// Returns the local with the given id, or `None` if the id is dangling.
    #[must_use]
    pub fn local(&self, id: LocalId) -> Option<&Local> {
        self.locals.get(id.index())
    }

    /// Returns the function symbol with the given id, or `None` if the id is dangling.
    #[must_use]
    pub fn function(&self, id: FunctionId) -> Option<&FunctionSymbol> {
        self.functions.get(id.index())
    }

    /// Returns the number of operations in the tree.
    #[must_use]
    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    /// Returns the per-unit switches recorded on this tree.
    #[must_use]
    pub const fn flags(&self) -> TreeFlags {
        self.flags
    }

    /// Returns the semantic context the unit was bound with, if any.
    #[must_use]
    pub fn semantic_context(&self) -> Option<&SemanticContext> {
        self.semantic_context.as_ref()
    }

    /// Resolves an operation id, raising a lowering error for dangling ids.
    ///
    /// Used internally where a dangling id indicates builder-side inconsistency rather than
    /// caller misuse.
    pub(crate) fn resolve(&self, id: OperationId) -> Result<&Operation> {
        self.operations
            .get(id.index())
            .ok_or_else(|| lowering_error!("operation {id} is not part of the tree"))
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::node::{ConstValue, OperationKind};

    fn small_tree() -> OperationTree {
        OperationTree::new(
            vec![Operation::new(OperationKind::Literal {
                value: ConstValue::Int(1),
            })],
            vec![Local::new("x")],
            vec![FunctionSymbol::new("helper")],
            TreeFlags::FLOW_ANALYSIS,
            Some(SemanticContext::new("unit")),
        )
    }

    #[test]
    fn test_lookup_resolves_valid_ids() {
        let tree = small_tree();
        assert!(tree.operation(OperationId::new(0)).is_some());
        assert_eq!(tree.local(LocalId::new(0)).unwrap().name, "x");
        assert_eq!(tree.function(FunctionId::new(0)).unwrap().name, "helper");
    }

    #[test]
    fn test_lookup_rejects_dangling_ids() {
        let tree = small_tree();
        assert!(tree.operation(OperationId::new(99)).is_none());
        assert!(tree.local(LocalId::new(99)).is_none());
        assert!(tree.function(FunctionId::new(99)).is_none());
    }

    #[test]
    fn test_flags_and_context() {
        let tree = small_tree();
        assert!(tree.flags().contains(TreeFlags::FLOW_ANALYSIS));
        assert_eq!(tree.semantic_context().unwrap().name(), "unit");
    }

    #[test]
    fn test_resolve_reports_lowering_error() {
        let tree = small_tree();
        let error = tree.resolve(OperationId::new(42)).unwrap_err();
        assert!(matches!(error, crate::Error::Lowering { .. }));
    }
}
