//! Basic blocks and the lowered operations they contain.
//!
//! A [`BasicBlock`] is a maximal straight-line sequence of non-branching flow operations
//! terminated by zero or more typed [`ControlFlowBranch`](crate::flow::ControlFlowBranch)
//! edges. Lowering is a side table over the original operation tree: blocks reference tree
//! nodes by id and record synthesized captures next to them, but never rewrite the nodes
//! themselves.

use crate::flow::branch::ControlFlowBranch;
use crate::flow::capture::CaptureId;
use crate::flow::region::RegionId;
use crate::operation::{ConstValue, OperationId};

/// The position class of a basic block inside its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
pub enum BasicBlockKind {
    /// The unique entry block, always at ordinal 0 and empty of operations.
    Entry,
    /// An ordinary block.
    Block,
    /// The unique exit block, always at the last ordinal.
    Exit,
}

/// A value flowing between lowered operations.
///
/// Values either reference an operation of the original tree, a capture synthesized during
/// lowering, or a constant synthesized for short-circuit evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowValue {
    /// The value of an operation from the original tree.
    Operation(OperationId),
    /// The value stored in a flow capture.
    Capture(CaptureId),
    /// A constant synthesized by lowering (the short-circuited half of a boolean).
    Constant(ConstValue),
}

/// One lowered, non-branching step inside a basic block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowOperation {
    /// Evaluate the referenced tree operation for its effects. Control-flow-bearing
    /// subexpressions of the operation have already been evaluated into captures by
    /// preceding [`Capture`](Self::Capture) steps.
    Evaluate(OperationId),
    /// Evaluate `value` and store it into the capture named `id`.
    Capture {
        /// The capture being written.
        id: CaptureId,
        /// The captured value.
        value: FlowValue,
    },
}

/// An ordered, linear sequence of flow operations with typed outgoing branches.
///
/// Blocks are immutable once their graph is constructed. Every block knows its ordinal
/// (its position in the graph's block sequence), the leaf-most
/// [`ControlFlowRegion`](crate::flow::ControlFlowRegion) it belongs to, and whether any
/// path from the entry block reaches it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    /// Position of this block in the graph's block sequence.
    ordinal: usize,
    /// Position class of this block.
    kind: BasicBlockKind,
    /// The lowered operations, in execution order.
    operations: Vec<FlowOperation>,
    /// Outgoing branches; empty for the exit block, a single branch for straight-line
    /// flow, a true/false pair for conditions.
    branches: Vec<ControlFlowBranch>,
    /// The leaf-most region this block belongs to.
    region: RegionId,
    /// Whether any path from the entry reaches this block.
    is_reachable: bool,
}

impl BasicBlock {
    pub(crate) fn new(ordinal: usize, kind: BasicBlockKind, region: RegionId) -> Self {
        Self {
            ordinal,
            kind,
            operations: Vec::new(),
            branches: Vec::new(),
            region,
            is_reachable: false,
        }
    }

    /// Returns this block's position in the graph's block sequence.
    #[must_use]
    pub const fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Returns the position class of this block.
    #[must_use]
    pub const fn kind(&self) -> BasicBlockKind {
        self.kind
    }

    /// Returns the lowered operations of this block, in execution order.
    #[must_use]
    pub fn operations(&self) -> &[FlowOperation] {
        &self.operations
    }

    /// Returns the outgoing branches of this block.
    #[must_use]
    pub fn branches(&self) -> &[ControlFlowBranch] {
        &self.branches
    }

    /// Returns the leaf-most region this block belongs to.
    #[must_use]
    pub const fn region(&self) -> RegionId {
        self.region
    }

    /// Returns `true` if any path from the entry block reaches this block, including
    /// paths entering exception handlers whose protected region is reachable.
    #[must_use]
    pub const fn is_reachable(&self) -> bool {
        self.is_reachable
    }

    /// Returns the destinations of the outgoing branches, skipping branches that leave
    /// the graph.
    pub fn successors(&self) -> impl Iterator<Item = usize> + '_ {
        self.branches
            .iter()
            .filter_map(ControlFlowBranch::destination)
    }

    /// Returns the conditional branch pair of this block, if it ends in a condition.
    ///
    /// # Returns
    ///
    /// The `(when_true, when_false)` branches, or `None` when the block does not end in a
    /// conditional pair.
    #[must_use]
    pub fn conditional_pair(&self) -> Option<(&ControlFlowBranch, &ControlFlowBranch)> {
        let when_true = self
            .branches
            .iter()
            .find(|b| b.kind() == crate::flow::ControlFlowBranchKind::ConditionalTrue)?;
        let when_false = self
            .branches
            .iter()
            .find(|b| b.kind() == crate::flow::ControlFlowBranchKind::ConditionalFalse)?;
        Some((when_true, when_false))
    }

    pub(crate) fn push_operation(&mut self, operation: FlowOperation) {
        self.operations.push(operation);
    }

    pub(crate) fn set_branches(&mut self, branches: Vec<ControlFlowBranch>) {
        self.branches = branches;
    }

    pub(crate) fn mark_reachable(&mut self) {
        self.is_reachable = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::ControlFlowBranchKind;

    #[test]
    fn test_new_block_is_empty_and_unreachable() {
        let block = BasicBlock::new(3, BasicBlockKind::Block, RegionId::new(0));
        assert_eq!(block.ordinal(), 3);
        assert_eq!(block.kind(), BasicBlockKind::Block);
        assert!(block.operations().is_empty());
        assert!(block.branches().is_empty());
        assert!(!block.is_reachable());
    }

    #[test]
    fn test_successors_skip_graph_leaving_branches() {
        let mut block = BasicBlock::new(1, BasicBlockKind::Block, RegionId::new(0));
        block.set_branches(vec![
            ControlFlowBranch::regular(1, 2),
            ControlFlowBranch::exception_exit(1),
        ]);
        assert_eq!(block.successors().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_conditional_pair() {
        let condition = FlowValue::Operation(OperationId::new(0));
        let mut block = BasicBlock::new(1, BasicBlockKind::Block, RegionId::new(0));
        block.set_branches(vec![
            ControlFlowBranch::conditional(1, 2, true, condition),
            ControlFlowBranch::conditional(1, 3, false, condition),
        ]);

        let (when_true, when_false) = block.conditional_pair().unwrap();
        assert_eq!(when_true.destination(), Some(2));
        assert_eq!(when_false.destination(), Some(3));
        assert_eq!(when_true.kind(), ControlFlowBranchKind::ConditionalTrue);

        let mut plain = BasicBlock::new(2, BasicBlockKind::Block, RegionId::new(0));
        plain.set_branches(vec![ControlFlowBranch::regular(2, 3)]);
        assert!(plain.conditional_pair().is_none());
    }

    #[test]
    fn test_capture_operation_carries_value() {
        let mut block = BasicBlock::new(1, BasicBlockKind::Block, RegionId::new(0));
        block.push_operation(FlowOperation::Evaluate(OperationId::new(4)));
        block.push_operation(FlowOperation::Capture {
            id: crate::flow::CaptureIdDispenser::new().next(),
            value: FlowValue::Constant(ConstValue::Bool(false)),
        });
        assert_eq!(block.operations().len(), 2);
    }
}
