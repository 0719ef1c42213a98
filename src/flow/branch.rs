//! Control flow branch types for the graph.
//!
//! This module defines the edge representations used in the control flow graph, providing
//! semantic information about how control leaves a basic block.

use crate::flow::block::FlowValue;

/// The semantic kind of control flow represented by a branch.
///
/// This enum classifies branches by their control flow semantics, which is essential for
/// analyses like reachability, path condition computation and definite assignment.
///
/// # Examples
///
/// ```rust,no_run
/// use flowscope::flow::ControlFlowBranchKind;
///
/// let kind = ControlFlowBranchKind::ConditionalTrue;
/// assert!(kind.is_conditional());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
pub enum ControlFlowBranchKind {
    /// Regular fall-through or unconditional jump to the destination block.
    Regular,

    /// The branch taken when the controlling condition evaluates to true.
    ConditionalTrue,

    /// The branch taken when the controlling condition evaluates to false.
    ConditionalFalse,

    /// A value-carrying return; the destination is always the exit block.
    ///
    /// An operand-less `return` at the end of a unit is plain fall-through to the exit and
    /// lowers as [`Regular`](Self::Regular) instead.
    Return,

    /// A throw; control leaves the graph toward the exception dispatcher, so the branch
    /// has no destination block.
    Throw,

    /// A rethrow of the in-flight exception from inside a catch handler; like
    /// [`Throw`](Self::Throw), the branch has no destination block.
    Rethrow,

    /// A structured-exception-handling exit: the end of a finally body, or the
    /// continuation of handler dispatch past a failed filter. Control returns to the
    /// runtime's dispatcher, so the branch has no destination block.
    StructuredExceptionHandling,
}

impl ControlFlowBranchKind {
    /// Returns `true` if this is a conditional branch kind.
    ///
    /// # Returns
    ///
    /// `true` for [`ConditionalTrue`](Self::ConditionalTrue) and
    /// [`ConditionalFalse`](Self::ConditionalFalse), `false` otherwise.
    #[must_use]
    pub const fn is_conditional(&self) -> bool {
        matches!(self, Self::ConditionalTrue | Self::ConditionalFalse)
    }

    /// Returns `true` if this branch kind leaves the graph without a destination block.
    ///
    /// # Returns
    ///
    /// `true` for [`Throw`](Self::Throw), [`Rethrow`](Self::Rethrow) and
    /// [`StructuredExceptionHandling`](Self::StructuredExceptionHandling), `false`
    /// otherwise.
    #[must_use]
    pub const fn is_exceptional(&self) -> bool {
        matches!(
            self,
            Self::Throw | Self::Rethrow | Self::StructuredExceptionHandling
        )
    }
}

/// A directed edge between two basic blocks.
///
/// Each branch records its source block ordinal, its destination (absent for branches that
/// leave the graph), its semantic kind, and for conditional and value-carrying kinds the
/// [`FlowValue`] involved: the controlling condition of a conditional pair, the returned
/// value of a [`Return`](ControlFlowBranchKind::Return), or the thrown exception of a
/// [`Throw`](ControlFlowBranchKind::Throw).
///
/// # Examples
///
/// ```rust
/// use flowscope::flow::{ControlFlowBranch, ControlFlowBranchKind};
///
/// let branch = ControlFlowBranch::regular(0, 1);
/// assert_eq!(branch.source(), 0);
/// assert_eq!(branch.destination(), Some(1));
/// assert!(!branch.kind().is_conditional());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFlowBranch {
    /// Ordinal of the source block.
    source: usize,
    /// Ordinal of the destination block; `None` only for kinds that leave the graph.
    destination: Option<usize>,
    /// The semantic kind of this branch.
    kind: ControlFlowBranchKind,
    /// Controlling condition, returned value or thrown exception, depending on the kind.
    value: Option<FlowValue>,
}

impl ControlFlowBranch {
    /// Creates a regular fall-through branch.
    ///
    /// # Arguments
    ///
    /// * `source` - The source block ordinal
    /// * `destination` - The destination block ordinal
    #[must_use]
    pub const fn regular(source: usize, destination: usize) -> Self {
        Self {
            source,
            destination: Some(destination),
            kind: ControlFlowBranchKind::Regular,
            value: None,
        }
    }

    /// Creates one half of a conditional branch pair.
    ///
    /// # Arguments
    ///
    /// * `source` - The source block ordinal
    /// * `destination` - The destination block ordinal
    /// * `when_true` - `true` for the branch taken when the condition holds
    /// * `condition` - The controlling condition
    #[must_use]
    pub const fn conditional(
        source: usize,
        destination: usize,
        when_true: bool,
        condition: FlowValue,
    ) -> Self {
        Self {
            source,
            destination: Some(destination),
            kind: if when_true {
                ControlFlowBranchKind::ConditionalTrue
            } else {
                ControlFlowBranchKind::ConditionalFalse
            },
            value: Some(condition),
        }
    }

    /// Creates a value-carrying return branch to the exit block.
    ///
    /// # Arguments
    ///
    /// * `source` - The source block ordinal
    /// * `destination` - The exit block ordinal
    /// * `value` - The returned value
    #[must_use]
    pub const fn returning(source: usize, destination: usize, value: FlowValue) -> Self {
        Self {
            source,
            destination: Some(destination),
            kind: ControlFlowBranchKind::Return,
            value: Some(value),
        }
    }

    /// Creates a throw branch leaving the graph.
    ///
    /// # Arguments
    ///
    /// * `source` - The source block ordinal
    /// * `exception` - The thrown exception value
    #[must_use]
    pub const fn throwing(source: usize, exception: FlowValue) -> Self {
        Self {
            source,
            destination: None,
            kind: ControlFlowBranchKind::Throw,
            value: Some(exception),
        }
    }

    /// Creates a rethrow branch leaving the graph.
    ///
    /// # Arguments
    ///
    /// * `source` - The source block ordinal
    #[must_use]
    pub const fn rethrowing(source: usize) -> Self {
        Self {
            source,
            destination: None,
            kind: ControlFlowBranchKind::Rethrow,
            value: None,
        }
    }

    /// Creates a structured-exception-handling exit branch.
    ///
    /// # Arguments
    ///
    /// * `source` - The source block ordinal
    #[must_use]
    pub const fn exception_exit(source: usize) -> Self {
        Self {
            source,
            destination: None,
            kind: ControlFlowBranchKind::StructuredExceptionHandling,
            value: None,
        }
    }

    /// Returns the ordinal of the source block.
    #[must_use]
    pub const fn source(&self) -> usize {
        self.source
    }

    /// Returns the ordinal of the destination block, or `None` for branches that leave
    /// the graph.
    #[must_use]
    pub const fn destination(&self) -> Option<usize> {
        self.destination
    }

    /// Returns the semantic kind of this branch.
    #[must_use]
    pub const fn kind(&self) -> ControlFlowBranchKind {
        self.kind
    }

    /// Returns the value associated with this branch: the controlling condition for
    /// conditional kinds, the returned value for [`ControlFlowBranchKind::Return`], the
    /// thrown exception for [`ControlFlowBranchKind::Throw`].
    #[must_use]
    pub const fn value(&self) -> Option<&FlowValue> {
        self.value.as_ref()
    }

    /// Returns the controlling condition if this is a conditional branch.
    #[must_use]
    pub fn condition(&self) -> Option<&FlowValue> {
        if self.kind.is_conditional() {
            self.value.as_ref()
        } else {
            None
        }
    }
}
