use thiserror::Error;

use crate::operation::{FunctionId, OperationId};

macro_rules! lowering_error {
    // Single format string version, with inline captures
    ($msg:expr) => {
        crate::Error::Lowering {
            message: format!($msg),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Lowering {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// This enum covers all possible error conditions that can occur while validating an operation
/// tree, lowering it into a control flow graph, and requesting nested graphs from the result.
/// Each variant provides specific context about the failure mode to enable appropriate error
/// handling.
///
/// # Error Categories
///
/// ## Usage Errors
/// Caller-side precondition violations, reported synchronously and never downgraded:
/// - [`Error::MissingOperation`] - Operation id does not resolve in the tree
/// - [`Error::NotRoot`] - Operation has a parent and cannot anchor a graph
/// - [`Error::MissingSemanticContext`] - Tree was built without a semantic context
/// - [`Error::FlowAnalysisDisabled`] - The source unit has flow analysis switched off
/// - [`Error::MissingSymbol`] - Function id does not resolve in the tree
/// - [`Error::UnknownLocalFunction`] - Symbol is not declared inside the analyzed unit
/// - [`Error::UnknownAnonymousFunction`] - Operation is not a lambda lowered in this graph
///
/// ## Lowering Failures
/// - [`Error::Lowering`] - Internal inconsistency while lowering; contained by
///   [`ControlFlowGraph::create`](crate::ControlFlowGraph::create) and downgraded to an
///   absent result plus a diagnostic event
///
/// ## Cancellation
/// - [`Error::Cancelled`] - Cooperative abort; distinguishable from both of the above and
///   never downgraded
///
/// # Examples
///
/// ```rust
/// use flowscope::{ControlFlowGraph, Error};
/// use flowscope::operation::OperationTreeBuilder;
///
/// let mut builder = OperationTreeBuilder::new().without_flow_analysis();
/// let ret = builder.ret(None);
/// let body = builder.block(vec![ret], vec![]);
/// let tree = builder.finish(body)?;
///
/// match ControlFlowGraph::create(&tree, body) {
///     Err(Error::FlowAnalysisDisabled) => { /* unit opted out of flow analysis */ }
///     other => panic!("expected a disabled-unit failure, got {other:?}"),
/// }
/// # Ok::<(), flowscope::Error>(())
/// ```
#[derive(Error, Debug)]
pub enum Error {
    // Usage errors
    /// The provided operation id does not resolve to a node in the tree.
    ///
    /// This is the dangling-reference analog of passing a null operation: the id was never
    /// allocated by the tree, or belongs to a different tree.
    #[error("Operation does not exist in the operation tree - {0}")]
    MissingOperation(OperationId),

    /// The provided operation has a parent and therefore is not a root.
    ///
    /// Graph construction accepts only root operations; lowering a nested node would produce
    /// a graph detached from the enclosing unit's region and capture structure.
    #[error("Operation is not a root of the operation tree - {0}")]
    NotRoot(OperationId),

    /// The operation tree carries no resolved semantic context.
    ///
    /// Trees assembled without front-end binding cannot be lowered, since region and symbol
    /// information would be meaningless.
    #[error("Operation has no semantic context")]
    MissingSemanticContext,

    /// Flow analysis is disabled for the originating source unit.
    ///
    /// This mirrors the external configuration switch on the source unit; when unset,
    /// construction is refused categorically.
    #[error("Flow analysis is disabled for the originating source unit")]
    FlowAnalysisDisabled,

    /// The provided function id does not resolve to a symbol in the tree.
    ///
    /// The dangling-reference analog of passing a null symbol to a nested-graph accessor.
    #[error("Function symbol does not exist in the operation tree - {0}")]
    MissingSymbol(FunctionId),

    /// The function symbol is not declared inside the analyzed code unit.
    ///
    /// Nested-graph accessors only resolve local functions recorded while lowering this
    /// graph's own unit.
    #[error("Local function is not declared within this control flow graph - {0}")]
    UnknownLocalFunction(FunctionId),

    /// The operation is not an anonymous function lowered as part of this graph.
    #[error("Anonymous function does not occur within this control flow graph - {0}")]
    UnknownAnonymousFunction(OperationId),

    /// The operation tree is structurally malformed.
    ///
    /// Raised while sealing a tree whose nodes reference children inconsistently, for
    /// example one node claimed as a child by two parents.
    #[error("Malformed operation tree - {0}")]
    MalformedTree(String),

    // Lowering failures
    /// An internal inconsistency was encountered while lowering.
    ///
    /// The error includes the source location where the inconsistency was detected for
    /// debugging purposes. Top-level construction catches this variant, reports it through
    /// the diagnostic sink and yields no graph instead of propagating.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of the inconsistency
    /// * `file` - Source file in which the failure was detected
    /// * `line` - Source line in which the failure was detected
    #[error("Lowering failed - {file}:{line}: {message}")]
    Lowering {
        /// The message to be printed for the Lowering error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    // Cancellation
    /// Construction was aborted by a cooperative cancellation request.
    ///
    /// Not a failure: the caller asked for the work to stop. A cancelled construction never
    /// publishes a partially built graph.
    #[error("Construction was cancelled")]
    Cancelled,
}
