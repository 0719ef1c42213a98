//! Control flow graph construction and representation.
//!
//! This module lowers one executable code unit of an operation tree into an explicit
//! graph of basic blocks connected by typed branches and partitioned into nested
//! structured regions, and packages the result as the immutable [`ControlFlowGraph`].
//!
//! # Architecture
//!
//! The tree-to-graph lowering lives in a dedicated builder, decoupled from the result
//! type: the builder produces flat collections (blocks, regions, function maps) and the
//! result type validates every structural invariant on construction, so the invariants
//! stay independently testable. Downstream analyses (data flow, reachability,
//! diagnostics) consume the graph rather than the original tree.
//!
//! # Key Components
//!
//! - [`ControlFlowGraph`] - The validated graph with lazy nested-graph construction
//! - [`BasicBlock`] / [`FlowOperation`] / [`FlowValue`] - Blocks and their lowered steps
//! - [`ControlFlowBranch`] / [`ControlFlowBranchKind`] - Typed edges between blocks
//! - [`ControlFlowRegion`] / [`ControlFlowRegionKind`] - The nested scope tree
//! - [`CaptureIdDispenser`] - Shared dispenser naming cross-block temporaries
//! - [`DiagnosticSink`] / [`AnalysisOptions`] - Non-fatal reporting and cancellation
//!
//! # Branch Types
//!
//! The graph distinguishes several kinds of control flow:
//!
//! - **Regular**: fall-through or unconditional jump to a single successor
//! - **Conditional True/False**: a branch pair controlled by one condition value
//! - **Return**: a value-carrying jump to the exit block
//! - **Throw/Rethrow/StructuredExceptionHandling**: edges that leave the graph toward
//!   the runtime's exception dispatcher
//!
//! # Nested Functions
//!
//! Local functions and lambdas declared inside the unit are not lowered eagerly: the
//! graph records where each was declared, and builds its nested graph at most once on
//! first request, caching the result for its own lifetime. The whole family shares one
//! [`CaptureIdDispenser`] so capture ids never collide across the unit.
//!
//! # Examples
//!
//! ## Building a graph from an operation tree
//!
//! ```rust
//! use flowscope::ControlFlowGraph;
//! use flowscope::operation::OperationTreeBuilder;
//!
//! let mut builder = OperationTreeBuilder::new();
//! let ret = builder.ret(None);
//! let body = builder.block(vec![ret], vec![]);
//! let tree = builder.finish(body)?;
//!
//! let graph = ControlFlowGraph::create(&tree, body)?.expect("lowering succeeded");
//! println!("graph has {} blocks", graph.block_count());
//! # Ok::<(), flowscope::Error>(())
//! ```
//!
//! # Thread Safety
//!
//! A completed [`ControlFlowGraph`] is [`Send`] and [`Sync`]; its data is immutable and
//! freely shared. The nested-graph caches publish with atomic compare-and-set semantics
//! ([`std::sync::OnceLock`]), and the capture dispenser is an atomic counter, so sibling
//! nested graphs may be requested and built concurrently.

mod block;
mod branch;
mod builder;
mod capture;
mod diagnostics;
mod graph;
mod region;

pub use block::{BasicBlock, BasicBlockKind, FlowOperation, FlowValue};
pub use branch::{ControlFlowBranch, ControlFlowBranchKind};
pub use capture::{CaptureId, CaptureIdDispenser};
pub use diagnostics::{AnalysisOptions, Diagnostic, DiagnosticSink, Severity};
pub use graph::{
    AnonymousFunctionInfo, CaptureContext, ControlFlowGraph, LocalFunctionInfo,
};
pub use region::{ControlFlowRegion, ControlFlowRegionKind, RegionId};
