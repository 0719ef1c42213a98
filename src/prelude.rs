//! # flowscope Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the flowscope library. Import this module to get quick access to the essential
//! types for control flow graph construction and inspection.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all flowscope operations
pub use crate::Error;

/// The result type used throughout flowscope
pub use crate::Result;

/// Cooperative cancellation token observed during graph construction
pub use crate::CancellationToken;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// The immutable control flow graph of one code unit
pub use crate::ControlFlowGraph;

/// Options bundling cancellation and diagnostics for one construction
pub use crate::flow::AnalysisOptions;

// ================================================================================================
// Graph Structure
// ================================================================================================

/// Basic blocks and their lowered contents
pub use crate::flow::{BasicBlock, BasicBlockKind, FlowOperation, FlowValue};

/// Typed branches between blocks
pub use crate::flow::{ControlFlowBranch, ControlFlowBranchKind};

/// The nested region tree
pub use crate::flow::{ControlFlowRegion, ControlFlowRegionKind, RegionId};

/// Flow captures and their shared dispenser
pub use crate::flow::{CaptureId, CaptureIdDispenser};

/// Declaration metadata for nested functions
pub use crate::flow::{AnonymousFunctionInfo, CaptureContext, LocalFunctionInfo};

/// Non-fatal diagnostic reporting
pub use crate::flow::{Diagnostic, DiagnosticSink, Severity};

// ================================================================================================
// Operation Tree
// ================================================================================================

/// The sealed operation-tree arena and its construction API
pub use crate::operation::{OperationTree, OperationTreeBuilder};

/// Operation nodes and their classification
pub use crate::operation::{Operation, OperationId, OperationKind};

/// Operators, constants and switch/catch clause structure
pub use crate::operation::{
    BinaryOperator, CasePattern, CatchClause, ConstValue, JumpKind, SwitchCase, UnaryOperator,
};

/// Symbol side-table references
pub use crate::operation::{FunctionId, FunctionSymbol, Local, LocalId, TypeName};

/// Per-unit configuration recorded on the tree
pub use crate::operation::{SemanticContext, TreeFlags};
