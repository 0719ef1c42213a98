//! Operation-tree intermediate representation.
//!
//! This module defines the tree-shaped IR that graph construction consumes: one
//! [`OperationTree`] per source unit, holding the semantic operations of its executable code
//! units (method bodies, initializers, nested function bodies) as an arena of
//! [`Operation`] nodes addressed by [`OperationId`].
//!
//! The tree is produced by an external front end; flowscope only specifies its shape and the
//! properties graph construction relies on:
//!
//! - every node except roots has a parent link, computed when the tree is sealed
//! - local variables and local-function symbols are interned in side tables and referenced
//!   by [`LocalId`] / [`FunctionId`], so identity comparisons are index comparisons
//! - the tree records whether the unit was bound to a [`SemanticContext`] and whether flow
//!   analysis is enabled ([`TreeFlags::FLOW_ANALYSIS`])
//!
//! # Key Components
//!
//! - [`OperationTree`] / [`OperationTreeBuilder`] - the sealed arena and its construction API
//! - [`Operation`] / [`OperationKind`] - individual nodes and their construct classification
//! - [`LocalId`], [`FunctionId`], [`TypeName`] - symbol side-table references
//!
//! # Examples
//!
//! ```rust
//! use flowscope::operation::{ConstValue, OperationTreeBuilder};
//!
//! let mut builder = OperationTreeBuilder::new();
//! let value = builder.literal(ConstValue::Int(42));
//! let ret = builder.ret(Some(value));
//! let body = builder.block(vec![ret], vec![]);
//! let tree = builder.finish(body)?;
//!
//! assert!(tree.operation(body).is_some());
//! # Ok::<(), flowscope::Error>(())
//! ```

mod build;
mod node;
mod symbol;
mod tree;

pub use build::OperationTreeBuilder;
pub use node::{
    BinaryOperator, CasePattern, CatchClause, ConstValue, JumpKind, Operation, OperationKind,
    SwitchCase, UnaryOperator,
};
pub use symbol::{FunctionId, FunctionSymbol, Local, LocalId, TypeName};
pub use tree::{OperationId, OperationTree, SemanticContext, TreeFlags};
