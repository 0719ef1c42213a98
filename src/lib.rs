// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]

//! # flowscope
//!
//! A control flow graph construction library for operation-tree intermediate
//! representations. `flowscope` performs structural lowering of arbitrarily nested
//! control constructs - loops, try/catch/filter/finally, switch dispatch, short-circuit
//! boolean logic, local and anonymous functions - into an explicit graph of basic blocks
//! connected by typed branches and partitioned into nested structured regions.
//!
//! Everything downstream (data-flow analyses, reachability, unreachable-code
//! diagnostics) consumes the produced graph rather than the original tree.
//!
//! ## Features
//!
//! - **Validated graphs** - entry/exit placement, dense ordinals, region nesting and
//!   function maps are checked on construction; malformed builder output never escapes
//! - **Structured regions** - exception handling and local lifetimes keep their scoping
//!   as a tree of contiguous block ranges
//! - **Lazy nested graphs** - local functions and lambdas are lowered at most once, on
//!   demand, with thread-safe compare-and-set publication
//! - **Shared capture naming** - one atomic dispenser per graph family keeps
//!   cross-block temporaries unique across every nested graph
//! - **Graceful degradation** - lowering failures are contained as non-fatal
//!   diagnostics; a bad unit yields "no graph" instead of a crashed host
//!
//! ## Quick Start
//!
//! ```rust
//! use flowscope::prelude::*;
//!
//! // Assemble a unit: if (flag) { Log(); }
//! let mut builder = OperationTreeBuilder::new();
//! let flag = builder.local("flag");
//! let condition = builder.local_reference(flag);
//! let call = builder.invocation("Log", vec![]);
//! let call = builder.expression_statement(call);
//! let then_block = builder.block(vec![call], vec![]);
//! let conditional = builder.conditional(condition, then_block, None);
//! let body = builder.block(vec![conditional], vec![flag]);
//! let tree = builder.finish(body)?;
//!
//! // Lower it.
//! let graph = ControlFlowGraph::create(&tree, body)?.expect("lowering succeeded");
//! assert_eq!(graph.block_count(), 4);
//! assert_eq!(graph.entry().ordinal(), 0);
//! # Ok::<(), flowscope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! `flowscope` is organized into two main modules:
//!
//! - [`operation`] - the tree-shaped IR consumed by lowering: an arena of operations
//!   with interned symbol side tables, sealed by [`operation::OperationTreeBuilder`]
//! - [`flow`] - the control flow graph: blocks, typed branches, the region tree, flow
//!   captures, diagnostics, and the lazy nested-graph machinery
//!
//! The lowering algorithm itself is a crate-internal component; the public construction
//! surface is [`ControlFlowGraph::create`], which enforces the input preconditions and
//! contains lowering failures.
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result`]. Usage errors (dangling ids, non-root
//! operations, unbound trees, disabled units, unknown nested-function keys) propagate
//! synchronously; internal lowering failures are downgraded to an absent graph plus a
//! [`flow::Diagnostic`]; cancellation surfaces as [`Error::Cancelled`] and is never
//! downgraded.

#[macro_use]
pub(crate) mod error;
pub(crate) mod utils;

/// Convenient re-exports of the most commonly used types and traits.
///
/// This module provides a curated selection of the most frequently used types from
/// across the flowscope library, allowing for convenient glob imports.
///
/// # Example
///
/// ```rust
/// use flowscope::prelude::*;
///
/// let mut builder = OperationTreeBuilder::new();
/// let ret = builder.ret(None);
/// let body = builder.block(vec![ret], vec![]);
/// let tree = builder.finish(body)?;
/// let graph = ControlFlowGraph::create(&tree, body)?;
/// assert!(graph.is_some());
/// # Ok::<(), flowscope::Error>(())
/// ```
pub mod prelude;

/// Control flow graph construction and representation.
///
/// The core of the crate: basic blocks, typed branches, nested regions, flow captures,
/// diagnostics, and the immutable [`flow::ControlFlowGraph`] with its lazy nested-graph
/// accessors.
pub mod flow;

/// Operation-tree intermediate representation.
///
/// The tree-shaped IR lowering consumes: operations, symbol side tables, per-unit
/// configuration flags and the sealing builder.
pub mod operation;

/// `flowscope` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always
/// [`Error`]. This is used consistently throughout the crate for all fallible
/// operations.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use flowscope::{ControlFlowGraph, Result};
/// use flowscope::operation::{OperationId, OperationTree};
///
/// fn lower(tree: &Arc<OperationTree>, root: OperationId) -> Result<()> {
///     let graph = ControlFlowGraph::create(tree, root)?;
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// `flowscope` Error type
///
/// The main error type for all operations in this crate. Distinguishes caller-side
/// usage errors, contained lowering failures, and cooperative cancellation.
///
/// # Examples
///
/// ```rust
/// use flowscope::{ControlFlowGraph, Error};
/// use flowscope::operation::{OperationId, OperationTreeBuilder};
///
/// let mut builder = OperationTreeBuilder::new();
/// let ret = builder.ret(None);
/// let body = builder.block(vec![ret], vec![]);
/// let tree = builder.finish(body)?;
///
/// match ControlFlowGraph::create(&tree, OperationId::new(999)) {
///     Err(Error::MissingOperation(_)) => { /* dangling id */ }
///     other => panic!("expected a missing-operation failure, got {other:?}"),
/// }
/// # Ok::<(), flowscope::Error>(())
/// ```
pub use error::Error;

/// The immutable control flow graph of one executable code unit.
///
/// See [`flow::ControlFlowGraph`] for construction, accessors and nested-graph
/// building.
///
/// # Example
///
/// ```rust
/// use flowscope::ControlFlowGraph;
/// use flowscope::operation::OperationTreeBuilder;
///
/// let mut builder = OperationTreeBuilder::new();
/// let ret = builder.ret(None);
/// let body = builder.block(vec![ret], vec![]);
/// let tree = builder.finish(body)?;
/// let graph = ControlFlowGraph::create(&tree, body)?.expect("lowering succeeded");
/// assert_eq!(graph.block_count(), 3);
/// # Ok::<(), flowscope::Error>(())
/// ```
pub use flow::ControlFlowGraph;

/// Cooperative cancellation for graph construction.
///
/// Clones share one flag; construction polls it at block boundaries and aborts with
/// [`Error::Cancelled`] without publishing partial results.
pub use utils::synchronization::CancellationToken;
