//! Control flow graph implementation.
//!
//! This module provides the main [`ControlFlowGraph`] structure: the immutable, validated
//! result of lowering one code unit, together with the lazy, thread-safe construction of
//! graphs for local functions and lambdas nested inside it.

use std::collections::{HashMap, HashSet};
use std::fmt::Write;
use std::sync::{Arc, OnceLock};

use rayon::prelude::*;

use crate::flow::block::{BasicBlock, BasicBlockKind, FlowOperation, FlowValue};
use crate::flow::branch::ControlFlowBranchKind;
use crate::flow::builder::ControlFlowGraphBuilder;
use crate::flow::capture::{CaptureId, CaptureIdDispenser};
use crate::flow::diagnostics::{AnalysisOptions, Diagnostic};
use crate::flow::region::{ControlFlowRegion, ControlFlowRegionKind, RegionId};
use crate::operation::{FunctionId, OperationId, OperationTree, TreeFlags};
use crate::utils::escape_dot;
use crate::utils::synchronization::CancellationToken;
use crate::{Error, Result};

/// Builder-time metadata recorded for one local function declared in a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFunctionInfo {
    region: RegionId,
    declaration: OperationId,
    ordinal: usize,
    body: OperationId,
}

impl LocalFunctionInfo {
    pub(crate) const fn new(
        region: RegionId,
        declaration: OperationId,
        ordinal: usize,
        body: OperationId,
    ) -> Self {
        Self {
            region,
            declaration,
            ordinal,
            body,
        }
    }

    /// Returns the region enclosing the declaration.
    #[must_use]
    pub const fn region(&self) -> RegionId {
        self.region
    }

    /// Returns the declaring operation node.
    #[must_use]
    pub const fn declaration(&self) -> OperationId {
        self.declaration
    }

    /// Returns this function's dense ordinal, its position in
    /// [`ControlFlowGraph::local_functions`].
    #[must_use]
    pub const fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Returns the function's body operation, the root of its nested graph.
    #[must_use]
    pub const fn body(&self) -> OperationId {
        self.body
    }
}

/// The lowering state captured at the point a lambda occurrence was encountered.
///
/// Nested graph construction for the lambda seeds its own capture tracking from this
/// context, so state the outer lowering pass recorded about the lambda's surrounding
/// evaluation order is available when building its graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureContext {
    captures_in_scope: Vec<CaptureId>,
}

impl CaptureContext {
    pub(crate) const fn new(captures_in_scope: Vec<CaptureId>) -> Self {
        Self { captures_in_scope }
    }

    /// Returns the captures that were live when the context was recorded.
    #[must_use]
    pub fn captures_in_scope(&self) -> &[CaptureId] {
        &self.captures_in_scope
    }
}

/// Builder-time metadata recorded for one lambda occurrence in a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnonymousFunctionInfo {
    region: RegionId,
    ordinal: usize,
    body: OperationId,
    context: CaptureContext,
}

impl AnonymousFunctionInfo {
    pub(crate) const fn new(
        region: RegionId,
        ordinal: usize,
        body: OperationId,
        context: CaptureContext,
    ) -> Self {
        Self {
            region,
            ordinal,
            body,
            context,
        }
    }

    /// Returns the region enclosing the occurrence.
    #[must_use]
    pub const fn region(&self) -> RegionId {
        self.region
    }

    /// Returns this lambda's dense ordinal, its position in
    /// [`ControlFlowGraph::anonymous_functions`].
    #[must_use]
    pub const fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Returns the lambda's body operation, the root of its nested graph.
    #[must_use]
    pub const fn body(&self) -> OperationId {
        self.body
    }

    /// Returns the lowering context captured at the occurrence.
    #[must_use]
    pub const fn context(&self) -> &CaptureContext {
        &self.context
    }
}

/// The flat collections a builder hands to [`ControlFlowGraph::from_parts`].
#[derive(Debug)]
pub(crate) struct GraphParts {
    pub tree: Arc<OperationTree>,
    pub original_operation: OperationId,
    pub blocks: Vec<BasicBlock>,
    pub regions: Vec<ControlFlowRegion>,
    pub local_functions: Vec<FunctionId>,
    pub local_function_info: HashMap<FunctionId, LocalFunctionInfo>,
    pub anonymous_functions: Vec<OperationId>,
    pub anonymous_function_info: HashMap<OperationId, AnonymousFunctionInfo>,
    pub captures: Arc<CaptureIdDispenser>,
}

/// A control flow graph for one executable code unit.
///
/// The graph is immutable once constructed: an ordered block sequence (entry first, exit
/// last, dense ordinals), a tree of nested [`ControlFlowRegion`]s rooted at a region
/// spanning every block, and the recorded local-function declarations and lambda
/// occurrences of the unit.
///
/// # Construction
///
/// Create a graph from the root of an operation tree with [`create`](Self::create) or
/// [`create_with`](Self::create_with):
///
/// ```rust
/// use flowscope::ControlFlowGraph;
/// use flowscope::operation::OperationTreeBuilder;
///
/// let mut builder = OperationTreeBuilder::new();
/// let ret = builder.ret(None);
/// let body = builder.block(vec![ret], vec![]);
/// let tree = builder.finish(body)?;
///
/// let graph = ControlFlowGraph::create(&tree, body)?.expect("lowering succeeded");
/// assert_eq!(graph.block_count(), 3);
/// # Ok::<(), flowscope::Error>(())
/// ```
///
/// # Nested Graphs
///
/// Graphs for local functions and lambdas declared inside the unit are built lazily, at
/// most once each, on first request through
/// [`local_function_graph`](Self::local_function_graph) and
/// [`anonymous_function_graph`](Self::anonymous_function_graph). The whole family shares
/// one [`CaptureIdDispenser`], so capture ids never collide across the unit.
///
/// # Thread Safety
///
/// `ControlFlowGraph` is [`Send`] and [`Sync`]. The nested-graph caches are fixed-size
/// slot arrays published with atomic compare-and-set semantics ([`OnceLock`]); concurrent
/// requests for the same nested graph may race to build it, but only the first completed
/// build is retained and every caller observes that same instance.
#[derive(Debug)]
pub struct ControlFlowGraph {
    /// The operation tree this graph was lowered from.
    tree: Arc<OperationTree>,
    /// The root operation the graph was created for.
    original_operation: OperationId,
    /// The blocks, indexed by ordinal.
    blocks: Vec<BasicBlock>,
    /// The region arena; index 0 is the root region.
    regions: Vec<ControlFlowRegion>,
    /// Local functions declared in the unit, in textual order.
    local_functions: Vec<FunctionId>,
    /// Identity-keyed declaration metadata for each local function.
    local_function_info: HashMap<FunctionId, LocalFunctionInfo>,
    /// Lambda occurrences in the unit, in lowering order.
    anonymous_functions: Vec<OperationId>,
    /// Identity-keyed occurrence metadata for each lambda.
    anonymous_function_info: HashMap<OperationId, AnonymousFunctionInfo>,
    /// Dispenser shared by this graph and every nested graph built from it.
    captures: Arc<CaptureIdDispenser>,
    /// Lazily allocated cache, one slot per local-function ordinal.
    local_function_graphs: OnceLock<Box<[OnceLock<Arc<ControlFlowGraph>>]>>,
    /// Lazily allocated cache, one slot per lambda ordinal.
    anonymous_function_graphs: OnceLock<Box<[OnceLock<Arc<ControlFlowGraph>>]>>,
}

impl ControlFlowGraph {
    /// Creates a control flow graph for the given root operation.
    ///
    /// Equivalent to [`create_with`](Self::create_with) with default
    /// [`AnalysisOptions`]: no cancellation, diagnostics recorded into a private sink.
    ///
    /// # Arguments
    ///
    /// * `tree` - The operation tree owning `root`
    /// * `root` - The root operation of the code unit to lower
    ///
    /// # Returns
    ///
    /// `Ok(Some(graph))` on success, `Ok(None)` when lowering failed and the failure was
    /// contained as a diagnostic.
    ///
    /// # Errors
    ///
    /// Returns a usage error when a precondition is violated:
    /// [`Error::MissingOperation`] for a dangling id, [`Error::NotRoot`] for a nested
    /// operation, [`Error::MissingSemanticContext`] for an unbound tree and
    /// [`Error::FlowAnalysisDisabled`] when the source unit has flow analysis switched
    /// off. [`Error::Cancelled`] propagates when construction is aborted.
    pub fn create(tree: &Arc<OperationTree>, root: OperationId) -> Result<Option<Arc<Self>>> {
        Self::create_with(tree, root, &AnalysisOptions::new())
    }

    /// Creates a control flow graph for the given root operation, with explicit options.
    ///
    /// Lowering failures other than cancellation are contained: they are reported to the
    /// sink in `options` as a non-fatal [`Diagnostic`] and construction yields `Ok(None)`
    /// rather than crashing the caller; dependent analyses treat this as "no graph
    /// available for this unit".
    ///
    /// # Arguments
    ///
    /// * `tree` - The operation tree owning `root`
    /// * `root` - The root operation of the code unit to lower
    /// * `options` - Cancellation token and diagnostic sink for this construction
    ///
    /// # Returns
    ///
    /// `Ok(Some(graph))` on success, `Ok(None)` when lowering failed recoverably.
    ///
    /// # Errors
    ///
    /// See [`create`](Self::create).
    pub fn create_with(
        tree: &Arc<OperationTree>,
        root: OperationId,
        options: &AnalysisOptions,
    ) -> Result<Option<Arc<Self>>> {
        let operation = tree
            .operation(root)
            .ok_or(Error::MissingOperation(root))?;
        if operation.parent().is_some() {
            return Err(Error::NotRoot(root));
        }
        if tree.semantic_context().is_none() {
            return Err(Error::MissingSemanticContext);
        }
        if !tree.flags().contains(TreeFlags::FLOW_ANALYSIS) {
            return Err(Error::FlowAnalysisDisabled);
        }

        let dispenser = Arc::new(CaptureIdDispenser::new());
        match ControlFlowGraphBuilder::build(
            tree,
            root,
            dispenser,
            options.cancellation().clone(),
        ) {
            Ok(graph) => Ok(Some(Arc::new(graph))),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(error) => {
                options
                    .diagnostics()
                    .push(Diagnostic::contained_failure(&error, root));
                Ok(None)
            }
        }
    }

    /// Assembles a graph from builder output, validating every structural invariant.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Lowering`] when any invariant is violated; top-level construction
    /// contains such failures like any other lowering failure.
    pub(crate) fn from_parts(parts: GraphParts) -> Result<Self> {
        Self::validate(&parts)?;
        Ok(Self {
            tree: parts.tree,
            original_operation: parts.original_operation,
            blocks: parts.blocks,
            regions: parts.regions,
            local_functions: parts.local_functions,
            local_function_info: parts.local_function_info,
            anonymous_functions: parts.anonymous_functions,
            anonymous_function_info: parts.anonymous_function_info,
            captures: parts.captures,
            local_function_graphs: OnceLock::new(),
            anonymous_function_graphs: OnceLock::new(),
        })
    }

    fn validate(parts: &GraphParts) -> Result<()> {
        let blocks = &parts.blocks;
        let regions = &parts.regions;

        if blocks.len() < 2 {
            return Err(lowering_error!(
                "graph needs at least an entry and an exit block"
            ));
        }
        let last = blocks.len() - 1;
        for (ordinal, block) in blocks.iter().enumerate() {
            if block.ordinal() != ordinal {
                return Err(lowering_error!(
                    "block at position {ordinal} carries ordinal {}",
                    block.ordinal()
                ));
            }
            let expected = match ordinal {
                0 => BasicBlockKind::Entry,
                n if n == last => BasicBlockKind::Exit,
                _ => BasicBlockKind::Block,
            };
            if block.kind() != expected {
                return Err(lowering_error!(
                    "block {ordinal} has kind {:?}, expected {expected:?}",
                    block.kind()
                ));
            }
        }

        if regions.is_empty() {
            return Err(lowering_error!("graph has no regions"));
        }
        let root = &regions[0];
        if root.kind() != ControlFlowRegionKind::Root || root.parent().is_some() {
            return Err(lowering_error!("region 0 is not a parentless root region"));
        }
        if root.first_block() != 0 || root.last_block() != last {
            return Err(lowering_error!(
                "root region spans [{}, {}], expected [0, {last}]",
                root.first_block(),
                root.last_block()
            ));
        }
        for (index, region) in regions.iter().enumerate() {
            if index > 0 {
                let Some(parent) = region.parent() else {
                    return Err(lowering_error!("region {index} has no parent"));
                };
                let parent_region = regions
                    .get(parent.index())
                    .ok_or_else(|| lowering_error!("region {index} has a dangling parent"))?;
                if !parent_region
                    .children()
                    .contains(&RegionId::new(index))
                {
                    return Err(lowering_error!(
                        "region {index} is missing from its parent's children"
                    ));
                }
                if region.kind() == ControlFlowRegionKind::Root {
                    return Err(lowering_error!("region {index} is a non-root Root region"));
                }
                if region.first_block() < parent_region.first_block()
                    || region.last_block() > parent_region.last_block()
                {
                    return Err(lowering_error!(
                        "region {index} escapes its parent's span"
                    ));
                }
            }
            if region.first_block() > region.last_block() || region.last_block() > last {
                return Err(lowering_error!("region {index} has an invalid span"));
            }
            let mut previous_end: Option<usize> = None;
            for &child in region.children() {
                let child_region = regions
                    .get(child.index())
                    .ok_or_else(|| lowering_error!("region {index} has a dangling child"))?;
                if child_region.parent() != Some(RegionId::new(index)) {
                    return Err(lowering_error!(
                        "child {child} does not point back at region {index}"
                    ));
                }
                if let Some(previous) = previous_end {
                    if child_region.first_block() <= previous {
                        return Err(lowering_error!(
                            "children of region {index} overlap or are out of order"
                        ));
                    }
                }
                previous_end = Some(child_region.last_block());
            }
        }

        for block in blocks {
            let region = regions
                .get(block.region().index())
                .ok_or_else(|| lowering_error!("block {} has a dangling region", block.ordinal()))?;
            if !region.contains_block(block.ordinal()) {
                return Err(lowering_error!(
                    "block {} lies outside its region's span",
                    block.ordinal()
                ));
            }
            for &child in region.children() {
                if regions[child.index()].contains_block(block.ordinal()) {
                    return Err(lowering_error!(
                        "block {} belongs to a region that is not its leaf-most enclosure",
                        block.ordinal()
                    ));
                }
            }
            for branch in block.branches() {
                if branch.source() != block.ordinal() {
                    return Err(lowering_error!(
                        "branch out of block {} carries source {}",
                        block.ordinal(),
                        branch.source()
                    ));
                }
                match branch.destination() {
                    Some(destination) => {
                        if destination >= blocks.len() {
                            return Err(lowering_error!(
                                "branch out of block {} targets missing block {destination}",
                                block.ordinal()
                            ));
                        }
                        if branch.kind() == ControlFlowBranchKind::Return && destination != last {
                            return Err(lowering_error!(
                                "return branch out of block {} does not target the exit",
                                block.ordinal()
                            ));
                        }
                    }
                    None => {
                        if !branch.kind().is_exceptional() {
                            return Err(lowering_error!(
                                "non-exceptional branch out of block {} has no destination",
                                block.ordinal()
                            ));
                        }
                    }
                }
                if branch.kind().is_conditional() && branch.condition().is_none() {
                    return Err(lowering_error!(
                        "conditional branch out of block {} has no condition",
                        block.ordinal()
                    ));
                }
            }
        }

        Self::validate_function_lists(parts)
    }

    fn validate_function_lists(parts: &GraphParts) -> Result<()> {
        let mut seen = HashSet::new();
        for &function in &parts.local_functions {
            if !seen.insert(function) {
                return Err(lowering_error!("duplicate local function {function}"));
            }
            if parts.tree.function(function).is_none() {
                return Err(lowering_error!("local function {function} is not in the tree"));
            }
        }
        if parts.local_function_info.len() != parts.local_functions.len() {
            return Err(lowering_error!(
                "local function map size does not match the function list"
            ));
        }
        for (&function, info) in &parts.local_function_info {
            if parts.local_functions.get(info.ordinal()) != Some(&function) {
                return Err(lowering_error!(
                    "local function {function} has ordinal {} that does not index back to it",
                    info.ordinal()
                ));
            }
            if parts.regions.get(info.region().index()).is_none() {
                return Err(lowering_error!(
                    "local function {function} records a dangling region"
                ));
            }
            if parts.tree.operation(info.declaration()).is_none()
                || parts.tree.operation(info.body()).is_none()
            {
                return Err(lowering_error!(
                    "local function {function} records dangling operations"
                ));
            }
        }

        let mut seen = HashSet::new();
        for &lambda in &parts.anonymous_functions {
            if !seen.insert(lambda) {
                return Err(lowering_error!("duplicate anonymous function {lambda}"));
            }
        }
        if parts.anonymous_function_info.len() != parts.anonymous_functions.len() {
            return Err(lowering_error!(
                "anonymous function map size does not match the occurrence list"
            ));
        }
        for (&lambda, info) in &parts.anonymous_function_info {
            if parts.anonymous_functions.get(info.ordinal()) != Some(&lambda) {
                return Err(lowering_error!(
                    "anonymous function {lambda} has ordinal {} that does not index back to it",
                    info.ordinal()
                ));
            }
            if parts.regions.get(info.region().index()).is_none() {
                return Err(lowering_error!(
                    "anonymous function {lambda} records a dangling region"
                ));
            }
            if parts.tree.operation(info.body()).is_none() {
                return Err(lowering_error!(
                    "anonymous function {lambda} records a dangling body"
                ));
            }
        }
        Ok(())
    }

    /// Returns the operation tree this graph was lowered from.
    #[must_use]
    pub fn tree(&self) -> &Arc<OperationTree> {
        &self.tree
    }

    /// Returns the root operation this graph was created for.
    ///
    /// For a graph produced by [`create`](Self::create) this is the requested root; for a
    /// nested graph it is the local function's or lambda's body operation.
    #[must_use]
    pub const fn original_operation(&self) -> OperationId {
        self.original_operation
    }

    /// Returns the blocks of this graph, ordered by ordinal.
    #[must_use]
    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    /// Returns the block with the given ordinal, or `None` if out of range.
    #[must_use]
    pub fn block(&self, ordinal: usize) -> Option<&BasicBlock> {
        self.blocks.get(ordinal)
    }

    /// Returns the number of blocks in this graph.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Returns the entry block, always at ordinal 0.
    #[must_use]
    pub fn entry(&self) -> &BasicBlock {
        &self.blocks[0]
    }

    /// Returns the exit block, always at the last ordinal.
    #[must_use]
    pub fn exit(&self) -> &BasicBlock {
        &self.blocks[self.blocks.len() - 1]
    }

    /// Returns the region arena of this graph; index 0 is the root region.
    #[must_use]
    pub fn regions(&self) -> &[ControlFlowRegion] {
        &self.regions
    }

    /// Returns the region with the given id, or `None` if dangling.
    #[must_use]
    pub fn region(&self, id: RegionId) -> Option<&ControlFlowRegion> {
        self.regions.get(id.index())
    }

    /// Returns the root region, spanning every block of the graph.
    #[must_use]
    pub fn root_region(&self) -> &ControlFlowRegion {
        &self.regions[0]
    }

    /// Returns the local functions declared in the unit, in textual order, without
    /// duplicates.
    #[must_use]
    pub fn local_functions(&self) -> &[FunctionId] {
        &self.local_functions
    }

    /// Returns the declaration metadata recorded for a local function of this unit.
    #[must_use]
    pub fn local_function_info(&self, function: FunctionId) -> Option<&LocalFunctionInfo> {
        self.local_function_info.get(&function)
    }

    /// Returns the lambda occurrences of the unit, in lowering order.
    #[must_use]
    pub fn anonymous_functions(&self) -> &[OperationId] {
        &self.anonymous_functions
    }

    /// Returns the occurrence metadata recorded for a lambda of this unit.
    #[must_use]
    pub fn anonymous_function_info(
        &self,
        lambda: OperationId,
    ) -> Option<&AnonymousFunctionInfo> {
        self.anonymous_function_info.get(&lambda)
    }

    /// Returns the capture id dispenser shared across this graph's family.
    pub(crate) fn capture_dispenser(&self) -> &Arc<CaptureIdDispenser> {
        &self.captures
    }

    /// Returns the graph of a local function declared in this unit.
    ///
    /// The graph is built on first request and cached; repeated calls return the identical
    /// instance. See [`local_function_graph_with`](Self::local_function_graph_with) for
    /// the cancellable variant.
    ///
    /// # Errors
    ///
    /// [`Error::MissingSymbol`] for a dangling function id,
    /// [`Error::UnknownLocalFunction`] when the symbol is not declared in this unit, and
    /// any lowering failure of the nested build.
    pub fn local_function_graph(&self, function: FunctionId) -> Result<Arc<ControlFlowGraph>> {
        self.local_function_graph_with(function, &CancellationToken::new())
    }

    /// Returns the graph of a local function declared in this unit, observing a
    /// cancellation token during the build.
    ///
    /// Concurrent callers may race to build the same graph; the first completed build is
    /// published into the cache slot with compare-and-set semantics and every caller
    /// observes that instance. Discarded duplicate builds consume capture ids that are
    /// never observed, which is harmless since only uniqueness is guaranteed.
    ///
    /// # Errors
    ///
    /// See [`local_function_graph`](Self::local_function_graph); additionally
    /// [`Error::Cancelled`] when the token fires, in which case nothing is published.
    pub fn local_function_graph_with(
        &self,
        function: FunctionId,
        cancellation: &CancellationToken,
    ) -> Result<Arc<ControlFlowGraph>> {
        self.tree
            .function(function)
            .ok_or(Error::MissingSymbol(function))?;
        let info = self
            .local_function_info
            .get(&function)
            .ok_or(Error::UnknownLocalFunction(function))?;

        let slots = self
            .local_function_graphs
            .get_or_init(|| Self::empty_slots(self.local_functions.len()));
        let slot = &slots[info.ordinal()];
        if let Some(existing) = slot.get() {
            return Ok(Arc::clone(existing));
        }

        let ambient = self.ambient_captures(info.region());
        let built = Arc::new(ControlFlowGraphBuilder::build_nested(
            &self.tree,
            info.body(),
            &ambient,
            Arc::clone(&self.captures),
            cancellation.clone(),
        )?);
        Ok(Arc::clone(slot.get_or_init(|| built)))
    }

    /// Returns the graph of a lambda occurring in this unit.
    ///
    /// Structurally identical to [`local_function_graph`](Self::local_function_graph),
    /// keyed by the lambda occurrence and seeded from the [`CaptureContext`] recorded when
    /// the occurrence was lowered.
    ///
    /// # Errors
    ///
    /// [`Error::MissingOperation`] for a dangling operation id,
    /// [`Error::UnknownAnonymousFunction`] when the operation is not a lambda of this
    /// unit, and any lowering failure of the nested build.
    pub fn anonymous_function_graph(&self, lambda: OperationId) -> Result<Arc<ControlFlowGraph>> {
        self.anonymous_function_graph_with(lambda, &CancellationToken::new())
    }

    /// Returns the graph of a lambda occurring in this unit, observing a cancellation
    /// token during the build.
    ///
    /// # Errors
    ///
    /// See [`anonymous_function_graph`](Self::anonymous_function_graph); additionally
    /// [`Error::Cancelled`] when the token fires, in which case nothing is published.
    pub fn anonymous_function_graph_with(
        &self,
        lambda: OperationId,
        cancellation: &CancellationToken,
    ) -> Result<Arc<ControlFlowGraph>> {
        self.tree
            .operation(lambda)
            .ok_or(Error::MissingOperation(lambda))?;
        let info = self
            .anonymous_function_info
            .get(&lambda)
            .ok_or(Error::UnknownAnonymousFunction(lambda))?;

        let slots = self
            .anonymous_function_graphs
            .get_or_init(|| Self::empty_slots(self.anonymous_functions.len()));
        let slot = &slots[info.ordinal()];
        if let Some(existing) = slot.get() {
            return Ok(Arc::clone(existing));
        }

        let built = Arc::new(ControlFlowGraphBuilder::build_nested(
            &self.tree,
            info.body(),
            info.context().captures_in_scope(),
            Arc::clone(&self.captures),
            cancellation.clone(),
        )?);
        Ok(Arc::clone(slot.get_or_init(|| built)))
    }

    /// Eagerly builds every nested graph of this unit, fanning the independent builds out
    /// across threads.
    ///
    /// Useful for whole-unit analyses that will visit every nested function anyway;
    /// subsequent accessor calls hit the caches.
    ///
    /// # Errors
    ///
    /// The first build failure encountered, if any.
    pub fn build_all_nested_graphs(&self) -> Result<()> {
        self.local_functions
            .par_iter()
            .try_for_each(|&function| self.local_function_graph(function).map(|_| ()))?;
        self.anonymous_functions
            .par_iter()
            .try_for_each(|&lambda| self.anonymous_function_graph(lambda).map(|_| ()))
    }

    fn empty_slots(count: usize) -> Box<[OnceLock<Arc<ControlFlowGraph>>]> {
        (0..count).map(|_| OnceLock::new()).collect()
    }

    /// Collects the captures live at a declaration site: the captures anchored to the
    /// declaring region and every region enclosing it.
    fn ambient_captures(&self, region: RegionId) -> Vec<CaptureId> {
        let mut captures = Vec::new();
        let mut cursor = Some(region);
        while let Some(id) = cursor {
            let Some(region) = self.regions.get(id.index()) else {
                break;
            };
            captures.extend_from_slice(region.captures());
            cursor = region.parent();
        }
        captures
    }

    /// Generates a DOT format representation of this control flow graph.
    ///
    /// The generated DOT can be rendered using Graphviz tools like `dot` or online
    /// viewers. The entry block is highlighted in green, the exit block in red; branches
    /// that leave the graph point at a shared `unwind` node.
    ///
    /// # Arguments
    ///
    /// * `title` - Optional title for the graph (e.g., the unit name)
    ///
    /// # Returns
    ///
    /// A string containing the DOT representation of the graph.
    #[must_use]
    pub fn to_dot(&self, title: Option<&str>) -> String {
        let mut dot = String::new();

        dot.push_str("digraph CFG {\n");
        if let Some(name) = title {
            let _ = writeln!(dot, "    label=\"CFG: {}\";", escape_dot(name));
        }
        dot.push_str("    labelloc=t;\n");
        dot.push_str("    node [shape=box, fontname=\"Courier\", fontsize=10];\n");
        dot.push_str("    edge [fontname=\"Courier\", fontsize=9];\n\n");

        let mut needs_unwind = false;
        for block in &self.blocks {
            let ordinal = block.ordinal();
            let mut label = format!("B{ordinal}");
            match block.kind() {
                BasicBlockKind::Entry => label.push_str(" (entry)"),
                BasicBlockKind::Exit => label.push_str(" (exit)"),
                BasicBlockKind::Block => {}
            }
            if !block.is_reachable() {
                label.push_str(" (unreachable)");
            }
            label.push_str("\\l");

            for operation in block.operations() {
                match operation {
                    FlowOperation::Evaluate(id) => {
                        let _ = write!(label, "{id}: {}", self.operation_name(*id));
                    }
                    FlowOperation::Capture { id, value } => {
                        let _ = write!(label, "{id} = {}", self.value_label(value));
                    }
                }
                label.push_str("\\l");
            }

            let style = match block.kind() {
                BasicBlockKind::Entry => ", style=filled, fillcolor=lightgreen",
                BasicBlockKind::Exit => ", style=filled, fillcolor=lightcoral",
                BasicBlockKind::Block => "",
            };
            let _ = writeln!(dot, "    B{ordinal} [label=\"{label}\"{style}];");

            if block.branches().iter().any(|b| b.destination().is_none()) {
                needs_unwind = true;
            }
        }
        if needs_unwind {
            dot.push_str("    unwind [shape=plaintext, label=\"unwind\"];\n");
        }

        dot.push('\n');
        for block in &self.blocks {
            for branch in block.branches() {
                let target = branch
                    .destination()
                    .map_or_else(|| "unwind".to_string(), |d| format!("B{d}"));
                let label = match branch.kind() {
                    ControlFlowBranchKind::Regular => String::new(),
                    ControlFlowBranchKind::ConditionalTrue => "true".to_string(),
                    ControlFlowBranchKind::ConditionalFalse => "false".to_string(),
                    ControlFlowBranchKind::Return => "return".to_string(),
                    ControlFlowBranchKind::Throw => "throw".to_string(),
                    ControlFlowBranchKind::Rethrow => "rethrow".to_string(),
                    ControlFlowBranchKind::StructuredExceptionHandling => "seh".to_string(),
                };
                let color = match branch.kind() {
                    ControlFlowBranchKind::Regular => "black",
                    ControlFlowBranchKind::ConditionalTrue => "green",
                    ControlFlowBranchKind::ConditionalFalse => "red",
                    ControlFlowBranchKind::Return => "blue",
                    _ => "purple",
                };
                let _ = writeln!(
                    dot,
                    "    B{} -> {target} [label=\"{}\", color={color}];",
                    branch.source(),
                    escape_dot(&label)
                );
            }
        }

        dot.push_str("}\n");
        dot
    }

    fn operation_name(&self, id: OperationId) -> &'static str {
        self.tree
            .operation(id)
            .map_or("?", |operation| operation.kind().name())
    }

    fn value_label(&self, value: &FlowValue) -> String {
        match value {
            FlowValue::Operation(id) => format!("{id} ({})", self.operation_name(*id)),
            FlowValue::Capture(id) => id.to_string(),
            FlowValue::Constant(value) => value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::branch::ControlFlowBranch;
    use crate::operation::OperationTreeBuilder;

    /// Assembles minimal valid parts: entry -> block -> exit inside a root region.
    fn make_parts() -> GraphParts {
        let mut builder = OperationTreeBuilder::new();
        let ret = builder.ret(None);
        let body = builder.block(vec![ret], vec![]);
        let tree = builder.finish(body).unwrap();

        let root = RegionId::new(0);
        let mut blocks = vec![
            BasicBlock::new(0, BasicBlockKind::Entry, root),
            BasicBlock::new(1, BasicBlockKind::Block, root),
            BasicBlock::new(2, BasicBlockKind::Exit, root),
        ];
        blocks[0].set_branches(vec![ControlFlowBranch::regular(0, 1)]);
        blocks[1].set_branches(vec![ControlFlowBranch::regular(1, 2)]);

        let regions = vec![ControlFlowRegion::new(
            ControlFlowRegionKind::Root,
            0,
            2,
            None,
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            None,
        )];

        GraphParts {
            tree,
            original_operation: body,
            blocks,
            regions,
            local_functions: Vec::new(),
            local_function_info: HashMap::new(),
            anonymous_functions: Vec::new(),
            anonymous_function_info: HashMap::new(),
            captures: Arc::new(CaptureIdDispenser::new()),
        }
    }

    #[test]
    fn test_from_parts_accepts_valid_graph() {
        let graph = ControlFlowGraph::from_parts(make_parts()).unwrap();
        assert_eq!(graph.block_count(), 3);
        assert_eq!(graph.entry().kind(), BasicBlockKind::Entry);
        assert_eq!(graph.exit().kind(), BasicBlockKind::Exit);
        assert_eq!(graph.root_region().first_block(), 0);
        assert_eq!(graph.root_region().last_block(), 2);
    }

    #[test]
    fn test_from_parts_rejects_misnumbered_ordinals() {
        let mut parts = make_parts();
        parts.blocks[1] = BasicBlock::new(5, BasicBlockKind::Block, RegionId::new(0));
        let error = ControlFlowGraph::from_parts(parts).unwrap_err();
        assert!(matches!(error, Error::Lowering { .. }));
    }

    #[test]
    fn test_from_parts_rejects_wrong_entry_kind() {
        let mut parts = make_parts();
        parts.blocks[0] = BasicBlock::new(0, BasicBlockKind::Block, RegionId::new(0));
        assert!(ControlFlowGraph::from_parts(parts).is_err());
    }

    #[test]
    fn test_from_parts_rejects_wrong_exit_kind() {
        let mut parts = make_parts();
        parts.blocks[2] = BasicBlock::new(2, BasicBlockKind::Block, RegionId::new(0));
        assert!(ControlFlowGraph::from_parts(parts).is_err());
    }

    #[test]
    fn test_from_parts_rejects_short_root_span() {
        let mut parts = make_parts();
        parts.regions[0] = ControlFlowRegion::new(
            ControlFlowRegionKind::Root,
            0,
            1,
            None,
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            None,
        );
        assert!(ControlFlowGraph::from_parts(parts).is_err());
    }

    #[test]
    fn test_from_parts_rejects_overlapping_siblings() {
        let mut parts = make_parts();
        let root_children = vec![RegionId::new(1), RegionId::new(2)];
        parts.regions = vec![
            ControlFlowRegion::new(
                ControlFlowRegionKind::Root,
                0,
                2,
                None,
                root_children,
                Vec::new(),
                Vec::new(),
                Vec::new(),
                None,
            ),
            ControlFlowRegion::new(
                ControlFlowRegionKind::LocalLifetime,
                1,
                1,
                Some(RegionId::new(0)),
                Vec::new(),
                Vec::new(),
                Vec::new(),
                Vec::new(),
                None,
            ),
            ControlFlowRegion::new(
                ControlFlowRegionKind::LocalLifetime,
                1,
                1,
                Some(RegionId::new(0)),
                Vec::new(),
                Vec::new(),
                Vec::new(),
                Vec::new(),
                None,
            ),
        ];
        // Re-home the middle block so the leaf-most check passes for block 1.
        parts.blocks[1] = {
            let mut block = BasicBlock::new(1, BasicBlockKind::Block, RegionId::new(1));
            block.set_branches(vec![ControlFlowBranch::regular(1, 2)]);
            block
        };
        assert!(ControlFlowGraph::from_parts(parts).is_err());
    }

    #[test]
    fn test_from_parts_rejects_dangling_branch() {
        let mut parts = make_parts();
        parts.blocks[1].set_branches(vec![ControlFlowBranch::regular(1, 9)]);
        assert!(ControlFlowGraph::from_parts(parts).is_err());
    }

    #[test]
    fn test_from_parts_rejects_duplicate_local_functions() {
        let mut builder = OperationTreeBuilder::new();
        let helper = builder.function("helper");
        let ret = builder.ret(None);
        let body = builder.block(vec![ret], vec![]);
        let tree = builder.finish(body).unwrap();

        let mut parts = make_parts();
        parts.tree = tree;
        parts.original_operation = body;
        parts.local_functions = vec![helper, helper];
        assert!(ControlFlowGraph::from_parts(parts).is_err());
    }

    #[test]
    fn test_to_dot_renders_blocks_and_edges() {
        let graph = ControlFlowGraph::from_parts(make_parts()).unwrap();
        let dot = graph.to_dot(Some("unit"));
        assert!(dot.contains("digraph CFG"));
        assert!(dot.contains("B0"));
        assert!(dot.contains("B0 -> B1"));
        assert!(dot.contains("lightgreen"));
        assert!(dot.contains("lightcoral"));
    }
}
