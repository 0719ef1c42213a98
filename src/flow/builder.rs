//! Tree-to-graph lowering.
//!
//! [`ControlFlowGraphBuilder`] walks one code unit of an operation tree and produces the
//! flat collections the immutable [`ControlFlowGraph`](crate::ControlFlowGraph) is
//! assembled from: the ordered block sequence (entry first, exit last, dense ordinals),
//! the region tree, the recorded local-function declarations and lambda occurrences, and a
//! synthesized branch for every control construct.
//!
//! # Lowering strategy
//!
//! Lowering is label driven. Constructs allocate labels, terminate the current block with
//! a typed terminator referencing them, and *place* labels that should bind to whatever
//! block starts next. Blocks are only created on demand (when an operation or terminator
//! needs one), so join points that fall together share a block instead of producing empty
//! intermediaries. An unterminated block falls through to the next ordinal.
//!
//! Regions are tracked as a stack: entering a construct opens a region, every block
//! created while it is open extends its span, and closing it seals the span. Because
//! lowering is strictly nested, each region covers a contiguous ordinal range and sibling
//! spans never overlap.
//!
//! Values that cross block boundaries (ternaries, short-circuiting booleans, switch
//! scrutinees) are evaluated into flow captures named by the shared
//! [`CaptureIdDispenser`]; everything else is referenced in place, leaving the original
//! tree untouched.

use std::collections::HashMap;
use std::sync::Arc;

use crate::flow::block::{BasicBlock, BasicBlockKind, FlowOperation, FlowValue};
use crate::flow::branch::ControlFlowBranch;
use crate::flow::capture::{CaptureId, CaptureIdDispenser};
use crate::flow::graph::{
    AnonymousFunctionInfo, CaptureContext, ControlFlowGraph, GraphParts, LocalFunctionInfo,
};
use crate::flow::region::{ControlFlowRegion, ControlFlowRegionKind, RegionId};
use crate::operation::{
    CasePattern, CatchClause, ConstValue, FunctionId, JumpKind, LocalId, Operation,
    OperationId, OperationKind, OperationTree, SwitchCase, TypeName,
};
use crate::utils::synchronization::CancellationToken;
use crate::Result;

/// A forward reference to a block that may not exist yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LabelId(usize);

/// How a block under construction ends.
#[derive(Debug, Clone, Copy)]
enum Terminator {
    /// Falls through to the next ordinal.
    None,
    /// Unconditional jump.
    Goto(LabelId),
    /// Conditional pair: `when_true` if `condition` holds, `when_false` otherwise.
    Branch {
        condition: FlowValue,
        when_true: LabelId,
        when_false: LabelId,
    },
    /// Value-carrying return to the exit block.
    Return { value: FlowValue },
    /// Throw; leaves the graph.
    Throw { exception: FlowValue },
    /// Rethrow of the in-flight exception; leaves the graph.
    Rethrow,
    /// Structured-exception-handling exit (end of a finally body).
    ExceptionExit,
    /// Filter dispatch: enter the handler if `condition` holds, otherwise hand the
    /// exception back to the dispatcher.
    FilterDispatch {
        condition: FlowValue,
        handler: LabelId,
    },
}

#[derive(Debug)]
struct BlockInProgress {
    kind: BasicBlockKind,
    region: RegionId,
    operations: Vec<FlowOperation>,
    terminator: Terminator,
}

#[derive(Debug)]
struct RegionInProgress {
    kind: ControlFlowRegionKind,
    first_block: Option<usize>,
    last_block: Option<usize>,
    parent: Option<RegionId>,
    children: Vec<RegionId>,
    locals: Vec<LocalId>,
    local_functions: Vec<FunctionId>,
    captures: Vec<CaptureId>,
    exception_type: Option<TypeName>,
}

impl RegionInProgress {
    fn new(kind: ControlFlowRegionKind, parent: Option<RegionId>) -> Self {
        Self {
            kind,
            first_block: None,
            last_block: None,
            parent,
            children: Vec::new(),
            locals: Vec::new(),
            local_functions: Vec::new(),
            captures: Vec::new(),
            exception_type: None,
        }
    }
}

/// Break/continue targets of the innermost enclosing loop or switch.
#[derive(Debug, Clone, Copy)]
struct LoopContext {
    break_label: LabelId,
    /// `None` for switches; continue searches outward for the innermost loop.
    continue_label: Option<LabelId>,
}

/// Lowers one code unit of an operation tree into a [`ControlFlowGraph`].
pub(crate) struct ControlFlowGraphBuilder<'a> {
    tree: &'a Arc<OperationTree>,
    dispenser: Arc<CaptureIdDispenser>,
    cancellation: CancellationToken,
    /// The operation the produced graph is rooted at.
    unit_root: OperationId,
    blocks: Vec<BlockInProgress>,
    regions: Vec<RegionInProgress>,
    region_stack: Vec<RegionId>,
    labels: Vec<Option<usize>>,
    /// Labels waiting to bind to the next started block.
    pending_labels: Vec<LabelId>,
    /// The open block receiving operations, if any.
    current: Option<usize>,
    exit_label: LabelId,
    loop_stack: Vec<LoopContext>,
    /// Depth of catch-handler nesting; rethrow is only valid when non-zero.
    catch_depth: usize,
    local_functions: Vec<FunctionId>,
    local_function_info: HashMap<FunctionId, LocalFunctionInfo>,
    anonymous_functions: Vec<OperationId>,
    anonymous_function_info: HashMap<OperationId, AnonymousFunctionInfo>,
    /// Captures issued so far in this unit, plus the ambient ones of the enclosing unit
    /// for nested builds; snapshotted into each lambda's context.
    captures_in_scope: Vec<CaptureId>,
}

impl<'a> ControlFlowGraphBuilder<'a> {
    /// Lowers a root operation into a complete graph.
    pub(crate) fn build(
        tree: &'a Arc<OperationTree>,
        root: OperationId,
        dispenser: Arc<CaptureIdDispenser>,
        cancellation: CancellationToken,
    ) -> Result<ControlFlowGraph> {
        let mut builder = Self::new(tree, root, dispenser, cancellation);
        builder.lower_unit(root)?;
        builder.finish(root)
    }

    /// Lowers the body of a nested local or anonymous function.
    ///
    /// `ambient_captures` carries the captures live at the declaration or occurrence
    /// site of the nested function, derived from its recorded enclosing region or
    /// capture context; `dispenser` is the shared dispenser of the graph family.
    pub(crate) fn build_nested(
        tree: &'a Arc<OperationTree>,
        body: OperationId,
        ambient_captures: &[CaptureId],
        dispenser: Arc<CaptureIdDispenser>,
        cancellation: CancellationToken,
    ) -> Result<ControlFlowGraph> {
        let mut builder = Self::new(tree, body, dispenser, cancellation);
        builder
            .captures_in_scope
            .extend_from_slice(ambient_captures);
        builder.lower_unit(body)?;
        builder.finish(body)
    }

    fn new(
        tree: &'a Arc<OperationTree>,
        unit_root: OperationId,
        dispenser: Arc<CaptureIdDispenser>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            tree,
            dispenser,
            cancellation,
            unit_root,
            blocks: Vec::new(),
            regions: Vec::new(),
            region_stack: Vec::new(),
            // Label 0 is the exit label, bound when the exit block is created.
            labels: vec![None],
            pending_labels: Vec::new(),
            current: None,
            exit_label: LabelId(0),
            loop_stack: Vec::new(),
            catch_depth: 0,
            local_functions: Vec::new(),
            local_function_info: HashMap::new(),
            anonymous_functions: Vec::new(),
            anonymous_function_info: HashMap::new(),
            captures_in_scope: Vec::new(),
        }
    }

    fn operation(&self, id: OperationId) -> Result<&'a Operation> {
        let tree: &'a OperationTree = self.tree;
        tree.resolve(id)
    }

    // ---------------------------------------------------------------- labels and blocks

    fn new_label(&mut self) -> LabelId {
        let label = LabelId(self.labels.len());
        self.labels.push(None);
        label
    }

    /// Queues a label to bind to the next started block.
    fn place_label(&mut self, label: LabelId) {
        self.pending_labels.push(label);
    }

    fn resolve_label(&self, label: LabelId) -> Result<usize> {
        self.labels
            .get(label.0)
            .copied()
            .flatten()
            .ok_or_else(|| lowering_error!("label {} was never bound to a block", label.0))
    }

    fn start_block(&mut self, kind: BasicBlockKind) -> Result<usize> {
        self.cancellation.check()?;
        let ordinal = self.blocks.len();
        let region = *self
            .region_stack
            .last()
            .ok_or_else(|| lowering_error!("block started with no open region"))?;
        for &open in &self.region_stack {
            let region = &mut self.regions[open.index()];
            if region.first_block.is_none() {
                region.first_block = Some(ordinal);
            }
        }
        self.blocks.push(BlockInProgress {
            kind,
            region,
            operations: Vec::new(),
            terminator: Terminator::None,
        });
        for label in self.pending_labels.drain(..) {
            self.labels[label.0] = Some(ordinal);
        }
        self.current = Some(ordinal);
        Ok(ordinal)
    }

    /// Returns the open block, starting a fresh one when none is open or labels are
    /// waiting to bind.
    fn ensure_current(&mut self) -> Result<usize> {
        match self.current {
            Some(ordinal) if self.pending_labels.is_empty() => Ok(ordinal),
            _ => self.start_block(BasicBlockKind::Block),
        }
    }

    fn append(&mut self, operation: FlowOperation) -> Result<()> {
        let ordinal = self.ensure_current()?;
        self.blocks[ordinal].operations.push(operation);
        Ok(())
    }

    fn terminate(&mut self, terminator: Terminator) -> Result<()> {
        let ordinal = self.ensure_current()?;
        self.blocks[ordinal].terminator = terminator;
        self.current = None;
        Ok(())
    }

    /// Ends the live path, if any, with a jump to `label`.
    fn join_to(&mut self, label: LabelId) -> Result<()> {
        if self.current.is_some() || !self.pending_labels.is_empty() {
            self.terminate(Terminator::Goto(label))?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------- regions

    fn enter_region(&mut self, kind: ControlFlowRegionKind) -> RegionId {
        let id = RegionId::new(self.regions.len());
        let parent = self.region_stack.last().copied();
        if let Some(parent) = parent {
            self.regions[parent.index()].children.push(id);
        }
        self.regions.push(RegionInProgress::new(kind, parent));
        self.region_stack.push(id);
        // Region boundaries are block boundaries: an open outer block falls through to
        // the region's first block instead of receiving its contents.
        self.current = None;
        id
    }

    fn close_region(&mut self, expected: RegionId) -> Result<()> {
        let id = self
            .region_stack
            .pop()
            .ok_or_else(|| lowering_error!("region stack underflow"))?;
        if id != expected {
            return Err(lowering_error!("unbalanced region nesting"));
        }
        if self.regions[id.index()].first_block.is_none() {
            // A region never owns zero blocks; give degenerate input an empty one.
            self.region_stack.push(id);
            self.start_block(BasicBlockKind::Block)?;
            self.region_stack.pop();
        }
        self.regions[id.index()].last_block = Some(self.blocks.len() - 1);
        // Anything lowered after the close belongs outside the sealed span.
        self.current = None;
        Ok(())
    }

    fn innermost_region(&self) -> Result<RegionId> {
        self.region_stack
            .last()
            .copied()
            .ok_or_else(|| lowering_error!("no open region"))
    }

    fn new_capture(&mut self) -> Result<CaptureId> {
        let id = self.dispenser.next();
        let region = self.innermost_region()?;
        self.regions[region.index()].captures.push(id);
        self.captures_in_scope.push(id);
        Ok(id)
    }

    // ------------------------------------------------------------------------ lowering

    fn lower_unit(&mut self, root: OperationId) -> Result<()> {
        let region = RegionId::new(0);
        self.regions
            .push(RegionInProgress::new(ControlFlowRegionKind::Root, None));
        self.region_stack.push(region);

        self.start_block(BasicBlockKind::Entry)?;
        // The entry block stays empty; the unit's first real block starts on demand and
        // receives the entry's fall-through.
        self.current = None;

        self.lower_statement(root)
    }

    fn lower_statement(&mut self, id: OperationId) -> Result<()> {
        let operation = self.operation(id)?;
        match operation.kind() {
            OperationKind::Block { statements, locals } => {
                if locals.is_empty() || id == self.unit_root {
                    let region = self.innermost_region()?;
                    self.regions[region.index()]
                        .locals
                        .extend_from_slice(locals);
                    for &statement in statements {
                        self.lower_statement(statement)?;
                    }
                } else {
                    let region = self.enter_region(ControlFlowRegionKind::LocalLifetime);
                    self.regions[region.index()].locals = locals.clone();
                    for &statement in statements {
                        self.lower_statement(statement)?;
                    }
                    self.close_region(region)?;
                }
                Ok(())
            }
            OperationKind::ExpressionStatement { expression } => {
                self.lower_effect(*expression)
            }
            OperationKind::VariableDeclaration { initializer, .. } => {
                if let Some(initializer) = initializer {
                    self.lower_expression(*initializer)?;
                    self.append(FlowOperation::Evaluate(id))?;
                }
                Ok(())
            }
            OperationKind::Conditional {
                condition,
                when_true,
                when_false,
            } => self.lower_if(*condition, *when_true, *when_false),
            OperationKind::While { condition, body } => self.lower_while(*condition, *body),
            OperationKind::DoWhile { condition, body } => self.lower_do_while(*condition, *body),
            OperationKind::Jump { kind } => self.lower_jump(*kind),
            OperationKind::Return { value } => match value {
                // A bare return is plain fall-through to the exit.
                None => self.terminate(Terminator::Goto(self.exit_label)),
                Some(value) => {
                    let value = self.lower_expression(*value)?;
                    self.terminate(Terminator::Return { value })
                }
            },
            OperationKind::Throw { exception } => match exception {
                Some(exception) => {
                    let exception = self.lower_expression(*exception)?;
                    self.terminate(Terminator::Throw { exception })
                }
                None => {
                    if self.catch_depth == 0 {
                        return Err(lowering_error!(
                            "rethrow outside of a catch handler at {id}"
                        ));
                    }
                    self.terminate(Terminator::Rethrow)
                }
            },
            OperationKind::Try {
                body,
                catches,
                finally,
            } => self.lower_try(*body, catches, *finally),
            OperationKind::Switch { value, cases } => self.lower_switch(*value, cases),
            OperationKind::LocalFunction { function, body } => {
                self.lower_local_function(id, *function, *body)
            }
            // Expression kinds in statement position are evaluated for effect.
            _ => self.lower_effect(id),
        }
    }

    /// Lowers an expression in statement position, recording its evaluation unless it was
    /// consumed entirely into captures.
    fn lower_effect(&mut self, id: OperationId) -> Result<()> {
        if let FlowValue::Operation(operation) = self.lower_expression(id)? {
            self.append(FlowOperation::Evaluate(operation))?;
        }
        Ok(())
    }

    fn lower_if(
        &mut self,
        condition: OperationId,
        when_true: OperationId,
        when_false: Option<OperationId>,
    ) -> Result<()> {
        let then_label = self.new_label();
        let after_label = self.new_label();
        match when_false {
            None => {
                self.lower_condition(condition, then_label, after_label)?;
                self.place_label(then_label);
                self.lower_statement(when_true)?;
                self.place_label(after_label);
            }
            Some(when_false) => {
                let else_label = self.new_label();
                self.lower_condition(condition, then_label, else_label)?;
                self.place_label(then_label);
                self.lower_statement(when_true)?;
                self.join_to(after_label)?;
                self.place_label(else_label);
                self.lower_statement(when_false)?;
                self.place_label(after_label);
            }
        }
        Ok(())
    }

    fn lower_while(&mut self, condition: OperationId, body: OperationId) -> Result<()> {
        let region = self.enter_region(ControlFlowRegionKind::Loop);
        let continue_label = self.new_label();
        let body_label = self.new_label();
        let break_label = self.new_label();

        self.place_label(continue_label);
        self.loop_stack.push(LoopContext {
            break_label,
            continue_label: Some(continue_label),
        });
        self.lower_condition(condition, body_label, break_label)?;
        self.place_label(body_label);
        self.lower_statement(body)?;
        self.join_to(continue_label)?;
        self.loop_stack.pop();
        self.close_region(region)?;
        self.place_label(break_label);
        Ok(())
    }

    fn lower_do_while(&mut self, condition: OperationId, body: OperationId) -> Result<()> {
        let region = self.enter_region(ControlFlowRegionKind::Loop);
        let body_label = self.new_label();
        let continue_label = self.new_label();
        let break_label = self.new_label();

        self.place_label(body_label);
        self.loop_stack.push(LoopContext {
            break_label,
            continue_label: Some(continue_label),
        });
        self.lower_statement(body)?;
        self.place_label(continue_label);
        self.lower_condition(condition, body_label, break_label)?;
        self.loop_stack.pop();
        self.close_region(region)?;
        self.place_label(break_label);
        Ok(())
    }

    fn lower_jump(&mut self, kind: JumpKind) -> Result<()> {
        match kind {
            JumpKind::Break => {
                let context = *self
                    .loop_stack
                    .last()
                    .ok_or_else(|| lowering_error!("break outside of a loop or switch"))?;
                self.terminate(Terminator::Goto(context.break_label))
            }
            JumpKind::Continue => {
                let label = self
                    .loop_stack
                    .iter()
                    .rev()
                    .find_map(|context| context.continue_label)
                    .ok_or_else(|| lowering_error!("continue outside of a loop"))?;
                self.terminate(Terminator::Goto(label))
            }
        }
    }

    fn lower_try(
        &mut self,
        body: OperationId,
        catches: &'a [CatchClause],
        finally: Option<OperationId>,
    ) -> Result<()> {
        let after_label = self.new_label();
        if let Some(finally_body) = finally {
            let outer = self.enter_region(ControlFlowRegionKind::TryAndFinally);
            let protected = self.enter_region(ControlFlowRegionKind::Try);
            self.lower_try_core(body, catches, after_label)?;
            self.close_region(protected)?;

            let finally_region = self.enter_region(ControlFlowRegionKind::Finally);
            self.ensure_current()?;
            self.lower_statement(finally_body)?;
            // The end of a finally hands control back to the dispatcher.
            self.terminate(Terminator::ExceptionExit)?;
            self.close_region(finally_region)?;
            self.close_region(outer)?;
        } else {
            self.lower_try_core(body, catches, after_label)?;
        }
        self.place_label(after_label);
        Ok(())
    }

    fn lower_try_core(
        &mut self,
        body: OperationId,
        catches: &'a [CatchClause],
        after_label: LabelId,
    ) -> Result<()> {
        if catches.is_empty() {
            self.ensure_current()?;
            self.lower_statement(body)?;
            self.join_to(after_label)
        } else {
            let group = self.enter_region(ControlFlowRegionKind::TryAndCatch);
            let protected = self.enter_region(ControlFlowRegionKind::Try);
            self.ensure_current()?;
            self.lower_statement(body)?;
            self.join_to(after_label)?;
            self.close_region(protected)?;
            for clause in catches {
                self.lower_catch_clause(clause, after_label)?;
            }
            self.close_region(group)
        }
    }

    fn lower_catch_clause(
        &mut self,
        clause: &'a CatchClause,
        after_label: LabelId,
    ) -> Result<()> {
        if let Some(filter) = clause.filter {
            let wrapper = self.enter_region(ControlFlowRegionKind::FilterAndHandler);

            let filter_region = self.enter_region(ControlFlowRegionKind::Filter);
            self.regions[filter_region.index()].exception_type = clause.exception_type.clone();
            let handler_label = self.new_label();
            self.ensure_current()?;
            let condition = self.lower_expression(filter)?;
            self.terminate(Terminator::FilterDispatch {
                condition,
                handler: handler_label,
            })?;
            self.close_region(filter_region)?;

            let catch_region = self.enter_region(ControlFlowRegionKind::Catch);
            self.regions[catch_region.index()].exception_type = clause.exception_type.clone();
            if let Some(local) = clause.local {
                self.regions[catch_region.index()].locals.push(local);
            }
            self.place_label(handler_label);
            self.ensure_current()?;
            self.catch_depth += 1;
            self.lower_statement(clause.handler)?;
            self.catch_depth -= 1;
            self.join_to(after_label)?;
            self.close_region(catch_region)?;

            self.close_region(wrapper)
        } else {
            let catch_region = self.enter_region(ControlFlowRegionKind::Catch);
            self.regions[catch_region.index()].exception_type = clause.exception_type.clone();
            if let Some(local) = clause.local {
                self.regions[catch_region.index()].locals.push(local);
            }
            self.ensure_current()?;
            self.catch_depth += 1;
            self.lower_statement(clause.handler)?;
            self.catch_depth -= 1;
            self.join_to(after_label)?;
            self.close_region(catch_region)
        }
    }

    fn lower_switch(&mut self, value: OperationId, cases: &'a [SwitchCase]) -> Result<()> {
        // The scrutinee is evaluated exactly once, into a capture every test reads.
        let scrutinee = self.lower_expression(value)?;
        let capture = self.new_capture()?;
        self.append(FlowOperation::Capture {
            id: capture,
            value: scrutinee,
        })?;

        let after_label = self.new_label();
        self.loop_stack.push(LoopContext {
            break_label: after_label,
            continue_label: None,
        });

        let mut default_body = None;
        for case in cases {
            match case.pattern {
                CasePattern::Default => default_body = Some(case.body),
                CasePattern::Value(pattern) => {
                    let body_label = self.new_label();
                    let next_label = self.new_label();
                    // The branch condition references the pattern; it is tested against
                    // the captured scrutinee.
                    let condition = self.lower_expression(pattern)?;
                    if let Some(guard) = case.guard {
                        let guard_label = self.new_label();
                        self.terminate(Terminator::Branch {
                            condition,
                            when_true: guard_label,
                            when_false: next_label,
                        })?;
                        self.place_label(guard_label);
                        self.lower_condition(guard, body_label, next_label)?;
                    } else {
                        self.terminate(Terminator::Branch {
                            condition,
                            when_true: body_label,
                            when_false: next_label,
                        })?;
                    }
                    self.place_label(body_label);
                    self.lower_statement(case.body)?;
                    self.join_to(after_label)?;
                    self.place_label(next_label);
                }
            }
        }
        if let Some(body) = default_body {
            self.lower_statement(body)?;
            self.join_to(after_label)?;
        }

        self.loop_stack.pop();
        self.place_label(after_label);
        Ok(())
    }

    fn lower_local_function(
        &mut self,
        declaration: OperationId,
        function: FunctionId,
        body: OperationId,
    ) -> Result<()> {
        if self.tree.function(function).is_none() {
            return Err(lowering_error!(
                "local function declaration {declaration} references unknown symbol {function}"
            ));
        }
        if self.local_function_info.contains_key(&function) {
            return Err(lowering_error!(
                "duplicate declaration of local function {function}"
            ));
        }
        let region = self.innermost_region()?;
        let ordinal = self.local_functions.len();
        self.local_functions.push(function);
        self.regions[region.index()].local_functions.push(function);
        self.local_function_info.insert(
            function,
            LocalFunctionInfo::new(region, declaration, ordinal, body),
        );
        Ok(())
    }

    /// Lowers a condition, branching to `true_label` or `false_label`. Short-circuiting
    /// operators and negation become pure branch structure; everything else ends the
    /// current block with a conditional pair.
    fn lower_condition(
        &mut self,
        id: OperationId,
        true_label: LabelId,
        false_label: LabelId,
    ) -> Result<()> {
        let operation = self.operation(id)?;
        match operation.kind() {
            OperationKind::Binary {
                operator,
                left,
                right,
            } if operator.is_short_circuit() => {
                let rhs_label = self.new_label();
                match operator {
                    crate::operation::BinaryOperator::AndAlso => {
                        self.lower_condition(*left, rhs_label, false_label)?;
                    }
                    _ => {
                        self.lower_condition(*left, true_label, rhs_label)?;
                    }
                }
                self.place_label(rhs_label);
                self.lower_condition(*right, true_label, false_label)
            }
            OperationKind::Unary {
                operator: crate::operation::UnaryOperator::Not,
                operand,
            } => self.lower_condition(*operand, false_label, true_label),
            _ => {
                let condition = self.lower_expression(id)?;
                self.terminate(Terminator::Branch {
                    condition,
                    when_true: true_label,
                    when_false: false_label,
                })
            }
        }
    }

    /// Lowers an expression to the value consumers should read.
    ///
    /// Expressions without embedded control flow are referenced in place. Ternaries and
    /// short-circuiting booleans are evaluated into a fresh capture; their parents then
    /// find the capture association in the preceding block operations.
    fn lower_expression(&mut self, id: OperationId) -> Result<FlowValue> {
        let operation = self.operation(id)?;
        match operation.kind() {
            OperationKind::Binary {
                operator,
                left,
                right,
            } if operator.is_short_circuit() => {
                let capture = self.new_capture()?;
                let rhs_label = self.new_label();
                let short_label = self.new_label();
                let done_label = self.new_label();
                let short_value = match operator {
                    crate::operation::BinaryOperator::AndAlso => {
                        self.lower_condition(*left, rhs_label, short_label)?;
                        false
                    }
                    _ => {
                        self.lower_condition(*left, short_label, rhs_label)?;
                        true
                    }
                };
                self.place_label(rhs_label);
                let rhs = self.lower_expression(*right)?;
                self.append(FlowOperation::Capture {
                    id: capture,
                    value: rhs,
                })?;
                self.terminate(Terminator::Goto(done_label))?;
                self.place_label(short_label);
                self.append(FlowOperation::Capture {
                    id: capture,
                    value: FlowValue::Constant(ConstValue::Bool(short_value)),
                })?;
                self.place_label(done_label);
                Ok(FlowValue::Capture(capture))
            }
            OperationKind::Conditional {
                condition,
                when_true,
                when_false: Some(when_false),
            } => {
                let capture = self.new_capture()?;
                let true_label = self.new_label();
                let false_label = self.new_label();
                let done_label = self.new_label();
                self.lower_condition(*condition, true_label, false_label)?;
                self.place_label(true_label);
                let value = self.lower_expression(*when_true)?;
                self.append(FlowOperation::Capture { id: capture, value })?;
                self.terminate(Terminator::Goto(done_label))?;
                self.place_label(false_label);
                let value = self.lower_expression(*when_false)?;
                self.append(FlowOperation::Capture { id: capture, value })?;
                self.place_label(done_label);
                Ok(FlowValue::Capture(capture))
            }
            OperationKind::Conditional {
                when_false: None, ..
            } => Err(lowering_error!(
                "conditional {id} without a false arm used as a value"
            )),
            OperationKind::AnonymousFunction { body } => {
                self.lower_anonymous_function(id, *body)?;
                Ok(FlowValue::Operation(id))
            }
            OperationKind::Assignment { target, value } => {
                self.lower_operand(*target)?;
                self.lower_operand(*value)?;
                Ok(FlowValue::Operation(id))
            }
            OperationKind::Invocation { arguments, .. } => {
                for &argument in arguments {
                    self.lower_operand(argument)?;
                }
                Ok(FlowValue::Operation(id))
            }
            OperationKind::Unary { operand, .. } => {
                self.lower_operand(*operand)?;
                Ok(FlowValue::Operation(id))
            }
            OperationKind::Binary { left, right, .. } => {
                self.lower_operand(*left)?;
                self.lower_operand(*right)?;
                Ok(FlowValue::Operation(id))
            }
            OperationKind::Literal { .. } | OperationKind::LocalReference { .. } => {
                Ok(FlowValue::Operation(id))
            }
            OperationKind::Throw { .. } => {
                Err(lowering_error!("throw expression {id} is not supported"))
            }
            kind => Err(lowering_error!(
                "{} {id} cannot be evaluated as a value",
                kind.name()
            )),
        }
    }

    fn lower_anonymous_function(&mut self, id: OperationId, body: OperationId) -> Result<()> {
        if self.anonymous_function_info.contains_key(&id) {
            return Err(lowering_error!("anonymous function {id} lowered twice"));
        }
        let region = self.innermost_region()?;
        let ordinal = self.anonymous_functions.len();
        self.anonymous_functions.push(id);
        self.anonymous_function_info.insert(
            id,
            AnonymousFunctionInfo::new(
                region,
                ordinal,
                body,
                CaptureContext::new(self.captures_in_scope.clone()),
            ),
        );
        Ok(())
    }

    /// Pre-evaluates an operand that embeds control flow of its own; plain operands are
    /// left for the parent operation to reference in place.
    fn lower_operand(&mut self, id: OperationId) -> Result<()> {
        if self.has_embedded_flow(id)? {
            self.lower_expression(id)?;
        }
        Ok(())
    }

    /// Returns `true` when evaluating the subtree requires branching or recording: a
    /// short-circuiting operator, a ternary, or a lambda occurrence.
    fn has_embedded_flow(&self, id: OperationId) -> Result<bool> {
        let operation = self.operation(id)?;
        match operation.kind() {
            OperationKind::Binary { operator, .. } if operator.is_short_circuit() => Ok(true),
            OperationKind::Conditional { .. } | OperationKind::AnonymousFunction { .. } => {
                Ok(true)
            }
            kind => {
                let mut found = false;
                let mut failure = None;
                kind.for_each_child(&mut |child| {
                    if found || failure.is_some() {
                        return;
                    }
                    match self.has_embedded_flow(child) {
                        Ok(embedded) => found = embedded,
                        Err(error) => failure = Some(error),
                    }
                });
                match failure {
                    Some(error) => Err(error),
                    None => Ok(found),
                }
            }
        }
    }

    // ------------------------------------------------------------------- finalization

    fn finish(mut self, original: OperationId) -> Result<ControlFlowGraph> {
        let exit_ordinal = self.start_block(BasicBlockKind::Exit)?;
        self.labels[self.exit_label.0] = Some(exit_ordinal);
        self.current = None;

        let root = self
            .region_stack
            .pop()
            .ok_or_else(|| lowering_error!("root region already closed"))?;
        if root != RegionId::new(0) || !self.region_stack.is_empty() {
            return Err(lowering_error!("unclosed regions at end of lowering"));
        }
        self.regions[0].last_block = Some(exit_ordinal);

        let mut regions = Vec::with_capacity(self.regions.len());
        for in_progress in std::mem::take(&mut self.regions) {
            let first = in_progress
                .first_block
                .ok_or_else(|| lowering_error!("region closed without blocks"))?;
            let last = in_progress
                .last_block
                .ok_or_else(|| lowering_error!("region was never closed"))?;
            regions.push(ControlFlowRegion::new(
                in_progress.kind,
                first,
                last,
                in_progress.parent,
                in_progress.children,
                in_progress.locals,
                in_progress.local_functions,
                in_progress.captures,
                in_progress.exception_type,
            ));
        }

        let in_progress = std::mem::take(&mut self.blocks);
        let total = in_progress.len();
        let mut blocks = Vec::with_capacity(total);
        for (ordinal, block) in in_progress.into_iter().enumerate() {
            let BlockInProgress {
                kind,
                region,
                operations,
                terminator,
            } = block;
            let branches =
                self.resolve_terminator(ordinal, kind, &terminator, exit_ordinal, total)?;
            let mut block = BasicBlock::new(ordinal, kind, region);
            for operation in operations {
                block.push_operation(operation);
            }
            block.set_branches(branches);
            blocks.push(block);
        }

        Self::mark_reachability(&mut blocks, &regions);

        ControlFlowGraph::from_parts(GraphParts {
            tree: Arc::clone(self.tree),
            original_operation: original,
            blocks,
            regions,
            local_functions: self.local_functions,
            local_function_info: self.local_function_info,
            anonymous_functions: self.anonymous_functions,
            anonymous_function_info: self.anonymous_function_info,
            captures: self.dispenser,
        })
    }

    fn resolve_terminator(
        &self,
        ordinal: usize,
        kind: BasicBlockKind,
        terminator: &Terminator,
        exit: usize,
        total: usize,
    ) -> Result<Vec<ControlFlowBranch>> {
        Ok(match terminator {
            Terminator::None => {
                if kind == BasicBlockKind::Exit {
                    Vec::new()
                } else {
                    let next = ordinal + 1;
                    if next >= total {
                        return Err(lowering_error!(
                            "block {ordinal} falls through past the exit"
                        ));
                    }
                    vec![ControlFlowBranch::regular(ordinal, next)]
                }
            }
            Terminator::Goto(label) => vec![ControlFlowBranch::regular(
                ordinal,
                self.resolve_label(*label)?,
            )],
            Terminator::Branch {
                condition,
                when_true,
                when_false,
            } => vec![
                ControlFlowBranch::conditional(
                    ordinal,
                    self.resolve_label(*when_true)?,
                    true,
                    *condition,
                ),
                ControlFlowBranch::conditional(
                    ordinal,
                    self.resolve_label(*when_false)?,
                    false,
                    *condition,
                ),
            ],
            Terminator::Return { value } => {
                vec![ControlFlowBranch::returning(ordinal, exit, *value)]
            }
            Terminator::Throw { exception } => {
                vec![ControlFlowBranch::throwing(ordinal, *exception)]
            }
            Terminator::Rethrow => vec![ControlFlowBranch::rethrowing(ordinal)],
            Terminator::ExceptionExit => vec![ControlFlowBranch::exception_exit(ordinal)],
            Terminator::FilterDispatch { condition, handler } => vec![
                ControlFlowBranch::conditional(
                    ordinal,
                    self.resolve_label(*handler)?,
                    true,
                    *condition,
                ),
                ControlFlowBranch::exception_exit(ordinal),
            ],
        })
    }

    /// Marks every block reachable from the entry, treating a handler region as entered
    /// whenever its protected region contains a reachable block.
    fn mark_reachability(blocks: &mut [BasicBlock], regions: &[ControlFlowRegion]) {
        let mut reachable = vec![false; blocks.len()];
        {
            let blocks: &[BasicBlock] = blocks;
            Self::flood(blocks, &mut reachable, 0);
            loop {
                let mut changed = false;
                for region in regions {
                    if !region.kind().is_protected_grouping() {
                        continue;
                    }
                    let Some((&protected, handlers)) = region.children().split_first() else {
                        continue;
                    };
                    let span = &regions[protected.index()];
                    let entered = (span.first_block()..=span.last_block())
                        .any(|ordinal| reachable[ordinal]);
                    if !entered {
                        continue;
                    }
                    for &handler in handlers {
                        let entry = regions[handler.index()].first_block();
                        if !reachable[entry] {
                            changed = true;
                            Self::flood(blocks, &mut reachable, entry);
                        }
                    }
                }
                if !changed {
                    break;
                }
            }
        }
        for (ordinal, block) in blocks.iter_mut().enumerate() {
            if reachable[ordinal] {
                block.mark_reachable();
            }
        }
    }

    fn flood(blocks: &[BasicBlock], reachable: &mut [bool], start: usize) {
        let mut worklist = vec![start];
        while let Some(ordinal) = worklist.pop() {
            if reachable[ordinal] {
                continue;
            }
            reachable[ordinal] = true;
            for successor in blocks[ordinal].successors() {
                if !reachable[successor] {
                    worklist.push(successor);
                }
            }
        }
    }
}
