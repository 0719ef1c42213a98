//! Construction API for operation trees.
//!
//! [`OperationTreeBuilder`] accumulates detached nodes and symbol side tables, then seals
//! them into an immutable [`OperationTree`]: sealing computes the parent link of every node
//! from the child links and rejects structurally inconsistent trees (a node claimed as a
//! child by two parents, or a dangling child reference).
//!
//! Front ends drive this builder when translating bound syntax; the test suites drive it to
//! assemble units directly.

use std::sync::Arc;

use crate::operation::node::{
    BinaryOperator, CasePattern, CatchClause, ConstValue, JumpKind, Operation, OperationKind,
    SwitchCase, UnaryOperator,
};
use crate::operation::symbol::{FunctionId, FunctionSymbol, Local, LocalId};
use crate::operation::tree::{OperationId, OperationTree, SemanticContext, TreeFlags};
use crate::{Error, Result};

/// Accumulates operations and symbols, then seals them into an [`OperationTree`].
///
/// New builders describe units with flow analysis enabled and a resolved semantic context;
/// the [`without_flow_analysis`](Self::without_flow_analysis) and
/// [`without_semantic_context`](Self::without_semantic_context) switches produce the
/// refused-unit configurations.
///
/// # Examples
///
/// ```rust
/// use flowscope::operation::{ConstValue, OperationTreeBuilder};
///
/// let mut builder = OperationTreeBuilder::new();
/// let condition = builder.literal(ConstValue::Bool(true));
/// let effect = builder.invocation("Log", vec![]);
/// let effect = builder.expression_statement(effect);
/// let then_block = builder.block(vec![effect], vec![]);
/// let conditional = builder.conditional(condition, then_block, None);
/// let body = builder.block(vec![conditional], vec![]);
///
/// let tree = builder.finish(body)?;
/// assert_eq!(tree.operation(body).unwrap().parent(), None);
/// # Ok::<(), flowscope::Error>(())
/// ```
#[derive(Debug)]
pub struct OperationTreeBuilder {
    operations: Vec<Operation>,
    locals: Vec<Local>,
    functions: Vec<FunctionSymbol>,
    flags: TreeFlags,
    semantic_context: Option<SemanticContext>,
}

impl Default for OperationTreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationTreeBuilder {
    /// Creates a builder for a unit with flow analysis enabled and a resolved semantic
    /// context.
    #[must_use]
    pub fn new() -> Self {
        Self {
            operations: Vec::new(),
            locals: Vec::new(),
            functions: Vec::new(),
            flags: TreeFlags::FLOW_ANALYSIS,
            semantic_context: Some(SemanticContext::new("<unit>")),
        }
    }

    /// Drops the semantic context, producing a tree that graph construction refuses with
    /// [`Error::MissingSemanticContext`](crate::Error::MissingSemanticContext).
    #[must_use]
    pub fn without_semantic_context(mut self) -> Self {
        self.semantic_context = None;
        self
    }

    /// Clears the flow-analysis switch, producing a tree that graph construction refuses
    /// with [`Error::FlowAnalysisDisabled`](crate::Error::FlowAnalysisDisabled).
    #[must_use]
    pub fn without_flow_analysis(mut self) -> Self {
        self.flags.remove(TreeFlags::FLOW_ANALYSIS);
        self
    }

    /// Names the semantic context after the given unit.
    #[must_use]
    pub fn with_unit_name(mut self, name: impl Into<String>) -> Self {
        self.semantic_context = Some(SemanticContext::new(name));
        self
    }

    /// Interns a local variable and returns its id.
    pub fn local(&mut self, name: impl Into<String>) -> LocalId {
        let id = LocalId::new(self.locals.len());
        self.locals.push(Local::new(name));
        id
    }

    /// Interns a local-function symbol and returns its id.
    pub fn function(&mut self, name: impl Into<String>) -> FunctionId {
        let id = FunctionId::new(self.functions.len());
        self.functions.push(FunctionSymbol::new(name));
        id
    }

    fn push(&mut self, kind: OperationKind) -> OperationId {
        let id = OperationId::new(self.operations.len());
        self.operations.push(Operation::new(kind));
        id
    }

    /// Adds a block of statements, with the locals scoped to it.
    pub fn block(&mut self, statements: Vec<OperationId>, locals: Vec<LocalId>) -> OperationId {
        self.push(OperationKind::Block { statements, locals })
    }

    /// Adds an expression statement.
    pub fn expression_statement(&mut self, expression: OperationId) -> OperationId {
        self.push(OperationKind::ExpressionStatement { expression })
    }

    /// Adds a local variable declaration.
    pub fn variable_declaration(
        &mut self,
        local: LocalId,
        initializer: Option<OperationId>,
    ) -> OperationId {
        self.push(OperationKind::VariableDeclaration { local, initializer })
    }

    /// Adds a constant.
    pub fn literal(&mut self, value: ConstValue) -> OperationId {
        self.push(OperationKind::Literal { value })
    }

    /// Adds a read of a local variable.
    pub fn local_reference(&mut self, local: LocalId) -> OperationId {
        self.push(OperationKind::LocalReference { local })
    }

    /// Adds an assignment expression.
    pub fn assignment(&mut self, target: OperationId, value: OperationId) -> OperationId {
        self.push(OperationKind::Assignment { target, value })
    }

    /// Adds a call to a named function or method.
    pub fn invocation(
        &mut self,
        callee: impl Into<String>,
        arguments: Vec<OperationId>,
    ) -> OperationId {
        self.push(OperationKind::Invocation {
            callee: callee.into(),
            arguments,
        })
    }

    /// Adds a unary operation.
    pub fn unary(&mut self, operator: UnaryOperator, operand: OperationId) -> OperationId {
        self.push(OperationKind::Unary { operator, operand })
    }

    /// Adds a binary operation.
    pub fn binary(
        &mut self,
        operator: BinaryOperator,
        left: OperationId,
        right: OperationId,
    ) -> OperationId {
        self.push(OperationKind::Binary {
            operator,
            left,
            right,
        })
    }

    /// Adds a conditional; pass `when_false` for ternary value positions or `else` arms.
    pub fn conditional(
        &mut self,
        condition: OperationId,
        when_true: OperationId,
        when_false: Option<OperationId>,
    ) -> OperationId {
        self.push(OperationKind::Conditional {
            condition,
            when_true,
            when_false,
        })
    }

    /// Adds a top-tested loop.
    pub fn while_loop(&mut self, condition: OperationId, body: OperationId) -> OperationId {
        self.push(OperationKind::While { condition, body })
    }

    /// Adds a bottom-tested loop.
    pub fn do_while_loop(&mut self, condition: OperationId, body: OperationId) -> OperationId {
        self.push(OperationKind::DoWhile { condition, body })
    }

    /// Adds a break or continue jump.
    pub fn jump(&mut self, kind: JumpKind) -> OperationId {
        self.push(OperationKind::Jump { kind })
    }

    /// Adds a return, optionally carrying a value.
    pub fn ret(&mut self, value: Option<OperationId>) -> OperationId {
        self.push(OperationKind::Return { value })
    }

    /// Adds a throw; pass `None` inside a catch handler to rethrow.
    pub fn throw(&mut self, exception: Option<OperationId>) -> OperationId {
        self.push(OperationKind::Throw { exception })
    }

    /// Adds a protected region with handler clauses and/or a finally body.
    pub fn try_statement(
        &mut self,
        body: OperationId,
        catches: Vec<CatchClause>,
        finally: Option<OperationId>,
    ) -> OperationId {
        self.push(OperationKind::Try {
            body,
            catches,
            finally,
        })
    }

    /// Adds a multi-way dispatch over a value.
    pub fn switch(&mut self, value: OperationId, cases: Vec<SwitchCase>) -> OperationId {
        self.push(OperationKind::Switch { value, cases })
    }

    /// Adds a switch arm testing the given pattern expression.
    pub fn case(
        &mut self,
        pattern: OperationId,
        guard: Option<OperationId>,
        body: OperationId,
    ) -> SwitchCase {
        SwitchCase {
            pattern: CasePattern::Value(pattern),
            guard,
            body,
        }
    }

    /// Adds the default switch arm.
    pub fn default_case(&mut self, body: OperationId) -> SwitchCase {
        SwitchCase {
            pattern: CasePattern::Default,
            guard: None,
            body,
        }
    }

    /// Adds a local function declaration.
    pub fn local_function(&mut self, function: FunctionId, body: OperationId) -> OperationId {
        self.push(OperationKind::LocalFunction { function, body })
    }

    /// Adds an anonymous function occurrence.
    pub fn anonymous_function(&mut self, body: OperationId) -> OperationId {
        self.push(OperationKind::AnonymousFunction { body })
    }

    /// Seals the builder into an immutable tree.
    ///
    /// Sealing computes every node's parent link from the child links and verifies the
    /// result is a forest: each node is claimed by at most one parent, every child
    /// reference resolves, and `root` itself stays parentless.
    ///
    /// # Arguments
    ///
    /// * `root` - The node intended as the unit root; validated to exist and be unclaimed
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedTree`] when a child reference dangles, a node is claimed
    /// by two parents, or `root` is claimed as a child.
    pub fn finish(self, root: OperationId) -> Result<Arc<OperationTree>> {
        let mut operations = self.operations;

        if root.index() >= operations.len() {
            return Err(Error::MalformedTree(format!(
                "root {root} was never allocated by this builder"
            )));
        }

        let mut parents: Vec<Option<OperationId>> = vec![None; operations.len()];
        for index in 0..operations.len() {
            let parent = OperationId::new(index);
            let mut error = None;
            operations[index].kind().for_each_child(&mut |child| {
                if error.is_some() {
                    return;
                }
                if child.index() >= parents.len() {
                    error = Some(Error::MalformedTree(format!(
                        "operation {parent} references missing child {child}"
                    )));
                } else if let Some(previous) = parents[child.index()] {
                    error = Some(Error::MalformedTree(format!(
                        "operation {child} is claimed as a child by both {previous} and {parent}"
                    )));
                } else {
                    parents[child.index()] = Some(parent);
                }
            });
            if let Some(error) = error {
                return Err(error);
            }
        }

        if let Some(parent) = parents[root.index()] {
            return Err(Error::MalformedTree(format!(
                "root {root} is claimed as a child of {parent}"
            )));
        }

        for (index, parent) in parents.into_iter().enumerate() {
            if let Some(parent) = parent {
                operations[index].set_parent(parent);
            }
        }

        Ok(Arc::new(OperationTree::new(
            operations,
            self.locals,
            self.functions,
            self.flags,
            self.semantic_context,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_computes_parent_links() {
        let mut builder = OperationTreeBuilder::new();
        let value = builder.literal(ConstValue::Int(1));
        let ret = builder.ret(Some(value));
        let body = builder.block(vec![ret], vec![]);

        let tree = builder.finish(body).unwrap();

        assert_eq!(tree.operation(body).unwrap().parent(), None);
        assert_eq!(tree.operation(ret).unwrap().parent(), Some(body));
        assert_eq!(tree.operation(value).unwrap().parent(), Some(ret));
    }

    #[test]
    fn test_finish_rejects_shared_child() {
        let mut builder = OperationTreeBuilder::new();
        let value = builder.literal(ConstValue::Int(1));
        // The same literal claimed by two statements.
        let first = builder.expression_statement(value);
        let second = builder.expression_statement(value);
        let body = builder.block(vec![first, second], vec![]);

        assert!(matches!(
            builder.finish(body),
            Err(Error::MalformedTree(_))
        ));
    }

    #[test]
    fn test_finish_rejects_unallocated_root() {
        let builder = OperationTreeBuilder::new();
        assert!(matches!(
            builder.finish(OperationId::new(5)),
            Err(Error::MalformedTree(_))
        ));
    }

    #[test]
    fn test_finish_rejects_root_claimed_as_child() {
        let mut builder = OperationTreeBuilder::new();
        let value = builder.literal(ConstValue::Int(1));
        let statement = builder.expression_statement(value);
        let _body = builder.block(vec![statement], vec![]);

        // The statement is a child of the block, so it cannot anchor the tree.
        assert!(matches!(
            builder.finish(statement),
            Err(Error::MalformedTree(_))
        ));
    }

    #[test]
    fn test_configuration_switches() {
        let builder = OperationTreeBuilder::new().without_semantic_context();
        let mut builder = builder;
        let ret = builder.ret(None);
        let tree = builder.finish(ret).unwrap();
        assert!(tree.semantic_context().is_none());

        let mut builder = OperationTreeBuilder::new().without_flow_analysis();
        let ret = builder.ret(None);
        let tree = builder.finish(ret).unwrap();
        assert!(!tree.flags().contains(TreeFlags::FLOW_ANALYSIS));
    }

    #[test]
    fn test_symbol_interning_is_positional() {
        let mut builder = OperationTreeBuilder::new();
        let first = builder.function("helper");
        let second = builder.function("helper");
        assert_ne!(first, second);

        let local = builder.local("x");
        let ret = builder.ret(None);
        let tree = builder.finish(ret).unwrap();
        assert_eq!(tree.function(first).unwrap().name, "helper");
        assert_eq!(tree.local(local).unwrap().name, "x");
    }
}
