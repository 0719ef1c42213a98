//! Concurrency integration tests.
//!
//! These tests verify the thread-safety contracts of the nested-graph caches and the
//! shared capture dispenser:
//! 1. Concurrent requests for one nested graph all observe one instance
//! 2. Capture ids stay unique across a whole graph family, even with racing builds
//! 3. Cancelled builds publish nothing and leave the cache usable

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use flowscope::operation::OperationTreeBuilder;
use flowscope::prelude::*;

/// Assembles a unit declaring `count` local functions whose bodies each contain a
/// ternary, so every nested build consumes capture ids from the shared dispenser.
fn unit_with_local_functions(
    count: usize,
) -> Result<(Arc<OperationTree>, OperationId, Vec<FunctionId>)> {
    let mut builder = OperationTreeBuilder::new();
    let mut functions = Vec::new();
    let mut statements = Vec::new();
    for index in 0..count {
        let function = builder.function(format!("Helper{index}"));
        let flag = builder.local(format!("flag{index}"));
        let a = builder.local(format!("a{index}"));
        let b = builder.local(format!("b{index}"));
        let condition = builder.local_reference(flag);
        let when_true = builder.local_reference(a);
        let when_false = builder.local_reference(b);
        let ternary = builder.conditional(condition, when_true, Some(when_false));
        let ret = builder.ret(Some(ternary));
        let function_body = builder.block(vec![ret], vec![flag, a, b]);
        statements.push(builder.local_function(function, function_body));
        functions.push(function);
    }
    let ret = builder.ret(None);
    statements.push(ret);
    let body = builder.block(statements, vec![]);
    let tree = builder.finish(body)?;
    Ok((tree, body, functions))
}

/// Collects the capture ids one graph uses. A single graph may write a capture from
/// several blocks (both arms of a ternary store into one id), so ids are deduplicated
/// per graph; uniqueness is a cross-graph property.
fn graph_captures(graph: &ControlFlowGraph) -> HashSet<CaptureId> {
    let mut captures = HashSet::new();
    for block in graph.blocks() {
        for operation in block.operations() {
            if let FlowOperation::Capture { id, .. } = operation {
                captures.insert(*id);
            }
        }
    }
    for region in graph.regions() {
        captures.extend(region.captures().iter().copied());
    }
    captures
}

#[test]
fn test_concurrent_requests_observe_one_instance() -> Result<()> {
    const THREADS: usize = 8;

    let (tree, body, functions) = unit_with_local_functions(1)?;
    let graph = ControlFlowGraph::create(&tree, body)?.expect("lowering succeeded");
    let function = functions[0];

    let mut results = Vec::new();
    thread::scope(|scope| {
        let mut handles = Vec::new();
        for _ in 0..THREADS {
            let graph = &graph;
            handles.push(scope.spawn(move || graph.local_function_graph(function)));
        }
        for handle in handles {
            results.push(handle.join().expect("worker panicked"));
        }
    });

    let mut graphs = Vec::new();
    for result in results {
        graphs.push(result?);
    }
    assert_eq!(graphs.len(), THREADS);
    for other in &graphs[1..] {
        assert!(Arc::ptr_eq(&graphs[0], other));
    }
    assert_eq!(graphs[0].original_operation(), graph.local_function_info(function).unwrap().body());
    Ok(())
}

#[test]
fn test_capture_ids_unique_across_family() -> Result<()> {
    let (tree, body, functions) = unit_with_local_functions(6)?;
    let graph = ControlFlowGraph::create(&tree, body)?.expect("lowering succeeded");

    // Build all nested graphs from several threads at once; racing duplicates may
    // consume ids, but retained graphs must never share one.
    thread::scope(|scope| {
        for _ in 0..4 {
            let graph = &graph;
            let functions = &functions;
            scope.spawn(move || {
                for &function in functions {
                    let _ = graph.local_function_graph(function);
                }
            });
        }
    });

    let mut seen = HashSet::new();
    for capture in graph_captures(&graph) {
        assert!(seen.insert(capture), "capture id {capture} appears twice");
    }
    for &function in &functions {
        let nested = graph.local_function_graph(function)?;
        for capture in graph_captures(&nested) {
            assert!(
                seen.insert(capture),
                "capture id {capture} is shared between graphs of one family"
            );
        }
    }
    // Every nested body contains one ternary, so each retained graph owns one capture.
    assert!(seen.len() >= functions.len());
    Ok(())
}

#[test]
fn test_build_all_nested_graphs_prewarms_caches() -> Result<()> {
    let (tree, body, functions) = unit_with_local_functions(4)?;
    let graph = ControlFlowGraph::create(&tree, body)?.expect("lowering succeeded");

    graph.build_all_nested_graphs()?;

    // Accessors now return the cached instances.
    for &function in &functions {
        let first = graph.local_function_graph(function)?;
        let second = graph.local_function_graph(function)?;
        assert!(Arc::ptr_eq(&first, &second));
    }
    Ok(())
}

#[test]
fn test_cancelled_nested_build_publishes_nothing() -> Result<()> {
    let (tree, body, functions) = unit_with_local_functions(1)?;
    let graph = ControlFlowGraph::create(&tree, body)?.expect("lowering succeeded");
    let function = functions[0];

    let token = CancellationToken::new();
    token.cancel();
    assert!(matches!(
        graph.local_function_graph_with(function, &token),
        Err(Error::Cancelled)
    ));

    // The slot is still empty; a fresh request succeeds and is cached normally.
    let first = graph.local_function_graph(function)?;
    let second = graph.local_function_graph(function)?;
    assert!(Arc::ptr_eq(&first, &second));
    Ok(())
}

#[test]
fn test_lambda_graphs_share_the_family_dispenser() -> Result<()> {
    // let callback = flag ? a : b; callback = () => { return inner ? x : y; };
    let mut builder = OperationTreeBuilder::new();
    let callback = builder.local("callback");
    let flag = builder.local("flag");
    let a = builder.local("a");
    let b = builder.local("b");
    let inner = builder.local("inner");
    let x = builder.local("x");
    let y = builder.local("y");

    let condition = builder.local_reference(flag);
    let when_true = builder.local_reference(a);
    let when_false = builder.local_reference(b);
    let outer_ternary = builder.conditional(condition, when_true, Some(when_false));
    let declaration = builder.variable_declaration(callback, Some(outer_ternary));

    let inner_condition = builder.local_reference(inner);
    let inner_true = builder.local_reference(x);
    let inner_false = builder.local_reference(y);
    let inner_ternary = builder.conditional(inner_condition, inner_true, Some(inner_false));
    let lambda_ret = builder.ret(Some(inner_ternary));
    let lambda_body = builder.block(vec![lambda_ret], vec![]);
    let lambda = builder.anonymous_function(lambda_body);
    let target = builder.local_reference(callback);
    let assignment = builder.assignment(target, lambda);
    let assignment = builder.expression_statement(assignment);

    let body = builder.block(
        vec![declaration, assignment],
        vec![callback, flag, a, b, inner, x, y],
    );
    let tree = builder.finish(body)?;

    let graph = ControlFlowGraph::create(&tree, body)?.expect("lowering succeeded");
    let nested = graph.anonymous_function_graph(lambda)?;

    // The outer graph's capture and the lambda's capture come from one dispenser and
    // never collide; the lambda's recorded context knows the outer capture.
    let outer = graph_captures(&graph);
    let inner = graph_captures(&nested);
    assert!(!outer.is_empty());
    assert!(!inner.is_empty());
    assert!(outer.is_disjoint(&inner));

    let context = graph
        .anonymous_function_info(lambda)
        .expect("occurrence info")
        .context();
    assert!(!context.captures_in_scope().is_empty());
    Ok(())
}
