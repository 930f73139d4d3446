//! Inlines `call` nodes and drops computations nothing calls any more.

use std::collections::BTreeMap;

use hashbrown::{HashMap, HashSet};

use crate::core::{CompilationSession, CompileError, CompileResult};
use crate::graph::{Computation, Graph, NodeId, OpKind};
use crate::pass::Pass;

#[derive(Debug, Default, Clone, Copy)]
pub struct CallInliner;

impl CallInliner {
    pub fn new() -> Self {
        Self
    }
}

/// Copy `callee` into `caller` in place of the call node `call`.
fn inline_call(caller: &mut Computation, call: NodeId, callee: &Computation) -> CompileResult<()> {
    let arguments = caller[call].operands.clone();
    let mut mapped: HashMap<NodeId, NodeId> = HashMap::new();

    for id in callee.post_order() {
        let node = &callee[id];
        if let OpKind::Parameter { number } = node.kind {
            let argument = arguments.get(number as usize).copied().ok_or_else(|| {
                CompileError::pass_failed(
                    "call-inliner",
                    format!("call into '{}' lacks argument {}", callee.name(), number),
                )
            })?;
            mapped.insert(id, argument);
            continue;
        }
        let mut copy = node.clone();
        for operand in copy.operands.iter_mut() {
            *operand = mapped.get(&*operand).copied().ok_or_else(|| {
                CompileError::pass_failed(
                    "call-inliner",
                    format!("'{}' uses {} before defining it", callee.name(), operand),
                )
            })?;
        }
        mapped.insert(id, caller.add_node(copy));
    }

    let root = callee
        .root()
        .and_then(|root| mapped.get(&root).copied())
        .ok_or_else(|| CompileError::pass_failed("call-inliner", format!("'{}' has no root", callee.name())))?;
    caller.replace_node(call, root);
    Ok(())
}

fn referenced_computations(graph: &Graph) -> HashSet<String> {
    graph
        .all_nodes()
        .filter_map(|node| match &node.kind {
            OpKind::Call { target } => Some(target.clone()),
            _ => None,
        })
        .collect()
}

impl Pass for CallInliner {
    fn name(&self) -> &str {
        "call-inliner"
    }

    fn is_idempotent(&self) -> bool {
        true
    }

    fn run(&self, graph: &mut Graph, _session: &CompilationSession) -> CompileResult<bool> {
        let mut changed = false;
        // Each round inlines one level of nesting; recursion stops at the bound.
        let max_rounds = graph.subcomputations().count() + 1;

        for _ in 0..max_rounds {
            let callees: BTreeMap<String, Computation> = graph
                .subcomputations()
                .map(|c| (c.name().to_string(), c.clone()))
                .collect();
            let mut inlined = false;

            for computation in graph.computations_mut() {
                for id in computation.post_order() {
                    let OpKind::Call { target } = &computation[id].kind else {
                        continue;
                    };
                    let Some(callee) = callees.get(target) else {
                        continue;
                    };
                    log::trace!("call-inliner: inlining '{}' into '{}'", callee.name(), computation.name());
                    inline_call(computation, id, callee)?;
                    inlined = true;
                }
            }

            changed |= inlined;
            if !inlined {
                break;
            }
        }

        loop {
            let referenced = referenced_computations(graph);
            let unused: Vec<String> = graph
                .subcomputations()
                .map(|c| c.name().to_string())
                .filter(|name| !referenced.contains(name))
                .collect();
            if unused.is_empty() {
                break;
            }
            for name in unused {
                log::trace!("call-inliner: dropping computation '{}'", name);
                graph.remove_subcomputation(&name);
            }
            changed = true;
        }
        Ok(changed)
    }
}
