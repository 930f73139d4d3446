//! Common subexpression elimination.

use hashbrown::HashMap;

use crate::core::{CompilationSession, CompileResult};
use crate::graph::{Computation, Graph, Node, NodeId, OpKind};
use crate::pass::Pass;

/// Merges nodes computing the same operation on the same operands.
///
/// Parameters and custom calls are never merged. When layout sensitive, shapes
/// must also agree on their layouts.
#[derive(Debug, Default, Clone, Copy)]
pub struct Cse {
    layout_sensitive: bool,
}

#[derive(Debug, PartialEq, Eq, Hash)]
struct Key {
    op: String,
    operands: Vec<NodeId>,
    shape: String,
}

fn is_commutative(kind: &OpKind) -> bool {
    matches!(kind, OpKind::Add | OpKind::Multiply | OpKind::Maximum | OpKind::Minimum)
}

impl Cse {
    pub fn new(layout_sensitive: bool) -> Self {
        Self { layout_sensitive }
    }

    fn key(&self, node: &Node) -> Option<Key> {
        if matches!(node.kind, OpKind::Parameter { .. } | OpKind::CustomCall { .. }) {
            return None;
        }
        let mut operands = node.operands.clone();
        if is_commutative(&node.kind) {
            operands.sort();
        }
        let shape = if self.layout_sensitive {
            format!("{:?}", node.shape)
        } else {
            format!("{:?}", node.shape.without_layout())
        };
        Some(Key {
            op: format!("{:?}", node.kind),
            operands,
            shape,
        })
    }

    fn eliminate(&self, computation: &mut Computation) -> bool {
        let mut seen: HashMap<Key, NodeId> = HashMap::new();
        let mut changed = false;
        for id in computation.post_order() {
            let Some(key) = computation.node(id).and_then(|node| self.key(node)) else {
                continue;
            };
            match seen.get(&key) {
                Some(&existing) => {
                    log::trace!("cse: '{}' duplicates '{}'", computation[id].name, computation[existing].name);
                    computation.replace_node(id, existing);
                    changed = true;
                }
                None => {
                    seen.insert(key, id);
                }
            }
        }
        changed
    }
}

impl Pass for Cse {
    fn name(&self) -> &str {
        "cse"
    }

    fn is_idempotent(&self) -> bool {
        true
    }

    fn run(&self, graph: &mut Graph, _session: &CompilationSession) -> CompileResult<bool> {
        let mut changed = false;
        for computation in graph.computations_mut() {
            changed |= self.eliminate(computation);
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passes::testing::{count_op, run_once};

    #[test]
    fn test_duplicate_nodes_merge() {
        let (graph, changed) = run_once(
            &Cse::new(false),
            "graph g entry {\n\
               %x = f32[4] parameter(0)\n\
               %y = f32[4] parameter(1)\n\
               %a = f32[4] add(%x, %y)\n\
               %b = f32[4] add(%y, %x)\n\
               ROOT %m = f32[4] multiply(%a, %b)\n\
             }",
        );
        assert!(changed);
        assert_eq!(count_op(&graph, "add"), 1);
        let root = graph.entry().root_node().unwrap();
        assert_eq!(root.operands[0], root.operands[1]);
    }

    #[test]
    fn test_non_commutative_operand_order_matters() {
        let (_, changed) = run_once(
            &Cse::new(false),
            "graph g entry {\n\
               %x = f32[4] parameter(0)\n\
               %y = f32[4] parameter(1)\n\
               %a = f32[4] subtract(%x, %y)\n\
               %b = f32[4] subtract(%y, %x)\n\
               ROOT %m = f32[4] multiply(%a, %b)\n\
             }",
        );
        assert!(!changed);
    }

    #[test]
    fn test_custom_calls_are_kept_apart() {
        let (graph, changed) = run_once(
            &Cse::new(false),
            "graph g entry {\n\
               %x = f32[4] parameter(0)\n\
               %a = f32[4] custom-call(%x), target=\"rng\"\n\
               %b = f32[4] custom-call(%x), target=\"rng\"\n\
               ROOT %m = f32[4] add(%a, %b)\n\
             }",
        );
        assert!(!changed);
        assert_eq!(count_op(&graph, "custom-call"), 2);
    }

    #[test]
    fn test_layouts_matter_when_sensitive() {
        let text = "graph g entry {\n\
               %x = f32[2,3]{1,0} parameter(0)\n\
               %a = f32[2,3]{1,0} copy(%x)\n\
               %b = f32[2,3]{0,1} copy(%x)\n\
               ROOT %t = (f32[2,3]{1,0}, f32[2,3]{0,1}) tuple(%a, %b)\n\
             }";
        let (_, changed) = run_once(&Cse::new(true), text);
        assert!(!changed);
        let (_, changed) = run_once(&Cse::new(false), text);
        assert!(changed);
    }
}
