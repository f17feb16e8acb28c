//! Memory reuse optimization.
//!
//! Computes the live range of every plannable argument over the operator
//! schedule and greedily assigns storage slots, letting an argument reuse
//! the slot of an earlier argument with the same placement whose last use
//! lies strictly before its production. Arguments that must outlive one run
//! or are owned outside the runtime program are never planned:
//!
//! - persistable arguments (weights);
//! - graph inputs (no producer) and graph outputs (no consumer);
//! - arguments produced or consumed by `feed`/`fetch`;
//! - results of the `*_once` conversions, which are computed a single time.
//!
//! Arguments without a placement are skipped too.

use super::{Pass, PassContext, MEMORY_OPTIMIZE_PASS};
use crate::core::{CompileResult, Place};
use crate::mir::{Lifetime, MemoryPlan, NodeId, SsaGraph};
use crate::program::feed_fetch::{FEED_OP, FETCH_OP};
use hashbrown::HashMap;

pub struct MemoryOptimizePass;

impl Pass for MemoryOptimizePass {
    fn name(&self) -> &'static str {
        MEMORY_OPTIMIZE_PASS
    }

    fn apply(&self, graph: &mut SsaGraph, cx: &mut PassContext<'_>) -> CompileResult<()> {
        let plan = plan_memory(graph)?;
        log::info!(
            "   {} arguments in {} slots, {} reused",
            plan.arg_to_slot.len(),
            plan.num_slots,
            plan.reuse_count
        );
        cx.session.record_slots_reused(plan.reuse_count);
        graph.set_memory_plan(plan);
        Ok(())
    }
}

/// Compute a storage plan for the current graph.
pub fn plan_memory(graph: &SsaGraph) -> CompileResult<MemoryPlan> {
    let order = graph.stmt_topological_order()?;
    let position: HashMap<NodeId, usize> = order.iter().enumerate().map(|(i, id)| (*id, i)).collect();

    let mut lifetimes = Vec::new();
    let mut places = HashMap::new();
    for arg in graph.arg_ids() {
        let Some(place) = plannable(graph, arg)? else {
            continue;
        };
        let (Some(producer), consumers) = (graph.producer(arg), graph.consumers(arg)) else {
            continue;
        };
        let produced_at = position.get(&producer).copied().unwrap_or(0);
        let last_used_at = consumers
            .iter()
            .filter_map(|c| position.get(c).copied())
            .max()
            .unwrap_or(produced_at);
        lifetimes.push(Lifetime {
            arg,
            produced_at,
            last_used_at,
        });
        places.insert(arg, place);
    }
    lifetimes.sort_by_key(|lt| (lt.produced_at, lt.arg));

    let mut plan = MemoryPlan::default();
    // (placement, schedule index of the occupant's last use)
    let mut slots: Vec<(Place, usize)> = Vec::new();
    for lt in &lifetimes {
        let place = places[&lt.arg];
        let free = slots
            .iter()
            .position(|(p, busy_until)| *p == place && *busy_until < lt.produced_at);
        let slot = match free {
            Some(slot) => {
                plan.reuse_count += 1;
                slots[slot].1 = lt.last_used_at;
                slot
            }
            None => {
                slots.push((place, lt.last_used_at));
                slots.len() - 1
            }
        };
        log::trace!("   {} -> slot {}", graph.arg(lt.arg)?.name, slot);
        plan.arg_to_slot.insert(lt.arg, slot);
    }
    plan.num_slots = slots.len();
    plan.lifetimes = lifetimes;
    Ok(plan)
}

fn plannable(graph: &SsaGraph, arg: NodeId) -> CompileResult<Option<Place>> {
    let node = graph.arg(arg)?;
    let Some(place) = node.place else {
        return Ok(None);
    };
    if node.persistable || graph.consumers(arg).is_empty() {
        return Ok(None);
    }
    let Some(producer) = graph.producer(arg) else {
        return Ok(None);
    };
    let producer_type = graph.stmt(producer)?.op_type();
    if producer_type == FEED_OP || producer_type.ends_with("_once") {
        return Ok(None);
    }
    for &consumer in graph.consumers(arg) {
        if graph.stmt(consumer)?.op_type() == FETCH_OP {
            return Ok(None);
        }
    }
    Ok(Some(place))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{Attribute, OpDesc, ProgramDesc, VarDesc};

    /// feed -> x -> relu -> a -> relu -> b -> relu -> c -> fetch
    fn graph() -> SsaGraph {
        let mut program = ProgramDesc::new();
        for v in ["feed", "fetch", "x", "a", "b", "c"] {
            program.add_var(VarDesc::new(v));
        }
        program
            .add_op(
                OpDesc::new("feed")
                    .with_input("X", ["feed"])
                    .with_output("Out", ["x"])
                    .with_attr("col", Attribute::Int(0)),
            )
            .add_op(OpDesc::new("relu").with_input("X", ["x"]).with_output("Out", ["a"]))
            .add_op(OpDesc::new("relu").with_input("X", ["a"]).with_output("Out", ["b"]))
            .add_op(OpDesc::new("relu").with_input("X", ["b"]).with_output("Out", ["c"]))
            .add_op(
                OpDesc::new("fetch")
                    .with_input("X", ["c"])
                    .with_output("Out", ["fetch"])
                    .with_attr("col", Attribute::Int(0)),
            );
        let places: Vec<Place> = vec!["arm/float/NCHW".parse().unwrap()];
        let mut graph = SsaGraph::build(&program, &places).unwrap();
        for arg in graph.arg_ids() {
            graph.arg_mut(arg).unwrap().place = Some(places[0]);
        }
        graph
    }

    #[test]
    fn test_slots_reused_along_chain() {
        let graph = graph();
        let plan = plan_memory(&graph).unwrap();

        let a = graph.arg_id("a").unwrap();
        let b = graph.arg_id("b").unwrap();
        // x feeds, c is fetched: only a and b are planned.
        assert_eq!(plan.arg_to_slot.len(), 2);
        assert!(plan.slot_of(graph.arg_id("x").unwrap()).is_none());
        assert!(plan.slot_of(graph.arg_id("c").unwrap()).is_none());
        // b is produced while a is still read, so they cannot share.
        assert_ne!(plan.slot_of(a), plan.slot_of(b));
        assert_eq!(plan.reuse_count, 0);
    }

    #[test]
    fn test_disjoint_lifetimes_share_slot() {
        let mut program = ProgramDesc::new();
        for v in ["x", "a", "b", "c", "d"] {
            program.add_var(VarDesc::new(v));
        }
        program
            .add_op(OpDesc::new("relu").with_input("X", ["x"]).with_output("Out", ["a"]))
            .add_op(OpDesc::new("relu").with_input("X", ["a"]).with_output("Out", ["b"]))
            .add_op(OpDesc::new("relu").with_input("X", ["b"]).with_output("Out", ["c"]))
            .add_op(OpDesc::new("relu").with_input("X", ["c"]).with_output("Out", ["d"]));
        let places: Vec<Place> = vec!["arm/float/NCHW".parse().unwrap()];
        let mut graph = SsaGraph::build(&program, &places).unwrap();
        for arg in graph.arg_ids() {
            graph.arg_mut(arg).unwrap().place = Some(places[0]);
        }

        let plan = plan_memory(&graph).unwrap();
        let a = graph.arg_id("a").unwrap();
        let c = graph.arg_id("c").unwrap();
        // a dies at schedule index 1, c is produced at index 2.
        assert_eq!(plan.slot_of(a), plan.slot_of(c));
        assert_eq!(plan.reuse_count, 1);
        assert_eq!(plan.num_slots, 2);
    }
}
