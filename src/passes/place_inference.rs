//! Variable place inference.
//!
//! Propagates the picked kernels' declared placements onto argument nodes
//! that have none yet: an argument takes its producer's declared output
//! placement, or when it has no bound producer, the declared input placement
//! of its first bound consumer. Placements already set are kept, so running
//! the pass again after cast insertion only fills the new gaps.

use super::{Pass, PassContext, VARIABLE_PLACE_INFERENCE_PASS};
use crate::core::{CompileResult, Place};
use crate::mir::{NodeId, SsaGraph};

pub struct VariablePlaceInferencePass;

impl Pass for VariablePlaceInferencePass {
    fn name(&self) -> &'static str {
        VARIABLE_PLACE_INFERENCE_PASS
    }

    fn apply(&self, graph: &mut SsaGraph, _cx: &mut PassContext<'_>) -> CompileResult<()> {
        for arg in graph.arg_ids() {
            if graph.arg(arg)?.place.is_some() {
                continue;
            }
            let Some(place) = inferred_place(graph, arg)? else {
                continue;
            };
            let node = graph.arg_mut(arg)?;
            log::debug!("   {} <- {}", node.name, place);
            node.place = Some(place);
        }
        Ok(())
    }
}

fn inferred_place(graph: &SsaGraph, arg: NodeId) -> CompileResult<Option<Place>> {
    if let Some(producer) = graph.producer(arg) {
        if let Some(kernel) = &graph.stmt(producer)?.kernel {
            return Ok(Some(kernel.output_place()));
        }
    }
    for &consumer in graph.consumers(arg) {
        if let Some(kernel) = &graph.stmt(consumer)?.kernel {
            return Ok(Some(kernel.input_place()));
        }
    }
    Ok(None)
}
