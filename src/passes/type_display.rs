//! Argument type display: a pure observer that logs every argument's placement.

use super::{Pass, PassContext, ARGUMENT_TYPE_DISPLAY_PASS};
use crate::core::CompileResult;
use crate::mir::SsaGraph;

pub struct ArgumentTypeDisplayPass;

impl Pass for ArgumentTypeDisplayPass {
    fn name(&self) -> &'static str {
        ARGUMENT_TYPE_DISPLAY_PASS
    }

    fn apply(&self, graph: &mut SsaGraph, _cx: &mut PassContext<'_>) -> CompileResult<()> {
        if !log::log_enabled!(log::Level::Debug) {
            return Ok(());
        }
        let graph: &SsaGraph = graph;
        log::debug!("--- argument types ---");
        for (_, node) in graph.nodes() {
            if let Some(arg) = node.arg() {
                match arg.place {
                    Some(place) => log::debug!("   {}: {}", arg.name, place),
                    None => log::debug!("   {}: <unset>", arg.name),
                }
            }
        }
        Ok(())
    }
}
