//! Static kernel pick: bind one kernel to every operator.

use super::{Pass, PassContext, STATIC_KERNEL_PICK_PASS};
use crate::core::CompileResult;
use crate::kernel::pick_kernel;
use crate::mir::SsaGraph;

/// Picks the best-scoring registered kernel for each operator node.
///
/// Operators that already carry a kernel (inserted casts, offloaded
/// subgraphs) keep it. An operator without any candidate is fatal.
pub struct StaticKernelPickPass;

impl Pass for StaticKernelPickPass {
    fn name(&self) -> &'static str {
        STATIC_KERNEL_PICK_PASS
    }

    fn apply(&self, graph: &mut SsaGraph, cx: &mut PassContext<'_>) -> CompileResult<()> {
        if !cx.pick_factor.any_factor_considered() {
            log::warn!("No kernel pick factor considered; the first candidate of every operator wins");
        }

        for id in graph.stmt_ids() {
            let stmt = graph.stmt(id)?;
            if stmt.kernel.is_some() {
                continue;
            }
            let kernel = pick_kernel(
                stmt.op_type(),
                cx.kernels.kernels(stmt.op_type()),
                &stmt.valid_places,
                cx.pick_factor,
            )?
            .clone();
            log::debug!("   {} -> {}", stmt.op_type(), kernel);

            graph.stmt_mut(id)?.kernel = Some(kernel);
            cx.session.record_kernel_picked();
        }
        Ok(())
    }
}
