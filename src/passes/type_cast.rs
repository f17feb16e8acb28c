// This module implements the three cast-insertion passes. One TypeCastPass instance exists
// per stage: the target stage splices io_copy (host/device copy) operators, the precision
// stage splices calib operators and the layout stage splices layout operators. The pass
// scans every argument with a known placement and every consumer with a picked kernel;
// where the argument and the consumer's declared input disagree on the stage's field, it
// looks up a conversion kernel whose declared input accepts the argument and whose declared
// output satisfies the consumer, splices a new operator and a fresh argument into that edge,
// binds the kernel and sets the new argument's placement to the kernel output refined with
// the source placement. Persistable arguments (weights) prefer the `_once` variant of the
// cast operator, which converts a single time instead of on every run. Consumers of one
// argument that need the same conversion share one cast node. A missing conversion kernel
// is fatal. Because new arguments are created compatible with their consumers, running a
// stage again on a stabilized graph inserts nothing.

//! Target, precision and layout cast insertion.

use super::{
    Pass, PassContext, TYPE_LAYOUT_CAST_PASS, TYPE_PRECISION_CAST_PASS, TYPE_TARGET_CAST_PASS,
};
use crate::core::{target_compatible, CastKind, CompileError, CompileResult, Place};
use crate::kernel::{KernelDesc, KernelRegistry};
use crate::mir::{stage_compatible, NodeId, SsaGraph};
use crate::program::OpDesc;
use hashbrown::HashMap;

pub struct TypeCastPass {
    stage: CastKind,
}

impl TypeCastPass {
    pub fn new(stage: CastKind) -> Self {
        Self { stage }
    }

    pub fn stage(&self) -> CastKind {
        self.stage
    }

    /// Operator type inserted by this stage.
    pub fn cast_op(&self) -> &'static str {
        match self.stage {
            CastKind::Target => "io_copy",
            CastKind::Precision => "calib",
            CastKind::Layout => "layout",
        }
    }

    fn find_cast_kernel<'k>(
        &self,
        kernels: &'k KernelRegistry,
        from: &Place,
        to: &Place,
        persistable: bool,
    ) -> CompileResult<&'k KernelDesc> {
        let base = self.cast_op();
        let once = format!("{}_once", base);
        let op_types = if persistable {
            vec![once.as_str(), base]
        } else {
            vec![base]
        };

        op_types
            .iter()
            .find_map(|op_type| {
                kernels
                    .kernels(op_type)
                    .iter()
                    .find(|k| converts(self.stage, k, from, to))
            })
            .ok_or_else(|| CompileError::NoCastKernel {
                op_type: base.to_string(),
                from: from.to_string(),
                to: to.to_string(),
            })
    }

    fn insert_cast(
        &self,
        graph: &mut SsaGraph,
        arg: NodeId,
        consumer: NodeId,
        kernel: &KernelDesc,
        out_place: Place,
    ) -> CompileResult<NodeId> {
        let arg_name = graph.arg(arg)?.name.clone();
        let new_name = graph.fresh_arg_name(&format!("{}/{}_trans", arg_name, self.stage));
        let op = OpDesc::new(kernel.op_type())
            .with_input("Input", [arg_name.as_str()])
            .with_output("Out", [new_name.as_str()]);

        let (stmt, new_arg) = graph.insert_stmt_on_edge(arg, consumer, op, &new_name)?;
        graph.stmt_mut(stmt)?.kernel = Some(kernel.clone());
        graph.arg_mut(new_arg)?.place = Some(out_place);
        log::debug!("   inserted {} for {} -> {} ({})", kernel.op_type(), arg_name, new_name, kernel);
        Ok(new_arg)
    }
}

/// Whether `kernel` converts `from` into something `to` accepts for `stage`.
pub(crate) fn converts(stage: CastKind, kernel: &KernelDesc, from: &Place, to: &Place) -> bool {
    let input = kernel.input_place();
    let output = kernel.output_place();
    if !stage_compatible(stage, &input, from) || !stage_compatible(stage, &output, to) {
        return false;
    }
    match stage {
        CastKind::Target => true,
        // Precision and layout conversions run where the data already is.
        CastKind::Precision | CastKind::Layout => {
            target_compatible(input.target, from.target) && target_compatible(output.target, to.target)
        }
    }
}

impl Pass for TypeCastPass {
    fn name(&self) -> &'static str {
        match self.stage {
            CastKind::Target => TYPE_TARGET_CAST_PASS,
            CastKind::Precision => TYPE_PRECISION_CAST_PASS,
            CastKind::Layout => TYPE_LAYOUT_CAST_PASS,
        }
    }

    fn apply(&self, graph: &mut SsaGraph, cx: &mut PassContext<'_>) -> CompileResult<()> {
        let mut inserted: HashMap<(NodeId, Place), NodeId> = HashMap::new();

        for arg in graph.arg_ids() {
            let node = graph.arg(arg)?;
            let Some(from) = node.place else {
                continue;
            };
            let persistable = node.persistable;

            for consumer in graph.consumers(arg).to_vec() {
                let Some(needed) = graph.stmt(consumer)?.kernel.as_ref().map(KernelDesc::input_place) else {
                    continue;
                };
                if stage_compatible(self.stage, &from, &needed) {
                    continue;
                }

                let kernel = self.find_cast_kernel(cx.kernels, &from, &needed, persistable)?;
                let out_place = kernel.output_place().refine(&from);
                if let Some(&shared) = inserted.get(&(arg, out_place)) {
                    graph.redirect_consumer(arg, shared, consumer)?;
                    continue;
                }

                let new_arg = self.insert_cast(graph, arg, consumer, kernel, out_place)?;
                inserted.insert((arg, out_place), new_arg);
                cx.session.record_cast_inserted(self.stage);
            }
        }
        Ok(())
    }
}
