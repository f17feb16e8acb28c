//! Identity scale elimination.
//!
//! A `scale` with factor 1 and bias 0 copies its input. When that input is
//! an intermediate result read by nothing else, the producing operator can
//! write the scale's output directly and the scale disappears.

use super::{Pass, PassContext, IDENTITY_SCALE_ELIMINATE_PASS};
use crate::core::CompileResult;
use crate::mir::{NodeId, SsaGraph};
use crate::program::feed_fetch::FEED_OP;
use crate::program::{Attribute, OpDesc};

pub struct IdentityScaleEliminatePass;

impl Pass for IdentityScaleEliminatePass {
    fn name(&self) -> &'static str {
        IDENTITY_SCALE_ELIMINATE_PASS
    }

    fn apply(&self, graph: &mut SsaGraph, cx: &mut PassContext<'_>) -> CompileResult<()> {
        for id in graph.stmt_ids() {
            if !graph.contains(id) {
                continue;
            }
            let Some((producer, op)) = elimination(graph, id)? else {
                continue;
            };
            if !graph.can_replace_subgraph(&[producer, id], &op) {
                continue;
            }
            log::debug!("   removing identity scale {}", id);
            graph.replace_subgraph(&[producer, id], op)?;
            cx.session.record_fused(self.name(), 1);
        }
        Ok(())
    }
}

/// The producer of an identity scale's input and its rewritten descriptor.
fn elimination(graph: &SsaGraph, id: NodeId) -> CompileResult<Option<(NodeId, OpDesc)>> {
    let scale = &graph.stmt(id)?.op;
    if scale.op_type() != "scale" || !is_identity(scale) {
        return Ok(None);
    }
    let ([input], [output]) = (scale.input("X"), scale.output("Out")) else {
        return Ok(None);
    };
    let Some(x) = graph.arg_id(input) else {
        return Ok(None);
    };
    if graph.arg(x)?.persistable || graph.consumers(x) != [id] {
        return Ok(None);
    }
    let Some(producer) = graph.producer(x) else {
        return Ok(None);
    };
    let producer_op = &graph.stmt(producer)?.op;
    if producer_op.op_type() == FEED_OP {
        return Ok(None);
    }

    let mut op = producer_op.clone();
    op.rename_output(input, output);
    Ok(Some((producer, op)))
}

fn is_identity(scale: &OpDesc) -> bool {
    let factor = scale.attr("scale").and_then(Attribute::as_float).unwrap_or(1.0);
    let bias = scale.attr("bias").and_then(Attribute::as_float).unwrap_or(0.0);
    factor == 1.0 && bias == 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CompileSession, Place};
    use crate::kernel::{KernelPickFactor, KernelRegistry};
    use crate::program::{ProgramDesc, VarDesc};

    fn program(factor: f64) -> ProgramDesc {
        let mut program = ProgramDesc::new();
        for v in ["x", "y", "z"] {
            program.add_var(VarDesc::new(v));
        }
        program
            .add_op(OpDesc::new("relu").with_input("X", ["x"]).with_output("Out", ["y"]))
            .add_op(
                OpDesc::new("scale")
                    .with_input("X", ["y"])
                    .with_output("Out", ["z"])
                    .with_attr("scale", Attribute::Float(factor))
                    .with_attr("bias", Attribute::Float(0.0)),
            );
        program
    }

    fn run(program: &ProgramDesc) -> SsaGraph {
        let places: Vec<Place> = vec!["arm/float/NCHW".parse().unwrap()];
        let mut graph = SsaGraph::build(program, &places).unwrap();
        let kernels = KernelRegistry::new();
        let mut session = CompileSession::new();
        let mut cx = PassContext::new(&kernels, KernelPickFactor::default(), &mut session);
        IdentityScaleEliminatePass.apply(&mut graph, &mut cx).unwrap();
        graph
    }

    #[test]
    fn test_identity_scale_removed() {
        let graph = run(&program(1.0));
        assert_eq!(graph.num_stmts(), 1);
        let relu = graph.stmt_ids()[0];
        assert_eq!(graph.stmt(relu).unwrap().op.output("Out"), ["z".to_string()]);
        assert!(graph.arg_id("y").is_none());
        graph.check_links().unwrap();
    }

    #[test]
    fn test_real_scale_kept() {
        let graph = run(&program(0.5));
        assert_eq!(graph.num_stmts(), 2);
    }
}
