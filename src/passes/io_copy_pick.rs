//! io_copy kernel pick.
//!
//! Copies are bound when the target cast stage inserts them, against the
//! placements known at that moment. Once placement inference has run again
//! the neighbours may be more precise; this pass re-selects every copy's
//! kernel so its declared input and output targets match the argument it
//! reads and the operator consuming its result. The copy's output argument
//! takes the placement the chosen kernel produces.

use super::type_cast::converts;
use super::{Pass, PassContext, IO_COPY_KERNEL_PICK_PASS};
use crate::core::{CastKind, CompileError, CompileResult, Place};
use crate::mir::{NodeId, SsaGraph};

pub struct IoCopyKernelPickPass;

const IO_COPY_OPS: &[&str] = &["io_copy", "io_copy_once"];

impl Pass for IoCopyKernelPickPass {
    fn name(&self) -> &'static str {
        IO_COPY_KERNEL_PICK_PASS
    }

    fn bound_kernels(&self) -> &[&'static str] {
        IO_COPY_OPS
    }

    fn apply(&self, graph: &mut SsaGraph, cx: &mut PassContext<'_>) -> CompileResult<()> {
        for id in graph.stmt_ids() {
            let stmt = graph.stmt(id)?;
            if !IO_COPY_OPS.iter().any(|op| *op == stmt.op_type()) {
                continue;
            }
            let op_type = stmt.op_type().to_string();
            let (Some(from), Some(to)) = (input_place(graph, id)?, wanted_place(graph, id)?) else {
                continue;
            };

            let kernel = cx
                .kernels
                .kernels(&op_type)
                .iter()
                .find(|k| converts(CastKind::Target, k, &from, &to))
                .ok_or_else(|| CompileError::NoCastKernel {
                    op_type: op_type.clone(),
                    from: from.to_string(),
                    to: to.to_string(),
                })?;

            let stmt = graph.stmt_mut(id)?;
            if stmt.kernel.as_ref() != Some(kernel) {
                log::debug!("   {} {} -> {}", op_type, id, kernel);
                stmt.kernel = Some(kernel.clone());
                cx.session.record_kernel_picked();
            }

            let produced = kernel.output_place().refine(&from);
            if let Some(&out) = graph.node(id)?.outlinks().first() {
                let arg = graph.arg_mut(out)?;
                if arg.place != Some(produced) {
                    log::debug!("   {} placed {}", arg.name, produced);
                    arg.place = Some(produced);
                }
            }
        }
        Ok(())
    }
}

fn input_place(graph: &SsaGraph, stmt: NodeId) -> CompileResult<Option<Place>> {
    match graph.node(stmt)?.inlinks().first() {
        Some(&arg) => Ok(graph.arg(arg)?.place),
        None => Ok(None),
    }
}

/// Placement wanted downstream: the first consumer's declared input, else the output argument's.
fn wanted_place(graph: &SsaGraph, stmt: NodeId) -> CompileResult<Option<Place>> {
    let Some(&out) = graph.node(stmt)?.outlinks().first() else {
        return Ok(None);
    };
    for &consumer in graph.consumers(out) {
        if let Some(kernel) = &graph.stmt(consumer)?.kernel {
            return Ok(Some(kernel.input_place()));
        }
    }
    Ok(graph.arg(out)?.place)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CompileSession;
    use crate::kernel::{KernelDesc, KernelPickFactor, KernelRegistry};
    use crate::program::{OpDesc, ProgramDesc, VarDesc};

    fn place(s: &str) -> Place {
        s.parse().unwrap()
    }

    fn kernels() -> KernelRegistry {
        let mut kernels = KernelRegistry::new();
        kernels
            .register(
                KernelDesc::new("io_copy", place("cuda/any/any"), "host_to_device")
                    .with_io(place("host/any/any"), place("cuda/any/any")),
            )
            .register(
                KernelDesc::new("io_copy", place("host/any/any"), "device_to_host")
                    .with_io(place("cuda/any/any"), place("host/any/any")),
            );
        kernels
    }

    /// x (host) -> io_copy -> y -> relu (cuda), with the copy bound the wrong way round.
    fn stale_copy() -> SsaGraph {
        let mut program = ProgramDesc::new();
        program
            .add_var(VarDesc::new("x"))
            .add_var(VarDesc::new("y"))
            .add_var(VarDesc::new("z"))
            .add_op(OpDesc::new("io_copy").with_input("Input", ["x"]).with_output("Out", ["y"]))
            .add_op(OpDesc::new("relu").with_input("X", ["y"]).with_output("Out", ["z"]));
        let places = vec![place("cuda/float/NCHW"), place("host/float/NCHW")];
        let mut graph = SsaGraph::build(&program, &places).unwrap();
        for id in graph.stmt_ids() {
            let kernel = match graph.stmt(id).unwrap().op_type() {
                "io_copy" => KernelDesc::new("io_copy", place("host/any/any"), "device_to_host")
                    .with_io(place("cuda/any/any"), place("host/any/any")),
                _ => KernelDesc::new("relu", place("cuda/float/NCHW"), "def"),
            };
            graph.stmt_mut(id).unwrap().kernel = Some(kernel);
        }
        for (name, at) in [("x", "host/float/NCHW"), ("y", "host/float/NCHW"), ("z", "cuda/float/NCHW")] {
            let id = graph.arg_id(name).unwrap();
            graph.arg_mut(id).unwrap().place = Some(place(at));
        }
        graph
    }

    #[test]
    fn test_repick_refreshes_output_place() {
        let kernels = kernels();
        let mut session = CompileSession::new();
        let mut g = stale_copy();
        let mut cx = PassContext::new(&kernels, KernelPickFactor::default(), &mut session);
        IoCopyKernelPickPass.apply(&mut g, &mut cx).unwrap();

        let y = g.arg_id("y").unwrap();
        let copy = g.producer(y).unwrap();
        assert_eq!(g.stmt(copy).unwrap().kernel.as_ref().unwrap().alias(), "host_to_device");
        assert_eq!(g.arg(y).unwrap().place, Some(place("cuda/float/NCHW")));
        assert!(g.placement_mismatches().is_empty());
        assert_eq!(session.stats().kernels_picked, 1);
    }

    #[test]
    fn test_repick_without_kernel_is_fatal() {
        let kernels = KernelRegistry::new();
        let mut session = CompileSession::new();
        let mut g = stale_copy();
        let mut cx = PassContext::new(&kernels, KernelPickFactor::default(), &mut session);
        assert!(matches!(
            IoCopyKernelPickPass.apply(&mut g, &mut cx),
            Err(CompileError::NoCastKernel { .. })
        ));
    }
}
