// This module implements the program generator, the last step of compilation. It walks the
// operator nodes of the finished graph in the deterministic topological order the graph
// provides and emits one Instruction per operator: the operator descriptor, the bound
// kernel, the execution context chosen by the runtime-context pass and, for contracted
// accelerator subgraphs, the shared device program. An operator without a bound kernel
// means the pipeline did not complete and generation fails instead of emitting a partial
// program. The RuntimeProgram also carries the caller's execution scope handle and the
// memory plan, and can report the external input/output order and a kernel summary (the
// distinct operator types and kernel strings the program needs, which is what a deployment
// tool uses to strip unused kernels from a build).

//! Linearization of the optimized graph into a runtime program.

use crate::core::{CompileError, CompileResult, Scope};
use crate::kernel::KernelDesc;
use crate::mir::{DeviceProgram, KernelContext, MemoryPlan, NodeId, SsaGraph};
use crate::program::{FeedFetch, OpDesc};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// One scheduled operator.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub node: NodeId,
    pub op: OpDesc,
    pub kernel: KernelDesc,
    pub context: Option<KernelContext>,
    pub device_program: Option<Arc<DeviceProgram>>,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.op, self.kernel)?;
        if let Some(context) = &self.context {
            write!(f, " on {}", context)?;
        }
        if let Some(program) = &self.device_program {
            write!(f, " => {}", program.name)?;
        }
        Ok(())
    }
}

/// Distinct operator types and kernels a runtime program uses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelSummary {
    pub op_types: BTreeSet<String>,
    /// `op,target,precision,layout,alias` strings.
    pub kernels: BTreeSet<String>,
}

/// The executable result of compilation.
#[derive(Debug, Clone)]
pub struct RuntimeProgram {
    instructions: Vec<Instruction>,
    exec_scope: Arc<Scope>,
    memory_plan: Option<MemoryPlan>,
}

impl RuntimeProgram {
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn exec_scope(&self) -> &Arc<Scope> {
        &self.exec_scope
    }

    pub fn memory_plan(&self) -> Option<&MemoryPlan> {
        self.memory_plan.as_ref()
    }

    /// External inputs and outputs ordered by their `col` attribute.
    pub fn feed_fetch(&self) -> CompileResult<FeedFetch> {
        FeedFetch::from_ops(self.instructions.iter().map(|inst| &inst.op))
    }

    pub fn kernel_summary(&self) -> KernelSummary {
        let mut summary = KernelSummary::default();
        for inst in &self.instructions {
            summary.op_types.insert(inst.op.op_type().to_string());
            summary.kernels.insert(inst.kernel.summary());
        }
        summary
    }
}

impl fmt::Display for RuntimeProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "RuntimeProgram ({} instructions)", self.instructions.len())?;
        for (i, inst) in self.instructions.iter().enumerate() {
            writeln!(f, "  {:3}: {}", i, inst)?;
        }
        Ok(())
    }
}

/// Emit the runtime program for a fully optimized graph.
pub fn generate_program(graph: &SsaGraph, exec_scope: Arc<Scope>) -> CompileResult<RuntimeProgram> {
    let order = graph.stmt_topological_order()?;
    let mut instructions = Vec::with_capacity(order.len());
    for id in order {
        let stmt = graph.stmt(id)?;
        let kernel = stmt.kernel.clone().ok_or_else(|| CompileError::UnpickedKernel {
            op_type: stmt.op_type().to_string(),
        })?;
        instructions.push(Instruction {
            node: id,
            op: stmt.op.clone(),
            kernel,
            context: stmt.context,
            device_program: stmt.device_program.clone(),
        });
    }
    log::debug!("Generated runtime program with {} instructions", instructions.len());

    Ok(RuntimeProgram {
        instructions,
        exec_scope,
        memory_plan: graph.memory_plan().cloned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Place;
    use crate::program::{Attribute, ProgramDesc, VarDesc};

    fn place(s: &str) -> Place {
        s.parse().unwrap()
    }

    fn graph() -> SsaGraph {
        let mut program = ProgramDesc::new();
        for v in ["feed", "fetch", "x", "y"] {
            program.add_var(VarDesc::new(v));
        }
        program
            .add_op(
                OpDesc::new("feed")
                    .with_input("X", ["feed"])
                    .with_output("Out", ["x"])
                    .with_attr("col", Attribute::Int(0)),
            )
            .add_op(OpDesc::new("relu").with_input("X", ["x"]).with_output("Out", ["y"]))
            .add_op(
                OpDesc::new("fetch")
                    .with_input("X", ["y"])
                    .with_output("Out", ["fetch"])
                    .with_attr("col", Attribute::Int(0)),
            );
        SsaGraph::build(&program, &[place("arm/float/NCHW")]).unwrap()
    }

    fn bind_all(graph: &mut SsaGraph) {
        for id in graph.stmt_ids() {
            let stmt = graph.stmt_mut(id).unwrap();
            let target = if stmt.op_type() == "relu" { "arm" } else { "host" };
            stmt.kernel = Some(KernelDesc::new(
                stmt.op_type(),
                place(&format!("{}/any/any", target)),
                "def",
            ));
        }
    }

    #[test]
    fn test_generate_in_dataflow_order() {
        let mut g = graph();
        bind_all(&mut g);
        let program = generate_program(&g, Scope::new()).unwrap();

        let ops: Vec<_> = program.instructions().iter().map(|i| i.op.op_type()).collect();
        assert_eq!(ops, ["feed", "relu", "fetch"]);
        let io = program.feed_fetch().unwrap();
        assert_eq!(io.inputs, ["x"]);
        assert_eq!(io.outputs, ["y"]);

        let summary = program.kernel_summary();
        assert_eq!(summary.op_types.len(), 3);
        assert!(summary.kernels.contains("relu,arm,any,any,def"));
    }

    #[test]
    fn test_unpicked_kernel_rejected() {
        let g = graph();
        assert!(matches!(
            generate_program(&g, Scope::new()),
            Err(CompileError::UnpickedKernel { .. })
        ));
    }
}
