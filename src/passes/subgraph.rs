// This module implements accelerator offload. A SubgraphProgramPass owns a backend
// (SubgraphBuilder) that declares which operator types its accelerator supports and turns
// a list of operators into an opaque device program. The pass walks the operators in
// schedule order and cuts the schedule into maximal runs of supported operators. A run that
// is contiguous in a topological order cannot be re-entered from outside, so contracting it
// into a single node never creates a cycle. Each run is handed to the backend under a fresh
// process-unique model name; on success the run is replaced by one `graph_op` operator
// bound to the device program, on failure the backend's error is logged and the original
// operators stay in place so the host kernels still execute them. The device program reads
// and writes host tensors, so the `graph_op` kernel declares host input and output
// placements. These passes are shape dependent; the optimizer defers them to program
// generation. When the graph already carries a memory plan, it is recomputed after any
// contraction since arguments disappeared.

//! Accelerator subgraph offload passes.

use super::memory_optimize::plan_memory;
use super::runtime_context::context_for;
use super::{Pass, PassContext, GENERATE_NPU_PROGRAM_PASS, GENERATE_XPU_PROGRAM_PASS};
use crate::core::{unique_name, CompileResult, DataLayoutType, Place, PrecisionType, TargetType};
use crate::kernel::KernelDesc;
use crate::mir::{DeviceProgram, NodeId, SsaGraph};
use crate::program::feed_fetch::{FEED_OP, FETCH_OP};
use crate::program::{Attribute, OpDesc};
use hashbrown::HashSet;
use std::sync::Arc;

/// Operator type of a contracted subgraph.
pub const GRAPH_OP: &str = "graph_op";

/// An accelerator backend.
pub trait SubgraphBuilder: Send + Sync {
    fn supports(&self, op_type: &str) -> bool;

    /// Compile `ops` into a device program reading `inputs` and writing `outputs`.
    fn build(
        &self,
        name: &str,
        ops: &[OpDesc],
        inputs: &[String],
        outputs: &[String],
    ) -> CompileResult<DeviceProgram>;
}

pub struct SubgraphProgramPass {
    name: &'static str,
    target: TargetType,
    builder: Box<dyn SubgraphBuilder>,
}

impl SubgraphProgramPass {
    pub fn new(name: &'static str, target: TargetType, builder: Box<dyn SubgraphBuilder>) -> Self {
        Self {
            name,
            target,
            builder,
        }
    }

    pub fn npu(builder: Box<dyn SubgraphBuilder>) -> Self {
        Self::new(GENERATE_NPU_PROGRAM_PASS, TargetType::Npu, builder)
    }

    pub fn xpu(builder: Box<dyn SubgraphBuilder>) -> Self {
        Self::new(GENERATE_XPU_PROGRAM_PASS, TargetType::Xpu, builder)
    }

    pub fn target(&self) -> TargetType {
        self.target
    }

    fn offloadable(&self, op_type: &str) -> bool {
        op_type != FEED_OP && op_type != FETCH_OP && op_type != GRAPH_OP && self.builder.supports(op_type)
    }

    /// Maximal runs of supported operators in schedule order.
    fn runs(&self, graph: &SsaGraph) -> CompileResult<Vec<Vec<NodeId>>> {
        let mut runs = Vec::new();
        let mut current = Vec::new();
        for id in graph.stmt_topological_order()? {
            if self.offloadable(graph.stmt(id)?.op_type()) {
                current.push(id);
            } else if !current.is_empty() {
                runs.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            runs.push(current);
        }
        Ok(runs)
    }

    /// Try to contract one run; returns whether it was offloaded.
    fn offload(&self, graph: &mut SsaGraph, run: &[NodeId]) -> CompileResult<bool> {
        let (inputs, outputs) = boundary(graph, run)?;
        let ops = run
            .iter()
            .map(|&id| graph.stmt(id).map(|s| s.op.clone()))
            .collect::<CompileResult<Vec<_>>>()?;

        let model_name = unique_name(&format!("{}_subgraph", self.target));
        let program = match self.builder.build(&model_name, &ops, &inputs, &outputs) {
            Ok(program) => program,
            Err(err) => {
                log::warn!(
                    "   {}: failed to build {} ({}), keeping {} operators on their kernels",
                    self.name,
                    model_name,
                    err,
                    ops.len()
                );
                return Ok(false);
            }
        };

        let op = OpDesc::new(GRAPH_OP)
            .with_input("Inputs", inputs)
            .with_output("Outputs", outputs)
            .with_attr("model_name", Attribute::Str(model_name.clone()));
        if !graph.can_replace_subgraph(run, &op) {
            log::warn!("   {}: {} cannot be contracted, skipped", self.name, model_name);
            return Ok(false);
        }

        let id = graph.replace_subgraph(run, op)?;
        let kernel = KernelDesc::new(
            GRAPH_OP,
            Place::new(self.target, PrecisionType::Any, DataLayoutType::Any),
            "def",
        )
        .with_io(Place::host_any(), Place::host_any());
        let stmt = graph.stmt_mut(id)?;
        stmt.context = Some(context_for(&kernel));
        stmt.kernel = Some(kernel);
        stmt.device_program = Some(Arc::new(program));
        log::info!("   {} replaces {} operators with {}", self.name, run.len(), model_name);
        Ok(true)
    }
}

/// Arguments read from and written to the outside of `run`, in first-use order.
fn boundary(graph: &SsaGraph, run: &[NodeId]) -> CompileResult<(Vec<String>, Vec<String>)> {
    let members: HashSet<NodeId> = run.iter().copied().collect();
    let mut inputs = Vec::new();
    let mut outputs = Vec::new();
    for &id in run {
        let node = graph.node(id)?;
        for &arg in node.inlinks() {
            let name = &graph.arg(arg)?.name;
            let internal = graph.producer(arg).is_some_and(|p| members.contains(&p));
            if !internal && !inputs.contains(name) {
                inputs.push(name.clone());
            }
        }
        for &arg in node.outlinks() {
            if graph.consumers(arg).iter().any(|c| !members.contains(c)) {
                outputs.push(graph.arg(arg)?.name.clone());
            }
        }
    }
    Ok((inputs, outputs))
}

impl Pass for SubgraphProgramPass {
    fn name(&self) -> &'static str {
        self.name
    }

    fn bound_targets(&self) -> &[TargetType] {
        std::slice::from_ref(&self.target)
    }

    fn apply(&self, graph: &mut SsaGraph, cx: &mut PassContext<'_>) -> CompileResult<()> {
        let mut offloaded = 0;
        for run in self.runs(graph)? {
            if self.offload(graph, &run)? {
                cx.session.record_subgraph_offloaded();
                offloaded += 1;
            }
        }
        if offloaded > 0 && graph.memory_plan().is_some() {
            let plan = plan_memory(graph)?;
            graph.set_memory_plan(plan);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CompileError, CompileSession};
    use crate::kernel::{KernelPickFactor, KernelRegistry};
    use crate::program::{ProgramDesc, VarDesc};

    struct FakeNpu {
        fail: bool,
    }

    impl SubgraphBuilder for FakeNpu {
        fn supports(&self, op_type: &str) -> bool {
            matches!(op_type, "conv2d" | "relu")
        }

        fn build(
            &self,
            name: &str,
            ops: &[OpDesc],
            inputs: &[String],
            outputs: &[String],
        ) -> CompileResult<DeviceProgram> {
            if self.fail {
                return Err(CompileError::SubgraphBuild {
                    target: "npu".into(),
                    reason: "unsupported attribute".into(),
                });
            }
            Ok(DeviceProgram {
                name: name.to_string(),
                target: TargetType::Npu,
                inputs: inputs.to_vec(),
                outputs: outputs.to_vec(),
                blob: vec![ops.len() as u8],
            })
        }
    }

    /// x -> conv2d -> a -> relu -> b -> softmax -> c
    fn graph() -> SsaGraph {
        let mut program = ProgramDesc::new();
        program.add_var(VarDesc::persistable("w"));
        for v in ["x", "a", "b", "c"] {
            program.add_var(VarDesc::new(v));
        }
        program
            .add_op(
                OpDesc::new("conv2d")
                    .with_input("Input", ["x"])
                    .with_input("Filter", ["w"])
                    .with_output("Output", ["a"]),
            )
            .add_op(OpDesc::new("relu").with_input("X", ["a"]).with_output("Out", ["b"]))
            .add_op(OpDesc::new("softmax").with_input("X", ["b"]).with_output("Out", ["c"]));
        let places: Vec<Place> = vec!["npu/float/NCHW".parse().unwrap(), "arm/float/NCHW".parse().unwrap()];
        SsaGraph::build(&program, &places).unwrap()
    }

    fn run(fail: bool, graph: &mut SsaGraph) -> CompileSession {
        let kernels = KernelRegistry::new();
        let mut session = CompileSession::new();
        let mut cx = PassContext::new(&kernels, KernelPickFactor::default(), &mut session);
        SubgraphProgramPass::npu(Box::new(FakeNpu { fail }))
            .apply(graph, &mut cx)
            .unwrap();
        session
    }

    #[test]
    fn test_supported_run_offloaded() {
        let mut g = graph();
        let session = run(false, &mut g);
        assert_eq!(session.stats().subgraphs_offloaded, 1);
        assert_eq!(g.num_stmts(), 2);
        assert!(g.arg_id("a").is_none());

        let b = g.arg_id("b").unwrap();
        let fused = g.producer(b).unwrap();
        let stmt = g.stmt(fused).unwrap();
        assert_eq!(stmt.op_type(), GRAPH_OP);
        let program = stmt.device_program.as_ref().unwrap();
        assert_eq!(program.inputs, vec!["w".to_string(), "x".to_string()]);
        assert_eq!(program.outputs, vec!["b".to_string()]);
        assert_eq!(program.blob, vec![2]);
        assert_eq!(stmt.kernel.as_ref().unwrap().target(), TargetType::Npu);
        g.check_links().unwrap();
    }

    #[test]
    fn test_build_failure_keeps_operators() {
        let mut g = graph();
        let session = run(true, &mut g);
        assert_eq!(session.stats().subgraphs_offloaded, 0);
        assert_eq!(g.num_stmts(), 3);
        assert!(g.arg_id("a").is_some());
    }
}
