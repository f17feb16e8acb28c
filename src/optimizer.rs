// This module implements the Optimizer, the single entry point of the compiler. An
// Optimizer shares the process-wide pass and kernel registries (read-only, behind Arcs)
// and owns everything specific to one compilation: the SSA graph, the kernel pick
// factor, the execution scope handle and the CompileSession that records the pass trace.
// Its lifecycle is a one-way state machine: Unbuilt -> Built (graph constructed) ->
// PipelineRun (pass list applied) -> ProgramGenerated (runtime program emitted, may be
// repeated). Any error moves it to Failed and drops the graph, so a half-transformed graph
// is never observable. `run` resolves the caller's pass list (or the default pipeline)
// against the registry, refuses to start when the target cast pass is missing because no
// pipeline can produce a placement-consistent graph without it, and drives the passes in
// order. `gen_runtime_program` first applies the shape-dependent accelerator offload passes
// and then linearizes the graph.

//! The compilation orchestrator.

use crate::config::CompileOptions;
use crate::core::{CompileError, CompileResult, CompileSession, Place, Scope};
use crate::generator::{generate_program, RuntimeProgram};
use crate::kernel::{KernelPickFactor, KernelRegistry};
use crate::mir::SsaGraph;
use crate::passes::{
    PassContext, PassRegistry, Pipeline, DEFAULT_PASSES, SUBGRAPH_PASSES, TYPE_TARGET_CAST_PASS,
};
use crate::program::Program;
use std::fmt;
use std::sync::Arc;

/// Lifecycle of one [`Optimizer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerState {
    Unbuilt,
    Built,
    PipelineRun,
    ProgramGenerated,
    Failed,
}

impl fmt::Display for OptimizerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OptimizerState::Unbuilt => "unbuilt",
            OptimizerState::Built => "built",
            OptimizerState::PipelineRun => "pipeline run",
            OptimizerState::ProgramGenerated => "program generated",
            OptimizerState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Compiles one program.
pub struct Optimizer {
    passes: Arc<PassRegistry>,
    kernels: Arc<KernelRegistry>,
    state: OptimizerState,
    graph: Option<SsaGraph>,
    exec_scope: Option<Arc<Scope>>,
    pick_factor: KernelPickFactor,
    session: CompileSession,
}

impl Optimizer {
    pub fn new(passes: Arc<PassRegistry>, kernels: Arc<KernelRegistry>) -> Self {
        Self {
            passes,
            kernels,
            state: OptimizerState::Unbuilt,
            graph: None,
            exec_scope: None,
            pick_factor: KernelPickFactor::default(),
            session: CompileSession::new(),
        }
    }

    pub fn state(&self) -> OptimizerState {
        self.state
    }

    /// Build the graph and run `passes` (the default pipeline when empty).
    ///
    /// An instance compiles at most once; a second call fails with
    /// [`CompileError::AlreadyRun`].
    pub fn run<S: AsRef<str>>(
        &mut self,
        program: &Program,
        valid_places: &[Place],
        pick_factor: KernelPickFactor,
        passes: &[S],
    ) -> CompileResult<()> {
        if self.state != OptimizerState::Unbuilt {
            return Err(CompileError::AlreadyRun);
        }
        let names: Vec<&str> = if passes.is_empty() {
            DEFAULT_PASSES.to_vec()
        } else {
            passes.iter().map(AsRef::as_ref).collect()
        };

        let result = self.run_pipeline(program, valid_places, pick_factor, &names);
        self.settle(result, OptimizerState::PipelineRun)
    }

    pub fn run_with_options(&mut self, program: &Program, options: &CompileOptions) -> CompileResult<()> {
        self.run(program, &options.valid_places, options.pick_factor, &options.passes)
    }

    fn run_pipeline(
        &mut self,
        program: &Program,
        valid_places: &[Place],
        pick_factor: KernelPickFactor,
        names: &[&str],
    ) -> CompileResult<()> {
        if valid_places.is_empty() {
            return Err(CompileError::EmptyValidPlaces);
        }
        if let Some(place) = valid_places.iter().find(|p| !p.is_valid()) {
            return Err(CompileError::InvalidPlace {
                text: place.to_string(),
                reason: "valid places must not contain unknown fields".into(),
            });
        }
        self.passes.require(TYPE_TARGET_CAST_PASS)?;

        let mut graph = SsaGraph::build(program.desc(), valid_places)?;
        self.state = OptimizerState::Built;
        self.pick_factor = pick_factor;
        self.exec_scope = Some(program.exec_scope().clone());
        log::info!(
            "Optimizing {} operators for {} valid places",
            graph.num_stmts(),
            valid_places.len()
        );

        let pipeline = Pipeline::resolve(&self.passes, names);
        let mut cx = PassContext::new(&self.kernels, pick_factor, &mut self.session);
        pipeline.run(&mut graph, &mut cx)?;
        self.graph = Some(graph);
        Ok(())
    }

    /// Apply the accelerator offload passes and emit the runtime program.
    pub fn gen_runtime_program(&mut self) -> CompileResult<RuntimeProgram> {
        match self.state {
            OptimizerState::PipelineRun | OptimizerState::ProgramGenerated => {}
            state => {
                return Err(CompileError::InvalidState {
                    reason: format!("cannot generate a runtime program when the optimizer is {}", state),
                })
            }
        }
        let result = self.generate();
        let program = self.settle(result, OptimizerState::ProgramGenerated)?;
        log::info!("{}", self.session.stats());
        Ok(program)
    }

    fn generate(&mut self) -> CompileResult<RuntimeProgram> {
        let graph = self.graph.as_mut().ok_or_else(|| CompileError::InvalidState {
            reason: "no graph to generate from".into(),
        })?;
        let exec_scope = self.exec_scope.clone().ok_or_else(|| CompileError::InvalidState {
            reason: "no execution scope bound".into(),
        })?;

        let pipeline = Pipeline::resolve(&self.passes, SUBGRAPH_PASSES);
        let mut cx = PassContext::new(&self.kernels, self.pick_factor, &mut self.session);
        pipeline.run(graph, &mut cx)?;
        generate_program(graph, exec_scope)
    }

    fn settle<T>(&mut self, result: CompileResult<T>, next: OptimizerState) -> CompileResult<T> {
        match result {
            Ok(value) => {
                self.state = next;
                Ok(value)
            }
            Err(err) => {
                log::warn!("Compilation failed: {}", err);
                self.state = OptimizerState::Failed;
                self.graph = None;
                Err(err)
            }
        }
    }

    /// Execution scope of the compiled program, once `run` has started.
    pub fn exec_scope(&self) -> Option<&Arc<Scope>> {
        self.exec_scope.as_ref()
    }

    pub fn ssa_graph(&self) -> Option<&SsaGraph> {
        self.graph.as_ref()
    }

    pub fn session(&self) -> &CompileSession {
        &self.session
    }

    pub fn kernels(&self) -> &KernelRegistry {
        &self.kernels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{OpDesc, ProgramDesc, VarDesc};

    fn program() -> Program {
        let mut desc = ProgramDesc::new();
        desc.add_var(VarDesc::new("x"))
            .add_var(VarDesc::new("y"))
            .add_op(OpDesc::new("relu").with_input("X", ["x"]).with_output("Out", ["y"]));
        Program::new(desc, Scope::with_vars(["x", "y"]))
    }

    fn optimizer() -> Optimizer {
        let mut kernels = KernelRegistry::new();
        kernels.register(crate::kernel::KernelDesc::new(
            "relu",
            "arm/float/NCHW".parse().unwrap(),
            "def",
        ));
        Optimizer::new(
            Arc::new(PassRegistry::with_builtin_passes().unwrap()),
            Arc::new(kernels),
        )
    }

    fn places() -> Vec<Place> {
        vec!["arm/float/NCHW".parse().unwrap()]
    }

    #[test]
    fn test_run_then_generate() {
        let mut opt = optimizer();
        opt.run(&program(), &places(), KernelPickFactor::default(), &[] as &[&str])
            .unwrap();
        assert_eq!(opt.state(), OptimizerState::PipelineRun);
        assert!(opt.exec_scope().unwrap().contains("x"));

        let runtime = opt.gen_runtime_program().unwrap();
        assert_eq!(runtime.len(), 1);
        assert_eq!(opt.state(), OptimizerState::ProgramGenerated);
        // Generation may be repeated.
        assert!(opt.gen_runtime_program().is_ok());
    }

    #[test]
    fn test_second_run_is_fatal() {
        let mut opt = optimizer();
        opt.run(&program(), &places(), KernelPickFactor::default(), &[] as &[&str])
            .unwrap();
        assert_eq!(
            opt.run(&program(), &places(), KernelPickFactor::default(), &[] as &[&str]),
            Err(CompileError::AlreadyRun)
        );
    }

    #[test]
    fn test_generate_before_run() {
        let mut opt = optimizer();
        assert!(matches!(
            opt.gen_runtime_program(),
            Err(CompileError::InvalidState { .. })
        ));
        assert_eq!(opt.state(), OptimizerState::Unbuilt);
    }

    #[test]
    fn test_empty_places_fails_run() {
        let mut opt = optimizer();
        assert_eq!(
            opt.run(&program(), &[], KernelPickFactor::default(), &[] as &[&str]),
            Err(CompileError::EmptyValidPlaces)
        );
        assert_eq!(opt.state(), OptimizerState::Failed);
        assert!(opt.ssa_graph().is_none());
    }

    #[test]
    fn test_missing_target_cast_pass() {
        let mut opt = Optimizer::new(Arc::new(PassRegistry::new()), Arc::new(KernelRegistry::new()));
        assert!(matches!(
            opt.run(&program(), &places(), KernelPickFactor::default(), &[] as &[&str]),
            Err(CompileError::RequiredPassMissing { .. })
        ));
    }
}
