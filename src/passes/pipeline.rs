//! Ordered pass pipeline.
//!
//! Pass names are resolved against the registry once, when the pipeline is
//! built; the pipeline itself is then plain data. Names missing from the
//! registry stay in the pipeline as skipped steps so the trace shows them.
//! Before a pass runs, two applicability checks must hold:
//!
//! - one of its bound targets is among the valid-place targets (or it is
//!   bound to `any`);
//! - it has no kernel affinity, or one of its bound operator types has a
//!   registered kernel for an active target.
//!
//! Failing either check skips the pass with a diagnostic; it is not an error.

use super::{Pass, PassContext, PassRegistry};
use crate::core::{CompileResult, SkipReason, TargetType};
use crate::kernel::KernelRegistry;
use crate::mir::SsaGraph;

enum Step<'r> {
    Run(&'r dyn Pass),
    Missing(String),
}

/// Resolved sequence of passes.
pub struct Pipeline<'r> {
    steps: Vec<Step<'r>>,
}

impl<'r> Pipeline<'r> {
    pub fn resolve<S: AsRef<str>>(registry: &'r PassRegistry, names: &[S]) -> Self {
        let steps = names
            .iter()
            .map(|name| match registry.look_up(name.as_ref()) {
                Some(pass) => Step::Run(pass),
                None => Step::Missing(name.as_ref().to_string()),
            })
            .collect();
        Self { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step in order. The first failing pass aborts the run.
    pub fn run(&self, graph: &mut SsaGraph, cx: &mut PassContext<'_>) -> CompileResult<()> {
        for step in &self.steps {
            let pass = match step {
                Step::Missing(name) => {
                    log::info!("== Running pass: {}", name);
                    log::info!("   - Skip {} because {}.", name, SkipReason::NotFound);
                    cx.session.record_skipped(name, SkipReason::NotFound);
                    continue;
                }
                Step::Run(pass) => *pass,
            };

            let name = pass.name();
            log::info!("== Running pass: {}", name);
            if let Some(reason) = applicability(pass, graph, cx.kernels) {
                log::info!("   - Skip {} because {}.", name, reason);
                cx.session.record_skipped(name, reason);
                continue;
            }

            pass.apply(graph, cx)?;
            cx.session.record_applied(name);
            log::info!("== Finished running: {}", name);
        }
        Ok(())
    }
}

/// Why `pass` cannot apply to `graph`, if it cannot.
pub fn applicability(pass: &dyn Pass, graph: &SsaGraph, kernels: &KernelRegistry) -> Option<SkipReason> {
    let targets = graph.valid_targets();

    let bound = pass.bound_targets();
    let target_matched = bound.contains(&TargetType::Any)
        || targets
            .iter()
            .any(|t| *t == TargetType::Any || bound.contains(t));
    if !target_matched {
        return Some(SkipReason::TargetMismatch);
    }

    let bound_kernels = pass.bound_kernels();
    let kernel_matched = bound_kernels.is_empty()
        || bound_kernels
            .iter()
            .any(|op_type| kernels.has_kernel_for(op_type, &targets));
    if !kernel_matched {
        return Some(SkipReason::KernelMismatch);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CompileSession, Place};
    use crate::kernel::{KernelDesc, KernelPickFactor};
    use crate::program::{OpDesc, ProgramDesc, VarDesc};

    struct Bound {
        targets: &'static [TargetType],
        kernels: &'static [&'static str],
    }

    impl Pass for Bound {
        fn name(&self) -> &'static str {
            "bound_test_pass"
        }

        fn bound_targets(&self) -> &[TargetType] {
            self.targets
        }

        fn bound_kernels(&self) -> &[&'static str] {
            self.kernels
        }

        fn apply(&self, _graph: &mut SsaGraph, _cx: &mut PassContext<'_>) -> CompileResult<()> {
            Ok(())
        }
    }

    fn graph() -> SsaGraph {
        let mut program = ProgramDesc::new();
        program
            .add_var(VarDesc::new("x"))
            .add_var(VarDesc::new("y"))
            .add_op(OpDesc::new("relu").with_input("X", ["x"]).with_output("Out", ["y"]));
        let places: Vec<Place> = vec!["arm/float/NCHW".parse().unwrap()];
        SsaGraph::build(&program, &places).unwrap()
    }

    #[test]
    fn test_target_mismatch() {
        let pass = Bound {
            targets: &[TargetType::Cuda],
            kernels: &[],
        };
        let kernels = KernelRegistry::new();
        assert_eq!(
            applicability(&pass, &graph(), &kernels),
            Some(SkipReason::TargetMismatch)
        );
    }

    #[test]
    fn test_kernel_affinity() {
        let pass = Bound {
            targets: &[TargetType::Arm],
            kernels: &["fusion_elementwise_add_activation"],
        };
        let mut kernels = KernelRegistry::new();
        assert_eq!(
            applicability(&pass, &graph(), &kernels),
            Some(SkipReason::KernelMismatch)
        );

        kernels.register(KernelDesc::new(
            "fusion_elementwise_add_activation",
            "arm/float/NCHW".parse().unwrap(),
            "def",
        ));
        assert_eq!(applicability(&pass, &graph(), &kernels), None);
    }

    #[test]
    fn test_missing_pass_is_skipped() {
        let registry = PassRegistry::new();
        let kernels = KernelRegistry::new();
        let mut session = CompileSession::new();
        let mut g = graph();

        let pipeline = Pipeline::resolve(&registry, &["no_such_pass"]);
        let mut cx = PassContext::new(&kernels, KernelPickFactor::default(), &mut session);
        pipeline.run(&mut g, &mut cx).unwrap();

        assert_eq!(session.trace().len(), 1);
        assert_eq!(
            session.trace()[0].to_string(),
            "no_such_pass: skipped because the pass isn't found"
        );
    }
}
