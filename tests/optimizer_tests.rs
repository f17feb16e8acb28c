//! Optimizer lifecycle, runtime program generation and accelerator offload.

use infer_mir::config::{CompileOptions, PASSES_ENV, PLACES_ENV};
use infer_mir::core::{CompileResult, PassOutcome, SkipReason};
use infer_mir::kernel::KernelPickFactor;
use infer_mir::mir::DeviceProgram;
use infer_mir::passes::{PassRegistry, SubgraphBuilder, SubgraphProgramPass};
use infer_mir::program::{OpDesc, Program};
use infer_mir::text_program::{parse_program, TextProgram};
use infer_mir::{CompileError, Optimizer, OptimizerState, Scope, TargetType};
use std::sync::Arc;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Feeds are listed out of slot order on purpose.
const FEED_FETCH: &str = r#"
places arm/float/NCHW host/float/NCHW
var feed fetch a b c
op feed(X=feed) -> (Out=b) {col=1}
op feed(X=feed) -> (Out=a) {col=0}
op elementwise_add(X=a, Y=b) -> (Out=c)
op fetch(X=c) -> (Out=fetch) {col=0}

kernel feed host/any/any
kernel fetch host/any/any
kernel elementwise_add arm/float/NCHW
"#;

/// relu is offloadable, softmax is not.
const OFFLOAD: &str = r#"
places npu/float/NCHW arm/float/NCHW
var x a b
op relu(X=x) -> (Out=a)
op softmax(X=a) -> (Out=b) {axis=-1}
kernel relu arm/float/NCHW
kernel softmax arm/float/NCHW
"#;

/// scale writes its input in place; relu reads the updated value.
const IN_PLACE: &str = r#"
places arm/float/NCHW host/float/NCHW
var feed fetch a b
op feed(X=feed) -> (Out=a) {col=0}
op scale(X=a) -> (Out=a) {scale=2.0}
op relu(X=a) -> (Out=b)
op fetch(X=b) -> (Out=fetch) {col=0}

kernel feed host/any/any
kernel fetch host/any/any
kernel scale arm/float/NCHW
kernel relu arm/float/NCHW
"#;

struct FakeNpu {
    fail: bool,
}

impl SubgraphBuilder for FakeNpu {
    fn supports(&self, op_type: &str) -> bool {
        op_type == "relu"
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
                reason: "device unavailable".into(),
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

fn optimizer_for(text: &str, passes: PassRegistry) -> (Optimizer, Program, TextProgram) {
    let parsed = parse_program(text).unwrap();
    let optimizer = Optimizer::new(Arc::new(passes), Arc::new(parsed.kernels.clone()));
    let scope = Scope::with_vars(parsed.program.vars.iter().map(|v| v.name.clone()));
    let program = Program::new(parsed.program.clone(), scope);
    (optimizer, program, parsed)
}

fn builtin() -> PassRegistry {
    PassRegistry::with_builtin_passes().unwrap()
}

#[test]
fn test_feed_fetch_follow_col_order() {
    init_logger();
    let (mut optimizer, program, parsed) = optimizer_for(FEED_FETCH, builtin());
    optimizer
        .run(&program, &parsed.valid_places, KernelPickFactor::default(), &[] as &[&str])
        .unwrap();
    let runtime = optimizer.gen_runtime_program().unwrap();

    let io = runtime.feed_fetch().unwrap();
    assert_eq!(io.inputs, ["a", "b"]);
    assert_eq!(io.outputs, ["c"]);
    assert_eq!(runtime.len(), 4);
    assert_eq!(runtime.instructions().last().unwrap().op.op_type(), "fetch");
    assert!(Arc::ptr_eq(runtime.exec_scope(), optimizer.exec_scope().unwrap()));
    assert!(runtime.exec_scope().contains("c"));

    let summary = runtime.kernel_summary();
    assert!(summary.op_types.contains("elementwise_add"));
    assert!(summary.kernels.contains("elementwise_add,arm,float,NCHW,def"));
    assert_eq!(optimizer.state(), OptimizerState::ProgramGenerated);
}

#[test]
fn test_in_place_operator_compiles_in_order() {
    init_logger();
    let (mut optimizer, program, parsed) = optimizer_for(IN_PLACE, builtin());
    optimizer
        .run(&program, &parsed.valid_places, KernelPickFactor::default(), &[] as &[&str])
        .unwrap();
    let runtime = optimizer.gen_runtime_program().unwrap();

    let ops: Vec<&str> = runtime.instructions().iter().map(|i| i.op.op_type()).collect();
    assert_eq!(ops, ["feed", "scale", "relu", "fetch"]);
    let relu = &runtime.instructions()[2].op;
    assert_eq!(relu.input("X"), ["a/inplace".to_string()]);
}

#[test]
fn test_generate_twice_is_allowed() {
    init_logger();
    let (mut optimizer, program, parsed) = optimizer_for(FEED_FETCH, builtin());
    optimizer
        .run(&program, &parsed.valid_places, KernelPickFactor::default(), &[] as &[&str])
        .unwrap();
    let first = optimizer.gen_runtime_program().unwrap();
    let second = optimizer.gen_runtime_program().unwrap();
    assert_eq!(first.to_string(), second.to_string());
}

#[test]
fn test_second_run_is_fatal() {
    init_logger();
    let (mut optimizer, program, parsed) = optimizer_for(FEED_FETCH, builtin());
    optimizer
        .run(&program, &parsed.valid_places, KernelPickFactor::default(), &[] as &[&str])
        .unwrap();
    let result = optimizer.run(&program, &parsed.valid_places, KernelPickFactor::default(), &[] as &[&str]);
    assert_eq!(result, Err(CompileError::AlreadyRun));
}

#[test]
fn test_generate_before_run_is_rejected() {
    init_logger();
    let (mut optimizer, _, _) = optimizer_for(FEED_FETCH, builtin());
    assert!(matches!(
        optimizer.gen_runtime_program(),
        Err(CompileError::InvalidState { .. })
    ));
    assert_eq!(optimizer.state(), OptimizerState::Unbuilt);
}

#[test]
fn test_empty_places_fail_the_run() {
    init_logger();
    let (mut optimizer, program, _) = optimizer_for(FEED_FETCH, builtin());
    let result = optimizer.run(&program, &[], KernelPickFactor::default(), &[] as &[&str]);
    assert_eq!(result, Err(CompileError::EmptyValidPlaces));
    assert_eq!(optimizer.state(), OptimizerState::Failed);
}

#[test]
fn test_supported_operators_offloaded_at_generation() {
    init_logger();
    let mut passes = builtin();
    passes
        .register(Box::new(SubgraphProgramPass::npu(Box::new(FakeNpu { fail: false }))))
        .unwrap();
    let (mut optimizer, program, parsed) = optimizer_for(OFFLOAD, passes);
    optimizer
        .run(&program, &parsed.valid_places, KernelPickFactor::default(), &[] as &[&str])
        .unwrap();
    let runtime = optimizer.gen_runtime_program().unwrap();

    let ops: Vec<&str> = runtime.instructions().iter().map(|i| i.op.op_type()).collect();
    assert_eq!(ops, ["graph_op", "softmax"]);
    let device = runtime.instructions()[0].device_program.as_ref().unwrap();
    assert_eq!(device.target, TargetType::Npu);
    assert_eq!(device.inputs, ["x"]);
    assert_eq!(device.outputs, ["a"]);
    assert_eq!(optimizer.session().stats().subgraphs_offloaded, 1);

    let xpu = optimizer
        .session()
        .trace()
        .iter()
        .find(|e| e.pass == "generate_xpu_program_pass")
        .unwrap();
    assert_eq!(xpu.outcome, PassOutcome::Skipped(SkipReason::NotFound));
}

#[test]
fn test_failed_offload_keeps_host_kernels() {
    init_logger();
    let mut passes = builtin();
    passes
        .register(Box::new(SubgraphProgramPass::npu(Box::new(FakeNpu { fail: true }))))
        .unwrap();
    let (mut optimizer, program, parsed) = optimizer_for(OFFLOAD, passes);
    optimizer
        .run(&program, &parsed.valid_places, KernelPickFactor::default(), &[] as &[&str])
        .unwrap();
    let runtime = optimizer.gen_runtime_program().unwrap();

    let ops: Vec<&str> = runtime.instructions().iter().map(|i| i.op.op_type()).collect();
    assert_eq!(ops, ["relu", "softmax"]);
    assert!(runtime.instructions().iter().all(|i| i.device_program.is_none()));
    assert_eq!(optimizer.session().stats().subgraphs_offloaded, 0);
}

#[test]
fn test_options_from_environment() {
    init_logger();
    std::env::set_var(PLACES_ENV, "arm/float/NCHW, host/float/NCHW");
    std::env::set_var(
        PASSES_ENV,
        "static_kernel_pick_pass,variable_place_inference_pass,type_target_cast_pass",
    );
    let options = CompileOptions::from_env().unwrap();
    std::env::remove_var(PLACES_ENV);
    std::env::remove_var(PASSES_ENV);
    assert_eq!(options.valid_places.len(), 2);
    assert_eq!(options.passes.len(), 3);

    let (mut optimizer, program, _) = optimizer_for(FEED_FETCH, builtin());
    optimizer.run_with_options(&program, &options).unwrap();
    let trace: Vec<String> = optimizer
        .session()
        .trace()
        .iter()
        .map(|e| e.to_string())
        .collect();
    assert_eq!(
        trace,
        [
            "static_kernel_pick_pass: applied",
            "variable_place_inference_pass: applied",
            "type_target_cast_pass: applied",
        ]
    );
}
