// This module defines the pass abstraction and every built-in graph pass. A Pass is a named,
// stateless unit that mutates the SSA graph through an exclusive borrow; it declares which
// targets it is relevant for and which kernels it has an affinity to, and the pipeline uses
// these two declarations to skip passes that cannot apply to the active valid places.
// Per-run configuration (the kernel registry, the kernel-pick factor, the compilation
// session collecting trace and statistics) is handed to every pass through PassContext
// instead of being stored on the shared pass instances, so one PassRegistry can serve
// concurrent compilations. DEFAULT_PASSES is the fixed default pipeline expressed as data;
// SUBGRAPH_PASSES are the shape-dependent accelerator-offload passes deferred until
// program generation.

//! Graph passes, the pass registry and the pass pipeline.

pub mod fusion;
pub mod identity_scale;
pub mod io_copy_pick;
pub mod kernel_pick;
pub mod memory_optimize;
pub mod pipeline;
pub mod place_inference;
pub mod registry;
pub mod runtime_context;
pub mod subgraph;
pub mod type_cast;
pub mod type_display;

pub use fusion::{FusePattern, FusionPass};
pub use identity_scale::IdentityScaleEliminatePass;
pub use io_copy_pick::IoCopyKernelPickPass;
pub use kernel_pick::StaticKernelPickPass;
pub use memory_optimize::MemoryOptimizePass;
pub use pipeline::Pipeline;
pub use place_inference::VariablePlaceInferencePass;
pub use registry::PassRegistry;
pub use runtime_context::RuntimeContextAssignPass;
pub use subgraph::{SubgraphBuilder, SubgraphProgramPass};
pub use type_cast::TypeCastPass;
pub use type_display::ArgumentTypeDisplayPass;

use crate::core::{CompileResult, CompileSession, TargetType};
use crate::kernel::{KernelPickFactor, KernelRegistry};
use crate::mir::SsaGraph;

pub const STATIC_KERNEL_PICK_PASS: &str = "static_kernel_pick_pass";
pub const VARIABLE_PLACE_INFERENCE_PASS: &str = "variable_place_inference_pass";
pub const ARGUMENT_TYPE_DISPLAY_PASS: &str = "argument_type_display_pass";
pub const TYPE_TARGET_CAST_PASS: &str = "type_target_cast_pass";
pub const TYPE_PRECISION_CAST_PASS: &str = "type_precision_cast_pass";
pub const TYPE_LAYOUT_CAST_PASS: &str = "type_layout_cast_pass";
pub const IO_COPY_KERNEL_PICK_PASS: &str = "io_copy_kernel_pick_pass";
pub const RUNTIME_CONTEXT_ASSIGN_PASS: &str = "runtime_context_assign_pass";
pub const MEMORY_OPTIMIZE_PASS: &str = "memory_optimize_pass";
pub const IDENTITY_SCALE_ELIMINATE_PASS: &str = "identity_scale_eliminate_pass";
pub const GENERATE_NPU_PROGRAM_PASS: &str = "generate_npu_program_pass";
pub const GENERATE_XPU_PROGRAM_PASS: &str = "generate_xpu_program_pass";

/// The default pipeline.
pub const DEFAULT_PASSES: &[&str] = &[
    "lite_quant_dequant_fuse_pass",
    "lite_conv_elementwise_fuse_pass", // conv-elemwise-bn
    "lite_conv_bn_fuse_pass",
    "lite_conv_elementwise_fuse_pass", // conv-bn-elemwise
    "lite_conv_activation_fuse_pass",
    "lite_fc_fuse_pass",
    "lite_shuffle_channel_fuse_pass",
    "lite_transpose_softmax_transpose_fuse_pass",
    "lite_interpolate_fuse_pass",
    IDENTITY_SCALE_ELIMINATE_PASS,
    "lite_elementwise_add_activation_fuse_pass",
    STATIC_KERNEL_PICK_PASS,
    VARIABLE_PLACE_INFERENCE_PASS,
    ARGUMENT_TYPE_DISPLAY_PASS,
    TYPE_TARGET_CAST_PASS,
    VARIABLE_PLACE_INFERENCE_PASS,
    ARGUMENT_TYPE_DISPLAY_PASS,
    IO_COPY_KERNEL_PICK_PASS,
    ARGUMENT_TYPE_DISPLAY_PASS,
    VARIABLE_PLACE_INFERENCE_PASS,
    ARGUMENT_TYPE_DISPLAY_PASS,
    TYPE_PRECISION_CAST_PASS,
    VARIABLE_PLACE_INFERENCE_PASS,
    ARGUMENT_TYPE_DISPLAY_PASS,
    TYPE_LAYOUT_CAST_PASS,
    ARGUMENT_TYPE_DISPLAY_PASS,
    VARIABLE_PLACE_INFERENCE_PASS,
    ARGUMENT_TYPE_DISPLAY_PASS,
    RUNTIME_CONTEXT_ASSIGN_PASS,
    ARGUMENT_TYPE_DISPLAY_PASS,
    MEMORY_OPTIMIZE_PASS,
];

/// Shape-dependent passes run at program generation.
pub const SUBGRAPH_PASSES: &[&str] = &[GENERATE_NPU_PROGRAM_PASS, GENERATE_XPU_PROGRAM_PASS];

/// Per-run state handed to every pass.
pub struct PassContext<'a> {
    pub kernels: &'a KernelRegistry,
    pub pick_factor: KernelPickFactor,
    pub session: &'a mut CompileSession,
}

impl<'a> PassContext<'a> {
    pub fn new(
        kernels: &'a KernelRegistry,
        pick_factor: KernelPickFactor,
        session: &'a mut CompileSession,
    ) -> Self {
        Self {
            kernels,
            pick_factor,
            session,
        }
    }
}

/// A named graph transformation or analysis.
pub trait Pass: Send + Sync {
    fn name(&self) -> &'static str;

    /// Targets this pass is relevant for. `Any` means every target.
    fn bound_targets(&self) -> &[TargetType] {
        &[TargetType::Any]
    }

    /// Operator types whose kernels this pass relies on. Empty means none.
    fn bound_kernels(&self) -> &[&'static str] {
        &[]
    }

    fn apply(&self, graph: &mut SsaGraph, cx: &mut PassContext<'_>) -> CompileResult<()>;
}
