//! infer-mir - graph-level compiler for an inference engine.
//!
//! Takes a parsed operator program and a ranked list of valid places
//! (target x precision x layout), and produces a kernel-bound,
//! placement-consistent runtime program.
//!
//! # Primary Usage
//!
//! ```ignore
//! use infer_mir::{Optimizer, PassRegistry, KernelRegistry, KernelPickFactor};
//! use std::sync::Arc;
//!
//! // Registries are built once per process and shared.
//! let passes = Arc::new(PassRegistry::with_builtin_passes()?);
//! let kernels = Arc::new(kernels);
//!
//! let mut optimizer = Optimizer::new(passes, kernels);
//! optimizer.run(&program, &valid_places, KernelPickFactor::default(), &[] as &[&str])?;
//! let runtime = optimizer.gen_runtime_program()?;
//! ```
//!
//! # Architecture
//!
//! - [`core`] - Placements, errors, session trace, scope handle
//! - [`program`] - Parsed program model and feed/fetch naming
//! - [`kernel`] - Kernel descriptors, registry and the kernel picker
//! - [`mir`] - The SSA graph and chain pattern matching
//! - [`passes`] - Pass trait, registry, pipeline and built-in passes
//! - [`generator`] - Runtime program generation
//! - [`optimizer`] - The orchestrator
//! - [`config`] - Compile options and environment overrides
//! - [`text_program`] - Textual program format for tests and tools

pub mod config;
pub mod core;
pub mod generator;
pub mod kernel;
pub mod mir;
pub mod optimizer;
pub mod passes;
pub mod program;
pub mod text_program;

pub use crate::core::{
    CompileError, CompileResult, CompileSession, DataLayoutType, Place, PrecisionType, Scope,
    TargetType,
};
pub use config::CompileOptions;
pub use generator::{generate_program, Instruction, KernelSummary, RuntimeProgram};
pub use kernel::{KernelDesc, KernelPickFactor, KernelRegistry};
pub use mir::{NodeId, SsaGraph};
pub use optimizer::{Optimizer, OptimizerState};
pub use passes::{Pass, PassContext, PassRegistry};
pub use program::{Attribute, OpDesc, Program, ProgramDesc, VarDesc};
