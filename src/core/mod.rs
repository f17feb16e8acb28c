// This module serves as the central hub for the compiler's core infrastructure, the
// building blocks every other module of the crate depends on. It exports and organizes
// the placement model (target, precision and layout enums plus the Place triple and its
// compatibility rules), the error type shared by all fallible steps, the compilation
// session (pass trace and statistics), the execution-scope handle owned by the model
// loader, and the process-wide name uniquifier used by accelerator-offload passes.

//! Core compiler infrastructure
//!
//! # Key Components
//!
//! ## Placements (`place`)
//! - `TargetType`, `PrecisionType`, `DataLayoutType` and the `Place` triple
//! - Compatibility predicates with host-family and wildcard relaxations
//!
//! ## Errors (`error`)
//! - `CompileError` / `CompileResult`, terminal for one compilation
//!
//! ## Session (`session`)
//! - Per-pass trace (applied / skipped with reason)
//! - Compilation statistics
//!
//! ## Scope (`scope`) and names (`unique_name`)
//! - Externally owned tensor-storage handle
//! - Mutex-guarded per-prefix counters for fresh operator names

pub mod error;
pub mod place;
pub mod scope;
pub mod session;
pub mod unique_name;

pub use error::{CompileError, CompileResult};
pub use place::{
    layout_compatible, places_repr, precision_compatible, target_compatible, DataLayoutType,
    Place, PrecisionType, TargetType,
};
pub use scope::Scope;
pub use session::{CastKind, CompileSession, PassEvent, PassOutcome, SessionStats, SkipReason};
pub use unique_name::unique_name;
