// This module defines the error types for the infer-mir compiler using the thiserror crate
// for idiomatic Rust error handling. CompileError is the single error enum returned by
// every fallible step of a compilation: building the SSA graph from a parsed program,
// graph mutation primitives, kernel picking, cast insertion, pass registration and
// pipeline execution, program generation and the textual program parser. Each variant
// carries the context needed to diagnose the failure (operator types, argument names,
// placements, pass names). All of these are terminal for one compilation: the
// orchestrator stops at the first error and exposes no partial result.

//! Error types for the infer-mir compiler.
//!
//! Using thiserror for more idiomatic error handling.

use thiserror::Error;

/// Main error type for graph compilation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("At least one valid place should be set")]
    EmptyValidPlaces,

    #[error("Duplicate optimize found: this optimizer has already run")]
    AlreadyRun,

    #[error("Invalid optimizer state: {reason}")]
    InvalidState { reason: String },

    #[error("Malformed program: {reason}")]
    MalformedProgram { reason: String },

    #[error("Operator `{op_type}` references undeclared argument `{arg}`")]
    UndeclaredArgument { op_type: String, arg: String },

    #[error("Argument `{arg}` is produced by both `{first}` and `{second}`")]
    DuplicateProducer {
        arg: String,
        first: String,
        second: String,
    },

    #[error("Removing node {node} would leave a dangling edge: {reason}")]
    DanglingEdge { node: usize, reason: String },

    #[error("Node {node} not found in graph")]
    NodeNotFound { node: usize },

    #[error("No kernel of `{op_type}` matches the valid places [{places}]")]
    NoMatchingKernel { op_type: String, places: String },

    #[error("No `{op_type}` kernel converts {from} to {to}")]
    NoCastKernel {
        op_type: String,
        from: String,
        to: String,
    },

    #[error("Operator `{op_type}` has no picked kernel")]
    UnpickedKernel { op_type: String },

    #[error("Graph contains a cycle through {remaining} operator nodes")]
    GraphCycle { remaining: usize },

    #[error("Pass `{name}` is already registered")]
    DuplicatePass { name: String },

    #[error("Required pass `{name}` is not registered")]
    RequiredPassMissing { name: String },

    #[error("Invalid place `{text}`: {reason}")]
    InvalidPlace { text: String, reason: String },

    #[error("Feed/fetch error: {reason}")]
    FeedFetch { reason: String },

    #[error("Parse error at line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("Subgraph build failed for {target}: {reason}")]
    SubgraphBuild { target: String, reason: String },
}

/// Result type alias for compile operations.
pub type CompileResult<T> = Result<T, CompileError>;
