// This module holds the compiler's intermediate representation: a bipartite SSA graph of
// operator (statement) nodes and argument (tensor value) nodes, built once per compiled
// program and mutated in place by the pass pipeline. The node submodule defines the node
// payloads (the operator descriptor, its candidate places, the picked kernel and runtime
// context on statements; the name, placement and persistability on arguments). The graph
// submodule implements construction, traversal, topological ordering and the mutation
// primitives. The pattern submodule matches linear operator chains for the fusion passes,
// and memory holds the storage plan produced by the memory-reuse pass.

//! SSA graph intermediate representation.

pub mod graph;
pub mod memory;
pub mod node;
pub mod pattern;

pub use graph::{stage_compatible, PlacementMismatch, SsaGraph};
pub use memory::{Lifetime, MemoryPlan};
pub use node::{Arg, DeviceProgram, KernelContext, Node, NodeId, NodeKind, Stmt};
pub use pattern::{ChainMatch, ChainPattern, Link};
