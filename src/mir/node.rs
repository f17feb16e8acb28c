//! Nodes of the SSA graph.
//!
//! The graph is bipartite: statement nodes (operators) only link to argument
//! nodes (tensor values) and vice versa. An argument has at most one producer
//! statement in its inlinks and any number of consumer statements in its
//! outlinks; a statement's inlinks are its input arguments and its outlinks are
//! its output arguments.

use crate::core::{Place, TargetType};
use crate::kernel::KernelDesc;
use crate::program::OpDesc;
use std::fmt;
use std::sync::Arc;

/// Stable handle of a node inside one graph. Ids are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Execution context bound to a statement by the runtime-context pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelContext {
    Host,
    Cuda { stream: u32 },
    Device { target: TargetType },
}

impl fmt::Display for KernelContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelContext::Host => write!(f, "host"),
            KernelContext::Cuda { stream } => write!(f, "cuda:stream{}", stream),
            KernelContext::Device { target } => write!(f, "device:{}", target),
        }
    }
}

/// Opaque compiled program produced by an accelerator backend for one subgraph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProgram {
    pub name: String,
    pub target: TargetType,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub blob: Vec<u8>,
}

/// An operator node.
#[derive(Debug, Clone)]
pub struct Stmt {
    pub op: OpDesc,
    /// Candidate placements, best first.
    pub valid_places: Vec<Place>,
    pub kernel: Option<KernelDesc>,
    pub context: Option<KernelContext>,
    pub device_program: Option<Arc<DeviceProgram>>,
}

impl Stmt {
    pub fn new(op: OpDesc, valid_places: Vec<Place>) -> Self {
        Self {
            op,
            valid_places,
            kernel: None,
            context: None,
            device_program: None,
        }
    }

    pub fn op_type(&self) -> &str {
        self.op.op_type()
    }

    /// Placement of the picked kernel.
    pub fn place(&self) -> Option<Place> {
        self.kernel.as_ref().map(KernelDesc::place)
    }
}

/// An argument (tensor value) node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arg {
    pub name: String,
    pub place: Option<Place>,
    pub persistable: bool,
}

impl Arg {
    pub fn new(name: impl Into<String>, persistable: bool) -> Self {
        Self {
            name: name.into(),
            place: None,
            persistable,
        }
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Stmt(Stmt),
    Arg(Arg),
}

/// A graph node with its links.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) inlinks: Vec<NodeId>,
    pub(crate) outlinks: Vec<NodeId>,
}

impl Node {
    pub(crate) fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            inlinks: Vec::new(),
            outlinks: Vec::new(),
        }
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn is_stmt(&self) -> bool {
        matches!(self.kind, NodeKind::Stmt(_))
    }

    pub fn is_arg(&self) -> bool {
        matches!(self.kind, NodeKind::Arg(_))
    }

    pub fn stmt(&self) -> Option<&Stmt> {
        match &self.kind {
            NodeKind::Stmt(stmt) => Some(stmt),
            NodeKind::Arg(_) => None,
        }
    }

    pub fn stmt_mut(&mut self) -> Option<&mut Stmt> {
        match &mut self.kind {
            NodeKind::Stmt(stmt) => Some(stmt),
            NodeKind::Arg(_) => None,
        }
    }

    pub fn arg(&self) -> Option<&Arg> {
        match &self.kind {
            NodeKind::Arg(arg) => Some(arg),
            NodeKind::Stmt(_) => None,
        }
    }

    pub fn arg_mut(&mut self) -> Option<&mut Arg> {
        match &mut self.kind {
            NodeKind::Arg(arg) => Some(arg),
            NodeKind::Stmt(_) => None,
        }
    }

    pub fn inlinks(&self) -> &[NodeId] {
        &self.inlinks
    }

    pub fn outlinks(&self) -> &[NodeId] {
        &self.outlinks
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            NodeKind::Stmt(stmt) => {
                write!(f, "{}", stmt.op)?;
                if let Some(kernel) = &stmt.kernel {
                    write!(f, " @ {}", kernel)?;
                }
                Ok(())
            }
            NodeKind::Arg(arg) => match arg.place {
                Some(place) => write!(f, "{}: {}", arg.name, place),
                None => write!(f, "{}: <unset>", arg.name),
            },
        }
    }
}
