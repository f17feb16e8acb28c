// This module describes the kernels the compiler can bind to operator nodes. A kernel body
// (the actual convolution or copy routine) lives outside the compiler; here a kernel is
// only a KernelDesc: the operator type it implements, the Place it runs at, an alias that
// distinguishes variants of the same op/place (e.g. "def", "int8_out"), and for conversion
// kernels (io_copy, calib, layout) an IoDecl giving the declared input and output
// placements, which differ from each other by construction. KernelRegistry keeps every
// descriptor per operator type in registration order; registration order is the kernel
// picker's tie-break. The registry is populated once at process start and then shared
// read-only between compilations. The picker submodule implements the weighted
// multi-factor kernel selection.

//! Kernel descriptors and the kernel registry.

pub mod picker;

pub use picker::{kernel_grade, pick_kernel, target_matches, KernelPickFactor};

use crate::core::{Place, TargetType};
use hashbrown::HashMap;
use std::fmt;

/// Declared placements of a conversion kernel's input and output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IoDecl {
    pub input: Place,
    pub output: Place,
}

/// Descriptor of one registered kernel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KernelDesc {
    op_type: String,
    place: Place,
    alias: String,
    io: Option<IoDecl>,
}

impl KernelDesc {
    pub fn new(op_type: impl Into<String>, place: Place, alias: impl Into<String>) -> Self {
        Self {
            op_type: op_type.into(),
            place,
            alias: alias.into(),
            io: None,
        }
    }

    /// Declare distinct input/output placements (conversion kernels).
    pub fn with_io(mut self, input: Place, output: Place) -> Self {
        self.io = Some(IoDecl { input, output });
        self
    }

    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    pub fn place(&self) -> Place {
        self.place
    }

    pub fn target(&self) -> TargetType {
        self.place.target
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn io(&self) -> Option<&IoDecl> {
        self.io.as_ref()
    }

    /// Placement this kernel expects on its inputs.
    pub fn input_place(&self) -> Place {
        self.io.map(|io| io.input).unwrap_or(self.place)
    }

    /// Placement this kernel produces on its outputs.
    pub fn output_place(&self) -> Place {
        self.io.map(|io| io.output).unwrap_or(self.place)
    }

    /// `op,target,precision,layout,alias`
    pub fn summary(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.op_type, self.place.target, self.place.precision, self.place.layout, self.alias
        )
    }
}

impl fmt::Display for KernelDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.op_type, self.place, self.alias)?;
        if let Some(io) = &self.io {
            write!(f, " ({} -> {})", io.input, io.output)?;
        }
        Ok(())
    }
}

/// Catalog of kernel descriptors by operator type.
#[derive(Debug, Default, Clone)]
pub struct KernelRegistry {
    kernels: HashMap<String, Vec<KernelDesc>>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kernel. Later registrations lose ties against earlier ones.
    pub fn register(&mut self, kernel: KernelDesc) -> &mut Self {
        log::trace!("Registering kernel {}", kernel);
        self.kernels
            .entry(kernel.op_type.clone())
            .or_default()
            .push(kernel);
        self
    }

    /// All kernels of an operator type in registration order.
    pub fn kernels(&self, op_type: &str) -> &[KernelDesc] {
        self.kernels.get(op_type).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Kernels of an operator type that can run on one of `targets`.
    pub fn candidates<'a>(
        &'a self,
        op_type: &str,
        targets: &'a [TargetType],
    ) -> impl Iterator<Item = &'a KernelDesc> + 'a {
        self.kernels(op_type)
            .iter()
            .filter(move |k| targets.iter().any(|t| target_matches(k.target(), *t)))
    }

    /// Whether some kernel of `op_type` runs on one of `targets`.
    pub fn has_kernel_for(&self, op_type: &str, targets: &[TargetType]) -> bool {
        self.candidates(op_type, targets).next().is_some()
    }

    pub fn op_types(&self) -> impl Iterator<Item = &str> {
        self.kernels.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.kernels.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}
