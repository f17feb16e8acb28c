//! Textual program descriptions for tests and the `mir-opt` tool.
//!
//! The format describes a parsed program, the kernels available for it and
//! the valid places to compile for. It is not a model format: there are no
//! tensors, only names and descriptors.
//!
//! # Format
//!
//! ```text
//! ; Comments start with semicolon
//! places cuda/float/NCHW host/float/NCHW
//! var feed fetch x y
//! weight w
//! op feed(X=feed) -> (Out=x) {col=0}
//! op conv2d(Input=x, Filter=w) -> (Output=y) {strides=[1, 1], act="relu"}
//! op fetch(X=y) -> (Out=fetch) {col=0}
//! kernel conv2d cuda/float/NCHW
//! kernel io_copy cuda/any/any alias=host_to_device in=host/any/any out=cuda/any/any
//! ```
//!
//! A slot bound to several arguments lists them separated by `|`. Attribute
//! values are integers, floats, `true`/`false`, double-quoted strings or
//! bracketed lists of numbers. A kernel's alias defaults to `def`.

pub mod parser;

pub use parser::parse_program;

use crate::kernel::KernelRegistry;
use crate::core::Place;
use crate::program::ProgramDesc;

/// Everything one text file describes.
#[derive(Debug, Clone, Default)]
pub struct TextProgram {
    pub program: ProgramDesc,
    pub kernels: KernelRegistry,
    pub valid_places: Vec<Place>,
}
