// This module defines the placement descriptor used throughout the compiler. A Place is
// an immutable (target, precision, layout) triple describing where and how a tensor or an
// operator executes. TargetType enumerates the devices the engine can schedule on,
// PrecisionType the numeric element types, DataLayoutType the memory layouts. Each enum
// has an `Any` member acting as a wildcard for generic device-default kernels such as the
// host feed/fetch kernels. The compatibility predicates decide whether two adjacent graph
// nodes agree on a placement: host, x86 and arm share host memory and are mutually
// compatible, `Any` matches everything, all other values must be equal. Places parse from
// and print to the `target/precision/layout` form used by the config layer and the
// textual program format.

//! Placement descriptors: target, precision and memory layout.

use super::error::{CompileError, CompileResult};
use std::fmt;
use std::str::FromStr;

/// Device an operator or tensor lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TargetType {
    Unk,
    Host,
    X86,
    Cuda,
    Arm,
    OpenCl,
    Fpga,
    Npu,
    Xpu,
    Any,
}

/// Numeric element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PrecisionType {
    Unk,
    Float,
    Fp16,
    Int8,
    Int32,
    Int64,
    Bool,
    Any,
}

/// Memory layout of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataLayoutType {
    Unk,
    Nchw,
    Nhwc,
    Any,
}

impl TargetType {
    pub const ALL: [TargetType; 10] = [
        TargetType::Unk,
        TargetType::Host,
        TargetType::X86,
        TargetType::Cuda,
        TargetType::Arm,
        TargetType::OpenCl,
        TargetType::Fpga,
        TargetType::Npu,
        TargetType::Xpu,
        TargetType::Any,
    ];

    pub fn repr(self) -> &'static str {
        match self {
            TargetType::Unk => "unk",
            TargetType::Host => "host",
            TargetType::X86 => "x86",
            TargetType::Cuda => "cuda",
            TargetType::Arm => "arm",
            TargetType::OpenCl => "opencl",
            TargetType::Fpga => "fpga",
            TargetType::Npu => "npu",
            TargetType::Xpu => "xpu",
            TargetType::Any => "any",
        }
    }

    /// Targets that address plain host memory.
    pub fn is_host_family(self) -> bool {
        matches!(self, TargetType::Host | TargetType::X86 | TargetType::Arm)
    }
}

impl PrecisionType {
    pub const ALL: [PrecisionType; 8] = [
        PrecisionType::Unk,
        PrecisionType::Float,
        PrecisionType::Fp16,
        PrecisionType::Int8,
        PrecisionType::Int32,
        PrecisionType::Int64,
        PrecisionType::Bool,
        PrecisionType::Any,
    ];

    pub fn repr(self) -> &'static str {
        match self {
            PrecisionType::Unk => "unk",
            PrecisionType::Float => "float",
            PrecisionType::Fp16 => "fp16",
            PrecisionType::Int8 => "int8",
            PrecisionType::Int32 => "int32",
            PrecisionType::Int64 => "int64",
            PrecisionType::Bool => "bool",
            PrecisionType::Any => "any",
        }
    }
}

impl DataLayoutType {
    pub const ALL: [DataLayoutType; 4] = [
        DataLayoutType::Unk,
        DataLayoutType::Nchw,
        DataLayoutType::Nhwc,
        DataLayoutType::Any,
    ];

    pub fn repr(self) -> &'static str {
        match self {
            DataLayoutType::Unk => "unk",
            DataLayoutType::Nchw => "NCHW",
            DataLayoutType::Nhwc => "NHWC",
            DataLayoutType::Any => "any",
        }
    }
}

macro_rules! impl_repr_traits {
    ($ty:ident, $what:literal) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.repr())
            }
        }

        impl FromStr for $ty {
            type Err = CompileError;

            fn from_str(s: &str) -> CompileResult<Self> {
                let wanted = s.trim();
                $ty::ALL
                    .iter()
                    .copied()
                    .find(|v| v.repr().eq_ignore_ascii_case(wanted))
                    .ok_or_else(|| CompileError::InvalidPlace {
                        text: s.to_string(),
                        reason: format!("unknown {}", $what),
                    })
            }
        }
    };
}

impl_repr_traits!(TargetType, "target");
impl_repr_traits!(PrecisionType, "precision");
impl_repr_traits!(DataLayoutType, "layout");

/// Whether a tensor on `a` can be handed to a consumer expecting `b` without a copy.
pub fn target_compatible(a: TargetType, b: TargetType) -> bool {
    if a == TargetType::Any || b == TargetType::Any {
        return true;
    }
    if a.is_host_family() {
        return b.is_host_family();
    }
    a == b
}

pub fn precision_compatible(a: PrecisionType, b: PrecisionType) -> bool {
    a == b || a == PrecisionType::Any || b == PrecisionType::Any
}

pub fn layout_compatible(a: DataLayoutType, b: DataLayoutType) -> bool {
    a == b || a == DataLayoutType::Any || b == DataLayoutType::Any
}

/// Where and how a tensor or operator executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Place {
    pub target: TargetType,
    pub precision: PrecisionType,
    pub layout: DataLayoutType,
}

impl Place {
    pub const fn new(target: TargetType, precision: PrecisionType, layout: DataLayoutType) -> Self {
        Self {
            target,
            precision,
            layout,
        }
    }

    /// Generic host placement accepting any precision and layout.
    pub const fn host_any() -> Self {
        Self::new(TargetType::Host, PrecisionType::Any, DataLayoutType::Any)
    }

    pub fn is_valid(&self) -> bool {
        self.target != TargetType::Unk
            && self.precision != PrecisionType::Unk
            && self.layout != DataLayoutType::Unk
    }

    /// Equal on all three fields, modulo the host-family and `Any` relaxations.
    pub fn compatible_with(&self, other: &Place) -> bool {
        target_compatible(self.target, other.target)
            && precision_compatible(self.precision, other.precision)
            && layout_compatible(self.layout, other.layout)
    }

    /// Fill the wildcard fields of `self` from `from`.
    pub fn refine(&self, from: &Place) -> Place {
        Place {
            target: if self.target == TargetType::Any {
                from.target
            } else {
                self.target
            },
            precision: if self.precision == PrecisionType::Any {
                from.precision
            } else {
                self.precision
            },
            layout: if self.layout == DataLayoutType::Any {
                from.layout
            } else {
                self.layout
            },
        }
    }
}

impl fmt::Display for Place {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.target, self.precision, self.layout)
    }
}

impl FromStr for Place {
    type Err = CompileError;

    /// Parses `target[/precision[/layout]]`; omitted fields default to `any`.
    fn from_str(s: &str) -> CompileResult<Self> {
        let mut parts = s.trim().split('/');
        let target = match parts.next() {
            Some(t) if !t.trim().is_empty() => t.parse::<TargetType>()?,
            _ => {
                return Err(CompileError::InvalidPlace {
                    text: s.to_string(),
                    reason: "missing target".to_string(),
                })
            }
        };
        let precision = match parts.next() {
            Some(p) => p.parse::<PrecisionType>()?,
            None => PrecisionType::Any,
        };
        let layout = match parts.next() {
            Some(l) => l.parse::<DataLayoutType>()?,
            None => DataLayoutType::Any,
        };
        if parts.next().is_some() {
            return Err(CompileError::InvalidPlace {
                text: s.to_string(),
                reason: "too many fields".to_string(),
            });
        }
        Ok(Place::new(target, precision, layout))
    }
}

/// Render a place list for diagnostics.
pub fn places_repr(places: &[Place]) -> String {
    places
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_place_parse_and_display() {
        let place: Place = "cuda/float/NCHW".parse().unwrap();
        assert_eq!(
            place,
            Place::new(TargetType::Cuda, PrecisionType::Float, DataLayoutType::Nchw)
        );
        assert_eq!(place.to_string(), "cuda/float/NCHW");

        let partial: Place = "arm".parse().unwrap();
        assert_eq!(partial.precision, PrecisionType::Any);
        assert_eq!(partial.layout, DataLayoutType::Any);

        assert!("".parse::<Place>().is_err());
        assert!("gpu/float".parse::<Place>().is_err());
        assert!("host/float/NCHW/extra".parse::<Place>().is_err());
    }

    #[test]
    fn test_target_compatibility() {
        assert!(target_compatible(TargetType::Host, TargetType::X86));
        assert!(target_compatible(TargetType::Arm, TargetType::Host));
        assert!(target_compatible(TargetType::Cuda, TargetType::Any));
        assert!(!target_compatible(TargetType::Cuda, TargetType::Host));
        assert!(!target_compatible(TargetType::Npu, TargetType::Xpu));
    }

    #[test]
    fn test_wildcards() {
        let host_any = Place::host_any();
        let host_float: Place = "host/float/NCHW".parse().unwrap();
        let host_int8: Place = "host/int8/NCHW".parse().unwrap();
        assert!(host_any.compatible_with(&host_float));
        assert!(!host_float.compatible_with(&host_int8));
        assert_eq!(host_any.refine(&host_int8), host_int8);
        assert_eq!(host_float.refine(&host_int8), host_float);
    }
}
