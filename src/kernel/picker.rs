//! Weighted multi-factor kernel selection.
//!
//! Every candidate kernel is graded against each of the node's candidate
//! places. A place earlier in the ranked list weighs more: place `i` of `n`
//! contributes with weight `n - i`. Within one place the enabled factors add
//! up, with target dominating precision and precision dominating layout:
//!
//! ```text
//! target match    MAX
//! precision match MAX / 2
//! layout match    MAX / 4
//! ```
//!
//! A kernel's grade is its best weighted score over all places. The highest
//! grade wins; equal grades keep the first-registered kernel.

use super::KernelDesc;
use crate::core::{
    layout_compatible, places_repr, precision_compatible, CompileError, CompileResult, Place,
    TargetType,
};

const MAX_SCORE: u64 = 1 << 20;

/// Which factors the kernel picker weighs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelPickFactor {
    bits: u8,
}

impl KernelPickFactor {
    const TARGET: u8 = 1;
    const PRECISION: u8 = 1 << 1;
    const LAYOUT: u8 = 1 << 2;

    /// No factor considered; every candidate grades zero.
    pub const fn none() -> Self {
        Self { bits: 0 }
    }

    pub const fn all() -> Self {
        Self {
            bits: Self::TARGET | Self::PRECISION | Self::LAYOUT,
        }
    }

    pub const fn consider_target(mut self) -> Self {
        self.bits |= Self::TARGET;
        self
    }

    pub const fn consider_precision(mut self) -> Self {
        self.bits |= Self::PRECISION;
        self
    }

    pub const fn consider_data_layout(mut self) -> Self {
        self.bits |= Self::LAYOUT;
        self
    }

    pub const fn is_target_considered(&self) -> bool {
        self.bits & Self::TARGET != 0
    }

    pub const fn is_precision_considered(&self) -> bool {
        self.bits & Self::PRECISION != 0
    }

    pub const fn is_data_layout_considered(&self) -> bool {
        self.bits & Self::LAYOUT != 0
    }

    pub const fn any_factor_considered(&self) -> bool {
        self.bits != 0
    }
}

impl Default for KernelPickFactor {
    fn default() -> Self {
        Self::all()
    }
}

/// Whether a kernel built for `kernel` can serve a place on `place`.
///
/// Generic host kernels serve every host-family target.
pub fn target_matches(kernel: TargetType, place: TargetType) -> bool {
    kernel == place
        || kernel == TargetType::Any
        || place == TargetType::Any
        || (kernel == TargetType::Host && place.is_host_family())
}

/// Best weighted score of `kernel` over the ranked `places`.
pub fn kernel_grade(kernel: &KernelDesc, places: &[Place], factor: KernelPickFactor) -> u64 {
    let n = places.len() as u64;
    let kp = kernel.place();
    places
        .iter()
        .enumerate()
        .map(|(i, place)| {
            let mut score = 0;
            if factor.is_target_considered() && target_matches(kp.target, place.target) {
                score += MAX_SCORE;
            }
            if factor.is_precision_considered() && precision_compatible(kp.precision, place.precision) {
                score += MAX_SCORE / 2;
            }
            if factor.is_data_layout_considered() && layout_compatible(kp.layout, place.layout) {
                score += MAX_SCORE / 4;
            }
            score * (n - i as u64)
        })
        .max()
        .unwrap_or(0)
}

/// Pick the best kernel of `op_type` for a node whose candidate places are `places`.
///
/// Kernels whose target serves none of the places are not candidates. No
/// candidate at all is a fatal error.
pub fn pick_kernel<'k>(
    op_type: &str,
    kernels: &'k [KernelDesc],
    places: &[Place],
    factor: KernelPickFactor,
) -> CompileResult<&'k KernelDesc> {
    let mut best: Option<(&KernelDesc, u64)> = None;
    for kernel in kernels {
        if !places.iter().any(|p| target_matches(kernel.target(), p.target)) {
            continue;
        }
        let grade = kernel_grade(kernel, places, factor);
        log::trace!("   kernel {} graded {}", kernel, grade);
        match best {
            Some((_, best_grade)) if grade <= best_grade => {}
            _ => best = Some((kernel, grade)),
        }
    }

    best.map(|(kernel, _)| kernel)
        .ok_or_else(|| CompileError::NoMatchingKernel {
            op_type: op_type.to_string(),
            places: places_repr(places),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn place(s: &str) -> Place {
        s.parse().unwrap()
    }

    fn kernel(op: &str, p: &str) -> KernelDesc {
        KernelDesc::new(op, place(p), "def")
    }

    #[test]
    fn test_factor_builder() {
        let factor = KernelPickFactor::none().consider_target();
        assert!(factor.is_target_considered());
        assert!(!factor.is_precision_considered());
        assert!(!factor.is_data_layout_considered());
        assert_eq!(KernelPickFactor::default(), KernelPickFactor::all());
    }

    #[test]
    fn test_target_only_ignores_precision() {
        let kernels = vec![kernel("conv2d", "cuda/int8/NCHW"), kernel("conv2d", "host/float/NCHW")];
        let places = vec![place("cuda/float/NCHW"), place("host/float/NCHW")];
        let factor = KernelPickFactor::none().consider_target();

        let picked = pick_kernel("conv2d", &kernels, &places, factor).unwrap();
        assert_eq!(picked.place(), place("cuda/int8/NCHW"));
    }

    #[test]
    fn test_precision_breaks_target_tie() {
        let kernels = vec![kernel("conv2d", "arm/int8/NCHW"), kernel("conv2d", "arm/float/NCHW")];
        let places = vec![place("arm/float/NCHW")];

        let picked = pick_kernel("conv2d", &kernels, &places, KernelPickFactor::all()).unwrap();
        assert_eq!(picked.place().precision, crate::core::PrecisionType::Float);
    }

    #[test]
    fn test_place_rank_weighs_in() {
        let kernels = vec![kernel("relu", "host/float/NCHW"), kernel("relu", "cuda/float/NCHW")];
        let places = vec![place("cuda/float/NCHW"), place("host/float/NCHW")];

        let picked = pick_kernel("relu", &kernels, &places, KernelPickFactor::all()).unwrap();
        assert_eq!(picked.target(), TargetType::Cuda);
    }

    #[test]
    fn test_tie_keeps_first_registered() {
        let first = KernelDesc::new("relu", place("arm/float/NCHW"), "first");
        let second = KernelDesc::new("relu", place("arm/float/NCHW"), "second");
        let kernels = vec![first, second];
        let places = vec![place("arm/float/NCHW")];

        let picked = pick_kernel("relu", &kernels, &places, KernelPickFactor::all()).unwrap();
        assert_eq!(picked.alias(), "first");
    }

    #[test]
    fn test_no_candidate_is_fatal() {
        let kernels = vec![kernel("relu", "cuda/float/NCHW")];
        let places = vec![place("arm/float/NCHW")];
        let err = pick_kernel("relu", &kernels, &places, KernelPickFactor::all()).unwrap_err();
        assert!(matches!(err, CompileError::NoMatchingKernel { .. }));

        assert!(pick_kernel("relu", &[], &places, KernelPickFactor::all()).is_err());
    }
}
