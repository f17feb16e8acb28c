//! Name-keyed catalog of pass instances.
//!
//! The registry is populated once at process start and then only read, so
//! one instance can be shared (behind an `Arc`) by concurrent compilations.

use super::fusion::{
    ConvActivationFuse, ConvBnFuse, ConvElementwiseFuse, ElementwiseAddActivationFuse, FcFuse,
    FusionPass, InterpolateFuse, QuantDequantFuse, ShuffleChannelFuse,
    TransposeSoftmaxTransposeFuse,
};
use super::{
    ArgumentTypeDisplayPass, IdentityScaleEliminatePass, IoCopyKernelPickPass, MemoryOptimizePass,
    Pass, RuntimeContextAssignPass, StaticKernelPickPass, TypeCastPass,
    VariablePlaceInferencePass,
};
use crate::core::{CastKind, CompileError, CompileResult};
use hashbrown::HashMap;

#[derive(Default)]
pub struct PassRegistry {
    passes: Vec<Box<dyn Pass>>,
    index: HashMap<&'static str, usize>,
}

impl PassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in pass. Accelerator-offload passes need a
    /// backend and are registered by the caller.
    pub fn with_builtin_passes() -> CompileResult<Self> {
        let mut registry = Self::new();
        registry
            .register(Box::new(FusionPass::new(QuantDequantFuse)))?
            .register(Box::new(FusionPass::new(ConvElementwiseFuse)))?
            .register(Box::new(FusionPass::new(ConvBnFuse)))?
            .register(Box::new(FusionPass::new(ConvActivationFuse)))?
            .register(Box::new(FusionPass::new(FcFuse)))?
            .register(Box::new(FusionPass::new(ShuffleChannelFuse)))?
            .register(Box::new(FusionPass::new(TransposeSoftmaxTransposeFuse)))?
            .register(Box::new(FusionPass::new(InterpolateFuse)))?
            .register(Box::new(IdentityScaleEliminatePass))?
            .register(Box::new(FusionPass::new(ElementwiseAddActivationFuse)))?
            .register(Box::new(StaticKernelPickPass))?
            .register(Box::new(VariablePlaceInferencePass))?
            .register(Box::new(ArgumentTypeDisplayPass))?
            .register(Box::new(TypeCastPass::new(CastKind::Target)))?
            .register(Box::new(TypeCastPass::new(CastKind::Precision)))?
            .register(Box::new(TypeCastPass::new(CastKind::Layout)))?
            .register(Box::new(IoCopyKernelPickPass))?
            .register(Box::new(RuntimeContextAssignPass))?
            .register(Box::new(MemoryOptimizePass))?;
        Ok(registry)
    }

    /// Register a pass under its name. Names are unique.
    pub fn register(&mut self, pass: Box<dyn Pass>) -> CompileResult<&mut Self> {
        let name = pass.name();
        if self.index.contains_key(name) {
            return Err(CompileError::DuplicatePass {
                name: name.to_string(),
            });
        }
        log::trace!("Registering pass {}", name);
        self.index.insert(name, self.passes.len());
        self.passes.push(pass);
        Ok(self)
    }

    pub fn look_up(&self, name: &str) -> Option<&dyn Pass> {
        self.index.get(name).map(|&i| self.passes[i].as_ref())
    }

    /// Look up a pass whose absence cannot be tolerated.
    pub fn require(&self, name: &str) -> CompileResult<&dyn Pass> {
        self.look_up(name)
            .ok_or_else(|| CompileError::RequiredPassMissing {
                name: name.to_string(),
            })
    }

    /// Registered names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.passes.iter().map(|p| p.name())
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }
}

impl std::fmt::Debug for PassRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passes::{DEFAULT_PASSES, TYPE_TARGET_CAST_PASS};

    #[test]
    fn test_builtin_registry_covers_default_pipeline() {
        let registry = PassRegistry::with_builtin_passes().unwrap();
        for name in DEFAULT_PASSES {
            assert!(registry.look_up(name).is_some(), "{} not registered", name);
        }
        assert!(registry.require(TYPE_TARGET_CAST_PASS).is_ok());
        assert!(registry.look_up("generate_npu_program_pass").is_none());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = PassRegistry::new();
        registry.register(Box::new(StaticKernelPickPass)).unwrap();
        let err = registry.register(Box::new(StaticKernelPickPass)).unwrap_err();
        assert_eq!(
            err,
            CompileError::DuplicatePass {
                name: "static_kernel_pick_pass".into()
            }
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_require_missing() {
        let registry = PassRegistry::new();
        assert!(matches!(
            registry.require("type_target_cast_pass"),
            Err(CompileError::RequiredPassMissing { .. })
        ));
    }
}
