//! Runtime context assignment.
//!
//! Every operator gets the execution context its kernel's target needs:
//! host-family kernels run on the host context, CUDA kernels on a CUDA
//! stream (copies on the dedicated io stream so transfers overlap with
//! compute), other accelerators on their device context.

use super::{Pass, PassContext, RUNTIME_CONTEXT_ASSIGN_PASS};
use crate::core::{CompileError, CompileResult, TargetType};
use crate::kernel::KernelDesc;
use crate::mir::{KernelContext, SsaGraph};

pub const CUDA_EXEC_STREAM: u32 = 0;
pub const CUDA_IO_STREAM: u32 = 1;

pub struct RuntimeContextAssignPass;

/// Context for a kernel.
pub fn context_for(kernel: &KernelDesc) -> KernelContext {
    match kernel.target() {
        TargetType::Cuda => {
            let stream = if kernel.op_type().starts_with("io_copy") {
                CUDA_IO_STREAM
            } else {
                CUDA_EXEC_STREAM
            };
            KernelContext::Cuda { stream }
        }
        t if t.is_host_family() || t == TargetType::Any => KernelContext::Host,
        target => KernelContext::Device { target },
    }
}

impl Pass for RuntimeContextAssignPass {
    fn name(&self) -> &'static str {
        RUNTIME_CONTEXT_ASSIGN_PASS
    }

    fn apply(&self, graph: &mut SsaGraph, _cx: &mut PassContext<'_>) -> CompileResult<()> {
        for id in graph.stmt_ids() {
            let stmt = graph.stmt_mut(id)?;
            let kernel = stmt.kernel.as_ref().ok_or_else(|| CompileError::UnpickedKernel {
                op_type: stmt.op.op_type().to_string(),
            })?;
            let context = context_for(kernel);
            log::trace!("   {} runs on {}", stmt.op.op_type(), context);
            stmt.context = Some(context);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contexts() {
        let conv = KernelDesc::new("conv2d", "cuda/float/NCHW".parse().unwrap(), "def");
        assert_eq!(context_for(&conv), KernelContext::Cuda { stream: CUDA_EXEC_STREAM });

        let copy = KernelDesc::new("io_copy", "cuda/any/any".parse().unwrap(), "host_to_device");
        assert_eq!(context_for(&copy), KernelContext::Cuda { stream: CUDA_IO_STREAM });

        let relu = KernelDesc::new("relu", "arm/float/NCHW".parse().unwrap(), "def");
        assert_eq!(context_for(&relu), KernelContext::Host);

        let npu = KernelDesc::new("graph_op", "npu/float/NCHW".parse().unwrap(), "def");
        assert_eq!(
            context_for(&npu),
            KernelContext::Device {
                target: TargetType::Npu
            }
        );
    }
}
