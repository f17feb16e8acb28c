// This module implements the operator fusion passes. A FusePattern describes one fusion:
// the chains of operators it looks for, an acceptance check on the matched operators'
// arguments and attributes (a weight must be persistable, a permutation must be its own
// inverse, ...), and the rewrite producing the single fused operator descriptor.
// FusionPass adapts any FusePattern to the Pass trait: it enumerates the non-overlapping
// chain matches, asks the pattern to accept and rewrite each one, and collapses the matched
// operators through SsaGraph::replace_subgraph. Matches whose replacement would leave a
// dangling argument (an intermediate result read outside the chain, an extra output that
// someone consumes) are skipped rather than treated as errors, so a fusion only ever fires
// where it is unobservable. Fusions run before kernel selection; the fused operator starts
// without a kernel.

//! Pattern-driven operator fusion.

use super::{Pass, PassContext};
use crate::core::{CompileError, CompileResult, TargetType};
use crate::mir::{ChainMatch, ChainPattern, SsaGraph};
use crate::program::{Attribute, OpDesc};

/// One fusion: what to match and what to replace it with.
pub trait FusePattern: Send + Sync {
    fn name(&self) -> &'static str;

    fn bound_targets(&self) -> &[TargetType] {
        &[TargetType::Any]
    }

    fn bound_kernels(&self) -> &[&'static str] {
        &[]
    }

    /// Chains to look for, tried in order.
    fn chains(&self) -> Vec<ChainPattern>;

    /// Whether a structural match is semantically fusable.
    fn accept(&self, _graph: &SsaGraph, _found: &ChainMatch) -> CompileResult<bool> {
        Ok(true)
    }

    /// The operator replacing the matched chain.
    fn rewrite(&self, graph: &SsaGraph, found: &ChainMatch) -> CompileResult<OpDesc>;
}

/// Runs a [`FusePattern`] over the graph.
pub struct FusionPass<P> {
    pattern: P,
}

impl<P: FusePattern> FusionPass<P> {
    pub fn new(pattern: P) -> Self {
        Self { pattern }
    }

    pub fn pattern(&self) -> &P {
        &self.pattern
    }
}

impl<P: FusePattern> Pass for FusionPass<P> {
    fn name(&self) -> &'static str {
        self.pattern.name()
    }

    fn bound_targets(&self) -> &[TargetType] {
        self.pattern.bound_targets()
    }

    fn bound_kernels(&self) -> &[&'static str] {
        self.pattern.bound_kernels()
    }

    fn apply(&self, graph: &mut SsaGraph, cx: &mut PassContext<'_>) -> CompileResult<()> {
        let mut fused = 0;
        for chain in self.pattern.chains() {
            for found in chain.find_all(graph) {
                if !found.stmts.iter().all(|&s| graph.contains(s)) {
                    continue;
                }
                if !self.pattern.accept(graph, &found)? {
                    continue;
                }
                let op = self.pattern.rewrite(graph, &found)?;
                if !graph.can_replace_subgraph(&found.stmts, &op) {
                    log::debug!("   {}: match at {} is not isolated, skipped", self.name(), found.stmts[0]);
                    continue;
                }
                let op_type = op.op_type().to_string();
                let id = graph.replace_subgraph(&found.stmts, op)?;
                log::debug!("   fused {} operators into {} {}", found.stmts.len(), op_type, id);
                cx.session.record_fused(self.name(), found.stmts.len() - 1);
                fused += 1;
            }
        }
        if fused > 0 {
            log::info!("   {} fusions", fused);
        }
        Ok(())
    }
}

fn step<'g>(graph: &'g SsaGraph, found: &ChainMatch, index: usize) -> CompileResult<&'g OpDesc> {
    let id = found.stmts.get(index).copied().ok_or_else(|| CompileError::InvalidState {
        reason: format!("chain match has no step {}", index),
    })?;
    Ok(&graph.stmt(id)?.op)
}

fn single_input<'o>(op: &'o OpDesc, slot: &str) -> CompileResult<&'o str> {
    match op.input(slot) {
        [name] => Ok(name),
        other => Err(malformed(op, "input", slot, other.len())),
    }
}

fn single_output<'o>(op: &'o OpDesc, slot: &str) -> CompileResult<&'o str> {
    match op.output(slot) {
        [name] => Ok(name),
        other => Err(malformed(op, "output", slot, other.len())),
    }
}

fn malformed(op: &OpDesc, kind: &str, slot: &str, found: usize) -> CompileError {
    CompileError::MalformedProgram {
        reason: format!("`{}` {} `{}` holds {} arguments, expected one", op.op_type(), kind, slot, found),
    }
}

fn is_weight(graph: &SsaGraph, name: &str) -> bool {
    graph
        .arg_id(name)
        .and_then(|id| graph.arg(id).ok())
        .is_some_and(|arg| arg.persistable)
}

fn has_single_weight(graph: &SsaGraph, op: &OpDesc, slot: &str) -> bool {
    matches!(op.input(slot), [name] if is_weight(graph, name))
}

const CONV_OPS: &[&str] = &["conv2d", "depthwise_conv2d"];

/// Fake quantize, quantized operator, fake dequantize into one int8 operator.
pub struct QuantDequantFuse;

const QUANT_OPS: &[&str] = &["fake_quantize_range_abs_max", "fake_quantize_moving_average_abs_max"];
const DEQUANT_OPS: &[&str] = &["fake_dequantize_max_abs"];

impl FusePattern for QuantDequantFuse {
    fn name(&self) -> &'static str {
        "lite_quant_dequant_fuse_pass"
    }

    fn chains(&self) -> Vec<ChainPattern> {
        vec![
            ChainPattern::starting_with(QUANT_OPS)
                .then("Out", "Input", CONV_OPS)
                .then("Output", "X", DEQUANT_OPS),
            ChainPattern::starting_with(QUANT_OPS)
                .then("Out", "X", &["mul"])
                .then("Out", "X", DEQUANT_OPS),
        ]
    }

    fn rewrite(&self, graph: &SsaGraph, found: &ChainMatch) -> CompileResult<OpDesc> {
        let quant = step(graph, found, 0)?;
        let quantized = step(graph, found, 1)?;
        let dequant = step(graph, found, 2)?;
        let out_slot = if quantized.op_type() == "mul" { "Out" } else { "Output" };

        let mut op = quantized.clone();
        op.rename_input(single_output(quant, "Out")?, single_input(quant, "X")?);
        op.rename_output(single_output(quantized, out_slot)?, single_output(dequant, "Out")?);
        op.set_attr("enable_int8", Attribute::Bool(true));
        let bits = quant.attr("bit_length").and_then(Attribute::as_int).unwrap_or(8);
        op.set_attr("bit_length", Attribute::Int(bits));
        if let Some(range) = dequant.attr("max_range") {
            op.set_attr("max_range", range.clone());
        }
        Ok(op)
    }
}

/// Convolution followed by a bias add becomes a biased convolution.
pub struct ConvElementwiseFuse;

impl FusePattern for ConvElementwiseFuse {
    fn name(&self) -> &'static str {
        "lite_conv_elementwise_fuse_pass"
    }

    fn chains(&self) -> Vec<ChainPattern> {
        vec![ChainPattern::starting_with(&["conv2d", "depthwise_conv2d", "conv2d_transpose"])
            .then("Output", "X", &["elementwise_add"])]
    }

    fn accept(&self, graph: &SsaGraph, found: &ChainMatch) -> CompileResult<bool> {
        let conv = step(graph, found, 0)?;
        let add = step(graph, found, 1)?;
        Ok(conv.input("Bias").is_empty() && has_single_weight(graph, add, "Y"))
    }

    fn rewrite(&self, graph: &SsaGraph, found: &ChainMatch) -> CompileResult<OpDesc> {
        let conv = step(graph, found, 0)?;
        let add = step(graph, found, 1)?;
        let mut op = conv.clone();
        op.set_input("Bias", vec![single_input(add, "Y")?.to_string()]);
        op.rename_output(single_output(conv, "Output")?, single_output(add, "Out")?);
        Ok(op)
    }
}

/// Convolution followed by inference batch norm folds the normalization into the convolution.
pub struct ConvBnFuse;

const BN_PARAMS: &[(&str, &str)] = &[
    ("Scale", "BnScale"),
    ("Bias", "BnBias"),
    ("Mean", "BnMean"),
    ("Variance", "BnVariance"),
];

impl FusePattern for ConvBnFuse {
    fn name(&self) -> &'static str {
        "lite_conv_bn_fuse_pass"
    }

    fn chains(&self) -> Vec<ChainPattern> {
        vec![ChainPattern::starting_with(CONV_OPS).then("Output", "X", &["batch_norm"])]
    }

    fn accept(&self, graph: &SsaGraph, found: &ChainMatch) -> CompileResult<bool> {
        let bn = step(graph, found, 1)?;
        Ok(BN_PARAMS.iter().all(|(slot, _)| has_single_weight(graph, bn, slot)))
    }

    fn rewrite(&self, graph: &SsaGraph, found: &ChainMatch) -> CompileResult<OpDesc> {
        let conv = step(graph, found, 0)?;
        let bn = step(graph, found, 1)?;
        let mut op = conv.clone();
        for (bn_slot, conv_slot) in BN_PARAMS {
            op.set_input(conv_slot, vec![single_input(bn, bn_slot)?.to_string()]);
        }
        op.rename_output(single_output(conv, "Output")?, single_output(bn, "Y")?);
        op.set_attr("fuse_batch_norm", Attribute::Bool(true));
        let epsilon = bn.attr("epsilon").and_then(Attribute::as_float).unwrap_or(1e-5);
        op.set_attr("epsilon", Attribute::Float(epsilon));
        Ok(op)
    }
}

/// Convolution followed by an activation.
pub struct ConvActivationFuse;

impl FusePattern for ConvActivationFuse {
    fn name(&self) -> &'static str {
        "lite_conv_activation_fuse_pass"
    }

    fn chains(&self) -> Vec<ChainPattern> {
        vec![ChainPattern::starting_with(CONV_OPS).then("Output", "X", &["relu", "relu6", "leaky_relu"])]
    }

    fn accept(&self, graph: &SsaGraph, found: &ChainMatch) -> CompileResult<bool> {
        let conv = step(graph, found, 0)?;
        Ok(!conv.attr("with_act").and_then(Attribute::as_bool).unwrap_or(false))
    }

    fn rewrite(&self, graph: &SsaGraph, found: &ChainMatch) -> CompileResult<OpDesc> {
        let conv = step(graph, found, 0)?;
        let act = step(graph, found, 1)?;
        let mut op = conv.clone();
        op.rename_output(single_output(conv, "Output")?, single_output(act, "Out")?);
        op.set_attr("with_act", Attribute::Bool(true));
        op.set_attr("act_type", Attribute::Str(act.op_type().to_string()));
        match act.op_type() {
            "leaky_relu" => {
                let alpha = act.attr("alpha").and_then(Attribute::as_float).unwrap_or(0.02);
                op.set_attr("leaky_relu_alpha", Attribute::Float(alpha));
            }
            "relu6" => {
                let threshold = act.attr("threshold").and_then(Attribute::as_float).unwrap_or(6.0);
                op.set_attr("relu6_threshold", Attribute::Float(threshold));
            }
            _ => {}
        }
        Ok(op)
    }
}

/// Matrix multiply with a weight plus a bias add becomes a fully connected layer.
pub struct FcFuse;

impl FusePattern for FcFuse {
    fn name(&self) -> &'static str {
        "lite_fc_fuse_pass"
    }

    fn chains(&self) -> Vec<ChainPattern> {
        vec![ChainPattern::starting_with(&["mul"]).then("Out", "X", &["elementwise_add"])]
    }

    fn accept(&self, graph: &SsaGraph, found: &ChainMatch) -> CompileResult<bool> {
        let mul = step(graph, found, 0)?;
        let add = step(graph, found, 1)?;
        Ok(has_single_weight(graph, mul, "Y") && has_single_weight(graph, add, "Y"))
    }

    fn rewrite(&self, graph: &SsaGraph, found: &ChainMatch) -> CompileResult<OpDesc> {
        let mul = step(graph, found, 0)?;
        let add = step(graph, found, 1)?;
        let in_num_col_dims = mul.attr("x_num_col_dims").and_then(Attribute::as_int).unwrap_or(1);
        Ok(OpDesc::new("fc")
            .with_input("Input", [single_input(mul, "X")?])
            .with_input("W", [single_input(mul, "Y")?])
            .with_input("Bias", [single_input(add, "Y")?])
            .with_output("Out", [single_output(add, "Out")?])
            .with_attr("in_num_col_dims", Attribute::Int(in_num_col_dims)))
    }
}

/// reshape, transpose of the group axes, reshape back: a channel shuffle.
pub struct ShuffleChannelFuse;

const SHUFFLE_PERM: &[i64] = &[0, 2, 1, 3, 4];

impl FusePattern for ShuffleChannelFuse {
    fn name(&self) -> &'static str {
        "lite_shuffle_channel_fuse_pass"
    }

    fn chains(&self) -> Vec<ChainPattern> {
        vec![ChainPattern::starting_with(&["reshape", "reshape2"])
            .then("Out", "X", &["transpose", "transpose2"])
            .then("Out", "X", &["reshape", "reshape2"])]
    }

    fn accept(&self, graph: &SsaGraph, found: &ChainMatch) -> CompileResult<bool> {
        let reshape = step(graph, found, 0)?;
        let transpose = step(graph, found, 1)?;
        let shape_ok = reshape
            .attr("shape")
            .and_then(Attribute::as_ints)
            .is_some_and(|shape| shape.len() == 5);
        let perm_ok = transpose.attr("axis").and_then(Attribute::as_ints) == Some(SHUFFLE_PERM);
        Ok(shape_ok && perm_ok)
    }

    fn rewrite(&self, graph: &SsaGraph, found: &ChainMatch) -> CompileResult<OpDesc> {
        let first = step(graph, found, 0)?;
        let last = step(graph, found, 2)?;
        let group = first
            .attr("shape")
            .and_then(Attribute::as_ints)
            .and_then(|shape| shape.get(1).copied())
            .ok_or_else(|| CompileError::MalformedProgram {
                reason: format!("`{}` has no group dimension in `shape`", first.op_type()),
            })?;
        Ok(OpDesc::new("shuffle_channel")
            .with_input("X", [single_input(first, "X")?])
            .with_output("Out", [single_output(last, "Out")?])
            .with_attr("group", Attribute::Int(group)))
    }
}

/// transpose, softmax over the last axis, the same transpose: softmax over the permuted axis.
pub struct TransposeSoftmaxTransposeFuse;

fn is_involution(perm: &[i64]) -> bool {
    perm.iter().enumerate().all(|(i, &p)| {
        usize::try_from(p)
            .ok()
            .and_then(|p| perm.get(p))
            .is_some_and(|&back| back == i as i64)
    })
}

impl FusePattern for TransposeSoftmaxTransposeFuse {
    fn name(&self) -> &'static str {
        "lite_transpose_softmax_transpose_fuse_pass"
    }

    fn chains(&self) -> Vec<ChainPattern> {
        vec![ChainPattern::starting_with(&["transpose", "transpose2"])
            .then("Out", "X", &["softmax"])
            .then("Out", "X", &["transpose", "transpose2"])]
    }

    fn accept(&self, graph: &SsaGraph, found: &ChainMatch) -> CompileResult<bool> {
        let first = step(graph, found, 0)?.attr("axis").and_then(Attribute::as_ints);
        let softmax_axis = step(graph, found, 1)?.attr("axis").and_then(Attribute::as_int).unwrap_or(-1);
        let last = step(graph, found, 2)?.attr("axis").and_then(Attribute::as_ints);
        Ok(match (first, last) {
            (Some(first), Some(last)) => {
                !first.is_empty() && first == last && is_involution(first) && softmax_axis == -1
            }
            _ => false,
        })
    }

    fn rewrite(&self, graph: &SsaGraph, found: &ChainMatch) -> CompileResult<OpDesc> {
        let first = step(graph, found, 0)?;
        let last = step(graph, found, 2)?;
        let axis = first
            .attr("axis")
            .and_then(Attribute::as_ints)
            .and_then(|perm| perm.last().copied())
            .ok_or_else(|| CompileError::MalformedProgram {
                reason: format!("`{}` has no permutation", first.op_type()),
            })?;
        Ok(OpDesc::new("softmax")
            .with_input("X", [single_input(first, "X")?])
            .with_output("Out", [single_output(last, "Out")?])
            .with_attr("axis", Attribute::Int(axis)))
    }
}

/// Output size computed from the input's own shape turns into a scale attribute.
pub struct InterpolateFuse;

impl FusePattern for InterpolateFuse {
    fn name(&self) -> &'static str {
        "lite_interpolate_fuse_pass"
    }

    fn chains(&self) -> Vec<ChainPattern> {
        vec![ChainPattern::starting_with(&["shape"])
            .then("Out", "Input", &["slice"])
            .then("Out", "X", &["scale"])
            .then("Out", "OutSize", &["bilinear_interp", "nearest_interp"])]
    }

    fn accept(&self, graph: &SsaGraph, found: &ChainMatch) -> CompileResult<bool> {
        let shape = step(graph, found, 0)?;
        let interp = step(graph, found, 3)?;
        Ok(matches!((shape.input("Input"), interp.input("X")), ([a], [b]) if a == b))
    }

    fn rewrite(&self, graph: &SsaGraph, found: &ChainMatch) -> CompileResult<OpDesc> {
        let scale = step(graph, found, 2)?;
        let interp = step(graph, found, 3)?;
        let factor = scale.attr("scale").and_then(Attribute::as_float).unwrap_or(1.0);
        let mut op = interp.clone();
        op.remove_input("OutSize");
        op.set_attr("scale", Attribute::Float(factor));
        Ok(op)
    }
}

/// Elementwise add with a relu epilogue, where a fused kernel exists.
pub struct ElementwiseAddActivationFuse;

const FUSED_ADD_ACT: &str = "fusion_elementwise_add_activation";

impl FusePattern for ElementwiseAddActivationFuse {
    fn name(&self) -> &'static str {
        "lite_elementwise_add_activation_fuse_pass"
    }

    fn bound_targets(&self) -> &[TargetType] {
        &[TargetType::Arm, TargetType::Cuda]
    }

    fn bound_kernels(&self) -> &[&'static str] {
        &[FUSED_ADD_ACT]
    }

    fn chains(&self) -> Vec<ChainPattern> {
        vec![ChainPattern::starting_with(&["elementwise_add"]).then("Out", "X", &["relu"])]
    }

    fn rewrite(&self, graph: &SsaGraph, found: &ChainMatch) -> CompileResult<OpDesc> {
        let add = step(graph, found, 0)?;
        let act = step(graph, found, 1)?;
        let mut op = OpDesc::new(FUSED_ADD_ACT)
            .with_input("X", [single_input(add, "X")?])
            .with_input("Y", [single_input(add, "Y")?])
            .with_output("Out", [single_output(act, "Out")?])
            .with_attr("act_type", Attribute::Str(act.op_type().to_string()));
        if let Some(axis) = add.attr("axis") {
            op.set_attr("axis", axis.clone());
        }
        Ok(op)
    }
}
