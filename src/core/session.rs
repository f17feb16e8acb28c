// This module provides the per-compilation session that records what the pass pipeline
// did. CompileSession owns the pass trace (one PassEvent per requested pass: applied, or
// skipped with the reason) and the SessionStats counters that passes bump as they rewrite
// the graph: kernels picked, cast nodes inserted per stage, operator nodes fused, memory
// slots reused, subgraphs offloaded. The trace mirrors the info-level log lines emitted by
// the pipeline so explainability does not depend on capturing logs. The session lives as
// long as the Optimizer that created it and is read back through Optimizer::session().

//! Compilation session: pass trace and statistics.

use std::collections::BTreeMap;
use std::fmt;

/// Why a pass was not applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The name is not in the pass registry.
    NotFound,
    /// None of the pass's bound targets is among the valid places.
    TargetMismatch,
    /// None of the pass's bound kernels is registered for the active targets.
    KernelMismatch,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotFound => write!(f, "the pass isn't found"),
            SkipReason::TargetMismatch => write!(f, "the target does not match"),
            SkipReason::KernelMismatch => write!(f, "the kernel does not match"),
        }
    }
}

/// Outcome of one requested pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Applied,
    Skipped(SkipReason),
}

/// One line of the pass trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassEvent {
    pub pass: String,
    pub outcome: PassOutcome,
}

impl fmt::Display for PassEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            PassOutcome::Applied => write!(f, "{}: applied", self.pass),
            PassOutcome::Skipped(reason) => write!(f, "{}: skipped because {}", self.pass, reason),
        }
    }
}

/// Kind of conversion a cast node performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CastKind {
    Target,
    Precision,
    Layout,
}

impl fmt::Display for CastKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CastKind::Target => write!(f, "target"),
            CastKind::Precision => write!(f, "precision"),
            CastKind::Layout => write!(f, "layout"),
        }
    }
}

/// Compilation session for one Optimizer run.
#[derive(Debug, Default)]
pub struct CompileSession {
    trace: Vec<PassEvent>,
    stats: SessionStats,
}

impl CompileSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a pass ran.
    pub fn record_applied(&mut self, pass: &str) {
        self.stats.passes_applied += 1;
        self.trace.push(PassEvent {
            pass: pass.to_string(),
            outcome: PassOutcome::Applied,
        });
    }

    /// Record that a pass was skipped.
    pub fn record_skipped(&mut self, pass: &str, reason: SkipReason) {
        self.stats.passes_skipped += 1;
        self.trace.push(PassEvent {
            pass: pass.to_string(),
            outcome: PassOutcome::Skipped(reason),
        });
    }

    pub fn record_kernel_picked(&mut self) {
        self.stats.kernels_picked += 1;
    }

    pub fn record_cast_inserted(&mut self, kind: CastKind) {
        *self.stats.casts_inserted.entry(kind).or_insert(0) += 1;
    }

    /// Record a fusion that removed `removed` operator nodes from the graph.
    pub fn record_fused(&mut self, pass: &str, removed: usize) {
        self.stats.nodes_fused += removed;
        *self.stats.fusions.entry(pass.to_string()).or_insert(0) += 1;
    }

    pub fn record_slots_reused(&mut self, count: usize) {
        self.stats.slots_reused += count;
    }

    pub fn record_subgraph_offloaded(&mut self) {
        self.stats.subgraphs_offloaded += 1;
    }

    /// Pass trace in execution order.
    pub fn trace(&self) -> &[PassEvent] {
        &self.trace
    }

    /// Get compilation statistics.
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }
}

/// Compilation session statistics.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    /// Passes applied.
    pub passes_applied: usize,

    /// Passes skipped (missing or not applicable).
    pub passes_skipped: usize,

    /// Kernel bindings made by pick passes.
    pub kernels_picked: usize,

    /// Cast nodes inserted per stage.
    pub casts_inserted: BTreeMap<CastKind, usize>,

    /// Operator nodes removed by fusion.
    pub nodes_fused: usize,

    /// Fusions applied per pass.
    pub fusions: BTreeMap<String, usize>,

    /// Arguments that share a storage slot with an earlier one.
    pub slots_reused: usize,

    /// Subgraphs replaced by device programs.
    pub subgraphs_offloaded: usize,
}

impl SessionStats {
    pub fn casts(&self, kind: CastKind) -> usize {
        self.casts_inserted.get(&kind).copied().unwrap_or(0)
    }
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Compilation Session Statistics:")?;
        writeln!(f, "  Passes applied: {}", self.passes_applied)?;
        writeln!(f, "  Passes skipped: {}", self.passes_skipped)?;
        writeln!(f, "  Kernels picked: {}", self.kernels_picked)?;
        writeln!(f, "  Nodes fused: {}", self.nodes_fused)?;
        writeln!(f, "  Slots reused: {}", self.slots_reused)?;
        writeln!(f, "  Subgraphs offloaded: {}", self.subgraphs_offloaded)?;

        if !self.casts_inserted.is_empty() {
            writeln!(f, "  Casts inserted:")?;
            for (kind, count) in &self.casts_inserted {
                writeln!(f, "    {}: {}", kind, count)?;
            }
        }

        if !self.fusions.is_empty() {
            writeln!(f, "  Fusions:")?;
            let mut sorted: Vec<_> = self.fusions.iter().collect();
            sorted.sort_by_key(|(_, count)| std::cmp::Reverse(**count));
            for (pass, count) in sorted {
                writeln!(f, "    {}: {}", pass, count)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_creation() {
        let session = CompileSession::new();
        assert!(session.trace().is_empty());
        assert_eq!(session.stats().passes_applied, 0);
        assert_eq!(session.stats().casts(CastKind::Target), 0);
    }

    #[test]
    fn test_session_trace() {
        let mut session = CompileSession::new();
        session.record_applied("static_kernel_pick_pass");
        session.record_skipped("missing_pass", SkipReason::NotFound);

        let trace = session.trace();
        assert_eq!(trace.len(), 2);
        assert_eq!(trace[0].to_string(), "static_kernel_pick_pass: applied");
        assert_eq!(
            trace[1].to_string(),
            "missing_pass: skipped because the pass isn't found"
        );
        assert_eq!(session.stats().passes_applied, 1);
        assert_eq!(session.stats().passes_skipped, 1);
    }

    #[test]
    fn test_statistics_display() {
        let mut session = CompileSession::new();
        session.record_cast_inserted(CastKind::Target);
        session.record_cast_inserted(CastKind::Target);
        session.record_fused("lite_fc_fuse_pass", 2);

        let output = format!("{}", session.stats());
        assert!(output.contains("target: 2"));
        assert!(output.contains("lite_fc_fuse_pass: 1"));
        assert!(output.contains("Nodes fused: 2"));
    }
}
