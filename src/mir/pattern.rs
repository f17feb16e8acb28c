//! Chain pattern matching over operator nodes.
//!
//! A chain is a sequence of operator steps where each step consumes one
//! output of the previous step through a named slot:
//!
//! ```text
//! conv2d --Output->Input-- batch_norm --Y->X-- relu
//! ```
//!
//! Every intermediate argument must have exactly one consumer (the next step)
//! and must not be persistable, so the chain can be collapsed without
//! observable side effects. Matches never overlap.

use super::{NodeId, SsaGraph};
use hashbrown::HashSet;

/// How one step hands its result to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub from_output: &'static str,
    pub to_input: &'static str,
}

/// A linear operator pattern.
#[derive(Debug, Clone)]
pub struct ChainPattern {
    steps: Vec<&'static [&'static str]>,
    links: Vec<Link>,
}

/// One occurrence of a chain in the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainMatch {
    /// Matched operators, one per step.
    pub stmts: Vec<NodeId>,
    /// Intermediate arguments, one per link.
    pub links: Vec<NodeId>,
}

impl ChainPattern {
    /// Start a chain whose first step is any of `op_types`.
    pub fn starting_with(op_types: &'static [&'static str]) -> Self {
        Self {
            steps: vec![op_types],
            links: Vec::new(),
        }
    }

    /// Append a step consuming the previous step's `from_output` in its `to_input`.
    pub fn then(
        mut self,
        from_output: &'static str,
        to_input: &'static str,
        op_types: &'static [&'static str],
    ) -> Self {
        self.links.push(Link {
            from_output,
            to_input,
        });
        self.steps.push(op_types);
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// All non-overlapping occurrences, in the creation order of their first operator.
    pub fn find_all(&self, graph: &SsaGraph) -> Vec<ChainMatch> {
        let mut used = HashSet::new();
        let mut matches = Vec::new();
        for start in graph.stmt_ids() {
            if used.contains(&start) {
                continue;
            }
            if let Some(found) = self.match_from(graph, start) {
                if found.stmts.iter().any(|s| used.contains(s)) {
                    continue;
                }
                used.extend(found.stmts.iter().copied());
                matches.push(found);
            }
        }
        matches
    }

    fn match_from(&self, graph: &SsaGraph, start: NodeId) -> Option<ChainMatch> {
        let first = graph.stmt(start).ok()?;
        if !self.steps.first()?.iter().any(|t| *t == first.op_type()) {
            return None;
        }

        let mut stmts = vec![start];
        let mut links = Vec::new();
        let mut current = start;
        for (link, op_types) in self.links.iter().zip(self.steps.iter().skip(1)) {
            let stmt = graph.stmt(current).ok()?;
            let [out_name] = stmt.op.output(link.from_output) else {
                return None;
            };
            let out = graph.arg_id(out_name)?;
            let arg = graph.arg(out).ok()?;
            if arg.persistable {
                return None;
            }
            let [next] = graph.consumers(out) else {
                return None;
            };
            let next_stmt = graph.stmt(*next).ok()?;
            if !op_types.iter().any(|t| *t == next_stmt.op_type())
                || !next_stmt.op.input(link.to_input).iter().any(|n| n == out_name)
            {
                return None;
            }
            links.push(out);
            stmts.push(*next);
            current = *next;
        }
        Some(ChainMatch { stmts, links })
    }
}
