// This module implements SsaGraph, the bipartite dataflow graph every pass reads and
// mutates. Nodes live in an index arena (Vec<Option<Node>>) addressed by NodeId; removed
// nodes leave a hole so ids stay stable for the lifetime of the graph. Argument nodes are
// deduplicated by name through a name index. The graph is built once from a ProgramDesc:
// every operator becomes a statement node, every referenced argument must be declared in
// the program's variable list, and each argument may have at most one producer (the
// `fetch` marker's output holder is external and not wired). An operator that writes an
// argument it also reads gets a fresh `<name>/inplace` version for its output, and later
// readers of the name read that version. A build that still ends up cyclic is rejected.
// Mutation primitives keep the
// links symmetric and refuse to leave dangling edges: insert_stmt_on_edge splices a new
// operator and a fresh argument into one producer/consumer edge (cast insertion),
// redirect_consumer moves a consumer to another argument (cast reuse), remove_node only
// removes unlinked nodes, and replace_subgraph collapses a set of operators into one
// (fusion, accelerator offload). Topological iteration uses Kahn's algorithm over the
// statements with ties broken by node id, so schedules are deterministic; its scratch
// state is arena-allocated.

//! The SSA graph and its mutation primitives.

use super::memory::MemoryPlan;
use super::node::{Arg, Node, NodeId, NodeKind, Stmt};
use crate::core::{
    layout_compatible, precision_compatible, target_compatible, CastKind, CompileError,
    CompileResult, Place, TargetType,
};
use crate::program::{feed_fetch::FETCH_OP, OpDesc, ProgramDesc};
use bumpalo::collections::Vec as BumpVec;
use bumpalo::Bump;
use hashbrown::{HashMap, HashSet};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;

/// Operator/argument dataflow graph of one compiled program.
#[derive(Debug, Clone)]
pub struct SsaGraph {
    nodes: Vec<Option<Node>>,
    args: HashMap<String, NodeId>,
    valid_places: Vec<Place>,
    memory_plan: Option<MemoryPlan>,
}

/// One producer-or-consumer edge whose endpoints disagree on placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacementMismatch {
    pub stmt: NodeId,
    pub arg: NodeId,
    pub expected: Place,
    pub actual: Place,
}

impl SsaGraph {
    /// Build the graph from a flat operator list.
    pub fn build(program: &ProgramDesc, valid_places: &[Place]) -> CompileResult<Self> {
        if valid_places.is_empty() {
            return Err(CompileError::EmptyValidPlaces);
        }

        let declared: HashMap<&str, bool> = program
            .vars
            .iter()
            .map(|v| (v.name.as_str(), v.persistable))
            .collect();

        let mut graph = Self {
            nodes: Vec::with_capacity(program.ops.len() * 2 + program.vars.len()),
            args: HashMap::new(),
            valid_places: valid_places.to_vec(),
            memory_plan: None,
        };

        // Program name -> name of its latest in-place version.
        let mut versions: HashMap<String, String> = HashMap::new();
        for op in &program.ops {
            let mut op = op.clone();
            for (name, version) in &versions {
                op.rename_input(name, version);
            }
            let in_place: Vec<String> = op
                .output_arg_names()
                .filter(|name| {
                    let current = versions.get(*name).map_or(*name, String::as_str);
                    op.input_arg_names().any(|input| input == current)
                })
                .map(str::to_string)
                .collect();
            for name in in_place {
                let version = graph.fresh_version_name(&declared, &name);
                op.rename_output(&name, &version);
                versions.insert(name, version);
            }

            let stmt = graph.push(NodeKind::Stmt(Stmt::new(op.clone(), valid_places.to_vec())));

            for name in op.input_arg_names() {
                let arg = graph.declared_arg(&declared, &versions, op.op_type(), name)?;
                graph.link(arg, stmt)?;
            }

            for name in op.output_arg_names() {
                if op.op_type() == FETCH_OP {
                    if !declared.contains_key(name) {
                        return Err(CompileError::UndeclaredArgument {
                            op_type: op.op_type().to_string(),
                            arg: name.to_string(),
                        });
                    }
                    continue;
                }
                let arg = graph.declared_arg(&declared, &versions, op.op_type(), name)?;
                if let Some(producer) = graph.producer(arg) {
                    return Err(CompileError::DuplicateProducer {
                        arg: name.to_string(),
                        first: graph.stmt(producer)?.op_type().to_string(),
                        second: op.op_type().to_string(),
                    });
                }
                graph.link(stmt, arg)?;
            }
        }

        // Out-of-order producers can still close a loop.
        graph.stmt_topological_order()?;

        log::debug!(
            "Built SSA graph: {} operators, {} arguments",
            graph.num_stmts(),
            graph.num_args()
        );
        Ok(graph)
    }

    fn declared_arg(
        &mut self,
        declared: &HashMap<&str, bool>,
        versions: &HashMap<String, String>,
        op_type: &str,
        name: &str,
    ) -> CompileResult<NodeId> {
        if let Some(&id) = self.args.get(name) {
            return Ok(id);
        }
        let base = versions
            .iter()
            .find(|(_, version)| version.as_str() == name)
            .map_or(name, |(base, _)| base.as_str());
        let persistable = declared
            .get(base)
            .copied()
            .ok_or_else(|| CompileError::UndeclaredArgument {
                op_type: op_type.to_string(),
                arg: name.to_string(),
            })?;
        let id = self.push(NodeKind::Arg(Arg::new(name, persistable)));
        self.args.insert(name.to_string(), id);
        Ok(id)
    }

    /// Name for the value an operator writes into an argument it also reads.
    fn fresh_version_name(&self, declared: &HashMap<&str, bool>, name: &str) -> String {
        let base = format!("{}/inplace", name);
        let taken = |candidate: &String| {
            self.args.contains_key(candidate) || declared.contains_key(candidate.as_str())
        };
        if !taken(&base) {
            return base;
        }
        (1..)
            .map(|i| format!("{}_{}", base, i))
            .find(|candidate| !taken(candidate))
            .unwrap_or(base)
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Some(Node::new(kind)));
        id
    }

    // ---------------------------------------------------------------------
    // Valid places
    // ---------------------------------------------------------------------

    /// Replace the ranked placement list. Operators get the new list as candidates.
    pub fn set_valid_places(&mut self, places: &[Place]) -> CompileResult<()> {
        if places.is_empty() {
            return Err(CompileError::EmptyValidPlaces);
        }
        self.valid_places = places.to_vec();
        for node in self.nodes.iter_mut().flatten() {
            if let Some(stmt) = node.stmt_mut() {
                stmt.valid_places = places.to_vec();
            }
        }
        Ok(())
    }

    pub fn valid_places(&self) -> &[Place] {
        &self.valid_places
    }

    /// Distinct targets of the valid places, in rank order.
    pub fn valid_targets(&self) -> Vec<TargetType> {
        let mut targets = Vec::new();
        for place in &self.valid_places {
            if !targets.contains(&place.target) {
                targets.push(place.target);
            }
        }
        targets
    }

    // ---------------------------------------------------------------------
    // Read access
    // ---------------------------------------------------------------------

    pub fn node(&self, id: NodeId) -> CompileResult<&Node> {
        self.nodes
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or(CompileError::NodeNotFound { node: id.index() })
    }

    pub fn node_mut(&mut self, id: NodeId) -> CompileResult<&mut Node> {
        self.nodes
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(CompileError::NodeNotFound { node: id.index() })
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_ok()
    }

    pub fn stmt(&self, id: NodeId) -> CompileResult<&Stmt> {
        self.node(id)?.stmt().ok_or_else(|| not_a(id, "an operator"))
    }

    pub fn stmt_mut(&mut self, id: NodeId) -> CompileResult<&mut Stmt> {
        self.node_mut(id)?
            .stmt_mut()
            .ok_or_else(|| not_a(id, "an operator"))
    }

    pub fn arg(&self, id: NodeId) -> CompileResult<&Arg> {
        self.node(id)?.arg().ok_or_else(|| not_a(id, "an argument"))
    }

    pub fn arg_mut(&mut self, id: NodeId) -> CompileResult<&mut Arg> {
        self.node_mut(id)?
            .arg_mut()
            .ok_or_else(|| not_a(id, "an argument"))
    }

    /// All live nodes in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_ref().map(|n| (NodeId(i as u32), n)))
    }

    /// Operator nodes in creation order.
    pub fn stmt_ids(&self) -> Vec<NodeId> {
        self.nodes()
            .filter(|(_, n)| n.is_stmt())
            .map(|(id, _)| id)
            .collect()
    }

    /// Argument nodes in creation order.
    pub fn arg_ids(&self) -> Vec<NodeId> {
        self.nodes()
            .filter(|(_, n)| n.is_arg())
            .map(|(id, _)| id)
            .collect()
    }

    pub fn num_stmts(&self) -> usize {
        self.nodes().filter(|(_, n)| n.is_stmt()).count()
    }

    pub fn num_args(&self) -> usize {
        self.args.len()
    }

    pub fn arg_id(&self, name: &str) -> Option<NodeId> {
        self.args.get(name).copied()
    }

    /// Producer statement of an argument.
    pub fn producer(&self, arg: NodeId) -> Option<NodeId> {
        self.node(arg).ok().and_then(|n| n.inlinks.first().copied())
    }

    /// Consumer statements of an argument.
    pub fn consumers(&self, arg: NodeId) -> &[NodeId] {
        self.node(arg).map(Node::outlinks).unwrap_or(&[])
    }

    pub fn memory_plan(&self) -> Option<&MemoryPlan> {
        self.memory_plan.as_ref()
    }

    pub fn set_memory_plan(&mut self, plan: MemoryPlan) {
        self.memory_plan = Some(plan);
    }

    /// Operator nodes in a deterministic topological order.
    pub fn stmt_topological_order(&self) -> CompileResult<Vec<NodeId>> {
        let arena = Bump::new();
        let mut pending = BumpVec::with_capacity_in(self.nodes.len(), &arena);
        pending.resize(self.nodes.len(), 0usize);

        let mut ready = BinaryHeap::new();
        let mut total = 0;
        for (id, node) in self.nodes() {
            if !node.is_stmt() {
                continue;
            }
            total += 1;
            let deps = node
                .inlinks
                .iter()
                .filter(|arg| self.producer(**arg).is_some())
                .count();
            pending[id.index()] = deps;
            if deps == 0 {
                ready.push(Reverse(id));
            }
        }

        let mut order = Vec::with_capacity(total);
        while let Some(Reverse(id)) = ready.pop() {
            order.push(id);
            for &arg in self.node(id)?.outlinks() {
                for &consumer in self.node(arg)?.outlinks() {
                    let left = &mut pending[consumer.index()];
                    *left = left.saturating_sub(1);
                    if *left == 0 {
                        ready.push(Reverse(consumer));
                    }
                }
            }
        }

        if order.len() != total {
            return Err(CompileError::GraphCycle {
                remaining: total - order.len(),
            });
        }
        Ok(order)
    }

    /// Graph-local argument name derived from `base` that is not yet taken.
    pub fn fresh_arg_name(&self, base: &str) -> String {
        if !self.args.contains_key(base) {
            return base.to_string();
        }
        (1..)
            .map(|i| format!("{}_{}", base, i))
            .find(|name| !self.args.contains_key(name))
            .unwrap_or_else(|| base.to_string())
    }

    /// Edges whose argument placement is incompatible with the operator's kernel.
    ///
    /// Operators without a picked kernel and arguments without a placement are not checked.
    pub fn placement_mismatches(&self) -> Vec<PlacementMismatch> {
        let mut mismatches = Vec::new();
        for (arg_id, node) in self.nodes() {
            let Some(actual) = node.arg().and_then(|a| a.place) else {
                continue;
            };
            let producers = node.inlinks.iter().map(|s| (*s, true));
            let consumers = node.outlinks.iter().map(|s| (*s, false));
            for (stmt_id, is_producer) in producers.chain(consumers) {
                let Some(kernel) = self.stmt(stmt_id).ok().and_then(|s| s.kernel.as_ref()) else {
                    continue;
                };
                let expected = if is_producer {
                    kernel.output_place()
                } else {
                    kernel.input_place()
                };
                if !expected.compatible_with(&actual) {
                    mismatches.push(PlacementMismatch {
                        stmt: stmt_id,
                        arg: arg_id,
                        expected,
                        actual,
                    });
                }
            }
        }
        mismatches
    }

    /// Check that every link has its mirror and that the graph stays bipartite.
    pub fn check_links(&self) -> CompileResult<()> {
        for (id, node) in self.nodes() {
            for &next in &node.outlinks {
                let other = self.node(next).map_err(|_| dangling(id, next))?;
                if other.is_stmt() == node.is_stmt() || !other.inlinks.contains(&id) {
                    return Err(dangling(id, next));
                }
            }
            for &prev in &node.inlinks {
                let other = self.node(prev).map_err(|_| dangling(prev, id))?;
                if other.is_stmt() == node.is_stmt() || !other.outlinks.contains(&id) {
                    return Err(dangling(prev, id));
                }
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Mutation primitives
    // ---------------------------------------------------------------------

    fn link(&mut self, from: NodeId, to: NodeId) -> CompileResult<()> {
        let out = &mut self.node_mut(from)?.outlinks;
        if !out.contains(&to) {
            out.push(to);
        }
        let inl = &mut self.node_mut(to)?.inlinks;
        if !inl.contains(&from) {
            inl.push(from);
        }
        Ok(())
    }

    fn unlink(&mut self, from: NodeId, to: NodeId) -> CompileResult<()> {
        self.node_mut(from)?.outlinks.retain(|n| *n != to);
        self.node_mut(to)?.inlinks.retain(|n| *n != from);
        Ok(())
    }

    /// Add an unlinked argument node with a name not used in the graph.
    pub fn add_arg(&mut self, name: &str, persistable: bool) -> CompileResult<NodeId> {
        if self.args.contains_key(name) {
            return Err(CompileError::MalformedProgram {
                reason: format!("argument `{}` already exists", name),
            });
        }
        let id = self.push(NodeKind::Arg(Arg::new(name, persistable)));
        self.args.insert(name.to_string(), id);
        Ok(id)
    }

    /// Move `consumer` from reading `from` to reading `to`, renaming its input.
    pub fn redirect_consumer(&mut self, from: NodeId, to: NodeId, consumer: NodeId) -> CompileResult<()> {
        if !self.node(from)?.outlinks.contains(&consumer) {
            return Err(dangling(from, consumer));
        }
        let from_name = self.arg(from)?.name.clone();
        let to_name = self.arg(to)?.name.clone();
        self.stmt_mut(consumer)?.op.rename_input(&from_name, &to_name);
        self.unlink(from, consumer)?;
        self.link(to, consumer)
    }

    /// Splice `op` into the edge `arg -> consumer`.
    ///
    /// `op` must read `arg` and write `new_arg_name`, which must be fresh. The
    /// consumer is rewired to the new argument. Returns the new operator and
    /// argument nodes.
    pub fn insert_stmt_on_edge(
        &mut self,
        arg: NodeId,
        consumer: NodeId,
        op: OpDesc,
        new_arg_name: &str,
    ) -> CompileResult<(NodeId, NodeId)> {
        if !self.node(arg)?.outlinks.contains(&consumer) {
            return Err(dangling(arg, consumer));
        }
        let arg_name = self.arg(arg)?.name.clone();
        if !op.input_arg_names().any(|n| n == arg_name) {
            return Err(CompileError::MalformedProgram {
                reason: format!("inserted `{}` does not read `{}`", op.op_type(), arg_name),
            });
        }
        if !op.output_arg_names().any(|n| n == new_arg_name) {
            return Err(CompileError::MalformedProgram {
                reason: format!("inserted `{}` does not write `{}`", op.op_type(), new_arg_name),
            });
        }

        let new_arg = self.add_arg(new_arg_name, false)?;
        let stmt = self.push(NodeKind::Stmt(Stmt::new(op, self.valid_places.clone())));
        self.link(arg, stmt)?;
        self.link(stmt, new_arg)?;
        self.redirect_consumer(arg, new_arg, consumer)?;
        Ok((stmt, new_arg))
    }

    /// Remove a node. The node must have no remaining links.
    pub fn remove_node(&mut self, id: NodeId) -> CompileResult<()> {
        let node = self.node(id)?;
        if !node.inlinks.is_empty() || !node.outlinks.is_empty() {
            return Err(CompileError::DanglingEdge {
                node: id.index(),
                reason: format!(
                    "{} inlinks and {} outlinks remain",
                    node.inlinks.len(),
                    node.outlinks.len()
                ),
            });
        }
        let name = node.arg().map(|a| a.name.clone());
        if let Some(name) = name {
            self.args.remove(&name);
        }
        self.nodes[id.index()] = None;
        Ok(())
    }

    /// Whether `replace_subgraph(stmts, op)` would succeed.
    pub fn can_replace_subgraph(&self, stmts: &[NodeId], op: &OpDesc) -> bool {
        self.plan_replace(stmts, op).is_ok()
    }

    /// Replace the operators `stmts` by one operator `op`.
    ///
    /// Arguments `op` references become its inputs and outputs; they must
    /// exist already. Every other argument touched by `stmts` is internal and
    /// is removed, so it must not be used outside the replaced set. Outputs
    /// of `op` must not be produced outside the set and inputs must not be
    /// produced inside it. Nothing is mutated when validation fails.
    pub fn replace_subgraph(&mut self, stmts: &[NodeId], op: OpDesc) -> CompileResult<NodeId> {
        let plan = self.plan_replace(stmts, &op)?;

        for &id in &plan.stmts {
            let node = self.node(id)?;
            let ins = node.inlinks.clone();
            let outs = node.outlinks.clone();
            for arg in ins {
                self.unlink(arg, id)?;
            }
            for arg in outs {
                self.unlink(id, arg)?;
            }
        }
        for &arg in &plan.internal {
            self.remove_node(arg)?;
        }
        for &id in &plan.stmts {
            self.remove_node(id)?;
        }

        let fused = self.push(NodeKind::Stmt(Stmt::new(op, self.valid_places.clone())));
        for arg in plan.inputs {
            self.link(arg, fused)?;
        }
        for arg in plan.outputs {
            self.link(fused, arg)?;
        }
        Ok(fused)
    }

    fn plan_replace(&self, stmts: &[NodeId], op: &OpDesc) -> CompileResult<ReplacePlan> {
        let mut set: Vec<NodeId> = stmts.to_vec();
        set.sort();
        set.dedup();
        if set.is_empty() {
            return Err(CompileError::MalformedProgram {
                reason: format!("empty subgraph replaced by `{}`", op.op_type()),
            });
        }
        let members: HashSet<NodeId> = set.iter().copied().collect();

        let mut touched = Vec::new();
        for &id in &set {
            let node = self.node(id)?;
            if !node.is_stmt() {
                return Err(not_a(id, "an operator"));
            }
            for &arg in node.inlinks.iter().chain(node.outlinks.iter()) {
                if !touched.contains(&arg) {
                    touched.push(arg);
                }
            }
        }

        let resolve = |name: &str| {
            self.arg_id(name).ok_or_else(|| CompileError::UndeclaredArgument {
                op_type: op.op_type().to_string(),
                arg: name.to_string(),
            })
        };
        let inputs = op.input_arg_names().map(resolve).collect::<CompileResult<Vec<_>>>()?;
        let outputs = op.output_arg_names().map(resolve).collect::<CompileResult<Vec<_>>>()?;

        for &input in &inputs {
            if self.producer(input).is_some_and(|p| members.contains(&p)) {
                return Err(CompileError::MalformedProgram {
                    reason: format!(
                        "`{}` reads `{}`, which the replaced subgraph produces",
                        op.op_type(),
                        self.arg(input)?.name
                    ),
                });
            }
        }
        for &out in &outputs {
            if let Some(producer) = self.producer(out) {
                if !members.contains(&producer) {
                    return Err(CompileError::DuplicateProducer {
                        arg: self.arg(out)?.name.clone(),
                        first: self.stmt(producer)?.op_type().to_string(),
                        second: op.op_type().to_string(),
                    });
                }
            }
            if inputs.contains(&out) {
                return Err(CompileError::MalformedProgram {
                    reason: format!("`{}` would consume its own output", op.op_type()),
                });
            }
        }

        let mut internal = Vec::new();
        for &arg in &touched {
            if inputs.contains(&arg) || outputs.contains(&arg) {
                continue;
            }
            let node = self.node(arg)?;
            let escapes = node
                .inlinks
                .iter()
                .chain(node.outlinks.iter())
                .any(|s| !members.contains(s));
            if escapes {
                return Err(CompileError::DanglingEdge {
                    node: arg.index(),
                    reason: format!(
                        "argument `{}` is still used outside the replaced subgraph",
                        self.arg(arg)?.name
                    ),
                });
            }
            internal.push(arg);
        }

        Ok(ReplacePlan {
            stmts: set,
            inputs,
            outputs,
            internal,
        })
    }
}

struct ReplacePlan {
    stmts: Vec<NodeId>,
    inputs: Vec<NodeId>,
    outputs: Vec<NodeId>,
    internal: Vec<NodeId>,
}

fn not_a(id: NodeId, what: &str) -> CompileError {
    CompileError::InvalidState {
        reason: format!("node {} is not {}", id, what),
    }
}

fn dangling(from: NodeId, to: NodeId) -> CompileError {
    CompileError::DanglingEdge {
        node: from.index(),
        reason: format!("no edge {} -> {}", from, to),
    }
}

/// Whether two places agree on the field a cast stage converts.
pub fn stage_compatible(stage: CastKind, a: &Place, b: &Place) -> bool {
    match stage {
        CastKind::Target => target_compatible(a.target, b.target),
        CastKind::Precision => precision_compatible(a.precision, b.precision),
        CastKind::Layout => layout_compatible(a.layout, b.layout),
    }
}

impl fmt::Display for SsaGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, node) in self.nodes() {
            if node.is_stmt() {
                writeln!(f, "{} {}", id, node)?;
            }
        }
        for (id, node) in self.nodes() {
            if node.is_arg() {
                writeln!(f, "{} {}", id, node)?;
            }
        }
        Ok(())
    }
}
