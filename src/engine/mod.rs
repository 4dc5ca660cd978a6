//! Dependency-graph wiring: relationship classification, deduplicated
//! construction, and subscription edges.
//!
//! The graph is built exactly once per peripheral, after all of its variables
//! exist. Variables and relationships are both nodes; a `Subscribes` edge runs
//! from a source variable to every relationship that must re-evaluate when it
//! changes, and an `Updates` edge runs from a relationship to each variable it
//! writes. After wiring, the graph structure is immutable - only the propagation
//! state cell changes at runtime.

use std::cell::RefCell;

use anyhow::Context;
use derive_more::Display;
use fxhash::FxHashMap;
use petgraph::graph::NodeIndex;
use petgraph::prelude::StableGraph;
use petgraph::visit::EdgeRef;
use tracing::{debug, warn};

use crate::errors::{WeaveError, WeaveResult};
use crate::expr::{is_clock_indexed, Expr};
use crate::model::{Namespace, Variable};

mod propagate;
mod resolve;
#[cfg(test)]
mod tests;

pub(crate) use propagate::PropagationState;

/// Closed set of runtime relationship kinds. Classification folds the
/// declarative fields into these four; one dispatch function covers them all.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash)]
pub enum RelationshipKind {
    /// Scalar controller with `target`: its own value is the reference string.
    #[display("Target")]
    Target,
    /// Choice controller with `target`: the selected choice's reference drives
    /// one or more targets.
    #[display("ChoiceFanOut")]
    ChoiceFanOut,
    /// A variable's own reference/enabledBy/errorIf/unlockedBy/min/max set,
    /// recomputed together.
    #[display("SelfUpdate")]
    SelfUpdate,
    /// Per-choice enabledBy expressions gating a choice list.
    #[display("DynamicChoices")]
    DynamicChoices,
}

/// One wired relationship. `owner` is the monitored variable the relationship
/// was classified from; `targets` are the variables it writes (`None` marks a
/// disabled fan-out slot that is never updated).
#[derive(Clone, Debug)]
pub struct Relationship {
    pub kind: RelationshipKind,
    pub owner: String,
    pub targets: Vec<Option<String>>,
}

impl Relationship {
    pub fn identity(&self) -> String {
        relationship_identity(self.kind, &self.owner)
    }
}

fn relationship_identity(kind: RelationshipKind, owner: &str) -> String {
    format!("{kind}#{owner}")
}

#[derive(Debug)]
enum GraphItem {
    Variable(String),
    Relationship(Relationship),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum EdgeKind {
    Subscribes,
    Updates,
}

/// The wired dependency graph for one peripheral, plus the synchronous
/// propagation runtime that drives it.
#[derive(Debug)]
pub struct DependencyGraph {
    graph: StableGraph<GraphItem, EdgeKind>,
    variables: FxHashMap<String, NodeIndex>,
    registry: FxHashMap<String, NodeIndex>,
    /// Relationship nodes in creation order.
    order: Vec<NodeIndex>,
    propagation: RefCell<Option<PropagationState>>,
}

impl DependencyGraph {
    /// Wire dependency relationships for every monitored variable of the
    /// namespace. Invoked exactly once, after all variables exist; each newly
    /// created relationship is seeded with one initial evaluation.
    ///
    /// Structural problems (a monitored variable with no dynamic parameters,
    /// unresolved keys, fan-out length mismatches) abort the whole setup.
    pub fn wire(ns: &Namespace) -> WeaveResult<Self> {
        let mut graph = DependencyGraph {
            graph: StableGraph::default(),
            variables: FxHashMap::default(),
            registry: FxHashMap::default(),
            order: Vec::new(),
            propagation: RefCell::new(None),
        };
        for key in ns.monitored_keys() {
            graph
                .wire_monitored_variable(ns, &key)
                .with_context(|| format!("wiring monitored variable '{key}'"))?;
        }
        Ok(graph)
    }

    fn wire_monitored_variable(&mut self, ns: &Namespace, key: &str) -> WeaveResult<()> {
        let var = ns.snapshot(key)?;
        let mut action_found = false;

        if var.target().is_some() {
            action_found = true;
            if var.is_choice() {
                self.wire_choice_fan_out(ns, &var)?;
            } else {
                self.wire_scalar_target(ns, &var)?;
            }
        }
        if let Some(reference) = var.reference() {
            self.wire_self_expression(ns, &var, reference)?;
            action_found = true;
        }
        if let Some(expression) = var.enabled_by() {
            self.wire_self_expression(ns, &var, expression)?;
            action_found = true;
        }
        if let Some(expression) = var.error_if() {
            self.wire_self_expression(ns, &var, expression)?;
            action_found = true;
        }
        if let Some(expression) = var.unlocked_by() {
            self.wire_self_expression(ns, &var, expression)?;
            action_found = true;
        }
        if var.is_numeric() && var.has_bound_expressions() {
            for expression in [var.min_expression(), var.max_expression()].into_iter().flatten() {
                self.wire_self_expression(ns, &var, expression)?;
            }
            action_found = true;
        }
        if var.is_choice() {
            let dynamic: Vec<String> = var
                .choices()
                .iter()
                .filter_map(|c| c.enabled_by.clone())
                .collect();
            if !dynamic.is_empty() {
                let rel = self.get_or_create(
                    ns,
                    RelationshipKind::DynamicChoices,
                    var.key(),
                    vec![Some(var.key().to_string())],
                )?;
                for expression in &dynamic {
                    self.subscribe_expression(ns, rel, expression, &var)?;
                }
                action_found = true;
            }
        }

        if !action_found {
            return Err(WeaveError::NoDynamicParameters {
                key: var.key().to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Scalar controller: its string value is the reference, `target` names the
    /// single controlled variable.
    fn wire_scalar_target(&mut self, ns: &Namespace, var: &Variable) -> WeaveResult<()> {
        let target_name = var.target().unwrap_or_default();
        let target_key = ns.resolve_key(target_name);
        if !ns.contains(&target_key) {
            return Err(WeaveError::UndefinedVariable { key: target_key })
                .with_context(|| format!("target of '{}'", var.key()));
        }

        let rel = self.get_or_create(
            ns,
            RelationshipKind::Target,
            var.key(),
            vec![Some(target_key)],
        )?;

        // The controller's own value is the expression, so watch the controller
        // and everything the expression references.
        self.subscribe(var.key(), rel);
        let reference = var.value().to_string();
        self.subscribe_expression(ns, rel, &reference, var)?;
        Ok(())
    }

    /// Choice controller: `target` splits on `;` into fan-out slots, each
    /// choice's reference must provide one expression per slot.
    fn wire_choice_fan_out(&mut self, ns: &Namespace, var: &Variable) -> WeaveResult<()> {
        let target = var.target().unwrap_or_default();
        let mut slots = Vec::new();
        for token in target.split(';').map(str::trim) {
            if token.eq_ignore_ascii_case("disabled")
                || (token.is_empty() && var.is_clock_selector())
            {
                slots.push(None);
                continue;
            }
            let target_key = ns.resolve_key(token);
            if !ns.contains(&target_key) {
                return Err(WeaveError::UndefinedVariable { key: target_key })
                    .with_context(|| format!("target of '{}'", var.key()));
            }
            slots.push(Some(target_key));
        }
        let slot_count = slots.len();

        let rel = self.get_or_create(ns, RelationshipKind::ChoiceFanOut, var.key(), slots)?;

        // Watch the selection itself plus every identifier in every choice, so
        // upstream changes re-evaluate the currently selected branch without
        // requiring re-selection.
        self.subscribe(var.key(), rel);
        for choice in var.choices() {
            let reference = match choice.reference.as_deref() {
                Some(r) if !r.trim().is_empty() => r,
                _ => {
                    return Err(WeaveError::MissingChoiceReference {
                        choice: choice.name.clone(),
                        key: var.key().to_string(),
                    }
                    .into())
                }
            };
            let expressions: Vec<&str> = reference.split(';').collect();
            if expressions.len() != slot_count {
                return Err(WeaveError::FanOutMismatch {
                    key: var.key().to_string(),
                    targets: slot_count,
                    expressions: expressions.len(),
                }
                .into());
            }
            for expression in expressions {
                self.subscribe_expression(ns, rel, expression, var)?;
            }
        }
        Ok(())
    }

    /// Any self-relationship expression funnels into the variable's single
    /// SelfUpdate relationship.
    fn wire_self_expression(
        &mut self,
        ns: &Namespace,
        var: &Variable,
        expression: &str,
    ) -> WeaveResult<()> {
        let rel = self.get_or_create(
            ns,
            RelationshipKind::SelfUpdate,
            var.key(),
            vec![Some(var.key().to_string())],
        )?;
        self.subscribe_expression(ns, rel, expression, var)
    }

    /// Keyed relationship construction: at most one instance and at most one
    /// seed evaluation per (kind, owner), however many expressions request it.
    fn get_or_create(
        &mut self,
        ns: &Namespace,
        kind: RelationshipKind,
        owner: &str,
        targets: Vec<Option<String>>,
    ) -> WeaveResult<NodeIndex> {
        let identity = relationship_identity(kind, owner);
        if let Some(&existing) = self.registry.get(&identity) {
            return Ok(existing);
        }

        let node = self.graph.add_node(GraphItem::Relationship(Relationship {
            kind,
            owner: owner.to_string(),
            targets: targets.clone(),
        }));
        for target in targets.into_iter().flatten() {
            let target_node = self.variable_node(&target);
            self.graph.add_edge(node, target_node, EdgeKind::Updates);
        }
        self.registry.insert(identity.clone(), node);
        self.order.push(node);

        // Seed the initial state with a null change source. Evaluation failures
        // here are isolated like any other runtime failure; a cycle is
        // structural and aborts the wiring pass.
        debug!(relationship = %identity, "created, seeding initial evaluation");
        if let Err(error) = self.run_relationship(ns, node, None) {
            if propagate::is_cycle(&error) {
                return Err(error).with_context(|| format!("seeding '{identity}'"));
            }
            warn!(relationship = %identity, %error, "seed evaluation failed");
        }

        Ok(node)
    }

    /// Subscribe a relationship to every identifier the expression references.
    /// Identifiers must name existing variables and must not be clock-indexed;
    /// the reference-string prefix and sentinel forms subscribe to nothing.
    fn subscribe_expression(
        &mut self,
        ns: &Namespace,
        rel: NodeIndex,
        expression: &str,
        owner: &Variable,
    ) -> WeaveResult<()> {
        let expression = expression.trim();
        if expression.is_empty() || expression.eq_ignore_ascii_case("disabled") {
            return Ok(());
        }
        // Only the last `#`-delimited segment is an expression.
        let expression = expression.rsplit('#').next().unwrap_or(expression).trim();
        if expression.is_empty() {
            return Ok(());
        }
        let parsed = Expr::parse(expression)
            .with_context(|| format!("expression of '{}'", owner.key()))?;
        for ident in parsed.identifiers() {
            if is_clock_indexed(&ident) {
                return Err(WeaveError::IndexedIdentifier {
                    ident,
                    key: owner.key().to_string(),
                }
                .into());
            }
            let source = ns.resolve_key(&ident);
            if !ns.contains(&source) {
                return Err(WeaveError::UndefinedVariable { key: source })
                    .with_context(|| format!("expression of '{}'", owner.key()));
            }
            self.subscribe(&source, rel);
        }
        Ok(())
    }

    fn subscribe(&mut self, source: &str, rel: NodeIndex) {
        let source_node = self.variable_node(source);
        if self.graph.find_edge(source_node, rel).is_none() {
            self.graph.add_edge(source_node, rel, EdgeKind::Subscribes);
        }
    }

    fn variable_node(&mut self, key: &str) -> NodeIndex {
        if let Some(&node) = self.variables.get(key) {
            return node;
        }
        let node = self.graph.add_node(GraphItem::Variable(key.to_string()));
        self.variables.insert(key.to_string(), node);
        node
    }

    pub(crate) fn relationship_at(&self, node: NodeIndex) -> &Relationship {
        match &self.graph[node] {
            GraphItem::Relationship(rel) => rel,
            GraphItem::Variable(key) => unreachable!("variable node '{key}' where relationship expected"),
        }
    }

    // Introspection.

    /// Relationships in creation order.
    pub fn relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.order.iter().map(|&node| self.relationship_at(node))
    }

    pub fn relationship(&self, kind: RelationshipKind, owner: &str) -> Option<&Relationship> {
        self.registry
            .get(&relationship_identity(kind, owner))
            .map(|&node| self.relationship_at(node))
    }

    /// Source variable keys a relationship is subscribed to, in subscription
    /// order.
    pub fn sources(&self, kind: RelationshipKind, owner: &str) -> Vec<String> {
        let Some(&rel_node) = self.registry.get(&relationship_identity(kind, owner)) else {
            return Vec::new();
        };
        let mut sources: Vec<String> = self
            .graph
            .edges_directed(rel_node, petgraph::Direction::Incoming)
            .filter(|e| *e.weight() == EdgeKind::Subscribes)
            .map(|e| match &self.graph[e.source()] {
                GraphItem::Variable(key) => key.clone(),
                GraphItem::Relationship(rel) => unreachable!("relationship '{}' as source", rel.identity()),
            })
            .collect();
        // petgraph iterates edges most-recent-first.
        sources.reverse();
        sources
    }
}
