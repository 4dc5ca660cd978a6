//! Synchronous propagation runtime.
//!
//! A change notification is a plain function-call chain: a relationship's
//! update mutates a target variable, which fires that target's own
//! relationships before the call returns. No queue, no scheduler. The
//! outermost notification owns a propagation state holding the path of
//! variable keys currently on the call stack; re-entering a key on that path
//! is a dependency cycle and fails fast instead of overflowing the stack.
//! Mutators report whether state actually changed and propagation only
//! recurses on real changes, so diamond fan-in converges without tripping the
//! path guard.

use indexmap::IndexSet;
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use scopeguard::{defer, guard, ScopeGuard};
use tracing::{error, trace};

use crate::engine::{DependencyGraph, EdgeKind, GraphItem, RelationshipKind};
use crate::errors::{WeaveError, WeaveResult};
use crate::expr::Expr;
use crate::model::{Namespace, Status, Value};

#[derive(Debug)]
pub(crate) struct PropagationState {
    /// Variable keys on the current propagation stack.
    path: IndexSet<String>,
}

impl PropagationState {
    pub(crate) fn new() -> Self {
        PropagationState {
            path: IndexSet::new(),
        }
    }
}

pub(crate) fn is_cycle(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<WeaveError>(),
        Some(WeaveError::DependencyCycle { .. })
    )
}

impl DependencyGraph {
    /// Set a variable's value and synchronously propagate the change through
    /// every relationship wired to it.
    pub fn set_value<K: AsRef<str>>(
        &self,
        ns: &Namespace,
        key: K,
        value: Value,
    ) -> WeaveResult<()> {
        let key = ns.resolve_key(key);
        if ns.update(&key, |v| v.set_value(value))? {
            self.notify_changed(ns, &key)?;
        }
        Ok(())
    }

    /// Select a choice by name on a choice variable and propagate.
    pub fn select_choice<K: AsRef<str>, C: AsRef<str>>(
        &self,
        ns: &Namespace,
        key: K,
        choice: C,
    ) -> WeaveResult<()> {
        let key = ns.resolve_key(key);
        let index = ns
            .snapshot(&key)?
            .choice_index(choice.as_ref())
            .ok_or_else(|| WeaveError::UnknownChoice {
                key: key.clone(),
                choice: choice.as_ref().to_string(),
            })?;
        if ns.update(&key, |v| v.select_index(index))? {
            self.notify_changed(ns, &key)?;
        }
        Ok(())
    }

    /// Re-enter the propagation runtime for a variable that changed. Invokes
    /// every subscribed relationship in registration order; evaluation errors
    /// are isolated at this boundary, cycles are not.
    pub(crate) fn notify_changed(&self, ns: &Namespace, key: &str) -> WeaveResult<()> {
        // The outermost notification owns the propagation state; recursive
        // entries defuse the teardown guard.
        let scope = guard((), |()| {
            self.propagation.borrow_mut().take();
        });
        {
            let mut state = self.propagation.borrow_mut();
            if state.is_none() {
                *state = Some(PropagationState::new());
            } else {
                ScopeGuard::into_inner(scope);
            }
        }

        {
            let mut state = self.propagation.borrow_mut();
            let path = &mut state.as_mut().unwrap().path;
            if !path.insert(key.to_string()) {
                return Err(WeaveError::DependencyCycle {
                    key: key.to_string(),
                }
                .into());
            }
        }
        defer! {
            if let Some(state) = self.propagation.borrow_mut().as_mut() {
                state.path.shift_remove(key);
            }
        }

        trace!(%key, "propagating change");
        for rel_node in self.subscribers_of(key) {
            if let Err(err) = self.run_relationship(ns, rel_node, Some(key)) {
                if is_cycle(&err) {
                    return Err(err);
                }
                // Bulkhead: one malformed expression must not freeze the rest
                // of the configuration surface.
                let rel = self.relationship_at(rel_node);
                error!(relationship = %rel.identity(), error = %err, "relationship evaluation failed");
            }
        }
        Ok(())
    }

    /// Relationship nodes subscribed to a variable, in registration order.
    fn subscribers_of(&self, key: &str) -> Vec<NodeIndex> {
        let Some(&var_node) = self.variables.get(key) else {
            return Vec::new();
        };
        let mut subscribers: Vec<NodeIndex> = self
            .graph
            .edges(var_node)
            .filter(|e| *e.weight() == EdgeKind::Subscribes)
            .map(|e| e.target())
            .collect();
        // petgraph iterates edges most-recent-first.
        subscribers.reverse();
        subscribers
    }

    /// Single dispatch point over the closed relationship set. `source` is the
    /// variable whose change triggered the run, `None` for the seed
    /// evaluation.
    pub(crate) fn run_relationship(
        &self,
        ns: &Namespace,
        rel_node: NodeIndex,
        source: Option<&str>,
    ) -> WeaveResult<()> {
        let rel = match &self.graph[rel_node] {
            GraphItem::Relationship(rel) => rel.clone(),
            GraphItem::Variable(key) => unreachable!("variable node '{key}' dispatched"),
        };
        trace!(relationship = %rel.identity(), source = source.unwrap_or("<seed>"), "run");

        match rel.kind {
            RelationshipKind::Target => {
                let controller = ns.snapshot(&rel.owner)?;
                let reference = controller.value().to_string();
                let target = rel.targets[0].as_deref();
                self.update_target(ns, &controller, target, &reference)
            }
            RelationshipKind::ChoiceFanOut => self.run_choice_fan_out(ns, &rel),
            RelationshipKind::SelfUpdate => self.run_self_update(ns, &rel.owner),
            RelationshipKind::DynamicChoices => self.run_dynamic_choices(ns, &rel.owner),
        }
    }

    /// Fan the selected choice's `;`-joined reference out over the
    /// relationship's target slots.
    fn run_choice_fan_out(
        &self,
        ns: &Namespace,
        rel: &crate::engine::Relationship,
    ) -> WeaveResult<()> {
        let controller = ns.snapshot(&rel.owner)?;
        let choice = controller
            .selected_choice()
            .ok_or_else(|| WeaveError::UnknownChoice {
                key: rel.owner.clone(),
                choice: format!("#{}", controller.selection()),
            })?;
        let reference = choice
            .reference
            .clone()
            .ok_or_else(|| WeaveError::MissingChoiceReference {
                choice: choice.name.clone(),
                key: rel.owner.clone(),
            })?;

        let expressions: Vec<&str> = reference.split(';').map(str::trim).collect();
        if expressions.len() != rel.targets.len() {
            // Validated at wiring time; re-checked here so a bad runtime state
            // surfaces as an isolated, logged failure.
            return Err(WeaveError::FanOutMismatch {
                key: rel.owner.clone(),
                targets: rel.targets.len(),
                expressions: expressions.len(),
            }
            .into());
        }
        for (expression, slot) in expressions.iter().zip(&rel.targets) {
            let Some(target) = slot.as_deref() else {
                continue;
            };
            self.update_target(ns, &controller, Some(target), expression)?;
        }
        Ok(())
    }

    /// Recompute a variable's whole self-relationship set: reference,
    /// enabledBy, errorIf, unlockedBy, then bounds.
    fn run_self_update(&self, ns: &Namespace, key: &str) -> WeaveResult<()> {
        let var = ns.snapshot(key)?;

        // A blank reference resolves to nothing and clears stale provenance.
        let mut clear_origin = false;
        let mut info = match var.reference() {
            Some(reference) => match self.determine_update(ns, &var, Some(&var), reference)? {
                Some(info) => info,
                None => {
                    clear_origin = true;
                    Default::default()
                }
            },
            None => Default::default(),
        };

        if let Some(expression) = var.enabled_by() {
            let enabled = Expr::parse(expression)?.evaluate(ns)?.as_bool()?;
            if !enabled {
                info.status = Some(Status::info(var.enabled_by_message()));
            }
            // The gate can only veto; enablement inherited from the primary
            // stands.
            info.enable &= enabled;
        }
        if let Some(expression) = var.error_if() {
            if Expr::parse(expression)?.evaluate(ns)?.as_bool()? {
                // The error wins over the informational disabled-reason.
                info.status = Some(Status::error(var.error_if_message()));
            }
        }

        let mut changed = false;
        if let Some(expression) = var.unlocked_by() {
            let unlocked = Expr::parse(expression)?.evaluate(ns)?.as_bool()?;
            changed |= ns.update(key, |v| v.set_locked(!unlocked))?;
        }

        changed |= ns.update(key, |v| v.enable(info.enable))?;
        changed |= ns.update(key, |v| v.set_status(info.status.clone()))?;
        if let Some(value) = info.value {
            changed |= ns.update(key, |v| v.set_value(value))?;
        }
        if let Some(origin) = info.origin {
            changed |= ns.update(key, |v| v.set_origin(Some(origin)))?;
        } else if clear_origin {
            changed |= ns.update(key, |v| v.set_origin(None))?;
        }
        if changed {
            self.notify_changed(ns, key)?;
        }

        if var.is_numeric() && var.has_bound_expressions() {
            if let Some(expression) = var.min_expression() {
                let min = Expr::parse(expression)?.evaluate(ns)?.as_int()?;
                ns.update(key, |v| v.set_min(min))?;
            }
            if let Some(expression) = var.max_expression() {
                let max = Expr::parse(expression)?.evaluate(ns)?.as_int()?;
                ns.update(key, |v| v.set_max(max))?;
            }
            // New bounds may clamp the current value, which is an ordinary
            // value change.
            if ns.update(key, |v| v.clamp_to_bounds())? {
                self.notify_changed(ns, key)?;
            }
        }
        Ok(())
    }

    /// Re-evaluate per-choice enabledBy gates. A selection sitting on a choice
    /// that became disabled moves to the first enabled choice.
    fn run_dynamic_choices(&self, ns: &Namespace, key: &str) -> WeaveResult<()> {
        let var = ns.snapshot(key)?;
        for (index, choice) in var.choices().iter().enumerate() {
            let Some(expression) = &choice.enabled_by else {
                continue;
            };
            let enabled = Expr::parse(expression)?.evaluate(ns)?.as_bool()?;
            ns.update(key, |v| v.set_choice_enabled(index, enabled))?;
        }

        let var = ns.snapshot(key)?;
        if let Some(selected) = var.selected_choice() {
            if !selected.enabled {
                if let Some(first) = var.first_enabled_choice() {
                    trace!(%key, to = first, "selected choice disabled, reselecting");
                    if ns.update(key, |v| v.select_index(first))? {
                        self.notify_changed(ns, key)?;
                    }
                }
            }
        }
        Ok(())
    }
}
