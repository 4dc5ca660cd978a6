//! Reference-string resolution: turning `"[primary#]expr"` / `"disabled"` /
//! blank into a {value, status, origin, enable} update and applying it to a
//! target variable.

use anyhow::Context;
use itertools::Itertools;

use crate::engine::DependencyGraph;
use crate::errors::WeaveResult;
use crate::expr::Expr;
use crate::model::{Namespace, Status, Value, Variable};

/// Accumulated outcome of one reference-string evaluation, applied atomically
/// to one target.
#[derive(Clone, Debug)]
pub(crate) struct UpdateInfo {
    pub value: Option<Value>,
    pub status: Option<Status>,
    pub origin: Option<String>,
    pub enable: bool,
}

impl Default for UpdateInfo {
    fn default() -> Self {
        UpdateInfo {
            value: None,
            status: None,
            origin: None,
            enable: true,
        }
    }
}

fn append_origin(origin: &mut Option<String>, annotation: String) {
    origin.get_or_insert_with(String::new).push_str(&annotation);
}

impl DependencyGraph {
    /// Resolve a reference string against the controller/target pair.
    ///
    /// Returns `None` for a blank expression (the caller clears the target's
    /// origin and changes nothing else). The controller and target are only
    /// consulted for provenance and enablement, never written here.
    pub(crate) fn determine_update(
        &self,
        ns: &Namespace,
        controller: &Variable,
        target: Option<&Variable>,
        reference: &str,
    ) -> WeaveResult<Option<UpdateInfo>> {
        let reference = reference.trim();
        let mut info = UpdateInfo::default();

        if reference.eq_ignore_ascii_case("disabled") {
            if target.is_some() {
                info.origin = Some(format!("Disabled by {}", controller.name()));
                info.enable = false;
            }
            return Ok(Some(info));
        }

        // "primary#expr" - only the last segment is evaluated, the first is a
        // primary-variable hint.
        let segments: Vec<&str> = reference.split('#').collect();
        let expression = segments[segments.len() - 1].trim();
        if expression.is_empty() {
            return Ok(None);
        }

        let parsed = Expr::parse(expression)?;
        info.value = Some(parsed.evaluate(ns)?);
        let identifiers = parsed.identifiers();

        let primary_name = if segments.len() > 1 {
            Some(segments[0].trim().to_string())
        } else {
            identifiers.first().cloned()
        };

        match &primary_name {
            None => {
                // No variables at all - a constant expression.
                info.origin = Some("[Fixed]".to_string());
            }
            Some(name) => {
                let primary = ns
                    .snapshot(name)
                    .with_context(|| format!("primary variable of '{}'", controller.key()))?;
                info.status = primary.status().cloned();
                info.enable = primary.is_enabled();
                info.origin = if primary.is_named_clock() {
                    Some(primary.name().to_string())
                } else {
                    // Origins chain transitively through the primary.
                    primary.origin().map(str::to_string)
                };
            }
        }

        let controller_is_target = target.map(Variable::key) == Some(controller.key());
        if !controller_is_target && target.is_some() {
            if controller.is_choice() {
                append_origin(
                    &mut info.origin,
                    format!("\n[selected by {}]", controller.name()),
                );
            } else if !identifiers.is_empty() {
                append_origin(
                    &mut info.origin,
                    format!("\n[modified by {}]", identifiers.iter().join(", ")),
                );
            }
        } else if controller_is_target && identifiers.len() > 1 {
            let others = identifiers
                .iter()
                .filter(|ident| Some(*ident) != primary_name.as_ref())
                .join(", ");
            append_origin(&mut info.origin, format!("\n[modified by {others}]"));
        }

        Ok(Some(info))
    }

    /// Evaluate one reference string and write the outcome to the target.
    ///
    /// The final enable state is the AND of the gate computed from the
    /// reference and the target's own independent enabledBy gate. Status is
    /// written unconditionally (clearing included); value and origin only when
    /// the resolution produced one; enable always.
    pub(crate) fn update_target(
        &self,
        ns: &Namespace,
        controller: &Variable,
        target_key: Option<&str>,
        reference: &str,
    ) -> WeaveResult<()> {
        let target = match target_key {
            Some(key) => Some(ns.snapshot(key)?),
            None => None,
        };

        let info = self.determine_update(ns, controller, target.as_ref(), reference)?;
        let Some(info) = info else {
            // Blank expression: this selection doesn't update the target.
            if let Some(key) = target_key {
                if ns.update(key, |v| v.set_origin(None))? {
                    self.notify_changed(ns, key)?;
                }
            }
            return Ok(());
        };

        if let (Some(key), Some(target)) = (target_key, &target) {
            let own_gate = match target.enabled_by() {
                Some(expression) => Expr::parse(expression)?.evaluate(ns)?.as_bool()?,
                None => true,
            };
            let enable = info.enable && own_gate;

            let mut changed = ns.update(key, |v| v.set_status(info.status.clone()))?;
            if let Some(value) = info.value.clone() {
                changed |= ns.update(key, |v| v.set_value(value))?;
            }
            if let Some(origin) = info.origin.clone() {
                changed |= ns.update(key, |v| v.set_origin(Some(origin)))?;
            }
            changed |= ns.update(key, |v| v.enable(enable))?;
            if changed {
                self.notify_changed(ns, key)?;
            }
        }

        if controller.is_clock_selector() {
            if let Some(value) = &info.value {
                let display = value.to_string();
                ns.update(controller.key(), |v| v.set_display_value(display))?;
            }
        }
        Ok(())
    }
}
