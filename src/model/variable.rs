use derive_builder::Builder;
use derive_more::Display;

use crate::model::value::Value;

/// Severity of a [`Status`]. Ordering matters: an error-severity status replaces an
/// informational one when both conditions fire on the same update.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    #[display("info")]
    Info,
    #[display("warning")]
    Warning,
    #[display("error")]
    Error,
}

/// User-visible condition attached to a variable, e.g. why it is disabled or why
/// its current combination of settings is invalid. Never an error value - business
/// rule violations surface here, not as `Err`.
#[derive(Clone, Debug, PartialEq)]
pub struct Status {
    severity: Severity,
    message: String,
}

impl Status {
    pub fn info<M: Into<String>>(message: M) -> Self {
        Status {
            severity: Severity::Info,
            message: message.into(),
        }
    }

    pub fn warning<M: Into<String>>(message: M) -> Self {
        Status {
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    pub fn error<M: Into<String>>(message: M) -> Self {
        Status {
            severity: Severity::Error,
            message: message.into(),
        }
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// One entry of a choice variable. The reference expression (possibly `;`-joined)
/// drives the controller's fan-out targets while this choice is selected.
#[derive(Clone, Debug, PartialEq)]
pub struct ChoiceData {
    pub name: String,
    pub reference: Option<String>,
    pub enabled_by: Option<String>,
    pub enabled: bool,
}

impl ChoiceData {
    pub fn new<N: Into<String>, R: Into<String>>(name: N, reference: R) -> Self {
        ChoiceData {
            name: name.into(),
            reference: Some(reference.into()),
            enabled_by: None,
            enabled: true,
        }
    }

    pub fn plain<N: Into<String>>(name: N) -> Self {
        ChoiceData {
            name: name.into(),
            reference: None,
            enabled_by: None,
            enabled: true,
        }
    }

    pub fn enabled_by<E: Into<String>>(mut self, expression: E) -> Self {
        self.enabled_by = Some(expression.into());
        self
    }
}

/// A named, typed configuration value in the device model.
///
/// The declarative fields (`reference`, `target`, `enabled_by`, ...) are set by the
/// out-of-scope device-description loader and drive relationship wiring. Capability
/// flags (`monitored`, `named_clock`, `clock_selector`) are declared at
/// construction; the engine never inspects runtime types to classify a variable.
///
/// Invariants: `key` is immutable and unique within its namespace; the value's type
/// is fixed for the variable's lifetime.
#[derive(Clone, Debug, Builder)]
#[builder(setter(into, strip_option))]
pub struct Variable {
    key: String,
    /// Display name. Falls back to the last `/`-separated component of the key.
    #[builder(default)]
    name: Option<String>,
    value: Value,
    #[builder(default)]
    status: Option<Status>,
    #[builder(default = "true")]
    enabled: bool,
    #[builder(default)]
    locked: bool,
    #[builder(default)]
    origin: Option<String>,

    // Declarative relationship fields.
    #[builder(default)]
    reference: Option<String>,
    #[builder(default)]
    target: Option<String>,
    #[builder(default)]
    enabled_by: Option<String>,
    #[builder(default)]
    error_if: Option<String>,
    #[builder(default)]
    unlocked_by: Option<String>,
    #[builder(default)]
    min_expression: Option<String>,
    #[builder(default)]
    max_expression: Option<String>,
    #[builder(default)]
    enabled_by_message: Option<String>,
    #[builder(default)]
    error_if_message: Option<String>,

    // Capability flags.
    #[builder(default)]
    monitored: bool,
    #[builder(default)]
    named_clock: bool,
    #[builder(default)]
    clock_selector: bool,

    /// Display-string mirror maintained for clock-selector variables.
    #[builder(default)]
    display_value: Option<String>,

    /// Non-empty for choice variables. The variable's own value is the Int index
    /// of the selected choice.
    #[builder(default)]
    choices: Vec<ChoiceData>,
    #[builder(default)]
    selection: usize,

    // Current numeric bounds, recomputed from min/max expressions.
    #[builder(default)]
    min: Option<i64>,
    #[builder(default)]
    max: Option<i64>,
}

impl Variable {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Qualify a bare key against the owning peripheral at insertion time. The
    /// key is immutable once the variable is inside a namespace.
    pub(crate) fn qualify_key(&mut self, peripheral: &str) {
        if !self.key.starts_with('/') {
            self.key = format!("/{peripheral}/{}", self.key);
        }
    }

    pub fn name(&self) -> &str {
        match &self.name {
            Some(name) => name,
            None => self.key.rsplit('/').next().unwrap_or(&self.key),
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn enabled_by(&self) -> Option<&str> {
        self.enabled_by.as_deref()
    }

    pub fn error_if(&self) -> Option<&str> {
        self.error_if.as_deref()
    }

    pub fn unlocked_by(&self) -> Option<&str> {
        self.unlocked_by.as_deref()
    }

    pub fn min_expression(&self) -> Option<&str> {
        self.min_expression.as_deref()
    }

    pub fn max_expression(&self) -> Option<&str> {
        self.max_expression.as_deref()
    }

    /// Message attached when `enabled_by` evaluates false.
    pub fn enabled_by_message(&self) -> String {
        match &self.enabled_by_message {
            Some(message) => message.clone(),
            None => format!(
                "Disabled by '{}'",
                self.enabled_by.as_deref().unwrap_or_default()
            ),
        }
    }

    /// Message attached when `error_if` evaluates true.
    pub fn error_if_message(&self) -> String {
        match &self.error_if_message {
            Some(message) => message.clone(),
            None => format!(
                "Invalid due to '{}'",
                self.error_if.as_deref().unwrap_or_default()
            ),
        }
    }

    pub fn is_monitored(&self) -> bool {
        self.monitored
    }

    pub fn is_named_clock(&self) -> bool {
        self.named_clock
    }

    pub fn is_clock_selector(&self) -> bool {
        self.clock_selector
    }

    pub fn display_value(&self) -> Option<&str> {
        self.display_value.as_deref()
    }

    pub fn is_choice(&self) -> bool {
        !self.choices.is_empty()
    }

    pub fn is_numeric(&self) -> bool {
        self.value.is_numeric()
    }

    pub fn has_bound_expressions(&self) -> bool {
        self.min_expression.is_some() || self.max_expression.is_some()
    }

    pub fn choices(&self) -> &[ChoiceData] {
        &self.choices
    }

    pub fn selection(&self) -> usize {
        self.selection
    }

    pub fn selected_choice(&self) -> Option<&ChoiceData> {
        self.choices.get(self.selection)
    }

    pub fn choice_index<N: AsRef<str>>(&self, name: N) -> Option<usize> {
        self.choices.iter().position(|c| c.name == name.as_ref())
    }

    pub fn min(&self) -> Option<i64> {
        self.min
    }

    pub fn max(&self) -> Option<i64> {
        self.max
    }

    // Mutators report whether state actually changed; the propagation runtime only
    // recurses on real changes.

    pub(crate) fn set_value(&mut self, value: Value) -> bool {
        if self.value == value {
            return false;
        }
        self.value = value;
        true
    }

    pub(crate) fn set_status(&mut self, status: Option<Status>) -> bool {
        if self.status == status {
            return false;
        }
        self.status = status;
        true
    }

    pub(crate) fn set_origin(&mut self, origin: Option<String>) -> bool {
        if self.origin == origin {
            return false;
        }
        self.origin = origin;
        true
    }

    pub(crate) fn enable(&mut self, enabled: bool) -> bool {
        if self.enabled == enabled {
            return false;
        }
        self.enabled = enabled;
        true
    }

    pub(crate) fn set_locked(&mut self, locked: bool) -> bool {
        if self.locked == locked {
            return false;
        }
        self.locked = locked;
        true
    }

    pub(crate) fn set_display_value(&mut self, display: String) {
        self.display_value = Some(display);
    }

    /// Select a choice by index, keeping the variable's Int value in step.
    pub(crate) fn select_index(&mut self, index: usize) -> bool {
        debug_assert!(index < self.choices.len());
        let changed = self.selection != index;
        self.selection = index;
        self.set_value(Value::Int(index as i64)) || changed
    }

    pub(crate) fn set_choice_enabled(&mut self, index: usize, enabled: bool) -> bool {
        match self.choices.get_mut(index) {
            Some(choice) if choice.enabled != enabled => {
                choice.enabled = enabled;
                true
            }
            _ => false,
        }
    }

    /// First enabled choice, used when the current selection becomes disabled.
    pub(crate) fn first_enabled_choice(&self) -> Option<usize> {
        self.choices.iter().position(|c| c.enabled)
    }

    pub(crate) fn set_min(&mut self, min: i64) -> bool {
        let changed = self.min != Some(min);
        self.min = Some(min);
        changed
    }

    pub(crate) fn set_max(&mut self, max: i64) -> bool {
        let changed = self.max != Some(max);
        self.max = Some(max);
        changed
    }

    /// Clamp an integer value into the current bounds. Reports a value change.
    pub(crate) fn clamp_to_bounds(&mut self) -> bool {
        let Value::Int(current) = self.value else {
            return false;
        };
        let mut clamped = current;
        if let Some(min) = self.min {
            clamped = clamped.max(min);
        }
        if let Some(max) = self.max {
            clamped = clamped.min(max);
        }
        self.set_value(Value::Int(clamped))
    }
}
