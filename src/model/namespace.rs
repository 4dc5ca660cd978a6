use std::cell::{Cell, RefCell};

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::{WeaveError, WeaveResult};
use crate::expr::EvalContext;
use crate::model::value::Value;
use crate::model::variable::Variable;

// Hierarchical keys like `/SIM/pdb_input_clock`, optionally clock-indexed
// (`system_clock[]`, `system_clock[3]`).
static KEY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^/?[A-Za-z_][A-Za-z0-9_]*(?:/[A-Za-z_][A-Za-z0-9_]*)*(?:\[\d*\])?$").unwrap()
});

/// Key→Variable store for one peripheral.
///
/// Single-threaded by design: the whole map sits behind one `RefCell` and every
/// accessor takes a short borrow, never held across propagation recursion.
#[derive(Debug)]
pub struct Namespace {
    name: String,
    variables: RefCell<IndexMap<String, Variable>>,
    active_clock_index: Cell<usize>,
}

impl Namespace {
    pub fn new<N: Into<String>>(name: N) -> Self {
        Namespace {
            name: name.into(),
            variables: RefCell::new(IndexMap::new()),
            active_clock_index: Cell::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn active_clock_index(&self) -> usize {
        self.active_clock_index.get()
    }

    /// Select the device's active clock configuration. Clock-indexed identifiers
    /// resolve against this value at lookup time, not at wiring time.
    pub fn set_active_clock_index(&self, index: usize) {
        self.active_clock_index.set(index);
    }

    /// Turn a local name into a namespace key: absolute keys pass through, bare
    /// names are prefixed with the peripheral path.
    pub fn qualify<K: AsRef<str>>(&self, key: K) -> String {
        let key = key.as_ref();
        if key.starts_with('/') {
            key.to_string()
        } else {
            format!("/{}/{}", self.name, key)
        }
    }

    /// Qualification plus clock-index substitution: `foo[]` becomes `foo3` while
    /// clock selection 3 is active.
    pub fn resolve_key<K: AsRef<str>>(&self, key: K) -> String {
        let key = key.as_ref();
        let key = match key.strip_suffix("[]") {
            Some(stem) => format!("{stem}{}", self.active_clock_index.get()),
            None => key.to_string(),
        };
        self.qualify(key)
    }

    pub fn add(&self, mut variable: Variable) -> WeaveResult<()> {
        if !KEY_REGEX.is_match(variable.key()) {
            return Err(WeaveError::MalformedKey {
                key: variable.key().to_string(),
            }
            .into());
        }
        variable.qualify_key(&self.name);
        let mut variables = self.variables.borrow_mut();
        if variables.contains_key(variable.key()) {
            return Err(WeaveError::DuplicateVariable {
                key: variable.key().to_string(),
            }
            .into());
        }
        variables.insert(variable.key().to_string(), variable);
        Ok(())
    }

    pub fn contains<K: AsRef<str>>(&self, key: K) -> bool {
        self.variables
            .borrow()
            .contains_key(&self.resolve_key(key))
    }

    /// Clone of the variable state. Variables are small; snapshots keep borrows
    /// out of the propagation call chain.
    pub fn snapshot<K: AsRef<str>>(&self, key: K) -> WeaveResult<Variable> {
        self.try_snapshot(key.as_ref())
            .ok_or_else(|| {
                WeaveError::UndefinedVariable {
                    key: self.resolve_key(key.as_ref()),
                }
                .into()
            })
    }

    pub fn try_snapshot<K: AsRef<str>>(&self, key: K) -> Option<Variable> {
        self.variables
            .borrow()
            .get(&self.resolve_key(key))
            .cloned()
    }

    pub(crate) fn update<K: AsRef<str>, R>(
        &self,
        key: K,
        f: impl FnOnce(&mut Variable) -> R,
    ) -> WeaveResult<R> {
        let key = self.resolve_key(key);
        let mut variables = self.variables.borrow_mut();
        match variables.get_mut(&key) {
            Some(variable) => Ok(f(variable)),
            None => Err(WeaveError::UndefinedVariable { key }.into()),
        }
    }

    /// Keys flagged as monitored, in insertion order.
    pub fn monitored_keys(&self) -> Vec<String> {
        self.variables
            .borrow()
            .values()
            .filter(|v| v.is_monitored())
            .map(|v| v.key().to_string())
            .collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.variables.borrow().keys().cloned().collect()
    }
}

impl EvalContext for Namespace {
    fn lookup(&self, ident: &str) -> WeaveResult<Value> {
        let key = self.resolve_key(ident);
        self.variables
            .borrow()
            .get(&key)
            .map(|v| v.value().clone())
            .ok_or_else(|| WeaveError::UndefinedVariable { key }.into())
    }
}
