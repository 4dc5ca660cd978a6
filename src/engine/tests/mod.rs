mod self_update;

use crate::engine::DependencyGraph;
use crate::model::{Namespace, Value, Variable, VariableBuilder};

/// Plain (unmonitored) variable, the kind other expressions read from.
fn plain(key: &str, value: impl Into<Value>) -> Variable {
    VariableBuilder::default()
        .key(key)
        .value(value.into())
        .build()
        .unwrap()
}

/// Builder pre-set for a monitored variable; tests add the declarative fields
/// under scrutiny.
fn monitored(key: &str, value: impl Into<Value>) -> VariableBuilder {
    let mut builder = VariableBuilder::default();
    builder.key(key).value(value.into()).monitored(true);
    builder
}

fn wire(ns: &Namespace) -> DependencyGraph {
    DependencyGraph::wire(ns).unwrap()
}

fn value_of(ns: &Namespace, key: &str) -> Value {
    ns.snapshot(key).unwrap().value().clone()
}

fn origin_of(ns: &Namespace, key: &str) -> String {
    ns.snapshot(key)
        .unwrap()
        .origin()
        .unwrap_or_default()
        .to_string()
}
