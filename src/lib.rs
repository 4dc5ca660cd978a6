//!
//! ## Introduction
//! `pinweave` derives dependent microcontroller peripheral configuration
//! (register fields, clock sources, pin functions) from a small set of
//! user-editable variables. Each variable can carry declarative expression
//! strings - `reference`, `target`, `enabledBy`, `errorIf`, `unlockedBy`,
//! min/max bounds - and the engine turns those strings into a reactive
//! dependency graph: it discovers which variables reference which others,
//! wires change subscriptions accordingly, and recomputes derived values,
//! enablement, lock state, and human-readable provenance whenever an upstream
//! variable changes.
//!
//! ## Terminology
//! - **Monitored variable**: one flagged as requiring reactive wiring.
//! - **Reference string**: `"disabled"`, blank, or `"[primary#]expr"`; only
//!   the last `#`-delimited segment is an expression, earlier segments hint at
//!   the primary variable.
//! - **Primary variable**: the expression's principal source, from which
//!   status, enablement, and origin are inherited.
//! - **Origin**: provenance trail describing why a variable holds its current
//!   value, e.g. `"OSCCLK\n[selected by ClockSource]"`.
//! - **Clock-indexed identifier**: a name ending in `[]`, resolved against the
//!   device's active clock selection at lookup time.
//!
//! ## Shape
//! Load a peripheral's variables into a [`model::Namespace`], then call
//! [`engine::DependencyGraph::wire`] exactly once. Thereafter all mutations
//! enter through [`engine::DependencyGraph::set_value`] /
//! [`engine::DependencyGraph::select_choice`], which propagate synchronously
//! before returning. Single-threaded throughout.

pub mod engine;
pub mod errors;
pub mod expr;
pub mod model;

pub use engine::{DependencyGraph, Relationship, RelationshipKind};
pub use errors::{WeaveError, WeaveResult};
pub use expr::{EvalContext, Expr};
pub use model::{ChoiceData, Namespace, Severity, Status, Value, Variable, VariableBuilder};
