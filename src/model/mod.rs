//! Device model: typed values, variables with declarative relationship fields,
//! and the per-peripheral namespace that owns them.

pub mod namespace;
pub mod value;
pub mod variable;

pub use namespace::Namespace;
pub use value::Value;
pub use variable::{ChoiceData, Severity, Status, Variable, VariableBuilder};
