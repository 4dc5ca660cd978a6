use thiserror::Error;

#[derive(Error, Debug)]
pub enum WeaveError {
    #[error("variable '{key}' not found")]
    UndefinedVariable { key: String },

    #[error("duplicate variable key '{key}'")]
    DuplicateVariable { key: String },

    #[error("malformed variable key '{key}'")]
    MalformedKey { key: String },

    #[error("monitored variable '{key}' has no dynamic parameters")]
    NoDynamicParameters { key: String },

    #[error(
        "targets and expressions do not match in length for '{key}': \
         {targets} target(s), {expressions} expression(s)"
    )]
    FanOutMismatch {
        key: String,
        targets: usize,
        expressions: usize,
    },

    #[error("unexpected indexed variable '{ident}' in expression for '{key}'")]
    IndexedIdentifier { ident: String, key: String },

    #[error("reference is missing for choice '{choice}' of '{key}'")]
    MissingChoiceReference { choice: String, key: String },

    #[error("dependency cycle detected involving '{key}'")]
    DependencyCycle { key: String },

    #[error("syntax error at offset {at} in '{expression}': {message}")]
    ExpressionSyntax {
        expression: String,
        at: usize,
        message: String,
    },

    #[error("cannot apply '{op}' to {operands}")]
    InvalidOperands { op: &'static str, operands: String },

    #[error("division by zero")]
    DivisionByZero,

    #[error("expected {expected} value, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: String,
    },

    #[error("variable '{key}' has no choice named '{choice}'")]
    UnknownChoice { key: String, choice: String },
}

pub type WeaveResult<T> = anyhow::Result<T>;
