//! Error types for rowset.
//!
//! Errors fall into three families:
//!
//! - **Caller-contract violations**: unknown model or field, `ensure_one` on a
//!   non-singleton, malformed paths or operators. These are programmer errors;
//!   the operation stops at once and never hands back a partial result.
//! - **Database errors**: whatever the executor reports. Never retried here.
//! - **Data-shape errors**: a scanned value or a typed record does not fit the
//!   field it is bound to, meaning registry and schema disagree.

use thiserror::Error;

/// Result alias used across every rowset crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The error type for all rowset operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The model name is not present in the registry.
    #[error("unknown model `{model}`")]
    UnknownModel { model: String },

    /// The field name is not declared on the model.
    #[error("unknown field `{field}` in model `{model}`")]
    UnknownField { model: String, field: String },

    /// A single-record accessor was used on a collection of another size.
    #[error("expected singleton of `{model}`, received {received}")]
    NotSingleton { model: String, received: String },

    /// A dotted field path cannot be resolved.
    #[error("invalid path `{path}` in model `{model}`: {reason}")]
    InvalidPath {
        model: String,
        path: String,
        reason: String,
    },

    /// An operator string outside the supported set.
    #[error("invalid operator `{0}`")]
    InvalidOperator(String),

    /// An ORDER BY / GROUP BY expression that is not a plain field path.
    #[error("invalid expression `{0}`")]
    InvalidExpression(String),

    /// Two collections of different models were combined.
    #[error("cannot combine records of `{expected}` with records of `{received}`")]
    ModelMismatch { expected: String, received: String },

    /// `call` on a method the model does not define.
    #[error("unknown method `{method}` on model `{model}`")]
    UnknownMethod { model: String, method: String },

    /// `super_call` from the lowest layer, or outside any method.
    #[error("no super method for `{method}` on model `{model}`")]
    NoSuperMethod { model: String, method: String },

    /// Method dispatch nested deeper than the configured limit.
    #[error("method call depth {depth} exceeded on model `{model}`")]
    RecursionLimit { model: String, depth: usize },

    /// The environment was already committed or rolled back.
    #[error("environment is closed")]
    ClosedEnvironment,

    /// Error reported by the database executor.
    #[error("database error: {0}")]
    Database(String),

    /// A row could not be scanned into the expected shape.
    #[error("scan error: {0}")]
    Scan(String),

    /// A value does not fit the declared type of its field.
    #[error("cannot convert field `{field}` of model `{model}`: {message}")]
    Conversion {
        model: String,
        field: String,
        message: String,
    },

    /// Typed record (de)serialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// The registry definition is inconsistent.
    #[error("registry error: {0}")]
    Registry(String),
}

impl Error {
    /// Build an [`Error::UnknownField`].
    pub fn unknown_field(model: impl Into<String>, field: impl Into<String>) -> Self {
        Error::UnknownField {
            model: model.into(),
            field: field.into(),
        }
    }

    /// Build an [`Error::Conversion`].
    pub fn conversion(
        model: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Conversion {
            model: model.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    /// True for programmer errors (unknown names, singleton guard, bad paths,
    /// data-shape mismatches). False for errors reported by the database.
    pub fn is_contract_violation(&self) -> bool {
        !matches!(self, Error::Database(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_context() {
        let err = Error::unknown_field("User", "Nickname");
        assert_eq!(err.to_string(), "unknown field `Nickname` in model `User`");

        let err = Error::NotSingleton {
            model: "User".into(),
            received: "User(1,2)".into(),
        };
        assert!(err.to_string().contains("User(1,2)"));
    }

    #[test]
    fn test_contract_violation_classification() {
        assert!(Error::InvalidOperator("~~".into()).is_contract_violation());
        assert!(Error::conversion("User", "Age", "not an integer").is_contract_violation());
        assert!(!Error::Database("UNIQUE constraint failed".into()).is_contract_violation());
    }
}
