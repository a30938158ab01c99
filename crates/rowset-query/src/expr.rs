//! SQL dialects and comparison operators.

use std::fmt;
use std::str::FromStr;

use rowset_core::{Error, quote_ident, quote_ident_mysql};

/// SQL dialect used when rendering statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// PostgreSQL: `$1` placeholders, `RETURNING` on insert.
    #[default]
    Postgres,
    /// SQLite: `?1` placeholders.
    Sqlite,
    /// MySQL: `?` placeholders, backtick quoting.
    Mysql,
}

impl Dialect {
    /// Placeholder for the `index`-th parameter (1-based).
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Sqlite => format!("?{index}"),
            Dialect::Mysql => "?".to_string(),
        }
    }

    /// Quote an identifier.
    pub fn quote(self, ident: &str) -> String {
        match self {
            Dialect::Mysql => quote_ident_mysql(ident),
            Dialect::Postgres | Dialect::Sqlite => quote_ident(ident),
        }
    }

    /// Aggregate an integer expression into a `|`-joined identifier list.
    pub fn aggregate_ids(self, expr: &str) -> String {
        match self {
            Dialect::Postgres => format!("string_agg(({expr})::text, '|')"),
            Dialect::Sqlite => format!("group_concat({expr}, '|')"),
            Dialect::Mysql => format!("GROUP_CONCAT({expr} SEPARATOR '|')"),
        }
    }

    /// Case-insensitive pattern match.
    pub fn ilike(self, lhs: &str, rhs: &str, negated: bool) -> String {
        let not = if negated { "NOT " } else { "" };
        match self {
            Dialect::Postgres => format!("{lhs} {not}ILIKE {rhs}"),
            // LIKE is already case-insensitive for ASCII in SQLite.
            Dialect::Sqlite => format!("{lhs} {not}LIKE {rhs}"),
            Dialect::Mysql => format!("LOWER({lhs}) {not}LIKE LOWER({rhs})"),
        }
    }

    /// Suffix that makes an INSERT hand back the generated identifier.
    pub fn returning_id(self, column: &str) -> Option<String> {
        match self {
            Dialect::Postgres => Some(format!(" RETURNING {}", self.quote(column))),
            Dialect::Sqlite | Dialect::Mysql => None,
        }
    }

    /// LIMIT/OFFSET clause, accounting for dialects that need a LIMIT
    /// before OFFSET.
    pub fn limit_offset(self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (None, None) => String::new(),
            (Some(limit), None) => format!(" LIMIT {limit}"),
            (Some(limit), Some(offset)) => format!(" LIMIT {limit} OFFSET {offset}"),
            (None, Some(offset)) => match self {
                Dialect::Postgres => format!(" OFFSET {offset}"),
                Dialect::Sqlite => format!(" LIMIT -1 OFFSET {offset}"),
                Dialect::Mysql => format!(" LIMIT 18446744073709551615 OFFSET {offset}"),
            },
        }
    }

    /// INSERT body for a row without explicit columns.
    pub fn default_values(self) -> &'static str {
        match self {
            Dialect::Mysql => " () VALUES ()",
            Dialect::Postgres | Dialect::Sqlite => " DEFAULT VALUES",
        }
    }
}

/// Comparison operator of a condition leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equals,
    NotEquals,
    Greater,
    GreaterOrEqual,
    Lower,
    LowerOrEqual,
    Like,
    NotLike,
    ILike,
    NotILike,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl Operator {
    /// The canonical textual form.
    pub const fn as_str(self) -> &'static str {
        match self {
            Operator::Equals => "=",
            Operator::NotEquals => "!=",
            Operator::Greater => ">",
            Operator::GreaterOrEqual => ">=",
            Operator::Lower => "<",
            Operator::LowerOrEqual => "<=",
            Operator::Like => "like",
            Operator::NotLike => "not like",
            Operator::ILike => "ilike",
            Operator::NotILike => "not ilike",
            Operator::In => "in",
            Operator::NotIn => "not in",
            Operator::IsNull => "is null",
            Operator::IsNotNull => "is not null",
        }
    }

    /// The operator matching the complement of this one.
    pub const fn negate(self) -> Self {
        match self {
            Operator::Equals => Operator::NotEquals,
            Operator::NotEquals => Operator::Equals,
            Operator::Greater => Operator::LowerOrEqual,
            Operator::GreaterOrEqual => Operator::Lower,
            Operator::Lower => Operator::GreaterOrEqual,
            Operator::LowerOrEqual => Operator::Greater,
            Operator::Like => Operator::NotLike,
            Operator::NotLike => Operator::Like,
            Operator::ILike => Operator::NotILike,
            Operator::NotILike => Operator::ILike,
            Operator::In => Operator::NotIn,
            Operator::NotIn => Operator::In,
            Operator::IsNull => Operator::IsNotNull,
            Operator::IsNotNull => Operator::IsNull,
        }
    }

    /// SQL comparison symbol for the plain binary operators.
    pub(crate) const fn sql_symbol(self) -> Option<&'static str> {
        match self {
            Operator::Equals => Some("="),
            Operator::NotEquals => Some("<>"),
            Operator::Greater => Some(">"),
            Operator::GreaterOrEqual => Some(">="),
            Operator::Lower => Some("<"),
            Operator::LowerOrEqual => Some("<="),
            _ => None,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        let op = match normalized.as_str() {
            "=" | "==" => Operator::Equals,
            "!=" | "<>" => Operator::NotEquals,
            ">" => Operator::Greater,
            ">=" => Operator::GreaterOrEqual,
            "<" => Operator::Lower,
            "<=" => Operator::LowerOrEqual,
            "like" => Operator::Like,
            "not like" => Operator::NotLike,
            "ilike" => Operator::ILike,
            "not ilike" => Operator::NotILike,
            "in" => Operator::In,
            "not in" => Operator::NotIn,
            "is null" => Operator::IsNull,
            "is not null" => Operator::IsNotNull,
            _ => {
                tracing::error!(operator = s, "Invalid operator");
                return Err(Error::InvalidOperator(s.to_string()));
            }
        };
        Ok(op)
    }
}
