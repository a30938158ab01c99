//! Immutable predicate trees.
//!
//! A [`Condition`] is a tree of `field operator value` leaves joined by
//! AND/OR/NOT nodes. Every combinator returns a new condition; subtrees are
//! reference counted and shared, never mutated, so a condition handed to one
//! chain branch cannot be altered by another.
//!
//! ```ignore
//! let adults = Condition::new().and("Profile.Age", Operator::GreaterOrEqual, 18);
//! let staff_or_adults = Condition::new()
//!     .and("IsStaff", Operator::Equals, true)
//!     .or_cond(&adults);
//! ```

use std::sync::Arc;

use rowset_core::Value;

use crate::expr::Operator;

/// A `field operator value` leaf.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    /// Field name or dotted path, e.g. `"User.Profile.Age"`.
    pub field: String,
    pub operator: Operator,
    pub value: Value,
}

/// A node of the predicate tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Leaf(Predicate),
    And(Arc<Node>, Arc<Node>),
    Or(Arc<Node>, Arc<Node>),
    Not(Arc<Node>),
}

/// An immutable predicate tree. The empty condition matches every record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Condition {
    root: Option<Arc<Node>>,
}

impl Condition {
    /// The empty condition.
    pub fn new() -> Self {
        Self::default()
    }

    /// A condition made of a single leaf.
    pub fn leaf(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            root: Some(Arc::new(Node::Leaf(Predicate {
                field: field.into(),
                operator,
                value: value.into(),
            }))),
        }
    }

    /// True if the condition matches everything.
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Root node, `None` when empty.
    pub fn root(&self) -> Option<&Node> {
        self.root.as_deref()
    }

    /// `self AND field op value`.
    pub fn and(&self, field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        self.and_cond(&Self::leaf(field, operator, value))
    }

    /// `self OR field op value`.
    pub fn or(&self, field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        self.or_cond(&Self::leaf(field, operator, value))
    }

    /// `self AND NOT (field op value)`.
    pub fn and_not(
        &self,
        field: impl Into<String>,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Self {
        self.and_cond(&Self::leaf(field, operator, value).not())
    }

    /// `self OR NOT (field op value)`.
    pub fn or_not(
        &self,
        field: impl Into<String>,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Self {
        self.or_cond(&Self::leaf(field, operator, value).not())
    }

    /// `self AND (other)`. An empty side yields the other side.
    pub fn and_cond(&self, other: &Condition) -> Self {
        self.combine(other, Node::And)
    }

    /// `self OR (other)`. An empty side yields the other side.
    pub fn or_cond(&self, other: &Condition) -> Self {
        self.combine(other, Node::Or)
    }

    /// `NOT (self)`. The negation of the empty condition is empty.
    #[allow(clippy::should_implement_trait)]
    pub fn not(&self) -> Self {
        Self {
            root: self.root.as_ref().map(|n| Arc::new(Node::Not(Arc::clone(n)))),
        }
    }

    fn combine(&self, other: &Condition, node: fn(Arc<Node>, Arc<Node>) -> Node) -> Self {
        match (&self.root, &other.root) {
            (None, _) => other.clone(),
            (_, None) => self.clone(),
            (Some(l), Some(r)) => Self {
                root: Some(Arc::new(node(Arc::clone(l), Arc::clone(r)))),
            },
        }
    }

    /// All leaves, depth-first, left to right.
    pub fn predicates(&self) -> Vec<&Predicate> {
        fn walk<'a>(node: &'a Node, out: &mut Vec<&'a Predicate>) {
            match node {
                Node::Leaf(p) => out.push(p),
                Node::And(l, r) | Node::Or(l, r) => {
                    walk(l, out);
                    walk(r, out);
                }
                Node::Not(n) => walk(n, out),
            }
        }
        let mut out = Vec::new();
        if let Some(root) = &self.root {
            walk(root, &mut out);
        }
        out
    }

    /// True if any leaf filters on `field`.
    pub fn mentions(&self, field: &str) -> bool {
        self.predicates().iter().any(|p| p.field == field)
    }
}
