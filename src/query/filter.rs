//! Query model: AND of clauses, each clause a condition or an OR of conditions

use std::fmt;
use std::str::FromStr;

use crate::ValidationError;

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Equal => "==",
            CompareOp::NotEqual => "!=",
            CompareOp::LessThan => "<",
            CompareOp::LessEqual => "<=",
            CompareOp::GreaterThan => ">",
            CompareOp::GreaterEqual => ">=",
        }
    }

    /// Apply the operator to two ordered values
    #[inline(always)]
    pub fn apply<T: PartialOrd + ?Sized>(&self, left: &T, right: &T) -> bool {
        match self {
            CompareOp::Equal => left == right,
            CompareOp::NotEqual => left != right,
            CompareOp::LessThan => left < right,
            CompareOp::LessEqual => left <= right,
            CompareOp::GreaterThan => left > right,
            CompareOp::GreaterEqual => left >= right,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompareOp {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "==" => Ok(CompareOp::Equal),
            "!=" => Ok(CompareOp::NotEqual),
            "<" => Ok(CompareOp::LessThan),
            "<=" => Ok(CompareOp::LessEqual),
            ">" => Ok(CompareOp::GreaterThan),
            ">=" => Ok(CompareOp::GreaterEqual),
            other => Err(ValidationError::InvalidQuery(format!("unknown operator {:?}", other))),
        }
    }
}

/// Right-hand side of a condition
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(v) => write!(f, "{}", v),
            Literal::Float(v) => write!(f, "{}", v),
            Literal::Text(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<i64> for Literal {
    fn from(v: i64) -> Self {
        Literal::Int(v)
    }
}

impl From<i32> for Literal {
    fn from(v: i32) -> Self {
        Literal::Int(v as i64)
    }
}

impl From<f64> for Literal {
    fn from(v: f64) -> Self {
        Literal::Float(v)
    }
}

impl From<&str> for Literal {
    fn from(v: &str) -> Self {
        Literal::Text(v.to_string())
    }
}

impl From<String> for Literal {
    fn from(v: String) -> Self {
        Literal::Text(v)
    }
}

/// A single `(column, operator, value)` comparison
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: String,
    pub op: CompareOp,
    pub value: Literal,
}

impl Condition {
    pub fn new(column: impl Into<String>, op: CompareOp, value: impl Into<Literal>) -> Self {
        Self {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    /// Build a condition from an operator string
    pub fn parse(
        column: impl Into<String>,
        op: &str,
        value: impl Into<Literal>,
    ) -> Result<Self, ValidationError> {
        Ok(Self::new(column, op.parse()?, value))
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} {} {})", self.column, self.op, self.value)
    }
}

/// One AND-ed clause
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Single(Condition),
    /// Conditions OR-ed together
    AnyOf(Vec<Condition>),
}

impl Clause {
    pub fn conditions(&self) -> &[Condition] {
        match self {
            Clause::Single(c) => std::slice::from_ref(c),
            Clause::AnyOf(cs) => cs,
        }
    }
}

/// Row predicate: clauses AND-ed in order
///
/// A query with no clauses matches no rows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    clauses: Vec<Clause>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// AND a single condition
    pub fn and(mut self, condition: Condition) -> Self {
        self.clauses.push(Clause::Single(condition));
        self
    }

    /// AND a disjunction of conditions
    pub fn or_any(mut self, conditions: Vec<Condition>) -> Self {
        self.clauses.push(Clause::AnyOf(conditions));
        self
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Referenced column names, first occurrence order
    pub fn columns(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for cond in self.clauses.iter().flat_map(Clause::conditions) {
            if !out.contains(&cond.column.as_str()) {
                out.push(&cond.column);
            }
        }
        out
    }
}

impl From<Condition> for Query {
    fn from(condition: Condition) -> Self {
        Query::new().and(condition)
    }
}

impl From<Vec<Clause>> for Query {
    fn from(clauses: Vec<Clause>) -> Self {
        Self { clauses }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, clause) in self.clauses.iter().enumerate() {
            if i > 0 {
                write!(f, " & ")?;
            }
            match clause {
                Clause::Single(c) => write!(f, "{}", c)?,
                Clause::AnyOf(cs) => {
                    write!(f, "(")?;
                    for (j, c) in cs.iter().enumerate() {
                        if j > 0 {
                            write!(f, " | ")?;
                        }
                        write!(f, "{}", c)?;
                    }
                    write!(f, ")")?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_parse() {
        for op in ["==", "!=", "<", "<=", ">", ">="] {
            assert_eq!(op.parse::<CompareOp>().unwrap().as_str(), op);
        }
        assert!("=>".parse::<CompareOp>().is_err());
        assert!(Condition::parse("a", "~", 1).is_err());
    }

    #[test]
    fn test_query_display_and_columns() {
        let q = Query::new()
            .or_any(vec![
                Condition::new("col1", CompareOp::GreaterThan, 7),
                Condition::new("col1", CompareOp::LessEqual, 3),
            ])
            .and(Condition::new("col2", CompareOp::Equal, "a"));
        assert_eq!(q.to_string(), "((col1 > 7) | (col1 <= 3)) & (col2 == \"a\")");
        assert_eq!(q.columns(), vec!["col1", "col2"]);
        assert!(Query::new().is_empty());
    }

    #[test]
    fn test_apply() {
        assert!(CompareOp::LessThan.apply(&1, &2));
        assert!(CompareOp::GreaterEqual.apply(b"b".as_slice(), b"a".as_slice()));
        assert!(!CompareOp::Equal.apply(&f64::NAN, &f64::NAN));
    }
}
