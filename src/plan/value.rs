//! Values, rows, and the expression forms the planner evaluates.
//!
//! A `Value` is one cell; a `Row` maps column ids to values. Write and
//! filter expressions are a small tagged tree dispatched by exhaustive
//! match: constants, column references, and comparisons.

use crate::core::error::{Result, Status};
use crate::plan::schema::ColumnId;
use bytes::Bytes;
use std::collections::BTreeMap;

/// One cell value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Double(f64),
    String(String),
    Binary(Bytes),
    Timestamp(i64),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(Status::invalid_argument(format!(
                "expected boolean value, found {:?}",
                other
            ))),
        }
    }

    pub fn as_binary(&self) -> Result<&Bytes> {
        match self {
            Value::Binary(b) => Ok(b),
            other => Err(Status::invalid_argument(format!(
                "expected binary value, found {:?}",
                other
            ))),
        }
    }

    /// Same-type comparison. Cross-type comparisons are a shape error
    /// the translator should have caught.
    pub fn compare(&self, other: &Value) -> Result<std::cmp::Ordering> {
        use std::cmp::Ordering;
        let ordering = match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int32(a), Value::Int32(b)) => a.cmp(b),
            (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Double(a), Value::Double(b)) => {
                a.partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Binary(a), Value::Binary(b)) => a.cmp(b),
            (a, b) => {
                return Err(Status::invalid_argument(format!(
                    "cannot compare {:?} with {:?}",
                    a, b
                )))
            }
        };
        Ok(ordering)
    }
}

/// A materialized row: column id to value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: BTreeMap<ColumnId, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, id: ColumnId, value: Value) {
        self.values.insert(id, value);
    }

    pub fn get(&self, id: ColumnId) -> Option<&Value> {
        self.values.get(&id)
    }

    /// Value of a column, Null when absent.
    pub fn value_or_null(&self, id: ColumnId) -> Value {
        self.values.get(&id).cloned().unwrap_or(Value::Null)
    }

    pub fn unset(&mut self, id: ColumnId) {
        self.values.remove(&id);
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn columns(&self) -> impl Iterator<Item = (&ColumnId, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }
}

/// Comparison operator of a filter expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Expression tree evaluated against one row.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Constant value; a scalar insert is exactly this form.
    Value(Value),
    /// Reference to a column of the current row.
    Column(ColumnId),
    /// Comparison producing a boolean.
    Compare {
        op: CompareOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Conjunction of boolean sub-expressions.
    And(Vec<Expr>),
}

impl Expr {
    pub fn value(v: Value) -> Self {
        Self::Value(v)
    }

    pub fn column(id: i32) -> Self {
        Self::Column(ColumnId(id))
    }

    pub fn compare(op: CompareOp, lhs: Expr, rhs: Expr) -> Self {
        Self::Compare {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Whether this expression is a plain scalar write (the only write
    /// instruction the write planner accepts).
    pub fn is_scalar(&self) -> bool {
        matches!(self, Expr::Value(_))
    }

    /// Evaluate against a row.
    pub fn eval(&self, row: &Row) -> Result<Value> {
        match self {
            Expr::Value(v) => Ok(v.clone()),
            Expr::Column(id) => Ok(row.value_or_null(*id)),
            Expr::Compare { op, lhs, rhs } => {
                let left = lhs.eval(row)?;
                let right = rhs.eval(row)?;
                let ordering = left.compare(&right)?;
                use std::cmp::Ordering;
                let result = match op {
                    CompareOp::Eq => ordering == Ordering::Equal,
                    CompareOp::Ne => ordering != Ordering::Equal,
                    CompareOp::Lt => ordering == Ordering::Less,
                    CompareOp::Le => ordering != Ordering::Greater,
                    CompareOp::Gt => ordering == Ordering::Greater,
                    CompareOp::Ge => ordering != Ordering::Less,
                };
                Ok(Value::Bool(result))
            }
            Expr::And(parts) => {
                for part in parts {
                    if !part.eval(row)?.as_bool()? {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
        }
    }
}
