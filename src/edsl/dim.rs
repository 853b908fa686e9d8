//! Symbolic tensor dimensions.
//!
//! Padding amounts computed from an auto-pad policy may depend on dimensions
//! that are only known once the program is bound to concrete inputs. A
//! [`TensorDim`] is either a known integer or an expression over named
//! symbols; arithmetic on two known values folds immediately, anything that
//! touches a symbol stays deferred until [`TensorDim::evaluate`] is called
//! with bindings.

use std::collections::HashMap;
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TensorDim {
    Value(i64),
    Symbol(String),
    Add(Box<TensorDim>, Box<TensorDim>),
    Sub(Box<TensorDim>, Box<TensorDim>),
    Mul(Box<TensorDim>, Box<TensorDim>),
    /// Floor division.
    Div(Box<TensorDim>, Box<TensorDim>),
    Max(Box<TensorDim>, Box<TensorDim>),
}

impl TensorDim {
    pub fn value(value: i64) -> Self {
        TensorDim::Value(value)
    }

    pub fn symbol(name: impl Into<String>) -> Self {
        TensorDim::Symbol(name.into())
    }

    /// The folded value, if no symbol is involved.
    pub fn as_value(&self) -> Option<i64> {
        match self {
            TensorDim::Value(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_known(&self) -> bool {
        self.as_value().is_some()
    }

    pub fn max(self, other: impl Into<TensorDim>) -> TensorDim {
        let other = other.into();
        match (&self, &other) {
            (TensorDim::Value(a), TensorDim::Value(b)) => TensorDim::Value(*a.max(b)),
            _ => TensorDim::Max(Box::new(self), Box::new(other)),
        }
    }

    /// Resolve the expression against symbol bindings.
    pub fn evaluate(&self, bindings: &HashMap<String, i64>) -> Result<i64> {
        match self {
            TensorDim::Value(v) => Ok(*v),
            TensorDim::Symbol(name) => bindings.get(name).copied().ok_or_else(|| {
                Error::Execution(format!("Unbound symbolic dimension '{}'", name))
            }),
            TensorDim::Add(a, b) => Ok(a.evaluate(bindings)? + b.evaluate(bindings)?),
            TensorDim::Sub(a, b) => Ok(a.evaluate(bindings)? - b.evaluate(bindings)?),
            TensorDim::Mul(a, b) => Ok(a.evaluate(bindings)? * b.evaluate(bindings)?),
            TensorDim::Div(a, b) => {
                let divisor = b.evaluate(bindings)?;
                if divisor == 0 {
                    return Err(Error::Execution(format!(
                        "Division by zero while evaluating dimension {}",
                        self
                    )));
                }
                Ok(a.evaluate(bindings)?.div_euclid(divisor))
            }
            TensorDim::Max(a, b) => Ok(a.evaluate(bindings)?.max(b.evaluate(bindings)?)),
        }
    }
}

impl From<i64> for TensorDim {
    fn from(value: i64) -> Self {
        TensorDim::Value(value)
    }
}

impl From<usize> for TensorDim {
    fn from(value: usize) -> Self {
        TensorDim::Value(value as i64)
    }
}

macro_rules! impl_dim_op {
    ($trait:ident, $method:ident, $variant:ident, $fold:expr) => {
        impl<T: Into<TensorDim>> $trait<T> for TensorDim {
            type Output = TensorDim;

            fn $method(self, rhs: T) -> TensorDim {
                let rhs = rhs.into();
                match (&self, &rhs) {
                    (TensorDim::Value(a), TensorDim::Value(b)) => {
                        let fold: fn(i64, i64) -> Option<i64> = $fold;
                        match fold(*a, *b) {
                            Some(v) => TensorDim::Value(v),
                            None => TensorDim::$variant(Box::new(self), Box::new(rhs)),
                        }
                    }
                    _ => TensorDim::$variant(Box::new(self), Box::new(rhs)),
                }
            }
        }
    };
}

impl_dim_op!(Add, add, Add, |a, b| Some(a + b));
impl_dim_op!(Sub, sub, Sub, |a, b| Some(a - b));
impl_dim_op!(Mul, mul, Mul, |a, b| Some(a * b));
// Division by a known zero stays deferred so the error surfaces on evaluation.
impl_dim_op!(Div, div, Div, |a, b| if b == 0 { None } else { Some(a.div_euclid(b)) });

impl fmt::Display for TensorDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TensorDim::Value(v) => write!(f, "{}", v),
            TensorDim::Symbol(name) => write!(f, "{}", name),
            TensorDim::Add(a, b) => write!(f, "({} + {})", a, b),
            TensorDim::Sub(a, b) => write!(f, "({} - {})", a, b),
            TensorDim::Mul(a, b) => write!(f, "({} * {})", a, b),
            TensorDim::Div(a, b) => write!(f, "({} / {})", a, b),
            TensorDim::Max(a, b) => write!(f, "max({}, {})", a, b),
        }
    }
}
