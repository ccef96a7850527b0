use std::fmt;

/// Type descriptor carried by every node.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
    Real,
    Integer,
    Boolean,
    Vector(Box<ValueType>),
}
impl ValueType {
    pub fn vector_of(element: ValueType) -> Self {
        ValueType::Vector(Box::new(element))
    }
    pub fn element(&self) -> Option<&ValueType> {
        match self {
            ValueType::Vector(e) => Some(e),
            _ => None,
        }
    }
    /// Placeholder stored in container slots that have not been assigned yet.
    pub fn default_value(&self) -> Value {
        match self {
            ValueType::Real => Value::Real(0.0),
            ValueType::Integer => Value::Integer(0),
            ValueType::Boolean => Value::Boolean(false),
            ValueType::Vector(_) => Value::Vector(Vec::new()),
        }
    }
}
impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Real => write!(f, "Real"),
            ValueType::Integer => write!(f, "Integer"),
            ValueType::Boolean => write!(f, "Boolean"),
            ValueType::Vector(e) => write!(f, "{}[]", e),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Real(f64),
    Integer(i64),
    Boolean(bool),
    Vector(Vec<Value>),
}
impl Value {
    pub fn reals(xs: &[f64]) -> Self {
        Value::Vector(xs.iter().copied().map(Value::Real).collect())
    }
    /// Element type of a vector is taken from its first element; empty vectors count as `Real[]`.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Real(_) => ValueType::Real,
            Value::Integer(_) => ValueType::Integer,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Vector(xs) => ValueType::vector_of(
                xs.first()
                    .map(Value::value_type)
                    .unwrap_or(ValueType::Real),
            ),
        }
    }
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Real(x) => Some(*x),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }
    pub fn as_vector(&self) -> Option<&[Value]> {
        match self {
            Value::Vector(xs) => Some(xs),
            _ => None,
        }
    }
    pub fn as_vector_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::Vector(xs) => Some(xs),
            _ => None,
        }
    }
    /// Number of scalar elements, recursing into vectors.
    pub fn num_elements(&self) -> usize {
        match self {
            Value::Vector(xs) => xs.iter().map(Value::num_elements).sum(),
            _ => 1,
        }
    }
    /// Exact equality, treating two NaNs with the same bits as equal.
    pub fn bit_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Real(a), Value::Real(b)) => a.to_bits() == b.to_bits(),
            (Value::Vector(a), Value::Vector(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.bit_eq(y))
            }
            _ => self == other,
        }
    }
}
impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Real(x)
    }
}
impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Real(x) => write!(f, "{}", x),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Value::Vector(xs) => {
                write!(f, "[ ")?;
                for (i, x) in xs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", x)?;
                }
                write!(f, " ]")
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn types() {
        assert_eq!(Value::Real(1.0).value_type(), ValueType::Real);
        assert_eq!(
            Value::reals(&[1.0, 2.0]).value_type(),
            ValueType::vector_of(ValueType::Real)
        );
        assert_eq!(
            Value::Vector(vec![Value::Boolean(true)]).value_type(),
            ValueType::vector_of(ValueType::Boolean)
        );
        assert_eq!(ValueType::vector_of(ValueType::Integer).to_string(), "Integer[]");
    }

    #[test]
    fn display() {
        assert_eq!(Value::reals(&[1.0, 2.5]).to_string(), "[ 1, 2.5 ]");
        assert_eq!(Value::Boolean(true).to_string(), "TRUE");
    }

    #[test]
    fn bit_equality() {
        assert!(Value::Real(f64::NAN).bit_eq(&Value::Real(f64::NAN)));
        assert!(!Value::Real(0.0).bit_eq(&Value::Real(-0.0)));
        assert!(Value::reals(&[1.0, 2.0]).bit_eq(&Value::reals(&[1.0, 2.0])));
    }
}
