//! Pluggable computations hosted by deterministic nodes.

use std::fmt;

use crate::error::{DagError, StructuralError};
use crate::node::NodeId;
use crate::value::{Value, ValueType};

/// A deterministic computation over the values of its parameter nodes.
///
/// Implementations record their parameters in order; `compute` receives the
/// current values of those parameters in the same order.
pub trait Function {
    fn name(&self) -> &'static str;
    fn parameters(&self) -> &[NodeId];
    fn parameters_mut(&mut self) -> &mut [NodeId];
    fn argument_types(&self) -> Vec<ValueType>;
    fn return_type(&self) -> ValueType;
    fn compute(&self, args: &[&Value]) -> Result<Value, DagError>;
    fn clone_box(&self) -> Box<dyn Function>;

    /// Replaces every occurrence of `old` among the parameters. Returns
    /// `false` if `old` is not a parameter.
    fn swap_parameter(&mut self, old: NodeId, new: NodeId) -> bool {
        let mut found = false;
        for p in self.parameters_mut() {
            if *p == old {
                *p = new;
                found = true;
            }
        }
        found
    }
}
impl fmt::Debug for dyn Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function<{}>{:?}", self.name(), self.parameters())
    }
}
impl Clone for Box<dyn Function> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

pub(crate) fn check_arguments(
    expected: &[ValueType],
    found: &[ValueType],
) -> Result<(), StructuralError> {
    if expected.len() != found.len() {
        return Err(StructuralError::Arity {
            expected: expected.len(),
            found: found.len(),
        });
    }
    for (e, f) in expected.iter().zip(found) {
        if e != f {
            return Err(StructuralError::TypeMismatch {
                expected: e.clone(),
                found: f.clone(),
            });
        }
    }
    Ok(())
}

fn real_arg(args: &[&Value], i: usize) -> Result<f64, DagError> {
    let v = args.get(i).ok_or(StructuralError::Arity {
        expected: i + 1,
        found: args.len(),
    })?;
    v.as_real().ok_or_else(|| {
        StructuralError::TypeMismatch {
            expected: ValueType::Real,
            found: v.value_type(),
        }
        .into()
    })
}

fn vector_arg<'a>(args: &[&'a Value], i: usize) -> Result<&'a [Value], DagError> {
    let v = args.get(i).ok_or(StructuralError::Arity {
        expected: i + 1,
        found: args.len(),
    })?;
    v.as_vector().ok_or_else(|| {
        StructuralError::TypeMismatch {
            expected: ValueType::vector_of(ValueType::Real),
            found: v.value_type(),
        }
        .into()
    })
}

/// The value buffer of a deterministic node together with the function
/// that fills it.
///
/// `stored` holds the value from before the most recent touch until `keep`
/// discards it or `restore` swaps it back. `dirty` mirrors the touched
/// state when the function is used on its own.
#[derive(Clone, Debug)]
pub struct TypedFunction {
    function: Box<dyn Function>,
    value: Value,
    stored: Option<Value>,
    dirty: bool,
}
impl TypedFunction {
    pub fn new(function: Box<dyn Function>, value: Value) -> Self {
        Self {
            function,
            value,
            stored: None,
            dirty: false,
        }
    }
    pub fn function(&self) -> &dyn Function {
        self.function.as_ref()
    }
    pub fn function_mut(&mut self) -> &mut dyn Function {
        self.function.as_mut()
    }
    pub fn value(&self) -> &Value {
        &self.value
    }
    pub fn stored_value(&self) -> Option<&Value> {
        self.stored.as_ref()
    }
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
    pub fn touch(&mut self) {
        self.dirty = true;
    }
    pub fn evaluate(&self, args: &[&Value]) -> Result<Value, DagError> {
        self.function.compute(args)
    }
    /// Installs a freshly computed value. The first install after a touch
    /// moves the old value into the rollback buffer; later ones overwrite.
    pub fn install(&mut self, value: Value) {
        if self.stored.is_none() {
            self.stored = Some(std::mem::replace(&mut self.value, value));
        } else {
            self.value = value;
        }
        self.dirty = false;
    }
    pub fn update(&mut self, args: &[&Value]) -> Result<(), DagError> {
        let value = self.evaluate(args)?;
        self.install(value);
        Ok(())
    }
    pub fn keep(&mut self) {
        self.stored = None;
        self.dirty = false;
    }
    pub fn restore(&mut self) {
        if let Some(value) = self.stored.take() {
            self.value = value;
        }
        self.dirty = false;
    }
}

/// `x * factor` for a constant factor.
#[derive(Clone, Debug)]
pub struct Scale {
    params: [NodeId; 1],
    factor: f64,
}
impl Scale {
    pub fn new(x: NodeId, factor: f64) -> Self {
        Self {
            params: [x],
            factor,
        }
    }
}
impl Function for Scale {
    fn name(&self) -> &'static str {
        "scale"
    }
    fn parameters(&self) -> &[NodeId] {
        &self.params
    }
    fn parameters_mut(&mut self) -> &mut [NodeId] {
        &mut self.params
    }
    fn argument_types(&self) -> Vec<ValueType> {
        vec![ValueType::Real]
    }
    fn return_type(&self) -> ValueType {
        ValueType::Real
    }
    fn compute(&self, args: &[&Value]) -> Result<Value, DagError> {
        Ok(Value::Real(real_arg(args, 0)? * self.factor))
    }
    fn clone_box(&self) -> Box<dyn Function> {
        Box::new(self.clone())
    }
}

/// A real-valued function of one real parameter.
#[derive(Clone, Debug)]
pub struct Unary {
    name: &'static str,
    params: [NodeId; 1],
    f: fn(f64) -> f64,
}
impl Unary {
    pub fn new(name: &'static str, x: NodeId, f: fn(f64) -> f64) -> Self {
        Self {
            name,
            params: [x],
            f,
        }
    }
    pub fn exp(x: NodeId) -> Self {
        Self::new("exp", x, f64::exp)
    }
    pub fn ln(x: NodeId) -> Self {
        Self::new("ln", x, f64::ln)
    }
}
impl Function for Unary {
    fn name(&self) -> &'static str {
        self.name
    }
    fn parameters(&self) -> &[NodeId] {
        &self.params
    }
    fn parameters_mut(&mut self) -> &mut [NodeId] {
        &mut self.params
    }
    fn argument_types(&self) -> Vec<ValueType> {
        vec![ValueType::Real]
    }
    fn return_type(&self) -> ValueType {
        ValueType::Real
    }
    fn compute(&self, args: &[&Value]) -> Result<Value, DagError> {
        Ok(Value::Real((self.f)(real_arg(args, 0)?)))
    }
    fn clone_box(&self) -> Box<dyn Function> {
        Box::new(self.clone())
    }
}

/// A real-valued function of two real parameters.
#[derive(Clone, Debug)]
pub struct Binary {
    name: &'static str,
    params: [NodeId; 2],
    f: fn(f64, f64) -> f64,
}
impl Binary {
    pub fn new(name: &'static str, a: NodeId, b: NodeId, f: fn(f64, f64) -> f64) -> Self {
        Self {
            name,
            params: [a, b],
            f,
        }
    }
    pub fn add(a: NodeId, b: NodeId) -> Self {
        Self::new("add", a, b, |a, b| a + b)
    }
    pub fn mul(a: NodeId, b: NodeId) -> Self {
        Self::new("mul", a, b, |a, b| a * b)
    }
    pub fn sub(a: NodeId, b: NodeId) -> Self {
        Self::new("sub", a, b, |a, b| a - b)
    }
}
impl Function for Binary {
    fn name(&self) -> &'static str {
        self.name
    }
    fn parameters(&self) -> &[NodeId] {
        &self.params
    }
    fn parameters_mut(&mut self) -> &mut [NodeId] {
        &mut self.params
    }
    fn argument_types(&self) -> Vec<ValueType> {
        vec![ValueType::Real, ValueType::Real]
    }
    fn return_type(&self) -> ValueType {
        ValueType::Real
    }
    fn compute(&self, args: &[&Value]) -> Result<Value, DagError> {
        Ok(Value::Real((self.f)(real_arg(args, 0)?, real_arg(args, 1)?)))
    }
    fn clone_box(&self) -> Box<dyn Function> {
        Box::new(self.clone())
    }
}

/// Sum of a real vector.
#[derive(Clone, Debug)]
pub struct Sum {
    params: [NodeId; 1],
}
impl Sum {
    pub fn new(v: NodeId) -> Self {
        Self { params: [v] }
    }
}
impl Function for Sum {
    fn name(&self) -> &'static str {
        "sum"
    }
    fn parameters(&self) -> &[NodeId] {
        &self.params
    }
    fn parameters_mut(&mut self) -> &mut [NodeId] {
        &mut self.params
    }
    fn argument_types(&self) -> Vec<ValueType> {
        vec![ValueType::vector_of(ValueType::Real)]
    }
    fn return_type(&self) -> ValueType {
        ValueType::Real
    }
    fn compute(&self, args: &[&Value]) -> Result<Value, DagError> {
        let xs = vector_arg(args, 0)?;
        let mut total = 0.0;
        for x in xs {
            total += real_arg(&[x], 0)?;
        }
        Ok(Value::Real(total))
    }
    fn clone_box(&self) -> Box<dyn Function> {
        Box::new(self.clone())
    }
}

/// Looks up one element of a vector value by flat offset.
#[derive(Clone, Debug)]
pub struct ElementAt {
    params: [NodeId; 1],
    offset: usize,
    element_type: ValueType,
}
impl ElementAt {
    pub fn new(v: NodeId, offset: usize, element_type: ValueType) -> Self {
        Self {
            params: [v],
            offset,
            element_type,
        }
    }
}
impl Function for ElementAt {
    fn name(&self) -> &'static str {
        "element"
    }
    fn parameters(&self) -> &[NodeId] {
        &self.params
    }
    fn parameters_mut(&mut self) -> &mut [NodeId] {
        &mut self.params
    }
    fn argument_types(&self) -> Vec<ValueType> {
        vec![ValueType::vector_of(self.element_type.clone())]
    }
    fn return_type(&self) -> ValueType {
        self.element_type.clone()
    }
    fn compute(&self, args: &[&Value]) -> Result<Value, DagError> {
        let xs = vector_arg(args, 0)?;
        xs.get(self.offset).cloned().ok_or_else(|| {
            StructuralError::IndexOutOfRange {
                index: self.offset,
                dimension: 0,
                length: xs.len(),
            }
            .into()
        })
    }
    fn clone_box(&self) -> Box<dyn Function> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn id(i: u32) -> NodeId {
        NodeId::new(i)
    }

    #[test]
    fn standalone_update_keep_restore() {
        let mut f = TypedFunction::new(Box::new(Scale::new(id(0), 2.0)), Value::Real(4.0));
        f.touch();
        assert!(f.is_dirty());
        f.update(&[&Value::Real(3.0)]).unwrap();
        assert!(!f.is_dirty());
        assert_eq!(f.value(), &Value::Real(6.0));
        assert_eq!(f.stored_value(), Some(&Value::Real(4.0)));

        // a second update within the same cycle keeps the original rollback value
        f.update(&[&Value::Real(5.0)]).unwrap();
        assert_eq!(f.stored_value(), Some(&Value::Real(4.0)));
        f.restore();
        assert_eq!(f.value(), &Value::Real(4.0));
        assert_eq!(f.stored_value(), None);

        f.update(&[&Value::Real(1.0)]).unwrap();
        f.keep();
        assert_eq!(f.value(), &Value::Real(2.0));
        assert_eq!(f.stored_value(), None);
    }

    #[test]
    fn swap_parameter_replaces_every_occurrence() {
        let mut f = Binary::mul(id(1), id(1));
        assert!(f.swap_parameter(id(1), id(7)));
        assert_eq!(f.parameters(), &[id(7), id(7)]);
        assert!(!f.swap_parameter(id(1), id(8)));
    }

    #[test]
    fn builtins() {
        let v = Value::reals(&[1.0, 2.0, 3.5]);
        assert_eq!(Sum::new(id(0)).compute(&[&v]).unwrap(), Value::Real(6.5));
        assert_eq!(
            ElementAt::new(id(0), 2, ValueType::Real).compute(&[&v]).unwrap(),
            Value::Real(3.5)
        );
        assert!(ElementAt::new(id(0), 3, ValueType::Real).compute(&[&v]).is_err());
        let two = Value::Real(2.0);
        assert_eq!(
            Binary::add(id(0), id(1)).compute(&[&two, &two]).unwrap(),
            Value::Real(4.0)
        );
        assert_eq!(
            Unary::ln(id(0)).compute(&[&Value::Real(1.0)]).unwrap(),
            Value::Real(0.0)
        );
        assert!(Scale::new(id(0), 1.0).compute(&[&Value::Boolean(true)]).is_err());
    }

    #[test]
    fn argument_check() {
        assert!(check_arguments(&[ValueType::Real], &[ValueType::Real]).is_ok());
        assert_eq!(
            check_arguments(&[ValueType::Real], &[]),
            Err(StructuralError::Arity {
                expected: 1,
                found: 0
            })
        );
        assert!(matches!(
            check_arguments(&[ValueType::Real], &[ValueType::Boolean]),
            Err(StructuralError::TypeMismatch { .. })
        ));
    }
}
