//! Expression-style model construction.
//!
//! A [`Var`] describes a node before it exists. Cloned vars share an id,
//! so a var used in several places becomes one node with several
//! children when built.

use std::collections::HashMap;
use std::ops::{Add, Mul, Sub};
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};

use rand_pcg::Pcg64;

use crate::distributions::{Bernoulli, Distribution, Exponential, Normal, Uniform};
use crate::error::{DagError, UsageError};
use crate::functions::{Binary, ElementAt, Function, Scale, Sum, Unary};
use crate::model::Model;
use crate::node::NodeId;
use crate::value::{Value, ValueType};

fn gen_id() -> u32 {
    static COUNTER: AtomicU32 = AtomicU32::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

type LeafID = u32;
type Built = HashMap<LeafID, NodeId>;

trait Builder {
    fn build(
        &self,
        built: &mut Built,
        model: &mut Model,
        g: &mut Pcg64,
        observation: Option<&Value>,
    ) -> Result<NodeId, DagError>;
}

struct Val(Value);
impl Builder for Val {
    fn build(
        &self,
        _: &mut Built,
        model: &mut Model,
        _: &mut Pcg64,
        _: Option<&Value>,
    ) -> Result<NodeId, DagError> {
        Ok(model.add_constant(self.0.clone()))
    }
}

fn build_all(
    args: &[Var],
    built: &mut Built,
    model: &mut Model,
    g: &mut Pcg64,
) -> Result<Vec<NodeId>, DagError> {
    args.iter().map(|a| a.build(built, model, g)).collect()
}

type MakeFunction = Rc<dyn Fn(&[NodeId], &Model) -> Result<Box<dyn Function>, DagError>>;
struct Apply {
    args: Vec<Var>,
    f: MakeFunction,
}
impl Builder for Apply {
    fn build(
        &self,
        built: &mut Built,
        model: &mut Model,
        g: &mut Pcg64,
        _: Option<&Value>,
    ) -> Result<NodeId, DagError> {
        let params = build_all(&self.args, built, model, g)?;
        let function = (self.f)(&params, model)?;
        model.add_deterministic_boxed(function)
    }
}

struct Draw {
    args: Vec<Var>,
    f: fn(&[NodeId]) -> Box<dyn Distribution>,
}
impl Builder for Draw {
    fn build(
        &self,
        built: &mut Built,
        model: &mut Model,
        g: &mut Pcg64,
        observation: Option<&Value>,
    ) -> Result<NodeId, DagError> {
        let params = build_all(&self.args, built, model, g)?;
        let dist = (self.f)(&params);
        match observation {
            Some(x) => model.add_observed_boxed(dist, x.clone()),
            None => {
                model.pull(&params)?;
                let value = {
                    let args = model.raw_values(&params)?;
                    dist.sample(&args, g)?
                };
                model.add_stochastic_boxed(dist, value)
            }
        }
    }
}

struct Vector(Vec<Var>);
impl Builder for Vector {
    fn build(
        &self,
        built: &mut Built,
        model: &mut Model,
        g: &mut Pcg64,
        _: Option<&Value>,
    ) -> Result<NodeId, DagError> {
        let elements = build_all(&self.0, built, model, g)?;
        let element_type = match elements.first() {
            Some(e) => model.value_type(*e)?,
            None => ValueType::Real,
        };
        model.add_vector(element_type, &elements)
    }
}

/// A node to be built. Clones refer to the same node.
#[derive(Clone)]
pub struct Var {
    id: LeafID,
    builder: Rc<dyn Builder>,
    name: Option<Rc<str>>,
    observation: Option<Rc<Value>>,
}
impl Var {
    fn new(builder: Rc<dyn Builder>) -> Self {
        Self {
            id: gen_id(),
            builder,
            name: None,
            observation: None,
        }
    }
    fn apply(
        args: Vec<Var>,
        f: impl Fn(&[NodeId], &Model) -> Result<Box<dyn Function>, DagError> + 'static,
    ) -> Self {
        Self::new(Rc::new(Apply { args, f: Rc::new(f) }))
    }
    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.into());
        self
    }
    /// Clamps a random var to an observed value. The result is a new node.
    pub fn observe(&self, value: impl Into<Value>) -> Self {
        Self {
            id: gen_id(),
            builder: self.builder.clone(),
            name: self.name.clone(),
            observation: Some(Rc::new(value.into())),
        }
    }
    pub fn scale(self, factor: f64) -> Self {
        Self::apply(vec![self], move |p, _| Ok(Box::new(Scale::new(p[0], factor))))
    }
    pub fn exp(self) -> Self {
        Self::apply(vec![self], |p, _| Ok(Box::new(Unary::exp(p[0]))))
    }
    pub fn ln(self) -> Self {
        Self::apply(vec![self], |p, _| Ok(Box::new(Unary::ln(p[0]))))
    }
    pub fn sum(self) -> Self {
        Self::apply(vec![self], |p, _| Ok(Box::new(Sum::new(p[0]))))
    }
    /// Element `offset` of a vector var.
    pub fn at(self, offset: usize) -> Self {
        Self::apply(vec![self], move |p, model| {
            let element = model
                .value_type(p[0])?
                .element()
                .cloned()
                .ok_or(UsageError::NotContainer(p[0]))?;
            Ok(Box::new(ElementAt::new(p[0], offset, element)))
        })
    }

    fn build(
        &self,
        built: &mut Built,
        model: &mut Model,
        g: &mut Pcg64,
    ) -> Result<NodeId, DagError> {
        let id = match built.get(&self.id) {
            Some(&node) => node,
            None => {
                let observation = self.observation.as_deref();
                let node = self.builder.build(built, model, g, observation)?;
                if observation.is_some() && !model.node(node)?.is_stochastic() {
                    return Err(UsageError::NotStochastic(node).into());
                }
                built.insert(self.id, node);
                node
            }
        };
        if let Some(name) = &self.name {
            model.set_name(id, name)?;
        }
        Ok(id)
    }
}

/// Builds `roots` and everything they depend on into a fresh model,
/// returning the node of each root in order.
pub fn build(roots: &[&Var], g: &mut Pcg64) -> Result<(Model, Vec<NodeId>), DagError> {
    let mut model = Model::new();
    let ids = build_into(roots, &mut model, g)?;
    Ok((model, ids))
}
/// Builds `roots` into an existing model.
pub fn build_into(
    roots: &[&Var],
    model: &mut Model,
    g: &mut Pcg64,
) -> Result<Vec<NodeId>, DagError> {
    let mut built = HashMap::new();
    let ids = roots
        .iter()
        .map(|r| r.build(&mut built, model, g))
        .collect::<Result<Vec<_>, _>>()?;
    log::debug!("built {} nodes for {} roots", built.len(), roots.len());
    Ok(ids)
}

pub fn val(x: impl Into<Value>) -> Var {
    Var::new(Rc::new(Val(x.into())))
}
pub fn vector(xs: Vec<Var>) -> Var {
    Var::new(Rc::new(Vector(xs)))
}
pub fn exponential(rate: Var) -> Var {
    Var::new(Rc::new(Draw {
        args: vec![rate],
        f: |p| Box::new(Exponential::new(p[0])),
    }))
}
pub fn normal(mean: Var, sd: Var) -> Var {
    Var::new(Rc::new(Draw {
        args: vec![mean, sd],
        f: |p| Box::new(Normal::new(p[0], p[1])),
    }))
}
pub fn uniform(lower: Var, upper: Var) -> Var {
    Var::new(Rc::new(Draw {
        args: vec![lower, upper],
        f: |p| Box::new(Uniform::new(p[0], p[1])),
    }))
}
pub fn flip(p: Var) -> Var {
    Var::new(Rc::new(Draw {
        args: vec![p],
        f: |p| Box::new(Bernoulli::new(p[0])),
    }))
}

impl Add for Var {
    type Output = Var;
    fn add(self, rhs: Self) -> Self::Output {
        Var::apply(vec![self, rhs], |p, _| Ok(Box::new(Binary::add(p[0], p[1]))))
    }
}
impl Sub for Var {
    type Output = Var;
    fn sub(self, rhs: Self) -> Self::Output {
        Var::apply(vec![self, rhs], |p, _| Ok(Box::new(Binary::sub(p[0], p[1]))))
    }
}
impl Mul for Var {
    type Output = Var;
    fn mul(self, rhs: Self) -> Self::Output {
        Var::apply(vec![self, rhs], |p, _| Ok(Box::new(Binary::mul(p[0], p[1]))))
    }
}
