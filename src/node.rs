//! Node payloads stored in the model arena.

use std::fmt;

use crate::container::ContainerNode;
use crate::distributions::{Distribution, LogLikelihood};
use crate::functions::TypedFunction;
use crate::value::{Value, ValueType};

/// Stable handle of a node inside a [`Model`](crate::Model).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) u32);
impl NodeId {
    pub fn new(x: u32) -> Self {
        Self(x)
    }
    pub fn index(self) -> usize {
        self.0 as usize
    }
}
impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NodeId").field(&self.0).finish()
    }
}
impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirtyState {
    Clean,
    Touched,
    TouchedChanged,
}

/// Touched/changed flags of a variable node. `changed` implies `touched`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Dirty {
    touched: bool,
    changed: bool,
}
impl Dirty {
    pub fn state(self) -> DirtyState {
        match (self.touched, self.changed) {
            (false, _) => DirtyState::Clean,
            (true, false) => DirtyState::Touched,
            (true, true) => DirtyState::TouchedChanged,
        }
    }
    pub fn is_touched(self) -> bool {
        self.touched
    }
    pub fn is_changed(self) -> bool {
        self.changed
    }
    pub fn needs_update(self) -> bool {
        self.touched && !self.changed
    }
    /// Marks the node for recomputation, re-dirtying it if it had already
    /// been updated in this cycle.
    pub(crate) fn touch(&mut self) {
        self.touched = true;
        self.changed = false;
    }
    pub(crate) fn mark_changed(&mut self) {
        if self.touched {
            self.changed = true;
        }
    }
    pub(crate) fn reset(&mut self) {
        self.touched = false;
        self.changed = false;
    }
}

/// Instrumentation counters, mostly useful in tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NodeStats {
    /// Recomputations of the node's value.
    pub updates: u64,
    /// Reads of the node's value by a child during the child's update.
    pub reads: u64,
    /// Density evaluations of a stochastic node.
    pub density_evaluations: u64,
}

#[derive(Clone, Debug)]
pub struct DeterministicNode {
    pub(crate) dirty: Dirty,
    pub(crate) function: TypedFunction,
}
impl DeterministicNode {
    pub fn function(&self) -> &TypedFunction {
        &self.function
    }
}

#[derive(Clone, Debug)]
pub struct StochasticNode {
    pub(crate) dirty: Dirty,
    pub(crate) distribution: Box<dyn Distribution>,
    pub(crate) value: Value,
    pub(crate) stored_value: Option<Value>,
    pub(crate) clamped: bool,
    pub(crate) ln_prob: LogLikelihood,
    pub(crate) stored_ln_prob: LogLikelihood,
    pub(crate) needs_probability: bool,
}
impl StochasticNode {
    pub(crate) fn new(distribution: Box<dyn Distribution>, value: Value) -> Self {
        Self {
            dirty: Dirty::default(),
            distribution,
            value,
            stored_value: None,
            clamped: false,
            ln_prob: 0.0,
            stored_ln_prob: 0.0,
            needs_probability: true,
        }
    }
    pub fn distribution(&self) -> &dyn Distribution {
        self.distribution.as_ref()
    }
    pub fn is_clamped(&self) -> bool {
        self.clamped
    }
    pub fn stored_value(&self) -> Option<&Value> {
        self.stored_value.as_ref()
    }
    /// Replaces the value, saving the pre-proposal value on the first
    /// replacement since the last keep/restore.
    pub(crate) fn replace_value(&mut self, value: Value) {
        if self.stored_value.is_none() {
            self.stored_value = Some(std::mem::replace(&mut self.value, value));
        } else {
            self.value = value;
        }
    }
}

#[derive(Clone, Debug)]
pub enum NodeKind {
    Constant(Value),
    Deterministic(DeterministicNode),
    Stochastic(StochasticNode),
    Container(ContainerNode),
}

#[derive(Clone, Debug)]
pub struct Node {
    pub(crate) name: Option<String>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) kind: NodeKind,
    pub(crate) stats: NodeStats,
}
impl Node {
    pub(crate) fn new(kind: NodeKind) -> Self {
        Self {
            name: None,
            children: Vec::new(),
            kind,
            stats: NodeStats::default(),
        }
    }
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
    pub fn stats(&self) -> NodeStats {
        self.stats
    }
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            NodeKind::Constant(_) => "constant",
            NodeKind::Deterministic(_) => "deterministic",
            NodeKind::Stochastic(_) => "stochastic",
            NodeKind::Container(_) => "container",
        }
    }
    /// Parents in argument order; a node used twice appears twice.
    pub fn parents(&self) -> Vec<NodeId> {
        match &self.kind {
            NodeKind::Constant(_) => Vec::new(),
            NodeKind::Deterministic(d) => d.function.function().parameters().to_vec(),
            NodeKind::Stochastic(s) => s.distribution.parameters().to_vec(),
            NodeKind::Container(c) => c.parents(),
        }
    }
    pub fn has_parent(&self, parent: NodeId) -> bool {
        self.parents().contains(&parent)
    }
    /// Current value buffer, without any laziness.
    pub fn raw_value(&self) -> &Value {
        match &self.kind {
            NodeKind::Constant(v) => v,
            NodeKind::Deterministic(d) => d.function.value(),
            NodeKind::Stochastic(s) => &s.value,
            NodeKind::Container(c) => c.value(),
        }
    }
    pub fn value_type(&self) -> ValueType {
        match &self.kind {
            NodeKind::Constant(v) => v.value_type(),
            NodeKind::Deterministic(d) => d.function.function().return_type(),
            NodeKind::Stochastic(s) => s.distribution.value_type(),
            NodeKind::Container(c) => ValueType::vector_of(c.element_type().clone()),
        }
    }
    /// `None` for constants, which carry no dirty state.
    pub fn dirty(&self) -> Option<Dirty> {
        match &self.kind {
            NodeKind::Constant(_) => None,
            NodeKind::Deterministic(d) => Some(d.dirty),
            NodeKind::Stochastic(s) => Some(s.dirty),
            NodeKind::Container(c) => Some(c.dirty),
        }
    }
    pub(crate) fn dirty_mut(&mut self) -> Option<&mut Dirty> {
        match &mut self.kind {
            NodeKind::Constant(_) => None,
            NodeKind::Deterministic(d) => Some(&mut d.dirty),
            NodeKind::Stochastic(s) => Some(&mut s.dirty),
            NodeKind::Container(c) => Some(&mut c.dirty),
        }
    }
    pub fn state(&self) -> DirtyState {
        self.dirty().map_or(DirtyState::Clean, Dirty::state)
    }
    pub fn is_stochastic(&self) -> bool {
        matches!(self.kind, NodeKind::Stochastic(_))
    }
    pub fn is_constant(&self) -> bool {
        matches!(self.kind, NodeKind::Constant(_))
    }
    pub fn is_clamped(&self) -> bool {
        match &self.kind {
            NodeKind::Stochastic(s) => s.clamped,
            _ => false,
        }
    }
    pub fn as_stochastic(&self) -> Option<&StochasticNode> {
        match &self.kind {
            NodeKind::Stochastic(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_container(&self) -> Option<&ContainerNode> {
        match &self.kind {
            NodeKind::Container(c) => Some(c),
            _ => None,
        }
    }
    /// Rewrites parent handles in place, e.g. after cloning into another arena.
    pub(crate) fn remap_parents(&mut self, f: impl Fn(NodeId) -> NodeId) {
        match &mut self.kind {
            NodeKind::Constant(_) => {}
            NodeKind::Deterministic(d) => {
                for p in d.function.function_mut().parameters_mut() {
                    *p = f(*p);
                }
            }
            NodeKind::Stochastic(s) => {
                for p in s.distribution.parameters_mut() {
                    *p = f(*p);
                }
            }
            NodeKind::Container(c) => c.remap(f),
        }
    }
    pub(crate) fn swap_parent(&mut self, old: NodeId, new: NodeId) -> bool {
        match &mut self.kind {
            NodeKind::Constant(_) => false,
            NodeKind::Deterministic(d) => d.function.function_mut().swap_parameter(old, new),
            NodeKind::Stochastic(s) => s.distribution.swap_parameter(old, new),
            NodeKind::Container(c) => c.swap_parent(old, new),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dirty_transitions() {
        let mut d = Dirty::default();
        assert_eq!(d.state(), DirtyState::Clean);
        d.mark_changed();
        assert_eq!(d.state(), DirtyState::Clean);
        d.touch();
        assert_eq!(d.state(), DirtyState::Touched);
        assert!(d.needs_update());
        d.mark_changed();
        assert_eq!(d.state(), DirtyState::TouchedChanged);
        d.touch();
        assert_eq!(d.state(), DirtyState::Touched);
        d.reset();
        assert_eq!(d.state(), DirtyState::Clean);
    }

    #[test]
    fn node_id_display() {
        assert_eq!(NodeId::new(4).to_string(), "#4");
        assert_eq!(NodeId::new(4).index(), 4);
    }
}
