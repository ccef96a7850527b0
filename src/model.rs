//! The model arena: sole owner of every node, and the place where edges
//! are created, rewired and torn down.

use std::collections::HashMap;

use rand_pcg::Pcg64;
use tinyset::Set64;

use crate::container::{ContainerNode, Plate};
use crate::distributions::Distribution;
use crate::error::{DagError, StructuralError, UsageError};
use crate::functions::{Function, TypedFunction, check_arguments};
use crate::node::{DeterministicNode, Node, NodeId, NodeKind, NodeStats, StochasticNode};
use crate::propagation::Toucher;
use crate::value::{Value, ValueType};

/// A model graph. Nodes are addressed by [`NodeId`] and live until they
/// are removed explicitly or released as orphans of a removed child.
#[derive(Clone, Debug, Default)]
pub struct Model {
    nodes: Vec<Option<Node>>,
    names: HashMap<String, NodeId>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.nodes.iter().flatten().count()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn contains(&self, id: NodeId) -> bool {
        matches!(self.nodes.get(id.index()), Some(Some(_)))
    }
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_some())
            .map(|(i, _)| NodeId(i as u32))
    }
    pub fn node(&self, id: NodeId) -> Result<&Node, StructuralError> {
        self.nodes
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or(StructuralError::UnknownNode(id))
    }
    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, StructuralError> {
        self.nodes
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(StructuralError::UnknownNode(id))
    }
    pub fn stats(&self, id: NodeId) -> Result<NodeStats, StructuralError> {
        Ok(self.node(id)?.stats())
    }
    pub fn parents(&self, id: NodeId) -> Result<Vec<NodeId>, StructuralError> {
        Ok(self.node(id)?.parents())
    }
    pub fn children(&self, id: NodeId) -> Result<&[NodeId], StructuralError> {
        Ok(self.node(id)?.children())
    }
    pub fn value_type(&self, id: NodeId) -> Result<ValueType, StructuralError> {
        Ok(self.node(id)?.value_type())
    }
    pub fn stochastic_nodes(&self) -> Vec<NodeId> {
        self.ids()
            .filter(|id| self.node(*id).is_ok_and(Node::is_stochastic))
            .collect()
    }

    fn insert(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Some(node));
        id
    }

    pub(crate) fn add_child(
        &mut self,
        parent: NodeId,
        child: NodeId,
    ) -> Result<(), StructuralError> {
        let children = &mut self.node_mut(parent)?.children;
        if !children.contains(&child) {
            children.push(child);
        }
        Ok(())
    }
    /// Removing an edge that does not exist is a no-op.
    pub(crate) fn remove_child(&mut self, parent: NodeId, child: NodeId) {
        if let Ok(p) = self.node_mut(parent) {
            p.children.retain(|c| *c != child);
        }
    }

    /// Is `candidate` reachable upwards from `node` (or `node` itself)?
    pub fn is_parent_in_dag(&self, node: NodeId, candidate: NodeId) -> bool {
        let mut visited = Set64::new();
        self.search_ancestors(node, candidate, &mut visited)
    }
    fn search_ancestors(&self, node: NodeId, candidate: NodeId, visited: &mut Set64<u32>) -> bool {
        if node == candidate {
            return true;
        }
        if !visited.insert(node.0) {
            return false;
        }
        match self.node(node) {
            Ok(n) => n
                .parents()
                .into_iter()
                .any(|p| self.search_ancestors(p, candidate, visited)),
            Err(_) => false,
        }
    }
    fn check_edge(&self, parent: NodeId, child: NodeId) -> Result<(), StructuralError> {
        self.node(parent)?;
        if self.is_parent_in_dag(parent, child) {
            return Err(StructuralError::Cycle { parent, child });
        }
        Ok(())
    }
    fn check_parameters(
        &self,
        params: &[NodeId],
        expected: &[ValueType],
    ) -> Result<(), StructuralError> {
        let found = params
            .iter()
            .map(|p| self.value_type(*p))
            .collect::<Result<Vec<_>, _>>()?;
        check_arguments(expected, &found)
    }
    fn check_type(expected: &ValueType, value: &Value) -> Result<(), StructuralError> {
        let found = value.value_type();
        if *expected != found {
            return Err(StructuralError::TypeMismatch {
                expected: expected.clone(),
                found,
            });
        }
        Ok(())
    }
    pub(crate) fn check_value(&self, id: NodeId, value: &Value) -> Result<(), StructuralError> {
        Self::check_type(&self.value_type(id)?, value)
    }
    fn link_parents(&mut self, id: NodeId) -> Result<(), StructuralError> {
        for p in self.node(id)?.parents() {
            self.add_child(p, id)?;
        }
        Ok(())
    }

    pub fn add_constant(&mut self, value: impl Into<Value>) -> NodeId {
        let id = self.insert(Node::new(NodeKind::Constant(value.into())));
        log::debug!("new constant node {}", id);
        id
    }

    pub fn add_deterministic(
        &mut self,
        function: impl Function + 'static,
    ) -> Result<NodeId, DagError> {
        self.add_deterministic_boxed(Box::new(function))
    }
    pub fn add_deterministic_boxed(
        &mut self,
        function: Box<dyn Function>,
    ) -> Result<NodeId, DagError> {
        let params = function.parameters().to_vec();
        self.check_parameters(&params, &function.argument_types())?;
        self.pull(&params)?;
        let value = {
            let args = self.raw_values(&params)?;
            function.compute(&args)?
        };
        let id = self.insert(Node::new(NodeKind::Deterministic(DeterministicNode {
            dirty: Default::default(),
            function: TypedFunction::new(function, value),
        })));
        self.link_parents(id)?;
        log::debug!("new deterministic node {} over {:?}", id, params);
        Ok(id)
    }

    pub fn add_stochastic(
        &mut self,
        distribution: impl Distribution + 'static,
        value: impl Into<Value>,
    ) -> Result<NodeId, DagError> {
        self.add_stochastic_boxed(Box::new(distribution), value.into())
    }
    pub fn add_stochastic_boxed(
        &mut self,
        distribution: Box<dyn Distribution>,
        value: Value,
    ) -> Result<NodeId, DagError> {
        let params = distribution.parameters().to_vec();
        self.check_parameters(&params, &distribution.parameter_types())?;
        Self::check_type(&distribution.value_type(), &value)?;
        let id = self.insert(Node::new(NodeKind::Stochastic(StochasticNode::new(
            distribution,
            value,
        ))));
        self.link_parents(id)?;
        self.ln_probability(id)?;
        log::debug!("new stochastic node {} over {:?}", id, params);
        Ok(id)
    }
    /// Adds a stochastic node whose initial value is drawn from its distribution.
    pub fn add_random_stochastic(
        &mut self,
        distribution: impl Distribution + 'static,
        g: &mut Pcg64,
    ) -> Result<NodeId, DagError> {
        let params = distribution.parameters().to_vec();
        self.check_parameters(&params, &distribution.parameter_types())?;
        self.pull(&params)?;
        let value = {
            let args = self.raw_values(&params)?;
            distribution.sample(&args, g)?
        };
        self.add_stochastic_boxed(Box::new(distribution), value)
    }
    /// Adds a stochastic node clamped to an observation.
    pub fn add_observed(
        &mut self,
        distribution: impl Distribution + 'static,
        value: impl Into<Value>,
    ) -> Result<NodeId, DagError> {
        self.add_observed_boxed(Box::new(distribution), value.into())
    }
    pub fn add_observed_boxed(
        &mut self,
        distribution: Box<dyn Distribution>,
        value: Value,
    ) -> Result<NodeId, DagError> {
        let id = self.add_stochastic_boxed(distribution, value)?;
        if let NodeKind::Stochastic(s) = &mut self.node_mut(id)?.kind {
            s.clamped = true;
        }
        Ok(id)
    }

    /// Adds a container whose slots are filled in row-major order from
    /// `elements`; remaining slots stay empty.
    pub fn add_container(
        &mut self,
        element_type: ValueType,
        length: Vec<usize>,
        elements: &[NodeId],
    ) -> Result<NodeId, DagError> {
        let plate = Plate::new(length)?;
        let size = plate.size();
        if elements.len() > size {
            return Err(StructuralError::TooManyElements {
                elements: elements.len(),
                size,
            }
            .into());
        }
        for e in elements {
            let found = self.value_type(*e)?;
            if found != element_type {
                return Err(StructuralError::TypeMismatch {
                    expected: element_type,
                    found,
                }
                .into());
            }
        }
        self.pull(elements)?;
        let mut slots = vec![None; size];
        let mut values = vec![element_type.default_value(); size];
        for (offset, e) in elements.iter().enumerate() {
            slots[offset] = Some(*e);
            values[offset] = self.node(*e)?.raw_value().clone();
        }
        let id = self.insert(Node::new(NodeKind::Container(ContainerNode::new(
            plate,
            element_type,
            slots,
            values,
        ))));
        self.link_parents(id)?;
        log::debug!("new container node {} with {} elements", id, elements.len());
        Ok(id)
    }
    pub fn add_vector(
        &mut self,
        element_type: ValueType,
        elements: &[NodeId],
    ) -> Result<NodeId, DagError> {
        self.add_container(element_type, vec![elements.len()], elements)
    }

    /// Binds `name` to `id`. A name already bound elsewhere is moved.
    pub fn set_name(&mut self, id: NodeId, name: &str) -> Result<(), StructuralError> {
        self.node(id)?;
        if let Some(previous) = self.names.insert(name.to_string(), id) {
            if previous != id {
                if let Ok(p) = self.node_mut(previous) {
                    p.name = None;
                }
            }
        }
        let node = self.node_mut(id)?;
        if let Some(old) = node.name.replace(name.to_string()) {
            if old != name {
                self.names.remove(&old);
            }
        }
        Ok(())
    }
    pub fn lookup(&self, name: &str) -> Result<NodeId, UsageError> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| UsageError::UnknownName(name.to_string()))
    }
    /// Children plus one if the node is bound to a name.
    pub fn num_references(&self, id: NodeId) -> Result<usize, StructuralError> {
        let node = self.node(id)?;
        Ok(node.children.len() + usize::from(node.name.is_some()))
    }

    /// Removes a node that no child depends on. Parents left without any
    /// reference are released as well.
    pub fn remove_node(&mut self, id: NodeId) -> Result<(), DagError> {
        let node = self.node(id)?;
        if !node.children.is_empty() {
            return Err(StructuralError::StillReferenced {
                node: id,
                references: self.num_references(id)?,
            }
            .into());
        }
        let parents = node.parents();
        if let Some(node) = self.nodes[id.index()].take() {
            if let Some(name) = node.name {
                self.names.remove(&name);
            }
        }
        log::debug!("removed node {}", id);
        for p in &parents {
            self.remove_child(*p, id);
        }
        for p in parents {
            self.release(p)?;
        }
        Ok(())
    }
    fn release(&mut self, id: NodeId) -> Result<(), DagError> {
        if self.contains(id) && self.num_references(id)? == 0 {
            self.remove_node(id)?;
        }
        Ok(())
    }

    /// Rewires `child` to read `new` wherever it read `old`. The new
    /// values downstream are committed straight away: a rewire has no
    /// rollback.
    pub fn swap_parent(&mut self, child: NodeId, old: NodeId, new: NodeId) -> Result<(), DagError> {
        if !self.node(child)?.has_parent(old) {
            return Err(StructuralError::NotAParent { parent: old, child }.into());
        }
        let expected = self.value_type(old)?;
        let found = self.value_type(new)?;
        if expected != found {
            return Err(StructuralError::TypeMismatch { expected, found }.into());
        }
        self.check_edge(new, child)?;
        self.node_mut(child)?.swap_parent(old, new);
        self.remove_child(old, child);
        self.add_child(new, child)?;
        log::debug!("node {} now reads {} instead of {}", child, new, old);
        self.touch_with(child, Toucher::Parent(new))?;
        self.keep(child)?;
        self.release(old)
    }
    /// Rewires every child of `old` to `new`.
    pub fn replace(&mut self, old: NodeId, new: NodeId) -> Result<(), DagError> {
        let children = self.children(old)?.to_vec();
        for child in children {
            self.swap_parent(child, old, new)?;
        }
        Ok(())
    }

    pub(crate) fn container(&self, id: NodeId) -> Result<&ContainerNode, DagError> {
        self.node(id)?
            .as_container()
            .ok_or_else(|| UsageError::NotContainer(id).into())
    }
    pub(crate) fn container_mut(&mut self, id: NodeId) -> Result<&mut ContainerNode, DagError> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Container(c) => Ok(c),
            _ => Err(UsageError::NotContainer(id).into()),
        }
    }
    pub fn offset(&self, container: NodeId, index: &[usize]) -> Result<usize, DagError> {
        Ok(self.container(container)?.plate().offset(index)?)
    }
    pub fn element(&self, container: NodeId, index: &[usize]) -> Result<Option<NodeId>, DagError> {
        let offset = self.offset(container, index)?;
        Ok(self.container(container)?.element(offset))
    }
    /// Puts `node` into one slot of a container, refreshes only that slot
    /// and commits the result downstream.
    pub fn set_element(
        &mut self,
        container: NodeId,
        index: &[usize],
        node: NodeId,
    ) -> Result<(), DagError> {
        let offset = self.offset(container, index)?;
        let expected = self.container(container)?.element_type().clone();
        let found = self.value_type(node)?;
        if expected != found {
            return Err(StructuralError::TypeMismatch { expected, found }.into());
        }
        self.check_edge(node, container)?;
        let old = self.container_mut(container)?.set_slot(offset, node);
        self.add_child(node, container)?;
        if let Some(old) = old {
            if old != node && !self.node(container)?.has_parent(old) {
                self.remove_child(old, container);
                self.release(old)?;
            }
        }
        self.touch_with(container, Toucher::Element(offset))?;
        self.keep(container)
    }
    /// Grows a clean container. Existing elements keep their coordinates;
    /// the new shape is committed immediately.
    pub fn resize(&mut self, container: NodeId, length: Vec<usize>) -> Result<(), DagError> {
        if self.node(container)?.dirty().is_some_and(|d| d.is_touched()) {
            return Err(UsageError::Unresolved(container).into());
        }
        self.container_mut(container)?.resize(length)?;
        self.touch(container)?;
        self.keep(container)
    }

    /// Deep-clones the connected component of `id` into a fresh model.
    /// Returns the clone and the map from original to cloned handles.
    pub fn clone_dag(&self, id: NodeId) -> Result<(Model, HashMap<NodeId, NodeId>), DagError> {
        let mut target = Model::new();
        let mut map = HashMap::new();
        self.clone_into(id, &mut target, &mut map)?;
        for (&old, &new) in &map {
            let node = target.node_mut(new)?;
            node.remap_parents(|p| map.get(&p).copied().unwrap_or(p));
            for c in node.children.iter_mut() {
                *c = map.get(c).copied().unwrap_or(*c);
            }
            if let Some(name) = self.node(old)?.name() {
                target.names.insert(name.to_string(), new);
            }
        }
        log::debug!("cloned {} nodes reachable from {}", map.len(), id);
        Ok((target, map))
    }
    fn clone_into(
        &self,
        id: NodeId,
        target: &mut Model,
        map: &mut HashMap<NodeId, NodeId>,
    ) -> Result<NodeId, StructuralError> {
        if let Some(&copy) = map.get(&id) {
            return Ok(copy);
        }
        let node = self.node(id)?;
        let mut copy = node.clone();
        copy.stats = NodeStats::default();
        let new = target.insert(copy);
        map.insert(id, new);
        for p in node.parents() {
            self.clone_into(p, target, map)?;
        }
        for c in node.children() {
            self.clone_into(*c, target, map)?;
        }
        Ok(new)
    }
}
