//! The touch / update / keep / restore protocol.
//!
//! A proposal touches one node; the touch spreads eagerly to every
//! descendant up to and including the first stochastic node on each path.
//! Values are recomputed lazily, each at most once, when something reads
//! them. Keep commits the recomputed values and restore swaps the
//! pre-proposal values back in. Stochastic children end the walk: their
//! density depends on their parents, their value does not.

use rand_pcg::Pcg64;
use tinyset::Set64;

use crate::container::Refresh;
use crate::distributions::{LogLikelihood, checked_log_density};
use crate::error::{DagError, StructuralError, UsageError};
use crate::model::Model;
use crate::node::{Dirty, NodeId, NodeKind, StochasticNode};
use crate::value::Value;

/// Who invalidated a node, which decides how much of a container is stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Toucher {
    Itself,
    Parent(NodeId),
    Element(usize),
}

impl Model {
    /// Invalidates `id` and everything downstream of it.
    pub fn touch(&mut self, id: NodeId) -> Result<(), DagError> {
        self.touch_with(id, Toucher::Itself)
    }
    pub(crate) fn touch_with(&mut self, id: NodeId, toucher: Toucher) -> Result<(), DagError> {
        log::debug!("touch {} ({:?})", id, toucher);
        self.touch_me(id, toucher)?;
        let mut visited = Set64::new();
        visited.insert(id.0);
        self.touch_affected(id, &mut visited)
    }
    // Every edge is marked, but each node's descendants are walked once.
    fn touch_affected(&mut self, id: NodeId, visited: &mut Set64<u32>) -> Result<(), DagError> {
        let children = self.node(id)?.children().to_vec();
        for child in children {
            self.touch_me(child, Toucher::Parent(id))?;
            if self.node(child)?.is_stochastic() {
                continue;
            }
            if visited.insert(child.0) {
                self.touch_affected(child, visited)?;
            }
        }
        Ok(())
    }
    fn touch_me(&mut self, id: NodeId, toucher: Toucher) -> Result<(), DagError> {
        let node = self.node_mut(id)?;
        match &mut node.kind {
            NodeKind::Constant(_) => {}
            NodeKind::Deterministic(d) => {
                d.dirty.touch();
                d.function.touch();
            }
            NodeKind::Stochastic(s) => {
                if !s.dirty.is_touched() {
                    s.stored_ln_prob = s.ln_prob;
                }
                s.needs_probability = true;
                s.dirty.touch();
            }
            NodeKind::Container(c) => {
                match toucher {
                    Toucher::Itself => c.touch_all(),
                    Toucher::Parent(p) => c.touch_parent(p),
                    Toucher::Element(offset) => c.touch_element(offset),
                }
                c.dirty.touch();
            }
        }
        log::trace!("{} is {:?}", id, node.state());
        Ok(())
    }

    /// Brings `ids` up to date and counts one read of each.
    pub(crate) fn pull(&mut self, ids: &[NodeId]) -> Result<(), DagError> {
        for id in ids {
            self.update(*id)?;
            self.node_mut(*id)?.stats.reads += 1;
        }
        Ok(())
    }
    pub(crate) fn raw_values(&self, ids: &[NodeId]) -> Result<Vec<&Value>, StructuralError> {
        ids.iter().map(|id| self.node(*id).map(|n| n.raw_value())).collect()
    }

    /// Recomputes `id` if it was touched and has not been recomputed since.
    /// Stale parents are brought up to date first.
    pub fn update(&mut self, id: NodeId) -> Result<(), DagError> {
        let node = self.node(id)?;
        if !node.dirty().is_some_and(Dirty::needs_update) {
            return Ok(());
        }
        if node.as_container().is_some() {
            self.update_container(id)
        } else if node.is_stochastic() {
            if let Some(d) = self.node_mut(id)?.dirty_mut() {
                d.mark_changed();
            }
            Ok(())
        } else {
            self.update_deterministic(id)
        }
    }
    fn update_deterministic(&mut self, id: NodeId) -> Result<(), DagError> {
        let params = self.node(id)?.parents();
        self.pull(&params)?;
        let value = {
            let args = self.raw_values(&params)?;
            match &self.node(id)?.kind {
                NodeKind::Deterministic(d) => d.function.evaluate(&args)?,
                _ => return Ok(()),
            }
        };
        let node = self.node_mut(id)?;
        node.stats.updates += 1;
        if let NodeKind::Deterministic(d) = &mut node.kind {
            d.function.install(value);
            d.dirty.mark_changed();
        }
        log::trace!("recomputed {}", id);
        Ok(())
    }
    fn update_container(&mut self, id: NodeId) -> Result<(), DagError> {
        let (refresh, elements, default) = {
            let c = self.container(id)?;
            (c.refresh(), c.elements().to_vec(), c.element_type().default_value())
        };
        match refresh {
            Refresh::Elements(offsets) => {
                log::trace!("refreshing {:?} of {}", offsets, id);
                for offset in offsets {
                    let value = match elements.get(offset).copied().flatten() {
                        Some(e) => {
                            self.pull(&[e])?;
                            self.node(e)?.raw_value().clone()
                        }
                        None => default.clone(),
                    };
                    self.container_mut(id)?.install_element(offset, value);
                }
            }
            Refresh::All => {
                let mut values = Vec::with_capacity(elements.len());
                for slot in &elements {
                    match slot {
                        Some(e) => {
                            self.pull(&[*e])?;
                            values.push(self.node(*e)?.raw_value().clone());
                        }
                        None => values.push(default.clone()),
                    }
                }
                self.container_mut(id)?.install_all(values);
            }
        }
        let node = self.node_mut(id)?;
        node.stats.updates += 1;
        if let Some(d) = node.dirty_mut() {
            d.mark_changed();
        }
        Ok(())
    }

    /// The up-to-date value of `id`, recomputing it if needed.
    pub fn value(&mut self, id: NodeId) -> Result<&Value, DagError> {
        self.update(id)?;
        Ok(self.node(id)?.raw_value())
    }
    /// The value of `id` without recomputation. Fails on a deterministic
    /// or container node that is touched and not yet recomputed.
    pub fn const_value(&self, id: NodeId) -> Result<&Value, DagError> {
        let node = self.node(id)?;
        let resolvable = node.is_stochastic() || node.is_constant();
        if !resolvable && node.dirty().is_some_and(Dirty::needs_update) {
            return Err(UsageError::Unresolved(id).into());
        }
        Ok(node.raw_value())
    }

    /// Replaces the value of a constant node and touches its descendants.
    /// Constants hold no rollback buffer: restore brings the descendants
    /// back but not the constant, so follow this with keep.
    pub fn set_constant(&mut self, id: NodeId, value: impl Into<Value>) -> Result<(), DagError> {
        let value = value.into();
        self.check_value(id, &value)?;
        match &mut self.node_mut(id)?.kind {
            NodeKind::Constant(v) => *v = value,
            _ => return Err(UsageError::NotConstant(id).into()),
        }
        self.touch(id)
    }

    /// Commits `id` and everything it touched.
    pub fn keep(&mut self, id: NodeId) -> Result<(), DagError> {
        self.keep_me(id)?;
        let mut visited = Set64::new();
        visited.insert(id.0);
        self.keep_affected(id, &mut visited)
    }
    fn keep_affected(&mut self, id: NodeId, visited: &mut Set64<u32>) -> Result<(), DagError> {
        let children = self.node(id)?.children().to_vec();
        for child in children {
            if !visited.insert(child.0) {
                continue;
            }
            let node = self.node(child)?;
            if !node.dirty().is_some_and(Dirty::is_touched) {
                continue;
            }
            let stochastic = node.is_stochastic();
            self.keep_me(child)?;
            if !stochastic {
                self.keep_affected(child, visited)?;
            }
        }
        Ok(())
    }
    fn keep_me(&mut self, id: NodeId) -> Result<(), DagError> {
        let node = self.node(id)?;
        let Some(dirty) = node.dirty() else {
            return Ok(());
        };
        if dirty.is_touched() {
            if node.is_stochastic() {
                self.ln_probability(id)?;
            } else {
                self.update(id)?;
            }
        }
        let node = self.node_mut(id)?;
        match &mut node.kind {
            NodeKind::Constant(_) => {}
            NodeKind::Deterministic(d) => d.function.keep(),
            NodeKind::Stochastic(s) => {
                s.stored_value = None;
                s.needs_probability = false;
            }
            NodeKind::Container(c) => c.keep(),
        }
        if let Some(d) = node.dirty_mut() {
            d.reset();
        }
        Ok(())
    }

    /// Rolls `id` and everything it touched back to the last committed state.
    pub fn restore(&mut self, id: NodeId) -> Result<(), DagError> {
        self.restore_me(id)?;
        let mut visited = Set64::new();
        visited.insert(id.0);
        self.restore_affected(id, &mut visited)
    }
    fn restore_affected(&mut self, id: NodeId, visited: &mut Set64<u32>) -> Result<(), DagError> {
        let children = self.node(id)?.children().to_vec();
        for child in children {
            if !visited.insert(child.0) {
                continue;
            }
            let node = self.node(child)?;
            if !node.dirty().is_some_and(Dirty::is_touched) {
                continue;
            }
            let stochastic = node.is_stochastic();
            self.restore_me(child)?;
            if !stochastic {
                self.restore_affected(child, visited)?;
            }
        }
        Ok(())
    }
    fn restore_me(&mut self, id: NodeId) -> Result<(), DagError> {
        let node = self.node_mut(id)?;
        let touched = node.dirty().is_some_and(Dirty::is_touched);
        match &mut node.kind {
            NodeKind::Constant(_) => {}
            NodeKind::Deterministic(d) => d.function.restore(),
            NodeKind::Stochastic(s) => {
                if let Some(v) = s.stored_value.take() {
                    s.value = v;
                }
                if touched {
                    s.ln_prob = s.stored_ln_prob;
                }
                s.needs_probability = false;
            }
            NodeKind::Container(c) => c.restore(),
        }
        if let Some(d) = node.dirty_mut() {
            d.reset();
        }
        log::trace!("restored {}", id);
        Ok(())
    }

    pub(crate) fn stochastic(&self, id: NodeId) -> Result<&StochasticNode, DagError> {
        self.node(id)?
            .as_stochastic()
            .ok_or_else(|| UsageError::NotStochastic(id).into())
    }
    fn stochastic_mut(&mut self, id: NodeId) -> Result<&mut StochasticNode, DagError> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Stochastic(s) => Ok(s),
            _ => Err(UsageError::NotStochastic(id).into()),
        }
    }

    /// Proposes a new value for an unclamped stochastic node and touches it.
    pub fn set_value(&mut self, id: NodeId, value: impl Into<Value>) -> Result<(), DagError> {
        let value = value.into();
        if self.stochastic(id)?.clamped {
            return Err(UsageError::Clamped(id).into());
        }
        self.check_value(id, &value)?;
        self.stochastic_mut(id)?.replace_value(value);
        self.touch(id)
    }
    /// Binds a stochastic node to an observation and commits it.
    pub fn clamp(&mut self, id: NodeId, value: impl Into<Value>) -> Result<(), DagError> {
        let value = value.into();
        if self.stochastic(id)?.clamped {
            return Err(UsageError::AlreadyClamped(id).into());
        }
        self.check_value(id, &value)?;
        let s = self.stochastic_mut(id)?;
        s.replace_value(value);
        s.clamped = true;
        self.touch(id)?;
        self.keep(id)
    }
    pub fn unclamp(&mut self, id: NodeId) -> Result<(), DagError> {
        self.stochastic_mut(id)?.clamped = false;
        Ok(())
    }
    /// Draws a new value from the node's distribution and touches it.
    pub fn redraw(&mut self, id: NodeId, g: &mut Pcg64) -> Result<(), DagError> {
        let s = self.stochastic(id)?;
        if s.clamped {
            return Err(UsageError::Clamped(id).into());
        }
        let params = s.distribution.parameters().to_vec();
        self.pull(&params)?;
        let value = {
            let args = self.raw_values(&params)?;
            self.stochastic(id)?.distribution.sample(&args, g)?
        };
        self.stochastic_mut(id)?.replace_value(value);
        self.touch(id)
    }

    /// Log density of a stochastic node's value under its distribution,
    /// cached until the node or one of its parents is touched. Parameter
    /// values outside a distribution's domain give negative infinity.
    /// Nodes that are not stochastic contribute zero.
    pub fn ln_probability(&mut self, id: NodeId) -> Result<LogLikelihood, DagError> {
        let params = match &self.node(id)?.kind {
            NodeKind::Stochastic(s) if !s.needs_probability => return Ok(s.ln_prob),
            NodeKind::Stochastic(s) => s.distribution.parameters().to_vec(),
            _ => return Ok(0.0),
        };
        self.pull(&params)?;
        let ln_prob = {
            let args = self.raw_values(&params)?;
            let s = self.stochastic(id)?;
            match checked_log_density(s.distribution.as_ref(), &s.value, &args) {
                Ok(x) => x,
                Err(e) => {
                    log::debug!("density of {} failed ({}), treating as -inf", id, e);
                    f64::NEG_INFINITY
                }
            }
        };
        let node = self.node_mut(id)?;
        node.stats.density_evaluations += 1;
        if let NodeKind::Stochastic(s) = &mut node.kind {
            s.ln_prob = ln_prob;
            s.needs_probability = false;
            s.dirty.mark_changed();
        }
        Ok(ln_prob)
    }
    /// `ln p(new) - ln p(old)` across the current proposal; zero if untouched.
    pub fn ln_probability_ratio(&mut self, id: NodeId) -> Result<LogLikelihood, DagError> {
        if !self.node(id)?.is_stochastic() {
            return Ok(0.0);
        }
        let new = self.ln_probability(id)?;
        let s = self.stochastic(id)?;
        if !s.dirty.is_touched() {
            return Ok(0.0);
        }
        Ok(log_ratio(new, s.stored_ln_prob))
    }

    /// Stochastic nodes whose density depends on `id` through deterministic
    /// or container nodes, in discovery order.
    pub fn affected_stochastic(&self, id: NodeId) -> Result<Vec<NodeId>, DagError> {
        let mut affected = Vec::new();
        let mut visited = Set64::new();
        self.collect_affected(id, &mut visited, &mut affected)?;
        Ok(affected)
    }
    fn collect_affected(
        &self,
        id: NodeId,
        visited: &mut Set64<u32>,
        affected: &mut Vec<NodeId>,
    ) -> Result<(), DagError> {
        for child in self.node(id)?.children() {
            if !visited.insert(child.0) {
                continue;
            }
            if self.node(*child)?.is_stochastic() {
                affected.push(*child);
            } else {
                self.collect_affected(*child, visited, affected)?;
            }
        }
        Ok(())
    }
    /// Log prior ratio of the proposal on `id`.
    pub fn ln_prior_ratio(&mut self, id: NodeId) -> Result<LogLikelihood, DagError> {
        self.ln_probability_ratio(id)
    }
    /// Sum of the log probability ratios of every stochastic node affected
    /// by the proposal on `id`.
    pub fn ln_likelihood_ratio(&mut self, id: NodeId) -> Result<LogLikelihood, DagError> {
        let mut total = 0.0;
        for a in self.affected_stochastic(id)? {
            total += self.ln_probability_ratio(a)?;
        }
        Ok(if total.is_nan() { f64::NEG_INFINITY } else { total })
    }

    /// Nodes currently touched.
    pub fn dirty_nodes(&self) -> Vec<NodeId> {
        self.ids()
            .filter(|id| {
                self.node(*id)
                    .is_ok_and(|n| n.dirty().is_some_and(Dirty::is_touched))
            })
            .collect()
    }
    pub fn is_clean(&self) -> bool {
        self.dirty_nodes().is_empty()
    }
    /// Sum of the log probabilities of every stochastic node.
    pub fn ln_posterior(&mut self) -> Result<LogLikelihood, DagError> {
        let mut total = 0.0;
        for id in self.stochastic_nodes() {
            total += self.ln_probability(id)?;
        }
        Ok(total)
    }
}

fn log_ratio(new: LogLikelihood, old: LogLikelihood) -> LogLikelihood {
    if new == f64::NEG_INFINITY {
        f64::NEG_INFINITY
    } else if old == f64::NEG_INFINITY {
        f64::INFINITY
    } else {
        new - old
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::distributions::{Exponential, Normal};
    use crate::functions::{Binary, ElementAt, Scale, Sum, Unary};
    use crate::node::DirtyState;
    use crate::value::ValueType;
    use rand::SeedableRng;

    fn chain() -> (Model, NodeId, NodeId, NodeId) {
        let mut m = Model::new();
        let a = m.add_constant(2.0);
        let b = m.add_deterministic(Scale::new(a, 2.0)).unwrap();
        let c = m.add_deterministic(Scale::new(b, 2.0)).unwrap();
        (m, a, b, c)
    }

    #[test]
    fn chain_recomputes_once() {
        let (mut m, a, b, c) = chain();
        assert_eq!(m.value(c).unwrap(), &Value::Real(8.0));
        m.set_constant(a, 3.0).unwrap();
        assert_eq!(m.node(b).unwrap().state(), DirtyState::Touched);
        assert_eq!(m.node(c).unwrap().state(), DirtyState::Touched);
        assert_eq!(m.const_value(c), Err(DagError::Usage(UsageError::Unresolved(c))));
        assert_eq!(m.value(c).unwrap(), &Value::Real(12.0));
        assert_eq!(m.value(c).unwrap(), &Value::Real(12.0));
        assert_eq!(m.stats(c).unwrap().updates, 1);
        assert_eq!(m.stats(b).unwrap().updates, 1);
        assert_eq!(m.node(c).unwrap().state(), DirtyState::TouchedChanged);
        m.keep(a).unwrap();
        assert!(m.is_clean());
        assert_eq!(m.const_value(c).unwrap(), &Value::Real(12.0));
    }

    #[test]
    fn touch_in_the_middle() {
        let (mut m, _, b, c) = chain();
        m.touch(b).unwrap();
        assert_eq!(m.value(c).unwrap(), &Value::Real(8.0));
        assert_eq!(m.stats(c).unwrap().updates, 1);
        m.restore(b).unwrap();
        assert!(m.is_clean());
    }

    #[test]
    fn diamond_updates_each_node_once() {
        let mut m = Model::new();
        let mean = m.add_constant(0.0);
        let sd = m.add_constant(1.0);
        let x = m.add_stochastic(Normal::new(mean, sd), 1.0).unwrap();
        let left = m.add_deterministic(Scale::new(x, 2.0)).unwrap();
        let right = m.add_deterministic(Scale::new(x, 3.0)).unwrap();
        let join = m.add_deterministic(Binary::add(left, right)).unwrap();
        let top = m.add_deterministic(Binary::mul(join, join)).unwrap();

        m.set_value(x, 2.0).unwrap();
        let dirty = m.dirty_nodes();
        assert_eq!(dirty, vec![x, left, right, join, top]);
        assert_eq!(m.value(top).unwrap(), &Value::Real(100.0));
        for n in [left, right, join, top] {
            assert_eq!(m.stats(n).unwrap().updates, 1);
        }
        m.keep(x).unwrap();
        assert!(m.is_clean());
    }

    fn stochastic_chain() -> (Model, NodeId, NodeId, NodeId) {
        let mut m = Model::new();
        let mean = m.add_constant(0.0);
        let sd = m.add_constant(1.0);
        let a = m.add_stochastic(Normal::new(mean, sd), 2.0).unwrap();
        let b = m.add_deterministic(Scale::new(a, 2.0)).unwrap();
        let c = m.add_deterministic(Scale::new(b, 2.0)).unwrap();
        (m, a, b, c)
    }

    #[test]
    fn retouch_keeps_first_rollback() {
        let (mut m, a, b, c) = stochastic_chain();
        m.set_value(a, 3.0).unwrap();
        assert_eq!(m.value(c).unwrap(), &Value::Real(12.0));
        // a second touch in the same cycle re-dirties a changed node
        m.touch(b).unwrap();
        assert_eq!(m.node(c).unwrap().state(), DirtyState::Touched);
        assert_eq!(m.value(c).unwrap(), &Value::Real(12.0));
        assert_eq!(m.stats(c).unwrap().updates, 2);
        m.restore(a).unwrap();
        assert_eq!(m.const_value(a).unwrap(), &Value::Real(2.0));
        assert_eq!(m.const_value(c).unwrap(), &Value::Real(8.0));
    }

    #[test]
    fn restore_is_bit_identical() {
        let mut m = Model::new();
        let rate = m.add_constant(2.0);
        let x = m.add_stochastic(Exponential::new(rate), 0.1 + 0.2).unwrap();
        let y = m.add_deterministic(Unary::ln(x)).unwrap();
        let z = m.add_deterministic(Scale::new(y, 1.0 / 3.0)).unwrap();
        let before_x = m.const_value(x).unwrap().clone();
        let before_z = m.const_value(z).unwrap().clone();
        let before_lnp = m.ln_probability(x).unwrap();

        m.set_value(x, 7.25).unwrap();
        m.value(z).unwrap();
        m.ln_probability(x).unwrap();
        m.restore(x).unwrap();

        assert!(m.const_value(x).unwrap().bit_eq(&before_x));
        assert!(m.const_value(z).unwrap().bit_eq(&before_z));
        assert_eq!(m.ln_probability(x).unwrap().to_bits(), before_lnp.to_bits());
        assert!(m.is_clean());
    }

    #[test]
    fn restore_without_update_swaps_nothing() {
        let (mut m, a, _, c) = stochastic_chain();
        m.set_value(a, 3.0).unwrap();
        // never recomputed, so the old buffer is still in place
        m.restore(a).unwrap();
        assert_eq!(m.const_value(c).unwrap(), &Value::Real(8.0));
        assert_eq!(m.stats(c).unwrap().updates, 0);
    }

    #[test]
    fn keep_forces_pending_updates() {
        let (mut m, a, b, c) = chain();
        m.set_constant(a, 5.0).unwrap();
        m.keep(a).unwrap();
        assert!(m.is_clean());
        assert_eq!(m.const_value(b).unwrap(), &Value::Real(10.0));
        assert_eq!(m.const_value(c).unwrap(), &Value::Real(20.0));
    }

    #[test]
    fn touch_stops_at_stochastic_children() {
        let mut m = Model::new();
        let rate = m.add_constant(1.0);
        let x = m.add_stochastic(Exponential::new(rate), 1.0).unwrap();
        let scaled = m.add_deterministic(Scale::new(x, 2.0)).unwrap();
        let y = m.add_stochastic(Exponential::new(scaled), 0.5).unwrap();
        let below_y = m.add_deterministic(Scale::new(y, 2.0)).unwrap();

        m.set_value(x, 2.0).unwrap();
        assert_eq!(m.node(y).unwrap().state(), DirtyState::Touched);
        assert_eq!(m.node(below_y).unwrap().state(), DirtyState::Clean);
        assert_eq!(m.affected_stochastic(x).unwrap(), vec![y]);
        assert_eq!(m.const_value(y).unwrap(), &Value::Real(0.5));
        m.keep(x).unwrap();
        assert!(m.is_clean());
    }

    #[test]
    fn ratios_of_a_proposal() {
        let mut m = Model::new();
        let rate = m.add_constant(1.0);
        let x = m.add_stochastic(Exponential::new(rate), 1.0).unwrap();
        let y = m.add_observed(Exponential::new(x), 2.0).unwrap();

        m.set_value(x, 2.0).unwrap();
        // prior: -2 - (-1)
        assert!((m.ln_prior_ratio(x).unwrap() + 1.0).abs() < 1e-12);
        // likelihood: (ln 2 - 4) - (0 - 2)
        let expected = 2f64.ln() - 2.0;
        assert!((m.ln_likelihood_ratio(x).unwrap() - expected).abs() < 1e-12);
        assert_eq!(m.stats(y).unwrap().density_evaluations, 2);
        m.restore(x).unwrap();
        assert_eq!(m.ln_probability(y).unwrap(), -2.0);
        assert_eq!(m.stats(y).unwrap().density_evaluations, 2);
    }

    #[test]
    fn out_of_support_is_negative_infinity() {
        let mut m = Model::new();
        let rate = m.add_constant(1.0);
        let x = m.add_stochastic(Exponential::new(rate), 1.0).unwrap();
        m.set_value(x, -1.0).unwrap();
        assert_eq!(m.ln_probability(x).unwrap(), f64::NEG_INFINITY);
        assert_eq!(m.ln_prior_ratio(x).unwrap(), f64::NEG_INFINITY);
        m.restore(x).unwrap();
        assert_eq!(m.ln_probability(x).unwrap(), -1.0);
    }

    #[test]
    fn nan_density_is_negative_infinity() {
        let mut m = Model::new();
        let mean = m.add_constant(0.0);
        let sd = m.add_constant(1.0);
        let x = m.add_stochastic(Normal::new(mean, sd), 0.0).unwrap();
        m.set_value(x, f64::NAN).unwrap();
        assert_eq!(m.ln_probability(x).unwrap(), f64::NEG_INFINITY);
        assert_eq!(m.ln_prior_ratio(x).unwrap(), f64::NEG_INFINITY);
        m.restore(x).unwrap();
        assert!(m.ln_probability(x).unwrap().is_finite());
    }

    #[test]
    fn exponential_clamped_density() {
        let mut m = Model::new();
        let rate = m.add_constant(2.0);
        let x = m.add_stochastic(Exponential::new(rate), 1.0).unwrap();
        m.clamp(x, 1.5).unwrap();
        assert!((m.ln_probability(x).unwrap() - (2f64.ln() - 3.0)).abs() < 1e-6);
        assert!((m.ln_probability(x).unwrap() + 2.306853).abs() < 1e-6);
    }

    #[test]
    fn clamping_is_idempotent() {
        let mut m = Model::new();
        let rate = m.add_constant(2.0);
        let x = m.add_stochastic(Exponential::new(rate), 1.0).unwrap();
        m.clamp(x, 1.5).unwrap();
        let evaluations = m.stats(x).unwrap().density_evaluations;
        let first = m.ln_probability(x).unwrap();
        let second = m.ln_probability(x).unwrap();
        assert_eq!(first.to_bits(), second.to_bits());
        assert_eq!(m.stats(x).unwrap().density_evaluations, evaluations);

        assert_eq!(m.clamp(x, 2.0), Err(DagError::Usage(UsageError::AlreadyClamped(x))));
        assert_eq!(m.set_value(x, 2.0), Err(DagError::Usage(UsageError::Clamped(x))));
        let mut g = Pcg64::seed_from_u64(3);
        assert_eq!(m.redraw(x, &mut g), Err(DagError::Usage(UsageError::Clamped(x))));
        assert_eq!(m.const_value(x).unwrap(), &Value::Real(1.5));
        assert!(m.is_clean());

        m.unclamp(x).unwrap();
        m.redraw(x, &mut g).unwrap();
        assert_ne!(m.const_value(x).unwrap(), &Value::Real(1.5));
        m.restore(x).unwrap();
        assert_eq!(m.const_value(x).unwrap(), &Value::Real(1.5));
    }

    #[test]
    fn clamped_density_follows_parents() {
        let mut m = Model::new();
        let rate = m.add_constant(1.0);
        let lambda = m.add_stochastic(Exponential::new(rate), 2.0).unwrap();
        let x = m.add_observed(Exponential::new(lambda), 1.5).unwrap();
        m.set_value(lambda, 1.0).unwrap();
        assert_eq!(m.ln_probability(x).unwrap(), -1.5);
        m.keep(lambda).unwrap();
        assert_eq!(m.const_value(x).unwrap(), &Value::Real(1.5));
    }

    #[test]
    fn set_value_checks_type() {
        let mut m = Model::new();
        let rate = m.add_constant(1.0);
        let x = m.add_stochastic(Exponential::new(rate), 1.0).unwrap();
        assert!(m.set_value(x, true).unwrap_err().is_structural());
        assert_eq!(m.set_value(rate, 2.0), Err(DagError::Usage(UsageError::NotStochastic(rate))));
        assert!(m.is_clean());
    }

    fn five() -> (Model, Vec<NodeId>, NodeId) {
        let mut m = Model::new();
        let xs: Vec<NodeId> = (1..=5).map(|i| m.add_constant(i as f64)).collect();
        let v = m.add_vector(ValueType::Real, &xs).unwrap();
        (m, xs, v)
    }

    #[test]
    fn container_updates_one_element() {
        let (mut m, xs, v) = five();
        let reads: Vec<u64> = xs.iter().map(|x| m.stats(*x).unwrap().reads).collect();
        m.set_constant(xs[2], 99.0).unwrap();
        assert_eq!(m.container(v).unwrap().touched_elements(), vec![2]);
        assert_eq!(m.value(v).unwrap(), &Value::reals(&[1.0, 2.0, 99.0, 4.0, 5.0]));
        for (i, x) in xs.iter().enumerate() {
            let extra = if i == 2 { 1 } else { 0 };
            assert_eq!(m.stats(*x).unwrap().reads, reads[i] + extra);
        }
        m.keep(xs[2]).unwrap();
        assert!(m.is_clean());
        assert!(m.container(v).unwrap().touched_elements().is_empty());
        assert!(!m.container(v).unwrap().has_stored());
        assert_eq!(m.const_value(v).unwrap(), &Value::reals(&[1.0, 2.0, 99.0, 4.0, 5.0]));
    }

    #[test]
    fn container_set_element() {
        let (mut m, xs, v) = five();
        let total = m.add_deterministic(Sum::new(v)).unwrap();
        let other = m.add_constant(99.0);
        m.set_element(v, &[2], other).unwrap();
        assert!(m.is_clean());
        assert_eq!(m.const_value(v).unwrap(), &Value::reals(&[1.0, 2.0, 99.0, 4.0, 5.0]));
        assert_eq!(m.const_value(total).unwrap(), &Value::Real(111.0));
        // only the assigned slot was read
        assert_eq!(m.stats(xs[0]).unwrap().reads, 1);
        assert_eq!(m.stats(other).unwrap().reads, 1);
        assert_eq!(m.element(v, &[2]).unwrap(), Some(other));
        // the constant it replaced had no other reference
        assert!(!m.contains(xs[2]));
    }

    #[test]
    fn set_element_survives_restore_and_later_partial_updates() {
        let mut m = Model::new();
        let xs: Vec<NodeId> = (1..=3).map(|i| m.add_constant(i as f64)).collect();
        let v = m.add_vector(ValueType::Real, &xs).unwrap();
        let total = m.add_deterministic(Sum::new(v)).unwrap();
        let other = m.add_constant(99.0);
        m.set_element(v, &[2], other).unwrap();
        assert_eq!(m.value(total).unwrap(), &Value::Real(102.0));
        m.restore(v).unwrap();
        assert_eq!(m.const_value(v).unwrap(), &Value::reals(&[1.0, 2.0, 99.0]));

        m.set_constant(xs[0], 10.0).unwrap();
        assert_eq!(m.container(v).unwrap().touched_elements(), vec![0]);
        m.keep(xs[0]).unwrap();
        assert_eq!(m.element(v, &[2]).unwrap(), Some(other));
        assert_eq!(m.const_value(v).unwrap(), &Value::reals(&[10.0, 2.0, 99.0]));
        assert_eq!(m.const_value(total).unwrap(), &Value::Real(111.0));
    }

    #[test]
    fn container_full_touch_rereads_everything() {
        let (mut m, xs, v) = five();
        m.touch(v).unwrap();
        m.value(v).unwrap();
        for x in &xs {
            assert_eq!(m.stats(*x).unwrap().reads, 2);
        }
        m.keep(v).unwrap();
    }

    #[test]
    fn element_of_stochastic_container() {
        let mut m = Model::new();
        let mean = m.add_constant(0.0);
        let sd = m.add_constant(1.0);
        let xs: Vec<NodeId> = (0..4)
            .map(|i| m.add_stochastic(Normal::new(mean, sd), i as f64).unwrap())
            .collect();
        let v = m.add_vector(ValueType::Real, &xs).unwrap();
        let third = m.add_deterministic(ElementAt::new(v, 2, ValueType::Real)).unwrap();
        let total = m.add_deterministic(Sum::new(v)).unwrap();
        m.set_value(xs[1], 10.0).unwrap();
        assert_eq!(m.value(total).unwrap(), &Value::Real(15.0));
        assert_eq!(m.value(third).unwrap(), &Value::Real(2.0));
        m.restore(xs[1]).unwrap();
        assert_eq!(m.const_value(total).unwrap(), &Value::Real(6.0));
    }

    #[test]
    fn posterior_sums_every_density() {
        let mut m = Model::new();
        let rate = m.add_constant(1.0);
        let x = m.add_stochastic(Exponential::new(rate), 1.0).unwrap();
        m.add_observed(Exponential::new(x), 2.0).unwrap();
        assert_eq!(m.ln_posterior().unwrap(), -3.0);
    }
}
