//! Proposals that perturb one stochastic node at a time.

use std::fmt::Debug;

use rand::Rng;
use rand_pcg::Pcg64;

use crate::error::{DagError, StructuralError, UsageError};
use crate::model::Model;
use crate::node::NodeId;
use crate::value::ValueType;

const TARGET_ACCEPTANCE: f64 = 0.44;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MoveStats {
    pub tried: u64,
    pub accepted: u64,
}
impl MoveStats {
    pub fn acceptance_rate(&self) -> f64 {
        if self.tried == 0 {
            0.0
        } else {
            self.accepted as f64 / self.tried as f64
        }
    }
}

/// A Metropolis-Hastings proposal on a single target node.
pub trait Move {
    fn name(&self) -> &'static str;
    fn target(&self) -> NodeId;
    fn weight(&self) -> f64 {
        1.0
    }
    /// Writes a new value into the target, touches it, and returns the
    /// log Hastings ratio of the proposal.
    fn perform(&mut self, model: &mut Model, g: &mut Pcg64) -> Result<f64, DagError>;
    fn stats(&self) -> MoveStats;
    fn stats_mut(&mut self) -> &mut MoveStats;

    fn accept(&mut self) {
        let stats = self.stats_mut();
        stats.tried += 1;
        stats.accepted += 1;
    }
    fn reject(&mut self) {
        self.stats_mut().tried += 1;
    }
    /// Adjusts the proposal width from the acceptance rate so far.
    fn tune(&mut self) {}
}
impl Debug for dyn Move {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Move<{}>({})", self.name(), self.target())
    }
}

fn real_value(model: &Model, target: NodeId) -> Result<f64, DagError> {
    let value = model.const_value(target)?;
    value.as_real().ok_or_else(|| {
        StructuralError::TypeMismatch {
            expected: ValueType::Real,
            found: value.value_type(),
        }
        .into()
    })
}

// Widen the window when accepting too often, narrow it otherwise.
fn tuned(width: f64, stats: MoveStats) -> f64 {
    if stats.tried == 0 {
        return width;
    }
    let rate = stats.acceptance_rate();
    if rate > TARGET_ACCEPTANCE {
        width * (1.0 + (rate - TARGET_ACCEPTANCE) / (1.0 - TARGET_ACCEPTANCE))
    } else {
        width / (2.0 - rate / TARGET_ACCEPTANCE)
    }
}

/// Adds `delta * (u - 0.5)` to a real-valued node. Symmetric.
#[derive(Clone, Debug)]
pub struct SlidingMove {
    target: NodeId,
    delta: f64,
    weight: f64,
    stats: MoveStats,
}
impl SlidingMove {
    pub fn new(target: NodeId, delta: f64) -> Self {
        Self {
            target,
            delta,
            weight: 1.0,
            stats: MoveStats::default(),
        }
    }
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
    pub fn delta(&self) -> f64 {
        self.delta
    }
}
impl Move for SlidingMove {
    fn name(&self) -> &'static str {
        "slide"
    }
    fn target(&self) -> NodeId {
        self.target
    }
    fn weight(&self) -> f64 {
        self.weight
    }
    fn perform(&mut self, model: &mut Model, g: &mut Pcg64) -> Result<f64, DagError> {
        let x = real_value(model, self.target)?;
        let u: f64 = g.random();
        model.set_value(self.target, x + self.delta * (u - 0.5))?;
        Ok(0.0)
    }
    fn stats(&self) -> MoveStats {
        self.stats
    }
    fn stats_mut(&mut self) -> &mut MoveStats {
        &mut self.stats
    }
    fn tune(&mut self) {
        self.delta = tuned(self.delta, self.stats);
    }
}

/// Multiplies a real-valued node by `exp(lambda * (u - 0.5))`.
#[derive(Clone, Debug)]
pub struct ScaleMove {
    target: NodeId,
    lambda: f64,
    weight: f64,
    stats: MoveStats,
}
impl ScaleMove {
    pub fn new(target: NodeId, lambda: f64) -> Self {
        Self {
            target,
            lambda,
            weight: 1.0,
            stats: MoveStats::default(),
        }
    }
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
    pub fn lambda(&self) -> f64 {
        self.lambda
    }
}
impl Move for ScaleMove {
    fn name(&self) -> &'static str {
        "scale"
    }
    fn target(&self) -> NodeId {
        self.target
    }
    fn weight(&self) -> f64 {
        self.weight
    }
    fn perform(&mut self, model: &mut Model, g: &mut Pcg64) -> Result<f64, DagError> {
        let x = real_value(model, self.target)?;
        let u: f64 = g.random();
        let ln_scale = self.lambda * (u - 0.5);
        model.set_value(self.target, x * ln_scale.exp())?;
        Ok(ln_scale)
    }
    fn stats(&self) -> MoveStats {
        self.stats
    }
    fn stats_mut(&mut self) -> &mut MoveStats {
        &mut self.stats
    }
    fn tune(&mut self) {
        self.lambda = tuned(self.lambda, self.stats);
    }
}

/// Independence proposal: draws a fresh value from the target's own
/// distribution. Works for any value type the distribution can sample.
#[derive(Clone, Debug)]
pub struct ResampleMove {
    target: NodeId,
    weight: f64,
    stats: MoveStats,
}
impl ResampleMove {
    pub fn new(target: NodeId) -> Self {
        Self {
            target,
            weight: 1.0,
            stats: MoveStats::default(),
        }
    }
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}
impl Move for ResampleMove {
    fn name(&self) -> &'static str {
        "resample"
    }
    fn target(&self) -> NodeId {
        self.target
    }
    fn weight(&self) -> f64 {
        self.weight
    }
    fn perform(&mut self, model: &mut Model, g: &mut Pcg64) -> Result<f64, DagError> {
        let params = model.stochastic(self.target)?.distribution().parameters().to_vec();
        model.pull(&params)?;
        let (value, ln_hastings) = {
            let args = model.raw_values(&params)?;
            let s = model.stochastic(self.target)?;
            s.distribution().resample(&s.value, &args, g)?
        };
        model.set_value(self.target, value)?;
        Ok(ln_hastings)
    }
    fn stats(&self) -> MoveStats {
        self.stats
    }
    fn stats_mut(&mut self) -> &mut MoveStats {
        &mut self.stats
    }
}

/// Moves picked at random in proportion to their weights.
#[derive(Debug, Default)]
pub struct MoveSchedule {
    moves: Vec<Box<dyn Move>>,
}
impl MoveSchedule {
    pub fn new() -> Self {
        Self::default()
    }
    /// Registers a move. Its target must be an unclamped stochastic node.
    pub fn add(&mut self, model: &Model, mv: impl Move + 'static) -> Result<(), DagError> {
        let target = mv.target();
        if model.stochastic(target)?.is_clamped() {
            return Err(UsageError::Clamped(target).into());
        }
        log::debug!("scheduled {} on {} with weight {}", mv.name(), target, mv.weight());
        self.moves.push(Box::new(mv));
        Ok(())
    }
    pub fn len(&self) -> usize {
        self.moves.len()
    }
    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }
    pub fn moves(&self) -> &[Box<dyn Move>] {
        &self.moves
    }
    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Box<dyn Move>> {
        self.moves.get_mut(index)
    }
    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn Move>> {
        self.moves.iter_mut()
    }
    /// Index of the next move to try, or `None` if nothing carries weight.
    pub fn pick(&self, g: &mut Pcg64) -> Option<usize> {
        let total: f64 = self.moves.iter().map(|m| m.weight().max(0.0)).sum();
        if total <= 0.0 {
            return None;
        }
        let mut u = g.random::<f64>() * total;
        for (i, m) in self.moves.iter().enumerate() {
            let w = m.weight().max(0.0);
            if u < w {
                return Some(i);
            }
            u -= w;
        }
        // rounding left u at the very top
        self.moves.iter().rposition(|m| m.weight() > 0.0)
    }
}
