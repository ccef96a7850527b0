//! The Metropolis-Hastings driver: select a move, evaluate the ratios of
//! the touched region, then keep or restore it.

use anyhow::Context;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

use crate::distributions::LogLikelihood;
use crate::error::{DagError, UsageError};
use crate::model::Model;
use crate::monitors::Monitor;
use crate::moves::{MoveSchedule, MoveStats};
use crate::node::NodeId;

const MAX_INITIAL_TRIES: usize = 100;

#[derive(Clone, Debug, PartialEq)]
pub struct McmcConfig {
    /// Monitored generations, run after the burn-in.
    pub generations: u64,
    pub burnin: u64,
    /// Tune moves every this many burn-in generations.
    pub tuning_interval: Option<u64>,
    /// Power applied to the posterior ratio.
    pub heat: f64,
    pub seed: u64,
}
impl Default for McmcConfig {
    fn default() -> Self {
        Self {
            generations: 10_000,
            burnin: 1_000,
            tuning_interval: Some(100),
            heat: 1.0,
            seed: 1337,
        }
    }
}
impl McmcConfig {
    pub fn with_generations(mut self, generations: u64) -> Self {
        self.generations = generations;
        self
    }
    pub fn with_burnin(mut self, burnin: u64) -> Self {
        self.burnin = burnin;
        self
    }
    pub fn with_tuning_interval(mut self, interval: Option<u64>) -> Self {
        self.tuning_interval = interval.filter(|k| *k > 0);
        self
    }
    pub fn with_heat(mut self, heat: f64) -> Self {
        self.heat = heat;
        self
    }
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Accepted,
    Rejected,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Proposal {
    target: NodeId,
    ln_hastings: f64,
    ln_prior: LogLikelihood,
    ln_likelihood: LogLikelihood,
}
impl Proposal {
    fn ln_probability_ratio(&self) -> LogLikelihood {
        self.ln_prior + self.ln_likelihood
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MoveSummary {
    pub name: &'static str,
    pub target: NodeId,
    pub stats: MoveStats,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChainSummary {
    pub generations: u64,
    pub ln_posterior: LogLikelihood,
    pub moves: Vec<MoveSummary>,
}

/// `min(1, exp(ln_r))`, with anything below `-300` or NaN treated as zero.
pub fn acceptance_probability(ln_r: f64) -> f64 {
    if ln_r.is_nan() || ln_r < -300.0 {
        0.0
    } else if ln_r >= 0.0 {
        1.0
    } else {
        ln_r.exp()
    }
}

#[derive(Debug)]
pub struct Mcmc {
    model: Model,
    schedule: MoveSchedule,
    config: McmcConfig,
    g: Pcg64,
    generation: u64,
    ln_posterior: LogLikelihood,
}
impl Mcmc {
    /// Prepares a chain. Fails if no move carries weight or if no starting
    /// state with a finite posterior turns up after redrawing the free
    /// stochastic nodes a number of times.
    pub fn new(model: Model, schedule: MoveSchedule, config: McmcConfig) -> Result<Self, DagError> {
        if schedule.moves().iter().all(|m| m.weight() <= 0.0) {
            return Err(UsageError::NoMoves.into());
        }
        let mut chain = Self {
            model,
            schedule,
            g: Pcg64::seed_from_u64(config.seed),
            config,
            generation: 0,
            ln_posterior: 0.0,
        };
        chain.initialize()?;
        Ok(chain)
    }
    fn initialize(&mut self) -> Result<(), DagError> {
        for id in self.model.dirty_nodes() {
            self.model.keep(id)?;
        }
        for attempt in 0..MAX_INITIAL_TRIES {
            let ln_posterior = self.model.ln_posterior()?;
            if ln_posterior.is_finite() {
                log::info!("initial ln posterior {} after {} redraws", ln_posterior, attempt);
                self.ln_posterior = ln_posterior;
                return Ok(());
            }
            log::debug!("initial ln posterior is {}, drawing new values", ln_posterior);
            for id in self.model.stochastic_nodes() {
                if !self.model.node(id)?.is_clamped() {
                    self.model.redraw(id, &mut self.g)?;
                    self.model.keep(id)?;
                }
            }
        }
        Err(UsageError::ImpossibleState.into())
    }

    pub fn model(&self) -> &Model {
        &self.model
    }
    pub fn into_model(self) -> Model {
        self.model
    }
    pub fn schedule(&self) -> &MoveSchedule {
        &self.schedule
    }
    pub fn generation(&self) -> u64 {
        self.generation
    }
    pub fn ln_posterior(&self) -> LogLikelihood {
        self.ln_posterior
    }

    /// One proposal: pick a move, evaluate it, and keep or restore.
    pub fn step(&mut self) -> Outcome {
        let Some(index) = self.schedule.pick(&mut self.g) else {
            return Outcome::Rejected;
        };
        let proposal = self.propose(index);
        let u: f64 = self.g.random();
        self.resolve(index, proposal, u)
    }
    fn propose(&mut self, index: usize) -> Result<Proposal, DagError> {
        let Some(mv) = self.schedule.get_mut(index) else {
            return Err(UsageError::NoMoves.into());
        };
        let target = mv.target();
        let ln_hastings = mv.perform(&mut self.model, &mut self.g)?;
        let ln_prior = self.model.ln_prior_ratio(target)?;
        let ln_likelihood = self.model.ln_likelihood_ratio(target)?;
        Ok(Proposal {
            target,
            ln_hastings,
            ln_prior,
            ln_likelihood,
        })
    }
    fn resolve(&mut self, index: usize, proposal: Result<Proposal, DagError>, u: f64) -> Outcome {
        let Some(mv) = self.schedule.get_mut(index) else {
            return Outcome::Rejected;
        };
        let target = mv.target();
        let accepted = match &proposal {
            Ok(p) => {
                let ln_r = self.config.heat * p.ln_probability_ratio() + p.ln_hastings;
                u < acceptance_probability(ln_r)
            }
            Err(e) => {
                log::warn!("{} on {} failed: {}", mv.name(), target, e);
                false
            }
        };
        let outcome = match (accepted, &proposal) {
            (true, Ok(p)) => match self.model.keep(p.target) {
                Ok(()) => {
                    self.ln_posterior += p.ln_probability_ratio();
                    Outcome::Accepted
                }
                Err(e) => {
                    log::warn!("keeping {} failed: {}", p.target, e);
                    Outcome::Rejected
                }
            },
            _ => Outcome::Rejected,
        };
        if outcome == Outcome::Rejected {
            if let Err(e) = self.model.restore(target) {
                log::warn!("restoring {} failed: {}", target, e);
            }
            mv.reject();
            log::debug!("rejected {} on {}", mv.name(), target);
        } else {
            mv.accept();
        }
        debug_assert!(
            self.model.is_clean(),
            "nodes left touched: {:?}",
            self.model.dirty_nodes()
        );
        outcome
    }

    /// Runs the burn-in, tuning moves as configured, then the monitored
    /// generations.
    pub fn run(&mut self, monitors: &mut [&mut dyn Monitor]) -> anyhow::Result<ChainSummary> {
        let burnin = self.config.burnin;
        let total = burnin + self.config.generations;
        log::info!(
            "running {} generations after {} burn-in with {} moves",
            self.config.generations,
            burnin,
            self.schedule.len()
        );
        for m in monitors.iter_mut() {
            m.header(&self.model).context("starting monitors")?;
        }
        while self.generation < total {
            self.generation += 1;
            self.step();
            if self.generation <= burnin {
                if let Some(k) = self.config.tuning_interval {
                    if self.generation % k == 0 {
                        self.tune();
                    }
                }
                if self.generation == burnin {
                    self.reset_move_stats();
                }
                continue;
            }
            let generation = self.generation - burnin;
            for m in monitors.iter_mut() {
                if generation % m.every() == 0 {
                    m.monitor(generation, self.ln_posterior, &self.model)?;
                }
            }
        }
        let summary = self.summary();
        log::info!("finished with ln posterior {}", summary.ln_posterior);
        Ok(summary)
    }
    fn tune(&mut self) {
        for mv in self.schedule.iter_mut() {
            mv.tune();
            log::trace!("tuned {:?} at {:?}", mv, mv.stats());
        }
    }
    fn reset_move_stats(&mut self) {
        for mv in self.schedule.iter_mut() {
            *mv.stats_mut() = MoveStats::default();
        }
    }
    pub fn summary(&self) -> ChainSummary {
        ChainSummary {
            generations: self.generation,
            ln_posterior: self.ln_posterior,
            moves: self
                .schedule
                .moves()
                .iter()
                .map(|m| MoveSummary {
                    name: m.name(),
                    target: m.target(),
                    stats: m.stats(),
                })
                .collect(),
        }
    }
}
