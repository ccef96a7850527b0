//! Model graphs with lazy, incremental re-evaluation, and a
//! Metropolis-Hastings sampler driving them.
//!
//! A [`Model`] owns constant, deterministic, stochastic and container
//! nodes. A move changes one stochastic node and touches it; everything
//! downstream is marked dirty and recomputed at most once when read. The
//! sampler then keeps or restores the touched region.
//!
//! ```
//! use rand::SeedableRng;
//! use rand_pcg::Pcg64;
//! use revdag::builder::{build, exponential, val};
//! use revdag::{Mcmc, McmcConfig, MoveSchedule, SampleMonitor, ScaleMove};
//!
//! let rate = exponential(val(1.0)).named("rate");
//! let y = exponential(rate.clone()).observe(0.5);
//! let mut g = Pcg64::seed_from_u64(1);
//! let (model, _) = build(&[&y], &mut g).unwrap();
//! let rate = model.lookup("rate").unwrap();
//!
//! let mut schedule = MoveSchedule::new();
//! schedule.add(&model, ScaleMove::new(rate, 1.0)).unwrap();
//! let config = McmcConfig::default().with_generations(1_000).with_burnin(100);
//! let mut chain = Mcmc::new(model, schedule, config).unwrap();
//! let mut samples = SampleMonitor::new(rate, 10);
//! chain.run(&mut [&mut samples]).unwrap();
//! assert_eq!(samples.samples().len(), 100);
//! ```

pub mod builder;
pub mod container;
pub mod distributions;
pub mod error;
pub mod functions;
pub mod metropolis;
pub mod model;
pub mod monitors;
pub mod moves;
pub mod node;
mod propagation;
pub mod value;

pub use container::{ContainerNode, Plate};
pub use distributions::{Bernoulli, Distribution, Exponential, LogLikelihood, Normal, Uniform};
pub use error::{DagError, NumericalError, StructuralError, UsageError};
pub use functions::{Binary, ElementAt, Function, Scale, Sum, TypedFunction, Unary};
pub use metropolis::{ChainSummary, Mcmc, McmcConfig, MoveSummary, Outcome, acceptance_probability};
pub use model::Model;
pub use monitors::{Monitor, SampleMonitor, TraceMonitor};
pub use moves::{Move, MoveSchedule, MoveStats, ResampleMove, ScaleMove, SlidingMove};
pub use node::{Dirty, DirtyState, Node, NodeId, NodeKind, NodeStats};
pub use value::{Value, ValueType};
