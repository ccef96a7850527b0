//! Sinks that record the chain state after burn-in.

use std::io::Write;

use anyhow::Context;

use crate::model::Model;
use crate::node::NodeId;
use crate::value::Value;

/// Called by the driver every `every()` generations on a clean model.
pub trait Monitor {
    fn every(&self) -> u64;
    fn header(&mut self, _model: &Model) -> anyhow::Result<()> {
        Ok(())
    }
    fn monitor(&mut self, generation: u64, ln_posterior: f64, model: &Model) -> anyhow::Result<()>;
}

fn label(model: &Model, id: NodeId) -> String {
    match model.node(id).ok().and_then(|n| n.name()) {
        Some(name) => name.to_string(),
        None => id.to_string(),
    }
}

/// Tab-separated trace of selected nodes, written to a caller-owned sink.
pub struct TraceMonitor<W: Write> {
    out: W,
    every: u64,
    nodes: Vec<NodeId>,
}
impl<W: Write> TraceMonitor<W> {
    pub fn new(out: W, every: u64, nodes: Vec<NodeId>) -> Self {
        Self {
            out,
            every: every.max(1),
            nodes,
        }
    }
    pub fn into_inner(self) -> W {
        self.out
    }
}
impl<W: Write> Monitor for TraceMonitor<W> {
    fn every(&self) -> u64 {
        self.every
    }
    fn header(&mut self, model: &Model) -> anyhow::Result<()> {
        let mut line = String::from("Iteration\tPosterior");
        for id in &self.nodes {
            line.push('\t');
            line.push_str(&label(model, *id));
        }
        writeln!(self.out, "{}", line).context("writing trace header")
    }
    fn monitor(&mut self, generation: u64, ln_posterior: f64, model: &Model) -> anyhow::Result<()> {
        let mut line = format!("{}\t{}", generation, ln_posterior);
        for id in &self.nodes {
            let value = model
                .const_value(*id)
                .with_context(|| format!("reading {} at generation {}", id, generation))?;
            line.push('\t');
            line.push_str(&value.to_string());
        }
        writeln!(self.out, "{}", line)
            .with_context(|| format!("writing trace line for generation {}", generation))
    }
}

/// Keeps the values of one node in memory.
#[derive(Clone, Debug)]
pub struct SampleMonitor {
    node: NodeId,
    every: u64,
    samples: Vec<Value>,
}
impl SampleMonitor {
    pub fn new(node: NodeId, every: u64) -> Self {
        Self {
            node,
            every: every.max(1),
            samples: Vec::new(),
        }
    }
    pub fn samples(&self) -> &[Value] {
        &self.samples
    }
    /// Mean of the samples that are real numbers.
    pub fn mean(&self) -> Option<f64> {
        let reals: Vec<f64> = self.samples.iter().filter_map(Value::as_real).collect();
        if reals.is_empty() {
            None
        } else {
            Some(reals.iter().sum::<f64>() / reals.len() as f64)
        }
    }
}
impl Monitor for SampleMonitor {
    fn every(&self) -> u64 {
        self.every
    }
    fn monitor(&mut self, _: u64, _: f64, model: &Model) -> anyhow::Result<()> {
        let value = model
            .const_value(self.node)
            .with_context(|| format!("sampling {}", self.node))?;
        self.samples.push(value.clone());
        Ok(())
    }
}
