//! The model: an arena of nodes in topological order, the joint log-density,
//! the Metropolis test, and the sampling loop.

use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::core::{Node, NodeId};
use crate::error::{ModelError, Result};
use crate::rng::RandomSource;
use crate::value::Value;

/// Owns the node graph and drives a single Markov chain over it.
///
/// Nodes are visited in registration order, which together with the seed and
/// the initial values fixes the chain exactly: two runs with identical
/// inputs produce identical histories.
pub struct Model<R: RandomSource = SmallRng> {
    nodes: Vec<Box<dyn Node>>,
    rng: R,
}

impl Model<SmallRng> {
    /// A model with a seeded chain RNG.
    pub fn new(seed: u64) -> Self {
        Self::with_rng(SmallRng::seed_from_u64(seed))
    }
}

impl<R: RandomSource> Model<R> {
    /// A model over a caller-supplied random source.
    pub fn with_rng(rng: R) -> Self {
        Self {
            nodes: Vec::new(),
            rng,
        }
    }

    /// Register a node. The order of addition defines evaluation order, so
    /// every parent handle must point at an already-registered node.
    ///
    /// Deterministic nodes are refreshed once on entry so their stored value
    /// is consistent with their parents from the start.
    pub fn add(&mut self, node: impl Node + 'static) -> Result<NodeId> {
        let id = NodeId(self.nodes.len());
        for parent in node.parents() {
            if parent.0 >= id.0 {
                return Err(ModelError::Config(format!(
                    "node {} refers to node {}, which is not registered yet",
                    id.0, parent.0
                )));
            }
        }
        node.check_parents(&self.nodes)?;
        self.nodes.push(Box::new(node));
        let (earlier, rest) = self.nodes.split_at_mut(id.0);
        rest[0].refresh(earlier);
        Ok(id)
    }

    pub fn node(&self, id: NodeId) -> &dyn Node {
        self.nodes[id.0].as_ref()
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut dyn Node {
        self.nodes[id.0].as_mut()
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Posterior mean of a node's tallied history.
    pub fn mean(&self, id: NodeId) -> Option<Value> {
        self.node(id).mean()
    }

    /// Refresh every deterministic node in registration order.
    pub fn update(&mut self) {
        for i in 0..self.nodes.len() {
            if self.nodes[i].is_deterministic() {
                let (earlier, rest) = self.nodes.split_at_mut(i);
                rest[0].refresh(earlier);
            }
        }
    }

    /// Joint log-density: the sum of every stochastic node's log-likelihood,
    /// collapsing to `-inf` as soon as any term is non-finite.
    pub fn logp(&self) -> f64 {
        let mut acc = 0.0;
        for i in 0..self.nodes.len() {
            let node = &self.nodes[i];
            if !node.is_stochastic() {
                continue;
            }
            let ll = node.loglik(&self.nodes[..i]);
            if !ll.is_finite() {
                return f64::NEG_INFINITY;
            }
            acc += ll;
        }
        acc
    }

    /// Metropolis test: reject when `log(u) > new_logp - old_logp` for
    /// `u ~ Uniform(0,1)`. Non-finite proposals are rejected outright.
    pub fn reject(&mut self, new_logp: f64, old_logp: f64) -> bool {
        if !new_logp.is_finite() {
            return true;
        }
        self.rng.uniform().ln() > new_logp - old_logp
    }

    /// Run the chain: `burn` adaptation steps with tuning every
    /// `adapt_every` sweeps, then `iterations` draws tallied every `thin`
    /// sweeps. Scales are frozen once burn-in ends.
    pub fn sample(&mut self, iterations: usize, burn: usize, adapt_every: usize, thin: usize) {
        self.run_chain(iterations, burn, adapt_every, thin, None);
    }

    /// Same loop as [`Model::sample`], reporting progress on a bar.
    pub fn sample_with_progress(
        &mut self,
        iterations: usize,
        burn: usize,
        adapt_every: usize,
        thin: usize,
    ) {
        let bar = ProgressBar::new((burn + iterations) as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("##-"),
        );
        self.run_chain(iterations, burn, adapt_every, thin, Some(&bar));
        bar.finish_with_message("done");
    }

    fn run_chain(
        &mut self,
        iterations: usize,
        burn: usize,
        adapt_every: usize,
        thin: usize,
        bar: Option<&ProgressBar>,
    ) {
        let thin = thin.max(1);
        self.update();
        for step in 1..=(burn + iterations) {
            self.sweep();
            if step <= burn && adapt_every > 0 && step % adapt_every == 0 {
                for node in &mut self.nodes {
                    node.tune();
                }
            }
            if step > burn && (step - burn) % thin == 0 {
                for node in &mut self.nodes {
                    if node.tracked() {
                        node.tally();
                    }
                }
            }
            if let Some(bar) = bar {
                bar.inc(1);
            }
        }
    }

    /// Propose and test every unobserved stochastic node once, in
    /// registration order.
    fn sweep(&mut self) {
        for i in 0..self.nodes.len() {
            let node = &self.nodes[i];
            if !node.is_stochastic() || node.is_observed() {
                continue;
            }
            if node.uses_component_sampling() {
                self.component_step(i);
            } else {
                self.block_step(i);
            }
        }
    }

    fn block_step(&mut self, i: usize) {
        let old_logp = self.logp();
        self.nodes[i].preserve();
        self.nodes[i].jump(&mut self.rng);
        self.update();
        let new_logp = self.logp();
        if self.reject(new_logp, old_logp) {
            self.nodes[i].revert();
            self.update();
            self.nodes[i].record_block(false);
        } else {
            self.nodes[i].record_block(true);
        }
    }

    fn component_step(&mut self, i: usize) {
        for c in 0..self.nodes[i].n_components() {
            let old_logp = self.logp();
            self.nodes[i].jump_component(c, &mut self.rng);
            self.update();
            let new_logp = self.logp();
            if self.reject(new_logp, old_logp) {
                self.nodes[i].revert_component(c);
                self.update();
                self.nodes[i].record_trial(c, false);
            } else {
                self.nodes[i].record_trial(c, true);
            }
        }
    }
}
