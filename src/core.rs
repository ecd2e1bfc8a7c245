//! The node abstraction every member of a model graph implements.

use crate::error::Result;
use crate::rng::RandomSource;
use crate::value::Value;

/// Handle to a node inside a model's arena.
///
/// Handles are indices in registration order; a node may only refer to nodes
/// registered before it, which makes the topological order explicit and lets
/// the model hand a node the prefix of the arena when it needs its parents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

/// Common lifecycle of deterministic, stochastic, and observed nodes.
///
/// The model drives these hooks during a sweep; the `earlier` slice passed to
/// [`Node::refresh`] and [`Node::loglik`] is the arena prefix holding every
/// node registered before the receiver, so parent handles resolve without
/// interior mutability.
pub trait Node {
    /// The current payload.
    fn value(&self) -> &Value;

    fn is_deterministic(&self) -> bool {
        false
    }

    fn is_stochastic(&self) -> bool {
        false
    }

    fn is_observed(&self) -> bool {
        false
    }

    /// Snapshot `value` into `old_value`.
    fn preserve(&mut self);

    /// Restore `value` from `old_value`.
    fn revert(&mut self);

    /// Append a deep copy of `value` to the history.
    fn tally(&mut self);

    fn history(&self) -> &[Value];

    /// Arithmetic mean of the history, if any tallies were taken.
    fn mean(&self) -> Option<Value>;

    fn print(&self) {
        println!("{}", self.value());
    }

    /// Whether `tally` fires for this node during sampling.
    fn tracked(&self) -> bool;

    fn set_tracked(&mut self, tracked: bool);

    /// Handles of the nodes this one reads, all of which must be registered
    /// earlier.
    fn parents(&self) -> Vec<NodeId> {
        Vec::new()
    }

    /// Graph-dependent construction checks, run when the node is added.
    fn check_parents(&self, _earlier: &[Box<dyn Node>]) -> Result<()> {
        Ok(())
    }

    /// Recompute a deterministic value from its parents.
    fn refresh(&mut self, _earlier: &[Box<dyn Node>]) {}

    /// This node's contribution to the joint log-density.
    fn loglik(&self, _earlier: &[Box<dyn Node>]) -> f64 {
        0.0
    }

    /// Propose a whole-block move. No-op for deterministic and observed
    /// nodes.
    fn jump(&mut self, _rng: &mut dyn RandomSource) {}

    /// Rescale the proposal from the acceptance ratio and reset the
    /// counters.
    fn tune(&mut self) {}

    /// Whether the model should Metropolis-test one coordinate at a time.
    fn uses_component_sampling(&self) -> bool {
        false
    }

    /// Number of proposal coordinates.
    fn n_components(&self) -> usize {
        0
    }

    /// Propose a move of coordinate `idx`, preserving its old value.
    fn jump_component(&mut self, _idx: usize, _rng: &mut dyn RandomSource) {}

    /// Restore coordinate `idx` from its preserved value.
    fn revert_component(&mut self, _idx: usize) {}

    /// Count one component trial.
    fn record_trial(&mut self, _idx: usize, _accepted: bool) {}

    /// Count one whole-block trial on every coordinate.
    fn record_block(&mut self, _accepted: bool) {}

    /// Total `(accepted, rejected)` counts since the last tuning reset, for
    /// stochastic nodes.
    fn trial_counts(&self) -> Option<(u64, u64)> {
        None
    }
}
