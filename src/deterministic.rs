//! Nodes whose value is a pure function of other nodes.

use nalgebra::{DMatrix, DVector};

use crate::core::{Node, NodeId};
use crate::value::{mean_of, Value};

/// Recompute rule: parent values in, new payload out.
pub type Rule = Box<dyn Fn(&[&Value]) -> Value>;

/// A deterministic transform over parent nodes.
///
/// The value refreshes whenever the model updates; the node never proposes
/// and never contributes to the joint log-density directly.
pub struct Deterministic {
    value: Value,
    old_value: Value,
    history: Vec<Value>,
    tracked: bool,
    parents: Vec<NodeId>,
    rule: Rule,
}

impl Deterministic {
    /// A transform with an arbitrary recompute rule.
    ///
    /// `initial` fixes the payload shape; the rule fires once when the node
    /// is added to a model, so the stored value is consistent from the
    /// start.
    pub fn new(
        initial: impl Into<Value>,
        parents: Vec<NodeId>,
        rule: impl Fn(&[&Value]) -> Value + 'static,
    ) -> Self {
        let value = initial.into();
        Self {
            old_value: value.clone(),
            value,
            history: Vec::new(),
            tracked: true,
            parents,
            rule: Box::new(rule),
        }
    }

    /// The linear transform `value := X · b` for a fixed design matrix.
    pub fn linear(design: DMatrix<f64>, b: NodeId) -> Self {
        let rows = design.nrows();
        Self::new(DVector::<f64>::zeros(rows), vec![b], move |parents| {
            match parents[0] {
                Value::RealVec(b) => Value::RealVec(&design * b),
                other => panic!("linear rule expects a real vector parent, got {}", other.kind()),
            }
        })
    }

    /// Elementwise logistic `1 / (1 + e^-x)` of one parent.
    pub fn logistic(parent: NodeId, len: usize) -> Self {
        fn sigmoid(x: f64) -> f64 {
            1.0 / (1.0 + (-x).exp())
        }
        Self::new(DVector::<f64>::zeros(len), vec![parent], |parents| {
            match parents[0] {
                Value::Real(x) => Value::Real(sigmoid(*x)),
                Value::RealVec(v) => Value::RealVec(v.map(sigmoid)),
                Value::RealMat(m) => Value::RealMat(m.map(sigmoid)),
                other => panic!("logistic rule expects a real parent, got {}", other.kind()),
            }
        })
    }
}

impl Node for Deterministic {
    fn value(&self) -> &Value {
        &self.value
    }

    fn is_deterministic(&self) -> bool {
        true
    }

    fn preserve(&mut self) {
        self.old_value = self.value.clone();
    }

    fn revert(&mut self) {
        self.value = self.old_value.clone();
    }

    fn tally(&mut self) {
        self.history.push(self.value.clone());
    }

    fn history(&self) -> &[Value] {
        &self.history
    }

    fn mean(&self) -> Option<Value> {
        mean_of(&self.history)
    }

    fn tracked(&self) -> bool {
        self.tracked
    }

    fn set_tracked(&mut self, tracked: bool) {
        self.tracked = tracked;
    }

    fn parents(&self) -> Vec<NodeId> {
        self.parents.clone()
    }

    fn refresh(&mut self, earlier: &[Box<dyn Node>]) {
        let values: Vec<&Value> = self.parents.iter().map(|p| earlier[p.0].value()).collect();
        self.value = (self.rule)(&values);
    }
}
