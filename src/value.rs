//! Heterogeneous value payloads carried by graph nodes.

use std::fmt;

use nalgebra::{DMatrix, DVector};
use num_traits::ToPrimitive;

use crate::math::Broadcast;

/// The payload of a node: a real scalar, or a real/integer vector or matrix.
///
/// Linear element access is column-major, matching the storage order of the
/// underlying matrices. Integer payloads absorb real-valued proposal steps by
/// truncation toward zero.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Real(f64),
    RealVec(DVector<f64>),
    RealMat(DMatrix<f64>),
    IntVec(DVector<i64>),
    IntMat(DMatrix<i64>),
}

impl Value {
    /// Number of elements in the payload.
    pub fn n_elem(&self) -> usize {
        match self {
            Value::Real(_) => 1,
            Value::RealVec(v) => v.len(),
            Value::RealMat(m) => m.len(),
            Value::IntVec(v) => v.len(),
            Value::IntMat(m) => m.len(),
        }
    }

    /// `(rows, cols)`; scalars report `(1, 1)` and vectors `(len, 1)`.
    pub fn shape(&self) -> (usize, usize) {
        match self {
            Value::Real(_) => (1, 1),
            Value::RealVec(v) => (v.len(), 1),
            Value::RealMat(m) => (m.nrows(), m.ncols()),
            Value::IntVec(v) => (v.len(), 1),
            Value::IntMat(m) => (m.nrows(), m.ncols()),
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Value::IntVec(_) | Value::IntMat(_))
    }

    /// Element at linear (column-major) index `i`, widened to `f64`.
    pub fn elem(&self, i: usize) -> f64 {
        match self {
            Value::Real(x) => *x,
            Value::RealVec(v) => v[i],
            Value::RealMat(m) => m[i],
            Value::IntVec(v) => v[i] as f64,
            Value::IntMat(m) => m[i] as f64,
        }
    }

    /// Overwrite the element at linear index `i`. Integer payloads truncate.
    pub fn set_elem(&mut self, i: usize, x: f64) {
        match self {
            Value::Real(v) => *v = x,
            Value::RealVec(v) => v[i] = x,
            Value::RealMat(m) => m[i] = x,
            Value::IntVec(v) => v[i] = x as i64,
            Value::IntMat(m) => m[i] = x as i64,
        }
    }

    /// Add `dx` to the element at linear index `i`.
    pub fn add_elem(&mut self, i: usize, dx: f64) {
        let x = self.elem(i) + dx;
        self.set_elem(i, x);
    }

    /// Overwrite every element with `x`.
    pub fn fill(&mut self, x: f64) {
        for i in 0..self.n_elem() {
            self.set_elem(i, x);
        }
    }

    /// A real-kind copy of this payload (integer elements widened).
    pub fn to_real(&self) -> Value {
        match self {
            Value::Real(x) => Value::Real(*x),
            Value::RealVec(v) => Value::RealVec(v.clone()),
            Value::RealMat(m) => Value::RealMat(m.clone()),
            Value::IntVec(v) => Value::RealVec(v.map(|x| x as f64)),
            Value::IntMat(m) => Value::RealMat(m.map(|x| x as f64)),
        }
    }

    /// Broadcasting view over the elements, for the log-density kernels.
    pub fn broadcast(&self) -> Broadcast<'_> {
        match self {
            Value::Real(x) => Broadcast::Scalar(*x),
            Value::RealVec(v) => Broadcast::Reals(v.as_slice()),
            Value::RealMat(m) => Broadcast::Reals(m.as_slice()),
            Value::IntVec(v) => Broadcast::Ints(v.as_slice()),
            Value::IntMat(m) => Broadcast::Ints(m.as_slice()),
        }
    }

    pub fn as_real_vec(&self) -> Option<&DVector<f64>> {
        match self {
            Value::RealVec(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_real_mat(&self) -> Option<&DMatrix<f64>> {
        match self {
            Value::RealMat(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_int_vec(&self) -> Option<&DVector<i64>> {
        match self {
            Value::IntVec(v) => Some(v),
            _ => None,
        }
    }

    /// Short name of the payload kind, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Real(_) => "real scalar",
            Value::RealVec(_) => "real vector",
            Value::RealMat(_) => "real matrix",
            Value::IntVec(_) => "integer vector",
            Value::IntMat(_) => "integer matrix",
        }
    }

    pub(crate) fn add_assign(&mut self, other: &Value) {
        debug_assert_eq!(self.n_elem(), other.n_elem());
        for i in 0..self.n_elem() {
            let x = self.elem(i) + other.elem(i);
            self.set_elem(i, x);
        }
    }

    pub(crate) fn scale_mut(&mut self, k: f64) {
        for i in 0..self.n_elem() {
            let x = self.elem(i) * k;
            self.set_elem(i, x);
        }
    }
}

/// Arithmetic mean of a history of same-shaped payloads, in real arithmetic.
///
/// Integer histories average to real-kind values. Empty histories have no
/// mean.
pub fn mean_of(history: &[Value]) -> Option<Value> {
    let first = history.first()?;
    let mut acc = first.to_real();
    for v in &history[1..] {
        acc.add_assign(v);
    }
    acc.scale_mut(1.0 / history.len().to_f64()?);
    Some(acc)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Real(x) => write!(f, "{x}"),
            Value::RealVec(v) => write!(f, "{v}"),
            Value::RealMat(m) => write!(f, "{m}"),
            Value::IntVec(v) => write!(f, "{v}"),
            Value::IntMat(m) => write!(f, "{m}"),
        }
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Real(x)
    }
}

impl From<DVector<f64>> for Value {
    fn from(v: DVector<f64>) -> Self {
        Value::RealVec(v)
    }
}

impl From<DMatrix<f64>> for Value {
    fn from(m: DMatrix<f64>) -> Self {
        Value::RealMat(m)
    }
}

impl From<DVector<i64>> for Value {
    fn from(v: DVector<i64>) -> Self {
        Value::IntVec(v)
    }
}

impl From<DMatrix<i64>> for Value {
    fn from(m: DMatrix<i64>) -> Self {
        Value::IntMat(m)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::RealVec(DVector::from_vec(v))
    }
}

impl From<Vec<i64>> for Value {
    fn from(v: Vec<i64>) -> Self {
        Value::IntVec(DVector::from_vec(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn linear_indexing_is_column_major() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let v = Value::RealMat(m);
        assert_eq!(v.shape(), (2, 2));
        assert_eq!(v.n_elem(), 4);
        // Column-major traversal of [[1, 2], [3, 4]].
        assert_eq!(v.elem(0), 1.0);
        assert_eq!(v.elem(1), 3.0);
        assert_eq!(v.elem(2), 2.0);
        assert_eq!(v.elem(3), 4.0);
    }

    #[test]
    fn integer_payloads_truncate_toward_zero() {
        let mut v = Value::from(vec![0_i64, 0]);
        v.set_elem(0, 1.9);
        v.set_elem(1, -1.9);
        assert_eq!(v.elem(0), 1.0);
        assert_eq!(v.elem(1), -1.0);
    }

    #[test]
    fn fill_overwrites_every_element() {
        let mut v = Value::from(vec![1.0, 2.0, 3.0]);
        v.fill(0.0);
        assert_eq!(v, Value::from(vec![0.0, 0.0, 0.0]));
    }

    #[test]
    fn mean_of_integer_history_is_real() {
        let history = vec![Value::from(vec![1_i64, 3]), Value::from(vec![2_i64, 4])];
        let mean = mean_of(&history).unwrap();
        let mean = mean.as_real_vec().unwrap();
        assert_abs_diff_eq!(mean[0], 1.5);
        assert_abs_diff_eq!(mean[1], 3.5);
    }

    #[test]
    fn mean_of_empty_history_is_none() {
        assert!(mean_of(&[]).is_none());
    }
}
