//! Differentiable expressions over manifold-valued leaves.
//!
//! An [`Expression`] is a composed function over variables stored in a
//! [`Values`] assignment. Evaluating it yields the output value and, on
//! request, one Jacobian block per participating leaf: the derivative of the
//! output's local coordinates with respect to that leaf's tangent
//! coordinates, accumulated through the chain rule across every intermediate
//! operation.
//!
//! Operations supply their own local derivatives through an optional output
//! slot; when the caller evaluates value-only, no derivative work happens
//! anywhere in the tree.

use manifactor_core::{Chart, Key, Result, Values};
use nalgebra::{DMatrix, DVector};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Mapping from variable key to a dense Jacobian block.
///
/// Keys are unique and iteration is key-ordered, which is what makes the
/// downstream block layout deterministic. Adding a block for a key that is
/// already present **sums** the blocks: a leaf reached through several paths
/// of an expression contributes the sum of its path derivatives.
#[derive(Debug, Clone, Default)]
pub struct JacobianMap {
    blocks: BTreeMap<Key, DMatrix<f64>>,
}

impl JacobianMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self {
            blocks: BTreeMap::new(),
        }
    }

    /// Adds a Jacobian block for `key`, summing with any existing block.
    ///
    /// # Panics
    ///
    /// Panics if a block for `key` exists with a different shape; the blocks
    /// of one leaf always share the leaf's tangent dimension and the
    /// expression's output dimension.
    pub fn add(&mut self, key: Key, block: DMatrix<f64>) {
        match self.blocks.entry(key) {
            std::collections::btree_map::Entry::Occupied(mut entry) => {
                assert_eq!(
                    entry.get().shape(),
                    block.shape(),
                    "conflicting Jacobian block shapes for key {key}"
                );
                *entry.get_mut() += block;
            }
            std::collections::btree_map::Entry::Vacant(entry) => {
                entry.insert(block);
            }
        }
    }

    /// Returns the block for `key`, if present.
    pub fn get(&self, key: Key) -> Option<&DMatrix<f64>> {
        self.blocks.get(&key)
    }

    /// Iterates blocks in key order.
    pub fn iter(&self) -> impl Iterator<Item = (Key, &DMatrix<f64>)> {
        self.blocks.iter().map(|(k, m)| (*k, m))
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Returns `true` if no blocks are stored.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Removes all blocks.
    pub fn clear(&mut self) {
        self.blocks.clear();
    }
}

/// Local Jacobian output slot of an operation: absent means "skip the
/// derivative work entirely".
pub type JacobianSlot<'a> = Option<&'a mut DMatrix<f64>>;

/// A node of the expression tree.
trait Node<T>: Send + Sync {
    /// Evaluates the value only. Must not perform derivative work.
    fn value(&self, values: &Values) -> Result<T>;

    /// Evaluates the value and accumulates per-leaf Jacobians into `out`.
    fn value_and_jacobians(&self, values: &Values, out: &mut JacobianMap) -> Result<T>;

    /// Collects the leaf keys reachable from this node.
    fn collect_keys(&self, out: &mut BTreeSet<Key>);
}

struct ConstantNode<T>(T);

impl<T: Chart + Send + Sync> Node<T> for ConstantNode<T> {
    fn value(&self, _values: &Values) -> Result<T> {
        Ok(self.0.clone())
    }

    fn value_and_jacobians(&self, _values: &Values, _out: &mut JacobianMap) -> Result<T> {
        Ok(self.0.clone())
    }

    fn collect_keys(&self, _out: &mut BTreeSet<Key>) {}
}

struct LeafNode<T> {
    key: Key,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: Chart + Send + Sync + 'static> Node<T> for LeafNode<T> {
    fn value(&self, values: &Values) -> Result<T> {
        Ok(values.get::<T>(self.key)?.clone())
    }

    fn value_and_jacobians(&self, values: &Values, out: &mut JacobianMap) -> Result<T> {
        let value = values.get::<T>(self.key)?.clone();
        let dim = value.dimension();
        out.add(self.key, DMatrix::identity(dim, dim));
        Ok(value)
    }

    fn collect_keys(&self, out: &mut BTreeSet<Key>) {
        out.insert(self.key);
    }
}

struct UnaryNode<A, T, F>
where
    F: Fn(&A, JacobianSlot<'_>) -> T,
{
    f: F,
    input: Expression<A>,
}

impl<A, T, F> Node<T> for UnaryNode<A, T, F>
where
    A: Chart + Send + Sync,
    T: Chart,
    F: Fn(&A, JacobianSlot<'_>) -> T + Send + Sync,
{
    fn value(&self, values: &Values) -> Result<T> {
        let a = self.input.root.value(values)?;
        Ok((self.f)(&a, None))
    }

    fn value_and_jacobians(&self, values: &Values, out: &mut JacobianMap) -> Result<T> {
        let mut inner = JacobianMap::new();
        let a = self.input.root.value_and_jacobians(values, &mut inner)?;

        // A keyless input (constant subtree) contributes no blocks, so its
        // local derivative is never needed.
        if inner.is_empty() {
            return Ok((self.f)(&a, None));
        }

        let mut local = DMatrix::zeros(0, 0);
        let value = (self.f)(&a, Some(&mut local));
        debug_assert_eq!(local.shape(), (value.dimension(), a.dimension()));

        for (key, block) in inner.iter() {
            out.add(key, &local * block);
        }
        Ok(value)
    }

    fn collect_keys(&self, out: &mut BTreeSet<Key>) {
        self.input.root.collect_keys(out);
    }
}

struct BinaryNode<A, B, T, F>
where
    F: Fn(&A, &B, JacobianSlot<'_>, JacobianSlot<'_>) -> T,
{
    f: F,
    left: Expression<A>,
    right: Expression<B>,
}

impl<A, B, T, F> Node<T> for BinaryNode<A, B, T, F>
where
    A: Chart + Send + Sync,
    B: Chart + Send + Sync,
    T: Chart,
    F: Fn(&A, &B, JacobianSlot<'_>, JacobianSlot<'_>) -> T + Send + Sync,
{
    fn value(&self, values: &Values) -> Result<T> {
        let a = self.left.root.value(values)?;
        let b = self.right.root.value(values)?;
        Ok((self.f)(&a, &b, None, None))
    }

    fn value_and_jacobians(&self, values: &Values, out: &mut JacobianMap) -> Result<T> {
        let mut left_map = JacobianMap::new();
        let mut right_map = JacobianMap::new();
        let a = self.left.root.value_and_jacobians(values, &mut left_map)?;
        let b = self.right.root.value_and_jacobians(values, &mut right_map)?;

        // Each operand's local derivative is requested only if that operand
        // reaches a key; a constant subtree gets no slot.
        let need_a = !left_map.is_empty();
        let need_b = !right_map.is_empty();
        let mut local_a = DMatrix::zeros(0, 0);
        let mut local_b = DMatrix::zeros(0, 0);
        let value = (self.f)(
            &a,
            &b,
            need_a.then_some(&mut local_a),
            need_b.then_some(&mut local_b),
        );

        // Contributions of a leaf reachable through both operands sum.
        if need_a {
            debug_assert_eq!(local_a.shape(), (value.dimension(), a.dimension()));
            for (key, block) in left_map.iter() {
                out.add(key, &local_a * block);
            }
        }
        if need_b {
            debug_assert_eq!(local_b.shape(), (value.dimension(), b.dimension()));
            for (key, block) in right_map.iter() {
                out.add(key, &local_b * block);
            }
        }
        Ok(value)
    }

    fn collect_keys(&self, out: &mut BTreeSet<Key>) {
        self.left.root.collect_keys(out);
        self.right.root.collect_keys(out);
    }
}

/// A composed differentiable function over manifold-valued variables.
///
/// Expressions are cheaply cloneable trees; subtrees can be shared between
/// expressions. The output type `T` and every intermediate type implement
/// [`Chart`], so values and derivatives always have well-defined local
/// coordinates.
pub struct Expression<T> {
    root: Arc<dyn Node<T>>,
}

impl<T> Clone for Expression<T> {
    fn clone(&self) -> Self {
        Self {
            root: Arc::clone(&self.root),
        }
    }
}

impl<T: Chart + Send + Sync + 'static> Expression<T> {
    /// A constant expression: fixed value, no keys, no Jacobians.
    pub fn constant(value: T) -> Self {
        Self {
            root: Arc::new(ConstantNode(value)),
        }
    }

    /// A leaf expression: the variable stored under `key`.
    ///
    /// Its Jacobian is the identity on the leaf's tangent space.
    pub fn leaf(key: Key) -> Self {
        Self {
            root: Arc::new(LeafNode {
                key,
                _marker: std::marker::PhantomData,
            }),
        }
    }

    /// Applies a unary operation to an expression.
    ///
    /// `f` returns the value and, only when the slot is given, writes the
    /// local Jacobian of the output's local coordinates with respect to the
    /// input's tangent coordinates (`output.dimension()` rows,
    /// `input.dimension()` columns). The slot is withheld on value-only
    /// evaluation and when the input subtree reaches no keys.
    pub fn unary<A, F>(f: F, input: Expression<A>) -> Self
    where
        A: Chart + Send + Sync + 'static,
        F: Fn(&A, JacobianSlot<'_>) -> T + Send + Sync + 'static,
    {
        Self {
            root: Arc::new(UnaryNode { f, input }),
        }
    }

    /// Applies a binary operation to two expressions.
    ///
    /// Each Jacobian slot, when given, receives the local derivative with
    /// respect to the corresponding operand. An operand whose subtree
    /// reaches no keys gets no slot.
    pub fn binary<A, B, F>(f: F, left: Expression<A>, right: Expression<B>) -> Self
    where
        A: Chart + Send + Sync + 'static,
        B: Chart + Send + Sync + 'static,
        F: Fn(&A, &B, JacobianSlot<'_>, JacobianSlot<'_>) -> T + Send + Sync + 'static,
    {
        Self {
            root: Arc::new(BinaryNode { f, left, right }),
        }
    }

    /// The set of leaf keys this expression reads, in sorted order.
    pub fn keys(&self) -> BTreeSet<Key> {
        let mut out = BTreeSet::new();
        self.root.collect_keys(&mut out);
        out
    }

    /// Tangent dimension of every leaf, keyed and sorted by key.
    pub fn dims(&self, values: &Values) -> Result<BTreeMap<Key, usize>> {
        self.keys()
            .into_iter()
            .map(|key| Ok((key, values.dimension(key)?)))
            .collect()
    }

    /// Evaluates the expression against an assignment, value only.
    ///
    /// Cheaper than [`value_and_jacobians`](Self::value_and_jacobians): no
    /// derivative is computed anywhere in the tree.
    pub fn value(&self, values: &Values) -> Result<T> {
        self.root.value(values)
    }

    /// Evaluates the expression and populates `jacobians` with one block per
    /// reachable leaf key: the chain-rule derivative of the output's local
    /// coordinates with respect to that leaf's tangent coordinates.
    pub fn value_and_jacobians(&self, values: &Values, jacobians: &mut JacobianMap) -> Result<T> {
        self.root.value_and_jacobians(values, jacobians)
    }
}

/// Convenience: sum of two vector expressions.
pub fn sum(
    left: Expression<DVector<f64>>,
    right: Expression<DVector<f64>>,
) -> Expression<DVector<f64>> {
    Expression::binary(
        |a: &DVector<f64>, b: &DVector<f64>, ha: JacobianSlot<'_>, hb: JacobianSlot<'_>| {
            if let Some(h) = ha {
                *h = DMatrix::identity(a.len(), a.len());
            }
            if let Some(h) = hb {
                *h = DMatrix::identity(b.len(), b.len());
            }
            a + b
        },
        left,
        right,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use manifactor_core::CoreError;

    #[test]
    fn test_jacobian_map_sums_duplicates() {
        let mut map = JacobianMap::new();
        map.add(Key::new(3), DMatrix::identity(2, 2));
        map.add(Key::new(1), DMatrix::identity(2, 2) * 4.0);
        map.add(Key::new(3), DMatrix::identity(2, 2) * 2.0);

        assert_eq!(map.len(), 2);
        assert_relative_eq!(
            map.get(Key::new(3)).unwrap()[(0, 0)],
            3.0,
            epsilon = 1e-15
        );
        // Iteration follows key order, not insertion order.
        let keys: Vec<Key> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![Key::new(1), Key::new(3)]);
    }

    #[test]
    #[should_panic(expected = "conflicting Jacobian block shapes")]
    fn test_jacobian_map_rejects_shape_conflicts() {
        let mut map = JacobianMap::new();
        map.add(Key::new(0), DMatrix::identity(2, 2));
        map.add(Key::new(0), DMatrix::identity(3, 3));
    }

    #[test]
    fn test_constant_has_no_keys() {
        let expr = Expression::constant(DVector::from_vec(vec![1.0, 2.0]));
        assert!(expr.keys().is_empty());

        let values = Values::new();
        let mut map = JacobianMap::new();
        let value = expr.value_and_jacobians(&values, &mut map).unwrap();
        assert!(map.is_empty());
        assert_relative_eq!(value[0], 1.0, epsilon = 1e-15);
    }

    #[test]
    fn test_leaf_jacobian_is_identity() {
        let key = Key::new(5);
        let mut values = Values::new();
        values.insert(key, DVector::from_vec(vec![1.0, -1.0, 2.0]));

        let expr = Expression::<DVector<f64>>::leaf(key);
        let mut map = JacobianMap::new();
        expr.value_and_jacobians(&values, &mut map).unwrap();
        assert_relative_eq!(
            map.get(key).unwrap(),
            &DMatrix::identity(3, 3),
            epsilon = 1e-15
        );
    }

    #[test]
    fn test_leaf_unknown_key_errors() {
        let expr = Expression::<f64>::leaf(Key::new(1));
        let values = Values::new();
        assert!(matches!(
            expr.value(&values),
            Err(CoreError::UnknownKey { .. })
        ));
    }

    #[test]
    fn test_duplicate_leaf_contributions_sum() {
        let key = Key::new(2);
        let mut values = Values::new();
        values.insert(key, DVector::from_vec(vec![1.0, 2.0]));

        // f(x, y) = x + 2y with both operands bound to the same leaf, so the
        // total derivative is I + 2I = 3I.
        let expr = Expression::binary(
            |a: &DVector<f64>, b: &DVector<f64>, ha: JacobianSlot<'_>, hb: JacobianSlot<'_>| {
                if let Some(h) = ha {
                    *h = DMatrix::identity(a.len(), a.len());
                }
                if let Some(h) = hb {
                    *h = DMatrix::identity(b.len(), b.len()) * 2.0;
                }
                a + b * 2.0
            },
            Expression::<DVector<f64>>::leaf(key),
            Expression::<DVector<f64>>::leaf(key),
        );

        let mut map = JacobianMap::new();
        let value = expr.value_and_jacobians(&values, &mut map).unwrap();
        assert_relative_eq!(value[0], 3.0, epsilon = 1e-15);
        assert_eq!(map.len(), 1);
        assert_relative_eq!(
            map.get(key).unwrap(),
            &(DMatrix::identity(2, 2) * 3.0),
            epsilon = 1e-15
        );
    }

    #[test]
    fn test_chain_rule_through_nested_unary() {
        let key = Key::new(0);
        let mut values = Values::new();
        values.insert(key, DVector::from_vec(vec![1.0, 2.0]));

        let scale = |factor: f64| {
            move |a: &DVector<f64>, h: JacobianSlot<'_>| -> DVector<f64> {
                if let Some(h) = h {
                    *h = DMatrix::identity(a.len(), a.len()) * factor;
                }
                a * factor
            }
        };

        let expr = Expression::unary(
            scale(3.0),
            Expression::unary(scale(2.0), Expression::<DVector<f64>>::leaf(key)),
        );

        let mut map = JacobianMap::new();
        let value = expr.value_and_jacobians(&values, &mut map).unwrap();
        assert_relative_eq!(value[1], 12.0, epsilon = 1e-15);
        assert_relative_eq!(
            map.get(key).unwrap(),
            &(DMatrix::identity(2, 2) * 6.0),
            epsilon = 1e-15
        );

        // Value-only evaluation agrees.
        assert_relative_eq!(expr.value(&values).unwrap(), value, epsilon = 1e-15);
    }

    #[test]
    fn test_constant_operand_gets_no_jacobian_slot() {
        let key = Key::new(4);
        let mut values = Values::new();
        values.insert(key, DVector::from_vec(vec![1.0, 2.0]));

        // The right operand is constant; its slot must stay absent even on
        // the full derivative pass.
        let expr = Expression::binary(
            |a: &DVector<f64>, b: &DVector<f64>, ha: JacobianSlot<'_>, hb: JacobianSlot<'_>| {
                assert!(hb.is_none());
                if let Some(h) = ha {
                    *h = DMatrix::identity(a.len(), a.len());
                }
                a + b
            },
            Expression::<DVector<f64>>::leaf(key),
            Expression::constant(DVector::from_vec(vec![10.0, 20.0])),
        );

        let mut map = JacobianMap::new();
        let value = expr.value_and_jacobians(&values, &mut map).unwrap();
        assert_relative_eq!(value[1], 22.0, epsilon = 1e-15);
        assert_eq!(map.len(), 1);
        assert_relative_eq!(
            map.get(key).unwrap(),
            &DMatrix::identity(2, 2),
            epsilon = 1e-15
        );

        // A unary operation over a fully constant subtree skips derivative
        // work the same way.
        let constant_expr = Expression::unary(
            |a: &DVector<f64>, h: JacobianSlot<'_>| -> DVector<f64> {
                assert!(h.is_none());
                a * 2.0
            },
            Expression::constant(DVector::from_vec(vec![1.5])),
        );
        let mut map = JacobianMap::new();
        let value = constant_expr.value_and_jacobians(&values, &mut map).unwrap();
        assert!(map.is_empty());
        assert_relative_eq!(value[0], 3.0, epsilon = 1e-15);
    }

    #[test]
    fn test_keys_and_dims() {
        let k0 = Key::new(0);
        let k1 = Key::new(1);
        let mut values = Values::new();
        values.insert(k0, DVector::from_vec(vec![1.0, 2.0]));
        values.insert(k1, DVector::from_vec(vec![3.0]));

        let expr = sum(Expression::leaf(k0), {
            // Pad the scalar leaf up to dimension 2 just for the key test.
            Expression::unary(
                |a: &DVector<f64>, h: JacobianSlot<'_>| -> DVector<f64> {
                    if let Some(h) = h {
                        *h = DMatrix::from_row_slice(2, 1, &[1.0, 0.0]);
                    }
                    DVector::from_vec(vec![a[0], 0.0])
                },
                Expression::<DVector<f64>>::leaf(k1),
            )
        });

        assert_eq!(expr.keys().len(), 2);
        let dims = expr.dims(&values).unwrap();
        assert_eq!(dims[&k0], 2);
        assert_eq!(dims[&k1], 1);
    }
}
