//! Assignment container mapping variable keys to chart values.
//!
//! [`Values`] is the read-only view the linearization core consumes: given a
//! key it yields the current manifold value and its tangent dimension. It
//! also carries the chart-side half of the optimizer's update step,
//! [`Values::retract_all`], which moves every variable by a tangent
//! increment through its own chart.

use crate::chart::{downcast_chart, AnyChartValue, Chart};
use crate::error::{CoreError, Result};
use crate::key::Key;
use nalgebra::DVector;
use std::collections::BTreeMap;

/// A keyed collection of chart values.
///
/// Values are stored type-erased so variables of different manifold types can
/// live in one container; typed lookup downcasts back to the concrete type.
/// Keys iterate in sorted order.
#[derive(Clone, Default)]
pub struct Values {
    map: BTreeMap<Key, Box<dyn AnyChartValue>>,
}

impl Values {
    /// Creates an empty assignment.
    pub fn new() -> Self {
        Self {
            map: BTreeMap::new(),
        }
    }

    /// Inserts or replaces the value stored under `key`.
    pub fn insert<T>(&mut self, key: Key, value: T)
    where
        T: Chart + Send + Sync + 'static,
    {
        self.map.insert(key, Box::new(value));
    }

    /// Looks up the value under `key`, downcast to its concrete chart type.
    ///
    /// # Errors
    ///
    /// [`CoreError::UnknownKey`] if the key is absent,
    /// [`CoreError::TypeMismatch`] if the stored value is of another type.
    pub fn get<T: Chart + 'static>(&self, key: Key) -> Result<&T> {
        let value = self.map.get(&key).ok_or(CoreError::unknown_key(key))?;
        downcast_chart(value.as_ref(), key)
    }

    /// Looks up the type-erased value under `key`.
    pub fn get_dyn(&self, key: Key) -> Result<&dyn AnyChartValue> {
        self.map
            .get(&key)
            .map(|v| v.as_ref())
            .ok_or(CoreError::unknown_key(key))
    }

    /// Returns the declared tangent dimension of the variable under `key`.
    pub fn dimension(&self, key: Key) -> Result<usize> {
        Ok(self.get_dyn(key)?.dimension())
    }

    /// Returns `true` if `key` is present.
    pub fn contains(&self, key: Key) -> bool {
        self.map.contains_key(&key)
    }

    /// Number of variables stored.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if no variables are stored.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterates over the stored keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.map.keys().copied()
    }

    /// Applies a tangent increment to every listed variable.
    ///
    /// Each delta is retracted through the chart of the variable it targets;
    /// variables without a delta are copied unchanged. This is the update
    /// step an outer optimizer applies after solving the linear system.
    ///
    /// # Errors
    ///
    /// [`CoreError::UnknownKey`] if a delta targets an absent variable,
    /// [`CoreError::DimensionMismatch`] if a delta's length differs from the
    /// variable's tangent dimension.
    pub fn retract_all(&self, deltas: &BTreeMap<Key, DVector<f64>>) -> Result<Values> {
        for (&key, delta) in deltas {
            let dim = self.dimension(key)?;
            if delta.len() != dim {
                return Err(CoreError::dimension_mismatch(dim, delta.len()));
            }
        }
        let map = self
            .map
            .iter()
            .map(|(&key, value)| {
                let moved = match deltas.get(&key) {
                    Some(delta) => value.retract_dyn(delta),
                    None => value.clone_box(),
                };
                (key, moved)
            })
            .collect();
        Ok(Values { map })
    }
}

impl std::fmt::Debug for Values {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut set = f.debug_set();
        for (key, value) in &self.map {
            set.entry(&format_args!("{} (dim {})", key, value.dimension()));
        }
        set.finish()
    }
}
