use serde::{Deserialize, Serialize};

use super::bus::BusResolver;
use super::topology::GridLayout;
use crate::error::{BackendError, Result};

/// New values for some rows of an injection vector.
///
/// Only the rows flagged in `changed` are written, the other values are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueChange<T> {
    pub values: Vec<T>,
    pub changed: Vec<bool>,
}

impl<T: Copy + Default> ValueChange<T> {
    pub fn unchanged(n: usize) -> Self {
        Self {
            values: vec![T::default(); n],
            changed: vec![false; n],
        }
    }

    pub fn set(&mut self, row: usize, value: T) {
        self.values[row] = value;
        self.changed[row] = true;
    }

    /// Flagged rows with their new value.
    pub fn iter_changed(&self) -> impl Iterator<Item = (usize, T)> + '_ {
        self.values
            .iter()
            .zip(&self.changed)
            .enumerate()
            .filter_map(|(row, (v, c))| c.then_some((row, *v)))
    }

    pub fn any_changed(&self) -> bool {
        self.changed.iter().any(|c| *c)
    }

    fn check_len(&self, what: &str, n: usize) -> Result<()> {
        if self.values.len() != n || self.changed.len() != n {
            return Err(BackendError::InvalidAction(format!(
                "{what} has {} values and {} flags for {n} rows",
                self.values.len(),
                self.changed.len()
            )));
        }
        Ok(())
    }
}

/// Requested changes of the shunt table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShuntChanges {
    pub p: ValueChange<f64>,
    pub q: ValueChange<f64>,
    /// Bus selectors.
    pub bus: ValueChange<i32>,
}

impl ShuntChanges {
    pub fn unchanged(n: usize) -> Self {
        Self {
            p: ValueChange::unchanged(n),
            q: ValueChange::unchanged(n),
            bus: ValueChange::unchanged(n),
        }
    }
}

/// The state delta applied to the grid before a power flow.
///
/// Injections are in MW, MVar and kV.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendAction {
    /// Requested in-service status of the (original, split) bus of each substation.
    pub active_bus: Vec<[bool; 2]>,
    pub prod_p: ValueChange<f64>,
    pub prod_v: ValueChange<f64>,
    pub load_p: ValueChange<f64>,
    pub load_q: ValueChange<f64>,
    /// (topology slot, bus selector) pairs, applied in order.
    pub topo: Vec<(usize, i32)>,
    pub shunt: Option<ShuntChanges>,
}

impl BackendAction {
    /// An action that changes nothing on a grid whose buses are in the state `active_bus`.
    pub fn do_nothing(layout: &GridLayout, active_bus: Vec<[bool; 2]>) -> Self {
        Self {
            active_bus,
            prod_p: ValueChange::unchanged(layout.n_gen),
            prod_v: ValueChange::unchanged(layout.n_gen),
            load_p: ValueChange::unchanged(layout.n_load),
            load_q: ValueChange::unchanged(layout.n_load),
            topo: Vec::new(),
            shunt: None,
        }
    }

    /// Moves the element of `slot` to `selector`, activating the target bus.
    pub fn set_bus(&mut self, layout: &GridLayout, slot: usize, selector: i32) {
        if let Some(s) = layout.big_topo_to_backend.get(slot).map(|s| s.sub) {
            if let Some(a) = self.active_bus.get_mut(s) {
                match selector {
                    1 => a[0] = true,
                    2 => a[1] = true,
                    _ => {}
                }
            }
        }
        self.topo.push((slot, selector));
    }

    /// Checks dimensions, slots and selectors against the grid, before anything is written.
    pub fn validate(&self, layout: &GridLayout) -> Result<()> {
        if self.active_bus.len() != layout.n_sub {
            return Err(BackendError::InvalidAction(format!(
                "bus status given for {} substations, the grid has {}",
                self.active_bus.len(),
                layout.n_sub
            )));
        }
        self.prod_p.check_len("prod_p", layout.n_gen)?;
        self.prod_v.check_len("prod_v", layout.n_gen)?;
        self.load_p.check_len("load_p", layout.n_load)?;
        self.load_q.check_len("load_q", layout.n_load)?;
        for &(slot, selector) in &self.topo {
            if slot >= layout.dim_topo {
                return Err(BackendError::InvalidAction(format!(
                    "topology slot {slot} out of range (dim_topo = {})",
                    layout.dim_topo
                )));
            }
            BusResolver::check(selector)?;
        }
        if let Some(shunt) = &self.shunt {
            shunt.p.check_len("shunt_p", layout.n_shunt)?;
            shunt.q.check_len("shunt_q", layout.n_shunt)?;
            shunt.bus.check_len("shunt_bus", layout.n_shunt)?;
            for (_, selector) in shunt.bus.iter_changed() {
                BusResolver::check(selector)?;
            }
        }
        Ok(())
    }
}
