use serde::{Deserialize, Serialize};

use crate::error::{BackendError, Result};

/// Bus selector of an element on the original bus of its substation.
pub const ORIGINAL_BUS: i32 = 1;
/// Bus selector of an element on the split bus of its substation.
pub const SPLIT_BUS: i32 = 2;
/// Bus selector of a disconnected element.
pub const DISCONNECTED: i32 = -1;

/// Maps bus selectors to physical bus rows and back.
///
/// Substation `s` owns bus row `s` and bus row `s + n_sub`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusResolver {
    n_sub: i64,
}

impl BusResolver {
    pub fn new(n_sub: usize) -> Self {
        Self {
            n_sub: n_sub as i64,
        }
    }

    pub fn n_sub(&self) -> usize {
        self.n_sub as usize
    }

    /// Rejects anything that is not a bus selector.
    pub fn check(selector: i32) -> Result<()> {
        match selector {
            ORIGINAL_BUS | SPLIT_BUS | DISCONNECTED => Ok(()),
            other => Err(BackendError::InvalidBus(other)),
        }
    }

    /// Physical bus row of `selector` at substation `home`, `-1` to disconnect.
    pub fn resolve(&self, selector: i32, home: usize) -> Result<i64> {
        match selector {
            ORIGINAL_BUS => Ok(home as i64),
            SPLIT_BUS => Ok(home as i64 + self.n_sub),
            DISCONNECTED => Ok(-1),
            other => Err(BackendError::InvalidBus(other)),
        }
    }

    /// Selector of an element that sits on `bus`, `None` when `bus` belongs to
    /// neither physical bus of `home`.
    pub fn selector(&self, bus: i64, in_service: bool, home: usize) -> Option<i32> {
        let home = home as i64;
        if !in_service {
            Some(DISCONNECTED)
        } else if bus == home {
            Some(ORIGINAL_BUS)
        } else if bus == home + self.n_sub {
            Some(SPLIT_BUS)
        } else {
            None
        }
    }

    /// Like [`BusResolver::selector`], reporting a mismatch as an error.
    pub fn decode(&self, element: &str, bus: i64, in_service: bool, home: usize) -> Result<i32> {
        self.selector(bus, in_service, home)
            .ok_or_else(|| BackendError::InconsistentBus {
                element: element.to_string(),
                bus,
                original: home as i64,
                split: home as i64 + self.n_sub,
            })
    }
}
