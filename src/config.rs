use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Power flow options, such as the maximum number of iterations and the
/// tolerance for convergence.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerFlowConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_it: Option<usize>, // Maximum number of Newton iterations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tol: Option<f64>, // Tolerance on the largest power mismatch (p.u.)
}

impl PowerFlowConfig {
    pub const DEFAULT_MAX_IT: usize = 10;
    pub const DEFAULT_TOL: f64 = 1e-8;

    /// Reads the options from a JSON object, absent keys keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn max_it(&self) -> usize {
        self.max_it.unwrap_or(Self::DEFAULT_MAX_IT)
    }

    pub fn tol(&self) -> f64 {
        self.tol.unwrap_or(Self::DEFAULT_TOL)
    }
}
