//! Estimator and page value objects.

use serde::{Deserialize, Serialize};

/// One scored quantity produced by a simulation run.
///
/// An estimator corresponds to one output file of the simulator (for
/// example a dose or fluence detector) and holds one or more pages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Estimator {
    /// Estimator name, derived from the output file core name.
    pub name: String,

    pub pages: Vec<Page>,
}

impl Estimator {
    pub fn new(name: impl Into<String>, pages: Vec<Page>) -> Self {
        Self {
            name: name.into(),
            pages,
        }
    }
}

/// One page of an estimator: a named numeric vector over the scoring grid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// Page number within the estimator. Stable across replicas even when
    /// enumeration order differs.
    pub page_number: u32,

    /// Physical quantity name (e.g. "Dose").
    pub name: String,

    /// Unit of the values (e.g. "Gy").
    pub unit: String,

    /// Scored values, one per grid element. Same length in every replica.
    pub values: Vec<f64>,
}

impl Page {
    pub fn new(
        page_number: u32,
        name: impl Into<String>,
        unit: impl Into<String>,
        values: Vec<f64>,
    ) -> Self {
        Self {
            page_number,
            name: name.into(),
            unit: unit.into(),
            values,
        }
    }
}
