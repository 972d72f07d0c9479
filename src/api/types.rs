//! Request and response bodies shared by the HTTP client and server.

use serde::{Deserialize, Serialize};

use crate::ledger::DEFAULT_TOTAL_DELTA;
use crate::wizard::string_or_number;

/// `POST scopes`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewScope {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub total_epsilon: f64,
    #[serde(default = "default_total_delta")]
    pub total_delta: f64,
}

fn default_total_delta() -> f64 {
    DEFAULT_TOTAL_DELTA
}

/// `POST scope/{id}/allocate` and `POST scope/{id}/consume`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetAmount {
    pub epsilon: f64,
    #[serde(default)]
    pub delta: f64,
}

/// `POST scope/{id}/alerts`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAlert {
    pub threshold: f64,
    pub target: String,
}

/// Body of every non-2xx response from the local server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(alias = "detail")]
    pub error: String,
    #[serde(default)]
    pub kind: String,
}

/// Column metadata used to tell numeric from categorical columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetColumn {
    pub name: String,
    #[serde(alias = "data_type")]
    pub dtype: String,
    #[serde(default)]
    pub is_categorical: bool,
    #[serde(default, alias = "pii")]
    pub is_pii: bool,
    #[serde(default)]
    pub min_val: Option<f64>,
    #[serde(default)]
    pub max_val: Option<f64>,
}

const NUMERIC_DTYPE_PREFIXES: [&str; 6] = ["int", "uint", "float", "double", "decimal", "numeric"];

impl DatasetColumn {
    pub fn is_numeric(&self) -> bool {
        let dtype = self.dtype.to_ascii_lowercase();
        !self.is_categorical
            && NUMERIC_DTYPE_PREFIXES
                .iter()
                .any(|prefix| dtype.starts_with(prefix))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub row_count: Option<u64>,
    #[serde(default)]
    pub columns: Vec<DatasetColumn>,
}

impl Dataset {
    /// Columns the numeric metrics can run on.
    pub fn numeric_columns(&self) -> impl Iterator<Item = &DatasetColumn> {
        self.columns.iter().filter(|column| column.is_numeric())
    }

    pub fn categorical_columns(&self) -> impl Iterator<Item = &DatasetColumn> {
        self.columns.iter().filter(|column| !column.is_numeric())
    }
}
