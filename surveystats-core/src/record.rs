//! Observation record types

use serde::{Deserialize, Serialize};

use crate::question::StateName;

/// A single survey observation as ingested from the dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// First year of the observation window
    pub year_start: String,

    /// Last year of the observation window
    pub year_end: String,

    /// The measured value; rows without one are dropped at ingestion
    pub data_value: f64,

    /// Two-letter state abbreviation
    pub location_abbr: String,

    /// Full state name, the per-question partition key
    pub location_desc: String,

    /// Stratification category, empty when the row carries none
    #[serde(default)]
    pub stratification_category: String,

    /// Value within the stratification category
    #[serde(default)]
    pub stratification_value: String,
}

impl Record {
    /// State this record belongs to
    pub fn state(&self) -> StateName {
        StateName::from(self.location_desc.as_str())
    }

    /// Whether the record carries a stratification category
    pub fn has_category(&self) -> bool {
        !self.stratification_category.is_empty()
    }
}
