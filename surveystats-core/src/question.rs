//! Question and state name types plus the fixed question classification

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

use crate::error::{StatsError, StatsResult};

/// Questions where a lower value is favorable
pub const BEST_IS_MIN_QUESTIONS: [&str; 5] = [
    "Percent of adults aged 18 years and older who have an overweight classification",
    "Percent of adults aged 18 years and older who have obesity",
    "Percent of adults who engage in no leisure-time physical activity",
    "Percent of adults who report consuming fruit less than one time daily",
    "Percent of adults who report consuming vegetables less than one time daily",
];

/// Questions where a higher value is favorable
pub const BEST_IS_MAX_QUESTIONS: [&str; 4] = [
    "Percent of adults who achieve at least 150 minutes a week of moderate-intensity aerobic physical activity or 75 minutes a week of vigorous-intensity aerobic activity (or an equivalent combination)",
    "Percent of adults who achieve at least 150 minutes a week of moderate-intensity aerobic physical activity or 75 minutes a week of vigorous-intensity aerobic physical activity and engage in muscle-strengthening activities on 2 or more days a week",
    "Percent of adults who achieve at least 300 minutes a week of moderate-intensity aerobic physical activity or 150 minutes a week of vigorous-intensity aerobic activity (or an equivalent combination)",
    "Percent of adults who engage in muscle-strengthening activities on 2 or more days a week",
];

/// Fixed classification of a survey question, deciding sort direction for
/// the best5/worst5 aggregations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionClassification {
    BestIsMax,
    BestIsMin,
}

/// All questions the dataset index is seeded with, best-is-max first
pub fn known_questions() -> impl Iterator<Item = &'static str> {
    BEST_IS_MAX_QUESTIONS
        .iter()
        .chain(BEST_IS_MIN_QUESTIONS.iter())
        .copied()
}

/// Survey question name - the top-level dataset partition key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuestionName(String);

impl QuestionName {
    /// Create a new question name
    pub fn new<S: Into<String>>(name: S) -> StatsResult<Self> {
        let name = name.into();

        if name.is_empty() {
            return Err(StatsError::validation("Question name cannot be empty"));
        }

        Ok(Self(name))
    }

    /// Create without validation (for internal use)
    pub(crate) fn new_unchecked<S: Into<String>>(name: S) -> Self {
        Self(name.into())
    }

    /// Get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Classification of this question, if it is one of the fixed survey
    /// questions
    pub fn classification(&self) -> Option<QuestionClassification> {
        if BEST_IS_MAX_QUESTIONS.contains(&self.0.as_str()) {
            Some(QuestionClassification::BestIsMax)
        } else if BEST_IS_MIN_QUESTIONS.contains(&self.0.as_str()) {
            Some(QuestionClassification::BestIsMin)
        } else {
            None
        }
    }

    /// Check membership in the best-is-max set
    pub fn is_best_is_max(&self) -> bool {
        self.classification() == Some(QuestionClassification::BestIsMax)
    }

    /// Check membership in the best-is-min set
    pub fn is_best_is_min(&self) -> bool {
        self.classification() == Some(QuestionClassification::BestIsMin)
    }
}

impl fmt::Display for QuestionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for QuestionName {
    fn from(s: &str) -> Self {
        Self::new_unchecked(s)
    }
}

impl From<String> for QuestionName {
    fn from(s: String) -> Self {
        Self::new_unchecked(s)
    }
}

impl AsRef<str> for QuestionName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for QuestionName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for QuestionName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for QuestionName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// State name as it appears in the `LocationDesc` dataset column
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateName(String);

impl StateName {
    /// Create a new state name
    pub fn new<S: Into<String>>(name: S) -> StatsResult<Self> {
        let name = name.into();

        if name.is_empty() {
            return Err(StatsError::validation("State name cannot be empty"));
        }

        Ok(Self(name))
    }

    /// Create without validation (for internal use)
    pub(crate) fn new_unchecked<S: Into<String>>(name: S) -> Self {
        Self(name.into())
    }

    /// Get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StateName {
    fn from(s: &str) -> Self {
        Self::new_unchecked(s)
    }
}

impl From<String> for StateName {
    fn from(s: String) -> Self {
        Self::new_unchecked(s)
    }
}

impl AsRef<str> for StateName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for StateName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for StateName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for StateName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}
