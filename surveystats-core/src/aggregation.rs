//! Aggregation task library
//!
//! Pure functions over the dataset index, one per task kind, plus the
//! enum dispatch used by workers. Outputs carry structured keys and an
//! explicit entry order; the string rendering of composite keys happens
//! only when a result is serialized.

use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::HashMap;
use std::fmt;

use crate::dataset::DatasetIndex;
use crate::error::{StatsError, StatsResult};
use crate::question::{StateName, BEST_IS_MAX_QUESTIONS, BEST_IS_MIN_QUESTIONS};
use crate::record::Record;
use crate::task::{TaskKind, TaskRequest};

/// How many states best5/worst5 keep
const TOP_STATES: usize = 5;

/// Composite key for category-grouped results across states
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub state: StateName,
    pub category: String,
    pub value: String,
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {})",
            py_repr(self.state.as_str()),
            py_repr(&self.category),
            py_repr(&self.value)
        )
    }
}

/// Composite key for category-grouped results within one state
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CategoryKey {
    pub category: String,
    pub value: String,
}

impl fmt::Display for CategoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", py_repr(&self.category), py_repr(&self.value))
    }
}

/// Result of one aggregation task.
///
/// Entry order is part of the contract; serialization emits map keys in
/// exactly the order stored here.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutput {
    /// Ordered per-state values (means or diffs)
    StateMeans(Vec<(StateName, f64)>),

    /// The single global mean
    Global(f64),

    /// Ordered per-(state, category, value) means
    GroupedMeans(Vec<(GroupKey, f64)>),

    /// Per-(category, value) means nested under one state
    StateGroupedMeans {
        state: StateName,
        groups: Vec<(CategoryKey, f64)>,
    },
}

impl TaskOutput {
    /// Number of top-level or nested entries, for logging
    pub fn entry_count(&self) -> usize {
        match self {
            TaskOutput::StateMeans(pairs) => pairs.len(),
            TaskOutput::Global(_) => 1,
            TaskOutput::GroupedMeans(groups) => groups.len(),
            TaskOutput::StateGroupedMeans { groups, .. } => groups.len(),
        }
    }
}

impl Serialize for TaskOutput {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TaskOutput::StateMeans(pairs) => {
                let mut map = serializer.serialize_map(Some(pairs.len()))?;
                for (state, value) in pairs {
                    map.serialize_entry(state.as_str(), value)?;
                }
                map.end()
            }
            TaskOutput::Global(value) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("global_mean", value)?;
                map.end()
            }
            TaskOutput::GroupedMeans(groups) => {
                let mut map = serializer.serialize_map(Some(groups.len()))?;
                for (key, value) in groups {
                    map.serialize_entry(&key.to_string(), value)?;
                }
                map.end()
            }
            TaskOutput::StateGroupedMeans { state, groups } => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(state.as_str(), &CategoryMeans(groups))?;
                map.end()
            }
        }
    }
}

struct CategoryMeans<'a>(&'a [(CategoryKey, f64)]);

impl Serialize for CategoryMeans<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in self.0 {
            map.serialize_entry(&key.to_string(), value)?;
        }
        map.end()
    }
}

/// Run the task described by a validated request
pub fn execute(index: &DatasetIndex, request: &TaskRequest) -> StatsResult<TaskOutput> {
    let question = request.question.as_str();
    match request.kind {
        TaskKind::StatesMean => states_mean(index, question),
        TaskKind::StateMean => state_mean(index, question, required_state(request)?),
        TaskKind::Best5 => best5(index, question),
        TaskKind::Worst5 => worst5(index, question),
        TaskKind::GlobalMean => global_mean(index, question),
        TaskKind::DiffFromMean => diff_from_mean(index, question),
        TaskKind::StateDiffFromMean => {
            state_diff_from_mean(index, question, required_state(request)?)
        }
        TaskKind::MeanByCategory => mean_by_category(index, question),
        TaskKind::StateMeanByCategory => {
            state_mean_by_category(index, question, required_state(request)?)
        }
    }
}

fn required_state(request: &TaskRequest) -> StatsResult<&str> {
    request
        .state
        .as_ref()
        .map(StateName::as_str)
        .ok_or_else(|| StatsError::execution("State not provided"))
}

/// Mean value per state, sorted ascending by mean
pub fn states_mean(index: &DatasetIndex, question: &str) -> StatsResult<TaskOutput> {
    Ok(TaskOutput::StateMeans(sorted_state_means(index, question)?))
}

/// Mean value for one state
pub fn state_mean(index: &DatasetIndex, question: &str, state: &str) -> StatsResult<TaskOutput> {
    let records = lookup_state(index, question, state)?;
    let mean = mean_of_records(records)?;
    Ok(TaskOutput::StateMeans(vec![(StateName::from(state), mean)]))
}

/// The five most favorable states for the question
pub fn best5(index: &DatasetIndex, question: &str) -> StatsResult<TaskOutput> {
    let mut means = state_means(index, question)?;
    sort_by_mean(&mut means, BEST_IS_MAX_QUESTIONS.contains(&question));
    means.truncate(TOP_STATES);
    Ok(TaskOutput::StateMeans(means))
}

/// The five least favorable states for the question
pub fn worst5(index: &DatasetIndex, question: &str) -> StatsResult<TaskOutput> {
    let mut means = state_means(index, question)?;
    sort_by_mean(&mut means, BEST_IS_MIN_QUESTIONS.contains(&question));
    means.truncate(TOP_STATES);
    Ok(TaskOutput::StateMeans(means))
}

/// Mean over every record across all states
pub fn global_mean(index: &DatasetIndex, question: &str) -> StatsResult<TaskOutput> {
    Ok(TaskOutput::Global(global_mean_value(index, question)?))
}

/// Global mean minus each state's mean, in states_mean order
pub fn diff_from_mean(index: &DatasetIndex, question: &str) -> StatsResult<TaskOutput> {
    let means = sorted_state_means(index, question)?;
    if means.is_empty() {
        return Ok(TaskOutput::StateMeans(means));
    }

    let global = global_mean_value(index, question)?;
    let diffs = means
        .into_iter()
        .map(|(state, mean)| (state, global - mean))
        .collect();
    Ok(TaskOutput::StateMeans(diffs))
}

/// Global mean minus one state's mean
pub fn state_diff_from_mean(
    index: &DatasetIndex,
    question: &str,
    state: &str,
) -> StatsResult<TaskOutput> {
    let records = lookup_state(index, question, state)?;
    let state_mean = mean_of_records(records)?;
    let global = global_mean_value(index, question)?;
    Ok(TaskOutput::StateMeans(vec![(
        StateName::from(state),
        global - state_mean,
    )]))
}

/// Mean per (state, category, category value) group, for every state
pub fn mean_by_category(index: &DatasetIndex, question: &str) -> StatsResult<TaskOutput> {
    let states = lookup_question(index, question)?;

    let mut groups: HashMap<GroupKey, Vec<f64>> = HashMap::new();
    for (state, records) in states.iter() {
        for record in records {
            if !record.has_category() {
                continue;
            }
            let key = GroupKey {
                state: state.clone(),
                category: record.stratification_category.clone(),
                value: record.stratification_value.clone(),
            };
            groups.entry(key).or_default().push(record.data_value);
        }
    }

    let mut means = Vec::with_capacity(groups.len());
    for (key, values) in groups {
        let mean = mean_of(values.iter().copied())?;
        means.push((key, mean));
    }
    means.sort_by(|a, b| {
        a.0.state
            .as_str()
            .cmp(b.0.state.as_str())
            .then_with(|| a.0.category.cmp(&b.0.category))
            .then_with(|| a.0.value.cmp(&b.0.value))
    });

    Ok(TaskOutput::GroupedMeans(means))
}

/// Mean per (category, category value) group within one state
pub fn state_mean_by_category(
    index: &DatasetIndex,
    question: &str,
    state: &str,
) -> StatsResult<TaskOutput> {
    let records = lookup_state(index, question, state)?;

    let mut groups: HashMap<CategoryKey, Vec<f64>> = HashMap::new();
    for record in records {
        if !record.has_category() {
            continue;
        }
        let key = CategoryKey {
            category: record.stratification_category.clone(),
            value: record.stratification_value.clone(),
        };
        groups.entry(key).or_default().push(record.data_value);
    }

    let mut means = Vec::with_capacity(groups.len());
    for (key, values) in groups {
        let mean = mean_of(values.iter().copied())?;
        means.push((key, mean));
    }
    means.sort_by(|a, b| {
        a.0.category
            .cmp(&b.0.category)
            .then_with(|| a.0.value.cmp(&b.0.value))
    });

    Ok(TaskOutput::StateGroupedMeans {
        state: StateName::from(state),
        groups: means,
    })
}

fn lookup_question<'a>(
    index: &'a DatasetIndex,
    question: &str,
) -> StatsResult<&'a crate::dataset::StateRecords> {
    index
        .states(question)
        .ok_or_else(|| StatsError::execution("Invalid question"))
}

fn lookup_state<'a>(
    index: &'a DatasetIndex,
    question: &str,
    state: &str,
) -> StatsResult<&'a [Record]> {
    lookup_question(index, question)?
        .get(state)
        .ok_or_else(|| StatsError::execution("Invalid state"))
}

/// Per-state means in index iteration order
fn state_means(index: &DatasetIndex, question: &str) -> StatsResult<Vec<(StateName, f64)>> {
    let states = lookup_question(index, question)?;
    let mut means = Vec::with_capacity(states.len());
    for (state, records) in states.iter() {
        means.push((state.clone(), mean_of_records(records)?));
    }
    Ok(means)
}

/// Per-state means sorted ascending by mean; ties keep index order
fn sorted_state_means(index: &DatasetIndex, question: &str) -> StatsResult<Vec<(StateName, f64)>> {
    let mut means = state_means(index, question)?;
    sort_by_mean(&mut means, false);
    Ok(means)
}

fn sort_by_mean(means: &mut [(StateName, f64)], descending: bool) {
    if descending {
        means.sort_by(|a, b| b.1.total_cmp(&a.1));
    } else {
        means.sort_by(|a, b| a.1.total_cmp(&b.1));
    }
}

fn global_mean_value(index: &DatasetIndex, question: &str) -> StatsResult<f64> {
    let states = lookup_question(index, question)?;
    mean_of(
        states
            .iter()
            .flat_map(|(_, records)| records.iter().map(|r| r.data_value)),
    )
}

fn mean_of_records(records: &[Record]) -> StatsResult<f64> {
    mean_of(records.iter().map(|r| r.data_value))
}

/// Arithmetic mean; an empty input is an internal error so NaN can never
/// reach a result payload
fn mean_of(values: impl Iterator<Item = f64>) -> StatsResult<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for value in values {
        sum += value;
        count += 1;
    }

    if count == 0 {
        return Err(StatsError::internal("Mean of an empty value sequence"));
    }
    Ok(sum / count as f64)
}

/// Render a string the way Python's repr() does inside a tuple, since the
/// reference artifacts carry keys in that exact format
fn py_repr(s: &str) -> String {
    let has_single = s.contains('\'');
    let has_double = s.contains('"');
    let (quote, escape_single) = if has_single && !has_double {
        ('"', false)
    } else {
        ('\'', has_single)
    };

    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' if escape_single => out.push_str("\\'"),
            _ => out.push(ch),
        }
    }
    out.push(quote);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::question::QuestionName;
    use crate::task::TaskSubmission;

    const PLAIN_QUESTION: &str = "Average commute time";

    fn record(state: &str, value: f64) -> Record {
        record_in_category(state, value, "", "")
    }

    fn record_in_category(state: &str, value: f64, category: &str, cat_value: &str) -> Record {
        Record {
            year_start: "2022".to_string(),
            year_end: "2022".to_string(),
            data_value: value,
            location_abbr: state.chars().take(2).collect::<String>().to_uppercase(),
            location_desc: state.to_string(),
            stratification_category: category.to_string(),
            stratification_value: cat_value.to_string(),
        }
    }

    fn index_of(question: &str, records: Vec<Record>) -> DatasetIndex {
        let mut index = DatasetIndex::new();
        for r in records {
            index.insert(QuestionName::from(question), r);
        }
        index
    }

    fn state_pairs(output: &TaskOutput) -> Vec<(&str, f64)> {
        match output {
            TaskOutput::StateMeans(pairs) => {
                pairs.iter().map(|(s, v)| (s.as_str(), *v)).collect()
            }
            other => panic!("expected StateMeans, got {other:?}"),
        }
    }

    #[test]
    fn test_states_mean_sorted_ascending() {
        let index = index_of(
            PLAIN_QUESTION,
            vec![
                record("Alpha", 10.0),
                record("Alpha", 20.0),
                record("Beta", 30.0),
            ],
        );

        let output = states_mean(&index, PLAIN_QUESTION).unwrap();
        assert_eq!(state_pairs(&output), vec![("Alpha", 15.0), ("Beta", 30.0)]);
    }

    #[test]
    fn test_states_mean_tie_keeps_ingestion_order() {
        let index = index_of(
            PLAIN_QUESTION,
            vec![
                record("Zeta", 12.0),
                record("Alpha", 12.0),
                record("Mid", 5.0),
            ],
        );

        let output = states_mean(&index, PLAIN_QUESTION).unwrap();
        assert_eq!(
            state_pairs(&output),
            vec![("Mid", 5.0), ("Zeta", 12.0), ("Alpha", 12.0)]
        );
    }

    #[test]
    fn test_state_mean_single_state() {
        let index = index_of(
            PLAIN_QUESTION,
            vec![record("Alpha", 10.0), record("Alpha", 20.0), record("Beta", 1.0)],
        );

        let output = state_mean(&index, PLAIN_QUESTION, "Alpha").unwrap();
        assert_eq!(state_pairs(&output), vec![("Alpha", 15.0)]);
    }

    #[test]
    fn test_best5_descending_for_best_is_max_question() {
        let question = BEST_IS_MAX_QUESTIONS[0];
        let index = index_of(
            question,
            vec![
                record("A", 1.0),
                record("B", 2.0),
                record("C", 3.0),
                record("D", 4.0),
                record("E", 5.0),
                record("F", 6.0),
            ],
        );

        let output = best5(&index, question).unwrap();
        assert_eq!(
            state_pairs(&output),
            vec![("F", 6.0), ("E", 5.0), ("D", 4.0), ("C", 3.0), ("B", 2.0)]
        );
    }

    #[test]
    fn test_best5_ascending_for_best_is_min_question() {
        let question = BEST_IS_MIN_QUESTIONS[0];
        let index = index_of(
            question,
            vec![record("A", 3.0), record("B", 1.0), record("C", 2.0)],
        );

        let output = best5(&index, question).unwrap();
        assert_eq!(
            state_pairs(&output),
            vec![("B", 1.0), ("C", 2.0), ("A", 3.0)]
        );
    }

    #[test]
    fn test_worst5_descending_for_best_is_min_question() {
        let question = BEST_IS_MIN_QUESTIONS[0];
        let index = index_of(
            question,
            vec![record("A", 3.0), record("B", 1.0), record("C", 2.0)],
        );

        let output = worst5(&index, question).unwrap();
        assert_eq!(
            state_pairs(&output),
            vec![("A", 3.0), ("C", 2.0), ("B", 1.0)]
        );
    }

    #[test]
    fn test_worst5_ascending_for_best_is_max_question() {
        let question = BEST_IS_MAX_QUESTIONS[0];
        let index = index_of(
            question,
            vec![record("A", 3.0), record("B", 1.0), record("C", 2.0)],
        );

        let output = worst5(&index, question).unwrap();
        assert_eq!(
            state_pairs(&output),
            vec![("B", 1.0), ("C", 2.0), ("A", 3.0)]
        );
    }

    #[test]
    fn test_top5_cap() {
        let question = PLAIN_QUESTION;
        let records = (0..8)
            .map(|i| record(&format!("State{i}"), i as f64))
            .collect();
        let index = index_of(question, records);

        let best = best5(&index, question).unwrap();
        let worst = worst5(&index, question).unwrap();
        assert_eq!(best.entry_count(), 5);
        assert_eq!(worst.entry_count(), 5);
    }

    #[test]
    fn test_global_mean_over_all_records() {
        let index = index_of(
            PLAIN_QUESTION,
            vec![
                record("Alpha", 10.0),
                record("Alpha", 20.0),
                record("Beta", 30.0),
            ],
        );

        let output = global_mean(&index, PLAIN_QUESTION).unwrap();
        assert_eq!(output, TaskOutput::Global(20.0));
    }

    #[test]
    fn test_diff_from_mean_matches_states_mean_exactly() {
        let index = index_of(
            PLAIN_QUESTION,
            vec![
                record("Alpha", 10.0),
                record("Alpha", 20.0),
                record("Beta", 30.0),
            ],
        );

        let output = diff_from_mean(&index, PLAIN_QUESTION).unwrap();
        assert_eq!(state_pairs(&output), vec![("Alpha", 5.0), ("Beta", -10.0)]);
    }

    #[test]
    fn test_diff_from_mean_order_follows_sorted_means() {
        let index = index_of(
            PLAIN_QUESTION,
            vec![record("High", 40.0), record("Low", 10.0), record("Mid", 25.0)],
        );

        let output = diff_from_mean(&index, PLAIN_QUESTION).unwrap();
        let states: Vec<&str> = state_pairs(&output).iter().map(|(s, _)| *s).collect();
        assert_eq!(states, vec!["Low", "Mid", "High"]);
    }

    #[test]
    fn test_state_diff_from_mean() {
        let index = index_of(
            PLAIN_QUESTION,
            vec![
                record("Alpha", 10.0),
                record("Alpha", 20.0),
                record("Beta", 30.0),
            ],
        );

        let output = state_diff_from_mean(&index, PLAIN_QUESTION, "Beta").unwrap();
        assert_eq!(state_pairs(&output), vec![("Beta", -10.0)]);
    }

    #[test]
    fn test_mean_by_category_grouping_and_order() {
        let index = index_of(
            PLAIN_QUESTION,
            vec![
                record_in_category("Beta", 10.0, "Gender", "Male"),
                record_in_category("Alpha", 20.0, "Gender", "Female"),
                record_in_category("Alpha", 30.0, "Gender", "Female"),
                record_in_category("Alpha", 5.0, "Age (years)", "18 - 24"),
                record("Alpha", 99.0),
            ],
        );

        let output = mean_by_category(&index, PLAIN_QUESTION).unwrap();
        let TaskOutput::GroupedMeans(groups) = &output else {
            panic!("expected GroupedMeans");
        };

        let keys: Vec<String> = groups.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(
            keys,
            vec![
                "('Alpha', 'Age (years)', '18 - 24')",
                "('Alpha', 'Gender', 'Female')",
                "('Beta', 'Gender', 'Male')",
            ]
        );
        assert_eq!(groups[1].1, 25.0);
    }

    #[test]
    fn test_state_mean_by_category_nested_shape() {
        let index = index_of(
            PLAIN_QUESTION,
            vec![
                record_in_category("Alpha", 20.0, "Gender", "Female"),
                record_in_category("Alpha", 30.0, "Gender", "Female"),
                record_in_category("Alpha", 12.0, "Gender", "Male"),
                record_in_category("Beta", 50.0, "Gender", "Male"),
                record("Alpha", 99.0),
            ],
        );

        let output = state_mean_by_category(&index, PLAIN_QUESTION, "Alpha").unwrap();
        let json = serde_json::to_string(&output).unwrap();
        assert_eq!(
            json,
            "{\"Alpha\":{\"('Gender', 'Female')\":25.0,\"('Gender', 'Male')\":12.0}}"
        );
    }

    #[test]
    fn test_serialized_state_means_preserve_order() {
        let output = TaskOutput::StateMeans(vec![
            (StateName::from("Zeta"), 1.5),
            (StateName::from("Alpha"), 2.5),
        ]);
        let json = serde_json::to_string(&output).unwrap();
        assert_eq!(json, "{\"Zeta\":1.5,\"Alpha\":2.5}");
    }

    #[test]
    fn test_global_mean_serialized_shape() {
        let json = serde_json::to_string(&TaskOutput::Global(20.0)).unwrap();
        assert_eq!(json, "{\"global_mean\":20.0}");
    }

    #[test]
    fn test_missing_state_is_an_execution_error() {
        let index = index_of(PLAIN_QUESTION, vec![record("Alpha", 10.0)]);
        let request = TaskRequest::from_submission(
            TaskKind::StateMean,
            TaskSubmission {
                question: Some(PLAIN_QUESTION.to_string()),
                state: None,
            },
            &index,
        )
        .unwrap();

        let err = execute(&index, &request).unwrap_err();
        assert_eq!(err.public_reason(), "State not provided");
        assert_eq!(err.category(), "execution");
    }

    #[test]
    fn test_unknown_state_is_an_execution_error() {
        let index = index_of(PLAIN_QUESTION, vec![record("Alpha", 10.0)]);
        let err = state_mean(&index, PLAIN_QUESTION, "Atlantis").unwrap_err();
        assert_eq!(err.public_reason(), "Invalid state");
    }

    #[test]
    fn test_execute_dispatches_every_kind() {
        let index = index_of(
            BEST_IS_MIN_QUESTIONS[0],
            vec![
                record_in_category("Alpha", 10.0, "Total", "Total"),
                record_in_category("Beta", 20.0, "Total", "Total"),
            ],
        );

        for kind in TaskKind::ALL {
            let request = TaskRequest::from_submission(
                kind,
                TaskSubmission {
                    question: Some(BEST_IS_MIN_QUESTIONS[0].to_string()),
                    state: Some("Alpha".to_string()),
                },
                &index,
            )
            .unwrap();
            let output = execute(&index, &request).unwrap();
            assert!(output.entry_count() >= 1, "{kind} produced no entries");
        }
    }

    #[test]
    fn test_py_repr_quoting() {
        assert_eq!(py_repr("Male"), "'Male'");
        assert_eq!(
            py_repr("Bachelor's degree or higher"),
            "\"Bachelor's degree or higher\""
        );
        assert_eq!(py_repr("say \"hi\""), "'say \"hi\"'");
        assert_eq!(
            GroupKey {
                state: StateName::from("Connecticut"),
                category: "Race/Ethnicity".to_string(),
                value: "Non-Hispanic White".to_string(),
            }
            .to_string(),
            "('Connecticut', 'Race/Ethnicity', 'Non-Hispanic White')"
        );
    }

    #[test]
    fn test_empty_question_yields_empty_maps_not_nan() {
        let index = DatasetIndex::new();
        let question = BEST_IS_MIN_QUESTIONS[0];

        let output = states_mean(&index, question).unwrap();
        assert_eq!(output.entry_count(), 0);
        let output = diff_from_mean(&index, question).unwrap();
        assert_eq!(output.entry_count(), 0);
        assert!(global_mean(&index, question).is_err());
    }
}
