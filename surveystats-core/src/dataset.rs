//! In-memory dataset index built from the survey CSV export
//!
//! The index maps `question -> state -> ordered records` and is built once
//! at startup. After construction it is shared read-only; nothing mutates
//! it while the service runs.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord};
use tracing::{info, warn};

use crate::error::{StatsError, StatsResult};
use crate::question::{known_questions, QuestionName, StateName};
use crate::record::Record;

/// Records for one question, grouped per state.
///
/// State iteration order is first-appearance order in the source data, so
/// stable sorts over equal means keep the ingestion order.
#[derive(Debug, Default)]
pub struct StateRecords {
    order: Vec<StateName>,
    records: HashMap<StateName, Vec<Record>>,
}

impl StateRecords {
    fn push(&mut self, record: Record) {
        let state = record.state();
        match self.records.get_mut(&state) {
            Some(existing) => existing.push(record),
            None => {
                self.order.push(state.clone());
                self.records.insert(state, vec![record]);
            }
        }
    }

    /// Records for one state, if any were ingested
    pub fn get(&self, state: &str) -> Option<&[Record]> {
        self.records.get(state).map(|records| records.as_slice())
    }

    /// Iterate states in first-appearance order with their records
    pub fn iter(&self) -> impl Iterator<Item = (&StateName, &[Record])> {
        self.order
            .iter()
            .filter_map(|state| self.records.get(state).map(|r| (state, r.as_slice())))
    }

    /// Number of states present
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether no state has records
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Counters describing one ingestion run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestStats {
    pub rows_total: usize,
    pub rows_ingested: usize,
    pub rows_missing_value: usize,
    pub rows_unknown_question: usize,
    pub rows_malformed: usize,
}

/// Immutable mapping from question to per-state observation records
#[derive(Debug, Default)]
pub struct DatasetIndex {
    data: HashMap<QuestionName, StateRecords>,
    record_count: usize,
}

impl DatasetIndex {
    /// Create an index seeded with an empty entry per classified question
    pub fn new() -> Self {
        let mut data = HashMap::new();
        for question in known_questions() {
            data.insert(QuestionName::from(question), StateRecords::default());
        }
        Self {
            data,
            record_count: 0,
        }
    }

    /// Insert a record under a question, creating the question entry if
    /// needed. Only used while building the index.
    pub fn insert(&mut self, question: QuestionName, record: Record) {
        self.data.entry(question).or_default().push(record);
        self.record_count += 1;
    }

    /// Build the index from a CSV file on disk
    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> StatsResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let index = Self::from_csv_str(&text)?;
        info!(
            path = %path.display(),
            questions = index.question_count(),
            records = index.record_count(),
            "Dataset index built"
        );
        Ok(index)
    }

    /// Build the index from CSV text
    pub fn from_csv_str(text: &str) -> StatsResult<Self> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        // Flexible so short rows are counted and skipped instead of
        // aborting the whole ingestion
        let mut reader = ReaderBuilder::new()
            .flexible(true)
            .from_reader(text.as_bytes());

        let headers = reader.headers()?.clone();
        let columns = Columns::locate(&headers)?;

        let mut index = Self::new();
        let mut stats = IngestStats::default();

        for result in reader.records() {
            let row = result?;
            if row.iter().all(|field| field.is_empty()) {
                continue;
            }
            stats.rows_total += 1;

            if row.len() <= columns.max_index() {
                stats.rows_malformed += 1;
                continue;
            }
            let question = &row[columns.question];

            let Ok(data_value) = row[columns.data_value].parse::<f64>() else {
                stats.rows_missing_value += 1;
                continue;
            };

            if !index.data.contains_key(question) {
                stats.rows_unknown_question += 1;
                continue;
            }

            let record = Record {
                year_start: row[columns.year_start].to_string(),
                year_end: row[columns.year_end].to_string(),
                data_value,
                location_abbr: row[columns.location_abbr].to_string(),
                location_desc: row[columns.location_desc].to_string(),
                stratification_category: row[columns.stratification_category].to_string(),
                stratification_value: row[columns.stratification_value].to_string(),
            };

            index.insert(QuestionName::from(question), record);
            stats.rows_ingested += 1;
        }

        if stats.rows_missing_value > 0 || stats.rows_unknown_question > 0 {
            warn!(
                missing_value = stats.rows_missing_value,
                unknown_question = stats.rows_unknown_question,
                malformed = stats.rows_malformed,
                "Skipped rows during dataset ingestion"
            );
        }

        Ok(index)
    }

    /// Whether a question exists in the index
    pub fn contains_question(&self, question: &str) -> bool {
        self.data.contains_key(question)
    }

    /// Per-state records for one question
    pub fn states(&self, question: &str) -> Option<&StateRecords> {
        self.data.get(question)
    }

    /// Records for one question/state pair
    pub fn records(&self, question: &str, state: &str) -> Option<&[Record]> {
        self.data.get(question).and_then(|states| states.get(state))
    }

    /// Iterate all questions in the index
    pub fn questions(&self) -> impl Iterator<Item = &QuestionName> {
        self.data.keys()
    }

    /// Number of questions in the index
    pub fn question_count(&self) -> usize {
        self.data.len()
    }

    /// Number of distinct states across all questions
    pub fn state_count(&self) -> usize {
        let mut states: HashSet<&str> = HashSet::new();
        for table in self.data.values() {
            for (state, _) in table.iter() {
                states.insert(state.as_str());
            }
        }
        states.len()
    }

    /// Total number of ingested records
    pub fn record_count(&self) -> usize {
        self.record_count
    }
}

/// Positions of the columns the index needs, resolved from the header row
struct Columns {
    question: usize,
    year_start: usize,
    year_end: usize,
    data_value: usize,
    location_abbr: usize,
    location_desc: usize,
    stratification_category: usize,
    stratification_value: usize,
}

impl Columns {
    fn locate(header: &StringRecord) -> StatsResult<Self> {
        let find = |name: &str| -> StatsResult<usize> {
            header.iter().position(|h| h == name).ok_or_else(|| {
                StatsError::ingest(format!("Missing column '{name}' in dataset header"))
            })
        };

        Ok(Self {
            question: find("Question")?,
            year_start: find("YearStart")?,
            year_end: find("YearEnd")?,
            data_value: find("Data_Value")?,
            location_abbr: find("LocationAbbr")?,
            location_desc: find("LocationDesc")?,
            stratification_category: find("StratificationCategory1")?,
            stratification_value: find("Stratification1")?,
        })
    }

    fn max_index(&self) -> usize {
        [
            self.question,
            self.year_start,
            self.year_end,
            self.data_value,
            self.location_abbr,
            self.location_desc,
            self.stratification_category,
            self.stratification_value,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}
