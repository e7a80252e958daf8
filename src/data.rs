use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

// Type aliases for clarity
pub type StudentId = String;
pub type SessionId = String;
pub type Subject = String;
pub type Day = String;
pub type Hour = u32;
pub type Rank = u32;

/// An atomic (day, hour) unit of time used to detect schedule conflicts.
pub type Slot = (Day, Hour);

/// Preference ranks per subject; lower rank means more preferred.
pub type Preferences = BTreeMap<Subject, Rank>;
pub type Roster = BTreeMap<StudentId, Preferences>;
pub type Catalog = BTreeMap<SessionId, Session>;

/// A scheduled offering of a subject.
///
/// The catalog is fixed before model construction; ordered maps keep the
/// constraint generation order stable across runs.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub subject: Subject,
    pub day: Day,
    pub start: Hour,
    pub duration: Hour,
    pub capacity: u32,
}

impl Session {
    /// The slots this session occupies: (day, start + i) for each hour of its duration.
    pub fn slots(&self) -> impl Iterator<Item = Slot> + '_ {
        (0..self.duration).map(|i| (self.day.clone(), self.start + i))
    }
}

/// The complete input for one assignment run.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentInput {
    pub students: Roster,
    pub sessions: Catalog,
    pub required_hours: Hour,
}

/// The sessions one student ended up with, plus their summary statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSchedule {
    pub student: StudentId,
    pub sessions: Vec<SessionId>,
    pub subjects: Vec<Subject>,
    pub preference_cost: u32,
    pub hours: Hour,
}

impl fmt::Display for StudentSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {:?} | Subjects: {:?} | Total pref = {}, Hours = {}",
            self.student, self.sessions, self.subjects, self.preference_cost, self.hours
        )
    }
}

/// Structured result of an optimal solve; text rendering is layered on top.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentOutput {
    pub schedules: Vec<StudentSchedule>,
    pub total_cost: u32,
}

impl fmt::Display for AssignmentOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Assignment results:")?;
        for schedule in &self.schedules {
            writeln!(f, "{schedule}")?;
        }
        write!(f, "Total preference cost = {}", self.total_cost)
    }
}

/// Top-level run configuration, read from a JSON file.
///
/// `value_cells` and `label_cells` are parallel lists of A1-style references
/// into each preference sheet; the first pair is the student identity field.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    pub preferences_dir: PathBuf,
    pub value_cells: Vec<String>,
    pub label_cells: Vec<String>,
    pub required_hours: Hour,
    pub sessions: Catalog,
}

impl RunConfig {
    /// Reads and validates a run configuration.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: RunConfig =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.required_hours == 0 {
            return Err(ConfigError::ZeroHours);
        }
        for (id, session) in &self.sessions {
            if session.duration == 0 {
                return Err(ConfigError::ZeroDuration { id: id.clone() });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("valueCells has {values} entries but labelCells has {labels}; the lists must be parallel")]
    CellListMismatch { values: usize, labels: usize },
    #[error("at least one value/label cell pair (the identity field) is required")]
    NoCells,
    #[error("invalid cell reference {cell:?}: expected column letters followed by a row number")]
    BadCellRef { cell: String },
    #[error("requiredHours must be positive")]
    ZeroHours,
    #[error("session {id}: duration must be positive")]
    ZeroDuration { id: SessionId },
}
