use crate::data::{ConfigError, Preferences, Rank, Roster, StudentId};
use calamine::{Data, Range, Reader, Xlsx, open_workbook};
use log::{debug, info, warn};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A zero-based (row, column) cell position, parsed from an A1-style
/// reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRef {
    row: u32,
    col: u32,
}

impl CellRef {
    /// Parses "B4" into row 3, column 1.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let bad = || ConfigError::BadCellRef {
            cell: text.to_string(),
        };
        let trimmed = text.trim();
        let split = trimmed
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(bad)?;
        let (letters, digits) = trimmed.split_at(split);
        if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(bad());
        }
        let row: u32 = digits.parse().map_err(|_| bad())?;
        if row == 0 {
            return Err(bad());
        }
        let mut col: u32 = 0;
        for c in letters.chars() {
            col = col * 26 + (c.to_ascii_uppercase() as u32 - 'A' as u32 + 1);
        }
        Ok(CellRef {
            row: row - 1,
            col: col - 1,
        })
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut col = self.col + 1;
        let mut letters = String::new();
        while col > 0 {
            let rem = ((col - 1) % 26) as u8;
            letters.insert(0, (b'A' + rem) as char);
            col = (col - 1) / 26;
        }
        write!(f, "{}{}", letters, self.row + 1)
    }
}

/// Cell layout shared by every preference sheet. The identity field names the
/// student; the remaining (value, label) pairs carry one rank each, with the
/// label cell holding the subject name.
#[derive(Debug, Clone)]
pub struct SheetLayout {
    identity: CellRef,
    pairs: Vec<(CellRef, CellRef)>,
}

impl SheetLayout {
    pub fn new(value_cells: &[String], label_cells: &[String]) -> Result<Self, ConfigError> {
        if value_cells.len() != label_cells.len() {
            return Err(ConfigError::CellListMismatch {
                values: value_cells.len(),
                labels: label_cells.len(),
            });
        }
        if value_cells.is_empty() {
            return Err(ConfigError::NoCells);
        }
        let values: Vec<CellRef> = value_cells
            .iter()
            .map(|cell| CellRef::parse(cell))
            .collect::<Result<_, _>>()?;
        let labels: Vec<CellRef> = label_cells
            .iter()
            .map(|cell| CellRef::parse(cell))
            .collect::<Result<_, _>>()?;
        let pairs = values[1..]
            .iter()
            .copied()
            .zip(labels[1..].iter().copied())
            .collect();
        Ok(SheetLayout {
            identity: values[0],
            pairs,
        })
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot scan preference directory {path}: {source}")]
    Dir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot open workbook: {0}")]
    Workbook(#[from] calamine::XlsxError),
    #[error("workbook contains no worksheets")]
    NoWorksheet,
    #[error("label cell {label} is empty but value cell {value} holds a preference")]
    MissingLabel { label: String, value: String },
    #[error("value cell {cell} holds {value:?}; preference ranks must be positive integers")]
    BadRank { cell: String, value: String },
}

/// One file that could not be loaded; the batch carries on without it.
#[derive(Debug)]
pub struct LoadFailure {
    pub file: PathBuf,
    pub error: LoadError,
}

/// Every successfully parsed student, plus the per-file failures.
#[derive(Debug)]
pub struct LoadOutcome {
    pub roster: Roster,
    pub failures: Vec<LoadFailure>,
}

/// Reads every `*.xlsx` sheet in `dir` into a preference roster.
///
/// Files are visited in name order. A file with an empty identity cell is
/// skipped; a file that fails to parse is recorded and the batch continues.
pub fn load_roster(dir: &Path, layout: &SheetLayout) -> Result<LoadOutcome, LoadError> {
    let entries = fs::read_dir(dir).map_err(|source| LoadError::Dir {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("xlsx"))
        })
        .collect();
    paths.sort();
    info!(
        "Reading {} preference sheets from {}",
        paths.len(),
        dir.display()
    );

    let mut roster = Roster::new();
    let mut failures = Vec::new();
    for path in paths {
        match read_student(&path, layout) {
            Ok(Some((student, preferences))) => {
                debug!(
                    "{}: {} with {} preferences",
                    path.display(),
                    student,
                    preferences.len()
                );
                if roster.insert(student.clone(), preferences).is_some() {
                    warn!(
                        "duplicate student {student:?} in {}; keeping the later file",
                        path.display()
                    );
                }
            }
            Ok(None) => warn!("{}: identity cell is empty, skipping file", path.display()),
            Err(error) => failures.push(LoadFailure { file: path, error }),
        }
    }
    Ok(LoadOutcome { roster, failures })
}

fn read_student(
    path: &Path,
    layout: &SheetLayout,
) -> Result<Option<(StudentId, Preferences)>, LoadError> {
    let mut workbook: Xlsx<_> = open_workbook(path)?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or(LoadError::NoWorksheet)??;
    extract_student(&range, layout)
}

/// Pulls one student out of a sheet grid. Returns `None` when the identity
/// cell is empty; an empty value cell just omits that subject (no preference
/// recorded).
fn extract_student(
    range: &Range<Data>,
    layout: &SheetLayout,
) -> Result<Option<(StudentId, Preferences)>, LoadError> {
    let Some(student) = cell_text(range, layout.identity) else {
        return Ok(None);
    };
    let mut preferences = Preferences::new();
    for &(value_ref, label_ref) in &layout.pairs {
        let Some(raw) = range
            .get_value((value_ref.row, value_ref.col))
            .filter(|data| !is_blank(data))
        else {
            continue;
        };
        let label = cell_text(range, label_ref).ok_or_else(|| LoadError::MissingLabel {
            label: label_ref.to_string(),
            value: value_ref.to_string(),
        })?;
        let rank = parse_rank(raw).ok_or_else(|| LoadError::BadRank {
            cell: value_ref.to_string(),
            value: raw.to_string(),
        })?;
        preferences.insert(label, rank);
    }
    Ok(Some((student, preferences)))
}

fn is_blank(data: &Data) -> bool {
    match data {
        Data::Empty | Data::Error(_) => true,
        Data::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn cell_text(range: &Range<Data>, cell: CellRef) -> Option<String> {
    let data = range.get_value((cell.row, cell.col))?;
    match data {
        Data::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Data::Int(i) => Some(i.to_string()),
        Data::Float(f) => Some(f.to_string()),
        Data::Bool(b) => Some(b.to_string()),
        Data::DateTime(dt) => Some(dt.as_f64().to_string()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Some(s.clone()),
        Data::Empty | Data::Error(_) => None,
    }
}

fn parse_rank(data: &Data) -> Option<Rank> {
    match data {
        Data::Int(i) if *i > 0 => u32::try_from(*i).ok(),
        Data::Float(f) if *f > 0.0 && f.fract() == 0.0 && *f <= f64::from(u32::MAX) => {
            Some(*f as u32)
        }
        Data::String(s) => s.trim().parse::<Rank>().ok().filter(|rank| *rank > 0),
        _ => None,
    }
}
