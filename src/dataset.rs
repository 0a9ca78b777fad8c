//! In-memory tabular values.
//!
//! A [`Dataset`] is an ordered sequence of named columns of equal length.
//! The engine is format-agnostic: callers hand it a parsed dataset and get
//! one back, no file or CSV handling happens here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum DataError {
    #[error("column '{0}' not found")]
    UnknownColumn(String),

    #[error("column '{name}' has {got} values, expected {expected}")]
    LengthMismatch {
        name: String,
        got: usize,
        expected: usize,
    },

    #[error("boolean mask has {got} values, expected {expected}")]
    MaskMismatch { got: usize, expected: usize },
}

/// A single scalar value inside a column.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    Str(String),
}

impl Cell {
    /// Missing means an explicit null or a float NaN, matching how the
    /// produced datasets treat holes.
    pub fn is_missing(&self) -> bool {
        match self {
            Cell::Null => true,
            Cell::Float(f) => f.is_nan(),
            _ => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(n) => Some(*n as f64),
            Cell::Float(f) => Some(*f),
            Cell::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Cell::Null => "null",
            Cell::Bool(_) => "bool",
            Cell::Int(_) => "int",
            Cell::Float(_) => "float",
            Cell::Timestamp(_) => "timestamp",
            Cell::Str(_) => "str",
        }
    }

    pub fn display_string(&self) -> String {
        match self {
            Cell::Null => "None".to_string(),
            Cell::Bool(b) => {
                if *b {
                    "True".to_string()
                } else {
                    "False".to_string()
                }
            }
            Cell::Int(n) => n.to_string(),
            Cell::Float(f) => {
                if f.is_nan() {
                    "NaN".to_string()
                } else if f.fract() == 0.0 && f.is_finite() {
                    format!("{:.1}", f)
                } else {
                    f.to_string()
                }
            }
            Cell::Timestamp(t) => t.to_rfc3339(),
            Cell::Str(s) => s.clone(),
        }
    }

    /// Total order used by sorting: missing first, then numerics, booleans,
    /// timestamps, strings.
    pub fn compare(&self, other: &Cell) -> Ordering {
        match (self, other) {
            (a, b) if a.is_missing() && b.is_missing() => Ordering::Equal,
            (a, _) if a.is_missing() => Ordering::Less,
            (_, b) if b.is_missing() => Ordering::Greater,
            (Cell::Timestamp(a), Cell::Timestamp(b)) => a.cmp(b),
            (Cell::Str(a), Cell::Str(b)) => a.cmp(b),
            (Cell::Bool(a), Cell::Bool(b)) => a.cmp(b),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                _ => a.display_string().cmp(&b.display_string()),
            },
        }
    }

    /// Equality used by duplicate detection; numeric cells compare by value.
    pub fn same(&self, other: &Cell) -> bool {
        match (self, other) {
            (Cell::Null, Cell::Null) => true,
            (Cell::Bool(a), Cell::Bool(b)) => a == b,
            (Cell::Str(a), Cell::Str(b)) => a == b,
            (Cell::Timestamp(a), Cell::Timestamp(b)) => a == b,
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x == y || (x.is_nan() && y.is_nan()),
                _ => false,
            },
        }
    }
}

/// Named column of cells.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub cells: Vec<Cell>,
}

impl Column {
    pub fn new(name: impl Into<String>, cells: Vec<Cell>) -> Self {
        Self {
            name: name.into(),
            cells,
        }
    }
}

/// An unnamed run of cells detached from a dataset; what a script sees when
/// it selects one column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Series {
    pub name: Option<String>,
    pub cells: Vec<Cell>,
}

impl Series {
    pub fn new(name: Option<String>, cells: Vec<Cell>) -> Self {
        Self { name, cells }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Ordered, uniform-length collection of named columns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    columns: Vec<Column>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from columns, enforcing the uniform-length invariant.
    pub fn from_columns(columns: Vec<Column>) -> Result<Self, DataError> {
        if let Some(first) = columns.first() {
            let expected = first.cells.len();
            for col in &columns {
                if col.cells.len() != expected {
                    return Err(DataError::LengthMismatch {
                        name: col.name.clone(),
                        got: col.cells.len(),
                        expected,
                    });
                }
            }
        }
        Ok(Self { columns })
    }

    pub fn row_count(&self) -> usize {
        self.columns.first().map(|c| c.cells.len()).unwrap_or(0)
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Detach one column as a series.
    pub fn series(&self, name: &str) -> Result<Series, DataError> {
        self.column(name)
            .map(|c| Series::new(Some(c.name.clone()), c.cells.clone()))
            .ok_or_else(|| DataError::UnknownColumn(name.to_string()))
    }

    /// Replace an existing column or append a new one. A new column on an
    /// empty dataset defines the row count.
    pub fn set_column(&mut self, name: &str, cells: Vec<Cell>) -> Result<(), DataError> {
        if !self.columns.is_empty() && cells.len() != self.row_count() {
            return Err(DataError::LengthMismatch {
                name: name.to_string(),
                got: cells.len(),
                expected: self.row_count(),
            });
        }
        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(col) => col.cells = cells,
            None => self.columns.push(Column::new(name, cells)),
        }
        Ok(())
    }

    fn row_cells(&self, row: usize) -> Vec<&Cell> {
        self.columns.iter().map(|c| &c.cells[row]).collect()
    }

    fn keep_rows(&self, keep: &[usize]) -> Dataset {
        let columns = self
            .columns
            .iter()
            .map(|c| Column::new(c.name.clone(), keep.iter().map(|&i| c.cells[i].clone()).collect()))
            .collect();
        Dataset { columns }
    }

    /// Drop every row containing at least one missing cell.
    pub fn drop_nulls(&self) -> Dataset {
        let keep: Vec<usize> = (0..self.row_count())
            .filter(|&i| !self.row_cells(i).iter().any(|c| c.is_missing()))
            .collect();
        self.keep_rows(&keep)
    }

    /// Replace every missing cell with the given value.
    pub fn fill_nulls(&self, value: &Cell) -> Dataset {
        let columns = self
            .columns
            .iter()
            .map(|c| {
                Column::new(
                    c.name.clone(),
                    c.cells
                        .iter()
                        .map(|cell| {
                            if cell.is_missing() {
                                value.clone()
                            } else {
                                cell.clone()
                            }
                        })
                        .collect(),
                )
            })
            .collect();
        Dataset { columns }
    }

    pub fn head(&self, n: usize) -> Dataset {
        let keep: Vec<usize> = (0..self.row_count().min(n)).collect();
        self.keep_rows(&keep)
    }

    pub fn tail(&self, n: usize) -> Dataset {
        let rows = self.row_count();
        let keep: Vec<usize> = (rows.saturating_sub(n)..rows).collect();
        self.keep_rows(&keep)
    }

    /// Rename columns; names absent from the mapping are left alone.
    pub fn rename(&self, mapping: &HashMap<String, String>) -> Dataset {
        let columns = self
            .columns
            .iter()
            .map(|c| {
                let name = mapping.get(&c.name).cloned().unwrap_or_else(|| c.name.clone());
                Column::new(name, c.cells.clone())
            })
            .collect();
        Dataset { columns }
    }

    /// Stable sort by one column.
    pub fn sort_by(&self, name: &str, ascending: bool) -> Result<Dataset, DataError> {
        let col = self
            .column(name)
            .ok_or_else(|| DataError::UnknownColumn(name.to_string()))?;
        let mut order: Vec<usize> = (0..self.row_count()).collect();
        order.sort_by(|&a, &b| {
            let ord = col.cells[a].compare(&col.cells[b]);
            if ascending {
                ord
            } else {
                ord.reverse()
            }
        });
        Ok(self.keep_rows(&order))
    }

    /// Keep the first occurrence of each distinct row.
    pub fn drop_duplicates(&self) -> Dataset {
        let mut keep = Vec::new();
        for i in 0..self.row_count() {
            let duplicate = keep.iter().any(|&j: &usize| {
                self.row_cells(i)
                    .iter()
                    .zip(self.row_cells(j))
                    .all(|(a, b)| a.same(b))
            });
            if !duplicate {
                keep.push(i);
            }
        }
        self.keep_rows(&keep)
    }

    pub fn drop_columns(&self, names: &[String]) -> Dataset {
        let columns = self
            .columns
            .iter()
            .filter(|c| !names.contains(&c.name))
            .cloned()
            .collect();
        Dataset { columns }
    }

    /// Keep a subset of columns, in the requested order.
    pub fn select_columns(&self, names: &[String]) -> Result<Dataset, DataError> {
        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            let col = self
                .column(name)
                .ok_or_else(|| DataError::UnknownColumn(name.clone()))?;
            columns.push(col.clone());
        }
        Ok(Dataset { columns })
    }

    /// Keep rows where the mask is true.
    pub fn filter_rows(&self, mask: &[bool]) -> Result<Dataset, DataError> {
        if mask.len() != self.row_count() {
            return Err(DataError::MaskMismatch {
                got: mask.len(),
                expected: self.row_count(),
            });
        }
        let keep: Vec<usize> = (0..self.row_count()).filter(|&i| mask[i]).collect();
        Ok(self.keep_rows(&keep))
    }

    /// Row-for-row, column-for-column equality.
    pub fn same_as(&self, other: &Dataset) -> bool {
        if self.column_count() != other.column_count() || self.row_count() != other.row_count() {
            return false;
        }
        self.columns.iter().zip(&other.columns).all(|(a, b)| {
            a.name == b.name && a.cells.iter().zip(&b.cells).all(|(x, y)| x.same(y))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbers(vals: &[i64]) -> Vec<Cell> {
        vals.iter().map(|&v| Cell::Int(v)).collect()
    }

    fn sample() -> Dataset {
        Dataset::from_columns(vec![
            Column::new("x", numbers(&[3, 1, 2])),
            Column::new(
                "label",
                vec![
                    Cell::Str("c".into()),
                    Cell::Str("a".into()),
                    Cell::Str("b".into()),
                ],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn uniform_length_enforced() {
        let err = Dataset::from_columns(vec![
            Column::new("a", numbers(&[1, 2])),
            Column::new("b", numbers(&[1])),
        ])
        .unwrap_err();
        assert!(matches!(err, DataError::LengthMismatch { .. }));
    }

    #[test]
    fn drop_nulls_removes_rows_with_any_hole() {
        let df = Dataset::from_columns(vec![
            Column::new("a", vec![Cell::Int(1), Cell::Null, Cell::Int(3)]),
            Column::new("b", vec![Cell::Int(4), Cell::Int(5), Cell::Float(f64::NAN)]),
        ])
        .unwrap();
        let cleaned = df.drop_nulls();
        assert_eq!(cleaned.row_count(), 1);
        assert!(cleaned.column("a").unwrap().cells[0].same(&Cell::Int(1)));
    }

    #[test]
    fn fill_nulls_replaces_nan_and_null() {
        let df = Dataset::from_columns(vec![Column::new(
            "a",
            vec![Cell::Null, Cell::Float(f64::NAN), Cell::Int(7)],
        )])
        .unwrap();
        let filled = df.fill_nulls(&Cell::Int(0));
        let cells = &filled.column("a").unwrap().cells;
        assert!(cells[0].same(&Cell::Int(0)));
        assert!(cells[1].same(&Cell::Int(0)));
        assert!(cells[2].same(&Cell::Int(7)));
    }

    #[test]
    fn sort_is_stable_and_reversible() {
        let df = sample();
        let asc = df.sort_by("x", true).unwrap();
        assert!(asc.column("x").unwrap().cells[0].same(&Cell::Int(1)));
        let desc = df.sort_by("x", false).unwrap();
        assert!(desc.column("x").unwrap().cells[0].same(&Cell::Int(3)));
        // companion column moves with the sort key
        assert_eq!(asc.column("label").unwrap().cells[0].display_string(), "a");
    }

    #[test]
    fn drop_duplicates_keeps_first_occurrence() {
        let df = Dataset::from_columns(vec![Column::new("a", numbers(&[1, 2, 1, 2, 3]))]).unwrap();
        assert_eq!(df.drop_duplicates().row_count(), 3);
    }

    #[test]
    fn filter_rows_rejects_bad_mask_length() {
        let df = sample();
        assert!(df.filter_rows(&[true]).is_err());
        let kept = df.filter_rows(&[true, false, true]).unwrap();
        assert_eq!(kept.row_count(), 2);
    }

    #[test]
    fn set_column_broadcast_rules() {
        let mut df = sample();
        assert!(df.set_column("x", numbers(&[9, 9])).is_err());
        df.set_column("y", numbers(&[1, 2, 3])).unwrap();
        assert_eq!(df.column_count(), 3);
    }

    #[test]
    fn mixed_numeric_comparison() {
        assert_eq!(Cell::Int(2).compare(&Cell::Float(2.5)), Ordering::Less);
        assert!(Cell::Int(2).same(&Cell::Float(2.0)));
        assert!(Cell::Null.compare(&Cell::Int(-100)) == Ordering::Less);
    }
}
