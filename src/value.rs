//! Runtime value model for the script interpreter.
//!
//! Everything a script expression can evaluate to lives here: scalars that
//! mirror [`Cell`], containers, detached column series, whole frames, and
//! opaque references to the approved modules and builtins.

use crate::dataset::{Cell, Dataset, Series};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Timestamp(DateTime<Utc>),
    List(Vec<Value>),
    Dict(Vec<(String, Value)>),
    Series(Series),
    Frame(Dataset),
    Module(ModuleRef),
    Builtin(Builtin),
    /// `.str` accessor bound to a series
    StrMethods(Series),
}

/// Approved module capabilities, exposed by reference only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleRef {
    Pandas,
    Numpy,
    Regex,
    Datetime,
    /// `datetime.datetime`
    DatetimeClass,
    /// `datetime.date`
    DateClass,
}

impl ModuleRef {
    /// Resolve an approved import name to its capability.
    pub fn for_name(name: &str) -> Option<ModuleRef> {
        match name {
            "pd" | "pandas" => Some(ModuleRef::Pandas),
            "np" | "numpy" => Some(ModuleRef::Numpy),
            "re" => Some(ModuleRef::Regex),
            "datetime" => Some(ModuleRef::Datetime),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ModuleRef::Pandas => "pandas",
            ModuleRef::Numpy => "numpy",
            ModuleRef::Regex => "re",
            ModuleRef::Datetime => "datetime",
            ModuleRef::DatetimeClass => "datetime.datetime",
            ModuleRef::DateClass => "datetime.date",
        }
    }
}

/// Approved primitive operations; deliberately not the full builtin surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Len,
    Str,
    Int,
    Float,
    Bool,
    Abs,
    Min,
    Max,
    Sum,
    Round,
    Sorted,
    Range,
    Print,
}

impl Builtin {
    pub fn for_name(name: &str) -> Option<Builtin> {
        match name {
            "len" => Some(Builtin::Len),
            "str" => Some(Builtin::Str),
            "int" => Some(Builtin::Int),
            "float" => Some(Builtin::Float),
            "bool" => Some(Builtin::Bool),
            "abs" => Some(Builtin::Abs),
            "min" => Some(Builtin::Min),
            "max" => Some(Builtin::Max),
            "sum" => Some(Builtin::Sum),
            "round" => Some(Builtin::Round),
            "sorted" => Some(Builtin::Sorted),
            "range" => Some(Builtin::Range),
            "print" => Some(Builtin::Print),
            _ => None,
        }
    }

    pub fn all() -> &'static [(&'static str, Builtin)] {
        &[
            ("len", Builtin::Len),
            ("str", Builtin::Str),
            ("int", Builtin::Int),
            ("float", Builtin::Float),
            ("bool", Builtin::Bool),
            ("abs", Builtin::Abs),
            ("min", Builtin::Min),
            ("max", Builtin::Max),
            ("sum", Builtin::Sum),
            ("round", Builtin::Round),
            ("sorted", Builtin::Sorted),
            ("range", Builtin::Range),
            ("print", Builtin::Print),
        ]
    }
}

impl Value {
    pub fn from_cell(cell: Cell) -> Value {
        match cell {
            Cell::Null => Value::Null,
            Cell::Bool(b) => Value::Bool(b),
            Cell::Int(n) => Value::Int(n),
            Cell::Float(f) => Value::Float(f),
            Cell::Timestamp(t) => Value::Timestamp(t),
            Cell::Str(s) => Value::Str(s),
        }
    }

    /// Scalar values map back to cells; containers and references do not.
    pub fn to_cell(&self) -> Option<Cell> {
        match self {
            Value::Null => Some(Cell::Null),
            Value::Bool(b) => Some(Cell::Bool(*b)),
            Value::Int(n) => Some(Cell::Int(*n)),
            Value::Float(f) => Some(Cell::Float(*f)),
            Value::Timestamp(t) => Some(Cell::Timestamp(*t)),
            Value::Str(s) => Some(Cell::Str(s.clone())),
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0 && !f.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Dict(entries) => !entries.is_empty(),
            Value::Series(s) => !s.is_empty(),
            Value::Frame(df) => !df.is_empty(),
            Value::Timestamp(_) => true,
            Value::Module(_) | Value::Builtin(_) | Value::StrMethods(_) => true,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_usize(&self) -> Option<usize> {
        match self {
            Value::Int(n) if *n >= 0 => Some(*n as usize),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "None",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Timestamp(_) => "timestamp",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Series(_) => "series",
            Value::Frame(_) => "dataframe",
            Value::Module(_) => "module",
            Value::Builtin(_) => "builtin",
            Value::StrMethods(_) => "str accessor",
        }
    }

    /// Rendering used by `print`.
    pub fn display_string(&self) -> String {
        match self {
            Value::Null => "None".to_string(),
            Value::Bool(b) => {
                if *b {
                    "True".to_string()
                } else {
                    "False".to_string()
                }
            }
            Value::Int(n) => n.to_string(),
            Value::Float(f) => Cell::Float(*f).display_string(),
            Value::Str(s) => s.clone(),
            Value::Timestamp(t) => t.to_rfc3339(),
            Value::List(items) => {
                let inner: Vec<String> = items.iter().map(|v| v.repr_string()).collect();
                format!("[{}]", inner.join(", "))
            }
            Value::Dict(entries) => {
                let inner: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("'{}': {}", k, v.repr_string()))
                    .collect();
                format!("{{{}}}", inner.join(", "))
            }
            Value::Series(s) => {
                let inner: Vec<String> = s.cells.iter().map(|c| c.display_string()).collect();
                format!("[{}]", inner.join(", "))
            }
            Value::Frame(df) => {
                format!(
                    "DataFrame[{} rows x {} columns]",
                    df.row_count(),
                    df.column_count()
                )
            }
            Value::Module(m) => format!("<module '{}'>", m.name()),
            Value::Builtin(_) => "<builtin>".to_string(),
            Value::StrMethods(_) => "<str accessor>".to_string(),
        }
    }

    fn repr_string(&self) -> String {
        match self {
            Value::Str(s) => format!("'{}'", s),
            other => other.display_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_follows_emptiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Str(String::new()).is_truthy());
        assert!(Value::Str("x".into()).is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
        assert!(Value::Int(-1).is_truthy());
        assert!(!Value::Float(f64::NAN).is_truthy());
    }

    #[test]
    fn cell_round_trip_for_scalars() {
        let v = Value::from_cell(Cell::Int(42));
        assert!(matches!(v.to_cell(), Some(Cell::Int(42))));
        assert!(Value::List(vec![]).to_cell().is_none());
    }

    #[test]
    fn module_aliases_resolve() {
        assert_eq!(ModuleRef::for_name("pd"), Some(ModuleRef::Pandas));
        assert_eq!(ModuleRef::for_name("numpy"), Some(ModuleRef::Numpy));
        assert_eq!(ModuleRef::for_name("os"), None);
    }

    #[test]
    fn display_matches_script_surface() {
        assert_eq!(Value::Bool(true).display_string(), "True");
        assert_eq!(
            Value::List(vec![Value::Int(1), Value::Str("a".into())]).display_string(),
            "[1, 'a']"
        );
    }
}
