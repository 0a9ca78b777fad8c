//! The approved module capabilities.
//!
//! `pd`, `np`, `re` and `datetime` are opaque references; attribute access
//! and function calls on them dispatch here. Only the listed operations
//! exist; there is no way to reach the host through a module object.

use crate::dataset::{Cell, Column, Dataset, Series};
use crate::interp::{Interp, ScriptError};
use crate::value::{ModuleRef, Value};
use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};

fn kwarg<'v>(kwargs: &'v [(String, Value)], name: &str) -> Option<&'v Value> {
    kwargs.iter().find(|(k, _)| k == name).map(|(_, v)| v)
}

impl<'a> Interp<'a> {
    pub(crate) fn module_attribute(
        &mut self,
        module: ModuleRef,
        attr: &str,
    ) -> Result<Value, ScriptError> {
        match (module, attr) {
            (ModuleRef::Pandas, "NA") => Ok(Value::Null),
            (ModuleRef::Numpy, "nan" | "NaN") => Ok(Value::Float(f64::NAN)),
            (ModuleRef::Datetime, "datetime") => Ok(Value::Module(ModuleRef::DatetimeClass)),
            (ModuleRef::Datetime, "date") => Ok(Value::Module(ModuleRef::DateClass)),
            (m, other) => Err(ScriptError::NoAttribute(m.name(), other.to_string())),
        }
    }

    pub(crate) fn module_function(
        &mut self,
        module: ModuleRef,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, ScriptError> {
        match module {
            ModuleRef::Pandas => self.pandas_function(name, args, kwargs),
            ModuleRef::Numpy => self.numpy_function(name, args, kwargs),
            ModuleRef::Regex => self.regex_function(name, args, kwargs),
            ModuleRef::Datetime => {
                Err(ScriptError::NoAttribute("datetime", name.to_string()))
            }
            ModuleRef::DatetimeClass => self.datetime_class_function(name, args, kwargs),
            ModuleRef::DateClass => match name {
                "today" => Ok(Value::Timestamp(
                    Utc.from_utc_datetime(
                        &Utc::now().date_naive().and_hms_opt(0, 0, 0).unwrap(),
                    ),
                )),
                other => Err(ScriptError::NoAttribute("datetime.date", other.to_string())),
            },
        }
    }

    fn pandas_function(
        &mut self,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, ScriptError> {
        match name {
            "to_numeric" => {
                let coerce = matches!(
                    kwarg(&kwargs, "errors"),
                    Some(Value::Str(mode)) if mode == "coerce"
                );
                let Some(first) = args.into_iter().next() else {
                    return Err(ScriptError::Argument(
                        "to_numeric() requires a value".to_string(),
                    ));
                };
                match first {
                    Value::Series(s) => {
                        self.tick(s.len() as u64)?;
                        let cells = s
                            .cells
                            .into_iter()
                            .map(|c| cell_to_numeric(c, coerce))
                            .collect::<Result<Vec<_>, _>>()?;
                        Ok(Value::Series(Series::new(s.name, cells)))
                    }
                    scalar => {
                        let cell = scalar.to_cell().ok_or_else(|| {
                            ScriptError::Type(format!(
                                "to_numeric() got {}",
                                scalar.type_name()
                            ))
                        })?;
                        Ok(Value::from_cell(cell_to_numeric(cell, coerce)?))
                    }
                }
            }
            "to_datetime" => {
                let format = match kwarg(&kwargs, "format") {
                    Some(Value::Str(fmt)) => Some(fmt.clone()),
                    _ => None,
                };
                let coerce = matches!(
                    kwarg(&kwargs, "errors"),
                    Some(Value::Str(mode)) if mode == "coerce"
                );
                let Some(first) = args.into_iter().next() else {
                    return Err(ScriptError::Argument(
                        "to_datetime() requires a value".to_string(),
                    ));
                };
                match first {
                    Value::Series(s) => {
                        self.tick(s.len() as u64)?;
                        let cells = s
                            .cells
                            .into_iter()
                            .map(|c| cell_to_datetime(c, format.as_deref(), coerce))
                            .collect::<Result<Vec<_>, _>>()?;
                        Ok(Value::Series(Series::new(s.name, cells)))
                    }
                    scalar => {
                        let cell = scalar.to_cell().ok_or_else(|| {
                            ScriptError::Type(format!(
                                "to_datetime() got {}",
                                scalar.type_name()
                            ))
                        })?;
                        Ok(Value::from_cell(cell_to_datetime(
                            cell,
                            format.as_deref(),
                            coerce,
                        )?))
                    }
                }
            }
            "isna" | "isnull" | "notna" | "notnull" => {
                let negate = name.starts_with("not");
                let Some(first) = args.into_iter().next() else {
                    return Err(ScriptError::Argument(format!(
                        "{name}() requires a value"
                    )));
                };
                match first {
                    Value::Series(s) => {
                        self.tick(s.len() as u64)?;
                        let cells = s
                            .cells
                            .iter()
                            .map(|c| Cell::Bool(c.is_missing() != negate))
                            .collect();
                        Ok(Value::Series(Series::new(s.name, cells)))
                    }
                    scalar => {
                        let missing = match scalar.to_cell() {
                            Some(cell) => cell.is_missing(),
                            None => false,
                        };
                        Ok(Value::Bool(missing != negate))
                    }
                }
            }
            "DataFrame" => {
                let Some(Value::Dict(entries)) = args.into_iter().next() else {
                    return Err(ScriptError::Argument(
                        "DataFrame() requires a dict of columns".to_string(),
                    ));
                };
                let mut columns = Vec::with_capacity(entries.len());
                for (name, value) in entries {
                    let cells = match value {
                        Value::List(items) => items
                            .into_iter()
                            .map(|v| {
                                v.to_cell().ok_or_else(|| {
                                    ScriptError::Type(
                                        "column values must be scalars".to_string(),
                                    )
                                })
                            })
                            .collect::<Result<Vec<_>, _>>()?,
                        Value::Series(s) => s.cells,
                        other => {
                            return Err(ScriptError::Type(format!(
                                "column '{name}' must be a list, got {}",
                                other.type_name()
                            )))
                        }
                    };
                    self.tick(cells.len() as u64)?;
                    columns.push(Column::new(name, cells));
                }
                let df = Dataset::from_columns(columns)
                    .map_err(|e| ScriptError::Length(e.to_string()))?;
                Ok(Value::Frame(df))
            }
            other => Err(ScriptError::NoAttribute("pandas", other.to_string())),
        }
    }

    fn numpy_function(
        &mut self,
        name: &str,
        args: Vec<Value>,
        _kwargs: Vec<(String, Value)>,
    ) -> Result<Value, ScriptError> {
        match name {
            "abs" | "sqrt" | "floor" | "ceil" | "round" => {
                let Some(first) = args.into_iter().next() else {
                    return Err(ScriptError::Argument(format!(
                        "{name}() requires a value"
                    )));
                };
                let apply = |f: f64| -> f64 {
                    match name {
                        "abs" => f.abs(),
                        "sqrt" => f.sqrt(),
                        "floor" => f.floor(),
                        "ceil" => f.ceil(),
                        _ => f.round(),
                    }
                };
                match first {
                    Value::Series(s) => {
                        self.tick(s.len() as u64)?;
                        let cells = s
                            .cells
                            .into_iter()
                            .map(|c| match c {
                                missing if missing.is_missing() => Ok(Cell::Null),
                                Cell::Int(n) if name == "abs" => Ok(Cell::Int(n.abs())),
                                cell => cell
                                    .as_f64()
                                    .map(|f| Cell::Float(apply(f)))
                                    .ok_or_else(|| {
                                        ScriptError::Type(format!(
                                            "{name}() got {}",
                                            cell.type_name()
                                        ))
                                    }),
                            })
                            .collect::<Result<Vec<_>, _>>()?;
                        Ok(Value::Series(Series::new(s.name, cells)))
                    }
                    Value::Int(n) if name == "abs" => Ok(Value::Int(n.abs())),
                    scalar => scalar
                        .as_f64()
                        .map(|f| Value::Float(apply(f)))
                        .ok_or_else(|| {
                            ScriptError::Type(format!("{name}() got {}", scalar.type_name()))
                        }),
                }
            }
            "mean" | "sum" | "min" | "max" => {
                let Some(first) = args.into_iter().next() else {
                    return Err(ScriptError::Argument(format!(
                        "{name}() requires a value"
                    )));
                };
                let series = match first {
                    Value::Series(s) => s,
                    Value::List(items) => {
                        let cells = items
                            .into_iter()
                            .map(|v| {
                                v.to_cell().ok_or_else(|| {
                                    ScriptError::Type(format!(
                                        "{name}() requires scalar values"
                                    ))
                                })
                            })
                            .collect::<Result<Vec<_>, _>>()?;
                        Series::new(None, cells)
                    }
                    other => {
                        return Err(ScriptError::Type(format!(
                            "{name}() got {}",
                            other.type_name()
                        )))
                    }
                };
                self.tick(series.len() as u64)?;
                self.call_method(Value::Series(series), name, vec![], vec![])
            }
            "where" => {
                if args.len() != 3 {
                    return Err(ScriptError::Argument(
                        "where() takes exactly 3 arguments".to_string(),
                    ));
                }
                let mut it = args.into_iter();
                let cond = it.next().unwrap();
                let if_true = it.next().unwrap();
                let if_false = it.next().unwrap();
                let Value::Series(cond) = cond else {
                    return Err(ScriptError::Type(
                        "where() condition must be a series".to_string(),
                    ));
                };
                self.tick(cond.len() as u64)?;
                let pick = |branch: &Value, i: usize| -> Result<Cell, ScriptError> {
                    match branch {
                        Value::Series(s) => {
                            if s.len() != cond.len() {
                                return Err(ScriptError::Length(format!(
                                    "where() branch of length {} against {}",
                                    s.len(),
                                    cond.len()
                                )));
                            }
                            Ok(s.cells[i].clone())
                        }
                        scalar => scalar.to_cell().ok_or_else(|| {
                            ScriptError::Type(
                                "where() branches must be scalars or series".to_string(),
                            )
                        }),
                    }
                };
                let mut cells = Vec::with_capacity(cond.len());
                for (i, c) in cond.cells.iter().enumerate() {
                    let truthy = matches!(c, Cell::Bool(true));
                    let cell = if truthy {
                        pick(&if_true, i)?
                    } else {
                        pick(&if_false, i)?
                    };
                    cells.push(cell);
                }
                Ok(Value::Series(Series::new(cond.name, cells)))
            }
            other => Err(ScriptError::NoAttribute("numpy", other.to_string())),
        }
    }

    fn regex_function(
        &mut self,
        name: &str,
        args: Vec<Value>,
        _kwargs: Vec<(String, Value)>,
    ) -> Result<Value, ScriptError> {
        let compile = |pattern: &str| {
            regex::Regex::new(pattern).map_err(|e| ScriptError::Regex(e.to_string()))
        };
        match name {
            "sub" => {
                let (Some(Value::Str(pattern)), Some(Value::Str(repl)), Some(Value::Str(text))) =
                    (args.first(), args.get(1), args.get(2))
                else {
                    return Err(ScriptError::Argument(
                        "sub() requires pattern, replacement and string".to_string(),
                    ));
                };
                let re = compile(pattern)?;
                self.tick(text.len() as u64)?;
                Ok(Value::Str(re.replace_all(text, repl.as_str()).into_owned()))
            }
            "match" | "search" | "fullmatch" => {
                let (Some(Value::Str(pattern)), Some(Value::Str(text))) =
                    (args.first(), args.get(1))
                else {
                    return Err(ScriptError::Argument(format!(
                        "{name}() requires a pattern and a string"
                    )));
                };
                let re = compile(pattern)?;
                self.tick(text.len() as u64)?;
                let matched = match name {
                    "match" => re.find(text).map(|m| m.start() == 0).unwrap_or(false),
                    "fullmatch" => re
                        .find(text)
                        .map(|m| m.start() == 0 && m.end() == text.len())
                        .unwrap_or(false),
                    _ => re.is_match(text),
                };
                Ok(Value::Bool(matched))
            }
            "findall" => {
                let (Some(Value::Str(pattern)), Some(Value::Str(text))) =
                    (args.first(), args.get(1))
                else {
                    return Err(ScriptError::Argument(
                        "findall() requires a pattern and a string".to_string(),
                    ));
                };
                let re = compile(pattern)?;
                self.tick(text.len() as u64)?;
                Ok(Value::List(
                    re.find_iter(text)
                        .map(|m| Value::Str(m.as_str().to_string()))
                        .collect(),
                ))
            }
            other => Err(ScriptError::NoAttribute("re", other.to_string())),
        }
    }

    fn datetime_class_function(
        &mut self,
        name: &str,
        args: Vec<Value>,
        _kwargs: Vec<(String, Value)>,
    ) -> Result<Value, ScriptError> {
        match name {
            "strptime" => {
                let (Some(Value::Str(text)), Some(Value::Str(format))) =
                    (args.first(), args.get(1))
                else {
                    return Err(ScriptError::Argument(
                        "strptime() requires a string and a format".to_string(),
                    ));
                };
                parse_timestamp(text, Some(format))
                    .map(Value::Timestamp)
                    .ok_or_else(|| {
                        ScriptError::Argument(format!(
                            "time data '{text}' does not match format '{format}'"
                        ))
                    })
            }
            "now" => Ok(Value::Timestamp(Utc::now())),
            other => Err(ScriptError::NoAttribute(
                "datetime.datetime",
                other.to_string(),
            )),
        }
    }
}

fn cell_to_numeric(cell: Cell, coerce: bool) -> Result<Cell, ScriptError> {
    match &cell {
        Cell::Int(_) | Cell::Float(_) => Ok(cell),
        Cell::Bool(b) => Ok(Cell::Int(if *b { 1 } else { 0 })),
        missing if missing.is_missing() => Ok(Cell::Null),
        Cell::Str(s) => {
            let trimmed = s.trim();
            if let Ok(n) = trimmed.parse::<i64>() {
                return Ok(Cell::Int(n));
            }
            if let Ok(f) = trimmed.parse::<f64>() {
                return Ok(Cell::Float(f));
            }
            if coerce {
                Ok(Cell::Null)
            } else {
                Err(ScriptError::Type(format!(
                    "unable to parse '{s}' as a number"
                )))
            }
        }
        other => {
            if coerce {
                Ok(Cell::Null)
            } else {
                Err(ScriptError::Type(format!(
                    "unable to convert {} to a number",
                    other.type_name()
                )))
            }
        }
    }
}

fn cell_to_datetime(cell: Cell, format: Option<&str>, coerce: bool) -> Result<Cell, ScriptError> {
    match &cell {
        Cell::Timestamp(_) => Ok(cell),
        missing if missing.is_missing() => Ok(Cell::Null),
        Cell::Str(s) => match parse_timestamp(s.trim(), format) {
            Some(ts) => Ok(Cell::Timestamp(ts)),
            None if coerce => Ok(Cell::Null),
            None => Err(ScriptError::Type(format!(
                "unable to parse '{s}' as a datetime"
            ))),
        },
        other => {
            if coerce {
                Ok(Cell::Null)
            } else {
                Err(ScriptError::Type(format!(
                    "unable to convert {} to a datetime",
                    other.type_name()
                )))
            }
        }
    }
}

/// Parse a timestamp, either with an explicit strftime-style format or by
/// trying the common layouts the uploaded data actually contains.
fn parse_timestamp(text: &str, format: Option<&str>) -> Option<chrono::DateTime<Utc>> {
    if let Some(fmt) = format {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(Utc.from_utc_datetime(&dt));
        }
        if let Ok(d) = NaiveDate::parse_from_str(text, fmt) {
            return Some(Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0)?));
        }
        return None;
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(Utc.from_utc_datetime(&dt));
        }
    }
    for fmt in ["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(text, fmt) {
            return Some(Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0)?));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Column, Dataset};
    use crate::env::CapabilityEnv;
    use crate::interp::run;
    use crate::parser::parse;
    use crate::policy::ScriptPolicy;
    use std::time::{Duration, Instant};

    fn run_script(script: &str, dataset: Dataset) -> CapabilityEnv {
        let policy = ScriptPolicy::default();
        let mut env = CapabilityEnv::build(&policy, &dataset, 64 * 1024);
        let stmts = parse(script).expect("script should parse");
        run(
            &mut env,
            &policy,
            &stmts,
            1_000_000,
            Instant::now() + Duration::from_secs(5),
        )
        .expect("script should run");
        env
    }

    fn text_numbers() -> Dataset {
        Dataset::from_columns(vec![Column::new(
            "v",
            vec![
                Cell::Str("1".into()),
                Cell::Str(" 2.5 ".into()),
                Cell::Str("oops".into()),
            ],
        )])
        .unwrap()
    }

    #[test]
    fn to_numeric_coerce_nulls_bad_values() {
        let env = run_script(
            "df['v'] = pd.to_numeric(df['v'], errors='coerce')",
            text_numbers(),
        );
        let cells = &env.produced_dataset().unwrap().column("v").unwrap().cells;
        assert!(cells[0].same(&Cell::Int(1)));
        assert!(cells[1].same(&Cell::Float(2.5)));
        assert!(cells[2].is_missing());
    }

    #[test]
    fn to_numeric_strict_faults() {
        let policy = ScriptPolicy::default();
        let mut env = CapabilityEnv::build(&policy, &text_numbers(), 1024);
        let stmts = parse("df['v'] = pd.to_numeric(df['v'])").unwrap();
        let err = run(
            &mut env,
            &policy,
            &stmts,
            100_000,
            Instant::now() + Duration::from_secs(5),
        )
        .unwrap_err();
        assert!(matches!(err, ScriptError::Type(_)));
    }

    #[test]
    fn to_datetime_with_format() {
        let df = Dataset::from_columns(vec![Column::new(
            "when",
            vec![Cell::Str("2024-01-15".into()), Cell::Str("bogus".into())],
        )])
        .unwrap();
        let env = run_script(
            "df['when'] = pd.to_datetime(df['when'], format='%Y-%m-%d', errors='coerce')",
            df,
        );
        let cells = &env.produced_dataset().unwrap().column("when").unwrap().cells;
        assert!(matches!(cells[0], Cell::Timestamp(_)));
        assert!(cells[1].is_missing());
    }

    #[test]
    fn isna_mask_filters_rows() {
        let df = Dataset::from_columns(vec![Column::new(
            "v",
            vec![Cell::Int(1), Cell::Null, Cell::Int(3)],
        )])
        .unwrap();
        let env = run_script("df = df[pd.notna(df['v'])]", df);
        assert_eq!(env.produced_dataset().unwrap().row_count(), 2);
    }

    #[test]
    fn numpy_nan_fills_and_where() {
        let df = Dataset::from_columns(vec![Column::new(
            "v",
            vec![Cell::Int(-2), Cell::Int(5)],
        )])
        .unwrap();
        let env = run_script(
            "df['v'] = np.where(df['v'] < 0, 0, df['v'])",
            df,
        );
        let cells = &env.produced_dataset().unwrap().column("v").unwrap().cells;
        assert!(cells[0].same(&Cell::Int(0)));
        assert!(cells[1].same(&Cell::Int(5)));
    }

    #[test]
    fn numpy_aggregates() {
        let df = Dataset::from_columns(vec![Column::new(
            "v",
            vec![Cell::Int(2), Cell::Int(4)],
        )])
        .unwrap();
        let env = run_script("print(np.mean(df['v']), np.sqrt(16))", df);
        assert_eq!(env.output(), "3.0 4.0\n");
    }

    #[test]
    fn regex_substitution_and_match() {
        let env = run_script(
            "s = re.sub('[^0-9]', '', 'a1b2')\nprint(s)\nprint(re.match('[a-z]+', 'abc1'))\nprint(re.search('[0-9]', 'abc'))",
            text_numbers(),
        );
        assert_eq!(env.output(), "12\nTrue\nFalse\n");
    }

    #[test]
    fn strptime_parses_with_format() {
        let env = run_script(
            "from datetime import datetime\nts = datetime.strptime('2023-07-01', '%Y-%m-%d')\nprint(ts)",
            text_numbers(),
        );
        assert!(env.output().starts_with("2023-07-01T00:00:00"));
    }

    #[test]
    fn dataframe_constructor() {
        let env = run_script(
            "df = pd.DataFrame({'x': [1, 2, 3]})\nprint(len(df))",
            Dataset::new(),
        );
        assert_eq!(env.output(), "3\n");
        assert_eq!(env.produced_dataset().unwrap().row_count(), 3);
    }

    #[test]
    fn unknown_module_function_faults() {
        let policy = ScriptPolicy::default();
        let mut env = CapabilityEnv::build(&policy, &Dataset::new(), 1024);
        let stmts = parse("pd.read_csv('x.csv')").unwrap();
        let err = run(
            &mut env,
            &policy,
            &stmts,
            100_000,
            Instant::now() + Duration::from_secs(5),
        )
        .unwrap_err();
        assert!(matches!(err, ScriptError::NoAttribute("pandas", m) if m == "read_csv"));
    }
}
