//! Method and builtin dispatch for the interpreter.
//!
//! Receivers are plain values; there are no bound-method objects. A call
//! like `df.dropna()` evaluates the receiver and dispatches on
//! (type, method name) here. The surface is the set of operations the
//! generated cleaning scripts actually use, nothing more.

use crate::dataset::{Cell, Series};
use crate::interp::{Interp, ScriptError};
use crate::value::{Builtin, Value};
use std::collections::HashMap;

fn kwarg<'v>(kwargs: &'v [(String, Value)], name: &str) -> Option<&'v Value> {
    kwargs.iter().find(|(k, _)| k == name).map(|(_, v)| v)
}

fn no_kwargs(method: &str, kwargs: &[(String, Value)]) -> Result<(), ScriptError> {
    match kwargs.first() {
        Some((name, _)) => Err(ScriptError::Argument(format!(
            "{method}() got an unexpected keyword argument '{name}'"
        ))),
        None => Ok(()),
    }
}

fn arity(method: &str, args: &[Value], expected: usize) -> Result<(), ScriptError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(ScriptError::Argument(format!(
            "{method}() takes {expected} argument(s), got {}",
            args.len()
        )))
    }
}

impl<'a> Interp<'a> {
    /// Data attribute access (`df.columns`, `series.str`, `np.nan`, …).
    pub(crate) fn attribute(&mut self, obj: Value, attr: &str) -> Result<Value, ScriptError> {
        match obj {
            Value::Module(m) => self.module_attribute(m, attr),
            Value::Frame(df) => match attr {
                "columns" => Ok(Value::List(
                    df.column_names().into_iter().map(Value::Str).collect(),
                )),
                "empty" => Ok(Value::Bool(df.is_empty())),
                "shape" => Ok(Value::List(vec![
                    Value::Int(df.row_count() as i64),
                    Value::Int(df.column_count() as i64),
                ])),
                other => Err(ScriptError::NoAttribute("dataframe", other.to_string())),
            },
            Value::Series(s) => match attr {
                "str" => Ok(Value::StrMethods(s)),
                "empty" => Ok(Value::Bool(s.is_empty())),
                "name" => Ok(s
                    .name
                    .clone()
                    .map(Value::Str)
                    .unwrap_or(Value::Null)),
                other => Err(ScriptError::NoAttribute("series", other.to_string())),
            },
            other => Err(ScriptError::NoAttribute(
                other.type_name(),
                attr.to_string(),
            )),
        }
    }

    /// Method call dispatch on an evaluated receiver.
    pub(crate) fn call_method(
        &mut self,
        receiver: Value,
        method: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, ScriptError> {
        match receiver {
            Value::Frame(_) => self.frame_method(receiver, method, args, kwargs),
            Value::Series(s) => self.series_method(s, method, args, kwargs),
            Value::StrMethods(s) => self.str_accessor_method(s, method, args, kwargs),
            Value::Str(s) => self.string_method(s, method, args, kwargs),
            Value::Dict(entries) => dict_method(entries, method, args, kwargs),
            Value::List(_) => Err(ScriptError::NoAttribute("list", method.to_string())),
            Value::Module(m) => self.module_function(m, method, args, kwargs),
            other => Err(ScriptError::NoAttribute(
                other.type_name(),
                method.to_string(),
            )),
        }
    }

    fn frame_method(
        &mut self,
        receiver: Value,
        method: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, ScriptError> {
        let Value::Frame(df) = receiver else {
            unreachable!()
        };
        let cost = (df.row_count() * df.column_count().max(1)) as u64;
        self.tick(cost)?;
        match method {
            "dropna" => {
                no_kwargs("dropna", &kwargs)?;
                arity("dropna", &args, 0)?;
                Ok(Value::Frame(df.drop_nulls()))
            }
            "fillna" => {
                no_kwargs("fillna", &kwargs)?;
                arity("fillna", &args, 1)?;
                let cell = args[0].to_cell().ok_or_else(|| {
                    ScriptError::Argument("fillna() requires a scalar value".to_string())
                })?;
                Ok(Value::Frame(df.fill_nulls(&cell)))
            }
            "head" | "tail" => {
                no_kwargs(method, &kwargs)?;
                let n = match args.first() {
                    None => 5,
                    Some(v) => v.as_usize().ok_or_else(|| {
                        ScriptError::Argument(format!("{method}() requires a non-negative int"))
                    })?,
                };
                let out = if method == "head" {
                    df.head(n)
                } else {
                    df.tail(n)
                };
                Ok(Value::Frame(out))
            }
            "rename" => {
                arity("rename", &args, 0)?;
                let mapping = kwarg(&kwargs, "columns").ok_or_else(|| {
                    ScriptError::Argument("rename() requires a columns= mapping".to_string())
                })?;
                let Value::Dict(entries) = mapping else {
                    return Err(ScriptError::Argument(
                        "rename(columns=...) requires a dict".to_string(),
                    ));
                };
                let mut map = HashMap::new();
                for (k, v) in entries {
                    let Value::Str(new_name) = v else {
                        return Err(ScriptError::Argument(
                            "rename() values must be strings".to_string(),
                        ));
                    };
                    map.insert(k.clone(), new_name.clone());
                }
                Ok(Value::Frame(df.rename(&map)))
            }
            "sort_values" => {
                let by = match (args.first(), kwarg(&kwargs, "by")) {
                    (Some(Value::Str(s)), _) | (None, Some(Value::Str(s))) => s.clone(),
                    _ => {
                        return Err(ScriptError::Argument(
                            "sort_values() requires a column name".to_string(),
                        ))
                    }
                };
                let ascending = match kwarg(&kwargs, "ascending") {
                    None => true,
                    Some(v) => v.is_truthy(),
                };
                Ok(Value::Frame(df.sort_by(&by, ascending)?))
            }
            "drop_duplicates" => {
                no_kwargs("drop_duplicates", &kwargs)?;
                arity("drop_duplicates", &args, 0)?;
                // quadratic row comparison; charge for it
                self.tick((df.row_count() as u64).saturating_mul(df.row_count() as u64))?;
                Ok(Value::Frame(df.drop_duplicates()))
            }
            "drop" => {
                arity("drop", &args, 0)?;
                let columns = kwarg(&kwargs, "columns").ok_or_else(|| {
                    ScriptError::Argument("drop() requires columns=".to_string())
                })?;
                let names = match columns {
                    Value::Str(s) => vec![s.clone()],
                    Value::List(items) => {
                        let mut names = Vec::with_capacity(items.len());
                        for item in items {
                            match item {
                                Value::Str(s) => names.push(s.clone()),
                                other => {
                                    return Err(ScriptError::Argument(format!(
                                        "drop() column names must be strings, got {}",
                                        other.type_name()
                                    )))
                                }
                            }
                        }
                        names
                    }
                    other => {
                        return Err(ScriptError::Argument(format!(
                            "drop() columns must be a name or list, got {}",
                            other.type_name()
                        )))
                    }
                };
                for name in &names {
                    if !df.has_column(name) {
                        return Err(ScriptError::UnknownColumn(name.clone()));
                    }
                }
                Ok(Value::Frame(df.drop_columns(&names)))
            }
            "copy" => {
                no_kwargs("copy", &kwargs)?;
                arity("copy", &args, 0)?;
                Ok(Value::Frame(df))
            }
            "reset_index" => {
                // there is no separate index; accepted for script compatibility
                Ok(Value::Frame(df))
            }
            other => Err(ScriptError::NoAttribute("dataframe", other.to_string())),
        }
    }

    fn series_method(
        &mut self,
        s: Series,
        method: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, ScriptError> {
        self.tick(s.len() as u64)?;
        match method {
            "fillna" => {
                no_kwargs("fillna", &kwargs)?;
                arity("fillna", &args, 1)?;
                let fill = args[0].to_cell().ok_or_else(|| {
                    ScriptError::Argument("fillna() requires a scalar value".to_string())
                })?;
                let cells = s
                    .cells
                    .into_iter()
                    .map(|c| if c.is_missing() { fill.clone() } else { c })
                    .collect();
                Ok(Value::Series(Series::new(s.name, cells)))
            }
            "astype" => {
                no_kwargs("astype", &kwargs)?;
                arity("astype", &args, 1)?;
                let Value::Str(kind) = &args[0] else {
                    return Err(ScriptError::Argument(
                        "astype() requires a type name".to_string(),
                    ));
                };
                let cells = s
                    .cells
                    .into_iter()
                    .map(|c| coerce_cell(c, kind))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Series(Series::new(s.name, cells)))
            }
            "isna" | "isnull" => Ok(Value::Series(Series::new(
                s.name,
                s.cells
                    .iter()
                    .map(|c| Cell::Bool(c.is_missing()))
                    .collect(),
            ))),
            "notna" | "notnull" => Ok(Value::Series(Series::new(
                s.name,
                s.cells
                    .iter()
                    .map(|c| Cell::Bool(!c.is_missing()))
                    .collect(),
            ))),
            "round" => {
                let digits = match args.first() {
                    None => 0i64,
                    Some(Value::Int(n)) => *n,
                    Some(other) => {
                        return Err(ScriptError::Argument(format!(
                            "round() digits must be an int, got {}",
                            other.type_name()
                        )))
                    }
                };
                let factor = 10f64.powi(digits as i32);
                let cells = s
                    .cells
                    .into_iter()
                    .map(|c| match c {
                        Cell::Float(f) => Cell::Float((f * factor).round() / factor),
                        other => other,
                    })
                    .collect();
                Ok(Value::Series(Series::new(s.name, cells)))
            }
            "mean" | "sum" | "min" | "max" => {
                no_kwargs(method, &kwargs)?;
                arity(method, &args, 0)?;
                series_aggregate(&s, method)
            }
            "tolist" => Ok(Value::List(
                s.cells.into_iter().map(Value::from_cell).collect(),
            )),
            "unique" => {
                let mut seen: Vec<Cell> = Vec::new();
                for cell in &s.cells {
                    if !seen.iter().any(|c| c.same(cell)) {
                        seen.push(cell.clone());
                    }
                }
                Ok(Value::List(seen.into_iter().map(Value::from_cell).collect()))
            }
            other => Err(ScriptError::NoAttribute("series", other.to_string())),
        }
    }

    /// `.str` accessor: elementwise string operations; missing cells pass
    /// through untouched, non-string cells are a type fault.
    fn str_accessor_method(
        &mut self,
        s: Series,
        method: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, ScriptError> {
        no_kwargs(method, &kwargs)?;
        self.tick(s.len() as u64)?;
        let map_str = |s: Series, f: &dyn Fn(&str) -> Cell| -> Result<Series, ScriptError> {
            let cells = s
                .cells
                .into_iter()
                .map(|c| match c {
                    Cell::Str(text) => Ok(f(&text)),
                    missing if missing.is_missing() => Ok(missing),
                    other => Err(ScriptError::Type(format!(
                        ".str methods require string values, got {}",
                        other.type_name()
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Series::new(s.name, cells))
        };
        match method {
            "strip" => Ok(Value::Series(map_str(s, &|t| {
                Cell::Str(t.trim().to_string())
            })?)),
            "lower" => Ok(Value::Series(map_str(s, &|t| {
                Cell::Str(t.to_lowercase())
            })?)),
            "upper" => Ok(Value::Series(map_str(s, &|t| {
                Cell::Str(t.to_uppercase())
            })?)),
            "title" => Ok(Value::Series(map_str(s, &|t| Cell::Str(title_case(t)))?)),
            "len" => Ok(Value::Series(map_str(s, &|t| {
                Cell::Int(t.chars().count() as i64)
            })?)),
            "replace" => {
                arity("replace", &args, 2)?;
                let (Value::Str(from), Value::Str(to)) = (&args[0], &args[1]) else {
                    return Err(ScriptError::Argument(
                        "str.replace() requires two strings".to_string(),
                    ));
                };
                let from = from.clone();
                let to = to.clone();
                Ok(Value::Series(map_str(s, &|t| {
                    Cell::Str(t.replace(&from, &to))
                })?))
            }
            "contains" => {
                arity("contains", &args, 1)?;
                let Value::Str(pattern) = &args[0] else {
                    return Err(ScriptError::Argument(
                        "str.contains() requires a pattern".to_string(),
                    ));
                };
                let re = regex::Regex::new(pattern)
                    .map_err(|e| ScriptError::Regex(e.to_string()))?;
                let cells = s
                    .cells
                    .into_iter()
                    .map(|c| match c {
                        Cell::Str(text) => Ok(Cell::Bool(re.is_match(&text))),
                        missing if missing.is_missing() => Ok(Cell::Null),
                        other => Err(ScriptError::Type(format!(
                            ".str methods require string values, got {}",
                            other.type_name()
                        ))),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Series(Series::new(s.name, cells)))
            }
            other => Err(ScriptError::NoAttribute("str accessor", other.to_string())),
        }
    }

    fn string_method(
        &mut self,
        s: String,
        method: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, ScriptError> {
        no_kwargs(method, &kwargs)?;
        self.tick(s.len() as u64)?;
        match method {
            "strip" => Ok(Value::Str(s.trim().to_string())),
            "lower" => Ok(Value::Str(s.to_lowercase())),
            "upper" => Ok(Value::Str(s.to_uppercase())),
            "title" => Ok(Value::Str(title_case(&s))),
            "replace" => {
                arity("replace", &args, 2)?;
                let (Value::Str(from), Value::Str(to)) = (&args[0], &args[1]) else {
                    return Err(ScriptError::Argument(
                        "replace() requires two strings".to_string(),
                    ));
                };
                Ok(Value::Str(s.replace(from.as_str(), to)))
            }
            "split" => {
                let parts: Vec<Value> = match args.first() {
                    None => s.split_whitespace().map(|p| Value::Str(p.to_string())).collect(),
                    Some(Value::Str(sep)) => {
                        s.split(sep.as_str()).map(|p| Value::Str(p.to_string())).collect()
                    }
                    Some(other) => {
                        return Err(ScriptError::Argument(format!(
                            "split() separator must be a string, got {}",
                            other.type_name()
                        )))
                    }
                };
                Ok(Value::List(parts))
            }
            "join" => {
                arity("join", &args, 1)?;
                let Value::List(items) = &args[0] else {
                    return Err(ScriptError::Argument(
                        "join() requires a list".to_string(),
                    ));
                };
                let mut parts = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Str(part) => parts.push(part.clone()),
                        other => {
                            return Err(ScriptError::Type(format!(
                                "join() requires strings, got {}",
                                other.type_name()
                            )))
                        }
                    }
                }
                Ok(Value::Str(parts.join(&s)))
            }
            "startswith" | "endswith" => {
                arity(method, &args, 1)?;
                let Value::Str(prefix) = &args[0] else {
                    return Err(ScriptError::Argument(format!(
                        "{method}() requires a string"
                    )));
                };
                let result = if method == "startswith" {
                    s.starts_with(prefix.as_str())
                } else {
                    s.ends_with(prefix.as_str())
                };
                Ok(Value::Bool(result))
            }
            other => Err(ScriptError::NoAttribute("str", other.to_string())),
        }
    }

    pub(crate) fn call_builtin(
        &mut self,
        builtin: Builtin,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, ScriptError> {
        match builtin {
            Builtin::Print => {
                no_kwargs("print", &kwargs)?;
                let rendered: Vec<String> =
                    args.iter().map(|v| v.display_string()).collect();
                let line = rendered.join(" ");
                self.tick(line.len() as u64)?;
                self.env.write_output(&line);
                self.env.write_output("\n");
                Ok(Value::Null)
            }
            Builtin::Len => {
                no_kwargs("len", &kwargs)?;
                arity("len", &args, 1)?;
                let n = match &args[0] {
                    Value::Str(s) => s.chars().count(),
                    Value::List(items) => items.len(),
                    Value::Dict(entries) => entries.len(),
                    Value::Series(s) => s.len(),
                    Value::Frame(df) => df.row_count(),
                    other => {
                        return Err(ScriptError::Type(format!(
                            "object of type {} has no len()",
                            other.type_name()
                        )))
                    }
                };
                Ok(Value::Int(n as i64))
            }
            Builtin::Str => {
                arity("str", &args, 1)?;
                Ok(Value::Str(args[0].display_string()))
            }
            Builtin::Int => {
                arity("int", &args, 1)?;
                match &args[0] {
                    Value::Int(n) => Ok(Value::Int(*n)),
                    Value::Float(f) => Ok(Value::Int(*f as i64)),
                    Value::Bool(b) => Ok(Value::Int(if *b { 1 } else { 0 })),
                    Value::Str(s) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
                        ScriptError::Argument(format!("invalid int literal: '{s}'"))
                    }),
                    other => Err(ScriptError::Type(format!(
                        "cannot convert {} to int",
                        other.type_name()
                    ))),
                }
            }
            Builtin::Float => {
                arity("float", &args, 1)?;
                match &args[0] {
                    Value::Int(n) => Ok(Value::Float(*n as f64)),
                    Value::Float(f) => Ok(Value::Float(*f)),
                    Value::Bool(b) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
                    Value::Str(s) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
                        ScriptError::Argument(format!("invalid float literal: '{s}'"))
                    }),
                    other => Err(ScriptError::Type(format!(
                        "cannot convert {} to float",
                        other.type_name()
                    ))),
                }
            }
            Builtin::Bool => {
                arity("bool", &args, 1)?;
                Ok(Value::Bool(args[0].is_truthy()))
            }
            Builtin::Abs => {
                arity("abs", &args, 1)?;
                match &args[0] {
                    Value::Int(n) => Ok(Value::Int(n.abs())),
                    Value::Float(f) => Ok(Value::Float(f.abs())),
                    Value::Series(s) => {
                        self.tick(s.len() as u64)?;
                        let cells = s
                            .cells
                            .iter()
                            .map(|c| match c {
                                Cell::Int(n) => Ok(Cell::Int(n.abs())),
                                Cell::Float(f) => Ok(Cell::Float(f.abs())),
                                Cell::Null => Ok(Cell::Null),
                                other => Err(ScriptError::Type(format!(
                                    "bad operand for abs(): {}",
                                    other.type_name()
                                ))),
                            })
                            .collect::<Result<Vec<_>, _>>()?;
                        Ok(Value::Series(Series::new(s.name.clone(), cells)))
                    }
                    other => Err(ScriptError::Type(format!(
                        "bad operand for abs(): {}",
                        other.type_name()
                    ))),
                }
            }
            Builtin::Min | Builtin::Max => {
                let items = collect_scalars(builtin_name(builtin), &args)?;
                self.tick(items.len() as u64)?;
                pick_extreme(items, builtin == Builtin::Max)
            }
            Builtin::Sum => {
                arity("sum", &args, 1)?;
                let items = collect_scalars("sum", &args)?;
                self.tick(items.len() as u64)?;
                let mut total = Cell::Int(0);
                for cell in items {
                    if cell.is_missing() {
                        continue;
                    }
                    total = crate::interp::cell_binary(crate::ast::BinOp::Add, &total, &cell)?;
                }
                Ok(Value::from_cell(total))
            }
            Builtin::Round => {
                if args.is_empty() || args.len() > 2 {
                    return Err(ScriptError::Argument(
                        "round() takes 1 or 2 arguments".to_string(),
                    ));
                }
                let digits = match args.get(1) {
                    None => None,
                    Some(Value::Int(n)) => Some(*n),
                    Some(other) => {
                        return Err(ScriptError::Argument(format!(
                            "round() digits must be an int, got {}",
                            other.type_name()
                        )))
                    }
                };
                match &args[0] {
                    Value::Int(n) => Ok(Value::Int(*n)),
                    Value::Float(f) => match digits {
                        None => Ok(Value::Int(f.round() as i64)),
                        Some(d) => {
                            let factor = 10f64.powi(d as i32);
                            Ok(Value::Float((f * factor).round() / factor))
                        }
                    },
                    other => Err(ScriptError::Type(format!(
                        "cannot round {}",
                        other.type_name()
                    ))),
                }
            }
            Builtin::Sorted => {
                arity("sorted", &args, 1)?;
                let mut items = collect_scalars("sorted", &args)?;
                self.tick((items.len() as u64).saturating_mul(16))?;
                items.sort_by(|a, b| a.compare(b));
                let reverse = kwarg(&kwargs, "reverse").map(|v| v.is_truthy()).unwrap_or(false);
                if reverse {
                    items.reverse();
                }
                Ok(Value::List(items.into_iter().map(Value::from_cell).collect()))
            }
            Builtin::Range => {
                no_kwargs("range", &kwargs)?;
                let bound = |v: &Value| -> Result<i64, ScriptError> {
                    match v {
                        Value::Int(n) => Ok(*n),
                        other => Err(ScriptError::Argument(format!(
                            "range() requires ints, got {}",
                            other.type_name()
                        ))),
                    }
                };
                let (start, stop, step) = match args.len() {
                    1 => (0, bound(&args[0])?, 1),
                    2 => (bound(&args[0])?, bound(&args[1])?, 1),
                    3 => (bound(&args[0])?, bound(&args[1])?, bound(&args[2])?),
                    n => {
                        return Err(ScriptError::Argument(format!(
                            "range() takes 1 to 3 arguments, got {n}"
                        )))
                    }
                };
                if step == 0 {
                    return Err(ScriptError::Argument("range() step must not be zero".to_string()));
                }
                let mut items = Vec::new();
                let mut i = start;
                while (step > 0 && i < stop) || (step < 0 && i > stop) {
                    self.tick(1)?;
                    items.push(Value::Int(i));
                    i += step;
                }
                Ok(Value::List(items))
            }
        }
    }
}

fn builtin_name(b: Builtin) -> &'static str {
    match b {
        Builtin::Min => "min",
        Builtin::Max => "max",
        _ => "builtin",
    }
}

/// Accept either one iterable argument or several scalar arguments.
fn collect_scalars(what: &str, args: &[Value]) -> Result<Vec<Cell>, ScriptError> {
    if args.is_empty() {
        return Err(ScriptError::Argument(format!(
            "{what}() expected at least 1 argument"
        )));
    }
    if args.len() == 1 {
        match &args[0] {
            Value::List(items) => {
                return items
                    .iter()
                    .map(|v| {
                        v.to_cell().ok_or_else(|| {
                            ScriptError::Type(format!(
                                "{what}() requires scalar values, got {}",
                                v.type_name()
                            ))
                        })
                    })
                    .collect()
            }
            Value::Series(s) => return Ok(s.cells.clone()),
            _ => {}
        }
    }
    args.iter()
        .map(|v| {
            v.to_cell().ok_or_else(|| {
                ScriptError::Type(format!(
                    "{what}() requires scalar values, got {}",
                    v.type_name()
                ))
            })
        })
        .collect()
}

fn pick_extreme(items: Vec<Cell>, want_max: bool) -> Result<Value, ScriptError> {
    let mut best: Option<Cell> = None;
    for cell in items {
        if cell.is_missing() {
            continue;
        }
        best = Some(match best {
            None => cell,
            Some(current) => {
                let take = if want_max {
                    cell.compare(&current) == std::cmp::Ordering::Greater
                } else {
                    cell.compare(&current) == std::cmp::Ordering::Less
                };
                if take {
                    cell
                } else {
                    current
                }
            }
        });
    }
    best.map(Value::from_cell)
        .ok_or_else(|| ScriptError::Argument("empty sequence".to_string()))
}

fn series_aggregate(s: &Series, method: &str) -> Result<Value, ScriptError> {
    let present: Vec<&Cell> = s.cells.iter().filter(|c| !c.is_missing()).collect();
    if present.is_empty() {
        return Ok(Value::Null);
    }
    match method {
        "mean" | "sum" => {
            let mut total = 0f64;
            for cell in &present {
                total += cell.as_f64().ok_or_else(|| {
                    ScriptError::Type(format!(
                        "cannot aggregate {} values",
                        cell.type_name()
                    ))
                })?;
            }
            if method == "mean" {
                Ok(Value::Float(total / present.len() as f64))
            } else if present.iter().all(|c| matches!(c, Cell::Int(_) | Cell::Bool(_))) {
                Ok(Value::Int(total as i64))
            } else {
                Ok(Value::Float(total))
            }
        }
        "min" | "max" => pick_extreme(
            present.into_iter().cloned().collect(),
            method == "max",
        ),
        _ => unreachable!(),
    }
}

fn dict_method(
    entries: Vec<(String, Value)>,
    method: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<Value, ScriptError> {
    no_kwargs(method, &kwargs)?;
    match method {
        "keys" => Ok(Value::List(
            entries.into_iter().map(|(k, _)| Value::Str(k)).collect(),
        )),
        "values" => Ok(Value::List(entries.into_iter().map(|(_, v)| v).collect())),
        "get" => {
            let Some(Value::Str(key)) = args.first() else {
                return Err(ScriptError::Argument(
                    "get() requires a string key".to_string(),
                ));
            };
            let fallback = args.get(1).cloned().unwrap_or(Value::Null);
            Ok(entries
                .into_iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v)
                .unwrap_or(fallback))
        }
        other => Err(ScriptError::NoAttribute("dict", other.to_string())),
    }
}

fn coerce_cell(cell: Cell, kind: &str) -> Result<Cell, ScriptError> {
    if cell.is_missing() && kind != "str" {
        return Ok(Cell::Null);
    }
    match kind {
        "int" | "int64" => match &cell {
            Cell::Int(_) => Ok(cell),
            Cell::Float(f) => Ok(Cell::Int(*f as i64)),
            Cell::Bool(b) => Ok(Cell::Int(if *b { 1 } else { 0 })),
            Cell::Str(s) => s.trim().parse::<i64>().map(Cell::Int).map_err(|_| {
                ScriptError::Type(format!("cannot convert '{s}' to int"))
            }),
            other => Err(ScriptError::Type(format!(
                "cannot convert {} to int",
                other.type_name()
            ))),
        },
        "float" | "float64" => match &cell {
            Cell::Float(_) => Ok(cell),
            Cell::Int(n) => Ok(Cell::Float(*n as f64)),
            Cell::Bool(b) => Ok(Cell::Float(if *b { 1.0 } else { 0.0 })),
            Cell::Str(s) => s.trim().parse::<f64>().map(Cell::Float).map_err(|_| {
                ScriptError::Type(format!("cannot convert '{s}' to float"))
            }),
            other => Err(ScriptError::Type(format!(
                "cannot convert {} to float",
                other.type_name()
            ))),
        },
        "str" | "string" => Ok(Cell::Str(cell.display_string())),
        "bool" => match &cell {
            Cell::Bool(_) => Ok(cell),
            Cell::Int(n) => Ok(Cell::Bool(*n != 0)),
            Cell::Float(f) => Ok(Cell::Bool(*f != 0.0)),
            other => Err(ScriptError::Type(format!(
                "cannot convert {} to bool",
                other.type_name()
            ))),
        },
        other => Err(ScriptError::Argument(format!("unknown dtype '{other}'"))),
    }
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;
    for c in text.chars() {
        if c.is_alphanumeric() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
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

    fn messy() -> Dataset {
        Dataset::from_columns(vec![
            Column::new(
                "name",
                vec![
                    Cell::Str("  Alice ".into()),
                    Cell::Str("BOB".into()),
                    Cell::Null,
                ],
            ),
            Column::new("age", vec![Cell::Int(30), Cell::Null, Cell::Int(41)]),
        ])
        .unwrap()
    }

    #[test]
    fn dropna_then_count() {
        let env = run_script("df = df.dropna()\nprint(len(df))", messy());
        assert_eq!(env.output(), "1\n");
    }

    #[test]
    fn fillna_on_frame_and_series() {
        let env = run_script("df['age'] = df['age'].fillna(0)", messy());
        let df = env.produced_dataset().unwrap();
        assert!(df.column("age").unwrap().cells[1].same(&Cell::Int(0)));
    }

    #[test]
    fn rename_with_dict_kwarg() {
        let env = run_script("df = df.rename(columns={'age': 'years'})", messy());
        let df = env.produced_dataset().unwrap();
        assert!(df.has_column("years"));
        assert!(!df.has_column("age"));
    }

    #[test]
    fn sort_values_descending() {
        let env = run_script("df = df.sort_values('age', ascending=False)", messy());
        let df = env.produced_dataset().unwrap();
        assert!(df.column("age").unwrap().cells[0].same(&Cell::Int(41)));
    }

    #[test]
    fn str_accessor_cleanup() {
        let env = run_script(
            "df['name'] = df['name'].fillna('unknown')\ndf['name'] = df['name'].str.strip()\ndf['name'] = df['name'].str.lower()",
            messy(),
        );
        let df = env.produced_dataset().unwrap();
        assert!(df.column("name").unwrap().cells[0].same(&Cell::Str("alice".into())));
        assert!(df.column("name").unwrap().cells[1].same(&Cell::Str("bob".into())));
    }

    #[test]
    fn astype_conversion() {
        let env = run_script("df['age'] = df['age'].fillna(0).astype('float')", messy());
        let df = env.produced_dataset().unwrap();
        assert!(df.column("age").unwrap().cells[0].same(&Cell::Float(30.0)));
    }

    #[test]
    fn aggregates_skip_missing() {
        let env = run_script("print(df['age'].mean())\nprint(df['age'].sum())", messy());
        assert_eq!(env.output(), "35.5\n71\n");
    }

    #[test]
    fn builtin_conversions_and_math() {
        let env = run_script(
            "print(int('42'), float('2.5'), abs(-3), round(2.7), min(3, 1, 2), max([4, 9]))",
            messy(),
        );
        assert_eq!(env.output(), "42 2.5 3 3 1 9\n");
    }

    #[test]
    fn sorted_builtin() {
        let env = run_script("print(sorted([3, 1, 2]))", messy());
        assert_eq!(env.output(), "[1, 2, 3]\n");
    }

    #[test]
    fn drop_unknown_column_faults() {
        let policy = ScriptPolicy::default();
        let mut env = CapabilityEnv::build(&policy, &messy(), 1024);
        let stmts = parse("df = df.drop(columns=['nope'])").unwrap();
        let err = run(
            &mut env,
            &policy,
            &stmts,
            100_000,
            Instant::now() + Duration::from_secs(5),
        )
        .unwrap_err();
        assert!(matches!(err, ScriptError::UnknownColumn(_)));
    }

    #[test]
    fn string_methods_on_scalars() {
        let env = run_script(
            "s = '  Mixed Case  '\nprint(s.strip().lower())\nprint('-'.join(['a', 'b']))",
            messy(),
        );
        assert_eq!(env.output(), "mixed case\na-b\n");
    }
}
