//! Tree-walking evaluator for validated scripts.
//!
//! Execution is bounded two ways: every evaluated node spends fuel, and the
//! wall clock deadline is re-checked every few thousand steps. Either bound
//! tripping aborts the run with a resource fault, so a hostile or buggy
//! script cannot stall the host past the configured timeout.

use crate::ast::{BinOp, BoolOp, CmpOp, Expr, Stmt, Target, UnaryOp};
use crate::dataset::{Cell, DataError, Series};
use crate::env::CapabilityEnv;
use crate::policy::ScriptPolicy;
use crate::value::{ModuleRef, Value};
use std::time::Instant;
use thiserror::Error;

/// How many fuel ticks may pass between deadline checks.
const DEADLINE_CHECK_INTERVAL: u32 = 4096;

#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("name '{0}' is not defined")]
    UnknownName(String),

    #[error("column '{0}' not found")]
    UnknownColumn(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("division by zero")]
    ZeroDivision,

    #[error("{0} object has no attribute '{1}'")]
    NoAttribute(&'static str, String),

    #[error("{0} object is not callable")]
    NotCallable(&'static str),

    #[error("bad argument: {0}")]
    Argument(String),

    #[error("module '{0}' is not available in the sandbox")]
    ImportUnavailable(String),

    #[error("invalid regular expression: {0}")]
    Regex(String),

    #[error("length mismatch: {0}")]
    Length(String),

    #[error("execution exceeded the time limit")]
    DeadlineExceeded,

    #[error("execution exceeded the step limit")]
    FuelExhausted,
}

impl ScriptError {
    /// Resource faults map to a different outcome class than script bugs.
    pub fn is_resource_fault(&self) -> bool {
        matches!(
            self,
            ScriptError::DeadlineExceeded | ScriptError::FuelExhausted
        )
    }
}

impl From<DataError> for ScriptError {
    fn from(e: DataError) -> Self {
        match e {
            DataError::UnknownColumn(name) => ScriptError::UnknownColumn(name),
            other => ScriptError::Length(other.to_string()),
        }
    }
}

/// Run a statement list to completion inside `env`.
pub fn run(
    env: &mut CapabilityEnv,
    policy: &ScriptPolicy,
    stmts: &[Stmt],
    fuel: u64,
    deadline: Instant,
) -> Result<(), ScriptError> {
    let mut interp = Interp {
        env,
        policy,
        fuel,
        deadline,
        check: 0,
    };
    match interp.exec_block(stmts)? {
        Flow::Normal => Ok(()),
        Flow::Break | Flow::Continue => {
            Err(ScriptError::Type("'break' outside loop".to_string()))
        }
    }
}

pub(crate) enum Flow {
    Normal,
    Break,
    Continue,
}

pub(crate) struct Interp<'a> {
    pub(crate) env: &'a mut CapabilityEnv,
    pub(crate) policy: &'a ScriptPolicy,
    fuel: u64,
    deadline: Instant,
    check: u32,
}

impl<'a> Interp<'a> {
    /// Spend fuel and periodically re-check the wall clock.
    pub(crate) fn tick(&mut self, cost: u64) -> Result<(), ScriptError> {
        if self.fuel < cost {
            return Err(ScriptError::FuelExhausted);
        }
        self.fuel -= cost;
        self.check = self.check.saturating_add(cost.min(u32::MAX as u64) as u32);
        if self.check >= DEADLINE_CHECK_INTERVAL {
            self.check = 0;
            if Instant::now() >= self.deadline {
                return Err(ScriptError::DeadlineExceeded);
            }
        }
        Ok(())
    }

    fn exec_block(&mut self, stmts: &[Stmt]) -> Result<Flow, ScriptError> {
        for stmt in stmts {
            match self.exec_stmt(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Flow, ScriptError> {
        self.tick(1)?;
        match stmt {
            Stmt::Assign { target, value } => {
                let v = self.eval(value)?;
                self.assign(target, v)?;
            }
            Stmt::AugAssign { target, op, value } => {
                let current = self.read_target(target)?;
                let rhs = self.eval(value)?;
                let v = self.binary(*op, current, rhs)?;
                self.assign(target, v)?;
            }
            Stmt::Expr(e) => {
                self.eval(e)?;
            }
            Stmt::Import { module, alias, .. } => {
                let binding = alias.as_deref().unwrap_or(module);
                self.import_module(module, binding)?;
            }
            Stmt::FromImport { module, names, .. } => {
                if !self.policy.is_module_approved(module) {
                    return Err(ScriptError::ImportUnavailable(module.clone()));
                }
                let module_ref = ModuleRef::for_name(module)
                    .ok_or_else(|| ScriptError::ImportUnavailable(module.clone()))?;
                for name in names {
                    let value = self.module_attribute(module_ref, name)?;
                    self.env.set(name, value);
                }
            }
            Stmt::Delete { target } => self.delete(target)?,
            Stmt::If { branches, orelse } => {
                for (test, body) in branches {
                    if self.eval(test)?.is_truthy() {
                        return self.exec_block(body);
                    }
                }
                return self.exec_block(orelse);
            }
            Stmt::While { test, body } => loop {
                self.tick(1)?;
                if !self.eval(test)?.is_truthy() {
                    break;
                }
                match self.exec_block(body)? {
                    Flow::Break => break,
                    Flow::Continue | Flow::Normal => {}
                }
            },
            Stmt::For { var, iter, body } => {
                let iter_value = self.eval(iter)?;
                let items = self.iterate(iter_value)?;
                for item in items {
                    self.tick(1)?;
                    self.env.set(var, item);
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Continue | Flow::Normal => {}
                    }
                }
            }
            Stmt::Break { .. } => return Ok(Flow::Break),
            Stmt::Continue { .. } => return Ok(Flow::Continue),
            Stmt::Pass => {}
        }
        Ok(Flow::Normal)
    }

    fn import_module(&mut self, module: &str, binding: &str) -> Result<(), ScriptError> {
        if !self.policy.is_module_approved(module) {
            return Err(ScriptError::ImportUnavailable(module.to_string()));
        }
        let module_ref = ModuleRef::for_name(module)
            .ok_or_else(|| ScriptError::ImportUnavailable(module.to_string()))?;
        self.env.set(binding, Value::Module(module_ref));
        Ok(())
    }

    fn assign(&mut self, target: &Target, value: Value) -> Result<(), ScriptError> {
        match target {
            Target::Name { id, .. } => {
                self.env.set(id, value);
                Ok(())
            }
            Target::Subscript { obj, index, .. } => {
                // in-place mutation only makes sense on a named container
                let Expr::Name { id, .. } = obj else {
                    return Err(ScriptError::Type(
                        "subscript assignment requires a named container".to_string(),
                    ));
                };
                let index = self.eval(index)?;
                let mut container = self
                    .env
                    .get(id)
                    .cloned()
                    .ok_or_else(|| ScriptError::UnknownName(id.clone()))?;
                self.store_index(&mut container, index, value)?;
                self.env.set(id, container);
                Ok(())
            }
        }
    }

    fn store_index(
        &mut self,
        container: &mut Value,
        index: Value,
        value: Value,
    ) -> Result<(), ScriptError> {
        match container {
            Value::Frame(df) => {
                let Value::Str(name) = index else {
                    return Err(ScriptError::Type(
                        "column assignment requires a string key".to_string(),
                    ));
                };
                let rows = df.row_count();
                let cells = match value {
                    Value::Series(s) => {
                        if !df.columns().is_empty() && s.len() != rows {
                            return Err(ScriptError::Length(format!(
                                "cannot assign {} values to {} rows",
                                s.len(),
                                rows
                            )));
                        }
                        s.cells
                    }
                    Value::List(items) => {
                        let mut cells = Vec::with_capacity(items.len());
                        for item in items {
                            cells.push(item.to_cell().ok_or_else(|| {
                                ScriptError::Type(
                                    "column values must be scalars".to_string(),
                                )
                            })?);
                        }
                        cells
                    }
                    scalar => {
                        let cell = scalar.to_cell().ok_or_else(|| {
                            ScriptError::Type("column values must be scalars".to_string())
                        })?;
                        self.tick(rows as u64)?;
                        vec![cell; rows]
                    }
                };
                self.tick(cells.len() as u64)?;
                df.set_column(&name, cells)?;
                Ok(())
            }
            Value::Dict(entries) => {
                let Value::Str(key) = index else {
                    return Err(ScriptError::Type("dict keys must be strings".to_string()));
                };
                match entries.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, slot)) => *slot = value,
                    None => entries.push((key, value)),
                }
                Ok(())
            }
            Value::List(items) => {
                let i = self.list_index(&index, items.len())?;
                items[i] = value;
                Ok(())
            }
            other => Err(ScriptError::Type(format!(
                "{} does not support item assignment",
                other.type_name()
            ))),
        }
    }

    fn read_target(&mut self, target: &Target) -> Result<Value, ScriptError> {
        match target {
            Target::Name { id, .. } => self
                .env
                .get(id)
                .cloned()
                .ok_or_else(|| ScriptError::UnknownName(id.clone())),
            Target::Subscript { obj, index, line } => {
                let expr = Expr::Subscript {
                    obj: Box::new(obj.clone()),
                    index: Box::new(index.clone()),
                    line: *line,
                };
                self.eval(&expr)
            }
        }
    }

    fn delete(&mut self, target: &Target) -> Result<(), ScriptError> {
        match target {
            Target::Name { id, .. } => {
                self.env
                    .remove(id)
                    .map(|_| ())
                    .ok_or_else(|| ScriptError::UnknownName(id.clone()))
            }
            Target::Subscript { obj, index, .. } => {
                let Expr::Name { id, .. } = obj else {
                    return Err(ScriptError::Type(
                        "del requires a named container".to_string(),
                    ));
                };
                let index = self.eval(index)?;
                let mut container = self
                    .env
                    .get(id)
                    .cloned()
                    .ok_or_else(|| ScriptError::UnknownName(id.clone()))?;
                match (&mut container, index) {
                    (Value::Frame(df), Value::Str(name)) => {
                        if !df.has_column(&name) {
                            return Err(ScriptError::UnknownColumn(name));
                        }
                        *df = df.drop_columns(&[name]);
                    }
                    (Value::Dict(entries), Value::Str(key)) => {
                        let before = entries.len();
                        entries.retain(|(k, _)| *k != key);
                        if entries.len() == before {
                            return Err(ScriptError::Argument(format!("key '{key}' not found")));
                        }
                    }
                    (other, _) => {
                        return Err(ScriptError::Type(format!(
                            "cannot delete from {}",
                            other.type_name()
                        )))
                    }
                }
                self.env.set(id, container);
                Ok(())
            }
        }
    }

    pub(crate) fn eval(&mut self, expr: &Expr) -> Result<Value, ScriptError> {
        self.tick(1)?;
        match expr {
            Expr::Int(n) => Ok(Value::Int(*n)),
            Expr::Float(f) => Ok(Value::Float(*f)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::NoneLit => Ok(Value::Null),
            Expr::Name { id, .. } => self
                .env
                .get(id)
                .cloned()
                .ok_or_else(|| ScriptError::UnknownName(id.clone())),
            Expr::Attribute { obj, attr, .. } => {
                let value = self.eval(obj)?;
                self.attribute(value, attr)
            }
            Expr::Subscript { obj, index, .. } => {
                let container = self.eval(obj)?;
                let index = self.eval(index)?;
                self.load_index(container, index)
            }
            Expr::Call {
                func,
                args,
                kwargs,
                ..
            } => {
                let args = args
                    .iter()
                    .map(|a| self.eval(a))
                    .collect::<Result<Vec<_>, _>>()?;
                let mut kw = Vec::with_capacity(kwargs.len());
                for (name, expr) in kwargs {
                    kw.push((name.clone(), self.eval(expr)?));
                }
                match &**func {
                    // method call: dispatch on the receiver without treating
                    // the attribute as a first-class value
                    Expr::Attribute { obj, attr, .. } => {
                        let receiver = self.eval(obj)?;
                        self.call_method(receiver, attr, args, kw)
                    }
                    other => {
                        let callee = self.eval(other)?;
                        match callee {
                            Value::Builtin(b) => self.call_builtin(b, args, kw),
                            Value::Module(m) => {
                                Err(ScriptError::NotCallable(match m {
                                    ModuleRef::DatetimeClass | ModuleRef::DateClass => "class",
                                    _ => "module",
                                }))
                            }
                            v => Err(ScriptError::NotCallable(v.type_name())),
                        }
                    }
                }
            }
            Expr::Unary { op, operand } => {
                let v = self.eval(operand)?;
                self.unary(*op, v)
            }
            Expr::Binary {
                op, left, right, ..
            } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                self.binary(*op, l, r)
            }
            Expr::Compare {
                op, left, right, ..
            } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                self.compare(*op, l, r)
            }
            Expr::Logic { op, left, right } => {
                let l = self.eval(left)?;
                match op {
                    BoolOp::And => {
                        if l.is_truthy() {
                            self.eval(right)
                        } else {
                            Ok(l)
                        }
                    }
                    BoolOp::Or => {
                        if l.is_truthy() {
                            Ok(l)
                        } else {
                            self.eval(right)
                        }
                    }
                }
            }
            Expr::List(items) => {
                let values = items
                    .iter()
                    .map(|e| self.eval(e))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::List(values))
            }
            Expr::Dict(entries) => {
                let mut out = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    let key = match self.eval(k)? {
                        Value::Str(s) => s,
                        other => {
                            return Err(ScriptError::Type(format!(
                                "dict keys must be strings, got {}",
                                other.type_name()
                            )))
                        }
                    };
                    out.push((key, self.eval(v)?));
                }
                Ok(Value::Dict(out))
            }
        }
    }

    fn iterate(&mut self, value: Value) -> Result<Vec<Value>, ScriptError> {
        match value {
            Value::List(items) => Ok(items),
            Value::Series(s) => Ok(s.cells.into_iter().map(Value::from_cell).collect()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
            Value::Dict(entries) => Ok(entries.into_iter().map(|(k, _)| Value::Str(k)).collect()),
            Value::Frame(df) => Ok(df.column_names().into_iter().map(Value::Str).collect()),
            other => Err(ScriptError::Type(format!(
                "{} is not iterable",
                other.type_name()
            ))),
        }
    }

    pub(crate) fn list_index(&self, index: &Value, len: usize) -> Result<usize, ScriptError> {
        let Value::Int(i) = index else {
            return Err(ScriptError::Type("list indices must be integers".to_string()));
        };
        let i = *i;
        let resolved = if i < 0 { i + len as i64 } else { i };
        if resolved < 0 || resolved as usize >= len {
            return Err(ScriptError::Argument(format!("index {i} out of range")));
        }
        Ok(resolved as usize)
    }

    fn load_index(&mut self, container: Value, index: Value) -> Result<Value, ScriptError> {
        match container {
            Value::Frame(df) => match index {
                Value::Str(name) => {
                    self.tick(df.row_count() as u64)?;
                    Ok(Value::Series(df.series(&name)?))
                }
                Value::List(items) => {
                    let mut names = Vec::with_capacity(items.len());
                    for item in items {
                        match item {
                            Value::Str(s) => names.push(s),
                            other => {
                                return Err(ScriptError::Type(format!(
                                    "column list must contain strings, got {}",
                                    other.type_name()
                                )))
                            }
                        }
                    }
                    Ok(Value::Frame(df.select_columns(&names)?))
                }
                Value::Series(mask) => {
                    self.tick(df.row_count() as u64)?;
                    let bools = mask
                        .cells
                        .iter()
                        .map(|c| match c {
                            Cell::Bool(b) => Ok(*b),
                            other => Err(ScriptError::Type(format!(
                                "row mask must be boolean, got {}",
                                other.type_name()
                            ))),
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(Value::Frame(df.filter_rows(&bools)?))
                }
                other => Err(ScriptError::Type(format!(
                    "cannot index dataframe with {}",
                    other.type_name()
                ))),
            },
            Value::List(items) => {
                let i = self.list_index(&index, items.len())?;
                Ok(items[i].clone())
            }
            Value::Dict(entries) => {
                let Value::Str(key) = index else {
                    return Err(ScriptError::Type("dict keys must be strings".to_string()));
                };
                entries
                    .into_iter()
                    .find(|(k, _)| *k == key)
                    .map(|(_, v)| v)
                    .ok_or_else(|| ScriptError::Argument(format!("key '{key}' not found")))
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let i = self.list_index(&index, chars.len())?;
                Ok(Value::Str(chars[i].to_string()))
            }
            Value::Series(s) => {
                let i = self.list_index(&index, s.len())?;
                Ok(Value::from_cell(s.cells[i].clone()))
            }
            other => Err(ScriptError::Type(format!(
                "{} is not subscriptable",
                other.type_name()
            ))),
        }
    }

    fn unary(&mut self, op: UnaryOp, v: Value) -> Result<Value, ScriptError> {
        match op {
            UnaryOp::Not => Ok(Value::Bool(!v.is_truthy())),
            UnaryOp::Neg => match v {
                Value::Int(n) => Ok(Value::Int(-n)),
                Value::Float(f) => Ok(Value::Float(-f)),
                Value::Series(s) => {
                    self.tick(s.len() as u64)?;
                    let cells = s
                        .cells
                        .into_iter()
                        .map(|c| match c {
                            Cell::Int(n) => Ok(Cell::Int(-n)),
                            Cell::Float(f) => Ok(Cell::Float(-f)),
                            Cell::Null => Ok(Cell::Null),
                            other => Err(ScriptError::Type(format!(
                                "cannot negate {}",
                                other.type_name()
                            ))),
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(Value::Series(Series::new(s.name, cells)))
                }
                other => Err(ScriptError::Type(format!(
                    "cannot negate {}",
                    other.type_name()
                ))),
            },
        }
    }

    pub(crate) fn binary(&mut self, op: BinOp, l: Value, r: Value) -> Result<Value, ScriptError> {
        match (l, r) {
            (Value::Series(a), Value::Series(b)) => {
                if a.len() != b.len() {
                    return Err(ScriptError::Length(format!(
                        "series of length {} and {}",
                        a.len(),
                        b.len()
                    )));
                }
                self.tick(a.len() as u64)?;
                let cells = a
                    .cells
                    .iter()
                    .zip(&b.cells)
                    .map(|(x, y)| cell_binary(op, x, y))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Series(Series::new(a.name, cells)))
            }
            (Value::Series(a), scalar) => {
                let cell = scalar.to_cell().ok_or_else(|| {
                    ScriptError::Type(format!(
                        "cannot combine series with {}",
                        scalar.type_name()
                    ))
                })?;
                self.tick(a.len() as u64)?;
                let cells = a
                    .cells
                    .iter()
                    .map(|x| cell_binary(op, x, &cell))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Series(Series::new(a.name, cells)))
            }
            (scalar, Value::Series(b)) => {
                let cell = scalar.to_cell().ok_or_else(|| {
                    ScriptError::Type(format!(
                        "cannot combine {} with series",
                        scalar.type_name()
                    ))
                })?;
                self.tick(b.len() as u64)?;
                let cells = b
                    .cells
                    .iter()
                    .map(|y| cell_binary(op, &cell, y))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Series(Series::new(b.name, cells)))
            }
            (Value::Str(a), Value::Str(b)) if op == BinOp::Add => Ok(Value::Str(a + &b)),
            (Value::Str(a), Value::Int(n)) if op == BinOp::Mul => {
                let n = n.max(0) as usize;
                self.tick((a.len().max(1) * n) as u64)?;
                Ok(Value::Str(a.repeat(n)))
            }
            (Value::List(a), Value::List(b)) if op == BinOp::Add => {
                let mut out = a;
                out.extend(b);
                Ok(Value::List(out))
            }
            (l, r) => {
                let (a, b) = match (l.to_cell(), r.to_cell()) {
                    (Some(a), Some(b)) => (a, b),
                    _ => {
                        return Err(ScriptError::Type(format!(
                            "unsupported operands {} and {}",
                            l.type_name(),
                            r.type_name()
                        )))
                    }
                };
                Ok(Value::from_cell(cell_binary(op, &a, &b)?))
            }
        }
    }

    pub(crate) fn compare(&mut self, op: CmpOp, l: Value, r: Value) -> Result<Value, ScriptError> {
        // membership first: `x in container`
        if matches!(op, CmpOp::In | CmpOp::NotIn) {
            let contained = self.contains(&l, &r)?;
            let result = if op == CmpOp::In {
                contained
            } else {
                !contained
            };
            return Ok(Value::Bool(result));
        }
        match (l, r) {
            (Value::Series(a), Value::Series(b)) => {
                if a.len() != b.len() {
                    return Err(ScriptError::Length(format!(
                        "series of length {} and {}",
                        a.len(),
                        b.len()
                    )));
                }
                self.tick(a.len() as u64)?;
                let cells = a
                    .cells
                    .iter()
                    .zip(&b.cells)
                    .map(|(x, y)| Ok(Cell::Bool(cell_compare(op, x, y)?)))
                    .collect::<Result<Vec<_>, ScriptError>>()?;
                Ok(Value::Series(Series::new(a.name, cells)))
            }
            (Value::Series(a), scalar) => {
                let cell = scalar.to_cell().ok_or_else(|| {
                    ScriptError::Type(format!(
                        "cannot compare series with {}",
                        scalar.type_name()
                    ))
                })?;
                self.tick(a.len() as u64)?;
                let cells = a
                    .cells
                    .iter()
                    .map(|x| Ok(Cell::Bool(cell_compare(op, x, &cell)?)))
                    .collect::<Result<Vec<_>, ScriptError>>()?;
                Ok(Value::Series(Series::new(a.name, cells)))
            }
            (scalar, Value::Series(b)) => {
                let cell = scalar.to_cell().ok_or_else(|| {
                    ScriptError::Type(format!(
                        "cannot compare {} with series",
                        scalar.type_name()
                    ))
                })?;
                self.tick(b.len() as u64)?;
                let cells = b
                    .cells
                    .iter()
                    .map(|y| Ok(Cell::Bool(cell_compare(op, &cell, y)?)))
                    .collect::<Result<Vec<_>, ScriptError>>()?;
                Ok(Value::Series(Series::new(b.name, cells)))
            }
            (l, r) => {
                let (a, b) = match (l.to_cell(), r.to_cell()) {
                    (Some(a), Some(b)) => (a, b),
                    _ => {
                        return Err(ScriptError::Type(format!(
                            "cannot compare {} and {}",
                            l.type_name(),
                            r.type_name()
                        )))
                    }
                };
                Ok(Value::Bool(cell_compare(op, &a, &b)?))
            }
        }
    }

    fn contains(&mut self, needle: &Value, haystack: &Value) -> Result<bool, ScriptError> {
        match haystack {
            Value::Str(s) => match needle {
                Value::Str(sub) => Ok(s.contains(sub.as_str())),
                other => Err(ScriptError::Type(format!(
                    "cannot search for {} in str",
                    other.type_name()
                ))),
            },
            Value::List(items) => {
                for item in items {
                    if values_equal(item, needle) {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Value::Dict(entries) => match needle {
                Value::Str(key) => Ok(entries.iter().any(|(k, _)| k == key)),
                _ => Ok(false),
            },
            Value::Series(s) => {
                let Some(cell) = needle.to_cell() else {
                    return Ok(false);
                };
                self.tick(s.len() as u64)?;
                Ok(s.cells.iter().any(|c| c.same(&cell)))
            }
            Value::Frame(df) => match needle {
                Value::Str(name) => Ok(df.has_column(name)),
                _ => Ok(false),
            },
            other => Err(ScriptError::Type(format!(
                "{} is not a container",
                other.type_name()
            ))),
        }
    }
}

/// Scalar comparison used everywhere cells meet.
///
/// A missing operand never matches: orderings and equality against a hole
/// are false, the same way holes behave in arithmetic.
pub(crate) fn cell_compare(op: CmpOp, a: &Cell, b: &Cell) -> Result<bool, ScriptError> {
    use std::cmp::Ordering;
    if a.is_missing() || b.is_missing() {
        return Ok(op == CmpOp::NotEq);
    }
    // equality across mismatched types is false, not an error
    let ord: Option<Ordering> = match (a, b) {
        (Cell::Str(x), Cell::Str(y)) => Some(x.cmp(y)),
        (Cell::Bool(x), Cell::Bool(y)) => Some(x.cmp(y)),
        (Cell::Timestamp(x), Cell::Timestamp(y)) => Some(x.cmp(y)),
        (x, y) => match (x.as_f64(), y.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    };
    match op {
        CmpOp::Eq => Ok(ord == Some(Ordering::Equal)),
        CmpOp::NotEq => Ok(ord != Some(Ordering::Equal)),
        CmpOp::Lt | CmpOp::LtEq | CmpOp::Gt | CmpOp::GtEq => match ord {
            Some(ord) => Ok(match op {
                CmpOp::Lt => ord == Ordering::Less,
                CmpOp::LtEq => ord != Ordering::Greater,
                CmpOp::Gt => ord == Ordering::Greater,
                CmpOp::GtEq => ord != Ordering::Less,
                _ => unreachable!(),
            }),
            None => Err(ScriptError::Type(format!(
                "cannot order {} and {}",
                a.type_name(),
                b.type_name()
            ))),
        },
        CmpOp::In | CmpOp::NotIn => unreachable!("membership handled by caller"),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.to_cell(), b.to_cell()) {
        (Some(x), Some(y)) => x.same(&y),
        _ => false,
    }
}

/// Scalar arithmetic; a missing operand poisons the result, matching how
/// holes behave in the produced datasets.
pub(crate) fn cell_binary(op: BinOp, a: &Cell, b: &Cell) -> Result<Cell, ScriptError> {
    if a.is_missing() || b.is_missing() {
        return Ok(Cell::Null);
    }
    if let (Cell::Str(x), Cell::Str(y), BinOp::Add) = (a, b, op) {
        return Ok(Cell::Str(format!("{x}{y}")));
    }
    match (a, b) {
        (Cell::Int(x), Cell::Int(y)) => int_binary(op, *x, *y),
        (x, y) => {
            let (x, y) = match (x.as_f64(), y.as_f64()) {
                (Some(a), Some(b)) => (a, b),
                _ => {
                    return Err(ScriptError::Type(format!(
                        "unsupported operands {} and {}",
                        a.type_name(),
                        b.type_name()
                    )))
                }
            };
            float_binary(op, x, y)
        }
    }
}

fn int_binary(op: BinOp, x: i64, y: i64) -> Result<Cell, ScriptError> {
    let overflow = || ScriptError::Type("integer overflow".to_string());
    match op {
        BinOp::Add => x.checked_add(y).map(Cell::Int).ok_or_else(overflow),
        BinOp::Sub => x.checked_sub(y).map(Cell::Int).ok_or_else(overflow),
        BinOp::Mul => x.checked_mul(y).map(Cell::Int).ok_or_else(overflow),
        BinOp::Div => {
            if y == 0 {
                Err(ScriptError::ZeroDivision)
            } else {
                Ok(Cell::Float(x as f64 / y as f64))
            }
        }
        BinOp::FloorDiv => {
            if y == 0 {
                Err(ScriptError::ZeroDivision)
            } else {
                Ok(Cell::Int(x.div_euclid(y)))
            }
        }
        BinOp::Mod => {
            if y == 0 {
                Err(ScriptError::ZeroDivision)
            } else {
                Ok(Cell::Int(x.rem_euclid(y)))
            }
        }
        BinOp::Pow => {
            if y >= 0 && y <= u32::MAX as i64 {
                x.checked_pow(y as u32).map(Cell::Int).ok_or_else(overflow)
            } else {
                Ok(Cell::Float((x as f64).powf(y as f64)))
            }
        }
    }
}

fn float_binary(op: BinOp, x: f64, y: f64) -> Result<Cell, ScriptError> {
    match op {
        BinOp::Add => Ok(Cell::Float(x + y)),
        BinOp::Sub => Ok(Cell::Float(x - y)),
        BinOp::Mul => Ok(Cell::Float(x * y)),
        BinOp::Div => {
            if y == 0.0 {
                Err(ScriptError::ZeroDivision)
            } else {
                Ok(Cell::Float(x / y))
            }
        }
        BinOp::FloorDiv => {
            if y == 0.0 {
                Err(ScriptError::ZeroDivision)
            } else {
                Ok(Cell::Float((x / y).floor()))
            }
        }
        BinOp::Mod => {
            if y == 0.0 {
                Err(ScriptError::ZeroDivision)
            } else {
                Ok(Cell::Float(x.rem_euclid(y)))
            }
        }
        BinOp::Pow => Ok(Cell::Float(x.powf(y))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Column, Dataset};
    use crate::parser::parse;
    use std::time::Duration;

    fn run_script(script: &str, dataset: Dataset) -> Result<CapabilityEnv, ScriptError> {
        let policy = ScriptPolicy::default();
        let mut env = CapabilityEnv::build(&policy, &dataset, 64 * 1024);
        let stmts = parse(script).expect("script should parse");
        run(
            &mut env,
            &policy,
            &stmts,
            1_000_000,
            Instant::now() + Duration::from_secs(5),
        )?;
        Ok(env)
    }

    fn ints(vals: &[i64]) -> Vec<Cell> {
        vals.iter().map(|&v| Cell::Int(v)).collect()
    }

    fn one_column(vals: &[i64]) -> Dataset {
        Dataset::from_columns(vec![Column::new("x", ints(vals))]).unwrap()
    }

    #[test]
    fn column_scaling() {
        let env = run_script("df['x'] = df['x'] * 2", one_column(&[1, 2, 3])).unwrap();
        let df = env.produced_dataset().unwrap();
        let cells = &df.column("x").unwrap().cells;
        assert!(cells[0].same(&Cell::Int(2)));
        assert!(cells[1].same(&Cell::Int(4)));
        assert!(cells[2].same(&Cell::Int(6)));
    }

    #[test]
    fn print_goes_to_the_buffer() {
        let env = run_script("print('rows:', len(df))", one_column(&[1, 2, 3])).unwrap();
        assert_eq!(env.output(), "rows: 3\n");
    }

    #[test]
    fn boolean_mask_filtering() {
        let env = run_script("df = df[df['x'] > 1]", one_column(&[1, 2, 3])).unwrap();
        assert_eq!(env.produced_dataset().unwrap().row_count(), 2);
    }

    #[test]
    fn while_loop_with_break() {
        let env = run_script(
            "n = 0\nwhile True:\n    n = n + 1\n    if n >= 5:\n        break\nprint(n)",
            one_column(&[1]),
        )
        .unwrap();
        assert_eq!(env.output(), "5\n");
    }

    #[test]
    fn for_loop_accumulates() {
        let env = run_script(
            "total = 0\nfor v in [1, 2, 3, 4]:\n    total += v\nprint(total)",
            one_column(&[1]),
        )
        .unwrap();
        assert_eq!(env.output(), "10\n");
    }

    #[test]
    fn unbounded_loop_hits_the_deadline() {
        let policy = ScriptPolicy::default();
        let mut env = CapabilityEnv::build(&policy, &one_column(&[1]), 1024);
        let stmts = parse("while True:\n    pass").unwrap();
        let started = Instant::now();
        let err = run(
            &mut env,
            &policy,
            &stmts,
            u64::MAX / 2,
            Instant::now() + Duration::from_millis(50),
        )
        .unwrap_err();
        assert!(err.is_resource_fault());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn fuel_exhaustion_is_a_resource_fault() {
        let policy = ScriptPolicy::default();
        let mut env = CapabilityEnv::build(&policy, &one_column(&[1]), 1024);
        let stmts = parse("while True:\n    pass").unwrap();
        let err = run(
            &mut env,
            &policy,
            &stmts,
            1_000,
            Instant::now() + Duration::from_secs(30),
        )
        .unwrap_err();
        assert!(matches!(err, ScriptError::FuelExhausted));
    }

    #[test]
    fn unknown_name_is_a_runtime_fault() {
        let err = run_script("df = nonsense", one_column(&[1])).unwrap_err();
        assert!(matches!(err, ScriptError::UnknownName(_)));
        assert!(!err.is_resource_fault());
    }

    #[test]
    fn division_by_zero() {
        let err = run_script("x = 1 / 0", one_column(&[1])).unwrap_err();
        assert!(matches!(err, ScriptError::ZeroDivision));
    }

    #[test]
    fn comparisons_never_match_missing_cells() {
        let df = Dataset::from_columns(vec![Column::new(
            "age",
            vec![Cell::Int(25), Cell::Null, Cell::Int(40)],
        )])
        .unwrap();
        let env = run_script("df = df[df['age'] > 30]", df).unwrap();
        assert_eq!(env.produced_dataset().unwrap().row_count(), 1);
    }

    #[test]
    fn missing_cells_poison_arithmetic() {
        let df = Dataset::from_columns(vec![Column::new(
            "x",
            vec![Cell::Int(1), Cell::Null, Cell::Int(3)],
        )])
        .unwrap();
        let env = run_script("df['x'] = df['x'] + 1", df).unwrap();
        let cells = &env.produced_dataset().unwrap().column("x").unwrap().cells;
        assert!(cells[0].same(&Cell::Int(2)));
        assert!(cells[1].is_missing());
    }

    #[test]
    fn import_of_approved_module_binds_it() {
        let env = run_script(
            "import pandas as pd\ndf['x'] = pd.to_numeric(df['x'])",
            one_column(&[1, 2]),
        )
        .unwrap();
        assert_eq!(env.produced_dataset().unwrap().row_count(), 2);
    }

    #[test]
    fn import_of_unknown_module_fails_at_runtime() {
        let err = run_script("import json", one_column(&[1])).unwrap_err();
        assert!(matches!(err, ScriptError::ImportUnavailable(m) if m == "json"));
    }

    #[test]
    fn rebinding_df_to_a_non_frame_loses_the_dataset() {
        let env = run_script("df = 42", one_column(&[1])).unwrap();
        assert!(env.produced_dataset().is_none());
    }

    #[test]
    fn short_circuit_preserves_operand_values() {
        let env = run_script("x = None or 'fallback'\nprint(x)", one_column(&[1])).unwrap();
        assert_eq!(env.output(), "fallback\n");
    }

    #[test]
    fn del_removes_a_column() {
        let df = Dataset::from_columns(vec![
            Column::new("x", ints(&[1])),
            Column::new("y", ints(&[2])),
        ])
        .unwrap();
        let env = run_script("del df['y']", df).unwrap();
        let produced = env.produced_dataset().unwrap();
        assert!(!produced.has_column("y"));
        assert!(produced.has_column("x"));
    }

    #[test]
    fn scalar_broadcast_assignment() {
        let env = run_script("df['flag'] = True", one_column(&[1, 2, 3])).unwrap();
        let produced = env.produced_dataset().unwrap();
        assert_eq!(produced.column("flag").unwrap().cells.len(), 3);
    }

    #[test]
    fn membership_on_frame_checks_columns() {
        let env = run_script(
            "if 'x' in df:\n    print('yes')\nif 'z' not in df:\n    print('no z')",
            one_column(&[1]),
        )
        .unwrap();
        assert_eq!(env.output(), "yes\nno z\n");
    }
}
