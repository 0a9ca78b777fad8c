//! Syntax tree for the restricted transformation language.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    In,
    NotIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    NoneLit,
    Name {
        id: String,
        line: usize,
    },
    Attribute {
        obj: Box<Expr>,
        attr: String,
        line: usize,
    },
    Subscript {
        obj: Box<Expr>,
        index: Box<Expr>,
        line: usize,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
        line: usize,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
        line: usize,
    },
    Compare {
        op: CmpOp,
        left: Box<Expr>,
        right: Box<Expr>,
        line: usize,
    },
    Logic {
        op: BoolOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    List(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
}

/// Assignment targets: `name = …`, `obj[index] = …`.
#[derive(Debug, Clone)]
pub enum Target {
    Name { id: String, line: usize },
    Subscript { obj: Expr, index: Expr, line: usize },
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Assign {
        target: Target,
        value: Expr,
    },
    AugAssign {
        target: Target,
        op: BinOp,
        value: Expr,
    },
    Expr(Expr),
    Import {
        module: String,
        alias: Option<String>,
        line: usize,
    },
    FromImport {
        module: String,
        names: Vec<String>,
        line: usize,
    },
    Delete {
        target: Target,
    },
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        orelse: Vec<Stmt>,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
    },
    For {
        var: String,
        iter: Expr,
        body: Vec<Stmt>,
    },
    Break {
        line: usize,
    },
    Continue {
        line: usize,
    },
    Pass,
}

impl Expr {
    pub fn line(&self) -> usize {
        match self {
            Expr::Name { line, .. }
            | Expr::Attribute { line, .. }
            | Expr::Subscript { line, .. }
            | Expr::Call { line, .. }
            | Expr::Binary { line, .. }
            | Expr::Compare { line, .. } => *line,
            Expr::Unary { operand, .. } => operand.line(),
            Expr::Logic { left, .. } => left.line(),
            _ => 0,
        }
    }

    /// Visit this expression and every sub-expression, outermost first.
    pub fn walk(&self, f: &mut impl FnMut(&Expr)) {
        f(self);
        match self {
            Expr::Attribute { obj, .. } => obj.walk(f),
            Expr::Subscript { obj, index, .. } => {
                obj.walk(f);
                index.walk(f);
            }
            Expr::Call { func, args, kwargs, .. } => {
                func.walk(f);
                for a in args {
                    a.walk(f);
                }
                for (_, v) in kwargs {
                    v.walk(f);
                }
            }
            Expr::Unary { operand, .. } => operand.walk(f),
            Expr::Binary { left, right, .. }
            | Expr::Compare { left, right, .. }
            | Expr::Logic { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            Expr::List(items) => {
                for item in items {
                    item.walk(f);
                }
            }
            Expr::Dict(entries) => {
                for (k, v) in entries {
                    k.walk(f);
                    v.walk(f);
                }
            }
            _ => {}
        }
    }
}

impl Target {
    fn walk_exprs(&self, f: &mut impl FnMut(&Expr)) {
        if let Target::Subscript { obj, index, .. } = self {
            obj.walk(f);
            index.walk(f);
        }
    }
}

/// Visit every statement in a tree, depth first.
pub fn walk_stmts<'a>(stmts: &'a [Stmt], f: &mut impl FnMut(&'a Stmt)) {
    for stmt in stmts {
        f(stmt);
        match stmt {
            Stmt::If { branches, orelse } => {
                for (_, body) in branches {
                    walk_stmts(body, f);
                }
                walk_stmts(orelse, f);
            }
            Stmt::While { body, .. } | Stmt::For { body, .. } => walk_stmts(body, f),
            _ => {}
        }
    }
}

/// Visit every expression reachable from a statement list.
pub fn walk_exprs(stmts: &[Stmt], f: &mut impl FnMut(&Expr)) {
    walk_stmts(stmts, &mut |stmt| match stmt {
        Stmt::Assign { target, value } | Stmt::AugAssign { target, value, .. } => {
            target.walk_exprs(&mut *f);
            value.walk(&mut *f);
        }
        Stmt::Expr(e) => e.walk(&mut *f),
        Stmt::Delete { target } => target.walk_exprs(&mut *f),
        Stmt::If { branches, .. } => {
            for (test, _) in branches {
                test.walk(&mut *f);
            }
        }
        Stmt::While { test, .. } => test.walk(&mut *f),
        Stmt::For { iter, .. } => iter.walk(&mut *f),
        _ => {}
    });
}
