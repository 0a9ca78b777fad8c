//! Recursive-descent parser over the token stream.
//!
//! One statement per logical line; blocks are `Colon Newline Indent … Dedent`.
//! Operator precedence follows the source language: `or` < `and` < `not` <
//! comparison < additive < multiplicative < unary minus < power < postfix.

use crate::ast::{BinOp, BoolOp, CmpOp, Expr, Stmt, Target, UnaryOp};
use crate::lexer::{tokenize, LexError, Tok, Token};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error("line {0}: {1}")]
    Syntax(usize, String),
}

/// Hard cap on expression nesting; keeps a hostile script from blowing the
/// stack during the recursive descent.
const MAX_EXPR_DEPTH: usize = 200;

/// Parse a whole script into a statement list.
pub fn parse(source: &str) -> Result<Vec<Stmt>, ParseError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    parser.program()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].tok
    }

    fn line(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].line
    }

    fn bump(&mut self) -> Tok {
        let tok = self.tokens[self.pos.min(self.tokens.len() - 1)].tok.clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, want: &Tok) -> bool {
        if self.peek() == want {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, want: Tok, what: &str) -> Result<(), ParseError> {
        if self.eat(&want) {
            Ok(())
        } else {
            Err(self.err(format!("expected {what}, found {:?}", self.peek())))
        }
    }

    fn err(&self, message: String) -> ParseError {
        ParseError::Syntax(self.line(), message)
    }

    fn program(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut stmts = Vec::new();
        while !matches!(self.peek(), Tok::Eof) {
            if self.eat(&Tok::Newline) {
                continue;
            }
            stmts.push(self.statement()?);
        }
        Ok(stmts)
    }

    /// A block after a colon: newline, indent, statements, dedent.
    fn block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(Tok::Colon, "':'")?;
        self.expect(Tok::Newline, "newline after ':'")?;
        self.expect(Tok::Indent, "an indented block")?;
        let mut stmts = Vec::new();
        while !matches!(self.peek(), Tok::Dedent | Tok::Eof) {
            if self.eat(&Tok::Newline) {
                continue;
            }
            stmts.push(self.statement()?);
        }
        self.expect(Tok::Dedent, "end of block")?;
        Ok(stmts)
    }

    fn end_of_statement(&mut self) -> Result<(), ParseError> {
        if matches!(self.peek(), Tok::Eof | Tok::Dedent) {
            return Ok(());
        }
        self.expect(Tok::Newline, "end of statement")
    }

    fn statement(&mut self) -> Result<Stmt, ParseError> {
        let line = self.line();
        match self.peek().clone() {
            Tok::Import => {
                self.bump();
                let module = self.dotted_name()?;
                let alias = if self.eat(&Tok::As) {
                    Some(self.name_token()?)
                } else {
                    None
                };
                self.end_of_statement()?;
                Ok(Stmt::Import {
                    module,
                    alias,
                    line,
                })
            }
            Tok::From => {
                self.bump();
                let module = self.dotted_name()?;
                self.expect(Tok::Import, "'import'")?;
                let mut names = vec![self.name_token()?];
                while self.eat(&Tok::Comma) {
                    names.push(self.name_token()?);
                }
                self.end_of_statement()?;
                Ok(Stmt::FromImport {
                    module,
                    names,
                    line,
                })
            }
            Tok::If => {
                self.bump();
                let mut branches = Vec::new();
                let test = self.expression()?;
                branches.push((test, self.block()?));
                let mut orelse = Vec::new();
                loop {
                    if self.eat(&Tok::Elif) {
                        let test = self.expression()?;
                        branches.push((test, self.block()?));
                    } else if self.eat(&Tok::Else) {
                        orelse = self.block()?;
                        break;
                    } else {
                        break;
                    }
                }
                Ok(Stmt::If { branches, orelse })
            }
            Tok::While => {
                self.bump();
                let test = self.expression()?;
                let body = self.block()?;
                Ok(Stmt::While { test, body })
            }
            Tok::For => {
                self.bump();
                let var = self.name_token()?;
                self.expect(Tok::In, "'in'")?;
                let iter = self.expression()?;
                let body = self.block()?;
                Ok(Stmt::For { var, iter, body })
            }
            Tok::Pass => {
                self.bump();
                self.end_of_statement()?;
                Ok(Stmt::Pass)
            }
            Tok::Break => {
                self.bump();
                self.end_of_statement()?;
                Ok(Stmt::Break { line })
            }
            Tok::Continue => {
                self.bump();
                self.end_of_statement()?;
                Ok(Stmt::Continue { line })
            }
            Tok::Del => {
                self.bump();
                let expr = self.expression()?;
                let target = self.as_target(expr)?;
                self.end_of_statement()?;
                Ok(Stmt::Delete { target })
            }
            _ => self.simple_statement(),
        }
    }

    /// Assignment, augmented assignment, or a bare expression.
    fn simple_statement(&mut self) -> Result<Stmt, ParseError> {
        let expr = self.expression()?;
        let stmt = if self.eat(&Tok::Eq) {
            let value = self.expression()?;
            Stmt::Assign {
                target: self.as_target(expr)?,
                value,
            }
        } else if let Some(op) = self.aug_op() {
            let value = self.expression()?;
            Stmt::AugAssign {
                target: self.as_target(expr)?,
                op,
                value,
            }
        } else {
            Stmt::Expr(expr)
        };
        self.end_of_statement()?;
        Ok(stmt)
    }

    fn aug_op(&mut self) -> Option<BinOp> {
        let op = match self.peek() {
            Tok::PlusEq => BinOp::Add,
            Tok::MinusEq => BinOp::Sub,
            Tok::StarEq => BinOp::Mul,
            Tok::SlashEq => BinOp::Div,
            _ => return None,
        };
        self.bump();
        Some(op)
    }

    fn as_target(&self, expr: Expr) -> Result<Target, ParseError> {
        match expr {
            Expr::Name { id, line } => Ok(Target::Name { id, line }),
            Expr::Subscript { obj, index, line } => Ok(Target::Subscript {
                obj: *obj,
                index: *index,
                line,
            }),
            other => Err(ParseError::Syntax(
                other.line(),
                "cannot assign to this expression".to_string(),
            )),
        }
    }

    fn dotted_name(&mut self) -> Result<String, ParseError> {
        let mut name = self.name_token()?;
        while self.eat(&Tok::Dot) {
            name.push('.');
            name.push_str(&self.name_token()?);
        }
        Ok(name)
    }

    fn name_token(&mut self) -> Result<String, ParseError> {
        match self.bump() {
            Tok::Name(s) => Ok(s),
            other => Err(self.err(format!("expected a name, found {:?}", other))),
        }
    }

    fn expression(&mut self) -> Result<Expr, ParseError> {
        if self.depth >= MAX_EXPR_DEPTH {
            return Err(self.err("expression nesting too deep".to_string()));
        }
        self.depth += 1;
        let result = self.or_expr();
        self.depth -= 1;
        result
    }

    fn or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.and_expr()?;
        while self.eat(&Tok::Or) {
            let right = self.and_expr()?;
            left = Expr::Logic {
                op: BoolOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.not_expr()?;
        while self.eat(&Tok::And) {
            let right = self.not_expr()?;
            left = Expr::Logic {
                op: BoolOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&Tok::Not) {
            if self.depth >= MAX_EXPR_DEPTH {
                return Err(self.err("expression nesting too deep".to_string()));
            }
            self.depth += 1;
            let operand = self.not_expr();
            self.depth -= 1;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand?),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let left = self.additive()?;
        let line = self.line();
        let op = match self.peek() {
            Tok::EqEq => Some(CmpOp::Eq),
            Tok::NotEq => Some(CmpOp::NotEq),
            Tok::Lt => Some(CmpOp::Lt),
            Tok::LtEq => Some(CmpOp::LtEq),
            Tok::Gt => Some(CmpOp::Gt),
            Tok::GtEq => Some(CmpOp::GtEq),
            Tok::In => Some(CmpOp::In),
            Tok::Not => Some(CmpOp::NotIn),
            _ => None,
        };
        let Some(op) = op else { return Ok(left) };
        if op == CmpOp::NotIn {
            self.bump();
            self.expect(Tok::In, "'in' after 'not'")?;
        } else {
            self.bump();
        }
        let right = self.additive()?;
        Ok(Expr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
            line,
        })
    }

    fn additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.multiplicative()?;
        loop {
            let line = self.line();
            let op = match self.peek() {
                Tok::Plus => BinOp::Add,
                Tok::Minus => BinOp::Sub,
                _ => break,
            };
            self.bump();
            let right = self.multiplicative()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                line,
            };
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.unary()?;
        loop {
            let line = self.line();
            let op = match self.peek() {
                Tok::Star => BinOp::Mul,
                Tok::Slash => BinOp::Div,
                Tok::DoubleSlash => BinOp::FloorDiv,
                Tok::Percent => BinOp::Mod,
                _ => break,
            };
            self.bump();
            let right = self.unary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                line,
            };
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&Tok::Minus) {
            if self.depth >= MAX_EXPR_DEPTH {
                return Err(self.err("expression nesting too deep".to_string()));
            }
            self.depth += 1;
            let operand = self.unary();
            self.depth -= 1;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand?),
            });
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, ParseError> {
        let base = self.postfix()?;
        if self.eat(&Tok::DoubleStar) {
            let line = base.line();
            // right associative
            let exp = self.unary()?;
            return Ok(Expr::Binary {
                op: BinOp::Pow,
                left: Box::new(base),
                right: Box::new(exp),
                line,
            });
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.atom()?;
        loop {
            let line = self.line();
            match self.peek() {
                Tok::Dot => {
                    self.bump();
                    let attr = self.name_token()?;
                    expr = Expr::Attribute {
                        obj: Box::new(expr),
                        attr,
                        line,
                    };
                }
                Tok::LBracket => {
                    self.bump();
                    let index = self.expression()?;
                    self.expect(Tok::RBracket, "']'")?;
                    expr = Expr::Subscript {
                        obj: Box::new(expr),
                        index: Box::new(index),
                        line,
                    };
                }
                Tok::LParen => {
                    self.bump();
                    let (args, kwargs) = self.call_arguments()?;
                    expr = Expr::Call {
                        func: Box::new(expr),
                        args,
                        kwargs,
                        line,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn call_arguments(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), ParseError> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        loop {
            if self.eat(&Tok::RParen) {
                return Ok((args, kwargs));
            }
            // keyword argument: Name '=' expr
            if let Tok::Name(name) = self.peek().clone() {
                if self.tokens.get(self.pos + 1).map(|t| &t.tok) == Some(&Tok::Eq) {
                    self.bump();
                    self.bump();
                    let value = self.expression()?;
                    kwargs.push((name, value));
                    if !self.eat(&Tok::Comma) {
                        self.expect(Tok::RParen, "')'")?;
                        return Ok((args, kwargs));
                    }
                    continue;
                }
            }
            if !kwargs.is_empty() {
                return Err(self.err("positional argument after keyword argument".to_string()));
            }
            args.push(self.expression()?);
            if !self.eat(&Tok::Comma) {
                self.expect(Tok::RParen, "')'")?;
                return Ok((args, kwargs));
            }
        }
    }

    fn atom(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        match self.bump() {
            Tok::Int(n) => Ok(Expr::Int(n)),
            Tok::Float(f) => Ok(Expr::Float(f)),
            Tok::Str(s) => Ok(Expr::Str(s)),
            Tok::True => Ok(Expr::Bool(true)),
            Tok::False => Ok(Expr::Bool(false)),
            Tok::None => Ok(Expr::NoneLit),
            Tok::Name(id) => Ok(Expr::Name { id, line }),
            Tok::LParen => {
                let inner = self.expression()?;
                self.expect(Tok::RParen, "')'")?;
                Ok(inner)
            }
            Tok::LBracket => {
                let mut items = Vec::new();
                loop {
                    if self.eat(&Tok::RBracket) {
                        break;
                    }
                    items.push(self.expression()?);
                    if !self.eat(&Tok::Comma) {
                        self.expect(Tok::RBracket, "']'")?;
                        break;
                    }
                }
                Ok(Expr::List(items))
            }
            Tok::LBrace => {
                let mut entries = Vec::new();
                loop {
                    if self.eat(&Tok::RBrace) {
                        break;
                    }
                    let key = self.expression()?;
                    self.expect(Tok::Colon, "':' in dict entry")?;
                    let value = self.expression()?;
                    entries.push((key, value));
                    if !self.eat(&Tok::Comma) {
                        self.expect(Tok::RBrace, "'}'")?;
                        break;
                    }
                }
                Ok(Expr::Dict(entries))
            }
            other => Err(self.err(format!("unexpected {:?}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_scaling_script() {
        let stmts = parse("df['x'] = df['x'] * 2").unwrap();
        assert_eq!(stmts.len(), 1);
        match &stmts[0] {
            Stmt::Assign {
                target: Target::Subscript { .. },
                value: Expr::Binary { op: BinOp::Mul, .. },
            } => {}
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn method_call_rebinding() {
        let stmts = parse("df = df.dropna()").unwrap();
        match &stmts[0] {
            Stmt::Assign {
                target: Target::Name { id, .. },
                value: Expr::Call { func, .. },
            } => {
                assert_eq!(id, "df");
                assert!(matches!(&**func, Expr::Attribute { attr, .. } if attr == "dropna"));
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn import_forms() {
        let stmts = parse("import os\nfrom os import path\nimport pandas as pd").unwrap();
        assert!(matches!(&stmts[0], Stmt::Import { module, .. } if module == "os"));
        assert!(
            matches!(&stmts[1], Stmt::FromImport { module, names, .. } if module == "os" && names == &["path".to_string()])
        );
        assert!(
            matches!(&stmts[2], Stmt::Import { module, alias: Some(a), .. } if module == "pandas" && a == "pd")
        );
    }

    #[test]
    fn keyword_arguments() {
        let stmts = parse("df = df.sort_values('x', ascending=False)").unwrap();
        match &stmts[0] {
            Stmt::Assign {
                value: Expr::Call { args, kwargs, .. },
                ..
            } => {
                assert_eq!(args.len(), 1);
                assert_eq!(kwargs.len(), 1);
                assert_eq!(kwargs[0].0, "ascending");
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn nested_blocks() {
        let src = "while True:\n    if x > 1:\n        break\n    x = x + 1\n";
        let stmts = parse(src).unwrap();
        match &stmts[0] {
            Stmt::While { body, .. } => assert_eq!(body.len(), 2),
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn comparison_chain_not_in() {
        let stmts = parse("ok = 'a' not in names").unwrap();
        match &stmts[0] {
            Stmt::Assign {
                value: Expr::Compare { op: CmpOp::NotIn, .. },
                ..
            } => {}
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn syntax_error_carries_line() {
        let err = parse("x = 1\ny = = 2").unwrap_err();
        match err {
            ParseError::Syntax(line, _) => assert_eq!(line, 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn multiline_dict_argument() {
        let src = "df = df.rename(columns={\n    'old': 'new',\n    'a': 'b'\n})";
        assert!(parse(src).is_ok());
    }

    #[test]
    fn pathological_nesting_is_rejected_not_a_crash() {
        let src = format!("x = {}1{}", "(".repeat(5000), ")".repeat(5000));
        assert!(parse(&src).is_err());
        let minuses = format!("x = {}1", "-".repeat(5000));
        assert!(parse(&minuses).is_err());
    }

    #[test]
    fn augmented_assignment() {
        let stmts = parse("total += 1").unwrap();
        assert!(matches!(
            &stmts[0],
            Stmt::AugAssign { op: BinOp::Add, .. }
        ));
    }
}
