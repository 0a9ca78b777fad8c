//! Indentation-aware tokenizer for the script surface syntax.
//!
//! Produces a flat token stream with explicit `Newline`/`Indent`/`Dedent`
//! markers so the parser can treat blocks structurally. Newlines inside
//! brackets are plain whitespace, matching the source language's implicit
//! line joining.

use std::iter::Peekable;
use std::str::Chars;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum LexError {
    #[error("line {0}: unterminated string literal")]
    UnterminatedString(usize),

    #[error("line {0}: invalid number '{1}'")]
    InvalidNumber(usize, String),

    #[error("line {0}: inconsistent indentation")]
    BadIndent(usize),

    #[error("line {0}: unexpected character '{1}'")]
    UnexpectedChar(usize, char),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Newline,
    Indent,
    Dedent,
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    // keywords
    Import,
    From,
    If,
    Elif,
    Else,
    While,
    For,
    In,
    Not,
    And,
    Or,
    True,
    False,
    None,
    Pass,
    Break,
    Continue,
    As,
    Del,
    // punctuation and operators
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Percent,
    DoubleStar,
    Eq,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Eof,
}

/// One token plus the line it started on.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

fn keyword(word: &str) -> Option<Tok> {
    match word {
        "import" => Some(Tok::Import),
        "from" => Some(Tok::From),
        "if" => Some(Tok::If),
        "elif" => Some(Tok::Elif),
        "else" => Some(Tok::Else),
        "while" => Some(Tok::While),
        "for" => Some(Tok::For),
        "in" => Some(Tok::In),
        "not" => Some(Tok::Not),
        "and" => Some(Tok::And),
        "or" => Some(Tok::Or),
        "True" => Some(Tok::True),
        "False" => Some(Tok::False),
        "None" => Some(Tok::None),
        "pass" => Some(Tok::Pass),
        "break" => Some(Tok::Break),
        "continue" => Some(Tok::Continue),
        "as" => Some(Tok::As),
        "del" => Some(Tok::Del),
        _ => None,
    }
}

/// Tokenize a whole script.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    let mut lexer = Lexer::new(source);
    lexer.run()?;
    Ok(lexer.tokens)
}

struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    tokens: Vec<Token>,
    indents: Vec<usize>,
    line: usize,
    bracket_depth: usize,
    at_line_start: bool,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            tokens: Vec::new(),
            indents: vec![0],
            line: 1,
            bracket_depth: 0,
            at_line_start: true,
        }
    }

    fn push(&mut self, tok: Tok) {
        self.tokens.push(Token {
            tok,
            line: self.line,
        });
    }

    fn run(&mut self) -> Result<(), LexError> {
        loop {
            if self.at_line_start && self.bracket_depth == 0 {
                if !self.handle_indentation()? {
                    break;
                }
            }
            let Some(&c) = self.chars.peek() else { break };
            match c {
                ' ' | '\t' => {
                    self.chars.next();
                }
                '#' => {
                    while let Some(&nc) = self.chars.peek() {
                        if nc == '\n' {
                            break;
                        }
                        self.chars.next();
                    }
                }
                '\r' => {
                    self.chars.next();
                }
                '\n' => {
                    self.chars.next();
                    self.line += 1;
                    if self.bracket_depth == 0 {
                        // collapse runs of blank lines into one newline token
                        if !matches!(
                            self.tokens.last().map(|t| &t.tok),
                            Some(Tok::Newline) | Some(Tok::Indent) | Some(Tok::Dedent) | Option::None
                        ) {
                            self.push(Tok::Newline);
                        }
                        self.at_line_start = true;
                    }
                }
                '\'' | '"' => self.string(c)?,
                _ if c.is_ascii_digit() => self.number()?,
                _ if c.is_alphabetic() || c == '_' => self.word(),
                _ => self.operator(c)?,
            }
        }

        if !matches!(
            self.tokens.last().map(|t| &t.tok),
            Some(Tok::Newline) | Option::None
        ) {
            self.push(Tok::Newline);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent);
        }
        self.push(Tok::Eof);
        Ok(())
    }

    /// Measure leading whitespace and emit indent/dedent tokens. Returns
    /// false at end of input.
    fn handle_indentation(&mut self) -> Result<bool, LexError> {
        loop {
            let mut width = 0usize;
            while let Some(&c) = self.chars.peek() {
                match c {
                    ' ' => {
                        width += 1;
                        self.chars.next();
                    }
                    '\t' => {
                        width += 4;
                        self.chars.next();
                    }
                    _ => break,
                }
            }
            match self.chars.peek() {
                Option::None => return Ok(false),
                Some('\n') => {
                    self.chars.next();
                    self.line += 1;
                    continue; // blank line, re-measure
                }
                Some('\r') => {
                    self.chars.next();
                    continue;
                }
                Some('#') => {
                    while let Some(&nc) = self.chars.peek() {
                        if nc == '\n' {
                            break;
                        }
                        self.chars.next();
                    }
                    continue;
                }
                Some(_) => {
                    let current = *self.indents.last().unwrap();
                    if width > current {
                        self.indents.push(width);
                        self.push(Tok::Indent);
                    } else if width < current {
                        while *self.indents.last().unwrap() > width {
                            self.indents.pop();
                            self.push(Tok::Dedent);
                        }
                        if *self.indents.last().unwrap() != width {
                            return Err(LexError::BadIndent(self.line));
                        }
                    }
                    self.at_line_start = false;
                    return Ok(true);
                }
            }
        }
    }

    fn string(&mut self, quote: char) -> Result<(), LexError> {
        self.chars.next();
        let mut s = String::new();
        let mut escaped = false;
        while let Some(c) = self.chars.next() {
            if escaped {
                match c {
                    'n' => s.push('\n'),
                    't' => s.push('\t'),
                    'r' => s.push('\r'),
                    '\\' => s.push('\\'),
                    '\'' => s.push('\''),
                    '"' => s.push('"'),
                    other => {
                        s.push('\\');
                        s.push(other);
                    }
                }
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == quote {
                self.push(Tok::Str(s));
                return Ok(());
            } else if c == '\n' {
                return Err(LexError::UnterminatedString(self.line));
            } else {
                s.push(c);
            }
        }
        Err(LexError::UnterminatedString(self.line))
    }

    fn number(&mut self) -> Result<(), LexError> {
        let mut s = String::new();
        let mut is_float = false;
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() {
                s.push(c);
                self.chars.next();
            } else if c == '.' && !is_float {
                // a trailing dot followed by a letter is attribute access on
                // an int literal, which the grammar does not allow anyway
                is_float = true;
                s.push(c);
                self.chars.next();
            } else if c == '_' {
                self.chars.next();
            } else {
                break;
            }
        }
        if is_float {
            let f: f64 = s
                .parse()
                .map_err(|_| LexError::InvalidNumber(self.line, s.clone()))?;
            self.push(Tok::Float(f));
        } else {
            let n: i64 = s
                .parse()
                .map_err(|_| LexError::InvalidNumber(self.line, s.clone()))?;
            self.push(Tok::Int(n));
        }
        Ok(())
    }

    fn word(&mut self) {
        let mut s = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                s.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        match keyword(&s) {
            Some(tok) => self.push(tok),
            Option::None => self.push(Tok::Name(s)),
        }
    }

    fn operator(&mut self, c: char) -> Result<(), LexError> {
        self.chars.next();
        let next_is = |chars: &mut Peekable<Chars>, want: char| {
            if chars.peek() == Some(&want) {
                chars.next();
                true
            } else {
                false
            }
        };
        let tok = match c {
            '+' => {
                if next_is(&mut self.chars, '=') {
                    Tok::PlusEq
                } else {
                    Tok::Plus
                }
            }
            '-' => {
                if next_is(&mut self.chars, '=') {
                    Tok::MinusEq
                } else {
                    Tok::Minus
                }
            }
            '*' => {
                if next_is(&mut self.chars, '*') {
                    Tok::DoubleStar
                } else if next_is(&mut self.chars, '=') {
                    Tok::StarEq
                } else {
                    Tok::Star
                }
            }
            '/' => {
                if next_is(&mut self.chars, '/') {
                    Tok::DoubleSlash
                } else if next_is(&mut self.chars, '=') {
                    Tok::SlashEq
                } else {
                    Tok::Slash
                }
            }
            '%' => Tok::Percent,
            '=' => {
                if next_is(&mut self.chars, '=') {
                    Tok::EqEq
                } else {
                    Tok::Eq
                }
            }
            '!' => {
                if next_is(&mut self.chars, '=') {
                    Tok::NotEq
                } else {
                    return Err(LexError::UnexpectedChar(self.line, '!'));
                }
            }
            '<' => {
                if next_is(&mut self.chars, '=') {
                    Tok::LtEq
                } else {
                    Tok::Lt
                }
            }
            '>' => {
                if next_is(&mut self.chars, '=') {
                    Tok::GtEq
                } else {
                    Tok::Gt
                }
            }
            '(' => {
                self.bracket_depth += 1;
                Tok::LParen
            }
            ')' => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                Tok::RParen
            }
            '[' => {
                self.bracket_depth += 1;
                Tok::LBracket
            }
            ']' => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                Tok::RBracket
            }
            '{' => {
                self.bracket_depth += 1;
                Tok::LBrace
            }
            '}' => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                Tok::RBrace
            }
            ',' => Tok::Comma,
            ':' => Tok::Colon,
            '.' => Tok::Dot,
            other => return Err(LexError::UnexpectedChar(self.line, other)),
        };
        self.push(tok);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn subscript_assignment_line() {
        let tokens = toks("df['x'] = df['x'] * 2");
        assert_eq!(
            tokens,
            vec![
                Tok::Name("df".into()),
                Tok::LBracket,
                Tok::Str("x".into()),
                Tok::RBracket,
                Tok::Eq,
                Tok::Name("df".into()),
                Tok::LBracket,
                Tok::Str("x".into()),
                Tok::RBracket,
                Tok::Star,
                Tok::Int(2),
                Tok::Newline,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn indent_dedent_pairs() {
        let tokens = toks("while True:\n    pass\nx = 1");
        assert!(tokens.contains(&Tok::Indent));
        assert!(tokens.contains(&Tok::Dedent));
        let indents = tokens.iter().filter(|t| **t == Tok::Indent).count();
        let dedents = tokens.iter().filter(|t| **t == Tok::Dedent).count();
        assert_eq!(indents, dedents);
    }

    #[test]
    fn brackets_join_lines() {
        let tokens = toks("df.rename(columns={\n    'a': 'b',\n})");
        assert!(!tokens.contains(&Tok::Indent));
        assert_eq!(tokens.iter().filter(|t| **t == Tok::Newline).count(), 1);
    }

    #[test]
    fn comments_and_blank_lines_are_invisible() {
        let tokens = toks("x = 1\n\n# comment only\n\ny = 2\n");
        let newlines = tokens.iter().filter(|t| **t == Tok::Newline).count();
        assert_eq!(newlines, 2);
    }

    #[test]
    fn string_escapes() {
        let tokens = toks(r#"s = 'a\nb'"#);
        assert!(tokens.contains(&Tok::Str("a\nb".into())));
    }

    #[test]
    fn unterminated_string_is_an_error() {
        assert!(matches!(
            tokenize("s = 'oops"),
            Err(LexError::UnterminatedString(1))
        ));
    }

    #[test]
    fn float_and_int_literals() {
        let tokens = toks("a = 1.5\nb = 10");
        assert!(tokens.contains(&Tok::Float(1.5)));
        assert!(tokens.contains(&Tok::Int(10)));
    }
}
