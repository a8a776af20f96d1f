//! Named contrasts parsed from arithmetic over group levels
//! R equivalent: limma::makeContrasts()
//!
//! Grammar:
//! ```text
//! expr   := term (('+' | '-') term)*
//! term   := factor (('*' | '/') factor)*
//! factor := ('+' | '-') factor | number | level | '(' expr ')'
//! ```
//! Levels are runs of letters, digits, `_` and `.`; a run that parses as a
//! number is a number. The result must be linear in the levels with no
//! constant term.

use std::collections::BTreeMap;

use super::DesignMatrix;
use crate::config::ContrastDef;
use crate::data::is_level_char;
use crate::error::{PipelineError, Result};

/// A named weight vector over design columns
#[derive(Debug, Clone, PartialEq)]
pub struct Contrast {
    name: String,
    expression: String,
    weights: Vec<f64>,
}

impl Contrast {
    pub fn parse(name: &str, expression: &str, design: &DesignMatrix) -> Result<Self> {
        let fail = |reason: String| PipelineError::InvalidContrast {
            name: name.to_string(),
            reason,
        };
        if name.trim().is_empty() {
            return Err(fail("contrast name must not be empty".to_string()));
        }

        let tokens = tokenize(expression).map_err(&fail)?;
        let mut parser = Parser { tokens, pos: 0 };
        let combo = parser.expr().map_err(&fail)?;
        if let Some(tok) = parser.tokens.get(parser.pos) {
            return Err(fail(format!("unexpected {:?} after end of expression", tok)));
        }

        if combo.constant.abs() > 1e-12 {
            return Err(fail(format!("constant term {} is not allowed", combo.constant)));
        }

        let mut weights = vec![0.0; design.n_levels()];
        for (level, w) in &combo.terms {
            let j = design
                .level_index(level)
                .ok_or_else(|| fail(format!("'{}' is not a group level", level)))?;
            weights[j] = *w;
        }
        if weights.iter().all(|w| w.abs() < 1e-12) {
            return Err(fail("all weights are zero".to_string()));
        }

        Ok(Self {
            name: name.to_string(),
            expression: expression.to_string(),
            weights,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }
}

/// Ordered contrasts with unique names
#[derive(Debug, Clone, Default)]
pub struct ContrastSet {
    contrasts: Vec<Contrast>,
}

impl ContrastSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse every definition against the design, in order
    pub fn from_defs(defs: &[ContrastDef], design: &DesignMatrix) -> Result<Self> {
        let mut set = Self::new();
        for def in defs {
            set.push(Contrast::parse(&def.name, &def.expression, design)?)?;
        }
        Ok(set)
    }

    pub fn push(&mut self, contrast: Contrast) -> Result<()> {
        if self.get(contrast.name()).is_some() {
            return Err(PipelineError::InvalidContrast {
                name: contrast.name().to_string(),
                reason: "duplicate contrast name".to_string(),
            });
        }
        self.contrasts.push(contrast);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Contrast> {
        self.contrasts.iter().find(|c| c.name() == name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Contrast> {
        self.contrasts.iter()
    }

    pub fn len(&self) -> usize {
        self.contrasts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contrasts.is_empty()
    }
}

impl<'a> IntoIterator for &'a ContrastSet {
    type Item = &'a Contrast;
    type IntoIter = std::slice::Iter<'a, Contrast>;

    fn into_iter(self) -> Self::IntoIter {
        self.contrasts.iter()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> std::result::Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => {}
            '+' => tokens.push(Token::Plus),
            '-' => tokens.push(Token::Minus),
            '*' => tokens.push(Token::Star),
            '/' => tokens.push(Token::Slash),
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            c if is_level_char(c) => {
                let start = i;
                while i + 1 < chars.len() && is_level_char(chars[i + 1]) {
                    i += 1;
                }
                let word: String = chars[start..=i].iter().collect();
                match word.parse::<f64>() {
                    Ok(v) if v.is_finite() => tokens.push(Token::Num(v)),
                    _ => tokens.push(Token::Ident(word)),
                }
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
        i += 1;
    }
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }
    Ok(tokens)
}

/// Linear combination of levels plus a constant
#[derive(Debug, Clone, Default)]
struct Linear {
    terms: BTreeMap<String, f64>,
    constant: f64,
}

impl Linear {
    fn constant(v: f64) -> Self {
        Self {
            terms: BTreeMap::new(),
            constant: v,
        }
    }

    fn level(name: String) -> Self {
        let mut terms = BTreeMap::new();
        terms.insert(name, 1.0);
        Self { terms, constant: 0.0 }
    }

    fn is_constant(&self) -> bool {
        self.terms.values().all(|w| *w == 0.0)
    }

    fn scale(mut self, k: f64) -> Self {
        self.terms.values_mut().for_each(|w| *w *= k);
        self.constant *= k;
        self
    }

    fn add(mut self, other: Self, sign: f64) -> Self {
        for (level, w) in other.terms {
            *self.terms.entry(level).or_insert(0.0) += sign * w;
        }
        self.constant += sign * other.constant;
        self
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

type ParseResult = std::result::Result<Linear, String>;

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expr(&mut self) -> ParseResult {
        let mut acc = self.term()?;
        while let Some(tok) = self.peek() {
            let sign = match tok {
                Token::Plus => 1.0,
                Token::Minus => -1.0,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.term()?;
            acc = acc.add(rhs, sign);
        }
        Ok(acc)
    }

    fn term(&mut self) -> ParseResult {
        let mut acc = self.factor()?;
        while let Some(tok) = self.peek() {
            let is_mul = match tok {
                Token::Star => true,
                Token::Slash => false,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.factor()?;
            acc = if is_mul {
                if rhs.is_constant() {
                    acc.scale(rhs.constant)
                } else if acc.is_constant() {
                    rhs.scale(acc.constant)
                } else {
                    return Err("product of two levels is not linear".to_string());
                }
            } else {
                if !rhs.is_constant() {
                    return Err("division by a level is not linear".to_string());
                }
                if rhs.constant == 0.0 {
                    return Err("division by zero".to_string());
                }
                acc.scale(1.0 / rhs.constant)
            };
        }
        Ok(acc)
    }

    fn factor(&mut self) -> ParseResult {
        match self.next() {
            Some(Token::Plus) => self.factor(),
            Some(Token::Minus) => Ok(self.factor()?.scale(-1.0)),
            Some(Token::Num(v)) => Ok(Linear::constant(v)),
            Some(Token::Ident(name)) => Ok(Linear::level(name)),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err("missing closing parenthesis".to_string()),
                }
            }
            Some(tok) => Err(format!("unexpected {:?}", tok)),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}
