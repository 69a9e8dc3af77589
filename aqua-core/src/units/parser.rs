//! Unit strings as products of symbols raised to integer powers.
//!
//! Model output spells the same unit many ways. All of these are accepted:
//!
//! - powers written `m^2`, `m**2`, `m2` or `s-1`
//! - products separated by blanks, `*`, `.` or `·`
//! - quotients with `/` or the word `per`
//! - the GRIB fraction spellings `(0 - 1)`, `0-1` and `~`
//!
//! The text is first split into [`Token`]s, then read with the grammar
//!
//! ```text
//! quotient = product (('/' | 'per') product)*
//! product  = power (('*' | '.' | '·')? power)*
//! power    = atom ('^'? integer)?
//! atom     = symbol | '1' | '(' quotient ')'
//! ```
//!
//! A power without `^` must follow its atom directly: `m2` is square metres,
//! `m 2` is an error.

use super::dimension::Dimension;
use super::registry::{UnitInfo, UNIT_REGISTRY};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::iter::Peekable;
use std::vec::IntoIter;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty unit string")]
    Empty,
    #[error("unknown unit '{0}'")]
    UnknownSymbol(String),
    #[error("invalid exponent '{0}'")]
    BadExponent(String),
    #[error("cannot read unit '{input}': {reason}")]
    Syntax { input: String, reason: String },
}

/// Spellings of a pure number.
const DIMENSIONLESS: &[&str] = &["1", "~", "0-1", "(0 - 1)", "(0-1)", "dimensionless"];

/// A unit as symbols with their powers; `W m**-2` holds `{W: 1, m: -2}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedUnit {
    powers: BTreeMap<String, i32>,
}

impl ParsedUnit {
    #[must_use]
    pub fn dimensionless() -> Self {
        Self {
            powers: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn from_components(powers: BTreeMap<String, i32>) -> Self {
        Self {
            powers: powers.into_iter().filter(|(_, p)| *p != 0).collect(),
        }
    }

    fn symbol(name: String) -> Self {
        Self {
            powers: BTreeMap::from([(name, 1)]),
        }
    }

    /// ```
    /// use aqua_core::units::parser::ParsedUnit;
    ///
    /// let a = ParsedUnit::parse("kg m-2 s-1").unwrap();
    /// let b = ParsedUnit::parse("kg / m**2 / s").unwrap();
    /// assert_eq!(a, b);
    /// ```
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let text = input.trim();
        if text.is_empty() {
            return Err(ParseError::Empty);
        }
        if DIMENSIONLESS.iter().any(|s| text.eq_ignore_ascii_case(s)) {
            return Ok(Self::dimensionless());
        }
        let tokens = lex(text)?;
        Reader {
            input: text,
            tokens: tokens.into_iter().peekable(),
        }
        .read()
    }

    #[must_use]
    pub fn components(&self) -> &BTreeMap<String, i32> {
        &self.powers
    }

    fn registered(&self) -> impl Iterator<Item = Result<(UnitInfo, i32), ParseError>> + '_ {
        self.powers.iter().map(|(symbol, &power)| match UNIT_REGISTRY.lookup(symbol) {
            Some(info) => Ok((info, power)),
            None => Err(ParseError::UnknownSymbol(symbol.clone())),
        })
    }

    pub fn dimension(&self) -> Result<Dimension, ParseError> {
        let mut dimension = Dimension::dimensionless();
        for entry in self.registered() {
            let (info, power) = entry?;
            dimension = dimension + info.dimension.pow(power as i8);
        }
        Ok(dimension)
    }

    /// Multiplier taking a value in this unit to SI base units.
    pub fn to_si_factor(&self) -> Result<f64, ParseError> {
        let mut factor = 1.0;
        for entry in self.registered() {
            let (info, power) = entry?;
            factor *= info.to_si_factor.powi(power);
        }
        Ok(factor)
    }

    /// Offset to SI. Only a bare absolute scale such as `degC` has one;
    /// inside a compound unit the scale measures differences.
    pub fn to_si_offset(&self) -> Result<f64, ParseError> {
        let mut entries = self.registered();
        match (entries.next(), entries.next()) {
            (Some(entry), None) => {
                let (info, power) = entry?;
                Ok(if power == 1 { info.to_si_offset } else { 0.0 })
            }
            _ => Ok(0.0),
        }
    }

    #[must_use]
    pub fn multiply(&self, other: &Self) -> Self {
        let mut powers = self.powers.clone();
        for (symbol, power) in &other.powers {
            *powers.entry(symbol.clone()).or_default() += power;
        }
        Self::from_components(powers)
    }

    #[must_use]
    pub fn divide(&self, other: &Self) -> Self {
        self.multiply(&other.pow(-1))
    }

    #[must_use]
    pub fn pow(&self, exponent: i32) -> Self {
        Self::from_components(
            self.powers
                .iter()
                .map(|(symbol, power)| (symbol.clone(), power * exponent))
                .collect(),
        )
    }

    /// CF spelling: positive powers, then negative, each alphabetical
    /// (`kg m-2 s-1`).
    #[must_use]
    pub fn normalized(&self) -> String {
        if self.powers.is_empty() {
            return "1".to_string();
        }
        let numerator = self.powers.iter().filter(|(_, &p)| p > 0);
        let denominator = self.powers.iter().filter(|(_, &p)| p < 0);
        let words: Vec<String> = numerator
            .chain(denominator)
            .map(|(symbol, &p)| match p {
                1 => symbol.clone(),
                _ => format!("{symbol}{p}"),
            })
            .collect();
        words.join(" ")
    }
}

impl fmt::Display for ParsedUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Symbol(String),
    /// An integer and whether it touches the previous token.
    Integer(String, bool),
    Times,
    Over,
    Caret,
    Open,
    Close,
}

fn is_symbol_char(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '%'
}

fn lex(text: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();
    let mut spaced = false;
    while let Some((start, c)) = chars.next() {
        if c.is_whitespace() {
            spaced = true;
            continue;
        }
        let token = match c {
            '/' => Token::Over,
            '^' => Token::Caret,
            '(' => Token::Open,
            ')' => Token::Close,
            '.' | '\u{00B7}' => Token::Times,
            '*' if chars.next_if(|&(_, n)| n == '*').is_some() => Token::Caret,
            '*' => Token::Times,
            c if c.is_ascii_digit() || c == '-' || c == '+' => {
                let mut end = start + c.len_utf8();
                while let Some((i, d)) = chars.next_if(|&(_, d)| d.is_ascii_digit()) {
                    end = i + d.len_utf8();
                }
                Token::Integer(text[start..end].to_string(), !spaced)
            }
            c if is_symbol_char(c) => {
                let mut end = start + c.len_utf8();
                while let Some((i, s)) = chars.next_if(|&(_, s)| is_symbol_char(s)) {
                    end = i + s.len_utf8();
                }
                match &text[start..end] {
                    "per" => Token::Over,
                    word => Token::Symbol(word.to_string()),
                }
            }
            other => {
                return Err(ParseError::Syntax {
                    input: text.to_string(),
                    reason: format!("unexpected '{other}'"),
                })
            }
        };
        tokens.push(token);
        spaced = false;
    }
    Ok(tokens)
}

struct Reader<'a> {
    input: &'a str,
    tokens: Peekable<IntoIter<Token>>,
}

impl Reader<'_> {
    fn syntax(&self, reason: impl Into<String>) -> ParseError {
        ParseError::Syntax {
            input: self.input.to_string(),
            reason: reason.into(),
        }
    }

    fn read(mut self) -> Result<ParsedUnit, ParseError> {
        let unit = self.quotient()?;
        match self.tokens.next() {
            None => Ok(unit),
            Some(token) => Err(self.syntax(format!("unexpected {token:?}"))),
        }
    }

    fn quotient(&mut self) -> Result<ParsedUnit, ParseError> {
        let mut unit = self.product()?;
        while self.tokens.next_if_eq(&Token::Over).is_some() {
            unit = unit.divide(&self.product()?);
        }
        Ok(unit)
    }

    fn product(&mut self) -> Result<ParsedUnit, ParseError> {
        let mut unit = self.power()?;
        loop {
            let explicit = self.tokens.next_if_eq(&Token::Times).is_some();
            let implicit = matches!(self.tokens.peek(), Some(Token::Symbol(_) | Token::Open));
            if !explicit && !implicit {
                return Ok(unit);
            }
            unit = unit.multiply(&self.power()?);
        }
    }

    fn power(&mut self) -> Result<ParsedUnit, ParseError> {
        let atom = self.atom()?;
        if self.tokens.next_if_eq(&Token::Caret).is_some() {
            return match self.tokens.next() {
                Some(Token::Integer(digits, _)) => Ok(atom.pow(exponent(&digits)?)),
                _ => Err(self.syntax("missing exponent")),
            };
        }
        match self.tokens.next_if(|t| matches!(t, Token::Integer(_, true))) {
            Some(Token::Integer(digits, _)) => Ok(atom.pow(exponent(&digits)?)),
            _ => Ok(atom),
        }
    }

    fn atom(&mut self) -> Result<ParsedUnit, ParseError> {
        match self.tokens.next() {
            Some(Token::Symbol(name)) => Ok(ParsedUnit::symbol(name)),
            Some(Token::Integer(digits, _)) if digits == "1" => Ok(ParsedUnit::dimensionless()),
            Some(Token::Open) => {
                let inner = self.quotient()?;
                match self.tokens.next() {
                    Some(Token::Close) => Ok(inner),
                    _ => Err(self.syntax("unbalanced parenthesis")),
                }
            }
            Some(token) => Err(self.syntax(format!("expected a unit, found {token:?}"))),
            None => Err(self.syntax("expected a unit")),
        }
    }
}

fn exponent(digits: &str) -> Result<i32, ParseError> {
    digits
        .parse()
        .map_err(|_| ParseError::BadExponent(digits.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cf_negative_powers() {
        let unit = ParsedUnit::parse("kg m-2 s-1").unwrap();
        assert_eq!(
            unit.components(),
            &BTreeMap::from([
                ("kg".to_string(), 1),
                ("m".to_string(), -2),
                ("s".to_string(), -1)
            ])
        );
        assert_eq!(unit.dimension().unwrap(), Dimension::MASS_FLUX);
    }

    #[test]
    fn spellings_of_one_flux() {
        let reference = ParsedUnit::parse("W m**-2").unwrap();
        for spelling in ["W/m^2", "W per m2", "W.m-2", "W * m ^ -2", "W / (m m)"] {
            assert_eq!(ParsedUnit::parse(spelling).unwrap(), reference, "{spelling}");
        }
    }

    #[test]
    fn reciprocal_with_one() {
        assert_eq!(
            ParsedUnit::parse("1/s").unwrap(),
            ParsedUnit::parse("s-1").unwrap()
        );
    }

    #[test]
    fn normalized_order() {
        let unit = ParsedUnit::parse("s**-1 m**-2 kg").unwrap();
        assert_eq!(unit.normalized(), "kg m-2 s-1");
        assert_eq!(ParsedUnit::parse("kg kg-1").unwrap().normalized(), "1");
    }

    #[test]
    fn fractions_are_dimensionless() {
        for spelling in ["(0 - 1)", "0-1", "~", "1"] {
            let unit = ParsedUnit::parse(spelling).unwrap();
            assert!(unit.dimension().unwrap().is_dimensionless(), "{spelling}");
        }
    }

    #[test]
    fn factors_and_offsets() {
        let percent = ParsedUnit::parse("%").unwrap();
        assert!((percent.to_si_factor().unwrap() - 0.01).abs() < f64::EPSILON);
        let hpa = ParsedUnit::parse("hPa").unwrap();
        assert!((hpa.to_si_factor().unwrap() - 100.0).abs() < 1e-12);

        assert_eq!(ParsedUnit::parse("degC").unwrap().to_si_offset().unwrap(), 273.15);
        assert_eq!(
            ParsedUnit::parse("degC day-1").unwrap().to_si_offset().unwrap(),
            0.0
        );
    }

    #[test]
    fn malformed() {
        assert_eq!(ParsedUnit::parse("  "), Err(ParseError::Empty));
        for text in ["m^", "m )", "(m", "m 2", "kg $"] {
            assert!(
                matches!(ParsedUnit::parse(text), Err(ParseError::Syntax { .. })),
                "{text}"
            );
        }
        assert!(matches!(
            ParsedUnit::parse("m^99999999999"),
            Err(ParseError::BadExponent(_))
        ));
    }

    #[test]
    fn unknown_symbol_fails_late() {
        let unit = ParsedUnit::parse("furlong").unwrap();
        assert_eq!(
            unit.dimension(),
            Err(ParseError::UnknownSymbol("furlong".to_string()))
        );
    }
}
