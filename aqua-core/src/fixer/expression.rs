//! Arithmetic formulas for derived variables, e.g. `tp/3600` or `2t - 273.15`.
//!
//! Tokens that parse as a number are literals; every other word is a
//! variable name, so GRIB short names starting with a digit (`2t`, `10u`)
//! work without quoting.

use crate::errors::{AquaError, AquaResult};
use ndarray::Array3;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Name(String),
    Op(char),
    Open,
    Close,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Neg(Box<Expr>),
    Binary(char, Box<Expr>, Box<Expr>),
}

enum Value {
    Scalar(f64),
    Field(Array3<f64>),
}

fn tokenize(formula: &str) -> Vec<Token> {
    let chars: Vec<char> = formula.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '+' | '-' | '*' | '/' => {
                tokens.push(Token::Op(c));
                i += 1;
            }
            '(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            _ => {
                let start = i;
                while i < chars.len() && !is_delimiter(chars[i]) {
                    i += 1;
                    // Exponent sign of a literal such as 1e-3.
                    if i + 1 < chars.len()
                        && matches!(chars[i], '+' | '-')
                        && matches!(chars[i - 1], 'e' | 'E')
                        && chars[i + 1].is_ascii_digit()
                        && chars[start..i - 1].iter().collect::<String>().parse::<f64>().is_ok()
                    {
                        i += 1;
                    }
                }
                let word: String = chars[start..i].iter().collect();
                match word.parse::<f64>() {
                    Ok(value) => tokens.push(Token::Number(value)),
                    Err(_) => tokens.push(Token::Name(word)),
                }
            }
        }
    }
    tokens
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '+' | '-' | '*' | '/' | '(' | ')')
}

struct Parser<'a> {
    formula: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, reason: impl Into<String>) -> AquaError {
        AquaError::InvalidFormula {
            formula: self.formula.to_string(),
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> AquaResult<Expr> {
        let mut lhs = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek().cloned() {
            self.pos += 1;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(self.term()?));
        }
        Ok(lhs)
    }

    // term := factor (('*' | '/') factor)*
    fn term(&mut self) -> AquaResult<Expr> {
        let mut lhs = self.factor()?;
        while let Some(Token::Op(op @ ('*' | '/'))) = self.peek().cloned() {
            self.pos += 1;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(self.factor()?));
        }
        Ok(lhs)
    }

    // factor := '-' factor | number | name | '(' expr ')'
    fn factor(&mut self) -> AquaResult<Expr> {
        match self.next() {
            Some(Token::Op('-')) => Ok(Expr::Neg(Box::new(self.factor()?))),
            Some(Token::Number(value)) => Ok(Expr::Number(value)),
            Some(Token::Name(name)) => Ok(Expr::Variable(name)),
            Some(Token::Open) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::Close) => Ok(inner),
                    _ => Err(self.error("missing closing parenthesis")),
                }
            }
            Some(token) => Err(self.error(format!("unexpected {token:?}"))),
            None => Err(self.error("unexpected end of formula")),
        }
    }
}

impl Expr {
    pub fn parse(formula: &str) -> AquaResult<Self> {
        let mut parser = Parser {
            formula,
            tokens: tokenize(formula),
            pos: 0,
        };
        if parser.tokens.is_empty() {
            return Err(parser.error("empty formula"));
        }
        let expr = parser.expr()?;
        if parser.pos < parser.tokens.len() {
            return Err(parser.error(format!(
                "trailing input starting at {:?}",
                parser.tokens[parser.pos]
            )));
        }
        Ok(expr)
    }

    /// Variable names the formula reads.
    pub fn variables(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_variables(&mut names);
        names
    }

    fn collect_variables(&self, names: &mut BTreeSet<String>) {
        match self {
            Expr::Number(_) => {}
            Expr::Variable(name) => {
                names.insert(name.clone());
            }
            Expr::Neg(inner) => inner.collect_variables(names),
            Expr::Binary(_, lhs, rhs) => {
                lhs.collect_variables(names);
                rhs.collect_variables(names);
            }
        }
    }

    /// Evaluates the formula elementwise, broadcasting numbers and
    /// single-level fields.
    pub fn evaluate<'a, F>(&self, lookup: &F) -> AquaResult<Array3<f64>>
    where
        F: Fn(&str) -> Option<&'a Array3<f64>>,
    {
        match self.eval(lookup)? {
            Value::Field(field) => Ok(field),
            Value::Scalar(_) => Err(AquaError::InvalidFormula {
                formula: format!("{self:?}"),
                reason: "formula does not reference any variable".to_string(),
            }),
        }
    }

    fn eval<'a, F>(&self, lookup: &F) -> AquaResult<Value>
    where
        F: Fn(&str) -> Option<&'a Array3<f64>>,
    {
        Ok(match self {
            Expr::Number(value) => Value::Scalar(*value),
            Expr::Variable(name) => Value::Field(
                lookup(name)
                    .ok_or_else(|| AquaError::VariableNotFound(name.clone()))?
                    .clone(),
            ),
            Expr::Neg(inner) => match inner.eval(lookup)? {
                Value::Scalar(v) => Value::Scalar(-v),
                Value::Field(f) => Value::Field(-f),
            },
            Expr::Binary(op, lhs, rhs) => {
                let op = *op;
                let apply = move |a: f64, b: f64| match op {
                    '+' => a + b,
                    '-' => a - b,
                    '*' => a * b,
                    _ => a / b,
                };
                match (lhs.eval(lookup)?, rhs.eval(lookup)?) {
                    (Value::Scalar(a), Value::Scalar(b)) => Value::Scalar(apply(a, b)),
                    (Value::Field(a), Value::Scalar(b)) => Value::Field(a.mapv(|x| apply(x, b))),
                    (Value::Scalar(a), Value::Field(b)) => Value::Field(b.mapv(|x| apply(a, x))),
                    (Value::Field(a), Value::Field(b)) => {
                        let a_shape = a.shape();
                        let b_shape = b.shape();
                        if a_shape
                            .iter()
                            .zip(b_shape)
                            .any(|(&x, &y)| x != y && x != 1 && y != 1)
                        {
                            return Err(AquaError::InvalidFormula {
                                formula: format!("{self:?}"),
                                reason: format!("fields of shape {a_shape:?} and {b_shape:?}"),
                            });
                        }
                        let mut out = Array3::zeros((
                            a_shape[0].max(b_shape[0]),
                            a_shape[1].max(b_shape[1]),
                            a_shape[2].max(b_shape[2]),
                        ));
                        let dim = out.raw_dim();
                        match (a.broadcast(dim.clone()), b.broadcast(dim)) {
                            (Some(a), Some(b)) => {
                                ndarray::Zip::from(&mut out)
                                    .and(&a)
                                    .and(&b)
                                    .for_each(|o, &x, &y| *o = apply(x, y));
                            }
                            _ => {
                                return Err(AquaError::InvalidFormula {
                                    formula: format!("{self:?}"),
                                    reason: "fields cannot be broadcast together".to_string(),
                                })
                            }
                        }
                        Value::Field(out)
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn fields() -> HashMap<&'static str, Array3<f64>> {
        HashMap::from([
            ("tp", Array3::from_elem((2, 1, 3), 7200.0)),
            ("2t", Array3::from_elem((2, 1, 3), 300.0)),
            ("t", Array3::from_elem((2, 4, 3), 250.0)),
        ])
    }

    fn eval(formula: &str) -> AquaResult<Array3<f64>> {
        let fields = fields();
        Expr::parse(formula)?.evaluate(&|name| fields.get(name))
    }

    #[test]
    fn digits_leading_names_are_variables() {
        let expr = Expr::parse("2t - 273.15").unwrap();
        assert_eq!(
            expr.variables().into_iter().collect::<Vec<_>>(),
            vec!["2t".to_string()]
        );
    }

    #[test]
    fn precedence_and_parentheses() {
        let out = eval("tp / 3600 * 2 + 1").unwrap();
        assert_eq!(out[[0, 0, 0]], 5.0);
        let out = eval("tp / (3600 * 2)").unwrap();
        assert_eq!(out[[1, 0, 2]], 1.0);
        let out = eval("-2t + 600").unwrap();
        assert_eq!(out[[0, 0, 1]], 300.0);
    }

    #[test]
    fn exponent_literals() {
        let out = eval("tp * 1e-3").unwrap();
        assert!((out[[0, 0, 0]] - 7.2).abs() < 1e-12);
    }

    #[test]
    fn surface_fields_broadcast_over_levels() {
        let out = eval("t - 2t").unwrap();
        assert_eq!(out.dim(), (2, 4, 3));
        assert_eq!(out[[1, 3, 2]], -50.0);
    }

    #[test]
    fn malformed_formulas() {
        for formula in ["", "tp +", "(tp * 2", "tp tp", "3 * )"] {
            assert!(
                matches!(Expr::parse(formula), Err(AquaError::InvalidFormula { .. })),
                "{formula}"
            );
        }
        assert!(matches!(eval("1 + 2"), Err(AquaError::InvalidFormula { .. })));
        assert!(matches!(eval("missing * 2"), Err(AquaError::VariableNotFound(_))));
    }
}
