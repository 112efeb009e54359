//! Arithmetic interpreter for configured delays
//!
//! Crawl intervals and inter-request delays may be given either as a plain
//! number of seconds or as a small arithmetic expression, e.g.
//! `random(2, 5) * 1.5`. The grammar covers float literals, `+ - * /` with
//! the usual precedence, unary minus, parentheses, and `random(min, max)`.

use rand::Rng;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ExprError {
    #[error("unexpected character '{0}' at offset {1}")]
    UnexpectedChar(char, usize),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("expected '{0}'")]
    Expected(char),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| ExprError::UnexpectedChar(c, start))?;
                tokens.push(Token::Number(value));
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(ExprError::UnexpectedChar(other, i)),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, want: Token, symbol: char) -> Result<(), ExprError> {
        match self.next() {
            Some(tok) if tok == want => Ok(()),
            _ => Err(ExprError::Expected(symbol)),
        }
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<f64, ExprError> {
        let mut acc = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.next();
                    acc += self.term()?;
                }
                Some(Token::Minus) => {
                    self.next();
                    acc -= self.term()?;
                }
                _ => return Ok(acc),
            }
        }
    }

    // term := factor (('*' | '/') factor)*
    fn term(&mut self) -> Result<f64, ExprError> {
        let mut acc = self.factor()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.next();
                    acc *= self.factor()?;
                }
                Some(Token::Slash) => {
                    self.next();
                    acc /= self.factor()?;
                }
                _ => return Ok(acc),
            }
        }
    }

    // factor := number | '-' factor | '(' expr ')' | ident '(' args ')'
    fn factor(&mut self) -> Result<f64, ExprError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::Minus) => Ok(-self.factor()?),
            Some(Token::LParen) => {
                let value = self.expr()?;
                self.expect(Token::RParen, ')')?;
                Ok(value)
            }
            Some(Token::Ident(name)) => self.call(&name),
            _ => Err(ExprError::UnexpectedEnd),
        }
    }

    fn call(&mut self, name: &str) -> Result<f64, ExprError> {
        self.expect(Token::LParen, '(')?;
        let first = self.expr()?;
        match name {
            "random" => {
                self.expect(Token::Comma, ',')?;
                let second = self.expr()?;
                self.expect(Token::RParen, ')')?;
                let (lo, hi) = if first <= second {
                    (first, second)
                } else {
                    (second, first)
                };
                if lo == hi {
                    return Ok(lo);
                }
                Ok(rand::thread_rng().gen_range(lo..hi))
            }
            other => Err(ExprError::UnknownFunction(other.to_string())),
        }
    }
}

/// Evaluate an arithmetic expression to a float.
pub fn eval(input: &str) -> Result<f64, ExprError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let value = parser.expr()?;
    if parser.peek().is_some() {
        return Err(ExprError::UnexpectedEnd);
    }
    Ok(value)
}

/// Resolve a configured delay to seconds.
///
/// Plain numbers take the fast path; anything else goes through the
/// interpreter. Unparseable input falls back to one second rather than
/// stalling or failing a crawl.
pub fn delay_seconds(spec: &str) -> f64 {
    let trimmed = spec.trim();
    if let Ok(n) = trimmed.parse::<f64>() {
        return n;
    }
    eval(trimmed).unwrap_or(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals_and_precedence() {
        assert_eq!(eval("3").unwrap(), 3.0);
        assert_eq!(eval("1 + 2 * 3").unwrap(), 7.0);
        assert_eq!(eval("(1 + 2) * 3").unwrap(), 9.0);
        assert_eq!(eval("10 / 4").unwrap(), 2.5);
        assert_eq!(eval("-2 + 5").unwrap(), 3.0);
    }

    #[test]
    fn random_stays_within_bounds() {
        for _ in 0..50 {
            let v = eval("random(2, 5)").unwrap();
            assert!((2.0..5.0).contains(&v), "out of range: {v}");
        }
        // Reversed bounds are tolerated
        let v = eval("random(5, 2)").unwrap();
        assert!((2.0..5.0).contains(&v));
        // Degenerate range
        assert_eq!(eval("random(3, 3)").unwrap(), 3.0);
    }

    #[test]
    fn compound_expression() {
        let v = eval("random(1, 2) + 10").unwrap();
        assert!((11.0..12.0).contains(&v));
    }

    #[test]
    fn rejects_garbage() {
        assert!(eval("").is_err());
        assert!(eval("2 +").is_err());
        assert!(eval("foo(1)").is_err());
        assert!(eval("1 2").is_err());
        assert!(eval("#!").is_err());
    }

    #[test]
    fn delay_spec_fallback() {
        assert_eq!(delay_seconds("2.5"), 2.5);
        assert_eq!(delay_seconds(" 4 "), 4.0);
        assert_eq!(delay_seconds("not a delay"), 1.0);
        let v = delay_seconds("random(1,3)");
        assert!((1.0..3.0).contains(&v));
    }
}
