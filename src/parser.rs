use crate::ast::*;
use crate::error::SyntaxError;

/// Parser state: tracks position in the input string.
struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

/// Parse one interpolation expression.
pub fn parse(input: &str) -> Result<Expr, SyntaxError> {
    let mut parser = Parser { input, pos: 0 };
    parser.skip_ws();
    if parser.pos >= parser.input.len() {
        return Err(parser.error("Expected an expression"));
    }
    let expr = parser.parse_conditional()?;
    parser.skip_ws();
    if parser.pos < parser.input.len() {
        return Err(parser.error(format!(
            "Unexpected '{}'",
            parser.peek_char().unwrap_or(' ')
        )));
    }
    Ok(expr)
}

impl<'a> Parser<'a> {
    // ── Helpers ──────────────────────────────────────────────────────

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek_char(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn advance(&mut self, n: usize) {
        self.pos += n;
    }

    fn starts_with(&self, s: &str) -> bool {
        self.remaining().starts_with(s)
    }

    fn eat(&mut self, s: &str) -> bool {
        if self.starts_with(s) {
            self.advance(s.len());
            true
        } else {
            false
        }
    }

    fn expect(&mut self, s: &str) -> Result<(), SyntaxError> {
        self.skip_ws();
        if self.eat(s) {
            Ok(())
        } else {
            Err(self.error(format!("Expected '{}'", s)))
        }
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError {
            message: message.into(),
            offset: self.pos,
        }
    }

    fn skip_ws(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch.is_whitespace() {
                self.advance(ch.len_utf8());
            } else {
                break;
            }
        }
    }

    // ── Operators ────────────────────────────────────────────────────

    fn parse_conditional(&mut self) -> Result<Expr, SyntaxError> {
        let test = self.parse_binary(1)?;
        self.skip_ws();
        if !self.eat("?") {
            return Ok(test);
        }
        let consequent = self.parse_conditional()?;
        self.expect(":")?;
        let alternate = self.parse_conditional()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    /// Precedence climbing over left-associative binary operators.
    fn parse_binary(&mut self, min_prec: u8) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_unary()?;
        loop {
            self.skip_ws();
            let Some((op, len)) = self.peek_binary_op() else {
                break;
            };
            if op.precedence() < min_prec {
                break;
            }
            self.advance(len);
            let right = self.parse_binary(op.precedence() + 1)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn peek_binary_op(&self) -> Option<(BinaryOp, usize)> {
        // Longest tokens first.
        const OPS: &[(&str, BinaryOp)] = &[
            ("===", BinaryOp::StrictEq),
            ("!==", BinaryOp::StrictNe),
            ("==", BinaryOp::Eq),
            ("!=", BinaryOp::Ne),
            ("<=", BinaryOp::Le),
            (">=", BinaryOp::Ge),
            ("&&", BinaryOp::And),
            ("||", BinaryOp::Or),
            ("<", BinaryOp::Lt),
            (">", BinaryOp::Gt),
            ("+", BinaryOp::Add),
            ("-", BinaryOp::Sub),
            ("*", BinaryOp::Mul),
            ("/", BinaryOp::Div),
            ("%", BinaryOp::Rem),
        ];
        OPS.iter()
            .find(|(tok, _)| self.starts_with(tok))
            .map(|(tok, op)| (*op, tok.len()))
    }

    fn parse_unary(&mut self) -> Result<Expr, SyntaxError> {
        self.skip_ws();
        let op = match self.peek_char() {
            Some('!') => UnaryOp::Not,
            Some('-') => UnaryOp::Neg,
            Some('+') => UnaryOp::Plus,
            _ => return self.parse_postfix(),
        };
        self.advance(1);
        let operand = self.parse_unary()?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_primary()?;
        loop {
            self.skip_ws();
            if self.eat(".") {
                self.skip_ws();
                let property = self.parse_identifier()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                };
            } else if self.eat("[") {
                let index = self.parse_conditional()?;
                self.expect("]")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                return Ok(expr);
            }
        }
    }

    // ── Primaries ────────────────────────────────────────────────────

    fn parse_primary(&mut self) -> Result<Expr, SyntaxError> {
        self.skip_ws();
        match self.peek_char() {
            Some('(') => {
                self.advance(1);
                let inner = self.parse_conditional()?;
                self.expect(")")?;
                Ok(inner)
            }
            Some('"') | Some('\'') => self.parse_string().map(|s| Expr::Literal(Literal::String(s))),
            Some(ch) if ch.is_ascii_digit() || ch == '.' => self.parse_number(),
            Some(ch) if is_ident_start(ch) => {
                let name = self.parse_identifier()?;
                Ok(match name.as_str() {
                    "true" => Expr::Literal(Literal::Boolean(true)),
                    "false" => Expr::Literal(Literal::Boolean(false)),
                    "null" => Expr::Literal(Literal::Null),
                    "undefined" => Expr::Literal(Literal::Undefined),
                    _ => Expr::Identifier(name),
                })
            }
            Some(ch) => Err(self.error(format!("Unexpected '{}'", ch))),
            None => Err(self.error("Unexpected end of expression")),
        }
    }

    fn parse_identifier(&mut self) -> Result<String, SyntaxError> {
        let start = self.pos;
        match self.peek_char() {
            Some(ch) if is_ident_start(ch) => self.advance(ch.len_utf8()),
            _ => return Err(self.error("Expected an identifier")),
        }
        while let Some(ch) = self.peek_char() {
            if is_ident_char(ch) {
                self.advance(ch.len_utf8());
            } else {
                break;
            }
        }
        Ok(self.input[start..self.pos].to_string())
    }

    fn parse_number(&mut self) -> Result<Expr, SyntaxError> {
        let start = self.pos;
        let mut has_digits = false;
        while let Some(ch) = self.peek_char() {
            if ch.is_ascii_digit() {
                has_digits = true;
                self.advance(1);
            } else {
                break;
            }
        }
        if self.peek_char() == Some('.') {
            self.advance(1);
            while let Some(ch) = self.peek_char() {
                if ch.is_ascii_digit() {
                    has_digits = true;
                    self.advance(1);
                } else {
                    break;
                }
            }
        }
        if !has_digits {
            self.pos = start;
            return Err(self.error("Expected a number"));
        }
        if let Some('e' | 'E') = self.peek_char() {
            self.advance(1);
            if let Some('+' | '-') = self.peek_char() {
                self.advance(1);
            }
            let exp_start = self.pos;
            while let Some(ch) = self.peek_char() {
                if ch.is_ascii_digit() {
                    self.advance(1);
                } else {
                    break;
                }
            }
            if self.pos == exp_start {
                return Err(self.error("Expected exponent digits"));
            }
        }
        let text = &self.input[start..self.pos];
        let n: f64 = text
            .parse()
            .map_err(|_| self.error(format!("Invalid number: {}", text)))?;
        Ok(Expr::Literal(Literal::Number(n)))
    }

    fn parse_string(&mut self) -> Result<String, SyntaxError> {
        let quote = match self.peek_char() {
            Some(q @ ('"' | '\'')) => q,
            _ => return Err(self.error("Expected a string")),
        };
        let begin = self.pos;
        self.advance(1);
        let mut result = String::new();
        loop {
            match self.peek_char() {
                None => {
                    self.pos = begin;
                    return Err(self.error("Unterminated string"));
                }
                Some(ch) if ch == quote => {
                    self.advance(1);
                    return Ok(result);
                }
                Some('\\') => {
                    self.advance(1);
                    match self.peek_char() {
                        None => return Err(self.error("Unterminated escape sequence")),
                        Some(esc) => {
                            self.advance(esc.len_utf8());
                            result.push(match esc {
                                'n' => '\n',
                                't' => '\t',
                                'r' => '\r',
                                other => other,
                            });
                        }
                    }
                }
                Some(ch) => {
                    self.advance(ch.len_utf8());
                    result.push(ch);
                }
            }
        }
    }
}

fn is_ident_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_' || ch == '$'
}

fn is_ident_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '$'
}
