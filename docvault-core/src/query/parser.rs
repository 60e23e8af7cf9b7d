// query/parser.rs
// Recursive-descent parser: tokens -> Filter tree
//
// or_expr  := and_expr ('or' and_expr)*
// and_expr := unary ('and' unary)*
// unary    := '(' or_expr ')' | 'not' unary | predicate

use serde_json::{Number, Value};

use crate::error::{DocVaultError, Result};

use super::lexer::{tokenize, Token, TokenKind};
use super::{CompareOp, Filter, HasMode};

pub fn parse_filter(src: &str) -> Result<Filter> {
    let tokens = tokenize(src)?;
    let mut parser = Parser { tokens, pos: 0 };

    if parser.at_end() {
        return Err(DocVaultError::InvalidQuery("empty filter".to_string()));
    }
    let filter = parser.or_expr()?;
    if !parser.at_end() {
        let token = parser.current();
        return Err(DocVaultError::InvalidQuery(format!(
            "unexpected {} at position {}",
            token.kind, token.pos
        )));
    }
    Ok(filter)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn current(&self) -> &Token {
        // tokenize always ends with Eof, so the last token is a safe fallback
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn at_end(&self) -> bool {
        self.current().kind == TokenKind::Eof
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if !self.at_end() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if &self.current().kind == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, expected: &str) -> DocVaultError {
        let token = self.current();
        DocVaultError::InvalidQuery(format!(
            "expected {} at position {}, found {}",
            expected, token.pos, token.kind
        ))
    }

    fn or_expr(&mut self) -> Result<Filter> {
        let mut branches = vec![self.and_expr()?];
        while self.eat(&TokenKind::Or) {
            branches.push(self.and_expr()?);
        }
        Ok(if branches.len() == 1 {
            branches.remove(0)
        } else {
            Filter::Or(branches)
        })
    }

    fn and_expr(&mut self) -> Result<Filter> {
        let mut parts = vec![self.unary()?];
        while self.eat(&TokenKind::And) {
            parts.push(self.unary()?);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            Filter::And(parts)
        })
    }

    fn unary(&mut self) -> Result<Filter> {
        if self.eat(&TokenKind::LParen) {
            let inner = self.or_expr()?;
            if !self.eat(&TokenKind::RParen) {
                return Err(self.error("')'"));
            }
            return Ok(inner);
        }
        if self.eat(&TokenKind::Not) {
            return Ok(Filter::Not(Box::new(self.unary()?)));
        }
        self.predicate()
    }

    fn predicate(&mut self) -> Result<Filter> {
        let field = match &self.current().kind {
            TokenKind::Ident(name) => name.clone(),
            _ => return Err(self.error("field name")),
        };
        self.advance();

        let next = self.current().kind.clone();
        match next {
            TokenKind::Exists => {
                self.advance();
                Ok(Filter::Exists {
                    field,
                    negated: false,
                })
            }
            TokenKind::Not => {
                self.advance();
                if !self.eat(&TokenKind::Exists) {
                    return Err(self.error("'exists' after 'not'"));
                }
                Ok(Filter::Exists {
                    field,
                    negated: true,
                })
            }
            TokenKind::Has => {
                self.advance();
                self.has(field)
            }
            TokenKind::Contains => {
                self.advance();
                match self.value()? {
                    Value::String(text) => Ok(Filter::Contains { field, text }),
                    other => Err(DocVaultError::InvalidQuery(format!(
                        "'contains' needs a string, got {}",
                        other
                    ))),
                }
            }
            TokenKind::Gt | TokenKind::Gte | TokenKind::Lt | TokenKind::Lte | TokenKind::Is => {
                let op = match self.advance().kind {
                    TokenKind::Gt => CompareOp::Gt,
                    TokenKind::Gte => CompareOp::Gte,
                    TokenKind::Lt => CompareOp::Lt,
                    TokenKind::Lte => CompareOp::Lte,
                    _ if self.eat(&TokenKind::Not) => CompareOp::Ne,
                    _ => CompareOp::Eq,
                };
                let value = self.value()?;
                Ok(Filter::Compare { field, op, value })
            }
            // bare field: `active` means `active is true`
            TokenKind::And | TokenKind::Or | TokenKind::RParen | TokenKind::Eof => {
                Ok(Filter::Compare {
                    field,
                    op: CompareOp::Eq,
                    value: Value::Bool(true),
                })
            }
            _ => Err(self.error("comparison operator")),
        }
    }

    fn has(&mut self, field: String) -> Result<Filter> {
        let mode = if self.eat(&TokenKind::Any) {
            HasMode::Any
        } else if self.eat(&TokenKind::All) {
            HasMode::All
        } else {
            let value = self.value()?;
            return Ok(Filter::Has {
                field,
                mode: HasMode::One,
                values: vec![value],
            });
        };

        if !self.eat(&TokenKind::LBracket) {
            return Err(self.error("'['"));
        }
        let mut values = Vec::new();
        if !self.eat(&TokenKind::RBracket) {
            loop {
                values.push(self.value()?);
                if self.eat(&TokenKind::Comma) {
                    continue;
                }
                if self.eat(&TokenKind::RBracket) {
                    break;
                }
                return Err(self.error("',' or ']'"));
            }
        }
        Ok(Filter::Has {
            field,
            mode,
            values,
        })
    }

    fn value(&mut self) -> Result<Value> {
        let token = self.advance();
        match token.kind {
            TokenKind::Str(s) | TokenKind::Ident(s) => Ok(Value::String(s)),
            TokenKind::True => Ok(Value::Bool(true)),
            TokenKind::False => Ok(Value::Bool(false)),
            TokenKind::Null => Ok(Value::Null),
            TokenKind::Number(text) => parse_number(&text, token.pos),
            other => Err(DocVaultError::InvalidQuery(format!(
                "expected value at position {}, found {}",
                token.pos, other
            ))),
        }
    }
}

/// Integers stay integers so they compare and index like stored values
fn parse_number(text: &str, pos: usize) -> Result<Value> {
    if let Ok(i) = text.parse::<i64>() {
        return Ok(Value::from(i));
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| {
            DocVaultError::InvalidQuery(format!("invalid number {} at position {}", text, pos))
        })
}
