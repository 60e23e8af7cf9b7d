// query/lexer.rs
// Tokenizer for the textual filter language

use std::fmt;

use crate::error::{DocVaultError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Field path or bare word (`address.city`, `active`)
    Ident(String),
    Str(String),
    Number(String),
    True,
    False,
    Null,

    Gt,
    Gte,
    Lt,
    Lte,
    Is,

    And,
    Or,
    Not,

    Exists,
    Has,
    Any,
    All,
    Contains,

    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,

    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Ident(name) => write!(f, "identifier '{}'", name),
            TokenKind::Str(s) => write!(f, "string {:?}", s),
            TokenKind::Number(n) => write!(f, "number {}", n),
            TokenKind::True => f.write_str("'true'"),
            TokenKind::False => f.write_str("'false'"),
            TokenKind::Null => f.write_str("'null'"),
            TokenKind::Gt => f.write_str("'>'"),
            TokenKind::Gte => f.write_str("'>='"),
            TokenKind::Lt => f.write_str("'<'"),
            TokenKind::Lte => f.write_str("'<='"),
            TokenKind::Is => f.write_str("'is'"),
            TokenKind::And => f.write_str("'and'"),
            TokenKind::Or => f.write_str("'or'"),
            TokenKind::Not => f.write_str("'not'"),
            TokenKind::Exists => f.write_str("'exists'"),
            TokenKind::Has => f.write_str("'has'"),
            TokenKind::Any => f.write_str("'any'"),
            TokenKind::All => f.write_str("'all'"),
            TokenKind::Contains => f.write_str("'contains'"),
            TokenKind::LParen => f.write_str("'('"),
            TokenKind::RParen => f.write_str("')'"),
            TokenKind::LBracket => f.write_str("'['"),
            TokenKind::RBracket => f.write_str("']'"),
            TokenKind::Comma => f.write_str("','"),
            TokenKind::Eof => f.write_str("end of input"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset in the source, so error positions index the filter string
    pub pos: usize,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    src: &'a str,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Lexer {
            chars: src.char_indices().peekable(),
            src,
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    fn bump(&mut self) -> Option<(usize, char)> {
        self.chars.next()
    }

    fn offset(&mut self) -> usize {
        self.chars.peek().map_or(self.src.len(), |&(i, _)| i)
    }

    fn next_token(&mut self) -> Result<Token> {
        while self.peek().map_or(false, char::is_whitespace) {
            self.bump();
        }

        let Some((pos, ch)) = self.bump() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                pos: self.src.len(),
            });
        };

        let kind = match ch {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            '>' | '<' => {
                let inclusive = self.peek() == Some('=');
                if inclusive {
                    self.bump();
                }
                match (ch, inclusive) {
                    ('>', false) => TokenKind::Gt,
                    ('>', true) => TokenKind::Gte,
                    (_, false) => TokenKind::Lt,
                    (_, true) => TokenKind::Lte,
                }
            }
            '"' | '\'' => TokenKind::Str(self.read_string(ch, pos)?),
            '-' if self.peek().map_or(false, |c| c.is_ascii_digit()) => {
                TokenKind::Number(self.read_number(pos))
            }
            c if c.is_ascii_digit() => TokenKind::Number(self.read_number(pos)),
            c if c.is_alphabetic() || c == '_' => {
                let word = self.read_word(pos);
                keyword(&word).unwrap_or(TokenKind::Ident(word))
            }
            other => {
                return Err(DocVaultError::InvalidQuery(format!(
                    "unexpected character '{}' at position {}",
                    other, pos
                )))
            }
        };

        Ok(Token { kind, pos })
    }

    fn read_string(&mut self, quote: char, start: usize) -> Result<String> {
        let mut value = String::new();
        loop {
            match self.bump() {
                Some((_, c)) if c == quote => return Ok(value),
                Some((_, '\\')) => match self.bump() {
                    Some((_, escaped)) => value.push(escaped),
                    None => break,
                },
                Some((_, c)) => value.push(c),
                None => break,
            }
        }
        Err(DocVaultError::InvalidQuery(format!(
            "unterminated string starting at position {}",
            start
        )))
    }

    fn read_number(&mut self, start: usize) -> String {
        while self.peek().map_or(false, |c| c.is_ascii_digit()) {
            self.bump();
        }
        // fraction only when a digit follows the dot
        let mut lookahead = self.chars.clone();
        if let (Some((_, '.')), Some((_, d))) = (lookahead.next(), lookahead.next()) {
            if d.is_ascii_digit() {
                self.bump();
                while self.peek().map_or(false, |c| c.is_ascii_digit()) {
                    self.bump();
                }
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let mut lookahead = self.chars.clone();
            lookahead.next();
            let next = lookahead.next().map(|(_, c)| c);
            let exponent = match next {
                Some('+' | '-') => lookahead.next().map_or(false, |(_, c)| c.is_ascii_digit()),
                Some(c) => c.is_ascii_digit(),
                None => false,
            };
            if exponent {
                self.bump();
                if matches!(self.peek(), Some('+' | '-')) {
                    self.bump();
                }
                while self.peek().map_or(false, |c| c.is_ascii_digit()) {
                    self.bump();
                }
            }
        }
        let end = self.offset();
        self.src[start..end].to_string()
    }

    /// Identifier characters plus dots, so `address.city` and `items.0.sku`
    /// come out as one path
    fn read_word(&mut self, start: usize) -> String {
        while self
            .peek()
            .map_or(false, |c| c.is_alphanumeric() || c == '_' || c == '.')
        {
            self.bump();
        }
        let end = self.offset();
        self.src[start..end].to_string()
    }
}

fn keyword(word: &str) -> Option<TokenKind> {
    let kind = match word.to_lowercase().as_str() {
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        "is" => TokenKind::Is,
        "exists" => TokenKind::Exists,
        "has" => TokenKind::Has,
        "any" => TokenKind::Any,
        "all" => TokenKind::All,
        "contains" => TokenKind::Contains,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "null" => TokenKind::Null,
        _ => return None,
    };
    Some(kind)
}

/// Tokenize a filter; the result always ends with `Eof`.
pub fn tokenize(src: &str) -> Result<Vec<Token>> {
    let mut lexer = Lexer::new(src);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_simple_tokens() {
        assert_eq!(
            kinds("age > 30"),
            vec![
                TokenKind::Ident("age".into()),
                TokenKind::Gt,
                TokenKind::Number("30".into()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_comparison_operators() {
        assert_eq!(
            kinds("> >= < <= is"),
            vec![
                TokenKind::Gt,
                TokenKind::Gte,
                TokenKind::Lt,
                TokenKind::Lte,
                TokenKind::Is,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        assert_eq!(
            kinds("NOT x Exists AnD y IS NULL"),
            vec![
                TokenKind::Not,
                TokenKind::Ident("x".into()),
                TokenKind::Exists,
                TokenKind::And,
                TokenKind::Ident("y".into()),
                TokenKind::Is,
                TokenKind::Null,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_paths_strings_and_numbers() {
        assert_eq!(
            kinds("_meta.items.0 is 'it''s' or n < -2.5e3"),
            vec![
                TokenKind::Ident("_meta.items.0".into()),
                TokenKind::Is,
                TokenKind::Str("it".into()),
                TokenKind::Str("s".into()),
                TokenKind::Or,
                TokenKind::Ident("n".into()),
                TokenKind::Lt,
                TokenKind::Number("-2.5e3".into()),
                TokenKind::Eof
            ]
        );
        assert_eq!(
            kinds(r#"name is "say \"hi\"""#)[2],
            TokenKind::Str("say \"hi\"".into())
        );
    }

    #[test]
    fn test_errors() {
        assert!(tokenize("age = 3").is_err());
        assert!(tokenize("name is 'open").is_err());
    }

    #[test]
    fn test_positions_are_byte_offsets() {
        let tokens = tokenize("'é' is x").unwrap();
        let positions: Vec<usize> = tokens.iter().map(|t| t.pos).collect();
        assert_eq!(positions, vec![0, 5, 8, 9]);
    }
}
