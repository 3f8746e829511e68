//! UQL tokenizer
//!
//! Produces position-tagged tokens; byte positions feed the
//! `UqlSyntax { position }` error contract.

use crate::error::{UdomError, UdomResult};
use crate::types::Compare;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Bare word: keyword, entity, or field name. Keyword status is decided
    /// by the parser, case-insensitively.
    Word(String),
    Str(String),
    Int(i64),
    Float(f64),
    Op(Compare),
    LBrace,
    RBrace,
    Colon,
    Comma,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: usize,
}

pub fn tokenize(input: &str) -> UdomResult<Vec<Token>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;

        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        let pos = i;
        match c {
            '{' => {
                tokens.push(Token { kind: TokenKind::LBrace, pos });
                i += 1;
            }
            '}' => {
                tokens.push(Token { kind: TokenKind::RBrace, pos });
                i += 1;
            }
            ':' => {
                tokens.push(Token { kind: TokenKind::Colon, pos });
                i += 1;
            }
            ',' => {
                tokens.push(Token { kind: TokenKind::Comma, pos });
                i += 1;
            }
            '=' => {
                tokens.push(Token { kind: TokenKind::Op(Compare::Eq), pos });
                i += 1;
            }
            '>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token { kind: TokenKind::Op(Compare::Gte), pos });
                    i += 2;
                } else {
                    tokens.push(Token { kind: TokenKind::Op(Compare::Gt), pos });
                    i += 1;
                }
            }
            '<' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token { kind: TokenKind::Op(Compare::Lte), pos });
                    i += 2;
                } else {
                    tokens.push(Token { kind: TokenKind::Op(Compare::Lt), pos });
                    i += 1;
                }
            }
            '!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token { kind: TokenKind::Op(Compare::Neq), pos });
                    i += 2;
                } else {
                    return Err(UdomError::uql_syntax("Expected '=' after '!'", pos));
                }
            }
            '\'' | '"' => {
                let (text, next) = lex_string(input, i)?;
                tokens.push(Token { kind: TokenKind::Str(text), pos });
                i = next;
            }
            _ if c.is_ascii_digit() || c == '-' => {
                let (kind, next) = lex_number(input, i)?;
                tokens.push(Token { kind, pos });
                i = next;
            }
            _ if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                tokens.push(Token {
                    kind: TokenKind::Word(input[start..i].to_string()),
                    pos,
                });
            }
            other => {
                return Err(UdomError::uql_syntax(
                    format!("Unexpected character '{}'", other),
                    pos,
                ));
            }
        }
    }

    Ok(tokens)
}

fn lex_string(input: &str, start: usize) -> UdomResult<(String, usize)> {
    let bytes = input.as_bytes();
    let quote = bytes[start];
    let mut text = String::new();
    let mut i = start + 1;

    while i < bytes.len() {
        let c = bytes[i];
        if c == quote {
            return Ok((text, i + 1));
        }
        if c == b'\\' {
            let escaped = bytes.get(i + 1).ok_or_else(|| {
                UdomError::uql_syntax("Unterminated escape in string literal", i)
            })?;
            match escaped {
                b'\\' => text.push('\\'),
                b'\'' => text.push('\''),
                b'"' => text.push('"'),
                b'n' => text.push('\n'),
                b't' => text.push('\t'),
                other => {
                    return Err(UdomError::uql_syntax(
                        format!("Unknown escape '\\{}'", *other as char),
                        i,
                    ));
                }
            }
            i += 2;
        } else {
            // Multi-byte UTF-8 sequences pass through intact.
            let ch_len = input[i..].chars().next().map(|ch| ch.len_utf8()).unwrap_or(1);
            text.push_str(&input[i..i + ch_len]);
            i += ch_len;
        }
    }

    Err(UdomError::uql_syntax("Unterminated string literal", start))
}

fn lex_number(input: &str, start: usize) -> UdomResult<(TokenKind, usize)> {
    let bytes = input.as_bytes();
    let mut i = start;
    if bytes[i] == b'-' {
        i += 1;
    }
    let digits_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i == digits_start {
        return Err(UdomError::uql_syntax("Expected digits after '-'", start));
    }

    let mut is_float = false;
    if i < bytes.len() && bytes[i] == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit) {
        is_float = true;
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
    }

    let text = &input[start..i];
    let kind = if is_float {
        TokenKind::Float(
            text.parse::<f64>()
                .map_err(|_| UdomError::uql_syntax("Invalid number literal", start))?,
        )
    } else {
        TokenKind::Int(
            text.parse::<i64>()
                .map_err(|_| UdomError::uql_syntax("Integer literal out of range", start))?,
        )
    };
    Ok((kind, i))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_find_with_comparison() {
        let tokens = tokenize("FIND User WHERE age >= 21").unwrap();
        let kinds: Vec<&TokenKind> = tokens.iter().map(|t| &t.kind).collect();
        assert_eq!(
            kinds,
            [
                &TokenKind::Word("FIND".into()),
                &TokenKind::Word("User".into()),
                &TokenKind::Word("WHERE".into()),
                &TokenKind::Word("age".into()),
                &TokenKind::Op(Compare::Gte),
                &TokenKind::Int(21),
            ]
        );
        // Position of the operator token.
        assert_eq!(tokens[4].pos, 20);
    }

    #[test]
    fn tokenizes_payload_braces_and_literals() {
        let tokens = tokenize(r#"CREATE User {name: 'A\'da', score: -1.5, ok: true}"#).unwrap();
        assert!(tokens.contains(&Token {
            kind: TokenKind::Str("A'da".into()),
            pos: 19
        }));
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Float(-1.5)));
    }

    #[test]
    fn rejects_unterminated_string() {
        let err = tokenize("FIND User WHERE name = 'oops").unwrap_err();
        assert!(matches!(
            err,
            crate::error::UdomError::UqlSyntax { position: 23, .. }
        ));
    }

    #[test]
    fn rejects_bare_bang() {
        assert!(tokenize("FIND User WHERE a ! 1").is_err());
    }
}
