//! UQL parser
//!
//! Recursive descent over the token stream. Grammar (keywords are
//! case-insensitive):
//!
//! ```text
//! CREATE <Entity> { field: value, ... }
//! FIND   <Entity> [WHERE cond [AND cond]*] [ORDER BY field [ASC|DESC]] [LIMIT n]
//! UPDATE <Entity> SET { field: value, ... } WHERE cond [AND cond]*
//! DELETE <Entity> WHERE cond [AND cond]*
//! ```
//!
//! `DELETE` and `UPDATE` refuse to run without a WHERE clause; match-all
//! mutations must go through the typed API with an explicit predicate.

use crate::error::{UdomError, UdomResult};
use crate::types::{Condition, OrderBy, Predicate, Record, SortDirection, Value};
use crate::uql::lexer::{tokenize, Token, TokenKind};

/// Engine-agnostic representation of one parsed UQL statement.
///
/// Consumed by exactly one adapter call; never persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum UqlCommand {
    Create {
        entity: String,
        payload: Record,
    },
    Find {
        entity: String,
        predicate: Predicate,
        order_by: Option<OrderBy>,
        limit: Option<u64>,
    },
    Update {
        entity: String,
        changes: Record,
        predicate: Predicate,
    },
    Delete {
        entity: String,
        predicate: Predicate,
    },
}

impl UqlCommand {
    pub fn entity(&self) -> &str {
        match self {
            UqlCommand::Create { entity, .. }
            | UqlCommand::Find { entity, .. }
            | UqlCommand::Update { entity, .. }
            | UqlCommand::Delete { entity, .. } => entity,
        }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            UqlCommand::Create { .. } => "create",
            UqlCommand::Find { .. } => "find",
            UqlCommand::Update { .. } => "update",
            UqlCommand::Delete { .. } => "delete",
        }
    }
}

/// Parses one UQL statement into a [`UqlCommand`].
pub fn parse(input: &str) -> UdomResult<UqlCommand> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        index: 0,
        end: input.len(),
    };
    let command = parser.statement()?;
    parser.expect_end()?;
    Ok(command)
}

struct Parser {
    tokens: Vec<Token>,
    index: usize,
    end: usize,
}

impl Parser {
    fn statement(&mut self) -> UdomResult<UqlCommand> {
        let (keyword, pos) = self.take_word("Expected a UQL command")?;
        match keyword.to_ascii_uppercase().as_str() {
            "CREATE" => self.create(),
            "FIND" => self.find(),
            "UPDATE" => self.update(),
            "DELETE" => self.delete(),
            other => Err(UdomError::uql_syntax(
                format!("Unknown UQL command '{}'", other),
                pos,
            )),
        }
    }

    fn create(&mut self) -> UdomResult<UqlCommand> {
        let entity = self.entity()?;
        let payload = self.payload()?;
        if payload.is_empty() {
            return Err(UdomError::uql_syntax(
                "CREATE payload must not be empty",
                self.current_pos(),
            ));
        }
        Ok(UqlCommand::Create { entity, payload })
    }

    fn find(&mut self) -> UdomResult<UqlCommand> {
        let entity = self.entity()?;
        let predicate = if self.eat_keyword("WHERE") {
            self.predicate()?
        } else {
            Predicate::match_all()
        };

        let order_by = if self.eat_keyword("ORDER") {
            if !self.eat_keyword("BY") {
                return Err(UdomError::uql_syntax(
                    "Expected BY after ORDER",
                    self.current_pos(),
                ));
            }
            let (field, _) = self.take_word("Expected a field name after ORDER BY")?;
            let direction = if self.eat_keyword("DESC") {
                SortDirection::Desc
            } else {
                // ASC is the default and may be spelled out.
                self.eat_keyword("ASC");
                SortDirection::Asc
            };
            Some(OrderBy { field, direction })
        } else {
            None
        };

        let limit = if self.eat_keyword("LIMIT") {
            let pos = self.current_pos();
            match self.next() {
                Some(Token {
                    kind: TokenKind::Int(n),
                    ..
                }) if n >= 0 => Some(n as u64),
                _ => {
                    return Err(UdomError::uql_syntax(
                        "LIMIT requires a non-negative integer",
                        pos,
                    ))
                }
            }
        } else {
            None
        };

        Ok(UqlCommand::Find {
            entity,
            predicate,
            order_by,
            limit,
        })
    }

    fn update(&mut self) -> UdomResult<UqlCommand> {
        let entity = self.entity()?;
        if !self.eat_keyword("SET") {
            return Err(UdomError::uql_syntax(
                "Expected SET after UPDATE entity",
                self.current_pos(),
            ));
        }
        let changes = self.payload()?;
        if changes.is_empty() {
            return Err(UdomError::uql_syntax(
                "UPDATE SET payload must not be empty",
                self.current_pos(),
            ));
        }
        if !self.eat_keyword("WHERE") {
            return Err(UdomError::uql_syntax(
                "UPDATE requires a WHERE clause",
                self.current_pos(),
            ));
        }
        let predicate = self.predicate()?;
        Ok(UqlCommand::Update {
            entity,
            changes,
            predicate,
        })
    }

    fn delete(&mut self) -> UdomResult<UqlCommand> {
        let entity = self.entity()?;
        if !self.eat_keyword("WHERE") {
            return Err(UdomError::uql_syntax(
                "DELETE requires a WHERE clause",
                self.current_pos(),
            ));
        }
        let predicate = self.predicate()?;
        Ok(UqlCommand::Delete { entity, predicate })
    }

    fn entity(&mut self) -> UdomResult<String> {
        let pos = self.current_pos();
        let (word, _) = self.take_word("Expected an entity name")?;
        if Self::is_reserved(&word) {
            return Err(UdomError::uql_syntax(
                format!("'{}' cannot be used as an entity name", word),
                pos,
            ));
        }
        Ok(word)
    }

    /// `{ field: value, ... }`
    fn payload(&mut self) -> UdomResult<Record> {
        let pos = self.current_pos();
        match self.next() {
            Some(Token {
                kind: TokenKind::LBrace,
                ..
            }) => {}
            _ => return Err(UdomError::uql_syntax("Expected '{'", pos)),
        }

        let mut record = Record::new();
        if self.eat(&TokenKind::RBrace) {
            return Ok(record);
        }

        loop {
            let (field, field_pos) = self.take_word("Expected a field name")?;
            if !self.eat(&TokenKind::Colon) {
                return Err(UdomError::uql_syntax(
                    "Expected ':' after field name",
                    self.current_pos(),
                ));
            }
            let value = self.value()?;
            if record.fields.insert(field.clone(), value).is_some() {
                return Err(UdomError::uql_syntax(
                    format!("Duplicate field '{}'", field),
                    field_pos,
                ));
            }
            if self.eat(&TokenKind::Comma) {
                continue;
            }
            if self.eat(&TokenKind::RBrace) {
                return Ok(record);
            }
            return Err(UdomError::uql_syntax(
                "Expected ',' or '}' in payload",
                self.current_pos(),
            ));
        }
    }

    /// `cond [AND cond]*`
    fn predicate(&mut self) -> UdomResult<Predicate> {
        let mut predicate = Predicate::new();
        loop {
            predicate.conditions.push(self.condition()?);
            if !self.eat_keyword("AND") {
                return Ok(predicate);
            }
        }
    }

    fn condition(&mut self) -> UdomResult<Condition> {
        let pos = self.current_pos();
        let (field, _) = self.take_word("Expected a field name in WHERE clause")?;
        if Self::is_reserved(&field) {
            return Err(UdomError::uql_syntax(
                format!("Expected a field name, found keyword '{}'", field),
                pos,
            ));
        }
        let op = match self.next() {
            Some(Token {
                kind: TokenKind::Op(op),
                ..
            }) => op,
            _ => {
                return Err(UdomError::uql_syntax(
                    "Expected a comparison operator",
                    self.current_pos(),
                ))
            }
        };
        let value = self.value()?;
        Ok(Condition { field, op, value })
    }

    fn value(&mut self) -> UdomResult<Value> {
        let pos = self.current_pos();
        match self.next() {
            Some(Token {
                kind: TokenKind::Str(s),
                ..
            }) => Ok(Value::Text(s)),
            Some(Token {
                kind: TokenKind::Int(i),
                ..
            }) => Ok(Value::Int(i)),
            Some(Token {
                kind: TokenKind::Float(f),
                ..
            }) => Ok(Value::Float(f)),
            Some(Token {
                kind: TokenKind::Word(w),
                ..
            }) => match w.to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                "null" => Ok(Value::Null),
                other => Err(UdomError::uql_syntax(
                    format!("Expected a literal value, found '{}'", other),
                    pos,
                )),
            },
            _ => Err(UdomError::uql_syntax("Expected a literal value", pos)),
        }
    }

    // -------- token helpers --------

    fn is_reserved(word: &str) -> bool {
        matches!(
            word.to_ascii_uppercase().as_str(),
            "CREATE" | "FIND" | "UPDATE" | "DELETE" | "WHERE" | "AND" | "SET" | "ORDER" | "BY"
                | "ASC" | "DESC" | "LIMIT"
        )
    }

    fn current_pos(&self) -> usize {
        self.tokens.get(self.index).map(|t| t.pos).unwrap_or(self.end)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.index).cloned();
        if token.is_some() {
            self.index += 1;
        }
        token
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek().map(|t| &t.kind) == Some(kind) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        match self.peek() {
            Some(Token {
                kind: TokenKind::Word(w),
                ..
            }) if w.eq_ignore_ascii_case(keyword) => {
                self.index += 1;
                true
            }
            _ => false,
        }
    }

    fn take_word(&mut self, expected: &str) -> UdomResult<(String, usize)> {
        let pos = self.current_pos();
        match self.next() {
            Some(Token {
                kind: TokenKind::Word(w),
                pos,
            }) => Ok((w, pos)),
            _ => Err(UdomError::uql_syntax(expected.to_string(), pos)),
        }
    }

    fn expect_end(&mut self) -> UdomResult<()> {
        if let Some(token) = self.peek() {
            return Err(UdomError::uql_syntax(
                "Unexpected trailing input",
                token.pos,
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Compare;

    #[test]
    fn parses_find_with_comparison() {
        let cmd = parse("FIND User WHERE age > 21").unwrap();
        assert_eq!(
            cmd,
            UqlCommand::Find {
                entity: "User".into(),
                predicate: Predicate::new().and("age", Compare::Gt, 21i64),
                order_by: None,
                limit: None,
            }
        );
    }

    #[test]
    fn parses_find_with_order_and_limit() {
        let cmd = parse("find users where active = true AND age >= 18 ORDER BY name DESC LIMIT 10")
            .unwrap();
        match cmd {
            UqlCommand::Find {
                entity,
                predicate,
                order_by,
                limit,
            } => {
                assert_eq!(entity, "users");
                assert_eq!(predicate.conditions.len(), 2);
                assert_eq!(predicate.conditions[0].value, Value::Bool(true));
                let order = order_by.unwrap();
                assert_eq!(order.field, "name");
                assert_eq!(order.direction, SortDirection::Desc);
                assert_eq!(limit, Some(10));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn parses_bare_find() {
        let cmd = parse("FIND logs").unwrap();
        assert_eq!(
            cmd,
            UqlCommand::Find {
                entity: "logs".into(),
                predicate: Predicate::match_all(),
                order_by: None,
                limit: None,
            }
        );
    }

    #[test]
    fn parses_create_payload() {
        let cmd = parse(r#"CREATE User {name: "Ada", age: 36, active: true, note: null}"#).unwrap();
        match cmd {
            UqlCommand::Create { entity, payload } => {
                assert_eq!(entity, "User");
                assert_eq!(payload.get("name"), Some(&Value::Text("Ada".into())));
                assert_eq!(payload.get("age"), Some(&Value::Int(36)));
                assert_eq!(payload.get("active"), Some(&Value::Bool(true)));
                assert_eq!(payload.get("note"), Some(&Value::Null));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn parses_update_with_set_and_where() {
        let cmd = parse("UPDATE User SET {age: 37} WHERE name = 'Ada'").unwrap();
        match cmd {
            UqlCommand::Update {
                entity,
                changes,
                predicate,
            } => {
                assert_eq!(entity, "User");
                assert_eq!(changes.get("age"), Some(&Value::Int(37)));
                assert_eq!(predicate.conditions[0].field, "name");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn delete_requires_where() {
        assert!(parse("DELETE User").is_err());
        let cmd = parse("DELETE User WHERE id = 4").unwrap();
        assert_eq!(
            cmd,
            UqlCommand::Delete {
                entity: "User".into(),
                predicate: Predicate::new().eq("id", 4i64),
            }
        );
    }

    #[test]
    fn malformed_find_is_a_syntax_error_with_position() {
        let err = parse("FIND WHERE").unwrap_err();
        match err {
            UdomError::UqlSyntax { position, .. } => assert_eq!(position, 5),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn rejects_or_connective() {
        assert!(parse("FIND User WHERE a = 1 OR b = 2").is_err());
    }

    #[test]
    fn rejects_unknown_command_and_trailing_input() {
        assert!(parse("DROP User").is_err());
        assert!(parse("FIND User extra").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn rejects_duplicate_payload_fields() {
        assert!(parse("CREATE User {a: 1, a: 2}").is_err());
    }
}
