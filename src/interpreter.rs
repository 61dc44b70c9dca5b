//! Spec-text interpreter
//!
//! Builds component graphs directly while parsing:
//!
//! ```text
//! program   := statement (';' statement)* ';'?
//! statement := IDENT '=' expr | expr
//! expr      := IDENT '(' paramlist? ')' | IDENT | literal | '[' exprs? ']'
//! param     := IDENT '=' expr | expr
//! ```
//!
//! A bare identifier is first looked up in the environment (the bound object
//! is shared, not copied) and otherwise treated as a zero-argument factory
//! call.

use crate::environment::{Binding, Environment};
use crate::error::SpecError;
use crate::registry::{Component, FactoryRegistry, Registration};
use crate::tokenizer::{Token, TokenKind, Tokenizer};
use crate::value::{coerce, Value};
use tracing::debug;

/// Result of evaluating one spec text.
#[derive(Debug, Clone)]
pub enum Evaluation {
    /// The last statement was a bare expression.
    Value(Value),
    /// The last statement bound this name.
    Bound(String),
    /// The text contained no statements.
    Empty,
}

pub struct Interpreter<'r> {
    registry: &'r FactoryRegistry,
}

impl<'r> Interpreter<'r> {
    pub fn new(registry: &'r FactoryRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &'r FactoryRegistry {
        self.registry
    }

    /// Evaluate every statement in `text` against `env`.
    ///
    /// Bindings are committed to `env` only if the whole text succeeds.
    pub fn eval(&self, text: &str, env: &mut Environment) -> Result<Evaluation, SpecError> {
        let mut staged = env.clone();
        let mut st = Tokenizer::new(text);
        let mut last = Evaluation::Empty;

        loop {
            if st.peek()?.kind == TokenKind::Eof {
                break;
            }
            last = self.statement(&mut st, &mut staged)?;
            let sep = st.next()?;
            match sep.kind {
                TokenKind::Semicolon => continue,
                TokenKind::Eof => break,
                _ => return Err(unexpected(&sep, "';' or end of input")),
            }
        }

        *env = staged;
        Ok(last)
    }

    /// Evaluate `text` and return the component it produces or binds last.
    pub fn parse_and_build(&self, text: &str, env: &mut Environment) -> Result<Component, SpecError> {
        let mut staged = env.clone();
        let component = match self.eval(text, &mut staged)? {
            Evaluation::Value(Value::Object(component)) => component,
            Evaluation::Value(other) => {
                return Err(SpecError::NotAComponent {
                    got: other.type_name(),
                })
            }
            Evaluation::Bound(name) => match staged.get(&name) {
                Some(Value::Object(component)) => component.clone(),
                Some(other) => {
                    return Err(SpecError::NotAComponent {
                        got: other.type_name(),
                    })
                }
                None => return Err(SpecError::NotAComponent { got: name }),
            },
            Evaluation::Empty => {
                return Err(SpecError::NotAComponent {
                    got: "nothing".to_string(),
                })
            }
        };
        *env = staged;
        Ok(component)
    }

    fn statement(&self, st: &mut Tokenizer<'_>, env: &mut Environment) -> Result<Evaluation, SpecError> {
        let first = st.next()?;
        if first.kind == TokenKind::Identifier && st.peek()?.kind == TokenKind::Equals {
            st.next()?;
            env.begin(&first.lexeme, first.line)?;
            let value = self.expr(st, env)?;
            debug!("bound {} = {}", first.lexeme, value);
            env.complete(&first.lexeme, value);
            return Ok(Evaluation::Bound(first.lexeme));
        }
        st.putback()?;
        Ok(Evaluation::Value(self.expr(st, env)?))
    }

    fn expr(&self, st: &mut Tokenizer<'_>, env: &Environment) -> Result<Value, SpecError> {
        let tok = st.next()?;
        match tok.kind {
            TokenKind::Bool => Ok(Value::Bool(tok.lexeme == "true")),
            TokenKind::Number => parse_number(&tok),
            TokenKind::String => Ok(Value::Str(tok.lexeme)),
            TokenKind::LBracket => self.list(st, env),
            TokenKind::Identifier => {
                if st.peek()?.kind == TokenKind::LParen {
                    st.next()?;
                    return self.factory_call(&tok, st, env);
                }
                match env.lookup(&tok.lexeme) {
                    Some(Binding::Bound(value)) => Ok(value.clone()),
                    Some(Binding::InProgress) => Err(SpecError::CyclicSpec {
                        name: tok.lexeme,
                        line: tok.line,
                    }),
                    None => {
                        let reg = self.lookup_factory(&tok)?;
                        reg.construct(&tok.lexeme, Vec::new()).map(Value::Object)
                    }
                }
            }
            _ => Err(unexpected(&tok, "an expression")),
        }
    }

    fn list(&self, st: &mut Tokenizer<'_>, env: &Environment) -> Result<Value, SpecError> {
        let mut items = Vec::new();
        loop {
            if st.peek()?.kind == TokenKind::RBracket {
                st.next()?;
                break;
            }
            items.push(self.expr(st, env)?);
            let sep = st.next()?;
            match sep.kind {
                TokenKind::Comma => continue,
                TokenKind::RBracket => break,
                _ => return Err(unexpected(&sep, "',' or ']'")),
            }
        }
        Ok(Value::List(items))
    }

    /// Parse a parameter list after `name(` and build the component.
    fn factory_call(&self, name: &Token, st: &mut Tokenizer<'_>, env: &Environment) -> Result<Value, SpecError> {
        let reg = self.lookup_factory(name)?;
        let factory = name.lexeme.as_str();
        let mut params: Vec<(String, Value)> = Vec::new();
        let mut next_position = 0;
        let mut seen_named = false;

        loop {
            if st.peek()?.kind == TokenKind::RParen {
                st.next()?;
                break;
            }

            let tok = st.next()?;
            let member = if tok.kind == TokenKind::Identifier && st.peek()?.kind == TokenKind::Equals {
                st.next()?;
                seen_named = true;
                tok.lexeme.clone()
            } else {
                st.putback()?;
                if seen_named {
                    return Err(SpecError::Parse {
                        line: tok.line,
                        message: format!("{}: positional parameter after named parameters", factory),
                    });
                }
                let member = reg.positional_member(next_position).ok_or_else(|| SpecError::Parse {
                    line: tok.line,
                    message: format!(
                        "{} does not accept positional parameter #{}",
                        factory,
                        next_position + 1
                    ),
                })?;
                next_position += 1;
                member.to_string()
            };

            let value = self.expr(st, env)?;
            let declared = reg.member(&member).ok_or_else(|| SpecError::UnknownMember {
                factory: factory.to_string(),
                member: member.clone(),
                line: tok.line,
            })?;
            if params.iter().any(|(existing, _)| *existing == member) {
                return Err(SpecError::DuplicateParameter {
                    factory: factory.to_string(),
                    member,
                    line: tok.line,
                });
            }
            let value = coerce(value, &declared.ty, &member)?;
            params.push((member, value));

            let sep = st.next()?;
            match sep.kind {
                TokenKind::Comma => continue,
                TokenKind::RParen => break,
                _ => return Err(unexpected(&sep, "',' or ')'")),
            }
        }

        reg.construct(factory, params).map(Value::Object)
    }

    fn lookup_factory(&self, name: &Token) -> Result<&'r Registration, SpecError> {
        self.registry.get(&name.lexeme).ok_or_else(|| SpecError::UnknownFactory {
            name: name.lexeme.clone(),
            line: name.line,
        })
    }
}

fn parse_number(tok: &Token) -> Result<Value, SpecError> {
    let is_float = tok.lexeme.contains(&['.', 'e', 'E'][..]);
    let parsed = if is_float {
        match tok.lexeme.parse::<f64>() {
            Ok(x) if x.is_finite() => Ok(Value::Float(x)),
            Ok(_) => Err("out of range for a float".to_string()),
            Err(e) => Err(e.to_string()),
        }
    } else {
        tok.lexeme.parse::<i64>().map(Value::Int).map_err(|e| e.to_string())
    };
    parsed.map_err(|message| SpecError::Lex {
        line: tok.line,
        message: format!("bad number \"{}\": {}", tok.lexeme, message),
    })
}

fn unexpected(found: &Token, expected: &str) -> SpecError {
    SpecError::Parse {
        line: found.line,
        message: format!("expected {} but found {}", expected, found.describe()),
    }
}
