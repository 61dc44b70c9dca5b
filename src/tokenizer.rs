//! Lexer for specification text
//!
//! Tokens are produced lazily. The tokenizer keeps one token of lookahead and
//! remembers the last two tokens it handed out, so the interpreter can put the
//! most recent one back and still ask what came before it.

use crate::error::SpecError;
use std::collections::VecDeque;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    Number,
    String,
    Bool,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Equals,
    Semicolon,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenKind::Identifier => "identifier",
            TokenKind::Number => "number",
            TokenKind::String => "string literal",
            TokenKind::Bool => "boolean",
            TokenKind::LParen => "'('",
            TokenKind::RParen => "')'",
            TokenKind::LBracket => "'['",
            TokenKind::RBracket => "']'",
            TokenKind::Comma => "','",
            TokenKind::Equals => "'='",
            TokenKind::Semicolon => "';'",
            TokenKind::Eof => "end of input",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Source text of the token; for string literals, the unescaped contents.
    pub lexeme: String,
    pub line: usize,
    /// Byte offset of the first character in the source.
    pub offset: usize,
}

impl Token {
    /// Human-readable form used in parse errors.
    pub fn describe(&self) -> String {
        match self.kind {
            TokenKind::Eof => "end of input".to_string(),
            TokenKind::String => format!("string \"{}\"", self.lexeme),
            _ => format!("{} \"{}\"", self.kind, self.lexeme),
        }
    }
}

pub struct Tokenizer<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
    /// Tokens already lexed but not yet consumed (lookahead and pushback).
    pending: VecDeque<Token>,
    /// The last two consumed tokens, oldest first.
    recent: VecDeque<Token>,
    put_back: bool,
}

impl<'a> Tokenizer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            line: 1,
            pending: VecDeque::new(),
            recent: VecDeque::with_capacity(2),
            put_back: false,
        }
    }

    /// Consume and return the next token.
    pub fn next(&mut self) -> Result<Token, SpecError> {
        let token = match self.pending.pop_front() {
            Some(token) => token,
            None => self.lex()?,
        };
        if self.recent.len() == 2 {
            self.recent.pop_front();
        }
        self.recent.push_back(token.clone());
        self.put_back = false;
        Ok(token)
    }

    /// Return the next token without consuming it.
    pub fn peek(&mut self) -> Result<&Token, SpecError> {
        if self.pending.is_empty() {
            let token = self.lex()?;
            self.pending.push_back(token);
        }
        Ok(&self.pending[0])
    }

    /// The most recently consumed token, if any.
    pub fn peek_previous(&self) -> Option<&Token> {
        self.recent.back()
    }

    /// Re-expose the last consumed token to the next call of [`next`].
    ///
    /// Only one level of pushback is supported.
    ///
    /// [`next`]: Tokenizer::next
    pub fn putback(&mut self) -> Result<(), SpecError> {
        if self.put_back {
            return Err(SpecError::Parse {
                line: self.current_line(),
                message: "cannot put back more than one token".to_string(),
            });
        }
        let token = self.recent.pop_back().ok_or_else(|| SpecError::Parse {
            line: self.line,
            message: "no token to put back".to_string(),
        })?;
        self.pending.push_front(token);
        self.put_back = true;
        Ok(())
    }

    /// Line of the most recently consumed token (1-based).
    pub fn current_line(&self) -> usize {
        self.recent.back().map(|t| t.line).unwrap_or(self.line)
    }

    fn peek_char(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek_char() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('#') => self.skip_line(),
                Some('/') if self.src[self.pos..].starts_with("//") => self.skip_line(),
                _ => return,
            }
        }
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.bump() {
            if c == '\n' {
                return;
            }
        }
    }

    fn lex(&mut self) -> Result<Token, SpecError> {
        self.skip_trivia();
        let offset = self.pos;
        let line = self.line;
        let make = |kind, lexeme: String| Token {
            kind,
            lexeme,
            line,
            offset,
        };

        let c = match self.peek_char() {
            Some(c) => c,
            None => return Ok(make(TokenKind::Eof, String::new())),
        };

        let single = match c {
            '(' => Some(TokenKind::LParen),
            ')' => Some(TokenKind::RParen),
            '[' => Some(TokenKind::LBracket),
            ']' => Some(TokenKind::RBracket),
            ',' => Some(TokenKind::Comma),
            '=' => Some(TokenKind::Equals),
            ';' => Some(TokenKind::Semicolon),
            _ => None,
        };
        if let Some(kind) = single {
            self.bump();
            return Ok(make(kind, c.to_string()));
        }

        if c == '"' {
            self.bump();
            let lexeme = self.lex_string(line)?;
            return Ok(make(TokenKind::String, lexeme));
        }

        if c == '-' || c.is_ascii_digit() {
            let lexeme = self.lex_number(line)?;
            return Ok(make(TokenKind::Number, lexeme));
        }

        if c.is_alphabetic() || c == '_' {
            let start = self.pos;
            while let Some(c) = self.peek_char() {
                if c.is_alphanumeric() || c == '_' {
                    self.bump();
                } else {
                    break;
                }
            }
            let lexeme = self.src[start..self.pos].to_string();
            let kind = if lexeme == "true" || lexeme == "false" {
                TokenKind::Bool
            } else {
                TokenKind::Identifier
            };
            return Ok(make(kind, lexeme));
        }

        Err(SpecError::Lex {
            line,
            message: format!("unexpected character '{}'", c),
        })
    }

    fn lex_string(&mut self, start_line: usize) -> Result<String, SpecError> {
        let mut out = String::new();
        loop {
            match self.bump() {
                None => {
                    return Err(SpecError::Lex {
                        line: start_line,
                        message: format!("unterminated string literal \"{}", out),
                    })
                }
                Some('"') => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(other) => out.push(other),
                    None => {
                        return Err(SpecError::Lex {
                            line: start_line,
                            message: "unterminated string literal".to_string(),
                        })
                    }
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn lex_number(&mut self, line: usize) -> Result<String, SpecError> {
        let start = self.pos;
        if self.peek_char() == Some('-') {
            self.bump();
        }
        let digits = self.eat_digits();
        let mut fraction = 0;
        if self.peek_char() == Some('.') {
            self.bump();
            fraction = self.eat_digits();
        }
        if digits == 0 && fraction == 0 {
            return Err(SpecError::Lex {
                line,
                message: format!("malformed number \"{}\"", &self.src[start..self.pos]),
            });
        }
        if matches!(self.peek_char(), Some('e') | Some('E')) {
            self.bump();
            if matches!(self.peek_char(), Some('+') | Some('-')) {
                self.bump();
            }
            if self.eat_digits() == 0 {
                return Err(SpecError::Lex {
                    line,
                    message: format!("malformed exponent in \"{}\"", &self.src[start..self.pos]),
                });
            }
        }
        Ok(self.src[start..self.pos].to_string())
    }

    fn eat_digits(&mut self) -> usize {
        let mut n = 0;
        while matches!(self.peek_char(), Some(c) if c.is_ascii_digit()) {
            self.bump();
            n += 1;
        }
        n
    }
}
