//! FHIRPath lexer.
//!
//! Converts expression source text into a stream of tokens. Handles
//! identifiers, delimited (backtick) identifiers, string escapes, number
//! literals, `@`-prefixed date/time literals, environment variables, operator
//! keywords and punctuation. Invalid input produces a lex error carrying
//! line/column.

use crate::error::{Error, Result};
use crate::token::{Token, TokenType};

/// The FHIRPath lexer.
pub struct Lexer {
    chars: Vec<char>,
    position: usize,
    line: usize,
    column: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            position: 0,
            line: 1,
            column: 1,
        }
    }

    fn current(&self) -> Option<char> {
        self.chars.get(self.position).copied()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.position + 1).copied()
    }

    fn advance(&mut self) {
        if let Some(c) = self.current() {
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        self.position += 1;
    }

    fn lex_error(&self, message: impl Into<String>) -> Error {
        Error::LexError {
            message: message.into(),
            line: self.line,
            column: self.column,
        }
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<()> {
        loop {
            while matches!(self.current(), Some(c) if c.is_whitespace()) {
                self.advance();
            }
            match (self.current(), self.peek()) {
                (Some('/'), Some('/')) => {
                    while let Some(c) = self.current() {
                        self.advance();
                        if c == '\n' {
                            break;
                        }
                    }
                }
                (Some('/'), Some('*')) => {
                    self.advance();
                    self.advance();
                    loop {
                        match (self.current(), self.peek()) {
                            (Some('*'), Some('/')) => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            (Some(_), _) => self.advance(),
                            (None, _) => {
                                return Err(self.lex_error("unterminated block comment"));
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn read_identifier(&mut self) -> String {
        let start = self.position;
        while matches!(self.current(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.advance();
        }
        self.chars[start..self.position].iter().collect()
    }

    /// Shared escape handling for string literals and delimited identifiers.
    fn read_escape(&mut self, out: &mut String) -> Result<()> {
        self.advance(); // consume backslash
        let Some(escaped) = self.current() else {
            return Err(self.lex_error("incomplete escape sequence"));
        };
        match escaped {
            '`' => out.push('`'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            '\\' => out.push('\\'),
            '/' => out.push('/'),
            'f' => out.push('\x0C'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'u' => {
                self.advance(); // consume 'u'
                let mut hex = String::with_capacity(4);
                for _ in 0..4 {
                    match self.current() {
                        Some(h) if h.is_ascii_hexdigit() => {
                            hex.push(h);
                            self.advance();
                        }
                        _ => return Err(self.lex_error("invalid unicode escape sequence")),
                    }
                }
                let code = u32::from_str_radix(&hex, 16)
                    .map_err(|_| self.lex_error("invalid unicode code point"))?;
                out.push(
                    char::from_u32(code)
                        .ok_or_else(|| self.lex_error("invalid unicode character"))?,
                );
                return Ok(()); // already positioned past the sequence
            }
            other => out.push(other),
        }
        self.advance();
        Ok(())
    }

    fn read_quoted(&mut self, quote: char, what: &str) -> Result<String> {
        self.advance(); // opening quote
        let mut value = String::new();
        loop {
            match self.current() {
                Some(c) if c == quote => {
                    self.advance();
                    return Ok(value);
                }
                Some('\\') => self.read_escape(&mut value)?,
                Some(c) => {
                    value.push(c);
                    self.advance();
                }
                None => return Err(self.lex_error(format!("unterminated {what}"))),
            }
        }
    }

    fn read_number(&mut self) -> String {
        let start = self.position;
        while matches!(self.current(), Some(c) if c.is_ascii_digit()) {
            self.advance();
        }
        // Only consume the dot when digits follow; otherwise it belongs to
        // the next token (e.g. `5.toString()`).
        if self.current() == Some('.') && matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.advance();
            while matches!(self.current(), Some(c) if c.is_ascii_digit()) {
                self.advance();
            }
        }
        self.chars[start..self.position].iter().collect()
    }

    fn read_digits(&mut self, count: usize, what: &str) -> Result<String> {
        let mut out = String::with_capacity(count);
        for _ in 0..count {
            match self.current() {
                Some(c) if c.is_ascii_digit() => {
                    out.push(c);
                    self.advance();
                }
                _ => return Err(self.lex_error(format!("expected {count}-digit {what}"))),
            }
        }
        Ok(out)
    }

    /// Date part of a literal: `YYYY[-MM[-DD]]`.
    fn read_date_format(&mut self) -> Result<String> {
        let mut value = self.read_digits(4, "year")?;
        if self.current() == Some('-') {
            value.push('-');
            self.advance();
            value.push_str(&self.read_digits(2, "month")?);
            if self.current() == Some('-') {
                value.push('-');
                self.advance();
                value.push_str(&self.read_digits(2, "day")?);
            }
        }
        Ok(value)
    }

    /// Time part of a literal: `HH[:MM[:SS[.fff]]]`.
    fn read_time_format(&mut self) -> Result<String> {
        let mut value = self.read_digits(2, "hour")?;
        if self.current() == Some(':') {
            value.push(':');
            self.advance();
            value.push_str(&self.read_digits(2, "minute")?);
            if self.current() == Some(':') {
                value.push(':');
                self.advance();
                value.push_str(&self.read_digits(2, "second")?);
                // A trailing dot only belongs to the literal when digits follow
                // (`@T14:34:28.isDistinct()` must not eat the dot).
                if self.current() == Some('.')
                    && matches!(self.peek(), Some(c) if c.is_ascii_digit())
                {
                    value.push('.');
                    self.advance();
                    while let Some(c) = self.current() {
                        if !c.is_ascii_digit() {
                            break;
                        }
                        value.push(c);
                        self.advance();
                    }
                }
            }
        }
        Ok(value)
    }

    /// Timezone suffix: `Z` or `±HH:MM`.
    fn read_timezone_offset(&mut self) -> Result<String> {
        if self.current() == Some('Z') {
            self.advance();
            return Ok("Z".to_string());
        }
        let mut value = String::new();
        if let Some(sign @ ('+' | '-')) = self.current() {
            value.push(sign);
            self.advance();
            value.push_str(&self.read_digits(2, "timezone hour")?);
            if self.current() != Some(':') {
                return Err(self.lex_error("expected ':' in timezone offset"));
            }
            value.push(':');
            self.advance();
            value.push_str(&self.read_digits(2, "timezone minute")?);
        }
        Ok(value)
    }

    /// `@`-prefixed literal: date, datetime, or time.
    fn read_temporal_literal(&mut self) -> Result<(String, TokenType)> {
        self.advance(); // consume '@'

        if self.current() == Some('T') {
            self.advance();
            return Ok((self.read_time_format()?, TokenType::TimeLiteral));
        }

        let date = self.read_date_format()?;
        if self.current() != Some('T') {
            return Ok((date, TokenType::DateLiteral));
        }
        self.advance(); // consume 'T'

        // `@2015T` is a valid partial datetime: a trailing T with no time.
        if !matches!(self.current(), Some(c) if c.is_ascii_digit()) {
            return Ok((format!("{date}T"), TokenType::DateTimeLiteral));
        }

        let time = self.read_time_format()?;
        let tz = if matches!(self.current(), Some('Z' | '+' | '-')) {
            self.read_timezone_offset()?
        } else {
            String::new()
        };
        Ok((format!("{date}T{time}{tz}"), TokenType::DateTimeLiteral))
    }

    /// Produce the next token.
    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_whitespace_and_comments()?;

        let (position, line, column) = (self.position, self.line, self.column);
        let token = |tt, value: &str| Token::new(tt, value.to_string(), position, line, column);

        let Some(c) = self.current() else {
            return Ok(Token::eof(position, line, column));
        };

        let single = |lexer: &mut Self, tt, text: &str| {
            lexer.advance();
            Ok(token(tt, text))
        };

        match c {
            '.' => single(self, TokenType::Dot, "."),
            '[' => single(self, TokenType::OpenBracket, "["),
            ']' => single(self, TokenType::CloseBracket, "]"),
            '(' => single(self, TokenType::OpenParen, "("),
            ')' => single(self, TokenType::CloseParen, ")"),
            '{' => single(self, TokenType::OpenBrace, "{"),
            '}' => single(self, TokenType::CloseBrace, "}"),
            ',' => single(self, TokenType::Comma, ","),
            '+' => single(self, TokenType::Plus, "+"),
            '-' => single(self, TokenType::Minus, "-"),
            '*' => single(self, TokenType::Multiply, "*"),
            '/' => single(self, TokenType::Divide, "/"),
            '&' => single(self, TokenType::Ampersand, "&"),
            '|' => single(self, TokenType::Pipe, "|"),
            '=' => single(self, TokenType::Equal, "="),
            '~' => single(self, TokenType::Equivalent, "~"),
            '<' => {
                self.advance();
                if self.current() == Some('=') {
                    self.advance();
                    Ok(token(TokenType::LessThanOrEqual, "<="))
                } else {
                    Ok(token(TokenType::LessThan, "<"))
                }
            }
            '>' => {
                self.advance();
                if self.current() == Some('=') {
                    self.advance();
                    Ok(token(TokenType::GreaterThanOrEqual, ">="))
                } else {
                    Ok(token(TokenType::GreaterThan, ">"))
                }
            }
            '!' => {
                self.advance();
                match self.current() {
                    Some('=') => {
                        self.advance();
                        Ok(token(TokenType::NotEqual, "!="))
                    }
                    Some('~') => {
                        self.advance();
                        Ok(token(TokenType::NotEquivalent, "!~"))
                    }
                    _ => Err(self.lex_error("unexpected '!'")),
                }
            }
            '%' => {
                self.advance();
                let name = match self.current() {
                    Some('\'') => self.read_quoted('\'', "string literal")?,
                    Some('`') => self.read_quoted('`', "delimited identifier")?,
                    _ => {
                        let ident = self.read_identifier();
                        if ident.is_empty() {
                            return Err(self.lex_error("expected identifier after '%'"));
                        }
                        ident
                    }
                };
                Ok(Token::new(
                    TokenType::EnvVariable,
                    name,
                    position,
                    line,
                    column,
                ))
            }
            '$' => {
                self.advance();
                let ident = self.read_identifier();
                let tt = match ident.as_str() {
                    "this" => TokenType::This,
                    "index" => TokenType::Index,
                    "total" => TokenType::Total,
                    _ => return Err(self.lex_error(format!("unknown variable: ${ident}"))),
                };
                Ok(token(tt, &format!("${ident}")))
            }
            '@' => {
                let (value, tt) = self.read_temporal_literal()?;
                Ok(Token::new(tt, value, position, line, column))
            }
            '\'' => {
                let value = self.read_quoted('\'', "string literal")?;
                Ok(Token::new(
                    TokenType::StringLiteral,
                    value,
                    position,
                    line,
                    column,
                ))
            }
            '`' => {
                let value = self.read_quoted('`', "delimited identifier")?;
                Ok(Token::new(
                    TokenType::DelimitedIdentifier,
                    value,
                    position,
                    line,
                    column,
                ))
            }
            _ if c.is_ascii_digit() => {
                let value = self.read_number();
                Ok(Token::new(
                    TokenType::NumberLiteral,
                    value,
                    position,
                    line,
                    column,
                ))
            }
            _ if c.is_alphabetic() || c == '_' => {
                let ident = self.read_identifier();
                let tt = match ident.as_str() {
                    "true" | "false" => TokenType::BooleanLiteral,
                    "as" => TokenType::As,
                    "is" => TokenType::Is,
                    "div" => TokenType::Div,
                    "mod" => TokenType::Mod,
                    "in" => TokenType::In,
                    "contains" => TokenType::Contains,
                    "and" => TokenType::And,
                    "or" => TokenType::Or,
                    "xor" => TokenType::Xor,
                    "implies" => TokenType::Implies,
                    _ => TokenType::Identifier,
                };
                Ok(Token::new(tt, ident, position, line, column))
            }
            other => Err(self.lex_error(format!("unexpected character: {other}"))),
        }
    }
}
