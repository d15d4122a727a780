//! Lexer for `.rac` source files.
//!
//! Hand-written character scanner producing a token stream terminated by
//! `Eof`. Whitespace is insignificant but tracked for line/column; `#`
//! comments run to end of line. Integer and float literals accept `_`
//! digit separators (`368_740`); ISO dates (`YYYY-MM-DD`) are recognized
//! ahead of numbers and validated at lex time.

use chrono::NaiveDate;

use super::ParseError;

/// Token kinds. Keywords lex as their own kinds, never as `Ident`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Keywords
    Entity,
    Variable,
    Amend,
    From,
    To,
    Match,
    If,
    Else,
    And,
    Or,
    Not,
    True,
    False,

    // Literals
    Int,
    Float,
    Str,
    Date,
    Ident,
    /// Identifier segments joined by `/` with no intervening whitespace.
    Path,

    // Punctuation and operators
    Arrow,    // =>
    Le,       // <=
    Ge,       // >=
    EqEq,     // ==
    Ne,       // !=
    Fk,       // ->
    Colon,    // :
    Plus,     // +
    Minus,    // -
    Star,     // *
    Slash,    // /
    Lt,       // <
    Gt,       // >
    LParen,   // (
    RParen,   // )
    LBracket, // [
    RBracket, // ]
    Comma,    // ,
    Dot,      // .

    Eof,
}

impl TokenKind {
    /// Keyword lookup for a lexed identifier.
    fn keyword(ident: &str) -> Option<TokenKind> {
        match ident {
            "entity" => Some(TokenKind::Entity),
            "variable" => Some(TokenKind::Variable),
            "amend" => Some(TokenKind::Amend),
            "from" => Some(TokenKind::From),
            "to" => Some(TokenKind::To),
            "match" => Some(TokenKind::Match),
            "if" => Some(TokenKind::If),
            "else" => Some(TokenKind::Else),
            "and" => Some(TokenKind::And),
            "or" => Some(TokenKind::Or),
            "not" => Some(TokenKind::Not),
            "true" => Some(TokenKind::True),
            "false" => Some(TokenKind::False),
            _ => None,
        }
    }
}

/// A lexed token with its source position (1-based line and column).
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
    pub line: usize,
    pub col: usize,
}

/// Character scanner over a source string.
pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Lexer {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    /// Tokenize the whole source, appending a final `Eof` token.
    pub fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();

        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.advance();
                continue;
            }
            if c == '#' {
                while self.peek().is_some_and(|c| c != '\n') {
                    self.advance();
                }
                continue;
            }

            let line = self.line;
            let col = self.col;

            let token = if c.is_ascii_digit() {
                self.lex_number(line, col)?
            } else if c == '"' || c == '\'' {
                self.lex_string(c, line, col)?
            } else if is_ident_start(c) {
                self.lex_word(line, col)
            } else {
                self.lex_operator(line, col)?
            };
            tokens.push(token);
        }

        tokens.push(Token {
            kind: TokenKind::Eof,
            value: String::new(),
            line: self.line,
            col: self.col,
        });
        Ok(tokens)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    /// ISO date or numeric literal. Dates take precedence: a 10-char
    /// `dddd-dd-dd` shape not followed by another digit is a date.
    fn lex_number(&mut self, line: usize, col: usize) -> Result<Token, ParseError> {
        if self.looks_like_date() {
            let text: String = self.chars[self.pos..self.pos + 10].iter().collect();
            if NaiveDate::parse_from_str(&text, "%Y-%m-%d").is_err() {
                return Err(ParseError::new(
                    format!("invalid date literal: {}", text),
                    line,
                    col,
                ));
            }
            for _ in 0..10 {
                self.advance();
            }
            return Ok(Token {
                kind: TokenKind::Date,
                value: text,
                line,
                col,
            });
        }

        let mut text = String::new();
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '_') {
            // advance() returns the char just peeked
            text.push(self.advance().unwrap_or_default());
        }

        // Fractional part only when a digit follows the dot, so `1.field`
        // lexes as INT DOT IDENT.
        let mut kind = TokenKind::Int;
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            kind = TokenKind::Float;
            text.push(self.advance().unwrap_or_default());
            while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '_') {
                text.push(self.advance().unwrap_or_default());
            }
        }

        Ok(Token {
            kind,
            value: text,
            line,
            col,
        })
    }

    fn looks_like_date(&self) -> bool {
        let digit = |offset: usize| self.peek_at(offset).is_some_and(|c| c.is_ascii_digit());
        let dash = |offset: usize| self.peek_at(offset) == Some('-');
        digit(0)
            && digit(1)
            && digit(2)
            && digit(3)
            && dash(4)
            && digit(5)
            && digit(6)
            && dash(7)
            && digit(8)
            && digit(9)
            && !digit(10)
    }

    /// String literal with the opening quote's delimiter; no escape
    /// processing.
    fn lex_string(&mut self, quote: char, line: usize, col: usize) -> Result<Token, ParseError> {
        self.advance(); // opening quote
        let mut text = String::new();
        loop {
            match self.advance() {
                Some(c) if c == quote => break,
                Some(c) => text.push(c),
                None => {
                    return Err(ParseError::new("unterminated string literal", line, col));
                }
            }
        }
        Ok(Token {
            kind: TokenKind::Str,
            value: text,
            line,
            col,
        })
    }

    /// Identifier, keyword, or `/`-joined path.
    fn lex_word(&mut self, line: usize, col: usize) -> Token {
        let mut text = self.lex_ident_segment();

        // Path segments bind tighter than division: `a/b` is a path,
        // `a / b` is arithmetic.
        let mut kind = if let Some(kw) = TokenKind::keyword(&text) {
            kw
        } else {
            TokenKind::Ident
        };
        while self.peek() == Some('/') && self.peek_at(1).is_some_and(is_ident_start) {
            self.advance(); // slash
            text.push('/');
            text.push_str(&self.lex_ident_segment());
            kind = TokenKind::Path;
        }

        Token {
            kind,
            value: text,
            line,
            col,
        }
    }

    fn lex_ident_segment(&mut self) -> String {
        let mut text = String::new();
        while self.peek().is_some_and(is_ident_continue) {
            text.push(self.advance().unwrap_or_default());
        }
        text
    }

    fn lex_operator(&mut self, line: usize, col: usize) -> Result<Token, ParseError> {
        let c = self.advance().unwrap_or_default();
        let two = (c, self.peek());
        let kind = match two {
            ('=', Some('>')) => {
                self.advance();
                TokenKind::Arrow
            }
            ('<', Some('=')) => {
                self.advance();
                TokenKind::Le
            }
            ('>', Some('=')) => {
                self.advance();
                TokenKind::Ge
            }
            ('=', Some('=')) => {
                self.advance();
                TokenKind::EqEq
            }
            ('!', Some('=')) => {
                self.advance();
                TokenKind::Ne
            }
            ('-', Some('>')) => {
                self.advance();
                TokenKind::Fk
            }
            (':', _) => TokenKind::Colon,
            ('+', _) => TokenKind::Plus,
            ('-', _) => TokenKind::Minus,
            ('*', _) => TokenKind::Star,
            ('/', _) => TokenKind::Slash,
            ('<', _) => TokenKind::Lt,
            ('>', _) => TokenKind::Gt,
            ('(', _) => TokenKind::LParen,
            (')', _) => TokenKind::RParen,
            ('[', _) => TokenKind::LBracket,
            (']', _) => TokenKind::RBracket,
            (',', _) => TokenKind::Comma,
            ('.', _) => TokenKind::Dot,
            _ => {
                return Err(ParseError::new(
                    format!("unexpected character: {:?}", c),
                    line,
                    col,
                ));
            }
        };

        Ok(Token {
            kind,
            value: String::new(),
            line,
            col,
        })
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}
