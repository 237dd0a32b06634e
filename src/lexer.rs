use crate::ast::Position;
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenType {
    Keyword,
    Ident,
    Number,
    Str,
    Op,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Semicolon,
    Colon,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub typ: TokenType,
    pub value: String,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct LexerError {
    pub message: String,
    pub pos: Position,
}

impl Display for LexerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (line {}, column {})",
            self.message, self.pos.line, self.pos.column
        )
    }
}

impl Error for LexerError {}

pub struct Lexer {
    chars: Vec<char>,
    index: usize,
    line: usize,
    column: usize,
    file: usize,
    keywords: HashSet<&'static str>,
}

impl Lexer {
    pub fn new(source: &str, file: usize) -> Self {
        Self {
            chars: source.chars().collect(),
            index: 0,
            line: 1,
            column: 1,
            file,
            keywords: keyword_set(),
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>, LexerError> {
        let mut tokens = Vec::new();
        while !self.at_end() {
            let ch = self.peek();
            if is_ignorable_format_char(ch) {
                self.advance();
                continue;
            }
            if ch.is_whitespace() {
                self.advance();
                continue;
            }
            if ch == '/' && self.peek_at(1) == '/' {
                self.skip_line_comment();
                continue;
            }
            if ch == '/' && self.peek_at(1) == '*' {
                self.skip_block_comment()?;
                continue;
            }
            if ch == '"' {
                tokens.push(self.read_string()?);
                continue;
            }
            if ch.is_ascii_digit() {
                tokens.push(self.read_number());
                continue;
            }
            if ch.is_ascii_alphabetic() || ch == '_' {
                tokens.push(self.read_identifier());
                continue;
            }
            let pos = self.pos();
            let simple = match ch {
                '(' => Some(TokenType::LParen),
                ')' => Some(TokenType::RParen),
                '[' => Some(TokenType::LBracket),
                ']' => Some(TokenType::RBracket),
                '{' => Some(TokenType::LBrace),
                '}' => Some(TokenType::RBrace),
                ',' => Some(TokenType::Comma),
                ';' => Some(TokenType::Semicolon),
                ':' => Some(TokenType::Colon),
                _ => None,
            };
            if let Some(typ) = simple {
                self.advance();
                tokens.push(self.finish(typ, ch.to_string(), pos));
                continue;
            }
            match ch {
                '*' | '/' | '%' | '<' | '>' | '=' | '!' | '+' | '-' | '.' | '&' | '|' => {
                    tokens.push(self.read_operator()?);
                }
                _ => {
                    return Err(LexerError {
                        message: format!("Unexpected character {:?}", ch),
                        pos,
                    });
                }
            }
        }
        tokens.push(Token {
            typ: TokenType::Eof,
            value: String::new(),
            pos: self.pos(),
        });
        Ok(tokens)
    }

    fn read_operator(&mut self) -> Result<Token, LexerError> {
        let pos = self.pos();
        let ch = self.advance();
        let mut value = ch.to_string();
        match ch {
            '=' | '!' | '<' | '>' => {
                if self.peek() == '=' {
                    value.push(self.advance());
                }
            }
            '+' | '-' => {
                // `+=`, `-=`, `++`, `--`
                if self.peek() == '=' || self.peek() == ch {
                    value.push(self.advance());
                }
            }
            '.' => {
                if self.peek() == '=' {
                    value.push(self.advance());
                }
            }
            '&' | '|' => {
                if self.peek() == ch {
                    value.push(self.advance());
                } else {
                    return Err(LexerError {
                        message: format!("Unexpected character {:?} (did you mean {0:?}{0:?}?)", ch),
                        pos,
                    });
                }
            }
            _ => {}
        }
        Ok(self.finish(TokenType::Op, value, pos))
    }

    fn read_identifier(&mut self) -> Token {
        let pos = self.pos();
        let mut text = String::new();
        text.push(self.advance());
        while !self.at_end() {
            let ch = self.peek();
            if ch.is_ascii_alphanumeric() || ch == '_' {
                text.push(self.advance());
            } else {
                break;
            }
        }
        let lowered = text.to_lowercase();
        if self.keywords.contains(lowered.as_str()) {
            self.finish(TokenType::Keyword, lowered, pos)
        } else {
            self.finish(TokenType::Ident, text, pos)
        }
    }

    fn read_number(&mut self) -> Token {
        let pos = self.pos();
        let mut text = String::new();
        text.push(self.advance());
        let mut seen_dot = false;
        while !self.at_end() {
            let ch = self.peek();
            if ch.is_ascii_digit() {
                text.push(self.advance());
                continue;
            }
            // A dot is part of the number only when digits follow;
            // otherwise it is the concat operator.
            if ch == '.' && !seen_dot && self.peek_at(1).is_ascii_digit() {
                seen_dot = true;
                text.push(self.advance());
                continue;
            }
            break;
        }
        self.finish(TokenType::Number, text, pos)
    }

    fn read_string(&mut self) -> Result<Token, LexerError> {
        let pos = self.pos();
        self.advance();
        let mut out = String::new();
        while !self.at_end() {
            let ch = self.advance();
            if ch == '"' {
                return Ok(self.finish(TokenType::Str, out, pos));
            }
            if ch == '\\' {
                if self.at_end() {
                    break;
                }
                let esc = self.advance();
                let mapped = match esc {
                    '"' => '"',
                    '\\' => '\\',
                    'n' => '\n',
                    'r' => '\r',
                    't' => '\t',
                    _ => esc,
                };
                out.push(mapped);
                continue;
            }
            if ch == '\n' {
                return Err(LexerError {
                    message: "Unterminated string literal".to_string(),
                    pos,
                });
            }
            out.push(ch);
        }
        Err(LexerError {
            message: "Unterminated string literal".to_string(),
            pos,
        })
    }

    fn skip_line_comment(&mut self) {
        while !self.at_end() && self.peek() != '\n' {
            self.advance();
        }
    }

    fn skip_block_comment(&mut self) -> Result<(), LexerError> {
        let pos = self.pos();
        self.advance();
        self.advance();
        while !self.at_end() {
            if self.peek() == '*' && self.peek_at(1) == '/' {
                self.advance();
                self.advance();
                return Ok(());
            }
            self.advance();
        }
        Err(LexerError {
            message: "Unterminated block comment".to_string(),
            pos,
        })
    }

    fn at_end(&self) -> bool {
        self.index >= self.chars.len()
    }

    fn peek(&self) -> char {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> char {
        if self.index + offset >= self.chars.len() {
            '\0'
        } else {
            self.chars[self.index + offset]
        }
    }

    fn advance(&mut self) -> char {
        let ch = self.chars[self.index];
        self.index += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        ch
    }

    fn pos(&self) -> Position {
        Position::new(self.file, self.line, self.column, self.index, self.index)
    }

    fn finish(&self, typ: TokenType, value: String, mut pos: Position) -> Token {
        pos.stop = self.index.saturating_sub(1);
        Token { typ, value, pos }
    }
}

/// Tokenizes one source file; `file` is the diagnostics table index.
pub fn tokenize(source: &str, file: usize) -> Result<Vec<Token>, LexerError> {
    Lexer::new(source, file).tokenize()
}

/// Keyword matching is case-insensitive, like name resolution.
fn keyword_set() -> HashSet<&'static str> {
    [
        "atomic",
        "bool",
        "case",
        "const",
        "costume",
        "default",
        "else",
        "event",
        "false",
        "for",
        "foreach",
        "forever",
        "function",
        "if",
        "import",
        "in",
        "inline",
        "list",
        "module",
        "nameof",
        "num",
        "repeat",
        "return",
        "sprite",
        "string",
        "switch",
        "true",
        "unsafe",
        "until",
        "var",
        "void",
        "while",
    ]
    .into_iter()
    .collect()
}

fn is_ignorable_format_char(ch: char) -> bool {
    matches!(
        ch,
        '\u{feff}' // BOM / zero width no-break space
            | '\u{200b}' // zero width space
            | '\u{200c}' // zero width non-joiner
            | '\u{200d}' // zero width joiner
            | '\u{2060}' // word joiner
    )
}
