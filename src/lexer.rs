use crate::error::CompileError;
use crate::source::SourceFile;
use crate::token::{Token, TokenKind};

/// Tokenizes a whole source file. Comments were already blanked out by
/// `SourceFile`, so the scanner only sees code and whitespace.
pub fn tokenize(src: &SourceFile) -> Result<Vec<Token>, CompileError> {
    let mut lexer = Lexer {
        bytes: src.text().as_bytes(),
        pos: 0,
    };
    lexer.run()
}

struct Lexer<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn current(&self) -> u8 {
        if self.pos < self.bytes.len() {
            self.bytes[self.pos]
        } else {
            0
        }
    }

    fn peek(&self) -> u8 {
        if self.pos + 1 < self.bytes.len() {
            self.bytes[self.pos + 1]
        } else {
            0
        }
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn run(&mut self) -> Result<Vec<Token>, CompileError> {
        let mut tokens = Vec::new();

        while self.pos < self.bytes.len() {
            let c = self.current();
            if c.is_ascii_whitespace() {
                self.advance();
            } else if c.is_ascii_alphabetic() || c == b'_' {
                tokens.push(self.read_word());
            } else if c.is_ascii_digit() {
                tokens.push(self.read_number()?);
            } else if c == b'@' {
                tokens.push(self.read_bit_literal()?);
            } else if c == b'"' {
                tokens.push(self.read_string()?);
            } else {
                tokens.push(self.read_syntax()?);
            }
        }

        Ok(tokens)
    }

    fn read_word(&mut self) -> Token {
        let start = self.pos;
        while self.current().is_ascii_alphanumeric() || self.current() == b'_' {
            self.advance();
        }
        let word = &self.bytes[start..self.pos];

        let kind = match word {
            b"module" => TokenKind::KwModule,
            b"in" | b"in_ports" => TokenKind::KwIn,
            b"out" | b"out_ports" => TokenKind::KwOut,
            b"start" => TokenKind::KwStart,
            b"end" => TokenKind::KwEnd,
            b"local" => TokenKind::KwLocal,
            b"ref" => TokenKind::KwRef,
            b"global" => TokenKind::KwGlobal,
            b"requires" => TokenKind::KwRequires,
            b"void" => TokenKind::KwVoid,
            b"for" => TokenKind::KwFor,
            b"true" => TokenKind::KwTrue,
            b"false" => TokenKind::KwFalse,
            b"integer" => TokenKind::KwInteger,
            b"uinteger" => TokenKind::KwUinteger,
            b"string" => TokenKind::KwString,
            b"vector" => TokenKind::KwVector,
            b"print" | b"println" | b"min" | b"max" => TokenKind::Function,
            _ => TokenKind::VarName,
        };

        Token {
            kind,
            start,
            end: self.pos,
        }
    }

    fn read_number(&mut self) -> Result<Token, CompileError> {
        let start = self.pos;

        if self.current() == b'0' && (self.peek() == b'x' || self.peek() == b'X') {
            self.advance();
            self.advance();
            let digits = self.pos;
            while self.current().is_ascii_hexdigit() {
                self.advance();
            }
            if self.pos == digits {
                return Err(CompileError::lex("hex literal has no digits", start));
            }
            return Ok(Token {
                kind: TokenKind::NumberHex,
                start,
                end: self.pos,
            });
        }

        if self.current() == b'0' && (self.peek() == b'b' || self.peek() == b'B') {
            self.advance();
            self.advance();
            let digits = self.pos;
            while self.current() == b'0' || self.current() == b'1' {
                self.advance();
            }
            if self.pos == digits {
                return Err(CompileError::lex("binary literal has no digits", start));
            }
            return Ok(Token {
                kind: TokenKind::NumberBin,
                start,
                end: self.pos,
            });
        }

        while self.current().is_ascii_digit() {
            self.advance();
        }
        if self.current().is_ascii_alphabetic() || self.current() == b'_' {
            return Err(CompileError::lex(
                "invalid character in number literal",
                self.pos,
            ));
        }
        Ok(Token {
            kind: TokenKind::NumberDec,
            start,
            end: self.pos,
        })
    }

    fn read_bit_literal(&mut self) -> Result<Token, CompileError> {
        let start = self.pos;
        self.advance(); // '@'
        let digits = self.pos;
        while self.current() == b'0' || self.current() == b'1' {
            self.advance();
        }
        if self.pos == digits {
            return Err(CompileError::lex("bit literal has no digits", start));
        }
        Ok(Token {
            kind: TokenKind::BitLiteral,
            start,
            end: self.pos,
        })
    }

    fn read_string(&mut self) -> Result<Token, CompileError> {
        let start = self.pos;
        self.advance(); // opening quote

        loop {
            match self.current() {
                b'"' => {
                    self.advance();
                    return Ok(Token {
                        kind: TokenKind::StringLit,
                        start,
                        end: self.pos,
                    });
                }
                b'\\' => {
                    match self.peek() {
                        b'n' | b't' | b'r' | b'\\' | b'"' | b'0' => {
                            self.advance();
                            self.advance();
                        }
                        _ => {
                            return Err(CompileError::lex(
                                "unrecognized escape sequence",
                                self.pos,
                            ));
                        }
                    }
                }
                b'\n' | 0 => {
                    return Err(CompileError::lex("unterminated string literal", start));
                }
                _ => self.advance(),
            }
        }
    }

    fn read_syntax(&mut self) -> Result<Token, CompileError> {
        let start = self.pos;
        let c = self.current();

        let single = match c {
            b';' => Some(TokenKind::Semicolon),
            b'.' => Some(TokenKind::Period),
            b',' => Some(TokenKind::Comma),
            b'|' => Some(TokenKind::Pipe),
            b'&' => Some(TokenKind::Ampersand),
            b'^' => Some(TokenKind::Caret),
            b'+' => Some(TokenKind::Plus),
            b'/' => Some(TokenKind::Divide),
            b'*' => Some(TokenKind::Star),
            b'~' => Some(TokenKind::Invert),
            b'[' => Some(TokenKind::LBracket),
            b']' => Some(TokenKind::RBracket),
            b'(' => Some(TokenKind::LParen),
            b')' => Some(TokenKind::RParen),
            b'{' => Some(TokenKind::LBrace),
            b'}' => Some(TokenKind::RBrace),
            b'-' => Some(TokenKind::Minus),
            _ => None,
        };

        if let Some(kind) = single {
            self.advance();
            return Ok(Token {
                kind,
                start,
                end: self.pos,
            });
        }

        // Candidates for a trailing '='.
        let (one, two) = match c {
            b':' => (Some(TokenKind::Colon), None),
            b'<' => (Some(TokenKind::LessThan), Some(TokenKind::LessEq)),
            b'>' => (Some(TokenKind::GreaterThan), Some(TokenKind::GreaterEq)),
            b'=' => (Some(TokenKind::Assign), Some(TokenKind::Equiv)),
            b'!' => (None, Some(TokenKind::NotEquiv)),
            _ => (None, None),
        };

        if self.peek() == b'=' {
            if let Some(kind) = two {
                self.advance();
                self.advance();
                return Ok(Token {
                    kind,
                    start,
                    end: self.pos,
                });
            }
        }
        if let Some(kind) = one {
            self.advance();
            return Ok(Token {
                kind,
                start,
                end: self.pos,
            });
        }

        Err(CompileError::lex("unrecognized syntax/operator", start))
    }
}
