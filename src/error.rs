use crate::source::SourceFile;
use crate::token::Token;

/// Compilation failure. `Lex` and `Parse` point back into the source so
/// they can be rendered with a caret; `Internal` marks bugs in the
/// compiler itself and never carries a user-facing location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    Lex {
        message: String,
        offset: usize,
    },
    Parse {
        message: String,
        offset: usize,
        len: usize,
    },
    Internal(String),
}

impl CompileError {
    pub fn lex(message: impl Into<String>, offset: usize) -> CompileError {
        CompileError::Lex {
            message: message.into(),
            offset,
        }
    }

    pub fn parse(message: impl Into<String>, token: &Token) -> CompileError {
        CompileError::Parse {
            message: message.into(),
            offset: token.start,
            len: token.len().max(1),
        }
    }

    pub fn parse_at(message: impl Into<String>, offset: usize) -> CompileError {
        CompileError::Parse {
            message: message.into(),
            offset,
            len: 1,
        }
    }

    pub fn internal(message: impl Into<String>) -> CompileError {
        CompileError::Internal(message.into())
    }

    /// Full diagnostic with source line and caret, in the layout the CLI
    /// prints to stdout.
    pub fn render(&self, src: &SourceFile) -> String {
        match self {
            CompileError::Lex { message, offset } => {
                let (line, col) = src.line_col(*offset);
                format!(
                    "LexerError in file '{}':\n{}\nln:{},col:{}\n{}",
                    src.name,
                    message,
                    line,
                    col,
                    src.excerpt(*offset, 1)
                )
            }
            CompileError::Parse {
                message,
                offset,
                len,
            } => {
                let (line, col) = src.line_col(*offset);
                format!(
                    "ParseError in file '{}':\n{}\nln:{},col:{}\n{}",
                    src.name,
                    message,
                    line,
                    col,
                    src.excerpt(*offset, *len)
                )
            }
            CompileError::Internal(message) => {
                format!("InternalError in file '{}':\n{}\n", src.name, message)
            }
        }
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileError::Lex { message, offset } => {
                write!(f, "lexer error at byte {}: {}", offset, message)
            }
            CompileError::Parse {
                message, offset, ..
            } => {
                write!(f, "parse error at byte {}: {}", offset, message)
            }
            CompileError::Internal(message) => {
                write!(f, "internal error: {}", message)
            }
        }
    }
}

impl std::error::Error for CompileError {}
