use crate::bytecode::opcode::Opcode;
use crate::source::SourceFile;

/// Token kind. Tokens carry no text; values are sliced from the source
/// buffer through the span when needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TokenKind {
    // Keywords
    KwModule,
    KwIn,
    KwOut,
    KwStart,
    KwEnd,
    KwLocal,
    KwRef,
    KwGlobal,
    KwRequires,
    KwVoid,
    KwFor,
    KwTrue,
    KwFalse,
    KwInteger,
    KwUinteger,
    KwString,
    KwVector,

    // Syntax
    Semicolon,
    Colon,
    Assign,
    Period,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Plus,
    Minus,
    Star,
    Divide,
    Invert,
    Ampersand,
    Caret,
    Pipe,
    LessThan,
    LessEq,
    GreaterThan,
    GreaterEq,
    Equiv,
    NotEquiv,

    // Literals and names
    NumberDec,
    NumberHex,
    NumberBin,
    BitLiteral,
    StringLit,
    VarName,
    /// Builtin function name (`print`, `println`, `min`, `max`).
    Function,

    // Synthesized inside the expression compiler, never lexed.
    UnaryMinus,
    ModuleRef,
}

/// A lexed token: kind plus byte span into the source buffer.
#[derive(Debug, Clone, Copy)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

impl Token {
    pub fn value<'a>(&self, src: &'a SourceFile) -> &'a str {
        src.slice(self.start, self.end)
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Human-readable description used in diagnostics, e.g. `` `foo' ``.
    pub fn describe(&self, src: &SourceFile) -> String {
        format!("`{}'", self.value(src))
    }
}

impl TokenKind {
    pub fn is_number(self) -> bool {
        matches!(
            self,
            TokenKind::NumberDec | TokenKind::NumberHex | TokenKind::NumberBin
        )
    }

    pub fn is_operator(self) -> bool {
        operator_info(self).is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assoc {
    LeftToRight,
    RightToLeft,
}

/// Precedence, associativity, and emitted opcode for an operator token.
#[derive(Debug, Clone, Copy)]
pub struct OpInfo {
    pub precedence: u8,
    pub assoc: Assoc,
    pub opcode: Opcode,
}

const fn op(precedence: u8, assoc: Assoc, opcode: Opcode) -> Option<OpInfo> {
    Some(OpInfo {
        precedence,
        assoc,
        opcode,
    })
}

/// The static operator table. Higher precedence binds tighter.
pub fn operator_info(kind: TokenKind) -> Option<OpInfo> {
    use Assoc::*;
    match kind {
        TokenKind::Period => op(60, LeftToRight, Opcode::GetField),

        TokenKind::UnaryMinus => op(45, RightToLeft, Opcode::UnaryNegate),
        TokenKind::Invert => op(45, RightToLeft, Opcode::BinaryNot),

        TokenKind::Divide => op(40, LeftToRight, Opcode::Divide),
        TokenKind::Star => op(40, LeftToRight, Opcode::Multiply),
        TokenKind::Minus => op(35, LeftToRight, Opcode::Subtract),
        TokenKind::Plus => op(35, LeftToRight, Opcode::Add),

        TokenKind::LessThan => op(30, LeftToRight, Opcode::CmpLt),
        TokenKind::LessEq => op(30, LeftToRight, Opcode::CmpLe),
        TokenKind::GreaterThan => op(30, LeftToRight, Opcode::CmpGt),
        TokenKind::GreaterEq => op(30, LeftToRight, Opcode::CmpGe),

        TokenKind::Equiv => op(25, LeftToRight, Opcode::CmpEq),
        TokenKind::NotEquiv => op(25, LeftToRight, Opcode::CmpNe),

        TokenKind::Ampersand => op(20, LeftToRight, Opcode::BinaryAnd),
        TokenKind::Caret => op(15, LeftToRight, Opcode::BinaryXor),
        TokenKind::Pipe => op(10, LeftToRight, Opcode::BinaryOr),

        TokenKind::Colon => op(7, LeftToRight, Opcode::RangeDesc),
        TokenKind::Assign => op(5, RightToLeft, Opcode::Assign),

        _ => None,
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TokenKind::KwModule => "module",
            TokenKind::KwIn => "in",
            TokenKind::KwOut => "out",
            TokenKind::KwStart => "start",
            TokenKind::KwEnd => "end",
            TokenKind::KwLocal => "local",
            TokenKind::KwRef => "ref",
            TokenKind::KwGlobal => "global",
            TokenKind::KwRequires => "requires",
            TokenKind::KwVoid => "void",
            TokenKind::KwFor => "for",
            TokenKind::KwTrue => "true",
            TokenKind::KwFalse => "false",
            TokenKind::KwInteger => "integer",
            TokenKind::KwUinteger => "uinteger",
            TokenKind::KwString => "string",
            TokenKind::KwVector => "vector",
            TokenKind::Semicolon => ";",
            TokenKind::Colon => ":",
            TokenKind::Assign => "=",
            TokenKind::Period => ".",
            TokenKind::Comma => ",",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Divide => "/",
            TokenKind::Invert => "~",
            TokenKind::Ampersand => "&",
            TokenKind::Caret => "^",
            TokenKind::Pipe => "|",
            TokenKind::LessThan => "<",
            TokenKind::LessEq => "<=",
            TokenKind::GreaterThan => ">",
            TokenKind::GreaterEq => ">=",
            TokenKind::Equiv => "==",
            TokenKind::NotEquiv => "!=",
            TokenKind::NumberDec => "decimal number",
            TokenKind::NumberHex => "hex number",
            TokenKind::NumberBin => "binary number",
            TokenKind::BitLiteral => "bit literal",
            TokenKind::StringLit => "string literal",
            TokenKind::VarName => "variable name",
            TokenKind::Function => "builtin function",
            TokenKind::UnaryMinus => "unary -",
            TokenKind::ModuleRef => "module reference",
        };
        write!(f, "{}", name)
    }
}
