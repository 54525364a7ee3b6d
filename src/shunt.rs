//! Operator-precedence expression compiler. Bytecode is emitted in
//! postfix order as operators reduce; alongside the operator stack an
//! eval stack of semantic tags is maintained so operand shapes are
//! checked at compile time.

use crate::bytecode::module::{ModuleDesc, PortDirection, Registry};
use crate::bytecode::opcode::{FunctionId, Opcode};
use crate::error::CompileError;
use crate::source::SourceFile;
use crate::token::{operator_info, Assoc, Token, TokenKind};

/// What a completed subexpression left on the runtime stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalTag {
    Numeric,
    Variable,
    ModuleRef,
    FnArgSentinel,
    ArrSentinel,
}

/// Whether a stop token is consumed (`After`) or left for the caller
/// (`Before`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopPolicy {
    Before,
    After,
}

pub struct ExprCompiler<'a> {
    src: &'a SourceFile,
    tokens: &'a [Token],
    pub pos: usize,
    module: &'a mut ModuleDesc,
    registry: &'a Registry,
    start: usize,
    op_stack: Vec<Token>,
    eval_stack: Vec<EvalTag>,
    // eval-stack depth at each open `{`, innermost last
    brace_marks: Vec<usize>,
}

impl<'a> ExprCompiler<'a> {
    pub fn new(
        src: &'a SourceFile,
        tokens: &'a [Token],
        pos: usize,
        module: &'a mut ModuleDesc,
        registry: &'a Registry,
    ) -> ExprCompiler<'a> {
        ExprCompiler {
            src,
            tokens,
            pos,
            module,
            registry,
            start: pos,
            op_stack: Vec::new(),
            eval_stack: Vec::new(),
            brace_marks: Vec::new(),
        }
    }

    fn next_token(&mut self) -> Result<Token, CompileError> {
        match self.tokens.get(self.pos) {
            Some(tok) => {
                self.pos += 1;
                Ok(*tok)
            }
            None => Err(CompileError::parse_at(
                "unexpected end of file in expression",
                self.src.text().len().saturating_sub(1),
            )),
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, CompileError> {
        let tok = self.next_token()?;
        if tok.kind != kind {
            return Err(CompileError::parse(
                format!("Expecting {}, found {}", what, tok.describe(self.src)),
                &tok,
            ));
        }
        Ok(tok)
    }

    /// Compiles tokens until one of `stops` is hit. The shared cursor ends
    /// up after the stop token (`After`) or on it (`Before`).
    pub fn run(&mut self, stops: &[TokenKind], policy: StopPolicy) -> Result<(), CompileError> {
        while self.pos < self.tokens.len() {
            let tok = self.tokens[self.pos];

            if policy == StopPolicy::Before && stops.contains(&tok.kind) {
                self.finish_before(&tok)?;
                return Ok(());
            }
            self.pos += 1;

            self.step(tok)?;

            if policy == StopPolicy::After && stops.contains(&tok.kind) {
                return Ok(());
            }
        }
        Ok(())
    }

    fn step(&mut self, tok: Token) -> Result<(), CompileError> {
        match tok.kind {
            TokenKind::Comma => self.reduce_trailing_operators()?,
            TokenKind::Semicolon => {
                self.reduce_statement(&tok)?;
                self.module.emit_opcode(Opcode::ClearStack);
            }
            TokenKind::VarName => self.compile_variable(&tok)?,
            TokenKind::KwTrue => {
                self.module.emit_opcode(Opcode::PushTrue);
                self.eval_stack.push(EvalTag::Numeric);
            }
            TokenKind::KwFalse => {
                self.module.emit_opcode(Opcode::PushFalse);
                self.eval_stack.push(EvalTag::Numeric);
            }
            TokenKind::KwRef => self.compile_ref_decl()?,
            TokenKind::KwLocal => self.compile_local_decl()?,
            TokenKind::KwVector => self.compile_vector_call(tok)?,
            TokenKind::KwModule => self.compile_module_instance(&tok)?,
            TokenKind::KwIn | TokenKind::KwOut => self.compile_interface_ref(&tok)?,
            TokenKind::KwGlobal => self.compile_global_ref()?,
            TokenKind::LBracket => {
                self.module.emit_opcode(Opcode::PushArrSentinel);
                self.eval_stack.push(EvalTag::ArrSentinel);
                self.op_stack.push(tok);
            }
            TokenKind::NumberDec | TokenKind::NumberHex | TokenKind::NumberBin => {
                let value = token_number_value(&tok, self.src)?;
                self.module.emit_with_varint(Opcode::PushUinteger, value);
                self.eval_stack.push(EvalTag::Numeric);
            }
            TokenKind::BitLiteral => {
                let idx = self.module.intern(tok.value(self.src));
                self.module
                    .emit_with_varint(Opcode::PushBitLiteral, idx as u64);
                self.eval_stack.push(EvalTag::Variable);
            }
            TokenKind::StringLit => {
                let text = tok.value(self.src);
                let idx = self.module.intern(&text[1..text.len() - 1]);
                self.module.emit_with_varint(Opcode::PushString, idx as u64);
                self.eval_stack.push(EvalTag::Variable);
            }
            TokenKind::LParen => self.op_stack.push(tok),
            TokenKind::LBrace => {
                self.op_stack.push(tok);
                self.brace_marks.push(self.eval_stack.len());
            }
            TokenKind::Function => {
                self.op_stack.push(tok);
                self.module.emit_opcode(Opcode::PushFnArgsSentinel);
                self.expect(TokenKind::LParen, "`('")?;
                self.eval_stack.push(EvalTag::FnArgSentinel);
            }
            TokenKind::RParen => self.close_paren(&tok)?,
            TokenKind::RBracket => self.close_bracket(&tok)?,
            TokenKind::RBrace => self.close_brace(&tok)?,
            _ => self.compile_operator(tok)?,
        }
        Ok(())
    }

    // ============================================================
    // Leaf forms
    // ============================================================

    fn compile_variable(&mut self, tok: &Token) -> Result<(), CompileError> {
        let name = tok.value(self.src);
        let idx = match self.module.lookup(name) {
            Some(idx) => idx,
            None => {
                // field names after `.` live in the callee's namespace
                let after_period = self.pos >= 2
                    && self.tokens[self.pos - 2].kind == TokenKind::Period;
                if !after_period {
                    return Err(CompileError::parse(
                        format!(
                            "local variable with name `{}' does not exist in module `{}'",
                            name, self.module.name
                        ),
                        tok,
                    ));
                }
                self.module.intern(name)
            }
        };
        self.module.emit_with_varint(Opcode::PushLocal, idx as u64);
        self.eval_stack.push(EvalTag::Variable);
        Ok(())
    }

    fn compile_ref_decl(&mut self) -> Result<(), CompileError> {
        let name = self.expect(TokenKind::VarName, "variable name")?;
        match self.tokens.get(self.pos) {
            Some(tok) if tok.kind == TokenKind::Assign => {}
            Some(tok) => {
                let tok = *tok;
                return Err(CompileError::parse(
                    format!("Expecting `=', found {}", tok.describe(self.src)),
                    &tok,
                ));
            }
            None => {
                return Err(CompileError::parse("Expecting `=' after ref name", &name));
            }
        }
        let idx = self.module.intern(name.value(self.src));
        self.module
            .emit_with_varint(Opcode::PushNewLocalRef, idx as u64);
        self.eval_stack.push(EvalTag::Variable);
        Ok(())
    }

    fn compile_local_decl(&mut self) -> Result<(), CompileError> {
        let name = self.expect(TokenKind::VarName, "variable name")?;
        let idx = self.module.intern(name.value(self.src)) as u64;

        let assign_or_colon = self.next_token()?;
        match assign_or_colon.kind {
            TokenKind::Assign => {
                // untyped; the initializer decides
                self.module.emit_with_varint(Opcode::PushNewLocalAny, idx);
                self.op_stack.push(assign_or_colon);
                self.eval_stack.push(EvalTag::Variable);
                return Ok(());
            }
            TokenKind::Semicolon => {
                return Err(CompileError::parse(
                    "Cannot default initialize local without explicit type",
                    &name,
                ));
            }
            TokenKind::Colon => {}
            _ => {
                return Err(CompileError::parse(
                    format!(
                        "Expecting `=' or `:', found {}",
                        assign_or_colon.describe(self.src)
                    ),
                    &assign_or_colon,
                ));
            }
        }

        let typespec = self.next_token()?;
        let op = match typespec.kind {
            TokenKind::KwInteger => Opcode::PushNewLocalInteger,
            TokenKind::KwUinteger => Opcode::PushNewLocalUinteger,
            TokenKind::KwString => Opcode::PushNewLocalString,
            TokenKind::KwVector => Opcode::PushNewLocalVector,
            _ => {
                return Err(CompileError::parse(
                    format!(
                        "Expecting type specifier, found {}",
                        typespec.describe(self.src)
                    ),
                    &typespec,
                ));
            }
        };
        self.module.emit_with_varint(op, idx);
        self.eval_stack.push(EvalTag::Variable);

        let semic_or_assign = self.next_token()?;
        match semic_or_assign.kind {
            // handled by the main loop
            TokenKind::Semicolon | TokenKind::Assign => {
                self.pos -= 1;
                Ok(())
            }
            _ => Err(CompileError::parse(
                format!(
                    "Expecting `;' or `=', found {}",
                    semic_or_assign.describe(self.src)
                ),
                &semic_or_assign,
            )),
        }
    }

    fn compile_vector_call(&mut self, tok: Token) -> Result<(), CompileError> {
        self.expect(TokenKind::LParen, "`('")?;
        self.op_stack.push(tok);
        self.module.emit_opcode(Opcode::PushVecArgsSentinel);
        self.eval_stack.push(EvalTag::FnArgSentinel);
        Ok(())
    }

    fn compile_module_instance(&mut self, tok: &Token) -> Result<(), CompileError> {
        if self.eval_stack.is_empty() || self.op_stack.is_empty() {
            return Err(CompileError::parse(
                "Module instance must be part of assignment to local",
                tok,
            ));
        }
        self.expect(TokenKind::Period, "`.'")?;
        let mut module_name = self.expect(TokenKind::VarName, "module name")?;
        self.expect(TokenKind::LParen, "`('")?;

        self.module.emit_opcode(Opcode::PushModuleArgsSentinel);
        module_name.kind = TokenKind::ModuleRef;
        self.op_stack.push(module_name);
        self.eval_stack.push(EvalTag::ModuleRef);
        Ok(())
    }

    fn compile_interface_ref(&mut self, tok: &Token) -> Result<(), CompileError> {
        self.expect(TokenKind::Period, "`.'")?;
        let name = self.expect(TokenKind::VarName, "variable name")?;
        let value = name.value(self.src);

        let wanted = if tok.kind == TokenKind::KwIn {
            PortDirection::In
        } else {
            PortDirection::Out
        };
        match self.module.interface_element(value) {
            Some(elem) if elem.direction == wanted => {}
            _ => {
                return Err(CompileError::parse(
                    format!(
                        "interface element `{}' is not declared as {} port in module `{}'",
                        value, tok.kind, self.module.name
                    ),
                    &name,
                ));
            }
        }

        let idx = self.module.intern(value) as u64;
        let op = if tok.kind == TokenKind::KwIn {
            Opcode::PushInRef
        } else {
            Opcode::PushOutRef
        };
        self.module.emit_with_varint(op, idx);
        self.eval_stack.push(EvalTag::Variable);
        Ok(())
    }

    fn compile_global_ref(&mut self) -> Result<(), CompileError> {
        use crate::bytecode::module::GlobalValue;

        self.expect(TokenKind::Period, "`.'")?;
        let name = self.expect(TokenKind::VarName, "global name")?;
        let value = name.value(self.src);

        match self.registry.globals.get(value) {
            Some(GlobalValue::Uinteger(v)) => {
                self.module.emit_with_varint(Opcode::PushUinteger, *v);
            }
            Some(GlobalValue::Integer(v)) if *v >= 0 => {
                self.module.emit_with_varint(Opcode::PushUinteger, *v as u64);
            }
            Some(GlobalValue::Integer(v)) => {
                self.module
                    .emit_with_varint(Opcode::PushUinteger, v.unsigned_abs());
                self.module.emit_opcode(Opcode::UnaryNegate);
            }
            Some(GlobalValue::Str(_)) => {
                return Err(CompileError::parse(
                    format!("string global `{}' cannot appear in an expression", value),
                    &name,
                ));
            }
            None => {
                return Err(CompileError::parse(
                    format!("global with name `{}' does not exist", value),
                    &name,
                ));
            }
        }
        self.eval_stack.push(EvalTag::Numeric);
        Ok(())
    }

    // ============================================================
    // Operators & reduction
    // ============================================================

    fn compile_operator(&mut self, mut tok: Token) -> Result<(), CompileError> {
        if tok.kind == TokenKind::Minus && self.minus_is_unary() {
            tok.kind = TokenKind::UnaryMinus;
        }

        let cur = match operator_info(tok.kind) {
            Some(info) => info,
            None => {
                return Err(CompileError::parse(
                    format!("unknown token {}", tok.describe(self.src)),
                    &tok,
                ));
            }
        };

        while let Some(top) = self.op_stack.last().copied() {
            let top_info = match operator_info(top.kind) {
                Some(info) => info,
                None => break, // open bracket, call, or sentinel
            };
            let reduces = top_info.precedence > cur.precedence
                || (top_info.precedence == cur.precedence && cur.assoc == Assoc::LeftToRight);
            if !reduces {
                break;
            }
            self.reduce_one(&top)?;
        }
        self.op_stack.push(tok);
        Ok(())
    }

    /// A minus is unary at expression start or right after another
    /// operator, a comma, or an open bracket.
    fn minus_is_unary(&self) -> bool {
        if self.pos - 1 == self.start {
            return true;
        }
        let prev = self.tokens[self.pos - 2].kind;
        prev.is_operator()
            || matches!(
                prev,
                TokenKind::Comma
                    | TokenKind::LParen
                    | TokenKind::LBracket
                    | TokenKind::LBrace
                    | TokenKind::Semicolon
            )
    }

    /// Checks eval-stack operands for `t`, updates tags, emits the opcode,
    /// and pops `t` off the operator stack.
    fn reduce_one(&mut self, t: &Token) -> Result<(), CompileError> {
        self.eval_operator(t)?;
        let info = operator_info(t.kind)
            .ok_or_else(|| CompileError::internal("operator missing from precedence table"))?;
        self.module.emit_opcode(info.opcode);
        self.op_stack.pop();
        Ok(())
    }

    fn eval_operator(&mut self, t: &Token) -> Result<(), CompileError> {
        match t.kind {
            TokenKind::Period => {
                if self.eval_stack.len() < 2 {
                    return Err(self.operand_error("Insufficient operands for operator", t));
                }
                let field = self.pop_tag();
                if field != EvalTag::Variable {
                    return Err(self.operand_error("Invalid field reference for operator", t));
                }
                let owner = self.pop_tag();
                if owner != EvalTag::Variable {
                    return Err(self.operand_error("Invalid module reference for operator", t));
                }
                self.eval_stack.push(EvalTag::Variable);
            }
            TokenKind::UnaryMinus | TokenKind::Invert => {
                match self.eval_stack.last().copied() {
                    Some(EvalTag::Numeric) | Some(EvalTag::Variable) => {}
                    Some(_) => {
                        return Err(self.operand_error("Invalid type for operator", t));
                    }
                    None => {
                        return Err(self.operand_error("No operand for operator", t));
                    }
                }
                // tag is unchanged
            }
            _ => {
                if self.eval_stack.len() < 2 {
                    return Err(self.operand_error("Insufficient operands for operator", t));
                }
                let rhs = self.pop_tag();
                if rhs != EvalTag::Numeric && rhs != EvalTag::Variable {
                    return Err(
                        self.operand_error("Invalid right-hand operand type for operator", t)
                    );
                }
                let lhs = self.pop_tag();
                if lhs != EvalTag::Numeric && lhs != EvalTag::Variable {
                    return Err(
                        self.operand_error("Invalid left-hand operand type for operator", t)
                    );
                }
                if lhs == EvalTag::Numeric && rhs == EvalTag::Numeric {
                    self.eval_stack.push(EvalTag::Numeric);
                } else {
                    self.eval_stack.push(EvalTag::Variable);
                }
            }
        }
        Ok(())
    }

    fn pop_tag(&mut self) -> EvalTag {
        self.eval_stack.pop().unwrap_or(EvalTag::ArrSentinel)
    }

    fn operand_error(&self, what: &str, t: &Token) -> CompileError {
        CompileError::parse(format!("{} {}", what, t.describe(self.src)), t)
    }

    /// Reduces operators sitting on top of the stack, stopping at the
    /// first open bracket or call marker.
    fn reduce_trailing_operators(&mut self) -> Result<(), CompileError> {
        while let Some(top) = self.op_stack.last().copied() {
            if operator_info(top.kind).is_none() {
                break;
            }
            self.reduce_one(&top)?;
        }
        Ok(())
    }

    /// Full reduction at `;`: every remaining entry must be an operator
    /// and the eval stack must summarize exactly one value.
    fn reduce_statement(&mut self, at: &Token) -> Result<(), CompileError> {
        while let Some(top) = self.op_stack.last().copied() {
            if operator_info(top.kind).is_none() {
                return Err(CompileError::parse(
                    format!("Expecting operator, found {}", top.describe(self.src)),
                    &top,
                ));
            }
            self.reduce_one(&top)?;
        }
        match self.eval_stack.as_slice() {
            [EvalTag::Numeric] | [EvalTag::Variable] => {
                self.eval_stack.clear();
                Ok(())
            }
            _ => Err(CompileError::parse(
                "statement does not reduce to a single value",
                at,
            )),
        }
    }

    fn finish_before(&mut self, at: &Token) -> Result<(), CompileError> {
        self.reduce_statement(at)
    }

    // ============================================================
    // Closers
    // ============================================================

    fn close_paren(&mut self, tok: &Token) -> Result<(), CompileError> {
        self.reduce_trailing_operators()?;

        let top = match self.op_stack.last().copied() {
            Some(top) => top,
            None => return Err(CompileError::parse("Mismatched `)'", tok)),
        };

        match top.kind {
            TokenKind::LParen => {
                self.op_stack.pop();
                Ok(())
            }
            TokenKind::ModuleRef => {
                let idx = self.module.intern(top.value(self.src)) as u64;
                self.module.emit_with_varint(Opcode::ModuleCall, idx);
                self.op_stack.pop();

                while let Some(tag) = self.eval_stack.last() {
                    if *tag == EvalTag::ModuleRef {
                        break;
                    }
                    self.eval_stack.pop();
                }
                if self.eval_stack.pop() != Some(EvalTag::ModuleRef) {
                    return Err(CompileError::parse(
                        format!("Expecting module reference, found {}", top.describe(self.src)),
                        &top,
                    ));
                }
                self.eval_stack.push(EvalTag::Variable);
                Ok(())
            }
            TokenKind::Function => {
                let id = FunctionId::from_source_name(top.value(self.src)).ok_or_else(|| {
                    CompileError::internal(format!(
                        "builtin `{}' has no function id",
                        top.value(self.src)
                    ))
                })?;
                self.module.emit_function_call(id);
                self.op_stack.pop();
                self.collapse_fn_args()?;
                Ok(())
            }
            TokenKind::KwVector => {
                self.module.emit_function_call(FunctionId::Vector);
                self.op_stack.pop();
                self.collapse_fn_args()?;
                Ok(())
            }
            TokenKind::LBracket | TokenKind::LBrace => Err(CompileError::parse(
                format!("Unmatched {}", top.describe(self.src)),
                &top,
            )),
            _ => Err(CompileError::parse(
                format!(
                    "Unknown type when evaluating closing parentheses {}",
                    top.describe(self.src)
                ),
                &top,
            )),
        }
    }

    fn collapse_fn_args(&mut self) -> Result<(), CompileError> {
        while let Some(tag) = self.eval_stack.last() {
            if *tag == EvalTag::FnArgSentinel {
                break;
            }
            self.eval_stack.pop();
        }
        if self.eval_stack.pop() != Some(EvalTag::FnArgSentinel) {
            return Err(CompileError::internal("argument sentinel missing"));
        }
        self.eval_stack.push(EvalTag::Variable);
        Ok(())
    }

    /// `{lo, hi}` builds a range descriptor out of its two operands.
    fn close_brace(&mut self, tok: &Token) -> Result<(), CompileError> {
        self.reduce_trailing_operators()?;

        let top = match self.op_stack.last().copied() {
            Some(top) => top,
            None => return Err(CompileError::parse("Mismatched `}'", tok)),
        };
        match top.kind {
            TokenKind::LBrace => {
                self.op_stack.pop();
                let mark = self
                    .brace_marks
                    .pop()
                    .ok_or_else(|| CompileError::internal("range descriptor mark missing"))?;
                if self.eval_stack.len() != mark + 2 {
                    return Err(CompileError::parse(
                        "range descriptor needs exactly two operands",
                        tok,
                    ));
                }
                let hi = self.pop_tag();
                let lo = self.pop_tag();
                for tag in [lo, hi] {
                    if tag != EvalTag::Numeric && tag != EvalTag::Variable {
                        return Err(CompileError::parse(
                            "invalid operand in range descriptor",
                            tok,
                        ));
                    }
                }
                self.module.emit_opcode(Opcode::RangeDesc);
                self.eval_stack.push(EvalTag::Variable);
                Ok(())
            }
            TokenKind::LParen | TokenKind::LBracket => Err(CompileError::parse(
                format!("Unmatched {}", top.describe(self.src)),
                &top,
            )),
            _ => Err(CompileError::parse("Mismatched `}'", tok)),
        }
    }

    fn close_bracket(&mut self, tok: &Token) -> Result<(), CompileError> {
        while let Some(top) = self.op_stack.last().copied() {
            match top.kind {
                TokenKind::LBracket => {
                    while self.eval_stack.len() > 1
                        && *self.eval_stack.last().unwrap_or(&EvalTag::ArrSentinel)
                            != EvalTag::ArrSentinel
                    {
                        self.eval_stack.pop();
                    }
                    if self.eval_stack.len() <= 1
                        || self.eval_stack.pop() != Some(EvalTag::ArrSentinel)
                    {
                        return Err(CompileError::parse("Unmatched `]'", tok));
                    }
                    if self.eval_stack.last() != Some(&EvalTag::Variable) {
                        return Err(CompileError::parse(
                            "Unable to index non-array entity",
                            &top,
                        ));
                    }
                    // indexed variable stays on the eval stack
                    self.module.emit_opcode(Opcode::IndexCall);
                    self.op_stack.pop();
                    return Ok(());
                }
                TokenKind::LBrace | TokenKind::LParen => {
                    return Err(CompileError::parse(
                        format!("Unmatched {}", top.describe(self.src)),
                        &top,
                    ));
                }
                _ => {
                    if operator_info(top.kind).is_none() {
                        return Err(CompileError::parse(
                            format!(
                                "Unknown type when evaluating closing bracket {}",
                                top.describe(self.src)
                            ),
                            &top,
                        ));
                    }
                    self.reduce_one(&top)?;
                }
            }
        }
        Err(CompileError::parse("Unmatched `]'", tok))
    }
}

/// Numeric value of a `0x`/`0b`/decimal literal token.
pub fn token_number_value(tok: &Token, src: &SourceFile) -> Result<u64, CompileError> {
    let text = tok.value(src);
    let parsed = match tok.kind {
        TokenKind::NumberDec => text.parse::<u64>(),
        TokenKind::NumberHex => u64::from_str_radix(&text[2..], 16),
        TokenKind::NumberBin => u64::from_str_radix(&text[2..], 2),
        _ => {
            return Err(CompileError::internal(format!(
                "token {} is not a number",
                tok.kind
            )));
        }
    };
    parsed.map_err(|_| CompileError::parse("number literal out of range", tok))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::encode::decode_varint;
    use crate::bytecode::module::{GlobalValue, InterfaceElement, PortShape};
    use crate::bytecode::opcode::OperandKind;
    use crate::lexer::tokenize;

    /// Decodes a bytecode stream into "mnemonic [operand]" strings.
    fn ops(module: &ModuleDesc) -> Vec<String> {
        let bytes = &module.bytecode;
        let mut out = Vec::new();
        let mut pos = 0;
        while pos < bytes.len() {
            let (raw, next) = decode_varint(bytes, pos).unwrap();
            let op = Opcode::from_u64(raw).unwrap();
            pos = next;
            match op.operand_kind() {
                OperandKind::None => out.push(op.mnemonic().to_string()),
                OperandKind::Varint => {
                    let (operand, next) = decode_varint(bytes, pos).unwrap();
                    pos = next;
                    out.push(format!("{} {}", op.mnemonic(), operand));
                }
                OperandKind::FnByte => {
                    out.push(format!("{} {}", op.mnemonic(), bytes[pos]));
                    pos += 1;
                }
            }
        }
        out
    }

    fn compile(input: &str, locals: &[&str]) -> Result<ModuleDesc, CompileError> {
        compile_with(input, locals, &Registry::new())
    }

    fn compile_with(
        input: &str,
        locals: &[&str],
        registry: &Registry,
    ) -> Result<ModuleDesc, CompileError> {
        let src = SourceFile::from_str("t.chdl", input);
        let tokens = tokenize(&src).unwrap();
        let mut module = ModuleDesc::new("m");
        for name in locals {
            module.intern(name);
        }
        let mut ec = ExprCompiler::new(&src, &tokens, 0, &mut module, registry);
        ec.run(&[TokenKind::Semicolon], StopPolicy::After)?;
        Ok(module)
    }

    #[test]
    fn test_postfix_order_respects_precedence() {
        let m = compile("a = a + b * c;", &["a", "b", "c"]).unwrap();
        assert_eq!(
            ops(&m),
            vec![
                "push_local 0",
                "push_local 0",
                "push_local 1",
                "push_local 2",
                "mul",
                "add",
                "assign",
                "clear_stack"
            ]
        );
    }

    #[test]
    fn test_left_associativity() {
        let m = compile("a = a - b - c;", &["a", "b", "c"]).unwrap();
        assert_eq!(
            ops(&m),
            vec![
                "push_local 0",
                "push_local 0",
                "push_local 1",
                "sub",
                "push_local 2",
                "sub",
                "assign",
                "clear_stack"
            ]
        );
    }

    #[test]
    fn test_chained_assignment_is_right_associative() {
        let m = compile("a = b = c;", &["a", "b", "c"]).unwrap();
        assert_eq!(
            ops(&m),
            vec![
                "push_local 0",
                "push_local 1",
                "push_local 2",
                "assign",
                "assign",
                "clear_stack"
            ]
        );
    }

    #[test]
    fn test_unary_minus_after_binary_operator() {
        let m = compile("a = a - -b;", &["a", "b"]).unwrap();
        assert_eq!(
            ops(&m),
            vec![
                "push_local 0",
                "push_local 0",
                "push_local 1",
                "unary_negate",
                "sub",
                "assign",
                "clear_stack"
            ]
        );
    }

    #[test]
    fn test_unary_minus_at_expression_start() {
        let m = compile("a = -1 + b;", &["a", "b"]).unwrap();
        assert_eq!(
            ops(&m),
            vec![
                "push_local 0",
                "push_uinteger 1",
                "unary_negate",
                "push_local 1",
                "add",
                "assign",
                "clear_stack"
            ]
        );
    }

    #[test]
    fn test_parentheses_override_precedence() {
        let m = compile("a = (a + b) * c;", &["a", "b", "c"]).unwrap();
        assert_eq!(
            ops(&m),
            vec![
                "push_local 0",
                "push_local 0",
                "push_local 1",
                "add",
                "push_local 2",
                "mul",
                "assign",
                "clear_stack"
            ]
        );
    }

    #[test]
    fn test_nested_function_calls() {
        let m = compile("a = min(a, max(b, c), x);", &["a", "b", "c", "x"]).unwrap();
        assert_eq!(
            ops(&m),
            vec![
                "push_local 0",
                "push_fn_args_sentinel",
                "push_local 0",
                "push_fn_args_sentinel",
                "push_local 1",
                "push_local 2",
                "function_call 3",
                "push_local 3",
                "function_call 2",
                "assign",
                "clear_stack"
            ]
        );
    }

    #[test]
    fn test_array_index() {
        let m = compile("a = b[i + 1];", &["a", "b", "i"]).unwrap();
        assert_eq!(
            ops(&m),
            vec![
                "push_local 0",
                "push_local 1",
                "push_arr_sentinel",
                "push_local 2",
                "push_uinteger 1",
                "add",
                "index_call",
                "assign",
                "clear_stack"
            ]
        );
    }

    #[test]
    fn test_number_radices() {
        let m = compile("a = 0xFF + 0b101 + 9;", &["a"]).unwrap();
        assert_eq!(
            ops(&m),
            vec![
                "push_local 0",
                "push_uinteger 255",
                "push_uinteger 5",
                "add",
                "push_uinteger 9",
                "add",
                "assign",
                "clear_stack"
            ]
        );
    }

    #[test]
    fn test_bit_literal_is_interned() {
        let m = compile("a = @1010;", &["a"]).unwrap();
        assert_eq!(m.constants[1], "@1010");
        assert_eq!(
            ops(&m),
            vec!["push_local 0", "push_bit_literal 1", "assign", "clear_stack"]
        );
    }

    #[test]
    fn test_string_literal_interned_without_quotes() {
        let m = compile("print(\"hello\");", &[]).unwrap();
        assert_eq!(m.constants[0], "hello");
        assert_eq!(
            ops(&m),
            vec![
                "push_fn_args_sentinel",
                "push_string 0",
                "function_call 0",
                "clear_stack"
            ]
        );
    }

    #[test]
    fn test_local_decl_with_type() {
        let m = compile("local x : integer;", &[]).unwrap();
        assert_eq!(m.constants[0], "x");
        assert_eq!(ops(&m), vec!["push_new_local_integer 0", "clear_stack"]);
    }

    #[test]
    fn test_local_decl_with_initializer() {
        let m = compile("local x : uinteger = 5;", &[]).unwrap();
        assert_eq!(
            ops(&m),
            vec![
                "push_new_local_uinteger 0",
                "push_uinteger 5",
                "assign",
                "clear_stack"
            ]
        );
    }

    #[test]
    fn test_untyped_local_requires_initializer() {
        let m = compile("local x = 5;", &[]).unwrap();
        assert_eq!(
            ops(&m),
            vec![
                "push_new_local_any 0",
                "push_uinteger 5",
                "assign",
                "clear_stack"
            ]
        );
        let err = compile("local x;", &[]).unwrap_err();
        assert!(err.to_string().contains("explicit type"));
    }

    #[test]
    fn test_module_instantiation() {
        let m = compile("local x = module.Adder(a, b);", &["a", "b"]).unwrap();
        assert_eq!(
            ops(&m),
            vec![
                "push_new_local_any 2",
                "push_module_args_sentinel",
                "push_local 0",
                "push_local 1",
                "module_call 3",
                "assign",
                "clear_stack"
            ]
        );
        assert_eq!(m.constants[3], "Adder");
    }

    #[test]
    fn test_module_instance_outside_assignment_rejected() {
        let err = compile("module.Adder(a);", &["a"]).unwrap_err();
        assert!(err.to_string().contains("part of assignment"));
    }

    #[test]
    fn test_field_access_interns_field_name() {
        let m = compile("a = inst.sum;", &["a", "inst"]).unwrap();
        assert_eq!(m.constants[2], "sum");
        assert_eq!(
            ops(&m),
            vec![
                "push_local 0",
                "push_local 1",
                "push_local 2",
                "get_field",
                "assign",
                "clear_stack"
            ]
        );
    }

    #[test]
    fn test_undeclared_variable_rejected() {
        let err = compile("a = nosuch;", &["a"]).unwrap_err();
        assert!(err.to_string().contains("does not exist in module"));
    }

    #[test]
    fn test_interface_refs_checked_against_declaration() {
        let src = SourceFile::from_str("t.chdl", "out.sum = in.x;");
        let tokens = tokenize(&src).unwrap();
        let registry = Registry::new();
        let mut module = ModuleDesc::new("m");
        module.add_interface_element(
            "x",
            InterfaceElement {
                direction: PortDirection::In,
                shape: PortShape::Single,
            },
        );
        module.add_interface_element(
            "sum",
            InterfaceElement {
                direction: PortDirection::Out,
                shape: PortShape::Single,
            },
        );
        let mut ec = ExprCompiler::new(&src, &tokens, 0, &mut module, &registry);
        ec.run(&[TokenKind::Semicolon], StopPolicy::After).unwrap();
        assert_eq!(
            ops(&module),
            vec!["push_out_ref 0", "push_in_ref 1", "assign", "clear_stack"]
        );
    }

    #[test]
    fn test_interface_ref_direction_mismatch() {
        let src = SourceFile::from_str("t.chdl", "a = in.sum;");
        let tokens = tokenize(&src).unwrap();
        let registry = Registry::new();
        let mut module = ModuleDesc::new("m");
        module.intern("a");
        module.add_interface_element(
            "sum",
            InterfaceElement {
                direction: PortDirection::Out,
                shape: PortShape::Single,
            },
        );
        let mut ec = ExprCompiler::new(&src, &tokens, 0, &mut module, &registry);
        let err = ec.run(&[TokenKind::Semicolon], StopPolicy::After).unwrap_err();
        assert!(err.to_string().contains("not declared as in port"));
    }

    #[test]
    fn test_global_folds_to_constant() {
        let mut registry = Registry::new();
        registry.add_global("Width", GlobalValue::Integer(32));
        let m = compile_with("a = global.Width;", &["a"], &registry).unwrap();
        assert_eq!(
            ops(&m),
            vec!["push_local 0", "push_uinteger 32", "assign", "clear_stack"]
        );
    }

    #[test]
    fn test_string_global_rejected_in_expression() {
        let mut registry = Registry::new();
        registry.add_global("Name", GlobalValue::Str("top".to_string()));
        let err = compile_with("a = global.Name;", &["a"], &registry).unwrap_err();
        assert!(err.to_string().contains("cannot appear in an expression"));
        let err = compile_with("a = global.Missing;", &["a"], &registry).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_mismatched_closers() {
        assert!(compile("a = (b;", &["a", "b"]).is_err());
        assert!(compile("a = b);", &["a", "b"]).is_err());
        assert!(compile("a = b];", &["a", "b"]).is_err());
        assert!(compile("a = (b];", &["a", "b"]).is_err());
    }

    #[test]
    fn test_statement_must_reduce_to_one_value() {
        let err = compile("a b;", &["a", "b"]).unwrap_err();
        assert!(err.to_string().contains("single value"));
    }

    #[test]
    fn test_stop_before_leaves_token_for_caller() {
        let src = SourceFile::from_str("t.chdl", "n * 2]");
        let tokens = tokenize(&src).unwrap();
        let registry = Registry::new();
        let mut module = ModuleDesc::new("m");
        module.intern("n");
        let mut ec = ExprCompiler::new(&src, &tokens, 0, &mut module, &registry);
        ec.run(&[TokenKind::RBracket], StopPolicy::Before).unwrap();
        let stopped_at = ec.pos;
        assert_eq!(tokens[stopped_at].kind, TokenKind::RBracket);
        assert_eq!(ops(&module), vec!["push_local 0", "push_uinteger 2", "mul"]);
    }

    #[test]
    fn test_true_false_literals() {
        let m = compile("a = true == false;", &["a"]).unwrap();
        assert_eq!(
            ops(&m),
            vec![
                "push_local 0",
                "push_true",
                "push_false",
                "cmp_eq",
                "assign",
                "clear_stack"
            ]
        );
    }

    #[test]
    fn test_vector_constructor() {
        let m = compile("local v = vector(1, 2);", &[]).unwrap();
        assert_eq!(
            ops(&m),
            vec![
                "push_new_local_any 0",
                "push_vec_args_sentinel",
                "push_uinteger 1",
                "push_uinteger 2",
                "function_call 4",
                "assign",
                "clear_stack"
            ]
        );
    }

    #[test]
    fn test_ref_declaration() {
        let m = compile("ref r = a;", &["a"]).unwrap();
        assert_eq!(
            ops(&m),
            vec![
                "push_new_local_ref 1",
                "push_local 0",
                "assign",
                "clear_stack"
            ]
        );
    }

    #[test]
    fn test_brace_range_descriptor() {
        let m = compile("a = {0, 7};", &["a"]).unwrap();
        assert_eq!(
            ops(&m),
            vec![
                "push_local 0",
                "push_uinteger 0",
                "push_uinteger 7",
                "range_desc",
                "assign",
                "clear_stack"
            ]
        );
        assert!(compile("a = {1};", &["a"]).is_err());
        assert!(compile("a = {1, 2;", &["a"]).is_err());
        assert!(compile("a = {1, 2, 3};", &["a"]).is_err());
    }

    #[test]
    fn test_brace_range_inside_call_arguments() {
        let m = compile("a = min(x, {1, 2});", &["a", "x"]).unwrap();
        assert_eq!(
            ops(&m),
            vec![
                "push_local 0",
                "push_fn_args_sentinel",
                "push_local 1",
                "push_uinteger 1",
                "push_uinteger 2",
                "range_desc",
                "function_call 2",
                "assign",
                "clear_stack"
            ]
        );
    }

    #[test]
    fn test_brace_range_must_not_absorb_sibling_argument() {
        // `x` sits below the `{` and must not become the low bound
        let err = compile("a = min(x, {1});", &["a", "x"]).unwrap_err();
        assert!(err.to_string().contains("exactly two operands"));
    }

    #[test]
    fn test_nested_brace_ranges() {
        let m = compile("a = {1, {2, 3}};", &["a"]).unwrap();
        assert_eq!(
            ops(&m),
            vec![
                "push_local 0",
                "push_uinteger 1",
                "push_uinteger 2",
                "push_uinteger 3",
                "range_desc",
                "range_desc",
                "assign",
                "clear_stack"
            ]
        );
    }

    #[test]
    fn test_chained_field_access_is_left_associative() {
        let m = compile("a = top.inner.bit;", &["a", "top"]).unwrap();
        assert_eq!(
            ops(&m),
            vec![
                "push_local 0",
                "push_local 1",
                "push_local 2",
                "get_field",
                "push_local 3",
                "get_field",
                "assign",
                "clear_stack"
            ]
        );
    }

    #[test]
    fn test_range_operator() {
        let m = compile("a = b[0:4];", &["a", "b"]).unwrap();
        assert_eq!(
            ops(&m),
            vec![
                "push_local 0",
                "push_local 1",
                "push_arr_sentinel",
                "push_uinteger 0",
                "push_uinteger 4",
                "range_desc",
                "index_call",
                "assign",
                "clear_stack"
            ]
        );
    }
}
