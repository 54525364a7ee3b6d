//! Structural parsing: top-level declarations, module headers, interface
//! blocks, bodies, and loops. Expressions are handed off to the
//! operator-precedence compiler in `shunt`.

use crate::bytecode::module::{
    ArgType, GlobalValue, InterfaceElement, ModuleDesc, PortDirection, PortShape, Registry,
};
use crate::bytecode::opcode::Opcode;
use crate::error::CompileError;
use crate::lexer::tokenize;
use crate::shunt::{token_number_value, ExprCompiler, StopPolicy};
use crate::source::SourceFile;
use crate::token::{Token, TokenKind};

/// Compiles one source file into the registry: modules are sealed as
/// their closing `end` is reached, globals and imports as their `;` is.
pub fn compile_file(src: &SourceFile, registry: &mut Registry) -> Result<(), CompileError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser {
        src,
        tokens: &tokens,
        pos: 0,
        registry,
    };
    parser.run()
}

struct Parser<'a> {
    src: &'a SourceFile,
    tokens: &'a [Token],
    pos: usize,
    registry: &'a mut Registry,
}

impl<'a> Parser<'a> {
    fn current(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn next_token(&mut self, what: &str) -> Result<Token, CompileError> {
        match self.tokens.get(self.pos) {
            Some(tok) => {
                self.pos += 1;
                Ok(*tok)
            }
            None => Err(CompileError::parse_at(
                format!("unexpected end of file, expecting {}", what),
                self.src.text().len().saturating_sub(1),
            )),
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, CompileError> {
        let tok = self.next_token(what)?;
        if tok.kind != kind {
            return Err(CompileError::parse(
                format!("Expecting {}, found {}", what, tok.describe(self.src)),
                &tok,
            ));
        }
        Ok(tok)
    }

    fn run(&mut self) -> Result<(), CompileError> {
        while let Some(tok) = self.current() {
            match tok.kind {
                TokenKind::KwRequires => self.parse_requires()?,
                TokenKind::KwGlobal => self.parse_global()?,
                TokenKind::KwModule => self.parse_module()?,
                _ => {
                    return Err(CompileError::parse(
                        format!(
                            "Expecting `module', `global' or `requires', found {}",
                            tok.describe(self.src)
                        ),
                        &tok,
                    ));
                }
            }
        }
        Ok(())
    }

    // ============================================================
    // Top-level declarations
    // ============================================================

    fn parse_requires(&mut self) -> Result<(), CompileError> {
        self.advance(); // requires
        let path = self.expect(TokenKind::StringLit, "file path string")?;
        let text = path.value(self.src);
        self.registry.add_import(&text[1..text.len() - 1]);
        self.expect(TokenKind::Semicolon, "`;'")?;
        Ok(())
    }

    fn parse_global(&mut self) -> Result<(), CompileError> {
        self.advance(); // global
        let name = self.expect(TokenKind::VarName, "global name")?;
        self.expect(TokenKind::Colon, "`:'")?;
        let typespec = self.next_token("type specifier")?;
        self.expect(TokenKind::Assign, "`='")?;

        let value = match typespec.kind {
            TokenKind::KwInteger => {
                let mut negative = false;
                let mut literal = self.next_token("number literal")?;
                if literal.kind == TokenKind::Minus {
                    negative = true;
                    literal = self.next_token("number literal")?;
                }
                if !literal.kind.is_number() {
                    return Err(CompileError::parse(
                        format!(
                            "Expecting number literal, found {}",
                            literal.describe(self.src)
                        ),
                        &literal,
                    ));
                }
                let magnitude = token_number_value(&literal, self.src)?;
                let signed = i64::try_from(magnitude).map_err(|_| {
                    CompileError::parse("number literal out of range", &literal)
                })?;
                GlobalValue::Integer(if negative { -signed } else { signed })
            }
            TokenKind::KwUinteger => {
                let literal = self.next_token("number literal")?;
                if !literal.kind.is_number() {
                    return Err(CompileError::parse(
                        format!(
                            "Expecting number literal, found {}",
                            literal.describe(self.src)
                        ),
                        &literal,
                    ));
                }
                GlobalValue::Uinteger(token_number_value(&literal, self.src)?)
            }
            TokenKind::KwString => {
                let literal = self.expect(TokenKind::StringLit, "string literal")?;
                let text = literal.value(self.src);
                GlobalValue::Str(text[1..text.len() - 1].to_string())
            }
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

        if !self.registry.add_global(name.value(self.src), value) {
            return Err(CompileError::parse(
                format!("global `{}' already exists", name.value(self.src)),
                &name,
            ));
        }
        self.expect(TokenKind::Semicolon, "`;'")?;
        Ok(())
    }

    // ============================================================
    // Modules
    // ============================================================

    fn parse_module(&mut self) -> Result<(), CompileError> {
        self.advance(); // module
        let name = self.expect(TokenKind::VarName, "module name")?;
        if self.registry.modules.contains_key(name.value(self.src)) {
            return Err(CompileError::parse(
                format!("module `{}' already exists", name.value(self.src)),
                &name,
            ));
        }

        let mut module = ModuleDesc::new(name.value(self.src));
        self.parse_arg_list(&mut module)?;
        self.parse_interface(&mut module)?;
        self.expect(TokenKind::KwStart, "`start'")?;
        module.scope_depth += 1;

        while let Some(tok) = self.current() {
            if tok.kind == TokenKind::KwEnd {
                self.advance();
                module.scope_depth -= 1;
                module.emit_opcode(Opcode::Return);
                self.registry.add_module(module);
                return Ok(());
            }
            self.parse_statement(&mut module)?;
        }
        Err(self.missing_end())
    }

    fn missing_end(&self) -> CompileError {
        CompileError::parse_at(
            "unexpected end of file, missing closing `end'",
            self.src.text().len().saturating_sub(1),
        )
    }

    fn parse_arg_list(&mut self, module: &mut ModuleDesc) -> Result<(), CompileError> {
        self.expect(TokenKind::LParen, "`('")?;

        if self.current().map(|t| t.kind) == Some(TokenKind::KwVoid) {
            self.advance();
            self.expect(TokenKind::RParen, "`)'")?;
            return Ok(());
        }

        loop {
            let name = self.expect(TokenKind::VarName, "argument name")?;
            self.expect(TokenKind::Colon, "`:'")?;
            let typespec = self.next_token("type specifier")?;
            let ty = match typespec.kind {
                TokenKind::KwInteger => ArgType::Integer,
                TokenKind::KwUinteger => ArgType::Uinteger,
                TokenKind::KwString => ArgType::Str,
                TokenKind::KwVector => ArgType::Vector,
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
            if !module.add_argument(name.value(self.src), ty) {
                return Err(CompileError::parse(
                    format!(
                        "argument `{}' already exists in module `{}'",
                        name.value(self.src),
                        module.name
                    ),
                    &name,
                ));
            }

            let sep = self.next_token("`,' or `)'")?;
            match sep.kind {
                TokenKind::Comma => {}
                TokenKind::RParen => return Ok(()),
                _ => {
                    return Err(CompileError::parse(
                        format!("Expecting `,' or `)', found {}", sep.describe(self.src)),
                        &sep,
                    ));
                }
            }
        }
    }

    fn parse_interface(&mut self, module: &mut ModuleDesc) -> Result<(), CompileError> {
        while let Some(tok) = self.current() {
            let direction = match tok.kind {
                TokenKind::KwIn => PortDirection::In,
                TokenKind::KwOut => PortDirection::Out,
                _ => return Ok(()),
            };
            self.advance();
            self.expect(TokenKind::Colon, "`:'")?;
            self.parse_interface_elements(module, direction)?;
        }
        Ok(())
    }

    fn parse_interface_elements(
        &mut self,
        module: &mut ModuleDesc,
        direction: PortDirection,
    ) -> Result<(), CompileError> {
        loop {
            let name = self.expect(TokenKind::VarName, "port name")?;
            let idx = module.intern(name.value(self.src)) as u64;

            let shape = if self.current().map(|t| t.kind) == Some(TokenKind::LBracket) {
                self.advance();
                let (push, set_size) = match direction {
                    PortDirection::In => (Opcode::PushInRef, Opcode::SetInterfaceInputSize),
                    PortDirection::Out => (Opcode::PushOutRef, Opcode::SetInterfaceOutputSize),
                };
                module.emit_with_varint(push, idx);

                let mut ec =
                    ExprCompiler::new(self.src, self.tokens, self.pos, module, self.registry);
                ec.run(&[TokenKind::RBracket], StopPolicy::Before)?;
                self.pos = ec.pos;
                self.expect(TokenKind::RBracket, "`]'")?;

                module.emit_opcode(set_size);
                module.emit_opcode(Opcode::ClearStack);
                PortShape::Array
            } else {
                PortShape::Single
            };

            if !module.add_interface_element(
                name.value(self.src),
                InterfaceElement { direction, shape },
            ) {
                return Err(CompileError::parse(
                    format!(
                        "interface element `{}' already exists in module `{}'",
                        name.value(self.src),
                        module.name
                    ),
                    &name,
                ));
            }

            let sep = self.next_token("`,' or `;'")?;
            match sep.kind {
                TokenKind::Comma => {}
                TokenKind::Semicolon => return Ok(()),
                _ => {
                    return Err(CompileError::parse(
                        format!("Expecting `,' or `;', found {}", sep.describe(self.src)),
                        &sep,
                    ));
                }
            }
        }
    }

    // ============================================================
    // Statements
    // ============================================================

    fn parse_statement(&mut self, module: &mut ModuleDesc) -> Result<(), CompileError> {
        let tok = match self.current() {
            Some(tok) => tok,
            None => return Err(self.missing_end()),
        };
        match tok.kind {
            TokenKind::KwStart => self.parse_block(module),
            TokenKind::KwFor => self.parse_for(module),
            _ => self.compile_expr_statement(module),
        }
    }

    fn parse_block(&mut self, module: &mut ModuleDesc) -> Result<(), CompileError> {
        self.advance(); // start
        module.scope_depth += 1;
        while let Some(tok) = self.current() {
            if tok.kind == TokenKind::KwEnd {
                self.advance();
                module.scope_depth -= 1;
                module.emit_opcode(Opcode::PopScope);
                return Ok(());
            }
            self.parse_statement(module)?;
        }
        Err(self.missing_end())
    }

    /// `for init; cond; step start body end`. Jump operands are label
    /// ids; nothing is backpatched.
    fn parse_for(&mut self, module: &mut ModuleDesc) -> Result<(), CompileError> {
        self.advance(); // for

        let condition = module.labels.alloc();
        let afterthought = module.labels.alloc();
        let end = module.labels.alloc();
        let body = module.labels.alloc();

        // init statement, clear_stack included
        self.compile_expr_statement(module)?;

        module.labels.define(condition, module.bytecode.len() as u64)?;
        let mut ec = ExprCompiler::new(self.src, self.tokens, self.pos, module, self.registry);
        ec.run(&[TokenKind::Semicolon], StopPolicy::Before)?;
        self.pos = ec.pos;
        self.expect(TokenKind::Semicolon, "`;'")?;
        module.emit_with_varint(Opcode::JumpIfTrue, body.as_u64());
        module.emit_with_varint(Opcode::JumpIfFalse, end.as_u64());

        module.labels.define(afterthought, module.bytecode.len() as u64)?;
        let mut ec = ExprCompiler::new(self.src, self.tokens, self.pos, module, self.registry);
        ec.run(&[TokenKind::KwStart], StopPolicy::Before)?;
        self.pos = ec.pos;
        self.expect(TokenKind::KwStart, "`start'")?;
        module.emit_with_varint(Opcode::Jump, condition.as_u64());

        module.labels.define(body, module.bytecode.len() as u64)?;
        module.scope_depth += 1;

        while let Some(tok) = self.current() {
            if tok.kind == TokenKind::KwEnd {
                self.advance();
                module.scope_depth -= 1;
                module.emit_with_varint(Opcode::Jump, afterthought.as_u64());
                module.labels.define(end, module.bytecode.len() as u64)?;
                module.emit_opcode(Opcode::PopScope);
                return Ok(());
            }
            self.parse_statement(module)?;
        }
        Err(self.missing_end())
    }

    fn compile_expr_statement(&mut self, module: &mut ModuleDesc) -> Result<(), CompileError> {
        let mut ec = ExprCompiler::new(self.src, self.tokens, self.pos, module, self.registry);
        ec.run(&[TokenKind::Semicolon], StopPolicy::After)?;
        self.pos = ec.pos;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::disasm;

    fn compile(input: &str) -> Result<Registry, CompileError> {
        let src = SourceFile::from_str("t.chdl", input);
        let mut registry = Registry::new();
        compile_file(&src, &mut registry)?;
        Ok(registry)
    }

    fn mnemonics(module: &ModuleDesc) -> Vec<String> {
        disasm::disassemble(module)
            .into_iter()
            .map(|(_, line)| line)
            .collect()
    }

    #[test]
    fn test_minimal_module() {
        let reg = compile("module top (void) start end").unwrap();
        let m = &reg.modules["top"];
        assert_eq!(mnemonics(m), vec!["return"]);
        assert_eq!(m.scope_depth, 0);
    }

    #[test]
    fn test_module_arguments() {
        let reg = compile("module top (width : integer, name : string) start end").unwrap();
        let m = &reg.modules["top"];
        assert_eq!(m.argument_list.len(), 2);
        assert_eq!(m.constants[m.argument_list[0].0], "width");
        assert_eq!(m.argument_list[0].1, ArgType::Integer);
        assert_eq!(m.argument_list[1].1, ArgType::Str);
    }

    #[test]
    fn test_duplicate_argument_error() {
        let err = compile("module top (a : integer, a : integer) start end").unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_duplicate_module_error() {
        let err = compile("module t (void) start end module t (void) start end").unwrap_err();
        assert!(err.to_string().contains("module `t' already exists"));
    }

    #[test]
    fn test_interface_single_ports() {
        let reg = compile("module t (void) in : x, y; out : sum; start end").unwrap();
        let m = &reg.modules["t"];
        assert_eq!(m.interface_elements.len(), 3);
        let x = m.interface_element("x").unwrap();
        assert_eq!(x.direction, PortDirection::In);
        assert_eq!(x.shape, PortShape::Single);
        assert_eq!(m.interface_element("sum").unwrap().direction, PortDirection::Out);
    }

    #[test]
    fn test_interface_array_port_emits_size_code() {
        let reg = compile("module t (void) out : bus[4 * 2]; start end").unwrap();
        let m = &reg.modules["t"];
        assert_eq!(m.interface_element("bus").unwrap().shape, PortShape::Array);
        assert_eq!(
            mnemonics(m),
            vec![
                "push_out_ref 0 ; bus",
                "push_uinteger 4",
                "push_uinteger 2",
                "mul",
                "set_interface_output_size",
                "clear_stack",
                "return"
            ]
        );
    }

    #[test]
    fn test_duplicate_interface_element_error() {
        let err = compile("module t (void) in : x, x; start end").unwrap_err();
        assert!(err.to_string().contains("interface element `x' already exists"));
    }

    #[test]
    fn test_body_statements_use_arguments() {
        let reg = compile(
            "module t (a : integer) start local b : integer = a + 1; end",
        )
        .unwrap();
        let m = &reg.modules["t"];
        assert_eq!(
            mnemonics(m),
            vec![
                "push_new_local_integer 1 ; b",
                "push_local 0 ; a",
                "push_uinteger 1",
                "add",
                "assign",
                "clear_stack",
                "return"
            ]
        );
    }

    #[test]
    fn test_nested_block_emits_pop_scope() {
        let reg = compile(
            "module t (void) start local a : integer; start a = 1; end end",
        )
        .unwrap();
        let m = &reg.modules["t"];
        let lines = mnemonics(m);
        assert_eq!(lines[lines.len() - 2], "pop_scope");
        assert_eq!(lines[lines.len() - 1], "return");
        assert_eq!(m.scope_depth, 0);
    }

    #[test]
    fn test_missing_end_error() {
        let err = compile("module t (void) start local a : integer;").unwrap_err();
        assert!(err.to_string().contains("missing closing `end'"));
    }

    #[test]
    fn test_stray_token_at_top_level() {
        let err = compile("local x : integer;").unwrap_err();
        assert!(err.to_string().contains("Expecting `module'"));
    }

    #[test]
    fn test_for_loop_label_wiring() {
        let reg = compile(
            "module t (void) start \
             local i : integer; \
             for i = 0; i < 4; i = i + 1 start \
                 i = i * 2; \
             end \
             end",
        )
        .unwrap();
        let m = &reg.modules["t"];
        let lines = mnemonics(m);
        assert_eq!(
            lines,
            vec![
                "push_new_local_integer 0 ; i",
                "clear_stack",
                // init
                "push_local 0 ; i",
                "push_uinteger 0",
                "assign",
                "clear_stack",
                // condition (label 0)
                "push_local 0 ; i",
                "push_uinteger 4",
                "cmp_lt",
                "jump_if_true L3",
                "jump_if_false L2",
                // afterthought (label 1)
                "push_local 0 ; i",
                "push_local 0 ; i",
                "push_uinteger 1",
                "add",
                "assign",
                "jump L0",
                // body (label 3)
                "push_local 0 ; i",
                "push_local 0 ; i",
                "push_uinteger 2",
                "mul",
                "assign",
                "clear_stack",
                "jump L1",
                // end (label 2)
                "pop_scope",
                "return"
            ]
        );

        // each label lands exactly where its region starts in the listing
        let listing = disasm::disassemble(m);
        let condition_first = listing[6].0; // first condition instruction
        let afterthought_first = listing[11].0; // first step instruction
        let body_first = listing[17].0; // first instruction past the back-edge jump
        let after_loop = listing[24].0; // pop_scope, first instruction after the loop
        assert_eq!(m.labels.offset_of(0), Some(condition_first));
        assert_eq!(m.labels.offset_of(1), Some(afterthought_first));
        assert_eq!(m.labels.offset_of(3), Some(body_first));
        assert_eq!(m.labels.offset_of(2), Some(after_loop));
        assert_eq!(m.labels.offset_of(4), None);
    }

    #[test]
    fn test_requires_adds_to_worklist() {
        let reg = compile("requires \"lib.chdl\"; module t (void) start end").unwrap();
        assert_eq!(reg.imports.get("lib.chdl"), Some(&false));
    }

    #[test]
    fn test_globals() {
        let reg = compile(
            "global Width : integer = 32; \
             global Mask : uinteger = 0xFF; \
             global Name : string = \"top\"; \
             global Neg : integer = -4;",
        )
        .unwrap();
        assert_eq!(reg.globals["Width"], GlobalValue::Integer(32));
        assert_eq!(reg.globals["Mask"], GlobalValue::Uinteger(255));
        assert_eq!(reg.globals["Name"], GlobalValue::Str("top".to_string()));
        assert_eq!(reg.globals["Neg"], GlobalValue::Integer(-4));
    }

    #[test]
    fn test_duplicate_global_error() {
        let err = compile("global W : integer = 1; global W : integer = 2;").unwrap_err();
        assert!(err.to_string().contains("global `W' already exists"));
    }

    #[test]
    fn test_global_used_in_module_body() {
        let reg = compile(
            "global Width : integer = 8; \
             module t (void) start local n : integer = global.Width; end",
        )
        .unwrap();
        let m = &reg.modules["t"];
        assert_eq!(
            mnemonics(m),
            vec![
                "push_new_local_integer 0 ; n",
                "push_uinteger 8",
                "assign",
                "clear_stack",
                "return"
            ]
        );
    }
}
