use crate::error::{RecastError, Result};
use crate::ir::{
    BasicBlock, BinaryOp, CmpOp, Function, FunctionAnnotation, FunctionParameter,
    FunctionSignature, GlobalDeclaration, Instruction, Literal, LoopHint, Module, PrimitiveType,
    StructField, Type, TypeDeclaration, Value,
};

// --- Parser State ---

#[derive(Debug)]
pub struct ParserState<'a> {
    input: &'a str,
    bytes: &'a [u8],
    position: usize,
}

impl<'a> ParserState<'a> {
    pub fn new(input: &'a str) -> Self {
        ParserState {
            input,
            bytes: input.as_bytes(),
            position: 0,
        }
    }

    // --- Basic utils ---

    fn current_char(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    fn advance(&mut self) {
        if let Some(c) = self.current_char() {
            self.position += c.len_utf8();
        }
    }

    fn is_eof(&self) -> bool {
        self.position >= self.input.len()
    }

    fn error(&self, msg: String) -> RecastError {
        let consumed = &self.input[..self.position.min(self.input.len())];
        let line = consumed.matches('\n').count() + 1;
        let col = consumed.chars().rev().take_while(|c| *c != '\n').count() + 1;
        RecastError::ParsingError(format!("line {}, col {}: {}", line, col, msg))
    }

    fn skip_whitespace_and_comments(&mut self) {
        while !self.is_eof() {
            let byte = self.bytes[self.position];
            if byte.is_ascii_whitespace() {
                self.advance();
            } else if byte == b'#' {
                while !self.is_eof() && self.bytes[self.position] != b'\n' {
                    self.advance();
                }
            } else {
                break;
            }
        }
    }

    /// Skip spaces and tabs only, staying on the current line.
    fn skip_inline_whitespace(&mut self) {
        while !self.is_eof() {
            let byte = self.bytes[self.position];
            if byte == b' ' || byte == b'\t' {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn expect_char(&mut self, expected: char) -> Result<()> {
        self.skip_whitespace_and_comments();
        if self.current_char() == Some(expected) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!(
                "Expected character '{}', found {:?}",
                expected,
                self.current_char()
            )))
        }
    }

    fn peek_is(&mut self, expected: char) -> bool {
        self.skip_whitespace_and_comments();
        self.current_char() == Some(expected)
    }

    fn consume_if(&mut self, expected: char) -> bool {
        if self.peek_is(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn parse_identifier(&mut self) -> Result<String> {
        self.skip_whitespace_and_comments();
        let start = self.position;
        let first = *self
            .bytes
            .get(start)
            .ok_or_else(|| self.error("Unexpected EOF parsing identifier".to_string()))?;
        if !(first.is_ascii_alphabetic() || first == b'_') {
            return Err(self.error(format!(
                "Identifier must start with a letter or underscore, found '{}'",
                first as char
            )));
        }
        while !self.is_eof()
            && (self.bytes[self.position].is_ascii_alphanumeric()
                || self.bytes[self.position] == b'_'
                || self.bytes[self.position] == b'.')
        {
            self.advance();
        }
        Ok(self.input[start..self.position].to_string())
    }

    /// A dotted word like `add.i32`, `zext.i8.i64`, `getfield.ptr`.
    fn parse_mnemonic(&mut self) -> Result<Vec<String>> {
        let word = self.parse_identifier()?;
        Ok(word.split('.').map(|s| s.to_string()).collect())
    }

    // '%' and '@' identifiers additionally accept '-' so that specialized
    // names carrying negative binding values survive the print/reparse
    // round trip.
    fn parse_percent_identifier(&mut self) -> Result<String> {
        self.expect_char('%')?;
        let start = self.position;
        while !self.is_eof()
            && (self.bytes[self.position].is_ascii_alphanumeric()
                || self.bytes[self.position] == b'_'
                || self.bytes[self.position] == b'-')
        {
            self.advance();
        }
        if start == self.position {
            return Err(self.error("Expected identifier after '%'".to_string()));
        }
        Ok(self.input[start..self.position].to_string())
    }

    fn parse_at_identifier(&mut self) -> Result<String> {
        self.expect_char('@')?;
        let start = self.position;
        while !self.is_eof()
            && (self.bytes[self.position].is_ascii_alphanumeric()
                || self.bytes[self.position] == b'_'
                || self.bytes[self.position] == b'-')
        {
            self.advance();
        }
        if start == self.position {
            return Err(self.error("Expected identifier after '@'".to_string()));
        }
        Ok(self.input[start..self.position].to_string())
    }

    fn parse_u64(&mut self) -> Result<u64> {
        self.skip_whitespace_and_comments();
        let start = self.position;
        while !self.is_eof() && self.bytes[self.position].is_ascii_digit() {
            self.advance();
        }
        if start == self.position {
            return Err(self.error("Expected unsigned integer".to_string()));
        }
        self.input[start..self.position]
            .parse::<u64>()
            .map_err(|e| self.error(format!("Invalid integer: {}", e)))
    }

    // --- Types ---

    fn parse_type(&mut self) -> Result<Type> {
        self.skip_whitespace_and_comments();
        match self.current_char() {
            Some('@') => Ok(Type::Named(self.parse_at_identifier()?)),
            Some('[') => {
                self.expect_char('[')?;
                let size = self.parse_u64()?;
                let word = self.parse_identifier()?;
                if word != "x" {
                    return Err(self.error(format!("Expected 'x' in array type, found '{}'", word)));
                }
                let element_type = self.parse_type()?;
                self.expect_char(']')?;
                Ok(Type::Array {
                    element_type: Box::new(element_type),
                    size,
                })
            }
            _ => {
                let word = self.parse_identifier()?;
                match word.as_str() {
                    "void" => Ok(Type::Void),
                    "struct" => {
                        self.expect_char('{')?;
                        let mut fields = Vec::new();
                        if !self.peek_is('}') {
                            loop {
                                let name = self.parse_identifier()?;
                                self.expect_char(':')?;
                                let ty = self.parse_type()?;
                                fields.push(StructField { name, ty });
                                if !self.consume_if(',') {
                                    break;
                                }
                            }
                        }
                        self.expect_char('}')?;
                        Ok(Type::Struct(fields))
                    }
                    other => PrimitiveType::from_str_opt(other)
                        .map(Type::Primitive)
                        .ok_or_else(|| self.error(format!("Unknown type '{}'", other))),
                }
            }
        }
    }

    fn parse_primitive_word(&mut self, word: &str) -> Result<PrimitiveType> {
        PrimitiveType::from_str_opt(word)
            .ok_or_else(|| self.error(format!("Unknown primitive type '{}'", word)))
    }

    // --- Values ---

    fn parse_literal(&mut self, expected: PrimitiveType) -> Result<Literal> {
        self.skip_whitespace_and_comments();
        if self.current_char() == Some('t') || self.current_char() == Some('f') {
            let word = self.parse_identifier()?;
            return match word.as_str() {
                "true" => Ok(Literal::Bool(true)),
                "false" => Ok(Literal::Bool(false)),
                other => Err(self.error(format!("Expected literal, found '{}'", other))),
            };
        }

        let start = self.position;
        if self.current_char() == Some('-') {
            self.advance();
        }
        while !self.is_eof()
            && (self.bytes[self.position].is_ascii_digit() || self.bytes[self.position] == b'.')
        {
            self.advance();
        }
        let text = &self.input[start..self.position];
        if text.is_empty() || text == "-" {
            return Err(self.error("Expected numeric literal".to_string()));
        }

        if text.contains('.') || expected.is_float() {
            let v = text
                .parse::<f64>()
                .map_err(|e| self.error(format!("Invalid float literal '{}': {}", text, e)))?;
            return Ok(match expected {
                PrimitiveType::F64 => Literal::F64(v),
                _ => Literal::F32(v as f32),
            });
        }

        let v = text
            .parse::<i64>()
            .map_err(|e| self.error(format!("Invalid integer literal '{}': {}", text, e)))?;
        Literal::from_i64(expected, v)
            .ok_or_else(|| self.error(format!("Literal '{}' not valid for type {}", text, expected)))
    }

    fn parse_value(&mut self, expected: PrimitiveType) -> Result<Value> {
        self.skip_whitespace_and_comments();
        match self.current_char() {
            Some('%') => Ok(Value::Variable(self.parse_percent_identifier()?)),
            Some('@') => Ok(Value::Global(self.parse_at_identifier()?)),
            _ => Ok(Value::Constant(self.parse_literal(expected)?)),
        }
    }

    /// Value with no surrounding type context; integer literals default to i32.
    fn parse_untyped_value(&mut self) -> Result<Value> {
        self.parse_value(PrimitiveType::I32)
    }

    // --- Annotations and hints ---

    fn parse_annotation(&mut self) -> Result<FunctionAnnotation> {
        let name = self.parse_at_identifier()?;
        let ann = match name.as_str() {
            "inline" => FunctionAnnotation::Inline,
            "export" => FunctionAnnotation::Export,
            "noinline" => FunctionAnnotation::NoInline,
            "cold" => FunctionAnnotation::Cold,
            "noopt" => FunctionAnnotation::NoOpt,
            "optsize" => FunctionAnnotation::OptSize,
            "minsize" => FunctionAnnotation::MinSize,
            "fast_math" => FunctionAnnotation::FastMath,
            "vector_width" => {
                self.expect_char('(')?;
                let bits = self.parse_u64()? as u32;
                self.expect_char(')')?;
                return Ok(FunctionAnnotation::VectorWidth(bits));
            }
            "target_cpu" => {
                self.expect_char('(')?;
                let value = self.parse_paren_payload()?;
                return Ok(FunctionAnnotation::TargetCpu(value));
            }
            "target_features" => {
                self.expect_char('(')?;
                let value = self.parse_paren_payload()?;
                return Ok(FunctionAnnotation::TargetFeatures(value));
            }
            other => return Err(self.error(format!("Unknown annotation '@{}'", other))),
        };
        Ok(ann)
    }

    /// Raw text up to the closing parenthesis, for annotation payloads like
    /// feature strings containing commas and dots.
    fn parse_paren_payload(&mut self) -> Result<String> {
        let start = self.position;
        while !self.is_eof() && self.bytes[self.position] != b')' {
            self.advance();
        }
        if self.is_eof() {
            return Err(self.error("Unterminated annotation payload".to_string()));
        }
        let text = self.input[start..self.position].trim().to_string();
        self.advance(); // consume ')'
        Ok(text)
    }

    fn parse_loop_hint(&mut self) -> Result<LoopHint> {
        self.expect_char('!')?;
        let name = self.parse_identifier()?;
        match name.as_str() {
            "unroll.disable" => Ok(LoopHint::UnrollDisable),
            "unroll.runtime.disable" => Ok(LoopHint::UnrollRuntimeDisable),
            "unroll.count" => {
                self.expect_char('(')?;
                let n = self.parse_u64()? as u32;
                self.expect_char(')')?;
                Ok(LoopHint::UnrollCount(n))
            }
            "vectorize.enable" => Ok(LoopHint::VectorizeEnable),
            other => Err(self.error(format!("Unknown loop hint '!{}'", other))),
        }
    }

    // --- Instructions ---

    fn parse_instruction(&mut self) -> Result<Instruction> {
        self.skip_whitespace_and_comments();
        if self.current_char() == Some('%') {
            let result = self.parse_percent_identifier()?;
            self.expect_char('=')?;
            self.parse_instruction_with_result(result)
        } else {
            self.parse_instruction_without_result()
        }
    }

    fn parse_instruction_with_result(&mut self, result: String) -> Result<Instruction> {
        self.skip_whitespace_and_comments();
        if self.current_char() == Some('@') {
            return Err(self.error("Call syntax requires the 'call' keyword".to_string()));
        }
        let parts = self.parse_mnemonic()?;
        let head = parts[0].as_str();

        if let Some(op) = binary_op_from(head) {
            let ty = self.expect_type_suffix(&parts, 2)?;
            let lhs = self.parse_value(ty)?;
            self.expect_char(',')?;
            let rhs = self.parse_value(ty)?;
            return Ok(Instruction::Binary {
                op,
                result,
                ty,
                lhs,
                rhs,
            });
        }
        if let Some(op) = cmp_op_from(head) {
            let ty = self.expect_type_suffix(&parts, 2)?;
            let lhs = self.parse_value(ty)?;
            self.expect_char(',')?;
            let rhs = self.parse_value(ty)?;
            return Ok(Instruction::Cmp {
                op,
                result,
                ty,
                lhs,
                rhs,
            });
        }

        match head {
            "zext" => {
                if parts.len() != 3 {
                    return Err(self.error("zext requires source and target types".to_string()));
                }
                let source_type = self.parse_primitive_word(&parts[1])?;
                let target_type = self.parse_primitive_word(&parts[2])?;
                let value = self.parse_value(source_type)?;
                Ok(Instruction::ZeroExtend {
                    result,
                    source_type,
                    target_type,
                    value,
                })
            }
            "alloc" => {
                if parts.len() != 2 || parts[1] != "stack" {
                    return Err(self.error("Expected 'alloc.stack'".to_string()));
                }
                let allocated_ty = self.parse_type()?;
                Ok(Instruction::Alloc {
                    result,
                    allocated_ty,
                })
            }
            "load" => {
                let ty = self.parse_dotted_type(&parts)?;
                let ptr = self.parse_untyped_value()?;
                Ok(Instruction::Load { result, ty, ptr })
            }
            "getfield" => {
                let struct_ptr = self.parse_untyped_value()?;
                self.expect_char(',')?;
                let field_index = self.parse_u64()? as usize;
                Ok(Instruction::GetFieldPtr {
                    result,
                    struct_ptr,
                    field_index,
                })
            }
            "getelem" => {
                let array_ptr = self.parse_untyped_value()?;
                self.expect_char(',')?;
                let index = self.parse_value(PrimitiveType::I64)?;
                self.expect_char(',')?;
                let word = self.parse_identifier()?;
                let element_type = self.parse_primitive_word(&word)?;
                Ok(Instruction::GetElemPtr {
                    result,
                    array_ptr,
                    index,
                    element_type,
                })
            }
            "ptrtoint" => {
                let ptr_value = self.parse_untyped_value()?;
                self.expect_char(',')?;
                let word = self.parse_identifier()?;
                let target_type = self.parse_primitive_word(&word)?;
                Ok(Instruction::PtrToInt {
                    result,
                    ptr_value,
                    target_type,
                })
            }
            "inttoptr" => {
                let int_value = self.parse_value(PrimitiveType::I64)?;
                self.expect_char(',')?;
                let word = self.parse_identifier()?;
                let target_type = self.parse_primitive_word(&word)?;
                Ok(Instruction::IntToPtr {
                    result,
                    int_value,
                    target_type,
                })
            }
            "call" => {
                let func_name = self.parse_at_identifier()?;
                let args = self.parse_call_args()?;
                Ok(Instruction::Call {
                    result: Some(result),
                    func_name,
                    args,
                })
            }
            "phi" => {
                let ty = self.parse_dotted_type(&parts)?;
                let expected = match &ty {
                    Type::Primitive(p) => *p,
                    _ => PrimitiveType::I64,
                };
                let mut incoming = Vec::new();
                loop {
                    self.expect_char('[')?;
                    let value = self.parse_value(expected)?;
                    self.expect_char(',')?;
                    let label = self.parse_identifier()?;
                    self.expect_char(']')?;
                    incoming.push((value, label));
                    if !self.consume_if(',') {
                        break;
                    }
                }
                Ok(Instruction::Phi {
                    result,
                    ty,
                    incoming,
                })
            }
            other => Err(self.error(format!("Unknown instruction '{}'", other))),
        }
    }

    fn parse_instruction_without_result(&mut self) -> Result<Instruction> {
        let parts = self.parse_mnemonic()?;
        let head = parts[0].as_str();
        match head {
            "br" => {
                let condition = self.parse_value(PrimitiveType::Bool)?;
                self.expect_char(',')?;
                let true_label = self.parse_identifier()?;
                self.expect_char(',')?;
                let false_label = self.parse_identifier()?;
                Ok(Instruction::Br {
                    condition,
                    true_label,
                    false_label,
                })
            }
            "jmp" => {
                let target_label = self.parse_identifier()?;
                Ok(Instruction::Jmp { target_label })
            }
            "ret" => {
                if parts.len() == 2 && parts[1] == "void" {
                    return Ok(Instruction::Ret {
                        ty: Type::Void,
                        value: None,
                    });
                }
                let ty = self.parse_dotted_type(&parts)?;
                let expected = match &ty {
                    Type::Primitive(p) => *p,
                    _ => PrimitiveType::I64,
                };
                let value = self.parse_value(expected)?;
                Ok(Instruction::Ret {
                    ty,
                    value: Some(value),
                })
            }
            "store" => {
                let ty = self.parse_dotted_type(&parts)?;
                let expected = match &ty {
                    Type::Primitive(p) => *p,
                    _ => PrimitiveType::I64,
                };
                let ptr = self.parse_untyped_value()?;
                self.expect_char(',')?;
                let value = self.parse_value(expected)?;
                Ok(Instruction::Store { ty, ptr, value })
            }
            "call" => {
                let func_name = self.parse_at_identifier()?;
                let args = self.parse_call_args()?;
                Ok(Instruction::Call {
                    result: None,
                    func_name,
                    args,
                })
            }
            other => Err(self.error(format!("Unknown instruction '{}'", other))),
        }
    }

    fn parse_call_args(&mut self) -> Result<Vec<Value>> {
        self.expect_char('(')?;
        let mut args = Vec::new();
        if !self.peek_is(')') {
            loop {
                args.push(self.parse_untyped_value()?);
                if !self.consume_if(',') {
                    break;
                }
            }
        }
        self.expect_char(')')?;
        Ok(args)
    }

    /// Rebuild a type from the dotted mnemonic suffix, e.g. `load.f32`.
    fn parse_dotted_type(&mut self, parts: &[String]) -> Result<Type> {
        if parts.len() < 2 {
            return Err(self.error(format!("'{}' requires a type suffix", parts[0])));
        }
        let suffix = parts[1..].join(".");
        PrimitiveType::from_str_opt(&suffix)
            .map(Type::Primitive)
            .ok_or_else(|| self.error(format!("Unknown type suffix '{}'", suffix)))
    }

    fn expect_type_suffix(&mut self, parts: &[String], arity: usize) -> Result<PrimitiveType> {
        if parts.len() != arity {
            return Err(self.error(format!("'{}' requires a single type suffix", parts[0])));
        }
        self.parse_primitive_word(&parts[1])
    }

    // --- Functions and module ---

    fn parse_signature(&mut self) -> Result<FunctionSignature> {
        self.expect_char('(')?;
        let mut params = Vec::new();
        if !self.peek_is(')') {
            loop {
                let ty = self.parse_type()?;
                let name = self.parse_percent_identifier()?;
                params.push(FunctionParameter { name, ty });
                if !self.consume_if(',') {
                    break;
                }
            }
        }
        self.expect_char(')')?;
        self.expect_char('-')?;
        self.expect_char('>')?;
        let return_type = self.parse_type()?;
        Ok(FunctionSignature {
            params,
            return_type,
        })
    }

    fn parse_function_body(&mut self) -> Result<Vec<BasicBlock>> {
        self.expect_char('{')?;
        let mut blocks: Vec<BasicBlock> = Vec::new();

        loop {
            self.skip_whitespace_and_comments();
            if self.consume_if('}') {
                break;
            }
            if self.is_eof() {
                return Err(self.error("Unexpected EOF inside function body".to_string()));
            }

            // A label line starts a new block; anything else is an
            // instruction for the current block.
            let save = self.position;
            if let Ok(word) = self.parse_identifier() {
                self.skip_inline_whitespace();
                if self.current_char() == Some(':') && !word.contains('.') {
                    self.advance();
                    let mut block = BasicBlock::new(word);
                    loop {
                        self.skip_inline_whitespace();
                        if self.current_char() == Some('!') {
                            block.hints.push(self.parse_loop_hint()?);
                        } else {
                            break;
                        }
                    }
                    blocks.push(block);
                    continue;
                }
            }
            self.position = save;

            let instr = self.parse_instruction()?;
            let block = blocks
                .last_mut()
                .ok_or_else(|| self.error("Instruction before any block label".to_string()))?;
            block.instructions.push(instr);
        }

        for block in &blocks {
            if block.terminator().is_none() {
                return Err(self.error(format!(
                    "Block '{}' must end with a terminator instruction",
                    block.label
                )));
            }
        }
        if blocks.is_empty() {
            return Err(self.error("Function body has no blocks".to_string()));
        }

        Ok(blocks)
    }

    pub fn parse_module(&mut self) -> Result<Module> {
        let mut module = Module::new();
        let mut pending_annotations: Vec<FunctionAnnotation> = Vec::new();

        loop {
            self.skip_whitespace_and_comments();
            if self.is_eof() {
                break;
            }

            if self.current_char() == Some('@') {
                pending_annotations.push(self.parse_annotation()?);
                continue;
            }

            let word = self.parse_identifier()?;
            match word.as_str() {
                "type" => {
                    let name = self.parse_at_identifier()?;
                    self.expect_char('=')?;
                    let ty = self.parse_type()?;
                    module
                        .type_declarations
                        .insert(name.clone(), TypeDeclaration { name, ty });
                }
                "global" => {
                    let name = self.parse_at_identifier()?;
                    self.expect_char(':')?;
                    let ty = self.parse_type()?;
                    let initializer = if self.consume_if('=') {
                        let expected = match &ty {
                            Type::Primitive(p) => *p,
                            _ => PrimitiveType::I64,
                        };
                        Some(self.parse_literal(expected)?)
                    } else {
                        None
                    };
                    module.global_declarations.insert(
                        name.clone(),
                        GlobalDeclaration {
                            name,
                            ty,
                            initializer,
                        },
                    );
                }
                "fn" => {
                    let name = self.parse_at_identifier()?;
                    let signature = self.parse_signature()?;
                    let blocks = self.parse_function_body()?;
                    module.add_function(Function {
                        name,
                        signature,
                        annotations: std::mem::take(&mut pending_annotations),
                        blocks,
                        optimized: false,
                    });
                }
                "decl" => {
                    let name = self.parse_at_identifier()?;
                    let signature = self.parse_signature()?;
                    module.add_function(Function {
                        name,
                        signature,
                        annotations: std::mem::take(&mut pending_annotations),
                        blocks: Vec::new(),
                        optimized: false,
                    });
                }
                other => {
                    return Err(self.error(format!(
                        "Expected 'type', 'global', 'fn', or 'decl', found '{}'",
                        other
                    )));
                }
            }
        }

        Ok(module)
    }
}

fn binary_op_from(word: &str) -> Option<BinaryOp> {
    Some(match word {
        "add" => BinaryOp::Add,
        "sub" => BinaryOp::Sub,
        "mul" => BinaryOp::Mul,
        "div" => BinaryOp::Div,
        "rem" => BinaryOp::Rem,
        "and" => BinaryOp::And,
        "or" => BinaryOp::Or,
        "xor" => BinaryOp::Xor,
        "shl" => BinaryOp::Shl,
        "shr" => BinaryOp::Shr,
        _ => return None,
    })
}

fn cmp_op_from(word: &str) -> Option<CmpOp> {
    Some(match word {
        "eq" => CmpOp::Eq,
        "ne" => CmpOp::Ne,
        "gt" => CmpOp::Gt,
        "ge" => CmpOp::Ge,
        "lt" => CmpOp::Lt,
        "le" => CmpOp::Le,
        _ => return None,
    })
}

/// Parse a complete recast IR module from text.
pub fn parse_module(input: &str) -> Result<Module> {
    ParserState::new(input).parse_module()
}
