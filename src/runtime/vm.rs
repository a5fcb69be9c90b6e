use std::io::{self, Write};

use crate::bytecode::chunk::{Chunk, Instruction, SENTINEL_IP};
use crate::bytecode::op::Op;
use crate::lang::value::Value;
use crate::runtime::builtins::{self, to_f64, to_int64};
use crate::runtime::error::RuntimeError;

/// Execution limits. The value stack and the frame stack are bounded;
/// the globals vector grows on demand.
#[derive(Debug, Clone)]
pub struct VmConfig {
    pub max_stack_depth: usize,
    pub max_call_depth: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_stack_depth: 16 * 1024,
            max_call_depth: 256,
        }
    }
}

/// Per-invocation record: where to return, the value-stack depth at call
/// entry (stray values above it are discarded on return), and the local
/// slots, Null-initialized.
#[derive(Debug)]
struct Frame {
    return_ip: u32,
    stack_base: usize,
    locals: Vec<Value>,
}

impl Frame {
    fn ensure_slot(&mut self, slot: u32) {
        if slot as usize >= self.locals.len() {
            self.locals.resize(slot as usize + 1, Value::Null);
        }
    }
}

/// The Cinder virtual machine.
///
/// A stack machine dispatching on the opcode at the program counter.
/// Program output goes through the `out` sink; runtime diagnostics go to
/// stderr with the offending instruction's source location.
pub struct Vm<'a> {
    chunk: &'a Chunk,
    out: &'a mut dyn Write,
    config: VmConfig,
    stack: Vec<Value>,
    frames: Vec<Frame>,
    globals: Vec<Value>,
    pc: u32,
    halted: bool,
    exit_code: i32,
    file: String,
}

impl<'a> Vm<'a> {
    pub fn new(chunk: &'a Chunk, out: &'a mut dyn Write) -> Self {
        Vm::with_config(chunk, out, VmConfig::default())
    }

    pub fn with_config(chunk: &'a Chunk, out: &'a mut dyn Write, config: VmConfig) -> Self {
        Vm {
            chunk,
            out,
            config,
            stack: Vec::new(),
            frames: Vec::new(),
            globals: Vec::new(),
            pc: 0,
            halted: false,
            exit_code: 0,
            file: "<input>".to_string(),
        }
    }

    /// Source file name used in runtime diagnostics.
    pub fn set_file(&mut self, file: impl Into<String>) {
        self.file = file.into();
    }

    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// Execute until halt, a runtime error, or the program counter runs
    /// past the last instruction. Returns the process exit code.
    pub fn run(&mut self) -> i32 {
        while !self.halted && (self.pc as usize) < self.chunk.instructions.len() {
            if self.stack.len() > self.config.max_stack_depth {
                let loc = self.chunk.instructions[self.pc as usize].loc;
                self.report(loc, "value stack overflow");
                break;
            }
            let ins = self.chunk.instructions[self.pc as usize];
            self.pc += 1;
            if let Err(e) = self.execute(ins) {
                self.report(ins.loc, &e.message);
            }
        }
        self.halted = true;
        self.exit_code
    }

    /// Print a runtime diagnostic and move to the halted state with
    /// exit code 1.
    fn report(&mut self, loc: crate::diagnostics::SourceLoc, message: &str) {
        eprintln!("RUNTIME ERROR: {} [{}:{}]", message, self.file, loc);
        self.halted = true;
        self.exit_code = 1;
    }

    fn execute(&mut self, ins: Instruction) -> Result<(), RuntimeError> {
        let Instruction { op, a, b, loc } = ins;

        match op {
            Op::PushConst => {
                let value = self
                    .chunk
                    .constants
                    .get(a as usize)
                    .cloned()
                    .ok_or_else(|| {
                        RuntimeError::new(format!("constant {} out of bounds", a))
                    })?;
                self.push(value);
            }

            Op::Pop => {
                self.pop()?;
            }

            Op::LoadLocal => {
                let frame = self
                    .frames
                    .last_mut()
                    .ok_or_else(|| RuntimeError::new("local load outside a call frame"))?;
                frame.ensure_slot(a);
                let value = frame.locals[a as usize].clone();
                self.push(value);
            }

            Op::StoreLocal => {
                let value = self.pop()?;
                let frame = self
                    .frames
                    .last_mut()
                    .ok_or_else(|| RuntimeError::new("local store outside a call frame"))?;
                frame.ensure_slot(a);
                frame.locals[a as usize] = value;
            }

            Op::LoadGlobal => {
                self.ensure_global(a);
                let value = self.globals[a as usize].clone();
                self.push(value);
            }

            Op::StoreGlobal => {
                let value = self.pop()?;
                self.ensure_global(a);
                self.globals[a as usize] = value;
            }

            Op::Add => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let result = match (&lhs, &rhs) {
                    (Value::Str(x), Value::Str(y)) => {
                        let mut s = String::with_capacity(x.len() + y.len());
                        s.push_str(x);
                        s.push_str(y);
                        Value::str(s)
                    }
                    (Value::Int(x), Value::Int(y)) => Value::Int(x.wrapping_add(*y)),
                    _ if lhs.is_numeric() && rhs.is_numeric() => {
                        Value::Float(to_f64(&lhs) + to_f64(&rhs))
                    }
                    _ => {
                        return Err(RuntimeError::new(format!(
                            "cannot add {} and {}",
                            lhs.type_name(),
                            rhs.type_name()
                        )));
                    }
                };
                self.push(result);
            }

            Op::Subtract => {
                let (lhs, rhs) = self.pop_numeric_pair("subtract")?;
                let result = match (&lhs, &rhs) {
                    (Value::Int(x), Value::Int(y)) => Value::Int(x.wrapping_sub(*y)),
                    _ => Value::Float(to_f64(&lhs) - to_f64(&rhs)),
                };
                self.push(result);
            }

            Op::Multiply => {
                let (lhs, rhs) = self.pop_numeric_pair("multiply")?;
                let result = match (&lhs, &rhs) {
                    (Value::Int(x), Value::Int(y)) => Value::Int(x.wrapping_mul(*y)),
                    _ => Value::Float(to_f64(&lhs) * to_f64(&rhs)),
                };
                self.push(result);
            }

            Op::Divide => {
                let (lhs, rhs) = self.pop_numeric_pair("divide")?;
                let zero = match &rhs {
                    Value::Int(y) => *y == 0,
                    Value::Float(y) => *y == 0.0,
                    _ => false,
                };
                if zero {
                    self.report(loc, "division by zero");
                    self.push(Value::Null);
                    return Ok(());
                }
                let result = match (&lhs, &rhs) {
                    (Value::Int(x), Value::Int(y)) => Value::Int(x.wrapping_div(*y)),
                    _ => Value::Float(to_f64(&lhs) / to_f64(&rhs)),
                };
                self.push(result);
            }

            Op::Modulo => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                match (&lhs, &rhs) {
                    (Value::Int(x), Value::Int(y)) => {
                        if *y == 0 {
                            self.report(loc, "modulo by zero");
                            self.push(Value::Null);
                            return Ok(());
                        }
                        self.push(Value::Int(x.wrapping_rem(*y)));
                    }
                    _ => self.push(Value::Null),
                }
            }

            Op::Negate => {
                let v = self.pop()?;
                let result = match v {
                    Value::Int(n) => Value::Int(n.wrapping_neg()),
                    Value::Float(f) => Value::Float(-f),
                    other => {
                        return Err(RuntimeError::new(format!(
                            "cannot negate {}",
                            other.type_name()
                        )));
                    }
                };
                self.push(result);
            }

            Op::Not => {
                let v = self.pop()?;
                self.push(Value::Bool(!v.is_truthy()));
            }

            Op::Equal => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                self.push(Value::Bool(lhs == rhs));
            }

            Op::NotEqual => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                self.push(Value::Bool(lhs != rhs));
            }

            Op::Less => self.compare(|o| o == std::cmp::Ordering::Less)?,
            Op::LessEqual => self.compare(|o| o != std::cmp::Ordering::Greater)?,
            Op::Greater => self.compare(|o| o == std::cmp::Ordering::Greater)?,
            Op::GreaterEqual => self.compare(|o| o != std::cmp::Ordering::Less)?,

            Op::And => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                self.push(Value::Bool(lhs.is_truthy() && rhs.is_truthy()));
            }

            Op::Or => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                self.push(Value::Bool(lhs.is_truthy() || rhs.is_truthy()));
            }

            Op::Jump => {
                self.pc = a;
            }

            Op::JumpIfFalse => {
                let cond = self.pop()?;
                if !cond.is_truthy() {
                    self.pc = a;
                }
            }

            Op::JumpIfTrue => {
                let cond = self.pop()?;
                if cond.is_truthy() {
                    self.pc = a;
                }
            }

            Op::Call => {
                if a == SENTINEL_IP {
                    return Err(RuntimeError::new("call to unresolved function"));
                }
                let func = self
                    .chunk
                    .functions
                    .get(a as usize)
                    .ok_or_else(|| {
                        RuntimeError::new(format!("invalid function index {}", a))
                    })?;
                if self.frames.len() >= self.config.max_call_depth {
                    return Err(RuntimeError::new(format!(
                        "call stack overflow (depth {})",
                        self.config.max_call_depth
                    )));
                }
                let start_ip = func.start_ip;
                let argc = b as usize;
                let size = (func.local_count as usize).max(argc);

                let mut locals = vec![Value::Null; size];
                for i in (0..argc).rev() {
                    locals[i] = self.pop()?;
                }
                self.frames.push(Frame {
                    return_ip: self.pc,
                    stack_base: self.stack.len(),
                    locals,
                });
                self.pc = start_ip;
            }

            Op::Return => {
                let value = self.pop()?;
                match self.frames.pop() {
                    Some(frame) => {
                        // Discard stray values above the caller's depth,
                        // then hand the return value back.
                        self.stack.truncate(frame.stack_base);
                        self.push(value);
                        self.pc = frame.return_ip;
                    }
                    None => {
                        // Top-level return: exits the program with the
                        // returned value as the process exit code.
                        self.exit_from_value(&value);
                        self.halted = true;
                    }
                }
            }

            Op::Halt => {
                if let Some(top) = self.stack.last() {
                    let top = top.clone();
                    self.exit_from_value(&top);
                }
                self.halted = true;
            }

            Op::CallBuiltin => {
                let argc = b as usize;
                match a {
                    builtins::PRINT => self.builtin_print(argc)?,
                    builtins::PRINTF => self.builtin_printf(argc)?,
                    id => match builtins::lookup_id(id) {
                        Some(entry) => (entry.handler)(self, argc)?,
                        None => {
                            return Err(RuntimeError::new(format!(
                                "unknown builtin id {}",
                                id
                            )));
                        }
                    },
                }
            }

            Op::ToInt => {
                let v = self.pop()?;
                self.push(Value::Int(to_int64(&v)));
            }

            Op::ToFloat => {
                let v = self.pop()?;
                self.push(Value::Float(to_f64(&v)));
            }

            Op::ToString => {
                let v = self.pop()?;
                self.push(Value::str(v.to_string()));
            }

            Op::Concat => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                self.push(Value::str(format!("{}{}", lhs, rhs)));
            }

            Op::ArrayNew | Op::ArrayGet | Op::ArraySet | Op::ArrayLen => {
                self.report(loc, "array operations are not implemented");
                self.push(Value::Null);
            }
        }

        Ok(())
    }

    // ── Stack and state helpers ─────────────────────────────────────

    pub(crate) fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub(crate) fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack
            .pop()
            .ok_or_else(|| RuntimeError::new("stack underflow"))
    }

    /// Pop `argc` values, returned in argument order.
    pub(crate) fn pop_args(&mut self, argc: usize) -> Result<Vec<Value>, RuntimeError> {
        let mut args = vec![Value::Null; argc];
        for i in (0..argc).rev() {
            args[i] = self.pop()?;
        }
        Ok(args)
    }

    fn pop_numeric_pair(&mut self, what: &str) -> Result<(Value, Value), RuntimeError> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        if !lhs.is_numeric() || !rhs.is_numeric() {
            return Err(RuntimeError::new(format!(
                "cannot {} {} and {}",
                what,
                lhs.type_name(),
                rhs.type_name()
            )));
        }
        Ok((lhs, rhs))
    }

    /// Ordering comparison: Int/Int compares exactly, any Float operand
    /// promotes both sides to f64.
    fn compare(&mut self, accept: fn(std::cmp::Ordering) -> bool) -> Result<(), RuntimeError> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let ordering = match (&lhs, &rhs) {
            (Value::Int(x), Value::Int(y)) => x.cmp(y),
            _ if lhs.is_numeric() && rhs.is_numeric() => to_f64(&lhs)
                .partial_cmp(&to_f64(&rhs))
                .unwrap_or(std::cmp::Ordering::Equal),
            _ => {
                return Err(RuntimeError::new(format!(
                    "cannot compare {} and {}",
                    lhs.type_name(),
                    rhs.type_name()
                )));
            }
        };
        self.push(Value::Bool(accept(ordering)));
        Ok(())
    }

    fn ensure_global(&mut self, slot: u32) {
        if slot as usize >= self.globals.len() {
            self.globals.resize(slot as usize + 1, Value::Null);
        }
    }

    fn exit_from_value(&mut self, value: &Value) {
        match value {
            Value::Int(n) => self.exit_code = *n as i32,
            Value::Bool(b) => self.exit_code = *b as i32,
            Value::Float(f) => self.exit_code = *f as i32,
            _ => {}
        }
    }

    pub(crate) fn halt_with(&mut self, code: i32) {
        self.halted = true;
        self.exit_code = code;
    }

    // ── Output ──────────────────────────────────────────────────────

    pub(crate) fn write_out(&mut self, text: &str) -> Result<(), RuntimeError> {
        self.out
            .write_all(text.as_bytes())
            .map_err(|e| RuntimeError::new(format!("write failed: {}", e)))
    }

    pub(crate) fn flush_out(&mut self) {
        let _ = self.out.flush();
    }

    pub(crate) fn read_input_line(&mut self) -> String {
        let mut line = String::new();
        if io::stdin().read_line(&mut line).is_err() {
            return String::new();
        }
        if line.ends_with('\n') {
            line.pop();
        }
        if line.ends_with('\r') {
            line.pop();
        }
        line
    }

    /// `print`: one argument prints its display form; more than one is
    /// treated as a format plus arguments (the colon call form). A
    /// newline is appended either way.
    pub(crate) fn builtin_print(&mut self, argc: usize) -> Result<(), RuntimeError> {
        let args = self.pop_args(argc)?;
        let text = match args.split_first() {
            Some((format, rest)) if !rest.is_empty() => {
                format_string(&format.to_string(), rest)
            }
            Some((single, _)) => single.to_string(),
            None => String::new(),
        };
        self.write_out(&text)?;
        self.write_out("\n")?;
        self.push(Value::Null);
        Ok(())
    }

    /// `printf`: the first argument is the format; no newline is added.
    pub(crate) fn builtin_printf(&mut self, argc: usize) -> Result<(), RuntimeError> {
        let args = self.pop_args(argc)?;
        if let Some((format, rest)) = args.split_first() {
            let text = format_string(&format.to_string(), rest);
            self.write_out(&text)?;
            self.flush_out();
        }
        self.push(Value::Null);
        Ok(())
    }
}

/// Interpret `%` specifiers and runtime backslash escapes in a format
/// string. A specifier with no remaining argument is kept literally.
fn format_string(format: &str, args: &[Value]) -> String {
    let mut out = String::new();
    let mut next_arg = 0;
    let mut chars = format.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '%' => match chars.next() {
                Some('%') => out.push('%'),
                Some(spec @ ('s' | 'd' | 'i' | 'f' | 'c' | 'b')) => {
                    match args.get(next_arg) {
                        Some(arg) => {
                            next_arg += 1;
                            match spec {
                                's' => out.push_str(&arg.to_string()),
                                'd' | 'i' => out.push_str(&to_int64(arg).to_string()),
                                'f' => out.push_str(&to_f64(arg).to_string()),
                                'c' => match arg {
                                    Value::Char(ch) => out.push(*ch as char),
                                    Value::Int(n) => {
                                        out.push(char::from_u32(*n as u32).unwrap_or('?'))
                                    }
                                    other => out.push_str(&other.to_string()),
                                },
                                'b' => {
                                    out.push_str(if arg.is_truthy() { "true" } else { "false" })
                                }
                                _ => unreachable!(),
                            }
                        }
                        None => {
                            out.push('%');
                            out.push(spec);
                        }
                    }
                }
                Some(other) => {
                    out.push('%');
                    out.push(other);
                }
                None => out.push('%'),
            },
            '\\' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            },
            other => out.push(other),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::SourceLoc;

    // ── Test helpers ────────────────────────────────────────────────

    fn loc() -> SourceLoc {
        SourceLoc::new(1, 1)
    }

    /// Build a chunk from (op, a, b) triples.
    fn chunk_of(ops: &[(Op, u32, u32)]) -> Chunk {
        let mut chunk = Chunk::new();
        for &(op, a, b) in ops {
            chunk.emit(op, a, b, loc());
        }
        chunk
    }

    /// Run a chunk; returns (final stack, exit code, captured output).
    fn run(chunk: &Chunk) -> (Vec<Value>, i32, String) {
        let mut out: Vec<u8> = Vec::new();
        let mut vm = Vm::new(chunk, &mut out);
        let code = vm.run();
        let stack = vm.stack().to_vec();
        drop(vm);
        (stack, code, String::from_utf8(out).unwrap())
    }

    /// Push helper: a constant-pool int push.
    fn push_int(chunk: &mut Chunk, n: i64) {
        let ci = chunk.add_constant(Value::Int(n));
        chunk.emit(Op::PushConst, ci, 0, loc());
    }

    fn push_value(chunk: &mut Chunk, v: Value) {
        let ci = chunk.add_constant(v);
        chunk.emit(Op::PushConst, ci, 0, loc());
    }

    // ── Arithmetic ──────────────────────────────────────────────────

    #[test]
    fn test_int_arithmetic() {
        let mut chunk = Chunk::new();
        push_int(&mut chunk, 7);
        push_int(&mut chunk, 3);
        chunk.emit(Op::Subtract, 0, 0, loc());
        chunk.emit(Op::Halt, 0, 0, loc());
        let (stack, _, _) = run(&chunk);
        assert_eq!(stack, vec![Value::Int(4)]);
    }

    #[test]
    fn test_mixed_arithmetic_promotes_to_float() {
        let mut chunk = Chunk::new();
        push_int(&mut chunk, 1);
        push_value(&mut chunk, Value::Float(0.5));
        chunk.emit(Op::Add, 0, 0, loc());
        chunk.emit(Op::Halt, 0, 0, loc());
        let (stack, _, _) = run(&chunk);
        assert_eq!(stack, vec![Value::Float(1.5)]);
    }

    #[test]
    fn test_string_concatenation_on_add() {
        let mut chunk = Chunk::new();
        push_value(&mut chunk, Value::str("hello"));
        push_value(&mut chunk, Value::str(", world"));
        chunk.emit(Op::Add, 0, 0, loc());
        chunk.emit(Op::Halt, 0, 0, loc());
        let (stack, _, _) = run(&chunk);
        assert_eq!(stack, vec![Value::str("hello, world")]);
    }

    #[test]
    fn test_add_string_and_int_is_runtime_error() {
        let mut chunk = Chunk::new();
        push_value(&mut chunk, Value::str("x"));
        push_int(&mut chunk, 1);
        chunk.emit(Op::Add, 0, 0, loc());
        chunk.emit(Op::Halt, 0, 0, loc());
        let (_, code, _) = run(&chunk);
        assert_eq!(code, 1);
    }

    #[test]
    fn test_integer_overflow_wraps() {
        let mut chunk = Chunk::new();
        push_int(&mut chunk, i64::MAX);
        push_int(&mut chunk, 1);
        chunk.emit(Op::Add, 0, 0, loc());
        chunk.emit(Op::Halt, 0, 0, loc());
        let (stack, code, _) = run(&chunk);
        assert_eq!(code, 0);
        assert_eq!(stack, vec![Value::Int(i64::MIN)]);
    }

    #[test]
    fn test_division() {
        let mut chunk = Chunk::new();
        push_int(&mut chunk, 7);
        push_int(&mut chunk, 2);
        chunk.emit(Op::Divide, 0, 0, loc());
        chunk.emit(Op::Halt, 0, 0, loc());
        let (stack, _, _) = run(&chunk);
        assert_eq!(stack, vec![Value::Int(3)]); // integer division truncates
    }

    #[test]
    fn test_division_by_zero_leaves_single_null_and_exits_1() {
        let mut chunk = Chunk::new();
        push_int(&mut chunk, 1);
        push_int(&mut chunk, 0);
        chunk.emit(Op::Divide, 0, 0, loc());
        chunk.emit(Op::Halt, 0, 0, loc());
        let (stack, code, _) = run(&chunk);
        assert_eq!(code, 1);
        assert_eq!(stack, vec![Value::Null]);
    }

    #[test]
    fn test_float_division_by_zero_is_error() {
        let mut chunk = Chunk::new();
        push_value(&mut chunk, Value::Float(1.0));
        push_value(&mut chunk, Value::Float(0.0));
        chunk.emit(Op::Divide, 0, 0, loc());
        chunk.emit(Op::Halt, 0, 0, loc());
        let (stack, code, _) = run(&chunk);
        assert_eq!(code, 1);
        assert_eq!(stack, vec![Value::Null]);
    }

    #[test]
    fn test_modulo() {
        let mut chunk = Chunk::new();
        push_int(&mut chunk, 7);
        push_int(&mut chunk, 3);
        chunk.emit(Op::Modulo, 0, 0, loc());
        chunk.emit(Op::Halt, 0, 0, loc());
        let (stack, _, _) = run(&chunk);
        assert_eq!(stack, vec![Value::Int(1)]);
    }

    #[test]
    fn test_modulo_by_zero_is_error_with_null() {
        let mut chunk = Chunk::new();
        push_int(&mut chunk, 7);
        push_int(&mut chunk, 0);
        chunk.emit(Op::Modulo, 0, 0, loc());
        chunk.emit(Op::Halt, 0, 0, loc());
        let (stack, code, _) = run(&chunk);
        assert_eq!(code, 1);
        assert_eq!(stack, vec![Value::Null]);
    }

    #[test]
    fn test_modulo_on_floats_yields_null() {
        let mut chunk = Chunk::new();
        push_value(&mut chunk, Value::Float(7.0));
        push_int(&mut chunk, 3);
        chunk.emit(Op::Modulo, 0, 0, loc());
        chunk.emit(Op::Halt, 0, 0, loc());
        let (stack, code, _) = run(&chunk);
        assert_eq!(code, 0);
        assert_eq!(stack, vec![Value::Null]);
    }

    #[test]
    fn test_negate_and_not() {
        let mut chunk = Chunk::new();
        push_int(&mut chunk, 5);
        chunk.emit(Op::Negate, 0, 0, loc());
        push_int(&mut chunk, 0);
        chunk.emit(Op::Not, 0, 0, loc());
        chunk.emit(Op::Halt, 0, 0, loc());
        let (stack, _, _) = run(&chunk);
        assert_eq!(stack, vec![Value::Int(-5), Value::Bool(true)]);
    }

    // ── Comparison and logic ────────────────────────────────────────

    #[test]
    fn test_equality_by_variant() {
        let mut chunk = Chunk::new();
        push_int(&mut chunk, 1);
        push_value(&mut chunk, Value::Float(1.0));
        chunk.emit(Op::Equal, 0, 0, loc());
        chunk.emit(Op::Halt, 0, 0, loc());
        let (stack, _, _) = run(&chunk);
        assert_eq!(stack, vec![Value::Bool(false)]);
    }

    #[test]
    fn test_string_equality_by_bytes() {
        let mut chunk = Chunk::new();
        push_value(&mut chunk, Value::str("ab"));
        push_value(&mut chunk, Value::str("ab"));
        chunk.emit(Op::Equal, 0, 0, loc());
        chunk.emit(Op::Halt, 0, 0, loc());
        let (stack, _, _) = run(&chunk);
        assert_eq!(stack, vec![Value::Bool(true)]);
    }

    #[test]
    fn test_null_equals_null() {
        let mut chunk = Chunk::new();
        push_value(&mut chunk, Value::Null);
        push_value(&mut chunk, Value::Null);
        chunk.emit(Op::Equal, 0, 0, loc());
        chunk.emit(Op::Halt, 0, 0, loc());
        let (stack, _, _) = run(&chunk);
        assert_eq!(stack, vec![Value::Bool(true)]);
    }

    #[test]
    fn test_int_comparison_is_exact() {
        let mut chunk = Chunk::new();
        push_int(&mut chunk, i64::MAX);
        push_int(&mut chunk, i64::MAX - 1);
        chunk.emit(Op::Greater, 0, 0, loc());
        chunk.emit(Op::Halt, 0, 0, loc());
        let (stack, _, _) = run(&chunk);
        // As floats both sides would round to the same value.
        assert_eq!(stack, vec![Value::Bool(true)]);
    }

    #[test]
    fn test_mixed_comparison_promotes_to_float() {
        let mut chunk = Chunk::new();
        push_int(&mut chunk, 2);
        push_value(&mut chunk, Value::Float(2.5));
        chunk.emit(Op::Less, 0, 0, loc());
        chunk.emit(Op::Halt, 0, 0, loc());
        let (stack, _, _) = run(&chunk);
        assert_eq!(stack, vec![Value::Bool(true)]);
    }

    #[test]
    fn test_comparing_strings_is_runtime_error() {
        let mut chunk = Chunk::new();
        push_value(&mut chunk, Value::str("a"));
        push_value(&mut chunk, Value::str("b"));
        chunk.emit(Op::Less, 0, 0, loc());
        chunk.emit(Op::Halt, 0, 0, loc());
        let (_, code, _) = run(&chunk);
        assert_eq!(code, 1);
    }

    #[test]
    fn test_and_or_evaluate_truthiness() {
        let mut chunk = Chunk::new();
        push_int(&mut chunk, 1);
        push_value(&mut chunk, Value::str(""));
        chunk.emit(Op::And, 0, 0, loc());
        push_int(&mut chunk, 0);
        push_value(&mut chunk, Value::str("x"));
        chunk.emit(Op::Or, 0, 0, loc());
        chunk.emit(Op::Halt, 0, 0, loc());
        let (stack, _, _) = run(&chunk);
        assert_eq!(stack, vec![Value::Bool(false), Value::Bool(true)]);
    }

    // ── Control flow ────────────────────────────────────────────────

    #[test]
    fn test_jump_skips_instructions() {
        let mut chunk = Chunk::new();
        chunk.emit(Op::Jump, 2, 0, loc()); // skip the push below
        push_int(&mut chunk, 99);
        push_int(&mut chunk, 1);
        chunk.emit(Op::Halt, 0, 0, loc());
        let (stack, _, _) = run(&chunk);
        assert_eq!(stack, vec![Value::Int(1)]);
    }

    #[test]
    fn test_jump_if_false_pops_condition() {
        let mut chunk = Chunk::new();
        push_value(&mut chunk, Value::Bool(false));
        chunk.emit(Op::JumpIfFalse, 3, 0, loc());
        push_int(&mut chunk, 99); // skipped
        push_int(&mut chunk, 1); // target
        chunk.emit(Op::Halt, 0, 0, loc());
        let (stack, _, _) = run(&chunk);
        assert_eq!(stack, vec![Value::Int(1)]);
    }

    #[test]
    fn test_pc_past_end_halts_cleanly() {
        let mut chunk = Chunk::new();
        push_int(&mut chunk, 1);
        chunk.emit(Op::Pop, 0, 0, loc());
        // no halt instruction
        let (stack, code, _) = run(&chunk);
        assert_eq!(code, 0);
        assert!(stack.is_empty());
    }

    // ── Variables ───────────────────────────────────────────────────

    #[test]
    fn test_globals_grow_on_demand() {
        let mut chunk = Chunk::new();
        push_int(&mut chunk, 42);
        chunk.emit(Op::StoreGlobal, 5, 0, loc());
        chunk.emit(Op::LoadGlobal, 5, 0, loc());
        chunk.emit(Op::LoadGlobal, 3, 0, loc()); // untouched slot reads Null
        chunk.emit(Op::Halt, 0, 0, loc());
        let (stack, _, _) = run(&chunk);
        assert_eq!(stack, vec![Value::Int(42), Value::Null]);
    }

    #[test]
    fn test_local_outside_frame_is_error() {
        let chunk = chunk_of(&[(Op::LoadLocal, 0, 0), (Op::Halt, 0, 0)]);
        let (_, code, _) = run(&chunk);
        assert_eq!(code, 1);
    }

    #[test]
    fn test_string_load_shares_buffer_with_global() {
        let mut chunk = Chunk::new();
        push_value(&mut chunk, Value::str("shared"));
        chunk.emit(Op::StoreGlobal, 0, 0, loc());
        chunk.emit(Op::LoadGlobal, 0, 0, loc());
        chunk.emit(Op::Halt, 0, 0, loc());

        let mut out: Vec<u8> = Vec::new();
        let mut vm = Vm::new(&chunk, &mut out);
        vm.run();
        let on_stack = match &vm.stack()[0] {
            Value::Str(rc) => rc.clone(),
            other => panic!("expected string, got {:?}", other),
        };
        // The loaded value shares the pool constant's buffer.
        match &chunk.constants[0] {
            Value::Str(pool) => assert!(std::rc::Rc::ptr_eq(pool, &on_stack)),
            other => panic!("expected string constant, got {:?}", other),
        }
    }

    // ── Calls and returns ───────────────────────────────────────────

    /// Chunk shape: jump-over, function body at ip 1, entry code after.
    fn call_test_chunk() -> Chunk {
        let mut chunk = Chunk::new();
        chunk.emit(Op::Jump, 0, 0, loc()); // patched below
        // fn double(x): return x + x
        let start = chunk.instruction_count();
        chunk.emit(Op::LoadLocal, 0, 0, loc());
        chunk.emit(Op::LoadLocal, 0, 0, loc());
        chunk.emit(Op::Add, 0, 0, loc());
        chunk.emit(Op::Return, 0, 0, loc());
        chunk.patch(0, chunk.instruction_count());
        chunk.add_function("double", start, 1);
        chunk.functions[0].local_count = 1;
        chunk
    }

    #[test]
    fn test_call_and_return() {
        let mut chunk = call_test_chunk();
        push_int(&mut chunk, 21);
        chunk.emit(Op::Call, 0, 1, loc());
        chunk.emit(Op::Halt, 0, 0, loc());
        let (stack, code, _) = run(&chunk);
        assert_eq!(stack, vec![Value::Int(42)]);
        assert_eq!(code, 42); // halt reads the top of stack
    }

    #[test]
    fn test_return_restores_stack_depth() {
        let mut chunk = call_test_chunk();
        push_int(&mut chunk, 10); // caller value below the call
        push_int(&mut chunk, 2);
        chunk.emit(Op::Call, 0, 1, loc());
        chunk.emit(Op::Halt, 0, 0, loc());
        let (stack, _, _) = run(&chunk);
        // depth = stack_base + 1: the caller value plus the return value
        assert_eq!(stack, vec![Value::Int(10), Value::Int(4)]);
    }

    #[test]
    fn test_call_sentinel_is_runtime_error() {
        let mut chunk = Chunk::new();
        chunk.emit(Op::Call, SENTINEL_IP, 0, loc());
        chunk.emit(Op::Halt, 0, 0, loc());
        let (_, code, _) = run(&chunk);
        assert_eq!(code, 1);
    }

    #[test]
    fn test_call_invalid_index_is_runtime_error() {
        let mut chunk = Chunk::new();
        chunk.emit(Op::Call, 7, 0, loc());
        chunk.emit(Op::Halt, 0, 0, loc());
        let (_, code, _) = run(&chunk);
        assert_eq!(code, 1);
    }

    #[test]
    fn test_call_depth_limit() {
        // fn loop(): loop()  -- infinite recursion
        let mut chunk = Chunk::new();
        chunk.emit(Op::Jump, 0, 0, loc());
        let start = chunk.instruction_count();
        chunk.emit(Op::Call, 0, 0, loc());
        chunk.emit(Op::Return, 0, 0, loc());
        chunk.patch(0, chunk.instruction_count());
        chunk.add_function("forever", start, 0);
        chunk.emit(Op::Call, 0, 0, loc());
        chunk.emit(Op::Halt, 0, 0, loc());
        let (_, code, _) = run(&chunk);
        assert_eq!(code, 1);
    }

    #[test]
    fn test_top_level_return_sets_exit_code() {
        let mut chunk = Chunk::new();
        push_int(&mut chunk, 7);
        chunk.emit(Op::Return, 0, 0, loc());
        chunk.emit(Op::Halt, 0, 0, loc());
        let (_, code, _) = run(&chunk);
        assert_eq!(code, 7);
    }

    #[test]
    fn test_uninitialized_locals_read_null() {
        let mut chunk = Chunk::new();
        chunk.emit(Op::Jump, 0, 0, loc());
        let start = chunk.instruction_count();
        chunk.emit(Op::LoadLocal, 2, 0, loc()); // never written
        chunk.emit(Op::Return, 0, 0, loc());
        chunk.patch(0, chunk.instruction_count());
        chunk.add_function("f", start, 0);
        chunk.functions[0].local_count = 3;
        chunk.emit(Op::Call, 0, 0, loc());
        chunk.emit(Op::Halt, 0, 0, loc());
        let (stack, _, _) = run(&chunk);
        assert_eq!(stack, vec![Value::Null]);
    }

    // ── Halt and exit codes ─────────────────────────────────────────

    #[test]
    fn test_halt_empty_stack_exits_zero() {
        let chunk = chunk_of(&[(Op::Halt, 0, 0)]);
        let (_, code, _) = run(&chunk);
        assert_eq!(code, 0);
    }

    #[test]
    fn test_halt_with_bool_top() {
        let mut chunk = Chunk::new();
        push_value(&mut chunk, Value::Bool(true));
        chunk.emit(Op::Halt, 0, 0, loc());
        let (_, code, _) = run(&chunk);
        assert_eq!(code, 1);
    }

    #[test]
    fn test_halt_with_string_top_keeps_zero() {
        let mut chunk = Chunk::new();
        push_value(&mut chunk, Value::str("done"));
        chunk.emit(Op::Halt, 0, 0, loc());
        let (_, code, _) = run(&chunk);
        assert_eq!(code, 0);
    }

    // ── Errors ──────────────────────────────────────────────────────

    #[test]
    fn test_stack_underflow_is_runtime_error() {
        let chunk = chunk_of(&[(Op::Pop, 0, 0), (Op::Halt, 0, 0)]);
        let (_, code, _) = run(&chunk);
        assert_eq!(code, 1);
    }

    #[test]
    fn test_array_ops_report_not_implemented() {
        let mut chunk = Chunk::new();
        push_int(&mut chunk, 0);
        push_int(&mut chunk, 0);
        chunk.emit(Op::ArrayGet, 0, 0, loc());
        chunk.emit(Op::Halt, 0, 0, loc());
        let (_, code, _) = run(&chunk);
        assert_eq!(code, 1);
    }

    // ── Conversions ─────────────────────────────────────────────────

    #[test]
    fn test_conversion_opcodes() {
        let mut chunk = Chunk::new();
        push_value(&mut chunk, Value::str("12"));
        chunk.emit(Op::ToInt, 0, 0, loc());
        push_int(&mut chunk, 3);
        chunk.emit(Op::ToFloat, 0, 0, loc());
        push_value(&mut chunk, Value::Bool(false));
        chunk.emit(Op::ToString, 0, 0, loc());
        chunk.emit(Op::Halt, 0, 0, loc());
        let (stack, _, _) = run(&chunk);
        assert_eq!(
            stack,
            vec![Value::Int(12), Value::Float(3.0), Value::str("false")]
        );
    }

    #[test]
    fn test_concat_uses_display_forms() {
        let mut chunk = Chunk::new();
        push_int(&mut chunk, 4);
        push_value(&mut chunk, Value::Bool(true));
        chunk.emit(Op::Concat, 0, 0, loc());
        chunk.emit(Op::Halt, 0, 0, loc());
        let (stack, _, _) = run(&chunk);
        assert_eq!(stack, vec![Value::str("4true")]);
    }

    // ── Builtins through the dispatch table ─────────────────────────

    #[test]
    fn test_print_appends_newline() {
        let mut chunk = Chunk::new();
        push_int(&mut chunk, 7);
        chunk.emit(Op::CallBuiltin, builtins::PRINT, 1, loc());
        chunk.emit(Op::Pop, 0, 0, loc());
        chunk.emit(Op::Halt, 0, 0, loc());
        let (stack, code, out) = run(&chunk);
        assert_eq!(out, "7\n");
        assert_eq!(code, 0);
        assert!(stack.is_empty());
    }

    #[test]
    fn test_printf_formats_without_newline() {
        let mut chunk = Chunk::new();
        push_value(&mut chunk, Value::str("%s is %d\\n"));
        push_value(&mut chunk, Value::str("x"));
        push_int(&mut chunk, 7);
        chunk.emit(Op::CallBuiltin, builtins::PRINTF, 3, loc());
        chunk.emit(Op::Pop, 0, 0, loc());
        chunk.emit(Op::Halt, 0, 0, loc());
        let (_, _, out) = run(&chunk);
        assert_eq!(out, "x is 7\n");
    }

    #[test]
    fn test_builtin_pops_argc_and_pushes_one() {
        let mut chunk = Chunk::new();
        push_int(&mut chunk, 3);
        push_int(&mut chunk, 9);
        chunk.emit(Op::CallBuiltin, builtins::MAX, 2, loc());
        chunk.emit(Op::Halt, 0, 0, loc());
        let (stack, _, _) = run(&chunk);
        assert_eq!(stack, vec![Value::Int(9)]);
    }

    #[test]
    fn test_builtin_string_roundtrip() {
        let mut chunk = Chunk::new();
        push_value(&mut chunk, Value::str("  padded  "));
        chunk.emit(Op::CallBuiltin, builtins::STRTRIM, 1, loc());
        chunk.emit(Op::CallBuiltin, builtins::STRLEN, 1, loc());
        chunk.emit(Op::Halt, 0, 0, loc());
        let (stack, _, _) = run(&chunk);
        assert_eq!(stack, vec![Value::Int(6)]);
    }

    #[test]
    fn test_builtin_exit_halts() {
        let mut chunk = Chunk::new();
        push_int(&mut chunk, 3);
        chunk.emit(Op::CallBuiltin, builtins::EXIT, 1, loc());
        push_int(&mut chunk, 99); // never executed
        chunk.emit(Op::Halt, 0, 0, loc());
        let (_, code, _) = run(&chunk);
        assert_eq!(code, 3);
    }

    #[test]
    fn test_builtin_assert_failure() {
        let mut chunk = Chunk::new();
        push_value(&mut chunk, Value::Bool(false));
        chunk.emit(Op::CallBuiltin, builtins::ASSERT, 1, loc());
        chunk.emit(Op::Halt, 0, 0, loc());
        let (_, code, _) = run(&chunk);
        assert_eq!(code, 1);
    }

    #[test]
    fn test_builtin_assert_success_continues() {
        let mut chunk = Chunk::new();
        push_value(&mut chunk, Value::Bool(true));
        chunk.emit(Op::CallBuiltin, builtins::ASSERT, 1, loc());
        chunk.emit(Op::Pop, 0, 0, loc());
        chunk.emit(Op::Halt, 0, 0, loc());
        let (_, code, _) = run(&chunk);
        assert_eq!(code, 0);
    }

    #[test]
    fn test_unknown_builtin_id_is_runtime_error() {
        let mut chunk = Chunk::new();
        chunk.emit(Op::CallBuiltin, 999, 0, loc());
        chunk.emit(Op::Halt, 0, 0, loc());
        let (_, code, _) = run(&chunk);
        assert_eq!(code, 1);
    }

    #[test]
    fn test_typeof_builtin() {
        let mut chunk = Chunk::new();
        push_value(&mut chunk, Value::Float(1.5));
        chunk.emit(Op::CallBuiltin, builtins::TYPEOF, 1, loc());
        chunk.emit(Op::Halt, 0, 0, loc());
        let (stack, _, _) = run(&chunk);
        assert_eq!(stack, vec![Value::str("Float")]);
    }

    // ── Format strings ──────────────────────────────────────────────

    #[test]
    fn test_format_specifiers() {
        let args = [
            Value::str("s"),
            Value::Int(5),
            Value::Float(1.5),
            Value::Char(b'c'),
            Value::Int(0),
        ];
        assert_eq!(
            format_string("%s %d %f %c %b", &args),
            "s 5 1.5 c false"
        );
    }

    #[test]
    fn test_format_percent_escape() {
        assert_eq!(format_string("100%%", &[]), "100%");
    }

    #[test]
    fn test_format_missing_argument_keeps_specifier() {
        assert_eq!(format_string("%d and %d", &[Value::Int(1)]), "1 and %d");
    }

    #[test]
    fn test_format_unknown_specifier_is_literal() {
        assert_eq!(format_string("%x", &[Value::Int(1)]), "%x");
    }

    #[test]
    fn test_format_runtime_escapes() {
        assert_eq!(format_string("a\\tb\\n", &[]), "a\tb\n");
        assert_eq!(format_string("back\\\\slash", &[]), "back\\slash");
    }

    #[test]
    fn test_format_float_coercion_for_d() {
        assert_eq!(format_string("%d", &[Value::Float(3.9)]), "3");
    }

    #[test]
    fn test_stack_overflow_reports() {
        // A loop that pushes forever trips the stack limit.
        let mut chunk = Chunk::new();
        push_int(&mut chunk, 1);
        chunk.emit(Op::Jump, 0, 0, loc());
        let mut out: Vec<u8> = Vec::new();
        let mut vm = Vm::with_config(
            &chunk,
            &mut out,
            VmConfig {
                max_stack_depth: 64,
                max_call_depth: 8,
            },
        );
        let code = vm.run();
        assert_eq!(code, 1);
    }
}
