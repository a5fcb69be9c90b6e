use crate::bytecode::chunk::{Chunk, SENTINEL_IP};
use crate::bytecode::op::Op;
use crate::diagnostics::{Diagnostics, SourceLoc, Stage};
use crate::lang::ast::{BinOp, Block, Expr, Program, Stmt, UnOp};
use crate::lang::value::Value;
use crate::runtime::builtins;

/// A named variable bound to a slot. Locals carry the scope level they
/// were declared at so block exit can drop them; the global table is
/// flat and never scoped.
#[derive(Debug)]
struct VarSlot {
    name: String,
    slot: u32,
    scope_level: u32,
}

/// Per-loop emission state. Pending `break`/`continue` jumps accumulate
/// here and are backpatched when the loop context is popped.
#[derive(Debug, Default)]
struct LoopContext {
    /// Known for `while` (the loop start); unknown for `for` until the
    /// step expression's position is fixed.
    continue_target: Option<u32>,
    breaks: Vec<u32>,
    continues: Vec<u32>,
}

/// Translates a syntax tree into a bytecode chunk.
///
/// Generation runs three passes over the top-level forms: global slot
/// allocation, function registration (so forward calls resolve), then
/// emission with function bodies first. Local slots are flat per-function
/// indices that are never reused across a body.
pub struct Compiler<'d> {
    chunk: Chunk,
    diags: &'d mut Diagnostics,
    vars: Vec<VarSlot>,
    globals: Vec<VarSlot>,
    scope_level: u32,
    local_counter: u32,
    in_global_scope: bool,
    loops: Vec<LoopContext>,
}

impl<'d> Compiler<'d> {
    pub fn new(diags: &'d mut Diagnostics) -> Self {
        Compiler {
            chunk: Chunk::new(),
            diags,
            vars: Vec::new(),
            globals: Vec::new(),
            scope_level: 0,
            local_counter: 0,
            in_global_scope: true,
            loops: Vec::new(),
        }
    }

    pub fn compile(mut self, program: &Program) -> Chunk {
        // Pass 1: global slots for every top-level variable declaration.
        for node in &program.nodes {
            if let Stmt::VarDecl { name, .. } = node {
                if self.lookup_global(name).is_none() {
                    self.add_global(name);
                }
            }
        }

        // Pass 2: register all functions with a sentinel start ip so
        // call sites emitted in pass 3 resolve to known ordinals.
        for node in &program.nodes {
            if let Stmt::FuncDecl { name, params, .. } = node {
                self.chunk
                    .add_function(name, SENTINEL_IP, params.len() as u32);
            }
        }

        // Pass 3: function bodies first, then top-level statements.
        for node in &program.nodes {
            if let Stmt::FuncDecl { .. } = node {
                self.emit_stmt(node);
            }
        }
        for node in &program.nodes {
            if !matches!(node, Stmt::FuncDecl { .. }) {
                self.emit_stmt(node);
            }
        }

        if let Some(main_idx) = self.chunk.find_function("main") {
            self.chunk
                .emit(Op::Call, main_idx, 0, SourceLoc::synthetic());
        }
        self.chunk.emit(Op::Halt, 0, 0, SourceLoc::synthetic());

        self.chunk
    }

    // ── Variable bookkeeping ────────────────────────────────────────

    fn lookup_local(&self, name: &str) -> Option<u32> {
        self.vars
            .iter()
            .rev()
            .find(|v| v.name == name)
            .map(|v| v.slot)
    }

    fn lookup_global(&self, name: &str) -> Option<u32> {
        self.globals.iter().find(|v| v.name == name).map(|v| v.slot)
    }

    fn add_local(&mut self, name: &str) -> u32 {
        let slot = self.local_counter;
        self.local_counter += 1;
        self.vars.push(VarSlot {
            name: name.to_string(),
            slot,
            scope_level: self.scope_level,
        });
        slot
    }

    fn add_global(&mut self, name: &str) -> u32 {
        let slot = self.globals.len() as u32;
        self.globals.push(VarSlot {
            name: name.to_string(),
            slot,
            scope_level: 0,
        });
        slot
    }

    fn enter_scope(&mut self) {
        self.scope_level += 1;
    }

    /// Drop bindings declared at the closing scope level. Their slots
    /// stay allocated; the counter is never compacted.
    fn exit_scope(&mut self) {
        let level = self.scope_level;
        self.vars.retain(|v| v.scope_level < level);
        self.scope_level -= 1;
    }

    fn push_null(&mut self, loc: SourceLoc) {
        let ci = self.chunk.add_constant(Value::Null);
        self.chunk.emit(Op::PushConst, ci, 0, loc);
    }

    // ── Statements ──────────────────────────────────────────────────

    fn emit_block(&mut self, block: &Block) {
        self.enter_scope();
        for stmt in &block.statements {
            self.emit_stmt(stmt);
        }
        self.exit_scope();
    }

    fn emit_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::VarDecl {
                name, init, loc, ..
            } => {
                if self.in_global_scope {
                    let slot = self
                        .lookup_global(name)
                        .unwrap_or_else(|| self.add_global(name));
                    match init {
                        Some(expr) => self.emit_expr(expr),
                        None => self.push_null(*loc),
                    }
                    self.chunk.emit(Op::StoreGlobal, slot, 0, *loc);
                } else {
                    let slot = self.add_local(name);
                    match init {
                        Some(expr) => self.emit_expr(expr),
                        None => self.push_null(*loc),
                    }
                    self.chunk.emit(Op::StoreLocal, slot, 0, *loc);
                }
            }

            Stmt::FuncDecl {
                name,
                params,
                body,
                loc,
                ..
            } => self.emit_func(name, params, body, *loc),

            Stmt::If {
                cond,
                then_block,
                else_block,
                loc,
            } => {
                self.emit_expr(cond);
                let jf = self.chunk.emit(Op::JumpIfFalse, 0, 0, *loc);
                self.emit_block(then_block);
                match else_block {
                    Some(else_block) => {
                        let je = self.chunk.emit(Op::Jump, 0, 0, *loc);
                        self.chunk.patch(jf, self.chunk.instruction_count());
                        self.emit_block(else_block);
                        self.chunk.patch(je, self.chunk.instruction_count());
                    }
                    None => {
                        self.chunk.patch(jf, self.chunk.instruction_count());
                    }
                }
            }

            Stmt::While { cond, body, loc } => {
                let loop_start = self.chunk.instruction_count();
                self.emit_expr(cond);
                let jf = self.chunk.emit(Op::JumpIfFalse, 0, 0, *loc);

                self.loops.push(LoopContext {
                    continue_target: Some(loop_start),
                    ..LoopContext::default()
                });
                self.emit_block(body);
                self.chunk.emit(Op::Jump, loop_start, 0, *loc);

                let exit_ip = self.chunk.instruction_count();
                self.chunk.patch(jf, exit_ip);
                self.pop_loop(exit_ip, loop_start);
            }

            Stmt::For {
                init,
                cond,
                step,
                body,
                loc,
            } => {
                self.enter_scope();
                if let Some(init) = init {
                    self.emit_stmt(init);
                }

                let loop_start = self.chunk.instruction_count();
                let jf = cond.as_ref().map(|cond| {
                    self.emit_expr(cond);
                    self.chunk.emit(Op::JumpIfFalse, 0, 0, *loc)
                });

                self.loops.push(LoopContext::default());
                for stmt in &body.statements {
                    self.emit_stmt(stmt);
                }

                // Continue lands on the step, emitted after the body.
                let step_ip = self.chunk.instruction_count();
                if let Some(step) = step {
                    self.emit_expr_stmt(step);
                }
                self.chunk.emit(Op::Jump, loop_start, 0, *loc);

                let exit_ip = self.chunk.instruction_count();
                if let Some(jf) = jf {
                    self.chunk.patch(jf, exit_ip);
                }
                self.pop_loop(exit_ip, step_ip);
                self.exit_scope();
            }

            Stmt::Return { value, loc } => {
                match value {
                    Some(expr) => self.emit_expr(expr),
                    None => self.push_null(*loc),
                }
                self.chunk.emit(Op::Return, 0, 0, *loc);
            }

            Stmt::Break { loc } => {
                let idx = self.chunk.emit(Op::Jump, 0, 0, *loc);
                match self.loops.last_mut() {
                    Some(ctx) => ctx.breaks.push(idx),
                    None => {
                        self.diags
                            .error(Stage::Parser, *loc, "'break' outside of a loop");
                    }
                }
            }

            Stmt::Continue { loc } => {
                let idx = self.chunk.emit(Op::Jump, 0, 0, *loc);
                match self.loops.last_mut() {
                    Some(ctx) => ctx.continues.push(idx),
                    None => {
                        self.diags
                            .error(Stage::Parser, *loc, "'continue' outside of a loop");
                    }
                }
            }

            Stmt::Import { .. } => {}

            Stmt::Expr(expr) => self.emit_expr_stmt(expr),
        }
    }

    /// Backpatch every pending jump of the innermost loop.
    fn pop_loop(&mut self, exit_ip: u32, default_continue: u32) {
        let ctx = self.loops.pop().expect("loop context underflow");
        let continue_ip = ctx.continue_target.unwrap_or(default_continue);
        for idx in ctx.breaks {
            self.chunk.patch(idx, exit_ip);
        }
        for idx in ctx.continues {
            self.chunk.patch(idx, continue_ip);
        }
    }

    /// Expression in statement position: assignments store without
    /// leaving a value; anything else is evaluated and popped.
    fn emit_expr_stmt(&mut self, expr: &Expr) {
        if let Expr::Assign { target, value, loc } = expr {
            self.emit_assign(target, value, *loc);
        } else {
            self.emit_expr(expr);
            self.chunk.emit(Op::Pop, 0, 0, expr.loc());
        }
    }

    fn emit_func(
        &mut self,
        name: &str,
        params: &[crate::lang::ast::Param],
        body: &Block,
        loc: SourceLoc,
    ) {
        // Execution starts at pc 0, so every body is guarded by a jump
        // over it, patched once the end of the body is known.
        let jump_over = self.chunk.emit(Op::Jump, 0, 0, loc);
        let start_ip = self.chunk.instruction_count();
        let fidx = self.chunk.add_function(name, start_ip, params.len() as u32);

        let saved_global = self.in_global_scope;
        let saved_scope = self.scope_level;
        let saved_counter = self.local_counter;
        self.in_global_scope = false;
        self.scope_level += 1;
        self.local_counter = params.len() as u32;

        // Parameters occupy slots 0 .. param_count-1.
        for (i, param) in params.iter().enumerate() {
            self.vars.push(VarSlot {
                name: param.name.clone(),
                slot: i as u32,
                scope_level: self.scope_level,
            });
        }

        for stmt in &body.statements {
            self.emit_stmt(stmt);
        }

        // Guarantee termination: fall off the end returns null.
        let needs_epilogue = !matches!(body.statements.last(), Some(Stmt::Return { .. }));
        if needs_epilogue {
            self.push_null(loc);
            self.chunk.emit(Op::Return, 0, 0, loc);
        }

        self.chunk.functions[fidx as usize].local_count = self.local_counter;

        let level = saved_scope;
        self.vars.retain(|v| v.scope_level <= level);
        self.scope_level = saved_scope;
        self.local_counter = saved_counter;
        self.in_global_scope = saved_global;

        self.chunk.patch(jump_over, self.chunk.instruction_count());
    }

    // ── Expressions ─────────────────────────────────────────────────

    /// Post-order emission: operands first, then the operator opcode.
    fn emit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Literal { value, loc } => {
                let ci = self.chunk.add_constant(value.clone());
                self.chunk.emit(Op::PushConst, ci, 0, *loc);
            }

            Expr::Identifier { name, loc } => {
                if let Some(slot) = self.lookup_local(name) {
                    self.chunk.emit(Op::LoadLocal, slot, 0, *loc);
                } else if let Some(slot) = self.lookup_global(name) {
                    self.chunk.emit(Op::LoadGlobal, slot, 0, *loc);
                } else {
                    self.diags.error(
                        Stage::Parser,
                        *loc,
                        format!("undefined variable '{}'", name),
                    );
                    self.push_null(*loc);
                }
            }

            Expr::Binary { op, lhs, rhs, loc } => {
                self.emit_expr(lhs);
                self.emit_expr(rhs);
                let opcode = match op {
                    BinOp::Add => Op::Add,
                    BinOp::Sub => Op::Subtract,
                    BinOp::Mul => Op::Multiply,
                    BinOp::Div => Op::Divide,
                    BinOp::Mod => Op::Modulo,
                    BinOp::Eq => Op::Equal,
                    BinOp::Ne => Op::NotEqual,
                    BinOp::Lt => Op::Less,
                    BinOp::Le => Op::LessEqual,
                    BinOp::Gt => Op::Greater,
                    BinOp::Ge => Op::GreaterEqual,
                    BinOp::And => Op::And,
                    BinOp::Or => Op::Or,
                };
                self.chunk.emit(opcode, 0, 0, *loc);
            }

            Expr::Unary { op, operand, loc } => {
                self.emit_expr(operand);
                let opcode = match op {
                    UnOp::Neg => Op::Negate,
                    UnOp::Not => Op::Not,
                };
                self.chunk.emit(opcode, 0, 0, *loc);
            }

            Expr::Assign { target, value, loc } => {
                self.emit_assign(target, value, *loc);
            }

            Expr::Call { callee, args, loc } => {
                if let Some(entry) = builtins::lookup_name(callee) {
                    for arg in args {
                        self.emit_expr(arg);
                    }
                    self.chunk
                        .emit(Op::CallBuiltin, entry.id, args.len() as u32, *loc);
                } else {
                    let ordinal = match self.chunk.find_function(callee) {
                        Some(idx) => idx,
                        None => {
                            self.diags.error(
                                Stage::Parser,
                                *loc,
                                format!("call to unknown function '{}'", callee),
                            );
                            SENTINEL_IP
                        }
                    };
                    for arg in args {
                        self.emit_expr(arg);
                    }
                    self.chunk.emit(Op::Call, ordinal, args.len() as u32, *loc);
                }
            }

            Expr::Index { array, index, loc } => {
                self.emit_expr(array);
                self.emit_expr(index);
                self.chunk.emit(Op::ArrayGet, 0, 0, *loc);
            }
        }
    }

    fn emit_assign(&mut self, target: &Expr, value: &Expr, loc: SourceLoc) {
        match target {
            Expr::Identifier { name, .. } => {
                self.emit_expr(value);
                if let Some(slot) = self.lookup_local(name) {
                    self.chunk.emit(Op::StoreLocal, slot, 0, loc);
                } else if let Some(slot) = self.lookup_global(name) {
                    self.chunk.emit(Op::StoreGlobal, slot, 0, loc);
                } else {
                    self.diags.error(
                        Stage::Parser,
                        loc,
                        format!("cannot assign to undefined variable '{}'", name),
                    );
                    self.chunk.emit(Op::Pop, 0, 0, loc);
                }
            }
            Expr::Index { array, index, .. } => {
                self.emit_expr(array);
                self.emit_expr(index);
                self.emit_expr(value);
                self.chunk.emit(Op::ArraySet, 0, 0, loc);
            }
            other => {
                // The parser rejects other targets; fall back defensively.
                self.emit_expr(other);
                self.chunk.emit(Op::Pop, 0, 0, loc);
            }
        }
    }
}
