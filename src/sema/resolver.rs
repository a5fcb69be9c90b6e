//! Symbol and type resolution.
//!
//! An advisory pass over the syntax tree: it appends diagnostics and
//! never rewrites the tree. The driver decides whether its errors stop
//! the pipeline (strict mode) or merely get reported (lenient mode).

use crate::diagnostics::{Diagnostics, SourceLoc, Stage};
use crate::lang::ast::{BaseType, BinOp, Block, Expr, Program, Stmt, UnOp};
use crate::lang::value::Value;
use crate::runtime::builtins;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SymbolKind {
    Variable,
    Function,
}

#[derive(Debug)]
struct Symbol {
    name: String,
    base: BaseType,
    kind: SymbolKind,
    scope_level: u32,
    param_count: usize,
}

/// Scope-leveled symbol table with innermost-first lookup.
pub struct Resolver<'d> {
    diags: &'d mut Diagnostics,
    symbols: Vec<Symbol>,
    scope_level: u32,
    current_return: Option<BaseType>,
}

impl<'d> Resolver<'d> {
    pub fn new(diags: &'d mut Diagnostics) -> Self {
        Resolver {
            diags,
            symbols: Vec::new(),
            scope_level: 0,
            current_return: None,
        }
    }

    pub fn check(&mut self, program: &Program) {
        // Declare all functions first so forward calls resolve.
        for node in &program.nodes {
            if let Stmt::FuncDecl {
                name,
                return_type,
                params,
                loc,
                ..
            } = node
            {
                if self.in_current_scope(name) {
                    self.error(*loc, format!("redeclaration of function '{}'", name));
                } else {
                    self.symbols.push(Symbol {
                        name: name.clone(),
                        base: return_type.base,
                        kind: SymbolKind::Function,
                        scope_level: 0,
                        param_count: params.len(),
                    });
                }
            }
        }

        for node in &program.nodes {
            self.check_stmt(node);
        }
    }

    // ── Scope helpers ───────────────────────────────────────────────

    fn enter_scope(&mut self) {
        self.scope_level += 1;
    }

    fn exit_scope(&mut self) {
        let level = self.scope_level;
        self.symbols.retain(|s| s.scope_level < level);
        self.scope_level -= 1;
    }

    fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.symbols.iter().rev().find(|s| s.name == name)
    }

    fn in_current_scope(&self, name: &str) -> bool {
        self.symbols
            .iter()
            .any(|s| s.scope_level == self.scope_level && s.name == name)
    }

    fn declare_var(&mut self, name: &str, base: BaseType, loc: SourceLoc) {
        if self.in_current_scope(name) {
            self.error(loc, format!("redeclaration of '{}' in the same scope", name));
            return;
        }
        self.symbols.push(Symbol {
            name: name.to_string(),
            base,
            kind: SymbolKind::Variable,
            scope_level: self.scope_level,
            param_count: 0,
        });
    }

    fn error(&mut self, loc: SourceLoc, message: impl Into<String>) {
        self.diags.error(Stage::TypeChecker, loc, message);
    }

    fn warning(&mut self, loc: SourceLoc, message: impl Into<String>) {
        self.diags.warning(Stage::TypeChecker, loc, message);
    }

    // ── Statements ──────────────────────────────────────────────────

    fn check_block(&mut self, block: &Block) {
        self.enter_scope();
        for stmt in &block.statements {
            self.check_stmt(stmt);
        }
        self.exit_scope();
    }

    fn check_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::VarDecl {
                name,
                ty,
                init,
                loc,
            } => {
                if let Some(init) = init {
                    self.check_expr(init);
                    if let Some(init_base) = self.infer(init) {
                        if !assignable(ty.base, init_base) {
                            self.error(
                                *loc,
                                format!(
                                    "cannot initialize '{}' of type {:?} with a {:?} value",
                                    name, ty.base, init_base
                                ),
                            );
                        }
                    }
                }
                self.declare_var(name, ty.base, *loc);
            }

            Stmt::FuncDecl {
                return_type,
                params,
                body,
                ..
            } => {
                let saved_return = self.current_return;
                self.current_return = Some(return_type.base);
                self.enter_scope();
                for param in params {
                    self.declare_var(&param.name, param.ty.base, param.loc);
                }
                // The body shares the parameter scope level semantics of
                // the code generator: its braces still open a new scope.
                self.check_block(body);
                self.exit_scope();
                self.current_return = saved_return;
            }

            Stmt::If {
                cond,
                then_block,
                else_block,
                ..
            } => {
                self.check_expr(cond);
                self.check_block(then_block);
                if let Some(else_block) = else_block {
                    self.check_block(else_block);
                }
            }

            Stmt::While { cond, body, .. } => {
                self.check_expr(cond);
                self.check_block(body);
            }

            Stmt::For {
                init,
                cond,
                step,
                body,
                ..
            } => {
                self.enter_scope();
                if let Some(init) = init {
                    self.check_stmt(init);
                }
                if let Some(cond) = cond {
                    self.check_expr(cond);
                }
                if let Some(step) = step {
                    self.check_expr(step);
                }
                self.check_block(body);
                self.exit_scope();
            }

            Stmt::Return { value, loc } => {
                if let Some(value) = value {
                    self.check_expr(value);
                    if self.current_return == Some(BaseType::Void) {
                        self.warning(*loc, "returning a value from a void function");
                    }
                }
            }

            // Loop placement is the code generator's concern.
            Stmt::Break { .. } | Stmt::Continue { .. } => {}

            Stmt::Import { .. } => {}

            Stmt::Expr(expr) => self.check_expr(expr),
        }
    }

    // ── Expressions ─────────────────────────────────────────────────

    fn check_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Literal { .. } => {}

            Expr::Identifier { name, loc } => {
                if self.lookup(name).is_none() {
                    self.error(*loc, format!("undefined identifier '{}'", name));
                }
            }

            Expr::Binary { op, lhs, rhs, loc } => {
                self.check_expr(lhs);
                self.check_expr(rhs);
                self.check_operator(*op, lhs, rhs, *loc);
            }

            Expr::Unary { op, operand, loc } => {
                self.check_expr(operand);
                if *op == UnOp::Neg {
                    if let Some(base) = self.infer(operand) {
                        if !is_numeric(base) {
                            self.error(*loc, format!("cannot negate a {:?} value", base));
                        }
                    }
                }
            }

            Expr::Assign { target, value, loc } => {
                self.check_expr(value);
                match target.as_ref() {
                    Expr::Identifier { name, loc: id_loc } => {
                        let known = self.lookup(name).map(|s| s.base);
                        match known {
                            None => {
                                let id_loc = *id_loc;
                                self.error(
                                    id_loc,
                                    format!("assignment to undefined identifier '{}'", name),
                                );
                            }
                            Some(target_base) => {
                                if let Some(value_base) = self.infer(value) {
                                    if !assignable(target_base, value_base) {
                                        self.error(
                                            *loc,
                                            format!(
                                                "cannot assign a {:?} value to '{}' of type {:?}",
                                                value_base, name, target_base
                                            ),
                                        );
                                    }
                                }
                            }
                        }
                    }
                    Expr::Index { array, index, .. } => {
                        self.check_expr(array);
                        self.check_expr(index);
                    }
                    other => self.check_expr(other),
                }
            }

            Expr::Call { callee, args, loc } => {
                for arg in args {
                    self.check_expr(arg);
                }
                if builtins::lookup_name(callee).is_some() {
                    // Builtins tolerate flexible arity.
                    return;
                }
                match self.lookup(callee) {
                    Some(sym) if sym.kind == SymbolKind::Function => {
                        if sym.param_count != args.len() {
                            let expected = sym.param_count;
                            let name = callee.clone();
                            self.error(
                                *loc,
                                format!(
                                    "function '{}' expects {} argument(s), got {}",
                                    name,
                                    expected,
                                    args.len()
                                ),
                            );
                        }
                    }
                    Some(_) => {
                        self.error(*loc, format!("'{}' is not a function", callee));
                    }
                    None => {
                        self.error(*loc, format!("call to unknown function '{}'", callee));
                    }
                }
            }

            Expr::Index { array, index, .. } => {
                self.check_expr(array);
                self.check_expr(index);
            }
        }
    }

    fn check_operator(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr, loc: SourceLoc) {
        let (Some(l), Some(r)) = (self.infer(lhs), self.infer(rhs)) else {
            return;
        };

        match op {
            BinOp::Add => {
                let strings = l == BaseType::Str && r == BaseType::Str;
                let numerics = is_numeric(l) && is_numeric(r);
                if !strings && !numerics {
                    self.error(loc, format!("cannot add {:?} and {:?}", l, r));
                }
            }
            BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
                if !is_numeric(l) || !is_numeric(r) {
                    self.error(
                        loc,
                        format!("arithmetic requires numeric operands, got {:?} and {:?}", l, r),
                    );
                }
            }
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                if !is_numeric(l) || !is_numeric(r) {
                    self.error(
                        loc,
                        format!("comparison requires numeric operands, got {:?} and {:?}", l, r),
                    );
                }
            }
            // Equality and truthiness apply to every type.
            BinOp::Eq | BinOp::Ne | BinOp::And | BinOp::Or => {}
        }
    }

    /// Static type of an expression where it is evident; `None` when it
    /// cannot be known without running the program.
    fn infer(&self, expr: &Expr) -> Option<BaseType> {
        match expr {
            Expr::Literal { value, .. } => Some(match value {
                Value::Int(_) => BaseType::Int,
                Value::Float(_) => BaseType::Float,
                Value::Bool(_) => BaseType::Bool,
                Value::Char(_) => BaseType::Char,
                Value::Str(_) => BaseType::Str,
                Value::Null => return None,
            }),
            Expr::Identifier { name, .. } => {
                let sym = self.lookup(name)?;
                if sym.kind == SymbolKind::Variable && sym.base != BaseType::Unknown {
                    Some(sym.base)
                } else {
                    None
                }
            }
            Expr::Binary { op, lhs, rhs, .. } => match op {
                BinOp::Add => {
                    let l = self.infer(lhs)?;
                    let r = self.infer(rhs)?;
                    if l == BaseType::Str && r == BaseType::Str {
                        Some(BaseType::Str)
                    } else if l == BaseType::Float || r == BaseType::Float {
                        Some(BaseType::Float)
                    } else if l == BaseType::Int && r == BaseType::Int {
                        Some(BaseType::Int)
                    } else {
                        None
                    }
                }
                BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
                    let l = self.infer(lhs)?;
                    let r = self.infer(rhs)?;
                    if l == BaseType::Float || r == BaseType::Float {
                        Some(BaseType::Float)
                    } else if l == BaseType::Int && r == BaseType::Int {
                        Some(BaseType::Int)
                    } else {
                        None
                    }
                }
                BinOp::Eq
                | BinOp::Ne
                | BinOp::Lt
                | BinOp::Le
                | BinOp::Gt
                | BinOp::Ge
                | BinOp::And
                | BinOp::Or => Some(BaseType::Bool),
            },
            Expr::Unary { op, operand, .. } => match op {
                UnOp::Neg => self.infer(operand),
                UnOp::Not => Some(BaseType::Bool),
            },
            Expr::Call { callee, .. } => {
                if builtins::lookup_name(callee).is_some() {
                    return None;
                }
                let sym = self.lookup(callee)?;
                if sym.kind == SymbolKind::Function && sym.base != BaseType::Void {
                    Some(sym.base)
                } else {
                    None
                }
            }
            Expr::Assign { .. } | Expr::Index { .. } => None,
        }
    }
}

fn is_numeric(base: BaseType) -> bool {
    matches!(base, BaseType::Int | BaseType::Float)
}

/// Whether a value of `from` may initialize or be assigned to a slot
/// declared as `to`. Int and Float interchange; everything else must
/// match exactly.
fn assignable(to: BaseType, from: BaseType) -> bool {
    if to == BaseType::Unknown || from == BaseType::Unknown {
        return true;
    }
    to == from || (is_numeric(to) && is_numeric(from))
}
