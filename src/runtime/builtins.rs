//! The built-in function registry.
//!
//! Every built-in has a stable numeric id the code generator embeds into
//! `CALL_BUILTIN` instructions. Ids 1 and 2 (`print`, `printf`) are wired
//! directly into the VM dispatch loop; everything else goes through the
//! handlers in this table.
//!
//! Handlers honor the calling contract exactly: pop `argc` arguments,
//! push exactly one result (`Null` when there is nothing to say).

use crate::lang::value::Value;
use crate::runtime::error::RuntimeError;
use crate::runtime::vm::Vm;

// I/O
pub const PRINT: u32 = 1;
pub const PRINTF: u32 = 2;
pub const INPUT: u32 = 3;
pub const READLINE: u32 = 4;

// Math
pub const ABS: u32 = 10;
pub const SQRT: u32 = 11;
pub const POW: u32 = 12;
pub const SIN: u32 = 13;
pub const COS: u32 = 14;
pub const TAN: u32 = 15;
pub const FLOOR: u32 = 16;
pub const CEIL: u32 = 17;
pub const ROUND: u32 = 18;
pub const MAX: u32 = 19;
pub const MIN: u32 = 20;

// String
pub const STRLEN: u32 = 30;
pub const SUBSTR: u32 = 31;
pub const TOUPPER: u32 = 32;
pub const TOLOWER: u32 = 33;
pub const STRCONTAINS: u32 = 34;
pub const STRINDEXOF: u32 = 35;
pub const STRREPLACE: u32 = 36;
pub const STRTRIM: u32 = 37;
pub const STRSPLIT: u32 = 38;

// Conversions
pub const TO_INT: u32 = 40;
pub const TO_FLOAT: u32 = 41;
pub const TO_STRING: u32 = 42;
pub const TO_BOOL: u32 = 43;
pub const TYPEOF: u32 = 44;

// Utilities
pub const EXIT: u32 = 50;
pub const ASSERT: u32 = 51;
pub const IS_NULL: u32 = 52;
pub const IS_INT: u32 = 53;
pub const IS_FLOAT: u32 = 54;
pub const IS_STRING: u32 = 55;
pub const IS_BOOL: u32 = 56;

pub type BuiltinFn = for<'a, 'v> fn(&'a mut Vm<'v>, usize) -> Result<(), RuntimeError>;

pub struct BuiltinEntry {
    pub id: u32,
    pub name: &'static str,
    pub handler: BuiltinFn,
}

pub static BUILTINS: &[BuiltinEntry] = &[
    BuiltinEntry { id: PRINT, name: "print", handler: builtin_print },
    BuiltinEntry { id: PRINTF, name: "printf", handler: builtin_printf },
    BuiltinEntry { id: INPUT, name: "input", handler: builtin_input },
    BuiltinEntry { id: READLINE, name: "readLine", handler: builtin_input },
    BuiltinEntry { id: ABS, name: "abs", handler: builtin_abs },
    BuiltinEntry { id: SQRT, name: "sqrt", handler: builtin_sqrt },
    BuiltinEntry { id: POW, name: "pow", handler: builtin_pow },
    BuiltinEntry { id: SIN, name: "sin", handler: builtin_sin },
    BuiltinEntry { id: COS, name: "cos", handler: builtin_cos },
    BuiltinEntry { id: TAN, name: "tan", handler: builtin_tan },
    BuiltinEntry { id: FLOOR, name: "floor", handler: builtin_floor },
    BuiltinEntry { id: CEIL, name: "ceil", handler: builtin_ceil },
    BuiltinEntry { id: ROUND, name: "round", handler: builtin_round },
    BuiltinEntry { id: MAX, name: "max", handler: builtin_max },
    BuiltinEntry { id: MIN, name: "min", handler: builtin_min },
    BuiltinEntry { id: STRLEN, name: "strLen", handler: builtin_strlen },
    BuiltinEntry { id: SUBSTR, name: "substr", handler: builtin_substr },
    BuiltinEntry { id: TOUPPER, name: "toUpperCase", handler: builtin_toupper },
    BuiltinEntry { id: TOLOWER, name: "toLowerCase", handler: builtin_tolower },
    BuiltinEntry { id: STRCONTAINS, name: "strContains", handler: builtin_strcontains },
    BuiltinEntry { id: STRINDEXOF, name: "strIndexOf", handler: builtin_strindexof },
    BuiltinEntry { id: STRREPLACE, name: "strReplace", handler: builtin_strreplace },
    BuiltinEntry { id: STRTRIM, name: "strTrim", handler: builtin_strtrim },
    BuiltinEntry { id: STRSPLIT, name: "strSplit", handler: builtin_strsplit },
    BuiltinEntry { id: TO_INT, name: "toInt", handler: builtin_to_int },
    BuiltinEntry { id: TO_FLOAT, name: "toFloat", handler: builtin_to_float },
    BuiltinEntry { id: TO_STRING, name: "toString", handler: builtin_to_string },
    BuiltinEntry { id: TO_BOOL, name: "toBool", handler: builtin_to_bool },
    BuiltinEntry { id: TYPEOF, name: "typeOf", handler: builtin_typeof },
    BuiltinEntry { id: EXIT, name: "exit", handler: builtin_exit },
    BuiltinEntry { id: ASSERT, name: "assert", handler: builtin_assert },
    BuiltinEntry { id: IS_NULL, name: "isNull", handler: builtin_is_null },
    BuiltinEntry { id: IS_INT, name: "isInt", handler: builtin_is_int },
    BuiltinEntry { id: IS_FLOAT, name: "isFloat", handler: builtin_is_float },
    BuiltinEntry { id: IS_STRING, name: "isString", handler: builtin_is_string },
    BuiltinEntry { id: IS_BOOL, name: "isBool", handler: builtin_is_bool },
];

pub fn lookup_name(name: &str) -> Option<&'static BuiltinEntry> {
    BUILTINS.iter().find(|e| e.name == name)
}

pub fn lookup_id(id: u32) -> Option<&'static BuiltinEntry> {
    BUILTINS.iter().find(|e| e.id == id)
}

// ── Coercions ─────────────────────────────────────────────────────────

/// Integer coercion: floats truncate, booleans map to 0/1, strings parse
/// a leading base-10 integer (0 when there is none).
pub fn to_int64(v: &Value) -> i64 {
    match v {
        Value::Int(n) => *n,
        Value::Float(f) => *f as i64,
        Value::Bool(b) => *b as i64,
        Value::Str(s) => parse_int_prefix(s),
        _ => 0,
    }
}

pub fn to_f64(v: &Value) -> f64 {
    match v {
        Value::Int(n) => *n as f64,
        Value::Float(f) => *f,
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}

fn parse_int_prefix(s: &str) -> i64 {
    let t = s.trim_start();
    let mut digits = String::new();
    let mut chars = t.chars().peekable();
    if let Some('+') | Some('-') = chars.peek() {
        digits.push(chars.next().unwrap());
    }
    while let Some(c) = chars.peek() {
        if c.is_ascii_digit() {
            digits.push(chars.next().unwrap());
        } else {
            break;
        }
    }
    digits.parse().unwrap_or(0)
}

// ── I/O ───────────────────────────────────────────────────────────────

fn builtin_print(vm: &mut Vm, argc: usize) -> Result<(), RuntimeError> {
    vm.builtin_print(argc)
}

fn builtin_printf(vm: &mut Vm, argc: usize) -> Result<(), RuntimeError> {
    vm.builtin_printf(argc)
}

fn builtin_input(vm: &mut Vm, argc: usize) -> Result<(), RuntimeError> {
    let args = vm.pop_args(argc)?;
    if let Some(Value::Str(prompt)) = args.first() {
        vm.write_out(prompt)?;
        vm.flush_out();
    }
    let line = vm.read_input_line();
    vm.push(Value::str(line));
    Ok(())
}

// ── Math ──────────────────────────────────────────────────────────────

fn builtin_abs(vm: &mut Vm, argc: usize) -> Result<(), RuntimeError> {
    let args = vm.pop_args(argc)?;
    let result = match args.first() {
        Some(Value::Int(n)) => Value::Int(n.wrapping_abs()),
        Some(v) => Value::Float(to_f64(v).abs()),
        None => Value::Int(0),
    };
    vm.push(result);
    Ok(())
}

fn builtin_sqrt(vm: &mut Vm, argc: usize) -> Result<(), RuntimeError> {
    let args = vm.pop_args(argc)?;
    let x = args.first().map(to_f64).unwrap_or(0.0);
    vm.push(Value::Float(if x < 0.0 { 0.0 } else { x.sqrt() }));
    Ok(())
}

fn builtin_pow(vm: &mut Vm, argc: usize) -> Result<(), RuntimeError> {
    let args = vm.pop_args(argc)?;
    let base = args.first().map(to_f64).unwrap_or(0.0);
    let exp = args.get(1).map(to_f64).unwrap_or(1.0);
    vm.push(Value::Float(base.powf(exp)));
    Ok(())
}

macro_rules! math1 {
    ($name:ident, $fn:ident) => {
        fn $name(vm: &mut Vm, argc: usize) -> Result<(), RuntimeError> {
            let args = vm.pop_args(argc)?;
            let x = args.first().map(to_f64).unwrap_or(0.0);
            vm.push(Value::Float(x.$fn()));
            Ok(())
        }
    };
}
math1!(builtin_sin, sin);
math1!(builtin_cos, cos);
math1!(builtin_tan, tan);
math1!(builtin_floor, floor);
math1!(builtin_ceil, ceil);
math1!(builtin_round, round);

fn builtin_max(vm: &mut Vm, argc: usize) -> Result<(), RuntimeError> {
    let args = vm.pop_args(argc)?;
    let result = match (args.first(), args.get(1)) {
        (Some(Value::Int(a)), Some(Value::Int(b))) => Value::Int(*a.max(b)),
        (Some(a), Some(b)) => Value::Float(to_f64(a).max(to_f64(b))),
        (Some(a), None) => a.clone(),
        (None, _) => Value::Null,
    };
    vm.push(result);
    Ok(())
}

fn builtin_min(vm: &mut Vm, argc: usize) -> Result<(), RuntimeError> {
    let args = vm.pop_args(argc)?;
    let result = match (args.first(), args.get(1)) {
        (Some(Value::Int(a)), Some(Value::Int(b))) => Value::Int(*a.min(b)),
        (Some(a), Some(b)) => Value::Float(to_f64(a).min(to_f64(b))),
        (Some(a), None) => a.clone(),
        (None, _) => Value::Null,
    };
    vm.push(result);
    Ok(())
}

// ── String ────────────────────────────────────────────────────────────

fn builtin_strlen(vm: &mut Vm, argc: usize) -> Result<(), RuntimeError> {
    let args = vm.pop_args(argc)?;
    let len = match args.first() {
        Some(Value::Str(s)) => s.len() as i64,
        _ => 0,
    };
    vm.push(Value::Int(len));
    Ok(())
}

/// `substr(s, start, len?)` — indices clamp to the string; out-of-range
/// start yields the empty string.
fn builtin_substr(vm: &mut Vm, argc: usize) -> Result<(), RuntimeError> {
    let args = vm.pop_args(argc)?;
    let s = match args.first() {
        Some(Value::Str(s)) if argc >= 2 => s.clone(),
        _ => {
            vm.push(Value::str(""));
            return Ok(());
        }
    };
    let chars: Vec<char> = s.chars().collect();
    let start = to_int64(&args[1]).max(0) as usize;
    let len = args
        .get(2)
        .map(to_int64)
        .unwrap_or(chars.len() as i64)
        .max(0) as usize;
    if start >= chars.len() {
        vm.push(Value::str(""));
        return Ok(());
    }
    let result: String = chars[start..].iter().take(len).collect();
    vm.push(Value::str(result));
    Ok(())
}

fn builtin_toupper(vm: &mut Vm, argc: usize) -> Result<(), RuntimeError> {
    let args = vm.pop_args(argc)?;
    let result = match args.first() {
        Some(Value::Str(s)) => s.to_uppercase(),
        _ => String::new(),
    };
    vm.push(Value::str(result));
    Ok(())
}

fn builtin_tolower(vm: &mut Vm, argc: usize) -> Result<(), RuntimeError> {
    let args = vm.pop_args(argc)?;
    let result = match args.first() {
        Some(Value::Str(s)) => s.to_lowercase(),
        _ => String::new(),
    };
    vm.push(Value::str(result));
    Ok(())
}

fn builtin_strcontains(vm: &mut Vm, argc: usize) -> Result<(), RuntimeError> {
    let args = vm.pop_args(argc)?;
    let found = match (args.first(), args.get(1)) {
        (Some(Value::Str(hay)), Some(Value::Str(needle))) => hay.contains(needle.as_ref()),
        _ => false,
    };
    vm.push(Value::Bool(found));
    Ok(())
}

fn builtin_strindexof(vm: &mut Vm, argc: usize) -> Result<(), RuntimeError> {
    let args = vm.pop_args(argc)?;
    let idx = match (args.first(), args.get(1)) {
        (Some(Value::Str(hay)), Some(Value::Str(needle))) => hay
            .find(needle.as_ref())
            .map(|i| i as i64)
            .unwrap_or(-1),
        _ => -1,
    };
    vm.push(Value::Int(idx));
    Ok(())
}

/// `strReplace(s, old, new)` replaces every occurrence; an empty needle
/// returns the source unchanged.
fn builtin_strreplace(vm: &mut Vm, argc: usize) -> Result<(), RuntimeError> {
    let args = vm.pop_args(argc)?;
    let result = match (args.first(), args.get(1), args.get(2)) {
        (Some(Value::Str(s)), Some(Value::Str(old)), Some(Value::Str(new))) => {
            if old.is_empty() {
                Value::Str(s.clone())
            } else {
                Value::str(s.replace(old.as_ref(), new))
            }
        }
        (Some(Value::Str(s)), _, _) => Value::Str(s.clone()),
        _ => Value::str(""),
    };
    vm.push(result);
    Ok(())
}

fn builtin_strtrim(vm: &mut Vm, argc: usize) -> Result<(), RuntimeError> {
    let args = vm.pop_args(argc)?;
    let result = match args.first() {
        Some(Value::Str(s)) => s.trim().to_string(),
        _ => String::new(),
    };
    vm.push(Value::str(result));
    Ok(())
}

/// `strSplit(s, delims)` — every character of `delims` separates; empty
/// tokens are skipped. Returns the token count pending array support.
fn builtin_strsplit(vm: &mut Vm, argc: usize) -> Result<(), RuntimeError> {
    let args = vm.pop_args(argc)?;
    let count = match args.first() {
        Some(Value::Str(s)) if argc >= 2 => {
            let delims = match args.get(1) {
                Some(Value::Str(d)) => d.to_string(),
                _ => " ".to_string(),
            };
            if delims.is_empty() {
                if s.is_empty() {
                    0
                } else {
                    1
                }
            } else {
                s.split(|c| delims.contains(c))
                    .filter(|t| !t.is_empty())
                    .count() as i64
            }
        }
        _ => 0,
    };
    vm.push(Value::Int(count));
    Ok(())
}

// ── Conversions ───────────────────────────────────────────────────────

fn builtin_to_int(vm: &mut Vm, argc: usize) -> Result<(), RuntimeError> {
    let args = vm.pop_args(argc)?;
    let n = args.first().map(to_int64).unwrap_or(0);
    vm.push(Value::Int(n));
    Ok(())
}

fn builtin_to_float(vm: &mut Vm, argc: usize) -> Result<(), RuntimeError> {
    let args = vm.pop_args(argc)?;
    let f = args.first().map(to_f64).unwrap_or(0.0);
    vm.push(Value::Float(f));
    Ok(())
}

fn builtin_to_string(vm: &mut Vm, argc: usize) -> Result<(), RuntimeError> {
    let args = vm.pop_args(argc)?;
    let s = args
        .first()
        .map(|v| v.to_string())
        .unwrap_or_default();
    vm.push(Value::str(s));
    Ok(())
}

fn builtin_to_bool(vm: &mut Vm, argc: usize) -> Result<(), RuntimeError> {
    let args = vm.pop_args(argc)?;
    let b = match args.first() {
        Some(Value::Str(s)) => match s.as_ref() {
            "true" => true,
            "false" => false,
            other => !other.is_empty(),
        },
        Some(v) => v.is_truthy(),
        None => false,
    };
    vm.push(Value::Bool(b));
    Ok(())
}

fn builtin_typeof(vm: &mut Vm, argc: usize) -> Result<(), RuntimeError> {
    let args = vm.pop_args(argc)?;
    let name = args.first().map(|v| v.type_name()).unwrap_or("null");
    vm.push(Value::str(name));
    Ok(())
}

// ── Utilities ─────────────────────────────────────────────────────────

fn builtin_exit(vm: &mut Vm, argc: usize) -> Result<(), RuntimeError> {
    let args = vm.pop_args(argc)?;
    let code = args.first().map(to_int64).unwrap_or(0) as i32;
    vm.halt_with(code);
    vm.push(Value::Null);
    Ok(())
}

fn builtin_assert(vm: &mut Vm, argc: usize) -> Result<(), RuntimeError> {
    let args = vm.pop_args(argc)?;
    if let Some(cond) = args.first() {
        if !cond.is_truthy() {
            match args.get(1) {
                Some(Value::Str(msg)) => eprintln!("ASSERTION FAILED: {}", msg),
                _ => eprintln!("ASSERTION FAILED"),
            }
            vm.halt_with(1);
        }
    }
    vm.push(Value::Null);
    Ok(())
}

fn builtin_is_null(vm: &mut Vm, argc: usize) -> Result<(), RuntimeError> {
    let args = vm.pop_args(argc)?;
    let r = args.first().map(|v| matches!(v, Value::Null)).unwrap_or(true);
    vm.push(Value::Bool(r));
    Ok(())
}

macro_rules! type_probe {
    ($name:ident, $pat:pat) => {
        fn $name(vm: &mut Vm, argc: usize) -> Result<(), RuntimeError> {
            let args = vm.pop_args(argc)?;
            let r = args.first().map(|v| matches!(v, $pat)).unwrap_or(false);
            vm.push(Value::Bool(r));
            Ok(())
        }
    };
}
type_probe!(builtin_is_int, Value::Int(_));
type_probe!(builtin_is_float, Value::Float(_));
type_probe!(builtin_is_string, Value::Str(_));
type_probe!(builtin_is_bool, Value::Bool(_));
