#![allow(clippy::new_without_default)]

pub mod bytecode;
pub mod diagnostics;
pub mod frontend;
pub mod lang;
pub mod runtime;
pub mod sema;

pub mod prelude {
    pub use crate::bytecode::chunk::{Chunk, FuncEntry, Instruction, SENTINEL_IP};
    pub use crate::bytecode::codegen::Compiler;
    pub use crate::bytecode::op::Op;
    pub use crate::diagnostics::{Diagnostic, Diagnostics, Severity, SourceLoc, Stage};
    pub use crate::frontend::lexer::{Lexer, Spanned};
    pub use crate::frontend::parser::Parser;
    pub use crate::frontend::token::Token;
    pub use crate::lang::ast::*;
    pub use crate::lang::value::Value;
    pub use crate::runtime::vm::{Vm, VmConfig};
    pub use crate::sema::resolver::Resolver;
}

use std::io::Write;

use crate::bytecode::chunk::Chunk;
use crate::bytecode::codegen::Compiler;
use crate::bytecode::verify::verify_chunk;
use crate::diagnostics::Diagnostics;
use crate::frontend::lexer::Lexer;
use crate::frontend::parser::Parser;
use crate::runtime::vm::{Vm, VmConfig};
use crate::sema::resolver::Resolver;

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Report resolver errors without stopping the pipeline.
    pub lenient: bool,
    /// Execution limits handed to the VM.
    pub vm_config: Option<VmConfig>,
}

/// The full source-to-exit-code pipeline: tokenize, parse, resolve,
/// generate bytecode, verify, execute.
///
/// Program output goes to a caller-supplied sink so callers (and tests)
/// can capture it; diagnostics go to stderr.
pub struct Pipeline {
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new() -> Self {
        Pipeline {
            options: PipelineOptions::default(),
        }
    }

    pub fn with_options(options: PipelineOptions) -> Self {
        Pipeline { options }
    }

    /// Run the front half of the pipeline. Stages gate on the collector:
    /// lexing and parsing errors always stop, resolver errors stop unless
    /// lenient mode is on, and code generation errors stop the result
    /// from being handed to the VM.
    pub fn compile(&self, source: &str, diags: &mut Diagnostics) -> Option<Chunk> {
        let mut lexer = Lexer::new(source);
        let tokens = lexer.tokenize(diags);
        if diags.has_errors() {
            return None;
        }

        let mut parser = Parser::new(tokens, diags);
        let program = parser.parse();
        if diags.has_errors() {
            return None;
        }

        Resolver::new(diags).check(&program);
        if diags.has_errors() && !self.options.lenient {
            return None;
        }

        let errors_before = diags.error_count();
        let chunk = Compiler::new(diags).compile(&program);
        if diags.error_count() > errors_before {
            return None;
        }

        Some(chunk)
    }

    /// Verify and execute a compiled chunk. Returns the process exit
    /// code: the VM's on completion, 1 on verification failure.
    pub fn execute(&self, chunk: &Chunk, filename: &str, out: &mut dyn Write) -> i32 {
        if let Err(e) = verify_chunk(chunk) {
            eprintln!("{}", e);
            return 1;
        }

        let config = self.options.vm_config.clone().unwrap_or_default();
        let mut vm = Vm::with_config(chunk, out, config);
        vm.set_file(filename);
        vm.run()
    }

    /// Compile and execute `source`, printing accumulated diagnostics to
    /// stderr. Returns the process exit code.
    pub fn run(&self, source: &str, filename: &str, out: &mut dyn Write) -> i32 {
        let mut diags = Diagnostics::new();
        let chunk = self.compile(source, &mut diags);

        if !diags.entries().is_empty() {
            diags.print_all(filename);
        }

        match chunk {
            Some(chunk) => self.execute(&chunk, filename, out),
            None => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> (i32, String) {
        let mut out: Vec<u8> = Vec::new();
        let code = Pipeline::new().run(source, "test.cnd", &mut out);
        (code, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_pipeline_runs_a_program() {
        let (code, out) = run("print(2 + 3);");
        assert_eq!(code, 0);
        assert_eq!(out, "5\n");
    }

    #[test]
    fn test_parse_error_exits_one() {
        let (code, out) = run("Let = ;");
        assert_eq!(code, 1);
        assert!(out.is_empty());
    }

    #[test]
    fn test_type_error_stops_strict_pipeline() {
        let (code, out) = run("print(ghost);");
        assert_eq!(code, 1);
        assert!(out.is_empty());
    }

    #[test]
    fn test_lenient_mode_runs_past_type_errors() {
        let mut out: Vec<u8> = Vec::new();
        let pipeline = Pipeline::with_options(PipelineOptions {
            lenient: true,
            vm_config: None,
        });
        // Resolver errors are tolerated; the code generator still
        // refuses to hand an unknown call to the VM.
        let code = pipeline.run("nope();", "test.cnd", &mut out);
        assert_eq!(code, 1);

        // A program whose only complaint is from the resolver runs.
        let mut out: Vec<u8> = Vec::new();
        let code = pipeline.run(
            "func Int f(a:Int){ return a; } f(1, 2);",
            "test.cnd",
            &mut out,
        );
        assert_eq!(code, 0);
    }

    #[test]
    fn test_warnings_do_not_stop_the_pipeline() {
        let (code, _) = run("func void f(){ return 1; } func void main(){ f(); }");
        assert_eq!(code, 0);
    }
}
