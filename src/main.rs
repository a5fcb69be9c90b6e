use std::io;
use std::path::Path;
use std::time::Instant;

use cinder::bytecode::disasm::print_chunk;
use cinder::diagnostics::Diagnostics;
use cinder::frontend::lexer::Lexer;
use cinder::frontend::parser::Parser;
use cinder::frontend::token_dumper::TokenDumper;
use cinder::{Pipeline, PipelineOptions};

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let show_time = args.contains(&"--time".to_string());
    let lenient = args.contains(&"--lenient".to_string());
    let tokens_only = args.contains(&"--tokens".to_string());
    let no_color = args.contains(&"--no-color".to_string());
    let pretty = args.contains(&"--pretty".to_string());
    let ast = args.contains(&"--ast".to_string());
    let bytecode = args.contains(&"--bc".to_string()) || args.contains(&"--bytecode".to_string());

    // first non-flag argument is the filename
    let filename = match args.iter().skip(1).find(|a| !a.starts_with('-')) {
        Some(f) => f.clone(),
        None => {
            print_usage();
            std::process::exit(1);
        }
    };

    ensure_extension(&filename);

    let source = match std::fs::read_to_string(&filename) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("ERROR: could not read '{}': {}", filename, e);
            std::process::exit(1);
        }
    };

    if tokens_only {
        dump_tokens(&source, &filename, no_color, pretty);
        return;
    }

    if ast {
        dump_ast(&source, &filename);
        return;
    }

    let pipeline = Pipeline::with_options(PipelineOptions {
        lenient,
        vm_config: None,
    });

    let mut diags = Diagnostics::new();
    let chunk = pipeline.compile(&source, &mut diags);
    if !diags.entries().is_empty() {
        diags.print_all(&filename);
    }
    let chunk = match chunk {
        Some(chunk) => chunk,
        None => std::process::exit(1),
    };

    if bytecode {
        print_chunk(&chunk);
    }

    let started = Instant::now();
    let mut stdout = io::stdout();
    let exit_code = pipeline.execute(&chunk, &filename, &mut stdout);

    if show_time {
        report_time(started.elapsed().as_secs_f64());
    }

    std::process::exit(exit_code);
}

fn ensure_extension(filename: &str) {
    let path = Path::new(filename);
    if path.extension().and_then(|e| e.to_str()) != Some("cnd") {
        eprintln!("ERROR: expected a .cnd file, got {}", filename);
        std::process::exit(1);
    }
}

fn print_usage() {
    println!("CINDER - bytecode interpreter for the Cinder language");
    println!();
    println!("Usage:");
    println!("  cinder <file.cnd>            Run a program");
    println!("  cinder --time <file.cnd>     Also report execution time on stderr");
    println!("  cinder --lenient <file.cnd>  Run even when the type checker complains");
    println!("  cinder --tokens <file.cnd>   Show the token stream only");
    println!("  cinder --ast <file.cnd>      Show the syntax tree only");
    println!("  cinder --bc <file.cnd>       Print the bytecode before running");
}

fn dump_tokens(source: &str, filename: &str, no_color: bool, pretty: bool) {
    let mut diags = Diagnostics::new();
    let mut lexer = Lexer::new(source);
    let tokens = lexer.tokenize(&mut diags);

    let mut dumper = TokenDumper::new();
    if no_color {
        dumper = dumper.no_color();
    }
    if pretty {
        dumper = dumper.pretty();
    }
    dumper.dump(&tokens);

    if diags.has_errors() {
        diags.print_all(filename);
        std::process::exit(1);
    }
}

fn dump_ast(source: &str, filename: &str) {
    let mut diags = Diagnostics::new();
    let mut lexer = Lexer::new(source);
    let tokens = lexer.tokenize(&mut diags);
    let mut parser = Parser::new(tokens, &mut diags);
    let program = parser.parse();

    println!("{:#?}", program);

    if diags.has_errors() {
        diags.print_all(filename);
        std::process::exit(1);
    }
}

/// Report elapsed execution time in µs, ms or s depending on magnitude.
fn report_time(elapsed: f64) {
    if elapsed < 1e-3 {
        eprintln!("\n[time] {:.3} µs", elapsed * 1e6);
    } else if elapsed < 1.0 {
        eprintln!("\n[time] {:.3} ms", elapsed * 1e3);
    } else {
        eprintln!("\n[time] {:.6} s", elapsed);
    }
}
