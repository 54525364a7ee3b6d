mod bytecode;
mod error;
mod lexer;
mod parser;
mod shunt;
mod source;
mod token;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use bytecode::disasm;
use bytecode::module::Registry;
use source::SourceFile;

const USAGE: &str = "usage: chdlc [--tokens] [--disasm] [--emit] <file.chdl>";

struct Options {
    tokens: bool,
    disasm: bool,
    emit: bool,
    input: PathBuf,
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut tokens = false;
    let mut disasm = false;
    let mut emit = false;
    let mut input: Option<String> = None;

    for arg in &args {
        match arg.as_str() {
            "--tokens" => tokens = true,
            "--disasm" => disasm = true,
            "--emit" => emit = true,
            _ if arg.starts_with('-') => {
                eprintln!("unknown flag `{}'", arg);
                eprintln!("{}", USAGE);
                return ExitCode::from(2);
            }
            _ => {
                if input.is_some() {
                    eprintln!("{}", USAGE);
                    return ExitCode::from(2);
                }
                input = Some(arg.clone());
            }
        }
    }

    let Some(input) = input else {
        eprintln!("{}", USAGE);
        return ExitCode::from(2);
    };

    run(&Options {
        tokens,
        disasm,
        emit,
        input: ensure_extension(&input),
    })
}

/// Bare file names get the source extension appended.
fn ensure_extension(name: &str) -> PathBuf {
    let path = PathBuf::from(name);
    if path.extension().is_none() {
        path.with_extension("chdl")
    } else {
        path
    }
}

fn run(opts: &Options) -> ExitCode {
    let src = match SourceFile::read(&opts.input) {
        Ok(src) => src,
        Err(err) => {
            eprintln!("cannot open file '{}': {}", opts.input.display(), err);
            return ExitCode::FAILURE;
        }
    };

    if opts.tokens {
        return dump_tokens(&src);
    }

    let mut registry = Registry::new();
    if let Err(err) = parser::compile_file(&src, &mut registry) {
        print!("{}", err.render(&src));
        return ExitCode::FAILURE;
    }

    // `requires` worklist, to fixed point
    let base_dir = opts
        .input
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    while let Some(pending) = registry.next_unimported() {
        registry.mark_imported(&pending);
        let path = base_dir.join(&pending);
        let imported = match SourceFile::read(&path) {
            Ok(imported) => imported,
            Err(err) => {
                eprintln!("cannot open required file '{}': {}", path.display(), err);
                return ExitCode::FAILURE;
            }
        };
        if let Err(err) = parser::compile_file(&imported, &mut registry) {
            print!("{}", err.render(&imported));
            return ExitCode::FAILURE;
        }
    }

    if opts.disasm {
        for (name, module) in &registry.modules {
            println!("module {}:", name);
            print!("{}", disasm::disassemble_to_string(module));
        }
    }

    if opts.emit {
        let bytes = match postcard::to_allocvec(&registry) {
            Ok(bytes) => bytes,
            Err(err) => {
                eprintln!("serialization failed: {}", err);
                return ExitCode::FAILURE;
            }
        };
        let out_path = opts.input.with_extension("chdlb");
        if let Err(err) = std::fs::write(&out_path, bytes) {
            eprintln!("cannot write '{}': {}", out_path.display(), err);
            return ExitCode::FAILURE;
        }
    }

    println!("processing of '{}' successful", opts.input.display());
    ExitCode::SUCCESS
}

fn dump_tokens(src: &SourceFile) -> ExitCode {
    let tokens = match lexer::tokenize(src) {
        Ok(tokens) => tokens,
        Err(err) => {
            print!("{}", err.render(src));
            return ExitCode::FAILURE;
        }
    };
    for tok in &tokens {
        let (line, col) = src.line_col(tok.start);
        println!("{:4}:{:<3} {:<16} {}", line, col, tok.kind.to_string(), tok.value(src));
    }
    ExitCode::SUCCESS
}
