//! minicc compiler library
//!
//! A single-pass compiler for a C subset. One preprocessed source file in,
//! one x86-64 assembly file (GNU assembler, Intel syntax, System V AMD64
//! ABI) out; an external assembler and linker take it from there.
//!
//! The pipeline is strictly linear with no intermediate representation
//! beyond the typed AST:
//!
//! ```text
//! bytes -> tokens -> AST -> decorated AST -> assembly text
//! ```
//!
//! Stages report errors as fully rendered `String` diagnostics pointing at
//! the offending source line; the first error aborts the compilation.
//!
//! ```rust
//! use minicc::CompilerConfig;
//!
//! let asm = minicc::compile(
//!     "int main() { return 42; }",
//!     "answer.c",
//!     &CompilerConfig::default(),
//! )
//! .unwrap();
//! assert!(asm.contains(".globl main"));
//! ```

pub mod ast;
pub mod ast_print;
pub mod codegen;
pub mod config;
pub mod diag;
pub mod lexer;
pub mod parser;
pub mod typechecker;
pub mod types;

pub use codegen::{CodeGen, CodeGenError};
pub use config::CompilerConfig;
pub use diag::SourceMap;
pub use parser::Parser;

use ast::Program;
use std::fs;
use std::io::Write as _;
use std::path::Path;
use std::rc::Rc;
use tracing::debug;

/// Compile one source buffer to assembly text.
pub fn compile(source: &str, filename: &str, config: &CompilerConfig) -> Result<String, String> {
    let src = SourceMap::new(filename, source);

    let tokens = lexer::tokenize(&src)?;
    debug!(tokens = tokens.len(), "tokenized");

    let mut parser = Parser::new(tokens, Rc::clone(&src));
    let mut prog = parser.parse()?;
    debug!(
        functions = prog.fns.len(),
        globals = prog.globals.len(),
        "parsed"
    );

    typechecker::add_type(&mut prog, &src)?;

    if config.dump_ast {
        ast_print::print_program(&prog);
    }

    assign_lvar_offsets(&mut prog, &src)?;

    let mut codegen = CodeGen::new(Rc::clone(&src), config);
    codegen.codegen_program(&prog).map_err(|e| e.to_string())
}

/// Lay out each function's frame: every local gets the next slot below the
/// previous one, and the total is padded to 8 bytes.
fn assign_lvar_offsets(prog: &mut Program, src: &Rc<SourceMap>) -> Result<(), String> {
    for f in &mut prog.fns {
        let mut offset = 0;
        for var in &f.locals {
            let (ty, loc) = {
                let v = var.borrow();
                (Rc::clone(&v.ty), v.loc)
            };
            let size = types::size_of(&ty).map_err(|e| src.error_at(loc, &e))?;
            offset += size;
            var.borrow_mut().offset = offset;
        }
        f.stack_size = types::align_to(offset, 8);
        debug!(function = %f.name, stack_size = f.stack_size, "laid out locals");
    }
    Ok(())
}

/// Compile a source file, writing assembly to `output` or to stdout.
pub fn compile_file(
    input: &Path,
    output: Option<&Path>,
    config: &CompilerConfig,
) -> Result<(), String> {
    let source = fs::read_to_string(input)
        .map_err(|e| format!("cannot open {}: {}", input.display(), e))?;
    let filename = input.to_string_lossy();

    let asm = compile(&source, &filename, config)?;

    match output {
        Some(path) => fs::write(path, asm)
            .map_err(|e| format!("cannot write {}: {}", path.display(), e))?,
        None => std::io::stdout()
            .write_all(asm.as_bytes())
            .map_err(|e| format!("cannot write to stdout: {}", e))?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compilation_is_deterministic() {
        let source = "int g = 3; \
                      int add(int a, int b) { return a + b; } \
                      int main() { int x = add(g, 4); return x; }";
        let a = compile(source, "t.c", &CompilerConfig::default()).unwrap();
        let b = compile(source, "t.c", &CompilerConfig::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_missing_trailing_newline_is_tolerated() {
        let asm = compile("int main() { return 0; }", "t.c", &CompilerConfig::default());
        assert!(asm.is_ok());
    }

    #[test]
    fn test_stack_layout_accumulates_sizes() {
        let source = "int main() { char c; int i; long l; return 0; }";
        let asm = compile(source, "t.c", &CompilerConfig::default()).unwrap();
        // 1 + 4 + 8 = 13, padded to 16
        assert!(asm.contains("  sub rsp, 16\n"));
    }

    #[test]
    fn test_error_reports_filename_and_line() {
        let err = compile(
            "int main() {\n  return x;\n}\n",
            "prog.c",
            &CompilerConfig::default(),
        )
        .unwrap_err();
        assert!(err.starts_with("prog.c:2:"));
        assert!(err.contains("undefined variable"));
    }
}
