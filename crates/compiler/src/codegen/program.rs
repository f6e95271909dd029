//! Program emission
//!
//! Assembles the output file: the `.intel_syntax` header, the `.data`
//! section with every global's label and initializer directives, and the
//! `.text` section with one block per defined function.

use super::CodeGenError;
use super::state::{ARGREG1, ARGREG2, ARGREG4, ARGREG8, CodeGen};
use crate::ast::{Function, InitValue, Program};
use std::fmt::Write as _;

impl CodeGen {
    /// Generate the whole assembly file.
    pub fn codegen_program(&mut self, prog: &Program) -> Result<String, CodeGenError> {
        writeln!(&mut self.output, ".intel_syntax noprefix")?;
        self.emit_data(prog)?;
        self.emit_text(prog)?;
        Ok(std::mem::take(&mut self.output))
    }

    fn emit_data(&mut self, prog: &Program) -> Result<(), CodeGenError> {
        writeln!(&mut self.output, ".data")?;

        for var in &prog.globals {
            let v = var.borrow();
            writeln!(&mut self.output, "{}:", v.name)?;

            // String literal contents, one byte per directive.
            if let Some(contents) = &v.contents {
                for b in contents {
                    writeln!(&mut self.output, "  .byte {}", b)?;
                }
                continue;
            }

            // Explicit initializer chunks.
            if !v.initializer.is_empty() {
                for iv in &v.initializer {
                    match iv {
                        InitValue::Scalar { size, val } => {
                            let directive = match size {
                                1 => ".byte",
                                2 => ".word",
                                4 => ".long",
                                _ => ".quad",
                            };
                            writeln!(&mut self.output, "  {} {}", directive, val)?;
                        }
                        InitValue::Label(label) => {
                            writeln!(&mut self.output, "  .quad {}", label)?;
                        }
                        InitValue::Zero(n) => {
                            writeln!(&mut self.output, "  .zero {}", n)?;
                        }
                    }
                }
                continue;
            }

            // Uninitialized storage is zero at load.
            let size = self.size_of_at(&v.ty, v.loc)?;
            writeln!(&mut self.output, "  .zero {}", size)?;
        }
        Ok(())
    }

    fn emit_text(&mut self, prog: &Program) -> Result<(), CodeGenError> {
        writeln!(&mut self.output, ".text")?;
        for f in &prog.fns {
            self.emit_function(f)?;
        }
        Ok(())
    }

    fn emit_function(&mut self, f: &Function) -> Result<(), CodeGenError> {
        self.funcname = f.name.clone();
        self.last_comment_loc = None;

        if !f.is_static {
            writeln!(&mut self.output, ".globl {}", f.name)?;
        }
        writeln!(&mut self.output, "{}:", f.name)?;

        // Prologue.
        writeln!(&mut self.output, "  push rbp")?;
        writeln!(&mut self.output, "  mov rbp, rsp")?;
        writeln!(&mut self.output, "  sub rsp, {}", f.stack_size)?;

        // Spill incoming register arguments into their stack slots, with
        // the register width matching the parameter type.
        for (i, param) in f.params.iter().enumerate() {
            let v = param.borrow();
            let reg = match self.size_of_at(&v.ty, v.loc)? {
                1 => ARGREG1[i],
                2 => ARGREG2[i],
                4 => ARGREG4[i],
                _ => ARGREG8[i],
            };
            writeln!(&mut self.output, "  mov [rbp-{}], {}", v.offset, reg)?;
        }

        for node in &f.body {
            self.gen_node(node)?;
        }

        // Epilogue; return statements jump here with the value in rax.
        writeln!(&mut self.output, ".L.return.{}:", f.name)?;
        writeln!(&mut self.output, "  mov rsp, rbp")?;
        writeln!(&mut self.output, "  pop rbp")?;
        writeln!(&mut self.output, "  ret")?;
        Ok(())
    }
}
