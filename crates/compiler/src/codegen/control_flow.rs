//! Control-flow lowering
//!
//! Each construct mints a fresh label ordinal and wires its jumps around
//! the recursively generated bodies. `break` and `continue` resolve
//! against the innermost enclosing ordinal, saved and restored across
//! nesting; `goto` labels are scoped per function by prefixing the
//! function name.

use super::CodeGenError;
use super::state::CodeGen;
use crate::ast::Node;
use std::fmt::Write as _;

impl CodeGen {
    pub(super) fn gen_return(&mut self, expr: Option<&Node>) -> Result<(), CodeGenError> {
        if let Some(e) = expr {
            self.gen_node(e)?;
            writeln!(&mut self.output, "  pop rax")?;
        }
        writeln!(&mut self.output, "  jmp .L.return.{}", self.funcname)?;
        Ok(())
    }

    pub(super) fn gen_if(
        &mut self,
        cond: &Node,
        then: &Node,
        els: Option<&Node>,
    ) -> Result<(), CodeGenError> {
        let seq = self.next_label();
        self.gen_node(cond)?;
        writeln!(&mut self.output, "  pop rax")?;
        writeln!(&mut self.output, "  cmp rax, 0")?;

        match els {
            Some(els) => {
                writeln!(&mut self.output, "  je .L.else.{}", seq)?;
                self.gen_node(then)?;
                writeln!(&mut self.output, "  jmp .L.end.{}", seq)?;
                writeln!(&mut self.output, ".L.else.{}:", seq)?;
                self.gen_node(els)?;
                writeln!(&mut self.output, ".L.end.{}:", seq)?;
            }
            None => {
                writeln!(&mut self.output, "  je .L.end.{}", seq)?;
                self.gen_node(then)?;
                writeln!(&mut self.output, ".L.end.{}:", seq)?;
            }
        }
        Ok(())
    }

    pub(super) fn gen_while(&mut self, cond: &Node, then: &Node) -> Result<(), CodeGenError> {
        let seq = self.next_label();
        let brk = self.brkseq.replace(seq);
        let cont = self.contseq.replace(seq);

        // The continue label doubles as the loop head.
        writeln!(&mut self.output, ".L.continue.{}:", seq)?;
        self.gen_node(cond)?;
        writeln!(&mut self.output, "  pop rax")?;
        writeln!(&mut self.output, "  cmp rax, 0")?;
        writeln!(&mut self.output, "  je .L.break.{}", seq)?;
        self.gen_node(then)?;
        writeln!(&mut self.output, "  jmp .L.continue.{}", seq)?;
        writeln!(&mut self.output, ".L.break.{}:", seq)?;

        self.brkseq = brk;
        self.contseq = cont;
        Ok(())
    }

    pub(super) fn gen_do(&mut self, then: &Node, cond: &Node) -> Result<(), CodeGenError> {
        let seq = self.next_label();
        let brk = self.brkseq.replace(seq);
        let cont = self.contseq.replace(seq);

        writeln!(&mut self.output, ".L.begin.{}:", seq)?;
        self.gen_node(then)?;
        writeln!(&mut self.output, ".L.continue.{}:", seq)?;
        self.gen_node(cond)?;
        writeln!(&mut self.output, "  pop rax")?;
        writeln!(&mut self.output, "  cmp rax, 0")?;
        writeln!(&mut self.output, "  jne .L.begin.{}", seq)?;
        writeln!(&mut self.output, ".L.break.{}:", seq)?;

        self.brkseq = brk;
        self.contseq = cont;
        Ok(())
    }

    pub(super) fn gen_for(
        &mut self,
        init: Option<&Node>,
        cond: Option<&Node>,
        inc: Option<&Node>,
        then: &Node,
    ) -> Result<(), CodeGenError> {
        let seq = self.next_label();
        let brk = self.brkseq.replace(seq);
        let cont = self.contseq.replace(seq);

        if let Some(init) = init {
            self.gen_node(init)?;
        }
        writeln!(&mut self.output, ".L.begin.{}:", seq)?;
        if let Some(cond) = cond {
            self.gen_node(cond)?;
            writeln!(&mut self.output, "  pop rax")?;
            writeln!(&mut self.output, "  cmp rax, 0")?;
            writeln!(&mut self.output, "  je .L.break.{}", seq)?;
        }
        self.gen_node(then)?;
        writeln!(&mut self.output, ".L.continue.{}:", seq)?;
        if let Some(inc) = inc {
            self.gen_node(inc)?;
        }
        writeln!(&mut self.output, "  jmp .L.begin.{}", seq)?;
        writeln!(&mut self.output, ".L.break.{}:", seq)?;

        self.brkseq = brk;
        self.contseq = cont;
        Ok(())
    }

    /// Switch lowers to a compare-and-jump chain over the collected case
    /// values, a default jump (or a jump past the body), then the body with
    /// its `.L.case.N` landing pads. `break` binds to `.L.break.N` of the
    /// switch; `continue` stays with the enclosing loop.
    pub(super) fn gen_switch(
        &mut self,
        cond: &Node,
        body: &Node,
        cases: &[(usize, i64)],
        default_id: Option<usize>,
    ) -> Result<(), CodeGenError> {
        let seq = self.next_label();
        let brk = self.brkseq.replace(seq);

        self.gen_node(cond)?;
        writeln!(&mut self.output, "  pop rax")?;

        for (id, val) in cases {
            if *val == (*val as i32) as i64 {
                writeln!(&mut self.output, "  cmp rax, {}", val)?;
            } else {
                writeln!(&mut self.output, "  movabs rdi, {}", val)?;
                writeln!(&mut self.output, "  cmp rax, rdi")?;
            }
            writeln!(&mut self.output, "  je .L.case.{}", id)?;
        }

        match default_id {
            Some(id) => writeln!(&mut self.output, "  jmp .L.case.{}", id)?,
            None => writeln!(&mut self.output, "  jmp .L.break.{}", seq)?,
        }

        self.gen_node(body)?;
        writeln!(&mut self.output, ".L.break.{}:", seq)?;

        self.brkseq = brk;
        Ok(())
    }

    pub(super) fn gen_break(&mut self, loc: usize) -> Result<(), CodeGenError> {
        match self.brkseq {
            Some(seq) => {
                writeln!(&mut self.output, "  jmp .L.break.{}", seq)?;
                Ok(())
            }
            None => Err(self.error_at(loc, "stray break")),
        }
    }

    pub(super) fn gen_continue(&mut self, loc: usize) -> Result<(), CodeGenError> {
        match self.contseq {
            Some(seq) => {
                writeln!(&mut self.output, "  jmp .L.continue.{}", seq)?;
                Ok(())
            }
            None => Err(self.error_at(loc, "stray continue")),
        }
    }
}
