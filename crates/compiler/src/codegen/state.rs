//! CodeGen state and shared emission helpers
//!
//! The CodeGen struct carries what the C-style formulation would keep in
//! globals: the output buffer, the label counter, the innermost
//! break/continue targets, and the name of the function being emitted.
//! Everything else is derived per node.

use super::CodeGenError;
use crate::config::CompilerConfig;
use crate::diag::SourceMap;
use crate::types::{TypeRef, size_of};
use std::fmt::Write as _;
use std::rc::Rc;

/// Argument registers of the System V AMD64 ABI, by operand width.
pub(super) const ARGREG1: [&str; 6] = ["dil", "sil", "dl", "cl", "r8b", "r9b"];
pub(super) const ARGREG2: [&str; 6] = ["di", "si", "dx", "cx", "r8w", "r9w"];
pub(super) const ARGREG4: [&str; 6] = ["edi", "esi", "edx", "ecx", "r8d", "r9d"];
pub(super) const ARGREG8: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];

pub struct CodeGen {
    pub(super) output: String,
    pub(super) src: Rc<SourceMap>,
    pub(super) config: CompilerConfig,

    /// Monotonic ordinal behind every `.L.*.N` label in the unit.
    pub(super) labelseq: usize,
    /// Innermost enclosing loop/switch break target, if any.
    pub(super) brkseq: Option<usize>,
    /// Innermost enclosing loop continue target, if any.
    pub(super) contseq: Option<usize>,
    /// Function currently being emitted; names its return and goto labels.
    pub(super) funcname: String,
    /// Offset of the last token annotated with a source comment, so
    /// consecutive nodes on one token don't repeat it.
    pub(super) last_comment_loc: Option<usize>,
}

impl CodeGen {
    pub fn new(src: Rc<SourceMap>, config: &CompilerConfig) -> CodeGen {
        CodeGen {
            output: String::new(),
            src,
            config: config.clone(),
            labelseq: 0,
            brkseq: None,
            contseq: None,
            funcname: String::new(),
            last_comment_loc: None,
        }
    }

    /// Mint a fresh label ordinal.
    pub(super) fn next_label(&mut self) -> usize {
        self.labelseq += 1;
        self.labelseq
    }

    pub(super) fn error_at(&self, loc: usize, msg: &str) -> CodeGenError {
        CodeGenError::Logic(self.src.error_at(loc, msg))
    }

    pub(super) fn size_of_at(&self, ty: &TypeRef, loc: usize) -> Result<i64, CodeGenError> {
        size_of(ty).map_err(|e| self.error_at(loc, &e))
    }

    /// With `--source-comments`, annotate the output with the source line a
    /// node came from, once per token.
    pub(super) fn emit_source_comment(&mut self, loc: usize) -> Result<(), CodeGenError> {
        if !self.config.source_comments || self.last_comment_loc == Some(loc) {
            return Ok(());
        }
        self.last_comment_loc = Some(loc);

        let prefix = format!(
            "# {}:{}: ",
            self.src.filename,
            self.src.line_number(loc)
        );
        let line = self.src.line_text(loc).to_string();
        let caret_col = prefix.len() - 2 + self.src.column(loc);
        writeln!(&mut self.output, "{}{}", prefix, line)?;
        writeln!(&mut self.output, "# {}^", " ".repeat(caret_col))?;
        Ok(())
    }
}
