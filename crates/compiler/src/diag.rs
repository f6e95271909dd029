//! Source-located diagnostics
//!
//! Every compilation stage reports errors as fully rendered strings so the
//! driver can print them and exit without threading position state around.
//! The rendering format is:
//!
//! ```text
//! foo.c:3: return x +;
//!                    ^ expected expression
//! ```
//!
//! The caret sits under the offending byte; the `filename:line:` prefix is
//! counted into the caret column so the two lines stay aligned.

use std::rc::Rc;

/// The source buffer for one compilation, shared by every stage.
///
/// Tokens and AST nodes carry byte offsets into `src`; nothing is copied out
/// of the buffer except decoded string-literal contents.
#[derive(Debug)]
pub struct SourceMap {
    pub filename: String,
    pub src: String,
}

impl SourceMap {
    /// Create a source map. The lexer requires every line to be terminated,
    /// so a missing final newline is appended here.
    pub fn new(filename: &str, src: &str) -> Rc<SourceMap> {
        let mut src = src.to_string();
        if !src.ends_with('\n') {
            src.push('\n');
        }
        Rc::new(SourceMap {
            filename: filename.to_string(),
            src,
        })
    }

    /// Render a diagnostic pointing at byte offset `loc`.
    pub fn error_at(&self, loc: usize, msg: &str) -> String {
        let loc = loc.min(self.src.len().saturating_sub(1));
        let bytes = self.src.as_bytes();

        let mut line_start = loc;
        while line_start > 0 && bytes[line_start - 1] != b'\n' {
            line_start -= 1;
        }
        let mut line_end = loc;
        while line_end < bytes.len() && bytes[line_end] != b'\n' {
            line_end += 1;
        }

        let line_num = self.src[..line_start].matches('\n').count() + 1;
        let line_text = &self.src[line_start..line_end];

        let prefix = format!("{}:{}: ", self.filename, line_num);
        let caret_col = prefix.len() + (loc - line_start);
        format!("{}{}\n{}^ {}", prefix, line_text, " ".repeat(caret_col), msg)
    }

    /// 1-indexed line number of a byte offset. Used by the assembly
    /// source-comment annotator.
    pub fn line_number(&self, loc: usize) -> usize {
        let loc = loc.min(self.src.len());
        self.src[..loc].matches('\n').count() + 1
    }

    /// The full text of the line containing `loc`, without the newline.
    pub fn line_text(&self, loc: usize) -> &str {
        let loc = loc.min(self.src.len().saturating_sub(1));
        let bytes = self.src.as_bytes();
        let mut start = loc;
        while start > 0 && bytes[start - 1] != b'\n' {
            start -= 1;
        }
        let mut end = loc;
        while end < bytes.len() && bytes[end] != b'\n' {
            end += 1;
        }
        &self.src[start..end]
    }

    /// Column (0-indexed) of `loc` within its line.
    pub fn column(&self, loc: usize) -> usize {
        let loc = loc.min(self.src.len().saturating_sub(1));
        let bytes = self.src.as_bytes();
        let mut start = loc;
        while start > 0 && bytes[start - 1] != b'\n' {
            start -= 1;
        }
        loc - start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appends_missing_newline() {
        let src = SourceMap::new("t.c", "int main() { return 0; }");
        assert!(src.src.ends_with('\n'));
    }

    #[test]
    fn test_error_at_points_at_column() {
        let src = SourceMap::new("t.c", "int x;\nint y = ;\n");
        // offset of the ';' after '='
        let loc = src.src.find("= ;").unwrap() + 2;
        let msg = src.error_at(loc, "expected expression");
        assert!(msg.starts_with("t.c:2: int y = ;"));
        let caret_line = msg.lines().nth(1).unwrap();
        assert!(caret_line.ends_with("^ expected expression"));
        // caret under the ';': prefix "t.c:2: " is 7 chars, ';' is column 8
        assert_eq!(caret_line.find('^').unwrap(), 7 + 8);
    }

    #[test]
    fn test_line_number() {
        let src = SourceMap::new("t.c", "a\nb\nc\n");
        assert_eq!(src.line_number(0), 1);
        assert_eq!(src.line_number(2), 2);
        assert_eq!(src.line_number(4), 3);
    }
}
