//! Compiler configuration
//!
//! Options that change what the pipeline emits beside the assembly itself.
//! Threaded by reference through [`crate::compile`].

/// Configuration for one compilation.
#[derive(Debug, Clone, Default)]
pub struct CompilerConfig {
    /// Print the decorated AST to stderr after the typing pass.
    pub dump_ast: bool,
    /// Interleave `# file:line:` comments with the emitted assembly so the
    /// output can be read next to the source.
    pub source_comments: bool,
}

impl CompilerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dump_ast(mut self, dump_ast: bool) -> Self {
        self.dump_ast = dump_ast;
        self
    }

    pub fn with_source_comments(mut self, source_comments: bool) -> Self {
        self.source_comments = source_comments;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = CompilerConfig::new()
            .with_dump_ast(true)
            .with_source_comments(true);
        assert!(config.dump_ast);
        assert!(config.source_comments);

        let config = CompilerConfig::default();
        assert!(!config.dump_ast);
        assert!(!config.source_comments);
    }
}
