/// Controls how API documents are parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseConfig {
    /// When true, unknown fields in the document are rejected.
    pub strict_mode: bool,
    /// Maximum accepted document size in bytes.
    pub max_document_size: usize,
    /// Maximum number of action descriptors in one document.
    pub max_actions: usize,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            strict_mode: false,
            max_document_size: 4 * 1024 * 1024,
            max_actions: 4096,
        }
    }
}

impl ParseConfig {
    pub fn with_strict_mode(mut self, strict: bool) -> Self {
        self.strict_mode = strict;
        self
    }

    pub fn with_max_document_size(mut self, max: usize) -> Self {
        self.max_document_size = max;
        self
    }

    pub fn with_max_actions(mut self, max: usize) -> Self {
        self.max_actions = max;
        self
    }
}
