//! Driver configuration.

use covenant_compiler::RevertStrings;

/// Options fixed for the lifetime of a [`Compiler`](crate::Compiler).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompilerOptions {
    revert_strings: RevertStrings,
    standard_sources: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            revert_strings: RevertStrings::Default,
            standard_sources: true,
        }
    }
}

impl CompilerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// How revert reasons end up in the generated code.
    pub fn with_revert_strings(mut self, revert_strings: RevertStrings) -> Self {
        self.revert_strings = revert_strings;
        self
    }

    /// Whether a full reset registers the standard library units.
    pub fn with_standard_sources(mut self, standard_sources: bool) -> Self {
        self.standard_sources = standard_sources;
        self
    }

    pub fn revert_strings(&self) -> RevertStrings {
        self.revert_strings
    }

    pub fn standard_sources(&self) -> bool {
        self.standard_sources
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let options = CompilerOptions::new()
            .with_revert_strings(RevertStrings::Strip)
            .with_standard_sources(false);
        assert_eq!(options.revert_strings(), RevertStrings::Strip);
        assert!(!options.standard_sources());
        assert!(CompilerOptions::default().standard_sources());
    }
}
