//! Source location tracking for error reporting.
//!
//! A [`Span`] is a half-open byte range into one source unit. Together with
//! the unit name it forms a [`SourceLocation`], which is what diagnostics
//! carry. [`line_column`] turns a byte offset back into a 1-based
//! line/column pair.

use std::fmt;

/// A half-open byte range `[start, end)` into a source text.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Span {
    /// Byte offset of the first character.
    pub start: u32,
    /// Byte offset one past the last character.
    pub end: u32,
}

impl Span {
    /// Create a new span from a start and end offset.
    #[inline]
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Create a zero-length span at an offset.
    #[inline]
    pub fn point(offset: u32) -> Self {
        Self {
            start: offset,
            end: offset,
        }
    }

    /// Whether this span is empty (zero length).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// The length of this span in bytes.
    #[inline]
    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    /// Smallest span covering both `self` and `other`.
    #[inline]
    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// A span inside a named source unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SourceLocation {
    /// Name of the source unit, as registered with the driver.
    pub source: String,
    /// Byte range inside that unit.
    pub span: Span,
}

impl SourceLocation {
    pub fn new(source: impl Into<String>, span: Span) -> Self {
        Self {
            source: source.into(),
            span,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.span)
    }
}

/// A 1-based line and column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LineColumn {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for LineColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Translate a byte offset into a 1-based line/column pair.
///
/// Offsets past the end of `text` clamp to the position just after the last
/// character. Columns count bytes, matching the lexer.
pub fn line_column(text: &str, offset: u32) -> LineColumn {
    let offset = (offset as usize).min(text.len());
    let before = &text.as_bytes()[..offset];
    let line = before.iter().filter(|&&b| b == b'\n').count() as u32 + 1;
    let line_start = before
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |pos| pos + 1);
    LineColumn {
        line,
        column: (offset - line_start) as u32 + 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn span_merge() {
        let merged = Span::new(4, 8).merge(Span::new(2, 5));
        assert_eq!(merged, Span::new(2, 8));
        assert_eq!(merged.len(), 6);
    }

    #[test]
    fn point_is_empty() {
        assert!(Span::point(3).is_empty());
        assert!(!Span::new(3, 4).is_empty());
    }

    #[test]
    fn line_column_first_line() {
        assert_eq!(
            line_column("contract A {}", 0),
            LineColumn { line: 1, column: 1 }
        );
        let position = line_column("contract A {}", 9);
        assert_eq!((position.line, position.column), (1, 10));
    }

    #[test]
    fn line_column_after_newlines() {
        let text = "import \"b\";\ncontract A {\n  uint x;\n}";
        // 'u' of "uint"
        let offset = text.find("uint").unwrap() as u32;
        assert_eq!(line_column(text, offset), LineColumn { line: 3, column: 3 });
    }

    #[test]
    fn line_column_clamps() {
        assert_eq!(line_column("ab\n", 100), LineColumn { line: 2, column: 1 });
    }

    #[test]
    fn location_display() {
        let loc = SourceLocation::new("a.cov", Span::new(1, 3));
        assert_eq!(loc.to_string(), "a.cov:1..3");
    }

    proptest! {
        #[test]
        fn line_matches_newline_count(text in "[a-z\\n]{0,64}", offset in 0u32..80) {
            let lc = line_column(&text, offset);
            let clamped = (offset as usize).min(text.len());
            let newlines = text[..clamped].matches('\n').count() as u32;
            prop_assert_eq!(lc.line, newlines + 1);
            prop_assert!(lc.column >= 1);
        }
    }
}
