//! Common definitions that are shared between different parts of the compiler.

// Use sorted sets and maps for consistent output
pub use std::collections::{BTreeMap as Map, BTreeSet as Set};

use derive_more::Display;

/// Identifiers.  Interned so that every pass after resolution can compare and
/// copy them for the cost of a pointer.
pub type Id = internment::Intern<String>;

/// Construct an interned identifier from anything that can be turned into a
/// `String`.  A thin convenience over `Intern::new` used at every naming site.
pub fn id(s: impl Into<String>) -> Id {
    internment::Intern::new(s.into())
}

/// A byte offset into the preprocessed source, attached to tokens and AST
/// nodes so that diagnostics can be rendered with a line/column pair.
pub type SourceOffset = usize;

/// One collected error: a message plus the offset of the input that caused it.
///
/// Errors are values, never exceptions: every pass that can fail appends to a
/// `Diagnostics` vector and keeps walking its own tree so that a single
/// invocation surfaces every problem it can find, not just the first one.
#[derive(Clone, Debug, Display)]
#[display("{message}")]
pub struct Diagnostic {
    pub message: String,
    pub offset: SourceOffset,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>, offset: SourceOffset) -> Self {
        Diagnostic { message: message.into(), offset }
    }

    /// Render in the `<message> line: <n> column: <m>` form mandated for CLI
    /// error output, given the source text the offset was measured against.
    pub fn render(&self, source: &str) -> String {
        let (line, column) = line_column(source, self.offset);
        format!("{} line: {} column: {}", self.message, line, column)
    }
}

/// Turn a byte offset into a 1-based (line, column) pair by scanning the
/// source once. Compilation units are small enough that this is never a
/// bottleneck; no line-start table is precomputed.
pub fn line_column(source: &str, offset: SourceOffset) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;
    for ch in source[..offset.min(source.len())].chars() {
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

/// A per-pass error accumulator.
///
/// Passes push to this as they walk the tree, then call [`Diagnostics::ok`] at
/// the end to decide whether to hand their output to the next stage.  This is
/// the "collect, don't abort" policy used by every front-end and semantic
/// pass; IR generation and later stages instead panic on internal
/// inconsistency, since by that point the program has already been validated.
#[derive(Clone, Debug, Default)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics(Vec::new())
    }

    pub fn push(&mut self, message: impl Into<String>, offset: SourceOffset) {
        self.0.push(Diagnostic::new(message, offset));
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }

    /// Consume `self`, yielding `Ok(value)` if no errors were collected and
    /// `Err(self)` otherwise. Lets a pass write `diags.ok(result)?` style code
    /// at its single exit point instead of checking `is_empty()` by hand.
    pub fn ok<T>(self, value: T) -> Result<T, Diagnostics> {
        if self.0.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }

    pub fn render_all(&self, source: &str) -> Vec<String> {
        self.0.iter().map(|d| d.render(source)).collect()
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Round `value` up to the next multiple of `align` (`align` must be a power
/// of two). Used throughout aggregate layout and stack-slot assignment.
pub fn round_up(value: i64, align: i64) -> i64 {
    debug_assert!(align > 0 && (align & (align - 1)) == 0);
    (value + align - 1) & !(align - 1)
}

/// Round `value` down to the next multiple of `align` (`align` a power of
/// two). Used for negative (below-%rbp) stack offsets, where "down" means
/// "more negative".
pub fn round_down(value: i64, align: i64) -> i64 {
    debug_assert!(align > 0 && (align & (align - 1)) == 0);
    value & !(align - 1)
}

/// A monotonically increasing source of fresh unique names, threaded through
/// a compilation unit rather than kept as process-wide global state.
#[derive(Debug, Default)]
pub struct Counter(u64);

impl Counter {
    pub fn new() -> Self {
        Counter(0)
    }

    pub fn next(&mut self) -> u64 {
        let n = self.0;
        self.0 += 1;
        n
    }

    /// Produce a fresh identifier of the form `<prefix>.<n>`.
    pub fn fresh(&mut self, prefix: &str) -> Id {
        id(format!("{prefix}.{}", self.next()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_up_respects_alignment() {
        assert_eq!(round_up(0, 8), 0);
        assert_eq!(round_up(1, 8), 8);
        assert_eq!(round_up(8, 8), 8);
        assert_eq!(round_up(9, 16), 16);
    }

    #[test]
    fn round_down_respects_alignment() {
        assert_eq!(round_down(-1, 16), -16);
        assert_eq!(round_down(-16, 16), -16);
        assert_eq!(round_down(-17, 16), -32);
    }

    #[test]
    fn counter_is_monotonic_and_unique() {
        let mut c = Counter::new();
        let a = c.fresh("tmp");
        let b = c.fresh("tmp");
        assert_ne!(a, b);
        assert_eq!(&*a, "tmp.0");
        assert_eq!(&*b, "tmp.1");
    }

    #[test]
    fn line_column_counts_from_one() {
        let src = "ab\ncd\nef";
        assert_eq!(line_column(src, 0), (1, 1));
        assert_eq!(line_column(src, 3), (2, 1));
        assert_eq!(line_column(src, 7), (3, 2));
    }

    use proptest::prelude::*;

    fn pow2_align() -> impl Strategy<Value = i64> {
        prop_oneof![Just(1i64), Just(2), Just(4), Just(8), Just(16)]
    }

    proptest! {
        #[test]
        fn round_up_is_a_multiple_of_align_and_never_undershoots(value in 0i64..1_000_000, align in pow2_align()) {
            let r = round_up(value, align);
            prop_assert_eq!(r % align, 0);
            prop_assert!(r >= value);
            prop_assert!(r - value < align);
        }

        #[test]
        fn round_down_is_a_multiple_of_align_and_never_overshoots(value in -1_000_000i64..0, align in pow2_align()) {
            let r = round_down(value, align);
            prop_assert_eq!(r % align, 0);
            prop_assert!(r <= value);
            prop_assert!(value - r < align);
        }
    }
}
