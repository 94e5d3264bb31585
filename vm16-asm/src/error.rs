//! Linker diagnostics (spec §7, "assembler/linker diagnostics": undefined
//! symbols, multiple definitions... reported and accumulated").
//!
//! Grounded on `cranelift-reader/src/error.rs`'s `Location`/`ParseError`
//! pair: a small `Copy` location type paired with a `Display`-implementing
//! error struct, accumulated into a `Vec` rather than short-circuiting on
//! the first failure — matching the original linker's own `report_error`,
//! which flags `got_errors` and keeps going instead of aborting.

use std::fmt;

/// Where a linker diagnostic applies: the word position in the final,
/// concatenated image that triggered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Location {
    /// Word position in the linked output.
    pub position: usize,
}

/// One linker diagnostic.
#[derive(Debug, Clone)]
pub struct LinkError {
    /// Where the problem was found.
    pub location: Location,
    /// Human-readable description.
    pub message: String,
}

impl LinkError {
    /// Creates a new diagnostic at `position`.
    pub fn new(position: usize, message: impl Into<String>) -> LinkError {
        LinkError {
            location: Location { position },
            message: message.into(),
        }
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "word {}: {}", self.location.position, self.message)
    }
}

/// Every diagnostic accumulated over a link. Non-empty means the link
/// failed (spec §7: "a non-zero exit code is produced if any occurred").
#[derive(Debug, Clone, Default)]
pub struct LinkErrors(
    /// The diagnostics accumulated, in the order they were recorded.
    pub Vec<LinkError>,
);

impl LinkErrors {
    /// Whether any diagnostic was recorded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The accumulated diagnostics.
    pub fn errors(&self) -> &[LinkError] {
        &self.0
    }

    fn push(&mut self, err: LinkError) {
        self.0.push(err);
    }
}

impl fmt::Display for LinkErrors {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for LinkErrors {}

pub(crate) trait Accumulate {
    fn record(&mut self, position: usize, message: impl Into<String>);
}

impl Accumulate for LinkErrors {
    fn record(&mut self, position: usize, message: impl Into<String>) {
        self.push(LinkError::new(position, message));
    }
}
