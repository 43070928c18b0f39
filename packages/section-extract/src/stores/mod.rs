//! Storage implementations for the section extraction library.
//!
//! Available backends:
//! - `MemoryStore` - In-memory graph, vectors and content (tests, demos)
//! - `FileContentReader` - Raw content from files on disk

pub mod file;
pub mod memory;

pub use file::FileContentReader;
pub use memory::MemoryStore;

use crate::error::{ExtractionError, Result, Store};
use crate::types::node::SourceRef;

/// Exact text of the 1-based inclusive line range, terminators included.
///
/// The end line is clamped to the last line of `text`.
pub(crate) fn slice_lines(text: &str, source: &SourceRef) -> Result<String> {
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    if source.start_line == 0 || source.start_line > lines.len() || source.end_line < source.start_line
    {
        return Err(ExtractionError::store(
            Store::Content,
            format!(
                "line range {}..={} out of bounds for {} ({} lines)",
                source.start_line,
                source.end_line,
                source.path,
                lines.len()
            ),
        ));
    }

    let end = source.end_line.min(lines.len());
    Ok(lines[source.start_line - 1..end].concat())
}
