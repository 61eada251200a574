//! PageSource trait - paginated upstream reader
//!
//! The caller loop pulls fixed-size pages from a source and turns each page
//! into one `Batch`. A source is finite and cannot be rewound; to read again,
//! create a new one.

use crate::{ContractError, Record};

/// Paginated record source
#[trait_variant::make(PageSource: Send)]
pub trait LocalPageSource {
    /// Source name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Configured page size
    fn page_size(&self) -> usize;

    /// Read the next page
    ///
    /// Returns `Ok(None)` once the source is exhausted. A returned page is
    /// never empty and holds at most `page_size` records.
    async fn next_page(&mut self) -> Result<Option<Vec<Record>>, ContractError>;
}
