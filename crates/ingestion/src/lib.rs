//! # Ingestion
//!
//! Source pagers.
//!
//! Responsibilities:
//! - Read the upstream record set lazily, one fixed-size page at a time
//! - Convert documents into `Record`s
//! - Signal exhaustion with `None`; a source is restarted only by re-creating it
//!
//! ```ignore
//! use contracts::PageSource;
//!
//! let mut source = ingestion::create_source(&blueprint.source).await?;
//! while let Some(page) = source.next_page().await? {
//!     engine.dispatch(Batch::new(page)).await?;
//! }
//! ```

mod config;
mod error;
mod jsonl;
mod mock;

pub use config::{JsonlSourceConfig, MockSourceConfig, DEFAULT_MOCK_COUNT};
pub use error::{IngestionError, Result};
pub use jsonl::JsonlPager;
pub use mock::MockPager;

use contracts::{ContractError, PageSource, Record, SourceConfig, SourceType};

/// Any built-in source
pub enum SourcePager {
    Jsonl(JsonlPager),
    Mock(MockPager),
}

impl PageSource for SourcePager {
    fn name(&self) -> &str {
        match self {
            Self::Jsonl(pager) => pager.name(),
            Self::Mock(pager) => pager.name(),
        }
    }

    fn page_size(&self) -> usize {
        match self {
            Self::Jsonl(pager) => pager.page_size(),
            Self::Mock(pager) => pager.page_size(),
        }
    }

    async fn next_page(&mut self) -> std::result::Result<Option<Vec<Record>>, ContractError> {
        match self {
            Self::Jsonl(pager) => pager.next_page().await,
            Self::Mock(pager) => pager.next_page().await,
        }
    }
}

/// Create the source described by `config`
pub async fn create_source(config: &SourceConfig) -> Result<SourcePager> {
    match config.source_type {
        SourceType::Jsonl => {
            let jsonl = JsonlSourceConfig::from_params(&config.params)?;
            let pager = JsonlPager::open("jsonl", jsonl, config.page_size).await?;
            Ok(SourcePager::Jsonl(pager))
        }
        SourceType::Mock => {
            let mock = MockSourceConfig::from_params(&config.params)?;
            Ok(SourcePager::Mock(MockPager::new("mock", mock, config.page_size)))
        }
    }
}
