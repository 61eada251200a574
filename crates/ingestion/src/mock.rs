//! Mock pager
//!
//! Generates deterministic user rows `(username, email, age)` so runs can be
//! reproduced without a document store.

use contracts::{ContractError, PageSource, Record, Value};

use crate::config::MockSourceConfig;

/// Yields `count` generated users, `page_size` at a time
pub struct MockPager {
    name: String,
    config: MockSourceConfig,
    page_size: usize,
    next: u64,
}

impl MockPager {
    pub fn new(name: impl Into<String>, config: MockSourceConfig, page_size: usize) -> Self {
        Self {
            name: name.into(),
            config,
            page_size: page_size.max(1),
            next: 0,
        }
    }

    /// The record at position `i`
    pub fn user(i: u64) -> Record {
        Record::new(vec![
            Value::Text(format!("user{i:07}")),
            Value::Text(format!("user{i:07}@example.com")),
            // Ages 18..=100, spread but reproducible
            Value::Int(18 + ((i * 7919) % 83) as i64),
        ])
    }

    /// Records not yet handed out
    pub fn remaining(&self) -> u64 {
        self.config.count - self.next
    }
}

impl PageSource for MockPager {
    fn name(&self) -> &str {
        &self.name
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    async fn next_page(&mut self) -> Result<Option<Vec<Record>>, ContractError> {
        let take = self.remaining().min(self.page_size as u64);
        if take == 0 {
            return Ok(None);
        }

        let page = (self.next..self.next + take).map(Self::user).collect();
        self.next += take;
        Ok(Some(page))
    }
}
