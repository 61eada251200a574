//! JSON-lines pager
//!
//! One document per line. Arrays map positionally; objects are projected
//! onto the configured columns. Blank lines are ignored.

use std::path::Path;

use contracts::{ContractError, PageSource, Record};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::{debug, instrument};

use crate::config::JsonlSourceConfig;
use crate::error::{IngestionError, Result};

/// Pages records out of a JSON-lines file
pub struct JsonlPager {
    name: String,
    config: JsonlSourceConfig,
    page_size: usize,
    lines: Lines<BufReader<File>>,
    line_no: u64,
    to_skip: u64,
    exhausted: bool,
}

impl JsonlPager {
    /// Open the file; nothing is read until the first page
    pub async fn open(
        name: impl Into<String>,
        config: JsonlSourceConfig,
        page_size: usize,
    ) -> Result<Self> {
        let file = File::open(&config.path)
            .await
            .map_err(|source| IngestionError::Open {
                path: config.path.clone(),
                source,
            })?;

        Ok(Self {
            name: name.into(),
            to_skip: config.skip,
            config,
            page_size: page_size.max(1),
            lines: BufReader::new(file).lines(),
            line_no: 0,
            exhausted: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn parse_line(&self, line: &str) -> Result<Record> {
        let parse_error = |message: String| IngestionError::Parse {
            path: self.config.path.clone(),
            line: self.line_no,
            message,
        };

        let value: serde_json::Value =
            serde_json::from_str(line).map_err(|e| parse_error(e.to_string()))?;
        Record::from_json(value, self.config.columns.as_deref())
            .map_err(|e| parse_error(e.to_string()))
    }

    async fn read_page(&mut self) -> Result<Option<Vec<Record>>> {
        if self.exhausted {
            return Ok(None);
        }

        let mut page = Vec::with_capacity(self.page_size);
        while page.len() < self.page_size {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|source| IngestionError::Read {
                    path: self.config.path.clone(),
                    source,
                })?;

            let Some(line) = line else {
                self.exhausted = true;
                break;
            };
            self.line_no += 1;

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if self.to_skip > 0 {
                self.to_skip -= 1;
                continue;
            }
            page.push(self.parse_line(line)?);
        }

        if page.is_empty() {
            Ok(None)
        } else {
            Ok(Some(page))
        }
    }
}

impl PageSource for JsonlPager {
    fn name(&self) -> &str {
        &self.name
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    #[instrument(name = "jsonl_next_page", skip(self), fields(source = %self.name))]
    async fn next_page(&mut self) -> std::result::Result<Option<Vec<Record>>, ContractError> {
        let page = self.read_page().await?;
        if let Some(records) = &page {
            debug!(source = %self.name, records = records.len(), line = self.line_no, "Page read");
        }
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::Value;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn file(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file
    }

    fn config(file: &NamedTempFile, columns: Option<&str>) -> JsonlSourceConfig {
        JsonlSourceConfig {
            path: file.path().to_path_buf(),
            columns: columns.map(|c| c.split(',').map(str::to_string).collect()),
            skip: 0,
        }
    }

    #[tokio::test]
    async fn test_pages_are_fixed_size_until_exhausted() {
        let input = file(&[
            r#"{"username": "ana", "email": "ana@example.com", "age": 31}"#,
            r#"{"username": "bob", "email": "bob@example.com", "age": 45}"#,
            "",
            r#"{"username": "cid", "age": 22, "_id": "x"}"#,
        ]);
        let mut pager = JsonlPager::open("users", config(&input, Some("username,email,age")), 2)
            .await
            .unwrap();

        let first = pager.next_page().await.unwrap().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].fields()[0], Value::from("ana"));

        let second = pager.next_page().await.unwrap().unwrap();
        assert_eq!(
            second[0].fields(),
            &[Value::from("cid"), Value::Null, Value::Int(22)]
        );

        assert!(pager.next_page().await.unwrap().is_none());
        assert!(pager.next_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_array_documents_and_skip() {
        let input = file(&[r#"["a", 1]"#, r#"["b", 2]"#, r#"["c", 3]"#]);
        let mut cfg = config(&input, None);
        cfg.skip = 1;

        let mut pager = JsonlPager::open("rows", cfg, 10).await.unwrap();
        let page = pager.next_page().await.unwrap().unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].fields()[0], Value::from("b"));
    }

    #[tokio::test]
    async fn test_malformed_line_reports_position() {
        let input = file(&[r#"["ok"]"#, "{not json"]);
        let mut pager = JsonlPager::open("rows", config(&input, None), 10).await.unwrap();

        let err = pager.next_page().await.unwrap_err();
        assert!(matches!(err, ContractError::SourceRead { .. }));
        assert!(err.to_string().contains(":2:"));
    }

    #[tokio::test]
    async fn test_missing_file_fails_to_open() {
        let cfg = JsonlSourceConfig {
            path: "/nonexistent/users.jsonl".into(),
            columns: None,
            skip: 0,
        };
        assert!(matches!(
            JsonlPager::open("rows", cfg, 10).await,
            Err(IngestionError::Open { .. })
        ));
    }
}
