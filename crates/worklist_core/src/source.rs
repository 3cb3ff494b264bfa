use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::{RunConfig, SourceLocation};
use crate::error::WorklistError;

/// A report that yields candidate titles, duplicates and order preserved.
pub trait ReportSource {
    fn describe(&self) -> String;
    /// Short name used in edit summaries.
    fn summary_label(&self) -> &'static str;
    fn load(&self) -> Result<Vec<String>>;
}

/// Local JSON export: `[{"page_title": "...", ...}, ...]`.
#[derive(Debug, Clone)]
pub struct FileSource {
    pub path: PathBuf,
}

impl ReportSource for FileSource {
    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }

    fn summary_label(&self) -> &'static str {
        "Quarry JSON"
    }

    fn load(&self) -> Result<Vec<String>> {
        let content = fs::read_to_string(&self.path)
            .map_err(|error| WorklistError::source_load(self.describe(), error.to_string()))?;
        parse_row_objects(&content)
            .map_err(|message| WorklistError::source_load(self.describe(), message).into())
    }
}

/// Remote tabular JSON: `{"rows": [["title", ...], ...]}`.
#[derive(Debug, Clone)]
pub struct UrlSource {
    pub url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
}

impl ReportSource for UrlSource {
    fn describe(&self) -> String {
        format!("url {}", self.url)
    }

    fn summary_label(&self) -> &'static str {
        "Quarry results"
    }

    fn load(&self) -> Result<Vec<String>> {
        let client = Client::builder()
            .timeout(Duration::from_millis(self.timeout_ms))
            .build()
            .context("failed to build report HTTP client")?;
        debug!(url = %self.url, "fetching report rows");

        let response = client
            .get(&self.url)
            .header("User-Agent", self.user_agent.clone())
            .header("Accept", "application/json")
            .send()
            .map_err(|error| WorklistError::source_load(self.describe(), error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(WorklistError::source_load(
                self.describe(),
                format!("HTTP {}", status.as_u16()),
            )
            .into());
        }
        let body = response
            .text()
            .map_err(|error| WorklistError::source_load(self.describe(), error.to_string()))?;
        parse_tabular_rows(&body)
            .map_err(|message| WorklistError::source_load(self.describe(), message).into())
    }
}

pub fn source_for(location: &SourceLocation, config: &RunConfig) -> Box<dyn ReportSource> {
    match location {
        SourceLocation::File(path) => Box::new(FileSource { path: path.clone() }),
        SourceLocation::Url(url) => Box::new(UrlSource {
            url: url.clone(),
            user_agent: config.user_agent.clone(),
            timeout_ms: config.timeout_ms,
        }),
    }
}

#[derive(Debug, Deserialize)]
struct RowObject {
    page_title: String,
}

#[derive(Debug, Deserialize)]
struct TabularRows {
    rows: Vec<Vec<Value>>,
}

fn parse_row_objects(content: &str) -> std::result::Result<Vec<String>, String> {
    let rows: Vec<RowObject> =
        serde_json::from_str(content).map_err(|error| format!("invalid row objects: {error}"))?;
    rows.into_iter()
        .enumerate()
        .map(|(index, row)| non_blank_title(index, row.page_title))
        .collect()
}

fn parse_tabular_rows(content: &str) -> std::result::Result<Vec<String>, String> {
    let table: TabularRows =
        serde_json::from_str(content).map_err(|error| format!("invalid tabular rows: {error}"))?;
    table
        .rows
        .into_iter()
        .enumerate()
        .map(|(index, row)| match row.into_iter().next() {
            Some(Value::String(title)) => non_blank_title(index, title),
            Some(other) => Err(format!("row {index}: first column is not a string: {other}")),
            None => Err(format!("row {index}: empty row")),
        })
        .collect()
}

/// Blank titles would be written as `* [[]]` and never read back.
fn non_blank_title(index: usize, title: String) -> std::result::Result<String, String> {
    if title.trim().is_empty() {
        return Err(format!("row {index}: empty page title"));
    }
    Ok(title)
}
