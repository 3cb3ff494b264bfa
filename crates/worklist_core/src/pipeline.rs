use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::client::{EditOutcome, EditRequest, MediaWikiClient, MediaWikiClientConfig, WikiApi};
use crate::config::{Credentials, RunConfig};
use crate::error::WorklistError;
use crate::source::{ReportSource, source_for};
use crate::worklist::{existing_titles, merge};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// The report had no rows; nothing was read or written.
    NoSourceRows,
    /// Every candidate is already listed.
    UpToDate,
    Updated,
    /// Changes were computed but not saved.
    DryRun,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoSourceRows => "no_source_rows",
            Self::UpToDate => "up_to_date",
            Self::Updated => "updated",
            Self::DryRun => "dry_run",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub status: RunStatus,
    pub worklist_title: String,
    pub source: String,
    pub loaded_rows: usize,
    pub existing_entries: usize,
    pub added: Vec<String>,
    pub created_page: bool,
    pub summary: Option<String>,
    pub new_revision_id: Option<i64>,
    pub request_count: usize,
    pub preview: Option<String>,
}

/// Build the real client and source from `config` and run one sync pass.
pub fn run_sync(config: &RunConfig, credentials: Option<&Credentials>) -> Result<RunReport> {
    let location = config.require_source()?;
    let source = source_for(location, config);
    let mut client = MediaWikiClient::new(MediaWikiClientConfig::from_run_config(config))?;
    run_sync_with_api(config, credentials, &mut client, source.as_ref(), Utc::now())
}

/// Login, load report, read worklist, merge, save. Stops early on an empty
/// report or when nothing is new.
pub fn run_sync_with_api<A: WikiApi + ?Sized>(
    config: &RunConfig,
    credentials: Option<&Credentials>,
    api: &mut A,
    source: &dyn ReportSource,
    now: DateTime<Utc>,
) -> Result<RunReport> {
    let token = if config.dry_run {
        None
    } else {
        let credentials = credentials.ok_or(WorklistError::MissingCredentials)?;
        api.login(&credentials.username, &credentials.password)?;
        info!(user = %credentials.username, "logged in");
        Some(api.csrf_token()?)
    };

    let mut report = RunReport {
        status: RunStatus::NoSourceRows,
        worklist_title: config.worklist_title.clone(),
        source: source.describe(),
        loaded_rows: 0,
        existing_entries: 0,
        added: Vec::new(),
        created_page: false,
        summary: None,
        new_revision_id: None,
        request_count: 0,
        preview: None,
    };

    let candidates = source.load()?;
    report.loaded_rows = candidates.len();
    info!(count = candidates.len(), source = %report.source, "loaded report rows");
    if candidates.is_empty() {
        warn!("report contained no rows; nothing to do");
        report.request_count = api.request_count();
        return Ok(report);
    }

    let page = api.fetch_page(&config.worklist_title)?;
    report.existing_entries = existing_titles(&page.content, config.entry_rule).len();
    report.created_page = !page.exists() || page.content.trim().is_empty();

    let outcome = merge(&page.content, &candidates, config.entry_rule, now);
    if outcome.is_unchanged() {
        info!(title = %config.worklist_title, "worklist is up to date");
        report.status = RunStatus::UpToDate;
        report.request_count = api.request_count();
        return Ok(report);
    }

    let summary = edit_summary(outcome.added.len(), source.summary_label());
    info!(count = outcome.added.len(), title = %config.worklist_title, "adding new pages");
    report.added = outcome.added;
    report.summary = Some(summary.clone());

    let Some(token) = token else {
        report.status = RunStatus::DryRun;
        report.preview = Some(outcome.text);
        report.request_count = api.request_count();
        return Ok(report);
    };

    let guarded = config.guard_conflicts;
    let request = EditRequest {
        title: config.worklist_title.clone(),
        text: outcome.text,
        summary,
        token,
        base_timestamp: page.timestamp.clone().filter(|_| guarded),
        start_timestamp: page.fetched_at.clone().filter(|_| guarded),
        create_only: guarded && !page.exists(),
    };
    let EditOutcome { new_revision_id } = api.edit_page(&request)?;
    info!(title = %config.worklist_title, revision = ?new_revision_id, "worklist updated");

    report.status = RunStatus::Updated;
    report.new_revision_id = new_revision_id;
    report.request_count = api.request_count();
    Ok(report)
}

/// Titles currently listed on the worklist page. Read-only; no login.
pub fn list_entries_with_api<A: WikiApi + ?Sized>(
    config: &RunConfig,
    api: &mut A,
) -> Result<Vec<String>> {
    let page = api.fetch_page(&config.worklist_title)?;
    Ok(existing_titles(&page.content, config.entry_rule)
        .into_iter()
        .collect())
}

pub fn list_entries(config: &RunConfig) -> Result<Vec<String>> {
    let mut client = MediaWikiClient::new(MediaWikiClientConfig::from_run_config(config))?;
    list_entries_with_api(config, &mut client)
}

pub fn edit_summary(count: usize, label: &str) -> String {
    format!("Bot: added {count} new pages from {label}")
}
