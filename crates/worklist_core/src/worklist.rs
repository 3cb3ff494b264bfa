use std::collections::BTreeSet;
use std::sync::LazyLock;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;

/// `* [[Title]]`, `*[[Title]]`, `* [[Title|label]]`; captures up to the first `]` or `|`.
static ENTRY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\*\s*\[\[([^\]|]+)").expect("entry regex"));

const LITERAL_PREFIX: &str = "* [[";
const LITERAL_SUFFIX: &str = "]]";

/// How entry lines are recognised in the worklist text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryRule {
    /// Bullet, optional whitespace, link target up to `]` or `|`.
    #[default]
    Pattern,
    /// Whole line must be exactly `* [[...]]`.
    Literal,
}

impl EntryRule {
    pub fn parse(value: &str) -> Result<Self> {
        if value.eq_ignore_ascii_case("pattern") {
            return Ok(Self::Pattern);
        }
        if value.eq_ignore_ascii_case("literal") {
            return Ok(Self::Literal);
        }
        bail!("unsupported entry rule: {value} (expected pattern|literal)")
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pattern => "pattern",
            Self::Literal => "literal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub text: String,
    /// Titles appended by this merge, in the order they were written.
    pub added: Vec<String>,
}

impl MergeOutcome {
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty()
    }
}

pub fn existing_titles(text: &str, rule: EntryRule) -> BTreeSet<String> {
    match rule {
        EntryRule::Pattern => ENTRY_RE
            .captures_iter(text)
            .filter_map(|captures| captures.get(1))
            .map(|title| title.as_str().to_string())
            .collect(),
        EntryRule::Literal => text
            .lines()
            .filter_map(|line| {
                line.strip_prefix(LITERAL_PREFIX)?
                    .strip_suffix(LITERAL_SUFFIX)
            })
            .filter(|title| !title.is_empty())
            .map(ToString::to_string)
            .collect(),
    }
}

pub fn new_titles(candidates: &[String], existing: &BTreeSet<String>) -> BTreeSet<String> {
    candidates
        .iter()
        .filter(|title| !title.trim().is_empty() && !existing.contains(title.as_str()))
        .cloned()
        .collect()
}

/// One `* [[Title]]` line per title, sorted, newline-joined without a trailing newline.
pub fn format_entries<'a, I>(titles: I) -> String
where
    I: IntoIterator<Item = &'a String>,
{
    let mut sorted = titles.into_iter().collect::<Vec<_>>();
    sorted.sort();
    sorted.dedup();
    sorted
        .into_iter()
        .map(|title| format!("{LITERAL_PREFIX}{title}{LITERAL_SUFFIX}"))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn last_updated_header(now: DateTime<Utc>) -> String {
    format!(
        "'''Last updated: {}'''",
        now.format("%B %d, %Y at %H:%M UTC")
    )
}

/// Append candidates missing from `current`. Existing lines are kept verbatim.
pub fn merge(
    current: &str,
    candidates: &[String],
    rule: EntryRule,
    now: DateTime<Utc>,
) -> MergeOutcome {
    let existing = existing_titles(current, rule);
    let fresh = new_titles(candidates, &existing);
    if fresh.is_empty() {
        return MergeOutcome {
            text: current.to_string(),
            added: Vec::new(),
        };
    }

    let lines = format_entries(&fresh);
    let text = if current.trim().is_empty() {
        format!("{}\n\n{lines}\n", last_updated_header(now))
    } else {
        format!("{}\n{lines}\n", current.trim_end())
    };

    MergeOutcome {
        text,
        added: fresh.into_iter().collect(),
    }
}
