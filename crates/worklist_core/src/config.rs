use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::WorklistError;
use crate::worklist::EntryRule;

pub const DEFAULT_CONFIG_FILENAME: &str = "worklist.toml";
pub const DEFAULT_API_URL: &str = "https://simple.wikipedia.org/w/api.php";
pub const DEFAULT_USER_AGENT: &str = "OrphanWorklistSeeder/1.0";
pub const DEFAULT_WORKLIST_TITLE: &str = "User:AsteraBot/Pages to fix";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct SeederConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub worklist: WorklistSection,
    #[serde(default)]
    pub source: SourceSection,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct WorklistSection {
    pub title: Option<String>,
    pub entry_rule: Option<EntryRule>,
    pub guard_conflicts: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct SourceSection {
    pub file: Option<PathBuf>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Config,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Config => "config",
            Self::Default => "default",
        }
    }
}

/// Where the candidate titles come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    File(PathBuf),
    Url(String),
}

/// Command-line values that take precedence over env and file.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub title: Option<String>,
    pub source_file: Option<PathBuf>,
    pub source_url: Option<String>,
    pub dry_run: bool,
}

/// Fully resolved settings for one run. Built once at startup and passed down.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub worklist_title: String,
    pub entry_rule: EntryRule,
    pub guard_conflicts: bool,
    pub source: Option<SourceLocation>,
    pub dry_run: bool,
    pub title_source: ValueSource,
    pub source_origin: ValueSource,
}

impl RunConfig {
    pub fn diagnostics(&self) -> String {
        let source = match &self.source {
            Some(SourceLocation::File(path)) => format!("file {}", path.display()),
            Some(SourceLocation::Url(url)) => format!("url {url}"),
            None => "<none>".to_string(),
        };
        format!(
            "api_url={}\nuser_agent={}\ntimeout_ms={}\nworklist_title={} ({})\nentry_rule={}\nguard_conflicts={}\nsource={} ({})",
            self.api_url,
            self.user_agent,
            self.timeout_ms,
            self.worklist_title,
            self.title_source.as_str(),
            self.entry_rule.as_str(),
            self.guard_conflicts,
            source,
            self.source_origin.as_str(),
        )
    }

    /// The source location, or a config error when none was given.
    pub fn require_source(&self) -> Result<&SourceLocation> {
        self.source.as_ref().ok_or_else(|| {
            WorklistError::config(
                "no report source configured (set QUARRY_JSON_FILE, QUARRY_URL, or [source] in the config file)",
            )
            .into()
        })
    }
}

impl SeederConfig {
    /// Resolve against the process environment.
    pub fn resolve(&self, overrides: &RunOverrides) -> Result<RunConfig> {
        self.resolve_with(overrides, |key| env::var(key).ok())
    }

    /// Resolve with precedence flag > env > config file > default.
    pub fn resolve_with<F>(&self, overrides: &RunOverrides, lookup: F) -> Result<RunConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_value = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let api_url = env_value("WIKI_API_URL")
            .or_else(|| self.wiki.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let user_agent = env_value("WIKI_USER_AGENT")
            .or_else(|| self.wiki.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let timeout_ms = match env_value("WIKI_HTTP_TIMEOUT_MS") {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                WorklistError::config(format!("WIKI_HTTP_TIMEOUT_MS is not a number: {raw}"))
            })?,
            None => self.wiki.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
        };

        let entry_rule = match env_value("WORKLIST_ENTRY_RULE") {
            Some(raw) => EntryRule::parse(&raw)
                .map_err(|error| WorklistError::config(format!("WORKLIST_ENTRY_RULE: {error}")))?,
            None => self.worklist.entry_rule.unwrap_or_default(),
        };

        let (worklist_title, title_source) = if let Some(title) = non_blank(&overrides.title) {
            (title, ValueSource::Flag)
        } else if let Some(title) = env_value("WORKLIST_TITLE") {
            (title, ValueSource::Env)
        } else if let Some(title) = non_blank(&self.worklist.title) {
            (title, ValueSource::Config)
        } else {
            (DEFAULT_WORKLIST_TITLE.to_string(), ValueSource::Default)
        };

        let flag_source = pick_source(
            overrides.source_file.clone(),
            non_blank(&overrides.source_url),
            "--source-file and --source-url",
        )?;
        let env_source = pick_source(
            env_value("QUARRY_JSON_FILE").map(PathBuf::from),
            env_value("QUARRY_URL"),
            "QUARRY_JSON_FILE and QUARRY_URL",
        )?;
        let file_source = pick_source(
            self.source.file.clone(),
            non_blank(&self.source.url),
            "[source] file and url",
        )?;
        let (source, source_origin) = if let Some(source) = flag_source {
            (Some(source), ValueSource::Flag)
        } else if let Some(source) = env_source {
            (Some(source), ValueSource::Env)
        } else if let Some(source) = file_source {
            (Some(source), ValueSource::Config)
        } else {
            (None, ValueSource::Default)
        };

        Ok(RunConfig {
            api_url,
            user_agent,
            timeout_ms,
            worklist_title,
            entry_rule,
            guard_conflicts: self.worklist.guard_conflicts.unwrap_or(false),
            source,
            dry_run: overrides.dry_run,
            title_source,
            source_origin,
        })
    }
}

/// Bot account credentials, read from `WIKI_USER` / `WIKI_PASS`.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let username = lookup("WIKI_USER").filter(|value| !value.trim().is_empty());
        let password = lookup("WIKI_PASS").filter(|value| !value.is_empty());
        match (username, password) {
            (Some(username), Some(password)) => Ok(Self {
                username: username.trim().to_string(),
                password,
            }),
            _ => Err(WorklistError::MissingCredentials.into()),
        }
    }
}

/// Load and parse a SeederConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<SeederConfig> {
    if !config_path.exists() {
        return Ok(SeederConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: SeederConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

fn pick_source(
    file: Option<PathBuf>,
    url: Option<String>,
    label: &str,
) -> Result<Option<SourceLocation>> {
    match (file, url) {
        (Some(_), Some(_)) => {
            Err(WorklistError::config(format!("{label} are mutually exclusive")).into())
        }
        (Some(path), None) => Ok(Some(SourceLocation::File(path))),
        (None, Some(url)) => Ok(Some(SourceLocation::Url(url))),
        (None, None) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use tempfile::tempdir;

    fn lookup(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect::<BTreeMap<_, _>>();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/worklist.toml")).expect("load config");
        assert_eq!(config, SeederConfig::default());
    }

    #[test]
    fn load_config_parses_all_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join(DEFAULT_CONFIG_FILENAME);
        fs::write(
            &config_path,
            r#"
[wiki]
api_url = "https://wiki.example.org/w/api.php"
user_agent = "test-agent/1.0"
timeout_ms = 5000

[worklist]
title = "User:Bot/Queue"
entry_rule = "literal"
guard_conflicts = true

[source]
url = "https://quarry.example.org/run/1/output/0/json"
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(
            config.wiki.api_url.as_deref(),
            Some("https://wiki.example.org/w/api.php")
        );
        assert_eq!(config.wiki.timeout_ms, Some(5000));
        assert_eq!(config.worklist.title.as_deref(), Some("User:Bot/Queue"));
        assert_eq!(config.worklist.entry_rule, Some(EntryRule::Literal));
        assert_eq!(config.worklist.guard_conflicts, Some(true));
        assert!(config.source.file.is_none());
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join(DEFAULT_CONFIG_FILENAME);
        fs::write(&config_path, "[wiki\napi_url = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn resolve_uses_defaults_without_env_or_file() {
        let resolved = SeederConfig::default()
            .resolve_with(&RunOverrides::default(), lookup(&[]))
            .expect("resolve");
        assert_eq!(resolved.api_url, DEFAULT_API_URL);
        assert_eq!(resolved.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(resolved.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(resolved.worklist_title, DEFAULT_WORKLIST_TITLE);
        assert_eq!(resolved.title_source, ValueSource::Default);
        assert_eq!(resolved.entry_rule, EntryRule::Pattern);
        assert!(!resolved.guard_conflicts);
        assert!(resolved.source.is_none());
        assert!(resolved.require_source().is_err());
    }

    #[test]
    fn resolve_prefers_flag_then_env_then_file() {
        let mut config = SeederConfig::default();
        config.worklist.title = Some("From File".to_string());
        config.source.file = Some(PathBuf::from("file.json"));

        let env = lookup(&[
            ("WORKLIST_TITLE", "From Env"),
            ("QUARRY_JSON_FILE", "env.json"),
        ]);
        let resolved = config
            .resolve_with(&RunOverrides::default(), &env)
            .expect("resolve");
        assert_eq!(resolved.worklist_title, "From Env");
        assert_eq!(resolved.title_source, ValueSource::Env);
        assert_eq!(
            resolved.source,
            Some(SourceLocation::File(PathBuf::from("env.json")))
        );

        let overrides = RunOverrides {
            title: Some("From Flag".to_string()),
            source_url: Some("https://example.org/rows.json".to_string()),
            ..RunOverrides::default()
        };
        let resolved = config.resolve_with(&overrides, &env).expect("resolve");
        assert_eq!(resolved.worklist_title, "From Flag");
        assert_eq!(resolved.title_source, ValueSource::Flag);
        assert_eq!(
            resolved.source,
            Some(SourceLocation::Url("https://example.org/rows.json".to_string()))
        );
        assert_eq!(resolved.source_origin, ValueSource::Flag);
    }

    #[test]
    fn resolve_rejects_file_and_url_together() {
        let error = SeederConfig::default()
            .resolve_with(
                &RunOverrides::default(),
                lookup(&[
                    ("QUARRY_JSON_FILE", "rows.json"),
                    ("QUARRY_URL", "https://example.org/rows.json"),
                ]),
            )
            .expect_err("must fail");
        assert!(matches!(
            error.downcast_ref::<WorklistError>(),
            Some(WorklistError::Config { .. })
        ));
    }

    #[test]
    fn resolve_rejects_non_numeric_timeout() {
        let error = SeederConfig::default()
            .resolve_with(
                &RunOverrides::default(),
                lookup(&[("WIKI_HTTP_TIMEOUT_MS", "soon")]),
            )
            .expect_err("must fail");
        assert!(error.to_string().contains("WIKI_HTTP_TIMEOUT_MS"));
    }

    #[test]
    fn entry_rule_env_overrides_file() {
        let mut config = SeederConfig::default();
        config.worklist.entry_rule = Some(EntryRule::Pattern);
        let resolved = config
            .resolve_with(
                &RunOverrides::default(),
                lookup(&[("WORKLIST_ENTRY_RULE", "Literal")]),
            )
            .expect("resolve");
        assert_eq!(resolved.entry_rule, EntryRule::Literal);
    }

    #[test]
    fn unknown_entry_rule_is_a_config_error() {
        let error = SeederConfig::default()
            .resolve_with(
                &RunOverrides::default(),
                lookup(&[("WORKLIST_ENTRY_RULE", "fuzzy")]),
            )
            .expect_err("must fail");
        assert!(matches!(
            error.downcast_ref::<WorklistError>(),
            Some(WorklistError::Config { .. })
        ));
        assert!(error.to_string().contains("fuzzy"));
    }

    #[test]
    fn blank_env_values_fall_through() {
        let mut config = SeederConfig::default();
        config.worklist.title = Some("From File".to_string());
        let resolved = config
            .resolve_with(&RunOverrides::default(), lookup(&[("WORKLIST_TITLE", "  ")]))
            .expect("resolve");
        assert_eq!(resolved.worklist_title, "From File");
        assert_eq!(resolved.title_source, ValueSource::Config);
    }

    #[test]
    fn credentials_require_both_values() {
        let error = Credentials::from_lookup(lookup(&[("WIKI_USER", "Bot")])).expect_err("fail");
        assert!(matches!(
            error.downcast_ref::<WorklistError>(),
            Some(WorklistError::MissingCredentials)
        ));

        let credentials =
            Credentials::from_lookup(lookup(&[("WIKI_USER", " Bot "), ("WIKI_PASS", "secret")]))
                .expect("credentials");
        assert_eq!(credentials.username, "Bot");
        assert!(!format!("{credentials:?}").contains("secret"));
    }
}
