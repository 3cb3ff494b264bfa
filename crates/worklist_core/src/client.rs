use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::Url;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::RunConfig;
use crate::error::WorklistError;

/// Current content of the worklist page. Empty `content` with no
/// `timestamp` means the page does not exist yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedPage {
    pub content: String,
    pub timestamp: Option<String>,
    pub fetched_at: Option<String>,
}

impl FetchedPage {
    pub fn exists(&self) -> bool {
        self.timestamp.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct EditRequest {
    pub title: String,
    pub text: String,
    pub summary: String,
    pub token: String,
    /// Set to make the save fail if someone else edited after this revision.
    pub base_timestamp: Option<String>,
    pub start_timestamp: Option<String>,
    pub create_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditOutcome {
    pub new_revision_id: Option<i64>,
}

pub trait WikiApi {
    fn login(&mut self, username: &str, password: &str) -> Result<()>;
    fn csrf_token(&mut self) -> Result<String>;
    fn fetch_page(&mut self, title: &str) -> Result<FetchedPage>;
    fn edit_page(&mut self, request: &EditRequest) -> Result<EditOutcome>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
}

impl MediaWikiClientConfig {
    pub fn from_run_config(config: &RunConfig) -> Self {
        Self {
            api_url: config.api_url.clone(),
            user_agent: config.user_agent.clone(),
            timeout_ms: config.timeout_ms,
        }
    }
}

pub struct MediaWikiClient {
    client: Client,
    config: MediaWikiClientConfig,
    request_count: usize,
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            config,
            request_count: 0,
        })
    }

    fn request_json_get(&mut self, params: &[(&str, String)]) -> Result<Value> {
        let base_url = Url::parse(&self.config.api_url)
            .with_context(|| format!("invalid WIKI_API_URL: {}", self.config.api_url))?;
        let pairs = with_format(params);
        self.request_count += 1;
        debug!(action = action_name(params), "GET MediaWiki API");

        let response = self
            .client
            .get(base_url)
            .header("User-Agent", self.config.user_agent.clone())
            .query(&pairs)
            .send()
            .context("failed to call MediaWiki API")?;
        let status = response.status();
        if !status.is_success() {
            bail!("MediaWiki API request failed with HTTP {status}");
        }

        let payload: Value = response
            .json()
            .context("failed to decode MediaWiki API JSON response")?;
        ensure_no_api_error(&payload)?;
        Ok(payload)
    }

    /// POST without inspecting the payload's `error` field.
    fn send_json_post(&mut self, params: &[(&str, String)]) -> Result<Value> {
        let pairs = with_format(params);
        self.request_count += 1;
        debug!(action = action_name(params), "POST MediaWiki API");

        let response = self
            .client
            .post(&self.config.api_url)
            .header("User-Agent", self.config.user_agent.clone())
            .form(&pairs)
            .send()
            .context("failed to call MediaWiki API")?;
        let status = response.status();
        if !status.is_success() {
            bail!("MediaWiki API request failed with HTTP {status}");
        }

        response
            .json()
            .context("failed to decode MediaWiki API JSON response")
    }
}

impl WikiApi for MediaWikiClient {
    fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let token_response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
            ("type", "login".to_string()),
        ])?;
        let login_token = parse_token(token_response, TokenKind::Login)?;

        let login_response = self.send_json_post(&[
            ("action", "login".to_string()),
            ("lgname", username.to_string()),
            ("lgpassword", password.to_string()),
            ("lgtoken", login_token),
        ])?;
        parse_login_result(login_response)
    }

    fn csrf_token(&mut self) -> Result<String> {
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
        ])?;
        parse_token(response, TokenKind::Csrf)
    }

    fn fetch_page(&mut self, title: &str) -> Result<FetchedPage> {
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("prop", "revisions".to_string()),
            ("rvprop", "content|timestamp".to_string()),
            ("rvslots", "main".to_string()),
            ("titles", title.to_string()),
            ("curtimestamp", "1".to_string()),
        ])?;
        parse_fetched_page(title, response)
    }

    fn edit_page(&mut self, request: &EditRequest) -> Result<EditOutcome> {
        let mut params = vec![
            ("action", "edit".to_string()),
            ("title", request.title.clone()),
            ("text", request.text.clone()),
            ("summary", request.summary.clone()),
            ("bot", "1".to_string()),
        ];
        if let Some(base) = &request.base_timestamp {
            params.push(("basetimestamp", base.clone()));
        }
        if let Some(start) = &request.start_timestamp {
            params.push(("starttimestamp", start.clone()));
        }
        if request.create_only {
            params.push(("createonly", "1".to_string()));
        }
        // MediaWiki expects the token last so truncated bodies are rejected.
        params.push(("token", request.token.clone()));

        let response = self.send_json_post(&params)?;
        parse_edit_result(&request.title, response)
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

#[derive(Debug, Clone, Copy)]
enum TokenKind {
    Login,
    Csrf,
}

fn with_format(params: &[(&str, String)]) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(params.len() + 2);
    pairs.push(("format".to_string(), "json".to_string()));
    pairs.push(("formatversion".to_string(), "2".to_string()));
    for (key, value) in params {
        if !value.is_empty() {
            pairs.push(((*key).to_string(), value.clone()));
        }
    }
    pairs
}

fn action_name<'a>(params: &'a [(&'a str, String)]) -> &'a str {
    params
        .iter()
        .find(|(key, _)| *key == "action")
        .map(|(_, value)| value.as_str())
        .unwrap_or("unknown")
}

fn error_code_info(error: &Value) -> (&str, &str) {
    let code = error
        .get("code")
        .and_then(Value::as_str)
        .unwrap_or("unknown_error");
    let info = error
        .get("info")
        .and_then(Value::as_str)
        .unwrap_or("unknown info");
    (code, info)
}

fn ensure_no_api_error(payload: &Value) -> Result<()> {
    if let Some(error) = payload.get("error") {
        let (code, info) = error_code_info(error);
        bail!("MediaWiki API error [{code}]: {info}");
    }
    Ok(())
}

fn parse_token(payload: Value, kind: TokenKind) -> Result<String> {
    let parsed: TokenQueryResponse =
        serde_json::from_value(payload).context("failed to decode token response")?;
    let tokens = parsed.query.tokens.unwrap_or_default();
    let token = match kind {
        TokenKind::Login => tokens.logintoken,
        TokenKind::Csrf => tokens.csrftoken,
    };
    token.ok_or_else(|| match kind {
        TokenKind::Login => anyhow::anyhow!("failed to get MediaWiki login token"),
        TokenKind::Csrf => anyhow::anyhow!("failed to get MediaWiki csrf token"),
    })
}

fn parse_login_result(payload: Value) -> Result<()> {
    if let Some(error) = payload.get("error") {
        let (code, info) = error_code_info(error);
        return Err(WorklistError::Authentication {
            reason: format!("{code}: {info}"),
        }
        .into());
    }
    let parsed: LoginResponse =
        serde_json::from_value(payload).context("failed to decode login response")?;
    match parsed.login.result.as_deref() {
        Some("Success") => Ok(()),
        other => Err(WorklistError::Authentication {
            reason: parsed
                .login
                .reason
                .or_else(|| other.map(ToString::to_string))
                .unwrap_or_else(|| "unknown error".to_string()),
        }
        .into()),
    }
}

fn parse_fetched_page(title: &str, payload: Value) -> Result<FetchedPage> {
    let parsed: QueryResponse =
        serde_json::from_value(payload).context("failed to decode page content response")?;
    let page = parsed
        .query
        .pages
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("page query returned no pages for {title}"))?;

    let revision = match page.revisions.into_iter().next() {
        Some(revision) => revision,
        None => {
            return Ok(FetchedPage {
                content: String::new(),
                timestamp: None,
                fetched_at: parsed.curtimestamp,
            });
        }
    };
    let content = revision
        .slots
        .and_then(|slots| slots.main)
        .map(|slot| slot.content)
        .unwrap_or_default();

    Ok(FetchedPage {
        content,
        timestamp: revision.timestamp,
        fetched_at: parsed.curtimestamp,
    })
}

fn parse_edit_result(title: &str, payload: Value) -> Result<EditOutcome> {
    if let Some(error) = payload.get("error") {
        return Err(WorklistError::Edit {
            title: title.to_string(),
            payload: error.to_string(),
        }
        .into());
    }
    let parsed: EditResponse =
        serde_json::from_value(payload).context("failed to decode edit response")?;
    let edit = parsed
        .edit
        .ok_or_else(|| anyhow::anyhow!("missing edit payload in API response"))?;
    if edit.result.as_deref() != Some("Success") {
        return Err(WorklistError::Edit {
            title: title.to_string(),
            payload: edit.result.unwrap_or_else(|| "unknown".to_string()),
        }
        .into());
    }
    Ok(EditOutcome {
        new_revision_id: edit.newrevid,
    })
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
    curtimestamp: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    pages: Vec<PageQueryItem>,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    #[serde(default)]
    revisions: Vec<RevisionQueryItem>,
}

#[derive(Debug, Deserialize)]
struct RevisionQueryItem {
    timestamp: Option<String>,
    slots: Option<RevisionSlotContainer>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlotContainer {
    main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionMainSlot {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryResponse {
    #[serde(default)]
    query: TokenQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryPayload {
    tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenPayload {
    logintoken: Option<String>,
    csrftoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LoginResponse {
    #[serde(default)]
    login: LoginPayload,
}

#[derive(Debug, Deserialize, Default)]
struct LoginPayload {
    result: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct EditResponse {
    edit: Option<EditPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct EditPayload {
    result: Option<String>,
    newrevid: Option<i64>,
}
