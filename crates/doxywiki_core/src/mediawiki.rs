use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::path::Path;
use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use reqwest::Url;
use reqwest::blocking::{Client, multipart};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::DoxywikiConfig;
use crate::store::{ContentStore, RemotePage, StoreError, is_redirect};
use crate::title::NS_CATEGORY;

const PURGE_BATCH: usize = 50;

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_ms: u64,
}

impl MediaWikiClientConfig {
    pub fn from_config(config: &DoxywikiConfig) -> Result<Self> {
        let Some(api_url) = config.api_url_owned() else {
            bail!("wiki.api_url is not configured (set it in doxywiki.toml or WIKI_API_URL)");
        };
        Ok(Self {
            api_url,
            user_agent: config.user_agent(),
            timeout_ms: env_value_u64("WIKI_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_ms: config.rate_limit_ms(),
        })
    }
}

/// Blocking MediaWiki action API client. Requests are paced, never retried.
pub struct MediaWikiClient {
    client: Client,
    config: MediaWikiClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
    csrf_token: Option<String>,
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        Url::parse(&config.api_url)
            .with_context(|| format!("invalid WIKI_API_URL: {}", config.api_url))?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .user_agent(config.user_agent.clone())
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
            csrf_token: None,
        })
    }

    /// Log in with `WIKI_BOT_USER` / `WIKI_BOT_PASS`.
    pub fn login_from_env(&mut self) -> Result<()> {
        let username = env::var("WIKI_BOT_USER").unwrap_or_default();
        let password = env::var("WIKI_BOT_PASS").unwrap_or_default();
        if username.trim().is_empty() || password.is_empty() {
            bail!("WIKI_BOT_USER and WIKI_BOT_PASS must be set to write to the wiki");
        }
        self.login(username.trim(), &password)
    }

    pub fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let token_response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
            ("type", "login".to_string()),
        ])?;
        let token_payload: TokenQueryResponse = serde_json::from_value(token_response)
            .context("failed to decode login token response")?;
        let login_token = token_payload
            .query
            .tokens
            .and_then(|tokens| tokens.logintoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki login token"))?;

        let login_response = self.request_json_post(&[
            ("action", "login".to_string()),
            ("lgname", username.to_string()),
            ("lgpassword", password.to_string()),
            ("lgtoken", login_token),
        ])?;
        let login_payload: LoginResponse =
            serde_json::from_value(login_response).context("failed to decode login response")?;
        match login_payload.login.result.as_deref() {
            Some("Success") => {
                self.csrf_token = None;
                info!("logged in to {} as {username}", self.config.api_url);
                Ok(())
            }
            other => bail!(
                "MediaWiki login failed: {}",
                login_payload
                    .login
                    .reason
                    .or_else(|| other.map(ToString::to_string))
                    .unwrap_or_else(|| "unknown error".to_string())
            ),
        }
    }

    fn request_json_get(&mut self, params: &[(&str, String)]) -> Result<Value, StoreError> {
        let pairs = request_pairs(params);
        self.apply_rate_limit();
        let response = self
            .client
            .get(&self.config.api_url)
            .query(&pairs)
            .send()
            .context("failed to call MediaWiki API")?;
        decode_response(response)
    }

    fn request_json_post(&mut self, params: &[(&str, String)]) -> Result<Value, StoreError> {
        let pairs = request_pairs(params);
        self.apply_rate_limit();
        let response = self
            .client
            .post(&self.config.api_url)
            .form(&pairs)
            .send()
            .context("failed to call MediaWiki API")?;
        decode_response(response)
    }

    fn apply_rate_limit(&mut self) {
        let delay = Duration::from_millis(self.config.rate_limit_ms);
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn ensure_csrf_token(&mut self) -> Result<String, StoreError> {
        if let Some(token) = &self.csrf_token {
            return Ok(token.clone());
        }
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
        ])?;
        let parsed: TokenQueryResponse =
            serde_json::from_value(response).context("failed to decode csrf token response")?;
        let token = parsed
            .query
            .tokens
            .and_then(|tokens| tokens.csrftoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki csrf token"))?;
        self.csrf_token = Some(token.clone());
        Ok(token)
    }

    fn list_titles(
        &mut self,
        mut params: Vec<(&'static str, String)>,
        continue_key: &'static str,
    ) -> Result<Vec<QueryItem>, StoreError> {
        let mut items = Vec::new();
        let base_len = params.len();
        loop {
            let response = self.request_json_get(&params)?;
            let parsed: QueryResponse = serde_json::from_value(response)
                .context("failed to decode list API response")?;
            items.extend(parsed.query.allpages);
            items.extend(parsed.query.categorymembers);

            let next = parsed
                .continuation
                .and_then(|continuation| continuation.get(continue_key).cloned())
                .and_then(|value| value.as_str().map(ToString::to_string));
            let Some(token) = next else {
                break;
            };
            params.truncate(base_len);
            params.push((continue_key, token));
        }
        Ok(items)
    }
}

impl ContentStore for MediaWikiClient {
    fn fetch(&mut self, title: &str) -> Result<Option<RemotePage>, StoreError> {
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("titles", title.to_string()),
            ("prop", "revisions|categories|info".to_string()),
            ("rvprop", "content".to_string()),
            ("rvslots", "main".to_string()),
            ("cllimit", "max".to_string()),
        ])?;
        parse_fetch(response)
    }

    fn save(&mut self, title: &str, content: &str, summary: &str) -> Result<(), StoreError> {
        let token = self.ensure_csrf_token()?;
        let response = self
            .request_json_post(&[
                ("action", "edit".to_string()),
                ("title", title.to_string()),
                ("text", content.to_string()),
                ("summary", summary.to_string()),
                ("bot", "1".to_string()),
                ("token", token),
            ])
            .map_err(|error| for_title(error, title))?;
        let parsed: EditResponse =
            serde_json::from_value(response).context("failed to decode edit response")?;
        let edit = parsed
            .edit
            .ok_or_else(|| anyhow::anyhow!("missing edit payload in API response"))?;
        match edit.result.as_deref() {
            Some("Success") => Ok(()),
            Some(_) if edit.spamblacklist.is_some() => Err(StoreError::ContentFilter {
                title: title.to_string(),
                info: edit.spamblacklist.clone().unwrap_or_default(),
            }),
            other => Err(StoreError::Api {
                code: "editfailed".to_string(),
                info: format!("edit of {title} returned {}", other.unwrap_or("no result")),
            }),
        }
    }

    fn delete(&mut self, title: &str, reason: &str) -> Result<(), StoreError> {
        let token = self.ensure_csrf_token()?;
        self.request_json_post(&[
            ("action", "delete".to_string()),
            ("title", title.to_string()),
            ("reason", reason.to_string()),
            ("token", token),
        ])
        .map_err(|error| for_title(error, title))?;
        Ok(())
    }

    fn purge(&mut self, titles: &[String]) -> Result<(), StoreError> {
        for batch in titles.chunks(PURGE_BATCH) {
            self.request_json_post(&[
                ("action", "purge".to_string()),
                ("titles", batch.join("|")),
                ("forcelinkupdate", "1".to_string()),
            ])?;
            debug!("purged {} pages", batch.len());
        }
        Ok(())
    }

    fn upload_asset(
        &mut self,
        title: &str,
        path: &Path,
        comment: &str,
        text: &str,
    ) -> Result<(), StoreError> {
        let token = self.ensure_csrf_token()?;
        let form = multipart::Form::new()
            .text("action", "upload")
            .text("format", "json")
            .text("formatversion", "2")
            .text("filename", upload_file_name(title))
            .text("comment", comment.to_string())
            .text("text", text.to_string())
            .text("ignorewarnings", "1")
            .text("token", token)
            .file("file", path)
            .with_context(|| format!("failed to read {}", path.display()))?;

        self.apply_rate_limit();
        let response = self
            .client
            .post(&self.config.api_url)
            .multipart(form)
            .send()
            .context("failed to call MediaWiki API")?;
        let payload = decode_response(response).map_err(|error| for_title(error, title))?;
        let parsed: UploadResponse =
            serde_json::from_value(payload).context("failed to decode upload response")?;
        match parsed.upload.and_then(|upload| upload.result).as_deref() {
            Some("Success") => Ok(()),
            other => Err(StoreError::Api {
                code: "uploadfailed".to_string(),
                info: format!("upload of {title} returned {}", other.unwrap_or("no result")),
            }),
        }
    }

    fn asset_sha1(&mut self, title: &str) -> Result<Option<String>, StoreError> {
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("titles", title.to_string()),
            ("prop", "imageinfo".to_string()),
            ("iiprop", "sha1".to_string()),
        ])?;
        let parsed: QueryResponse = serde_json::from_value(response)
            .context("failed to decode imageinfo API response")?;
        Ok(parsed
            .query
            .pages
            .into_iter()
            .next()
            .and_then(|page| page.imageinfo.into_iter().next())
            .and_then(|info| info.sha1))
    }

    fn category_members(
        &mut self,
        category: &str,
        recursive: bool,
    ) -> Result<Vec<String>, StoreError> {
        let mut found = BTreeSet::new();
        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::from([category.to_string()]);
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.clone()) {
                continue;
            }
            let items = self.list_titles(
                vec![
                    ("action", "query".to_string()),
                    ("list", "categorymembers".to_string()),
                    ("cmtitle", current),
                    ("cmtype", "page|subcat|file".to_string()),
                    ("cmlimit", "500".to_string()),
                ],
                "cmcontinue",
            )?;
            for item in items {
                if recursive && item.ns == Some(NS_CATEGORY) {
                    queue.push_back(item.title.clone());
                }
                found.insert(item.title);
            }
        }
        Ok(found.into_iter().collect())
    }

    fn titles_matching(
        &mut self,
        namespace: i32,
        prefix: &str,
    ) -> Result<Vec<String>, StoreError> {
        let items = self.list_titles(
            vec![
                ("action", "query".to_string()),
                ("list", "allpages".to_string()),
                ("apnamespace", namespace.to_string()),
                ("apprefix", prefix.to_string()),
                ("aplimit", "500".to_string()),
            ],
            "apcontinue",
        )?;
        Ok(items.into_iter().map(|item| item.title).collect())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

fn request_pairs(params: &[(&str, String)]) -> Vec<(String, String)> {
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

fn decode_response(response: reqwest::blocking::Response) -> Result<Value, StoreError> {
    let status = response.status();
    if !status.is_success() {
        return Err(anyhow::anyhow!("MediaWiki API request failed with HTTP {status}").into());
    }
    let payload: Value = response
        .json()
        .context("failed to decode MediaWiki API JSON response")?;
    match api_error(&payload) {
        Some(error) => Err(error),
        None => Ok(payload),
    }
}

fn api_error(payload: &Value) -> Option<StoreError> {
    let error = payload.get("error")?;
    let code = error
        .get("code")
        .and_then(Value::as_str)
        .unwrap_or("unknown_error");
    let info = error
        .get("info")
        .and_then(Value::as_str)
        .unwrap_or("unknown info");
    Some(StoreError::Api {
        code: code.to_string(),
        info: info.to_string(),
    })
}

/// Map the API error codes that mean "this page, not the run" onto conflict kinds.
fn for_title(error: StoreError, title: &str) -> StoreError {
    let (code, info) = match error {
        StoreError::Api { code, info } => (code, info),
        other => return other,
    };
    let title = title.to_string();
    match code.as_str() {
        "protectedpage" | "cascadeprotected" | "protectedtitle" | "protectednamespace"
        | "protectednamespace-interface" => StoreError::Locked { title, info },
        "editconflict" => StoreError::EditConflict(title),
        "spamblacklist" | "titleblacklist-forbidden" => StoreError::ContentFilter { title, info },
        filter if filter.starts_with("abusefilter-") => StoreError::ContentFilter { title, info },
        "missingtitle" => StoreError::Missing(title),
        _ => StoreError::Api { code, info },
    }
}

fn parse_fetch(response: Value) -> Result<Option<RemotePage>, StoreError> {
    let parsed: QueryResponse =
        serde_json::from_value(response).context("failed to decode page API response")?;
    let Some(page) = parsed.query.pages.into_iter().next() else {
        return Ok(None);
    };
    if page.missing.unwrap_or(false) || page.invalid.unwrap_or(false) {
        return Ok(None);
    }
    let content = page
        .revisions
        .into_iter()
        .next()
        .and_then(|revision| revision.slots)
        .and_then(|slots| slots.main)
        .map(|slot| slot.content)
        .unwrap_or_default();
    Ok(Some(RemotePage {
        is_redirect: page.redirect.unwrap_or(false) || is_redirect(&content),
        title: page.title,
        content,
        categories: page
            .categories
            .into_iter()
            .map(|category| category.title)
            .collect(),
    }))
}

fn upload_file_name(title: &str) -> String {
    title
        .strip_prefix("File:")
        .unwrap_or(title)
        .trim()
        .to_string()
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
    #[serde(default, rename = "continue")]
    continuation: Option<serde_json::Map<String, Value>>,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    allpages: Vec<QueryItem>,
    #[serde(default)]
    categorymembers: Vec<QueryItem>,
    #[serde(default)]
    pages: Vec<PageQueryItem>,
}

#[derive(Debug, Deserialize)]
struct QueryItem {
    ns: Option<i32>,
    title: String,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    title: String,
    missing: Option<bool>,
    invalid: Option<bool>,
    redirect: Option<bool>,
    #[serde(default)]
    revisions: Vec<RevisionQueryItem>,
    #[serde(default)]
    categories: Vec<QueryItem>,
    #[serde(default)]
    imageinfo: Vec<ImageInfoItem>,
}

#[derive(Debug, Deserialize)]
struct RevisionQueryItem {
    slots: Option<RevisionSlotContainer>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlotContainer {
    main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionMainSlot {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ImageInfoItem {
    sha1: Option<String>,
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
    spamblacklist: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct UploadResponse {
    upload: Option<UploadPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct UploadPayload {
    result: Option<String>,
}
