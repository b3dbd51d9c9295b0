use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::extract::{Classifier, DEFAULT_OTHER_FILES, DEFAULT_PREFIXES, DocType};
use crate::strategy::Ownership;
use crate::title::{self, Title};

pub const CONFIG_FILE_NAME: &str = "doxywiki.toml";
pub const DEFAULT_USER_AGENT: &str = "doxywiki/0.1";
pub const DEFAULT_RATE_LIMIT_MS: u64 = 300;
pub const DEFAULT_EDIT_SUMMARY: &str = "Synchronize generated documentation";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct DoxywikiConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub docs: DocsSection,
    #[serde(default)]
    pub navigation: NavigationSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
    pub rate_limit_ms: Option<u64>,
    pub edit_summary: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct DocsSection {
    pub category: Option<String>,
    pub source_dir: Option<PathBuf>,
    pub page_prefix: Option<String>,
    pub media_category: Option<String>,
    pub media_prefix: Option<String>,
    pub full_display_titles: bool,
    pub identity_page: bool,
    pub stylesheet: Option<String>,
    pub other_files: Vec<String>,
    pub prefixes: BTreeMap<String, DocType>,
}

impl Default for DocsSection {
    fn default() -> Self {
        Self {
            category: None,
            source_dir: None,
            page_prefix: None,
            media_category: None,
            media_prefix: None,
            full_display_titles: false,
            identity_page: true,
            stylesheet: None,
            other_files: DEFAULT_OTHER_FILES.iter().map(ToString::to_string).collect(),
            prefixes: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NavigationMode {
    #[default]
    Transclusion,
    Direct,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct NavigationSection {
    pub mode: NavigationMode,
    pub category: Option<String>,
    pub prefix: Option<String>,
}

/// Where the navigation categories attach. The two modes never mix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    /// A redirect wrapper per record carries the navigation categories.
    Transclusion { category: String, prefix: String },
    /// The generated page carries the navigation categories itself.
    Direct { category: String },
}

impl Navigation {
    pub fn category(&self) -> &str {
        match self {
            Self::Transclusion { category, .. } | Self::Direct { category } => category,
        }
    }
}

/// Validated naming configuration, built once and passed by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub root_category: String,
    pub page_prefix: String,
    pub media_category: String,
    pub media_prefix: String,
    pub navigation: Navigation,
    pub full_display_titles: bool,
    pub identity_user: Option<String>,
    pub stylesheet: Option<String>,
    pub classifier: Classifier,
    pub edit_summary: String,
}

impl Settings {
    pub fn root_category_title(&self) -> String {
        format!("Category:{}", self.root_category)
    }

    pub fn type_category(&self, doc_type: DocType) -> String {
        format!("{} {}", self.root_category, doc_type.label())
    }

    pub fn navigation_type_category(&self, doc_type: DocType) -> String {
        format!("{} {}", self.navigation.category(), doc_type.label())
    }

    /// Ownership predicate shared by every generated page and the delete sweep.
    pub fn ownership(&self) -> Ownership {
        Ownership::Generated {
            root: self.root_category_title(),
            user_area: self.user_area(),
        }
    }

    /// Category whose non-redirect members are hand-expanded wrappers.
    pub fn user_area(&self) -> Option<String> {
        match &self.navigation {
            Navigation::Transclusion { category, .. } => Some(format!("Category:{category}")),
            Navigation::Direct { .. } => None,
        }
    }
}

impl DoxywikiConfig {
    /// Resolve the wiki API URL with owned return: env > config > None.
    pub fn api_url_owned(&self) -> Option<String> {
        env_value("WIKI_API_URL").or_else(|| self.wiki.api_url.clone())
    }

    /// Resolve user agent: env WIKI_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        env_value("WIKI_USER_AGENT")
            .or_else(|| self.wiki.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn rate_limit_ms(&self) -> u64 {
        env_value("WIKI_RATE_LIMIT_MS")
            .and_then(|value| value.parse().ok())
            .or(self.wiki.rate_limit_ms)
            .unwrap_or(DEFAULT_RATE_LIMIT_MS)
    }

    pub fn settings(&self) -> Result<Settings> {
        self.settings_with_lookup(|key| env::var(key).ok())
    }

    pub fn settings_with_lookup<F>(&self, lookup: F) -> Result<Settings>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(root_category) = non_blank(self.docs.category.as_deref()) else {
            bail!("docs.category is required in {CONFIG_FILE_NAME}");
        };
        let Some(navigation_category) = non_blank(self.navigation.category.as_deref()) else {
            bail!("navigation.category is required in {CONFIG_FILE_NAME}");
        };

        let page_prefix = non_blank(self.docs.page_prefix.as_deref())
            .unwrap_or_else(|| root_category.clone());
        let media_category = non_blank(self.docs.media_category.as_deref())
            .unwrap_or_else(|| format!("{root_category} Media"));
        let media_prefix =
            non_blank(self.docs.media_prefix.as_deref()).unwrap_or_else(|| page_prefix.clone());

        let navigation = match self.navigation.mode {
            NavigationMode::Transclusion => {
                let prefix = self
                    .navigation
                    .prefix
                    .as_deref()
                    .map(str::trim)
                    .unwrap_or_default()
                    .to_string();
                if title::soft_normalize(&prefix) == title::soft_normalize(&page_prefix) {
                    bail!(
                        "docs.page_prefix and navigation.prefix both resolve to {:?}; generated pages and their wrappers would collide",
                        page_prefix
                    );
                }
                Navigation::Transclusion {
                    category: navigation_category,
                    prefix,
                }
            }
            NavigationMode::Direct => Navigation::Direct {
                category: navigation_category,
            },
        };

        let identity_user = if self.docs.identity_page {
            lookup("WIKI_BOT_USER")
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        } else {
            None
        };

        let prefixes = if self.docs.prefixes.is_empty() {
            DEFAULT_PREFIXES
                .iter()
                .map(|(prefix, doc_type)| (prefix.to_string(), *doc_type))
                .collect()
        } else {
            self.docs
                .prefixes
                .iter()
                .map(|(prefix, doc_type)| (prefix.clone(), *doc_type))
                .collect()
        };

        let settings = Settings {
            root_category,
            page_prefix,
            media_category,
            media_prefix,
            navigation,
            full_display_titles: self.docs.full_display_titles,
            identity_user,
            stylesheet: non_blank(self.docs.stylesheet.as_deref()),
            classifier: Classifier::new(self.docs.other_files.clone(), prefixes),
            edit_summary: non_blank(self.wiki.edit_summary.as_deref())
                .unwrap_or_else(|| DEFAULT_EDIT_SUMMARY.to_string()),
        };
        validate_category_names(&settings)?;
        Ok(settings)
    }
}

fn validate_category_names(settings: &Settings) -> Result<()> {
    let mut names = vec![
        settings.root_category.clone(),
        settings.media_category.clone(),
        settings.navigation.category().to_string(),
    ];
    for doc_type in DocType::ALL {
        names.push(settings.type_category(doc_type));
        names.push(settings.navigation_type_category(doc_type));
    }
    for name in names {
        let title = Title::category(&name)
            .with_context(|| format!("category {name:?} is not a legal title"))?;
        if title.local_name() != name {
            bail!(
                "category {name:?} is not in normalized form (expected {:?})",
                title.local_name()
            );
        }
    }
    Ok(())
}

/// Load and parse a DoxywikiConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<DoxywikiConfig> {
    if !config_path.exists() {
        return Ok(DoxywikiConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: DoxywikiConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn env_value(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}
