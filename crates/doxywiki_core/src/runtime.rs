use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::config::{CONFIG_FILE_NAME, DoxywikiConfig};

pub const STATE_DIR_NAME: &str = ".doxywiki";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Config,
    Heuristic,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Config => "config",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self { cwd })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub config_path: PathBuf,
    pub state_dir: PathBuf,
    pub debug_dir: PathBuf,
    pub root_source: ValueSource,
    pub config_source: ValueSource,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "project_root={} ({})\nconfig_path={} ({})\nstate_dir={}\ndebug_dir={}",
            normalize_for_display(&self.project_root),
            self.root_source.as_str(),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
            normalize_for_display(&self.state_dir),
            normalize_for_display(&self.debug_dir),
        )
    }
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (project_root, root_source) = resolve_project_root(context, overrides, &lookup_env);
    let state_dir = project_root.join(STATE_DIR_NAME);

    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = env_path(&lookup_env, "DOXYWIKI_CONFIG") {
        (absolutize(&value, &project_root), ValueSource::Env)
    } else {
        (project_root.join(CONFIG_FILE_NAME), ValueSource::Default)
    };

    Ok(ResolvedPaths {
        debug_dir: state_dir.join("debug"),
        project_root,
        config_path,
        state_dir,
        root_source,
        config_source,
    })
}

/// The Doxygen HTML directory: flag > env DOXYWIKI_SOURCE_DIR > config, relative to the
/// project root.
pub fn resolve_source_dir(
    paths: &ResolvedPaths,
    config: &DoxywikiConfig,
    flag: Option<&Path>,
) -> Result<(PathBuf, ValueSource)> {
    resolve_source_dir_with_lookup(paths, config, flag, |key| env::var(key).ok())
}

fn resolve_source_dir_with_lookup<F>(
    paths: &ResolvedPaths,
    config: &DoxywikiConfig,
    flag: Option<&Path>,
    lookup_env: F,
) -> Result<(PathBuf, ValueSource)>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = flag {
        return Ok((absolutize(path, &paths.project_root), ValueSource::Flag));
    }
    if let Some(value) = env_path(&lookup_env, "DOXYWIKI_SOURCE_DIR") {
        return Ok((absolutize(&value, &paths.project_root), ValueSource::Env));
    }
    if let Some(path) = config.docs.source_dir.as_deref() {
        return Ok((absolutize(path, &paths.project_root), ValueSource::Config));
    }
    bail!(
        "no documentation source directory: pass --source, set DOXYWIKI_SOURCE_DIR or docs.source_dir in {}",
        normalize_for_display(&paths.config_path)
    );
}

fn resolve_project_root<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: &F,
) -> (PathBuf, ValueSource)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = overrides.project_root.as_deref() {
        return (absolutize(path, &context.cwd), ValueSource::Flag);
    }
    if let Some(value) = env_path(lookup_env, "DOXYWIKI_PROJECT_ROOT") {
        return (absolutize(&value, &context.cwd), ValueSource::Env);
    }
    match context
        .cwd
        .ancestors()
        .find(|candidate| candidate.join(CONFIG_FILE_NAME).is_file())
    {
        Some(root) => (root.to_path_buf(), ValueSource::Heuristic),
        None => (context.cwd.clone(), ValueSource::Default),
    }
}

fn env_path<F>(lookup_env: &F, key: &str) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    lookup_env(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
