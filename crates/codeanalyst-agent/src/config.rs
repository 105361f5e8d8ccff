use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::env::EnvSnapshot;

/// Model served by the inference platform unless overridden.
pub const DEFAULT_MODEL: &str = "gemini-3-pro-preview";
pub const DEFAULT_MAX_TURNS: usize = 16;
pub const DEFAULT_TOOL_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_OWNER: &str = "YOUR_PROJECT_ORG_OR_OWNER_NAME";
pub const DEFAULT_REPO: &str = "REPO_NAME";
pub const DEFAULT_BRANCH: &str = "master";

#[derive(Debug, Default, Deserialize)]
pub struct UserConfig {
    pub logging: Option<LoggingCfg>,
    pub agent: Option<AgentCfg>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingCfg {
    pub to_file: Option<bool>,
    pub dir: Option<String>,
    pub json: Option<bool>,
    pub compact: Option<bool>,
    pub pretty: Option<bool>,
    pub level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AgentCfg {
    pub model: Option<String>,
    pub max_turns: Option<usize>,
    pub tool_timeout_ms: Option<u64>,
    /// Restrict the tools exposed from the repository server.
    pub tool_filter: Option<Vec<String>>,

    pub github_owner: Option<String>,
    pub github_repo: Option<String>,
    pub github_branch: Option<String>,
}

/// Agent knobs resolved from the env snapshot, the user config, and defaults
/// (in that order of precedence).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSettings {
    pub model: String,
    pub max_turns: usize,
    pub tool_timeout: Duration,
    pub tool_filter: Option<Vec<String>>,
    pub github: RepoTarget,
}

/// Repository coordinates substituted into the agent instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoTarget {
    pub owner: String,
    pub repo: String,
    pub branch: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_turns: DEFAULT_MAX_TURNS,
            tool_timeout: Duration::from_millis(DEFAULT_TOOL_TIMEOUT_MS),
            tool_filter: None,
            github: RepoTarget {
                owner: DEFAULT_OWNER.to_string(),
                repo: DEFAULT_REPO.to_string(),
                branch: DEFAULT_BRANCH.to_string(),
            },
        }
    }
}

impl AgentSettings {
    pub fn resolve(env: &EnvSnapshot, user_cfg: Option<&UserConfig>) -> Self {
        let defaults = Self::default();
        let cfg = user_cfg.and_then(|c| c.agent.as_ref());

        let string_knob = |key: &str, from_cfg: Option<&String>, fallback: String| -> String {
            env.non_empty(key)
                .map(str::to_string)
                .or_else(|| from_cfg.cloned())
                .unwrap_or(fallback)
        };

        let model = string_knob(
            "CODEANALYST_MODEL",
            cfg.and_then(|a| a.model.as_ref()),
            defaults.model,
        );
        let max_turns = parse_knob::<usize>(env, "CODEANALYST_MAX_TURNS")
            .or_else(|| cfg.and_then(|a| a.max_turns))
            .filter(|n| *n > 0)
            .unwrap_or(defaults.max_turns);
        let tool_timeout = parse_knob::<u64>(env, "CODEANALYST_TOOL_TIMEOUT_MS")
            .or_else(|| cfg.and_then(|a| a.tool_timeout_ms))
            .map(Duration::from_millis)
            .unwrap_or(defaults.tool_timeout);
        let tool_filter = env
            .non_empty("CODEANALYST_TOOL_FILTER")
            .map(split_list)
            .or_else(|| cfg.and_then(|a| a.tool_filter.clone()))
            .filter(|v| !v.is_empty());

        let github = RepoTarget {
            owner: string_knob(
                "GITHUB_OWNER",
                cfg.and_then(|a| a.github_owner.as_ref()),
                defaults.github.owner,
            ),
            repo: string_knob(
                "GITHUB_REPO",
                cfg.and_then(|a| a.github_repo.as_ref()),
                defaults.github.repo,
            ),
            branch: string_knob(
                "GITHUB_BRANCH",
                cfg.and_then(|a| a.github_branch.as_ref()),
                defaults.github.branch,
            ),
        };

        Self {
            model,
            max_turns,
            tool_timeout,
            tool_filter,
            github,
        }
    }
}

fn parse_knob<T: std::str::FromStr>(env: &EnvSnapshot, key: &str) -> Option<T> {
    let raw = env.non_empty(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("ignoring unparsable {}={}", key, raw);
            None
        }
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.trim().is_empty())
        .map(|t| t.trim().to_string())
        .collect()
}

pub fn load_user_config(home: &Path) -> anyhow::Result<Option<UserConfig>> {
    let path = home.join("config.toml");
    if !path.exists() {
        return Ok(None);
    }
    let s = std::fs::read_to_string(&path)?;
    let cfg: UserConfig = toml::from_str(&s)?;
    Ok(Some(cfg))
}

pub fn expand_home(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/")
        && let Ok(home) = std::env::var("HOME")
    {
        return PathBuf::from(home).join(stripped);
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_of(items: &[(&str, &str)]) -> EnvSnapshot {
        EnvSnapshot::from_sources(
            items.iter().map(|(k, v)| (k.to_string(), v.to_string())),
            Vec::new(),
        )
    }

    #[test]
    fn defaults_use_repository_placeholders() {
        let s = AgentSettings::resolve(&EnvSnapshot::default(), None);
        assert_eq!(s.model, "gemini-3-pro-preview");
        assert_eq!(s.github.owner, DEFAULT_OWNER);
        assert_eq!(s.github.repo, DEFAULT_REPO);
        assert_eq!(s.github.branch, "master");
        assert_eq!(s.tool_timeout, Duration::from_secs(5));
        assert!(s.tool_filter.is_none());
    }

    #[test]
    fn env_wins_over_config_file() {
        let cfg: UserConfig = toml::from_str(
            r#"
[agent]
model = "gemini-2.5-pro"
max_turns = 4
github_owner = "acme"
github_branch = "main"
tool_filter = ["search_code", "get_file_contents"]
"#,
        )
        .expect("parse config");
        let env = env_of(&[("CODEANALYST_MODEL", "gemini-2.5-flash"), ("GITHUB_REPO", "warehouse")]);
        let s = AgentSettings::resolve(&env, Some(&cfg));
        assert_eq!(s.model, "gemini-2.5-flash");
        assert_eq!(s.max_turns, 4);
        assert_eq!(s.github.owner, "acme");
        assert_eq!(s.github.repo, "warehouse");
        assert_eq!(s.github.branch, "main");
        assert_eq!(
            s.tool_filter,
            Some(vec!["search_code".to_string(), "get_file_contents".to_string()])
        );
    }

    #[test]
    fn bad_numbers_fall_back_to_defaults() {
        let env = env_of(&[("CODEANALYST_MAX_TURNS", "many"), ("CODEANALYST_TOOL_TIMEOUT_MS", "-1")]);
        let s = AgentSettings::resolve(&env, None);
        assert_eq!(s.max_turns, DEFAULT_MAX_TURNS);
        assert_eq!(s.tool_timeout, Duration::from_millis(DEFAULT_TOOL_TIMEOUT_MS));
    }

    #[test]
    fn zero_max_turns_is_rejected() {
        let env = env_of(&[("CODEANALYST_MAX_TURNS", "0")]);
        assert_eq!(AgentSettings::resolve(&env, None).max_turns, DEFAULT_MAX_TURNS);
    }

    #[test]
    fn tool_filter_from_env_is_split() {
        let env = env_of(&[("CODEANALYST_TOOL_FILTER", "search_code, get_file_contents")]);
        let s = AgentSettings::resolve(&env, None);
        assert_eq!(
            s.tool_filter,
            Some(vec!["search_code".to_string(), "get_file_contents".to_string()])
        );
    }

    #[test]
    fn user_config_is_optional() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(load_user_config(dir.path()).expect("ok").is_none());
        std::fs::write(
            dir.path().join("config.toml"),
            "[logging]\nlevel = \"debug\"\nto_file = false\n",
        )
        .unwrap();
        let cfg = load_user_config(dir.path()).expect("ok").expect("some");
        let logging = cfg.logging.expect("logging");
        assert_eq!(logging.level.as_deref(), Some("debug"));
        assert_eq!(logging.to_file, Some(false));
    }
}
