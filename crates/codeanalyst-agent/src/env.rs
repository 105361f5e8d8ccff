//! Process configuration snapshot built from `.env` and the hosting environment.
//!
//! The snapshot is taken once at startup and passed by reference to every
//! component that needs a value, so nothing downstream reads `std::env`
//! for agent settings. Hosting-environment values take precedence over the
//! `.env` file, and the file never mutates the process environment.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Cloud project used to initialize the inference platform.
pub const GOOGLE_CLOUD_PROJECT: &str = "GOOGLE_CLOUD_PROJECT";
/// Cloud region used to initialize the inference platform.
pub const GOOGLE_CLOUD_REGION: &str = "GOOGLE_CLOUD_REGION";

/// Immutable view over the configuration values visible at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    vars: BTreeMap<String, String>,
    source: Option<PathBuf>,
}

impl EnvSnapshot {
    /// Load `.env` (explicit path, or searched upward from the current
    /// directory) and overlay the process environment on top of it.
    pub fn load(dotenv: Option<&Path>) -> Self {
        let path = match dotenv {
            Some(p) => Some(p.to_path_buf()),
            None => std::env::current_dir()
                .ok()
                .and_then(|cwd| find_dotenv(&cwd)),
        };
        let file_vars = match path.as_deref() {
            Some(p) => read_dotenv(p),
            None => Vec::new(),
        };
        let mut snapshot = Self::from_sources(file_vars, unicode_pairs(std::env::vars_os()));
        snapshot.source = path.filter(|p| p.is_file());
        tracing::debug!(
            "env snapshot: vars={}, dotenv={}",
            snapshot.vars.len(),
            snapshot
                .source
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "<none>".to_string())
        );
        snapshot
    }

    /// Build a snapshot from explicit sources; `process` wins over `file`.
    pub fn from_sources<F, P>(file: F, process: P) -> Self
    where
        F: IntoIterator<Item = (String, String)>,
        P: IntoIterator<Item = (String, String)>,
    {
        let mut vars: BTreeMap<String, String> = file.into_iter().collect();
        vars.extend(process);
        Self { vars, source: None }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Like [`get`](Self::get) but treats an empty value as absent.
    pub fn non_empty(&self, name: &str) -> Option<&str> {
        self.get(name).filter(|v| !v.is_empty())
    }

    /// Path of the `.env` file the snapshot was read from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Write one diagnostic line per missing cloud identifier and keep going.
    ///
    /// Returns the names that were reported, in the order checked. Write
    /// failures are logged and otherwise ignored.
    pub fn report_missing_cloud_ids<W: Write>(&self, out: &mut W) -> Vec<&'static str> {
        let mut missing = Vec::new();
        for name in [GOOGLE_CLOUD_PROJECT, GOOGLE_CLOUD_REGION] {
            if self.non_empty(name).is_some() {
                continue;
            }
            tracing::warn!("{} is not set", name);
            if let Err(e) = writeln!(out, "{name} environment variable not set.") {
                tracing::debug!("failed to write diagnostic for {}: {}", name, e);
            }
            missing.push(name);
        }
        missing
    }
}

/// Walk from `start` towards the filesystem root looking for `.env`.
pub fn find_dotenv(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(".env"))
        .find(|candidate| candidate.is_file())
}

/// Keep the pairs that are valid Unicode; the rest cannot name or carry an
/// agent setting.
fn unicode_pairs<I>(vars: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    vars.into_iter()
        .filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
            (Ok(k), Ok(v)) => Some((k, v)),
            (Ok(k), Err(_)) => {
                tracing::debug!("skipping {}: value is not valid unicode", k);
                None
            }
            (Err(k), _) => {
                tracing::debug!("skipping {:?}: name is not valid unicode", k);
                None
            }
        })
        .collect()
}

fn read_dotenv(path: &Path) -> Vec<(String, String)> {
    let iter = match dotenvy::from_path_iter(path) {
        Ok(iter) => iter,
        Err(e) => {
            tracing::debug!("no .env at {}: {}", path.display(), e);
            return Vec::new();
        }
    };
    let mut out = Vec::new();
    for item in iter {
        match item {
            Ok(pair) => out.push(pair),
            Err(e) => {
                tracing::warn!("stopped reading {}: {}", path.display(), e);
                break;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn process_values_override_file_values() {
        let env = EnvSnapshot::from_sources(
            pairs(&[("GOOGLE_CLOUD_PROJECT", "from-file"), ("ONLY_FILE", "x")]),
            pairs(&[("GOOGLE_CLOUD_PROJECT", "from-process")]),
        );
        assert_eq!(env.get("GOOGLE_CLOUD_PROJECT"), Some("from-process"));
        assert_eq!(env.get("ONLY_FILE"), Some("x"));
        assert_eq!(env.get("MISSING"), None);
    }

    #[cfg(unix)]
    #[test]
    fn non_unicode_process_values_are_skipped() {
        use std::os::unix::ffi::OsStringExt;

        let process = vec![
            (
                OsString::from("LATIN1_VALUE"),
                OsString::from_vec(b"caf\xe9".to_vec()),
            ),
            (OsString::from_vec(b"BAD\xffNAME".to_vec()), OsString::from("x")),
            (OsString::from("GOOGLE_CLOUD_PROJECT"), OsString::from("p")),
        ];
        let env = EnvSnapshot::from_sources(
            pairs(&[("LATIN1_VALUE", "from-file")]),
            unicode_pairs(process),
        );
        assert_eq!(env.get("GOOGLE_CLOUD_PROJECT"), Some("p"));
        // the unreadable process value does not shadow the file value
        assert_eq!(env.get("LATIN1_VALUE"), Some("from-file"));
        assert_eq!(env.vars.len(), 2);
    }

    #[test]
    fn empty_environment_reports_both_ids() {
        let env = EnvSnapshot::default();
        let mut out = Vec::new();
        let missing = env.report_missing_cloud_ids(&mut out);
        assert_eq!(missing, vec![GOOGLE_CLOUD_PROJECT, GOOGLE_CLOUD_REGION]);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "GOOGLE_CLOUD_PROJECT environment variable not set.\n\
             GOOGLE_CLOUD_REGION environment variable not set.\n"
        );
    }

    #[test]
    fn empty_value_counts_as_missing() {
        let env = EnvSnapshot::from_sources(
            pairs(&[("GOOGLE_CLOUD_PROJECT", ""), ("GOOGLE_CLOUD_REGION", "europe-west1")]),
            Vec::new(),
        );
        let mut out = Vec::new();
        let missing = env.report_missing_cloud_ids(&mut out);
        assert_eq!(missing, vec![GOOGLE_CLOUD_PROJECT]);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("GOOGLE_CLOUD_PROJECT"));
        assert!(!text.contains("GOOGLE_CLOUD_REGION"));
    }

    #[test]
    fn nothing_reported_when_both_present() {
        let env = EnvSnapshot::from_sources(
            pairs(&[("GOOGLE_CLOUD_PROJECT", "p"), ("GOOGLE_CLOUD_REGION", "r")]),
            Vec::new(),
        );
        let mut out = Vec::new();
        assert!(env.report_missing_cloud_ids(&mut out).is_empty());
        assert!(out.is_empty());
    }

    #[test]
    fn load_reads_explicit_dotenv_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(".env");
        std::fs::write(
            &path,
            "CODEANALYST_TEST_ONLY_IN_FILE=from-file\n# comment\nCODEANALYST_TEST_QUOTED=\"a b\"\n",
        )
        .unwrap();
        let env = EnvSnapshot::load(Some(&path));
        assert_eq!(env.get("CODEANALYST_TEST_ONLY_IN_FILE"), Some("from-file"));
        assert_eq!(env.get("CODEANALYST_TEST_QUOTED"), Some("a b"));
        assert_eq!(env.source(), Some(path.as_path()));
        // the process environment is left untouched
        assert!(std::env::var_os("CODEANALYST_TEST_ONLY_IN_FILE").is_none());
    }

    #[test]
    fn load_tolerates_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let env = EnvSnapshot::load(Some(&dir.path().join("nope.env")));
        assert!(env.source().is_none());
    }

    #[test]
    fn find_dotenv_walks_up() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(".env"), "A=1\n").unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(find_dotenv(&nested), Some(dir.path().join(".env")));
    }
}
