//! Declarative descriptors for stdio MCP tool servers.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

/// Host variables a server keeps besides its declared entries.
pub const INHERITED_ENV: &[&str] = &["HOME", "LOGNAME", "SHELL", "TERM", "USER"];

/// How to launch a tool server as a child process speaking MCP over stdio.
///
/// `env` keeps every declared entry, including those whose source value was
/// absent (`None`); absent entries are only dropped at launch time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StdioServerParameters {
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, Option<String>>,
}

impl StdioServerParameters {
    /// Environment actually handed to the child process.
    pub fn launch_env(&self) -> HashMap<String, String> {
        self.env
            .iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| (k.clone(), v.clone())))
            .collect()
    }

    /// Program and arguments that start the server seeing only its declared
    /// entries plus [`INHERITED_ENV`].
    ///
    /// Declared values still travel through the process environment (see
    /// [`launch_env`](Self::launch_env)); the command is wrapped in `env -u ...`
    /// for every other host variable in `host_names` and every declared entry
    /// without a value, so secrets never appear in the argument list. Windows
    /// has no `env`, so the command is returned unchanged there.
    pub fn launch_invocation<I>(&self, host_names: I) -> (String, Vec<String>)
    where
        I: IntoIterator<Item = String>,
    {
        if cfg!(windows) {
            return (self.command.clone(), self.args.clone());
        }
        let kept: BTreeSet<&str> = INHERITED_ENV
            .iter()
            .copied()
            .chain(
                self.env
                    .iter()
                    .filter(|(_, v)| v.is_some())
                    .map(|(k, _)| k.as_str()),
            )
            .collect();
        let mut removed: BTreeSet<String> = host_names
            .into_iter()
            .filter(|name| !name.is_empty() && !kept.contains(name.as_str()))
            .collect();
        removed.extend(self.unset_env().into_iter().map(str::to_string));

        let mut args = Vec::with_capacity(removed.len() * 2 + self.args.len() + 2);
        for name in removed {
            args.push("-u".to_string());
            args.push(name);
        }
        args.push("--".to_string());
        args.push(self.command.clone());
        args.extend(self.args.iter().cloned());
        ("env".to_string(), args)
    }

    /// Names of declared entries that have no value.
    pub fn unset_env(&self) -> Vec<&str> {
        self.env
            .iter()
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| k.as_str())
            .collect()
    }
}

/// Stdio connection plus the timeout applied to session setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StdioConnectionParams {
    pub server_params: StdioServerParameters,
    #[serde(with = "millis")]
    pub timeout: Duration,
}

/// A tool server attached to an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct McpToolset {
    /// Stable key used in logs and to route tool calls back to the server.
    pub key: String,
    pub connection: StdioConnectionParams,
    /// When set, only these tool names are exposed to the model.
    pub tool_filter: Option<Vec<String>>,
}

impl McpToolset {
    pub fn exposes(&self, tool: &str) -> bool {
        match &self.tool_filter {
            Some(allowed) => allowed.iter().any(|t| t == tool),
            None => true,
        }
    }
}

/// A tool advertised by a server, reduced to what the model needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: Option<String>,
    /// JSON Schema of the tool input, as advertised by the server.
    pub input_schema: serde_json::Value,
}

mod millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> StdioServerParameters {
        let mut env = BTreeMap::new();
        env.insert("TOKEN".to_string(), None);
        env.insert("PATH".to_string(), Some("/usr/bin".to_string()));
        StdioServerParameters {
            command: "npx".to_string(),
            args: vec!["-y".to_string(), "pkg".to_string()],
            env,
        }
    }

    #[test]
    fn launch_env_drops_absent_values() {
        let p = params();
        let env = p.launch_env();
        assert_eq!(env.len(), 1);
        assert_eq!(env.get("PATH").map(String::as_str), Some("/usr/bin"));
        assert_eq!(p.unset_env(), vec!["TOKEN"]);
    }

    #[cfg(unix)]
    #[test]
    fn invocation_unsets_undeclared_host_variables() {
        let p = params();
        let host = ["HOME", "AWS_SECRET_ACCESS_KEY", "PATH", "TOKEN", "GOOGLE_CLOUD_ACCESS_TOKEN"]
            .iter()
            .map(|s| s.to_string());
        let (program, args) = p.launch_invocation(host);
        assert_eq!(program, "env");
        assert_eq!(
            args,
            vec![
                "-u",
                "AWS_SECRET_ACCESS_KEY",
                "-u",
                "GOOGLE_CLOUD_ACCESS_TOKEN",
                "-u",
                "TOKEN",
                "--",
                "npx",
                "-y",
                "pkg"
            ]
        );
        // declared values are never passed on the command line
        assert!(!args.iter().any(|a| a.contains("/usr/bin")));
    }

    #[cfg(unix)]
    #[test]
    fn child_sees_only_declared_and_inherited_variables() {
        let mut env = BTreeMap::new();
        env.insert(
            "PATH".to_string(),
            Some(std::env::var("PATH").unwrap_or_else(|_| "/usr/bin:/bin".to_string())),
        );
        env.insert("DECLARED_TOKEN".to_string(), Some("t0k3n".to_string()));
        env.insert("DECLARED_BUT_ABSENT".to_string(), None);
        let p = StdioServerParameters {
            command: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), "env".to_string()],
            env,
        };

        let mut host: Vec<String> = std::env::vars_os()
            .filter_map(|(k, _)| k.into_string().ok())
            .collect();
        host.push("LEAKY_SETTING".to_string());
        host.push("DECLARED_BUT_ABSENT".to_string());
        let (program, args) = p.launch_invocation(host);

        let output = std::process::Command::new(program)
            .args(args)
            .envs(p.launch_env())
            .env("LEAKY_SETTING", "leak")
            .env("DECLARED_BUT_ABSENT", "stale")
            .output()
            .expect("spawn env");
        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);
        let names: Vec<&str> = stdout
            .lines()
            .filter_map(|l| l.split_once('=').map(|(k, _)| k))
            .collect();

        assert!(stdout.lines().any(|l| l == "DECLARED_TOKEN=t0k3n"));
        assert!(!names.contains(&"LEAKY_SETTING"));
        assert!(!names.contains(&"DECLARED_BUT_ABSENT"));
        // the shell itself may add PWD, SHLVL, OLDPWD and _
        let shell_added = ["PWD", "SHLVL", "OLDPWD", "_"];
        for name in names {
            assert!(
                INHERITED_ENV.contains(&name)
                    || shell_added.contains(&name)
                    || name == "PATH"
                    || name == "DECLARED_TOKEN",
                "unexpected variable {name} reached the child"
            );
        }
    }

    #[test]
    fn tool_filter_limits_exposure() {
        let mut ts = McpToolset {
            key: "github".to_string(),
            connection: StdioConnectionParams {
                server_params: params(),
                timeout: Duration::from_secs(5),
            },
            tool_filter: None,
        };
        assert!(ts.exposes("create_issue"));
        ts.tool_filter = Some(vec!["search_code".to_string()]);
        assert!(ts.exposes("search_code"));
        assert!(!ts.exposes("create_issue"));
    }

    #[test]
    fn serializes_timeout_as_millis() {
        let conn = StdioConnectionParams {
            server_params: params(),
            timeout: Duration::from_millis(1500),
        };
        let v = serde_json::to_value(&conn).unwrap();
        assert_eq!(v["timeout"], 1500);
        assert!(v["server_params"]["env"]["TOKEN"].is_null());
    }
}
