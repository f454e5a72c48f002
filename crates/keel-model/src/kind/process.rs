use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Description of one process to execute inside a container.
///
/// Environment entries use the `KEY=VALUE` form expected by the container runtime.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSpec {
    /// Caller-chosen process identifier. A random one is generated when empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Executable path (absolute, or resolved through `PATH` by the runtime).
    pub path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    /// Working directory inside the container. Empty means `/`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    /// User name to run as, resolved against the container's `/etc/passwd`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Allocate a terminal for the process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tty: Option<TtySpec>,
}

impl ProcessSpec {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.push(format!("{key}={value}"));
        self
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_tty(mut self, tty: TtySpec) -> Self {
        self.tty = Some(tty);
        self
    }

    /// Working directory with the `/` default applied.
    pub fn cwd(&self) -> PathBuf {
        match &self.dir {
            Some(dir) if !dir.as_os_str().is_empty() => dir.clone(),
            _ => PathBuf::from("/"),
        }
    }

    /// Split every env entry into its key and value.
    pub fn env_pairs(&self) -> Result<Vec<(&str, &str)>, ModelError> {
        self.env
            .iter()
            .map(|entry| {
                entry
                    .split_once('=')
                    .ok_or_else(|| ModelError::MalformedEnv(entry.clone()))
            })
            .collect()
    }
}

/// Terminal request for a process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TtySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_size: Option<WindowSize>,
}

impl TtySpec {
    pub fn sized(columns: u16, rows: u16) -> Self {
        Self {
            window_size: Some(WindowSize { columns, rows }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSize {
    pub columns: u16,
    pub rows: u16,
}
