use std::path::PathBuf;

/// The subset of an OCI runtime spec the adapter reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Host path of the container's root filesystem.
    pub root_path: PathBuf,
    /// Process template every exec'd process starts from.
    pub process: ProcessConfig,
    pub resources: Option<Resources>,
}

/// OCI process definition handed to the runtime on exec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessConfig {
    pub terminal: bool,
    pub console_size: Option<ConsoleSize>,
    pub user: User,
    /// `args[0]` is the executable.
    pub args: Vec<String>,
    /// `KEY=VALUE` entries.
    pub env: Vec<String>,
    pub cwd: PathBuf,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            terminal: false,
            console_size: None,
            user: User::default(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: PathBuf::from("/"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsoleSize {
    pub width: u32,
    pub height: u32,
}

/// Numeric identity a process runs as. Defaults to root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct User {
    pub uid: u32,
    pub gid: u32,
    pub additional_gids: Vec<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resources {
    pub cpu: Option<CpuResources>,
    pub memory: Option<MemoryResources>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuResources {
    pub shares: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryResources {
    /// Limit in bytes; negative means unlimited.
    pub limit: Option<i64>,
}
