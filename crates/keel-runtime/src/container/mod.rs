use std::{collections::HashMap, path::Path, sync::Arc, time::Duration};

use keel_model::{
    BandwidthLimits, ContainerInfo, ContainerMetrics, CpuLimits, DiskLimits, GRACE_TIME_KEY,
    MemoryLimits, NetOutRule, ProcessSpec, Properties,
};
use tokio::sync::oneshot;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::{
    client::{
        ConsoleSize, ContainerSpec, ExitStatus, InitIo, ProcessConfig, ProcessStatus,
        RuntimeContainer, RuntimeProcess, RuntimeTask,
    },
    error::{ContainerError, ContainerResult, classify_start_error},
    io::{IoBinding, IoManager, ProcessIo, Reader},
    killer::{KillBehaviour, Killer},
    process::Process,
    rootfs::RootfsManager,
    task::TaskLifecycle,
};

/// `PATH` injected for processes running as uid 0.
pub const SUPERUSER_PATH: &str = "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";
/// `PATH` injected for every other user.
pub const PATH: &str = "PATH=/usr/local/bin:/usr/bin:/bin";

/// Upper bound on `key.len() + value.len()` of one property.
pub const MAX_PROPERTY_LEN: usize = 4096;

/// Default `PATH` entry for `uid`, or `None` when `env` already sets `PATH`.
pub fn default_path_env(uid: u32, env: &[String]) -> Option<&'static str> {
    if env.iter().any(|entry| entry.starts_with("PATH=")) {
        return None;
    }
    Some(if uid == 0 { SUPERUSER_PATH } else { PATH })
}

/// Process lifecycle, properties and limits of one runtime container.
///
/// Obtained from [`crate::Runtime::container`].
pub struct Container {
    inner: Arc<dyn RuntimeContainer>,
    lifecycle: TaskLifecycle,
    killer: Arc<dyn Killer>,
    rootfs: Arc<dyn RootfsManager>,
    io: Arc<dyn IoManager>,
}

impl Container {
    pub(crate) fn new(
        inner: Arc<dyn RuntimeContainer>,
        lifecycle: TaskLifecycle,
        killer: Arc<dyn Killer>,
        rootfs: Arc<dyn RootfsManager>,
        io: Arc<dyn IoManager>,
    ) -> Self {
        Self {
            inner,
            lifecycle,
            killer,
            rootfs,
            io,
        }
    }

    pub fn handle(&self) -> &str {
        self.inner.id()
    }

    /// Start a new process inside the container.
    ///
    /// A task lost by the runtime is recreated first. For processes without a
    /// terminal stdin is marked closable right after start.
    #[instrument(level = "debug", skip_all, fields(container = self.handle(), path = %spec.path))]
    pub async fn run(&self, spec: ProcessSpec, io: ProcessIo) -> ContainerResult<Process> {
        let container_spec = self
            .inner
            .spec()
            .await
            .map_err(ContainerError::runtime("container spec"))?;

        let config = self.process_config(&spec, &container_spec).await?;

        self.rootfs
            .setup_cwd(&container_spec.root_path, &config.cwd)
            .await
            .map_err(ContainerError::rootfs("setup cwd"))?;

        let task = self.lifecycle.materialize().await?;

        let id = process_id(&spec);
        let binding = self.io.creator(self.handle(), &id, io, spec.tty.is_some());

        match self.exec_and_start(task.as_ref(), &id, &config, binding, &spec).await {
            Ok((process, exited)) => {
                debug!(process = %id, "process started");
                Ok(Process::new(process, exited).releasing_io(Arc::clone(&self.io), self.handle()))
            }
            Err(e) => {
                self.io.delete(self.handle(), &id);
                Err(e)
            }
        }
    }

    /// Re-attach `io` to a process that is still running.
    #[instrument(level = "debug", skip(self, io), fields(container = self.handle()))]
    pub async fn attach(&self, pid: &str, io: ProcessIo) -> ContainerResult<Process> {
        if pid.is_empty() {
            return Err(ContainerError::InvalidInput("empty process id".into()));
        }

        let task = self
            .inner
            .task(InitIo::Load)
            .await
            .map_err(ContainerError::runtime("task attach"))?;

        // Check the process before binding: a new binding detaches the current one.
        let status = task
            .load_process(pid, None)
            .await
            .map_err(ContainerError::runtime("load proc"))?
            .status()
            .await
            .map_err(ContainerError::runtime("proc status"))?;
        if status != ProcessStatus::Running {
            return Err(ContainerError::ProcessNotRunning(status));
        }

        let binding = self.io.attach(self.handle(), pid, io);
        let attached = async {
            let process = task
                .load_process(pid, Some(binding))
                .await
                .map_err(ContainerError::runtime("load proc"))?;
            let exited = process
                .wait()
                .await
                .map_err(ContainerError::runtime("proc wait"))?;
            Ok::<_, ContainerError>((process, exited))
        };

        match attached.await {
            Ok((process, exited)) => {
                Ok(Process::new(process, exited).releasing_io(Arc::clone(&self.io), self.handle()))
            }
            Err(e) => {
                self.io.delete(self.handle(), pid);
                Err(e)
            }
        }
    }

    /// Terminate every process of the container; `kill` skips the grace period.
    ///
    /// A graceful stop waits for the stored grace time when one is set.
    #[instrument(level = "debug", skip(self), fields(container = self.handle()))]
    pub async fn stop(&self, kill: bool) -> ContainerResult<()> {
        let task = self
            .inner
            .task(InitIo::Load)
            .await
            .map_err(ContainerError::runtime("task lookup"))?;

        let behaviour = if kill {
            KillBehaviour::Ungraceful
        } else {
            KillBehaviour::Graceful {
                grace_period: self.stored_grace_time().await?,
            }
        };

        self.killer
            .kill(task.as_ref(), behaviour)
            .await
            .map_err(ContainerError::Kill)
    }

    pub async fn properties(&self) -> ContainerResult<Properties> {
        let labels = self
            .inner
            .labels()
            .await
            .map_err(ContainerError::runtime("labels retrieval"))?;
        Ok(labels.into_iter().collect())
    }

    pub async fn property(&self, name: &str) -> ContainerResult<String> {
        self.properties()
            .await?
            .remove(name)
            .ok_or_else(|| ContainerError::NotFound(name.to_string()))
    }

    pub async fn set_property(&self, name: &str, value: &str) -> ContainerResult<()> {
        if name.len() + value.len() > MAX_PROPERTY_LEN {
            return Err(ContainerError::PropertyTooLong {
                key: name.to_string(),
                max: MAX_PROPERTY_LEN,
            });
        }

        self.inner
            .set_labels(HashMap::from([(name.to_string(), value.to_string())]))
            .await
            .map_err(ContainerError::runtime("set label"))?;
        Ok(())
    }

    pub async fn remove_property(&self, _name: &str) -> ContainerResult<()> {
        Err(ContainerError::NotImplemented)
    }

    /// Stored in nanoseconds under [`GRACE_TIME_KEY`].
    pub async fn set_grace_time(&self, grace_time: Duration) -> ContainerResult<()> {
        self.set_property(GRACE_TIME_KEY, &grace_time.as_nanos().to_string())
            .await
    }

    pub async fn grace_time(&self) -> ContainerResult<Duration> {
        let raw = self.property(GRACE_TIME_KEY).await?;
        raw.parse::<u64>()
            .map(Duration::from_nanos)
            .map_err(|_| ContainerError::InvalidInput(format!("grace time '{raw}'")))
    }

    /// CPU shares from the runtime spec; zero when unset.
    pub async fn current_cpu_limits(&self) -> ContainerResult<CpuLimits> {
        let spec = self.spec().await?;
        let weight = spec
            .resources
            .and_then(|r| r.cpu)
            .and_then(|cpu| cpu.shares)
            .unwrap_or_default();
        Ok(CpuLimits { weight })
    }

    /// Memory limit from the runtime spec; zero when unset or unlimited.
    pub async fn current_memory_limits(&self) -> ContainerResult<MemoryLimits> {
        let spec = self.spec().await?;
        let limit_in_bytes = spec
            .resources
            .and_then(|r| r.memory)
            .and_then(|memory| memory.limit)
            .and_then(|limit| u64::try_from(limit).ok())
            .unwrap_or_default();
        Ok(MemoryLimits { limit_in_bytes })
    }

    pub async fn current_bandwidth_limits(&self) -> ContainerResult<BandwidthLimits> {
        Ok(BandwidthLimits::default())
    }

    pub async fn current_disk_limits(&self) -> ContainerResult<DiskLimits> {
        Ok(DiskLimits::default())
    }

    pub async fn info(&self) -> ContainerResult<ContainerInfo> {
        Err(ContainerError::NotImplemented)
    }

    pub async fn metrics(&self) -> ContainerResult<ContainerMetrics> {
        Err(ContainerError::NotImplemented)
    }

    pub async fn stream_in(&self, _path: &Path, _archive: Reader) -> ContainerResult<()> {
        Err(ContainerError::NotImplemented)
    }

    pub async fn stream_out(&self, _path: &Path) -> ContainerResult<Reader> {
        Err(ContainerError::NotImplemented)
    }

    pub async fn net_in(&self, _host_port: u32, _container_port: u32) -> ContainerResult<(u32, u32)> {
        Err(ContainerError::NotImplemented)
    }

    pub async fn net_out(&self, _rule: NetOutRule) -> ContainerResult<()> {
        Err(ContainerError::NotImplemented)
    }

    pub async fn bulk_net_out(&self, _rules: &[NetOutRule]) -> ContainerResult<()> {
        Err(ContainerError::NotImplemented)
    }

    async fn spec(&self) -> ContainerResult<ContainerSpec> {
        self.inner
            .spec()
            .await
            .map_err(ContainerError::runtime("container spec"))
    }

    /// Exec `id` into `task`, start it and hand back its exit subscription.
    async fn exec_and_start(
        &self,
        task: &dyn RuntimeTask,
        id: &str,
        config: &ProcessConfig,
        binding: IoBinding,
        spec: &ProcessSpec,
    ) -> ContainerResult<(Arc<dyn RuntimeProcess>, oneshot::Receiver<ExitStatus>)> {
        let process = task
            .exec(id, config, binding)
            .await
            .map_err(ContainerError::runtime("task exec"))?;

        // Subscribe before start so a fast exit is not missed.
        let exited = process
            .wait()
            .await
            .map_err(ContainerError::runtime("proc wait"))?;

        process.start().await.map_err(classify_start_error)?;

        // With a terminal, a closable stdin gets the process a SIGHUP on the
        // first stdin stream error.
        if spec.tty.is_none() {
            process
                .close_stdin()
                .await
                .map_err(ContainerError::runtime("proc closeio"))?;
        }

        Ok((process, exited))
    }

    /// Grace time for a graceful stop; `None` falls back to the killer's default.
    async fn stored_grace_time(&self) -> ContainerResult<Option<Duration>> {
        match self.grace_time().await {
            Ok(grace) => Ok(Some(grace)),
            Err(ContainerError::NotFound(_)) => Ok(None),
            Err(ContainerError::InvalidInput(reason)) => {
                warn!(container = self.handle(), %reason, "ignoring malformed grace time");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Derive the runtime process definition from the container's template.
    async fn process_config(
        &self,
        spec: &ProcessSpec,
        container: &ContainerSpec,
    ) -> ContainerResult<ProcessConfig> {
        let mut config = container.process.clone();

        config.args = std::iter::once(spec.path.clone())
            .chain(spec.args.iter().cloned())
            .collect();
        config.env.extend(spec.env.iter().cloned());
        config.cwd = spec.cwd();

        if let Some(tty) = &spec.tty {
            config.terminal = true;
            if let Some(size) = tty.window_size {
                config.console_size = Some(ConsoleSize {
                    width: u32::from(size.columns),
                    height: u32::from(size.rows),
                });
            }
        }

        if let Some(user) = spec.user.as_deref().filter(|u| !u.is_empty()) {
            config.user = self
                .rootfs
                .lookup_user(&container.root_path, user)
                .await
                .map_err(ContainerError::rootfs("lookup user"))?
                .ok_or_else(|| ContainerError::UserNotFound {
                    user: user.to_string(),
                })?;
            config.env.push(format!("USER={user}"));
        }

        if let Some(path) = default_path_env(config.user.uid, &config.env) {
            config.env.push(path.to_string());
        }

        Ok(config)
    }
}

fn process_id(spec: &ProcessSpec) -> String {
    if spec.id.is_empty() {
        Uuid::new_v4().to_string()
    } else {
        spec.id.clone()
    }
}
