//! In-memory runtime collaborators recording how they were called.
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::{
    client::{
        ContainerSpec, ExitStatus, InitIo, ProcessConfig, ProcessInfo, ProcessStatus,
        RuntimeContainer, RuntimeProcess, RuntimeTask, User,
    },
    error::RuntimeError,
    io::{IoBinding, IoMode},
    killer::{KillBehaviour, KillError, Killer},
    rootfs::{RootfsError, RootfsManager},
};

pub(crate) struct FakeProcess {
    id: String,
    status: Mutex<ProcessStatus>,
    exit: Mutex<Option<ExitStatus>>,
    waiters: Mutex<Vec<oneshot::Sender<ExitStatus>>>,
    exits_on: Vec<i32>,
    start_error: Option<RuntimeError>,
    signals: Mutex<Vec<i32>>,
    resizes: Mutex<Vec<(u32, u32)>>,
    pub(crate) starts: AtomicUsize,
    pub(crate) waits: AtomicUsize,
    pub(crate) stdin_closes: AtomicUsize,
    pub(crate) deletes: AtomicUsize,
}

impl FakeProcess {
    pub(crate) fn created(id: &str) -> Self {
        Self {
            id: id.to_string(),
            status: Mutex::new(ProcessStatus::Created),
            exit: Mutex::new(None),
            waiters: Mutex::new(Vec::new()),
            exits_on: Vec::new(),
            start_error: None,
            signals: Mutex::new(Vec::new()),
            resizes: Mutex::new(Vec::new()),
            starts: AtomicUsize::new(0),
            waits: AtomicUsize::new(0),
            stdin_closes: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    pub(crate) fn running(id: &str) -> Self {
        Self::created(id).with_status(ProcessStatus::Running)
    }

    pub(crate) fn with_status(self, status: ProcessStatus) -> Self {
        *self.status.lock().unwrap() = status;
        self
    }

    /// Exit with `128 + signal` when receiving `signal`.
    pub(crate) fn exits_on(mut self, signal: i32) -> Self {
        self.exits_on.push(signal);
        self
    }

    pub(crate) fn failing_start(mut self, err: RuntimeError) -> Self {
        self.start_error = Some(err);
        self
    }

    /// Deliver `status` to every current and future waiter.
    pub(crate) fn exit(&self, status: ExitStatus) {
        *self.status.lock().unwrap() = ProcessStatus::Stopped;
        *self.exit.lock().unwrap() = Some(status.clone());
        for waiter in self.waiters.lock().unwrap().drain(..) {
            let _ = waiter.send(status.clone());
        }
    }

    pub(crate) fn has_exited(&self) -> bool {
        self.exit.lock().unwrap().is_some()
    }

    pub(crate) fn signals(&self) -> Vec<i32> {
        self.signals.lock().unwrap().clone()
    }

    pub(crate) fn resizes(&self) -> Vec<(u32, u32)> {
        self.resizes.lock().unwrap().clone()
    }
}

#[async_trait]
impl RuntimeProcess for FakeProcess {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start(&self) -> Result<(), RuntimeError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.start_error {
            return Err(err.clone());
        }
        *self.status.lock().unwrap() = ProcessStatus::Running;
        Ok(())
    }

    async fn wait(&self) -> Result<oneshot::Receiver<ExitStatus>, RuntimeError> {
        self.waits.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        match self.exit.lock().unwrap().clone() {
            Some(status) => {
                let _ = tx.send(status);
            }
            None => self.waiters.lock().unwrap().push(tx),
        }
        Ok(rx)
    }

    async fn status(&self) -> Result<ProcessStatus, RuntimeError> {
        Ok(*self.status.lock().unwrap())
    }

    async fn close_stdin(&self) -> Result<(), RuntimeError> {
        self.stdin_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn kill(&self, signal: i32) -> Result<(), RuntimeError> {
        self.signals.lock().unwrap().push(signal);
        if self.exits_on.contains(&signal) {
            self.exit(ExitStatus::exited(128 + signal));
        }
        Ok(())
    }

    async fn resize(&self, width: u32, height: u32) -> Result<(), RuntimeError> {
        self.resizes.lock().unwrap().push((width, height));
        Ok(())
    }

    async fn delete(&self) -> Result<(), RuntimeError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// One recorded `exec` call.
#[derive(Debug, Clone)]
pub(crate) struct Exec {
    pub(crate) id: String,
    pub(crate) config: ProcessConfig,
    pub(crate) io: IoMode,
    pub(crate) terminal: bool,
    pub(crate) detached: CancellationToken,
}

pub(crate) struct FakeTask {
    id: String,
    processes: Mutex<HashMap<String, Arc<FakeProcess>>>,
    execs: Mutex<Vec<Exec>>,
    loaded: Mutex<Vec<(String, Option<IoMode>)>>,
    /// Start error handed to the next exec'd process.
    exec_start_error: Mutex<Option<RuntimeError>>,
    pids_error: Mutex<Option<RuntimeError>>,
    pub(crate) starts: AtomicUsize,
}

impl FakeTask {
    pub(crate) fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            processes: Mutex::new(HashMap::new()),
            execs: Mutex::new(Vec::new()),
            loaded: Mutex::new(Vec::new()),
            exec_start_error: Mutex::new(None),
            pids_error: Mutex::new(None),
            starts: AtomicUsize::new(0),
        }
    }

    pub(crate) fn add_process(&self, process: FakeProcess) -> Arc<FakeProcess> {
        let process = Arc::new(process);
        self.processes
            .lock()
            .unwrap()
            .insert(process.id.clone(), Arc::clone(&process));
        process
    }

    pub(crate) fn process(&self, id: &str) -> Option<Arc<FakeProcess>> {
        self.processes.lock().unwrap().get(id).cloned()
    }

    pub(crate) fn fail_next_start(&self, err: RuntimeError) {
        *self.exec_start_error.lock().unwrap() = Some(err);
    }

    pub(crate) fn fail_pids(&self, err: RuntimeError) {
        *self.pids_error.lock().unwrap() = Some(err);
    }

    pub(crate) fn execs(&self) -> Vec<Exec> {
        self.execs.lock().unwrap().clone()
    }

    pub(crate) fn loaded(&self) -> Vec<(String, Option<IoMode>)> {
        self.loaded.lock().unwrap().clone()
    }
}

#[async_trait]
impl RuntimeTask for FakeTask {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start(&self) -> Result<(), RuntimeError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn exec(
        &self,
        id: &str,
        config: &ProcessConfig,
        io: IoBinding,
    ) -> Result<Arc<dyn RuntimeProcess>, RuntimeError> {
        self.execs.lock().unwrap().push(Exec {
            id: id.to_string(),
            config: config.clone(),
            io: io.mode,
            terminal: io.terminal,
            detached: io.detached.clone(),
        });

        let mut process = FakeProcess::created(id);
        if let Some(err) = self.exec_start_error.lock().unwrap().take() {
            process = process.failing_start(err);
        }
        Ok(self.add_process(process))
    }

    async fn load_process(
        &self,
        id: &str,
        io: Option<IoBinding>,
    ) -> Result<Arc<dyn RuntimeProcess>, RuntimeError> {
        self.loaded
            .lock()
            .unwrap()
            .push((id.to_string(), io.map(|binding| binding.mode)));

        match self.process(id) {
            Some(process) => Ok(process),
            None => Err(RuntimeError::NotFound(format!("process {id}"))),
        }
    }

    async fn pids(&self) -> Result<Vec<ProcessInfo>, RuntimeError> {
        if let Some(err) = self.pids_error.lock().unwrap().clone() {
            return Err(err);
        }

        let mut pids = vec![ProcessInfo {
            pid: 1,
            exec_id: None,
        }];
        let processes = self.processes.lock().unwrap();
        let mut ids: Vec<_> = processes
            .values()
            .filter(|p| !p.has_exited())
            .map(|p| p.id.clone())
            .collect();
        ids.sort();
        for (n, id) in ids.into_iter().enumerate() {
            pids.push(ProcessInfo {
                pid: 100 + n as u32,
                exec_id: Some(id),
            });
        }
        Ok(pids)
    }
}

pub(crate) struct FakeContainer {
    id: String,
    spec: Mutex<Result<ContainerSpec, RuntimeError>>,
    task: Mutex<Option<Arc<FakeTask>>>,
    task_error: Mutex<Option<RuntimeError>>,
    labels: Mutex<HashMap<String, String>>,
    task_lookups: Mutex<Vec<InitIo>>,
    new_task_delay: Duration,
    pub(crate) new_tasks: AtomicUsize,
}

impl FakeContainer {
    /// A container with a running task and a default spec.
    pub(crate) fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            spec: Mutex::new(Ok(ContainerSpec::default())),
            task: Mutex::new(Some(Arc::new(FakeTask::new(id)))),
            task_error: Mutex::new(None),
            labels: Mutex::new(HashMap::new()),
            task_lookups: Mutex::new(Vec::new()),
            new_task_delay: Duration::ZERO,
            new_tasks: AtomicUsize::new(0),
        }
    }

    /// A container whose task was lost by the runtime.
    pub(crate) fn without_task(id: &str) -> Self {
        let container = Self::new(id);
        *container.task.lock().unwrap() = None;
        container
    }

    pub(crate) fn with_spec(self, spec: ContainerSpec) -> Self {
        *self.spec.lock().unwrap() = Ok(spec);
        self
    }

    pub(crate) fn with_new_task_delay(mut self, delay: Duration) -> Self {
        self.new_task_delay = delay;
        self
    }

    pub(crate) fn fail_spec(&self, err: RuntimeError) {
        *self.spec.lock().unwrap() = Err(err);
    }

    pub(crate) fn fail_task(&self, err: RuntimeError) {
        *self.task_error.lock().unwrap() = Some(err);
    }

    pub(crate) fn current_task(&self) -> Option<Arc<FakeTask>> {
        self.task.lock().unwrap().clone()
    }

    pub(crate) fn task_lookups(&self) -> Vec<InitIo> {
        self.task_lookups.lock().unwrap().clone()
    }

    pub(crate) fn label(&self, key: &str) -> Option<String> {
        self.labels.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl RuntimeContainer for FakeContainer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn spec(&self) -> Result<ContainerSpec, RuntimeError> {
        self.spec.lock().unwrap().clone()
    }

    async fn task(&self, io: InitIo) -> Result<Arc<dyn RuntimeTask>, RuntimeError> {
        self.task_lookups.lock().unwrap().push(io);
        if let Some(err) = self.task_error.lock().unwrap().clone() {
            return Err(err);
        }
        match self.current_task() {
            Some(task) => Ok(task),
            None => Err(RuntimeError::NotFound(format!("task {}", self.id))),
        }
    }

    async fn new_task(&self) -> Result<Arc<dyn RuntimeTask>, RuntimeError> {
        self.new_tasks.fetch_add(1, Ordering::SeqCst);
        if !self.new_task_delay.is_zero() {
            tokio::time::sleep(self.new_task_delay).await;
        }
        let task = Arc::new(FakeTask::new(&self.id));
        *self.task.lock().unwrap() = Some(Arc::clone(&task));
        Ok(task)
    }

    async fn labels(&self) -> Result<HashMap<String, String>, RuntimeError> {
        Ok(self.labels.lock().unwrap().clone())
    }

    async fn set_labels(
        &self,
        labels: HashMap<String, String>,
    ) -> Result<HashMap<String, String>, RuntimeError> {
        let mut current = self.labels.lock().unwrap();
        current.extend(labels);
        Ok(current.clone())
    }
}

#[derive(Default)]
pub(crate) struct FakeRootfs {
    users: HashMap<String, User>,
    cwds: Mutex<Vec<(PathBuf, PathBuf)>>,
    cwd_error: Mutex<Option<String>>,
}

impl FakeRootfs {
    pub(crate) fn with_user(mut self, name: &str, uid: u32, gid: u32) -> Self {
        self.users.insert(
            name.to_string(),
            User {
                uid,
                gid,
                additional_gids: Vec::new(),
            },
        );
        self
    }

    pub(crate) fn fail_cwd(&self, message: &str) {
        *self.cwd_error.lock().unwrap() = Some(message.to_string());
    }

    pub(crate) fn cwds(&self) -> Vec<(PathBuf, PathBuf)> {
        self.cwds.lock().unwrap().clone()
    }
}

#[async_trait]
impl RootfsManager for FakeRootfs {
    async fn lookup_user(
        &self,
        _rootfs: &Path,
        username: &str,
    ) -> Result<Option<User>, RootfsError> {
        Ok(self.users.get(username).cloned())
    }

    async fn setup_cwd(&self, rootfs: &Path, cwd: &Path) -> Result<(), RootfsError> {
        self.cwds
            .lock()
            .unwrap()
            .push((rootfs.to_path_buf(), cwd.to_path_buf()));

        match self.cwd_error.lock().unwrap().clone() {
            Some(message) => Err(RootfsError::Io {
                path: rootfs.join(cwd),
                source: std::io::Error::other(message),
            }),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub(crate) struct FakeKiller {
    calls: Mutex<Vec<(String, KillBehaviour)>>,
    error: Mutex<Option<KillError>>,
}

impl FakeKiller {
    pub(crate) fn fail(&self, err: KillError) {
        *self.error.lock().unwrap() = Some(err);
    }

    pub(crate) fn calls(&self) -> Vec<(String, KillBehaviour)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Killer for FakeKiller {
    async fn kill(
        &self,
        task: &dyn RuntimeTask,
        behaviour: KillBehaviour,
    ) -> Result<(), KillError> {
        self.calls
            .lock()
            .unwrap()
            .push((task.id().to_string(), behaviour));

        match self.error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
