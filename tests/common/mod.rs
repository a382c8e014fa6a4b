#![allow(dead_code)]

use async_trait::async_trait;
use deckhand::configuration::{CatalogSettings, DeployerSettings};
use deckhand::deploy::DeploymentOrchestrator;
use deckhand::ledger::{MemoryStepLedger, StepLedger};
use deckhand::models::{
    ConnectionMode, Credential, EnvironmentOverride, EnvironmentTarget, ModuleConfig, ModuleType,
};
use deckhand::remote::{
    CommandOutput, ExecutorFactory, RemoteError, RemoteExecutor, TailHandle,
};
use deckhand::services::{ConfigResolver, StaticCatalog};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

/// Everything an executor was asked to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect(String),
    Run(String),
    Upload { local: PathBuf, remote: String },
    Tail(String),
    Disconnect,
}

#[derive(Debug, Clone)]
pub enum Reply {
    Output {
        exit_code: u32,
        stdout: String,
        stderr: String,
    },
    CommandTimeout,
    Broken,
    /// Succeeds with `stdout` after a pause, long enough for a caller to give up.
    Delayed { millis: u64, stdout: String },
    /// The executor itself blows up.
    Panic,
}

impl Reply {
    pub fn stdout(stdout: &str) -> Self {
        Reply::Output {
            exit_code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn failure(exit_code: u32, stderr: &str) -> Self {
        Reply::Output {
            exit_code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ConnectFailure {
    Timeout,
    Rejected,
}

/// Shared script and call log behind every executor the factory hands out.
#[derive(Default)]
pub struct Recorder {
    calls: Mutex<Vec<Call>>,
    /// First rule whose needle occurs in the command wins; unmatched commands succeed silently.
    rules: Mutex<Vec<(String, Reply)>>,
    connect_failure: Mutex<Option<ConnectFailure>>,
    tail_chunks: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, needle: &str, reply: Reply) {
        self.rules.lock().unwrap().push((needle.to_string(), reply));
    }

    pub fn fail_connect(&self, failure: ConnectFailure) {
        *self.connect_failure.lock().unwrap() = Some(failure);
    }

    pub fn tail_with(&self, chunks: &[&str]) {
        *self.tail_chunks.lock().unwrap() = chunks.iter().map(|c| c.to_string()).collect();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Run(command) => Some(command),
                _ => None,
            })
            .collect()
    }

    /// Index of the first recorded command containing `needle`.
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.commands()
            .iter()
            .position(|command| command.contains(needle))
    }

    fn reply_for(&self, command: &str) -> Reply {
        self.rules
            .lock()
            .unwrap()
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| Reply::stdout(""))
    }
}

pub struct RecordingExecutor {
    recorder: Arc<Recorder>,
    connected: bool,
}

#[async_trait]
impl RemoteExecutor for RecordingExecutor {
    async fn connect(&mut self, target: &EnvironmentTarget) -> Result<(), RemoteError> {
        self.recorder
            .calls
            .lock()
            .unwrap()
            .push(Call::Connect(target.address()));
        let failure = self.recorder.connect_failure.lock().unwrap().clone();
        match failure {
            Some(ConnectFailure::Timeout) => Err(RemoteError::Timeout {
                addr: target.address(),
                secs: 10,
            }),
            Some(ConnectFailure::Rejected) => Err(RemoteError::Auth {
                user: target.username.clone(),
                addr: target.address(),
                reason: "password rejected".to_string(),
            }),
            None => {
                self.connected = true;
                Ok(())
            }
        }
    }

    async fn run(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        if !self.connected {
            return Err(RemoteError::NotConnected);
        }
        self.recorder
            .calls
            .lock()
            .unwrap()
            .push(Call::Run(command.to_string()));
        match self.recorder.reply_for(command) {
            Reply::Output {
                exit_code,
                stdout,
                stderr,
            } => Ok(CommandOutput {
                exit_code: Some(exit_code),
                stdout,
                stderr,
            }),
            Reply::CommandTimeout => Err(RemoteError::CommandTimeout {
                command: command.to_string(),
                secs: 600,
            }),
            Reply::Broken => Err(RemoteError::Channel("session closed".to_string())),
            Reply::Delayed { millis, stdout } => {
                tokio::time::sleep(std::time::Duration::from_millis(millis)).await;
                Ok(CommandOutput {
                    exit_code: Some(0),
                    stdout,
                    stderr: String::new(),
                })
            }
            Reply::Panic => panic!("executor crashed while running `{}`", command),
        }
    }

    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<(), RemoteError> {
        if !self.connected {
            return Err(RemoteError::NotConnected);
        }
        self.recorder.calls.lock().unwrap().push(Call::Upload {
            local: local_path.to_path_buf(),
            remote: remote_path.to_string(),
        });
        Ok(())
    }

    async fn tail_file(&self, remote_path: &str) -> Result<TailHandle, RemoteError> {
        self.recorder
            .calls
            .lock()
            .unwrap()
            .push(Call::Tail(remote_path.to_string()));
        let chunks = self.recorder.tail_chunks.lock().unwrap().clone();
        let (chunk_tx, chunk_rx) = mpsc::channel(16);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            for chunk in chunks {
                if chunk_tx.send(chunk).await.is_err() {
                    return;
                }
            }
            // keep following until told to stop
            let _ = stop_rx.await;
        });
        Ok(TailHandle::new(chunk_rx, stop_tx, task))
    }

    async fn disconnect(&mut self) {
        self.connected = false;
        self.recorder.calls.lock().unwrap().push(Call::Disconnect);
    }
}

pub struct RecordingFactory {
    pub recorder: Arc<Recorder>,
}

impl ExecutorFactory for RecordingFactory {
    fn executor_for(&self, _target: &EnvironmentTarget) -> Box<dyn RemoteExecutor> {
        Box::new(RecordingExecutor {
            recorder: self.recorder.clone(),
            connected: false,
        })
    }
}

pub const MODULE_ID: i32 = 7;
pub const ENVIRONMENT_ID: i32 = 3;

pub fn binary_module(remote_path: &str) -> ModuleConfig {
    ModuleConfig {
        id: MODULE_ID,
        name: "billing".to_string(),
        module_type: ModuleType::Binary,
        project_base_path: None,
        remote_base_path: remote_path.to_string(),
        backup_path: None,
        start_command: Some("./start.sh".to_string()),
        stop_command: Some("./stop.sh".to_string()),
        restart_command: Some("./restart.sh".to_string()),
        allowed_file_extensions: vec![".jar".to_string(), ".zip".to_string()],
        default_environment_id: Some(ENVIRONMENT_ID),
        log_path: Some("/var/log/billing.log".to_string()),
        operators: vec![],
    }
}

pub fn archive_module(remote_path: &str) -> ModuleConfig {
    ModuleConfig {
        module_type: ModuleType::Archive,
        ..binary_module(remote_path)
    }
}

pub fn environment(mode: ConnectionMode) -> EnvironmentTarget {
    EnvironmentTarget {
        id: ENVIRONMENT_ID,
        name: "staging".to_string(),
        host: "10.0.0.5".to_string(),
        port: 22,
        username: "deploy".to_string(),
        credential: Credential::Password("secret".to_string()),
        connection_mode: mode,
    }
}

pub fn catalog(
    module: ModuleConfig,
    environment: EnvironmentTarget,
    overrides: Vec<EnvironmentOverride>,
) -> Arc<dyn ConfigResolver> {
    Arc::new(StaticCatalog::new(CatalogSettings {
        modules: vec![module],
        environments: vec![environment],
        overrides,
    }))
}

/// No settle pause so Windows scenarios stay fast.
pub fn fast_settings() -> DeployerSettings {
    DeployerSettings {
        windows_settle_ms: 0,
        ..Default::default()
    }
}

pub struct Harness {
    pub orchestrator: DeploymentOrchestrator,
    pub ledger: Arc<MemoryStepLedger>,
    pub recorder: Arc<Recorder>,
}

pub fn harness(catalog: Arc<dyn ConfigResolver>, settings: DeployerSettings) -> Harness {
    let ledger = Arc::new(MemoryStepLedger::new());
    let recorder = Recorder::new();
    let ledger_dyn: Arc<dyn StepLedger> = ledger.clone();
    let orchestrator = DeploymentOrchestrator::new(
        catalog,
        ledger_dyn,
        Arc::new(RecordingFactory {
            recorder: recorder.clone(),
        }),
        settings,
    );
    Harness {
        orchestrator,
        ledger,
        recorder,
    }
}

/// A real file to stand in for the reassembled upload.
pub fn artifact(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}
