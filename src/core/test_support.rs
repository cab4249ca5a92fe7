//! Recording fakes shared by the unit tests.

use semver::Version;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::executor::{AsyncCommandExecutor, CommandExecutor, CommandStream, EnvMap, Line};
use crate::project::{CommandName, ProjectContext};
use crate::runtime::{EnvStepRunner, RunStepRunner, StepRunner, StepsRunner};
use crate::vcs::{VcsStatus, VcsStatusUpdater};

#[derive(Debug, Clone)]
pub struct ExecCall {
    pub args: Vec<String>,
    pub envs: EnvMap,
    pub version: Option<Version>,
    pub workspace: String,
}

/// Returns queued responses in order, then `Ok("")`.
#[derive(Default)]
pub struct RecordingExecutor {
    pub calls: Mutex<Vec<ExecCall>>,
    responses: Mutex<VecDeque<Result<String>>>,
}

impl RecordingExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(self: &Arc<Self>, response: Result<String>) -> Arc<Self> {
        self.responses.lock().unwrap().push_back(response);
        self.clone()
    }

    pub fn calls(&self) -> Vec<ExecCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl CommandExecutor for RecordingExecutor {
    fn run_command_with_version(
        &self,
        _ctx: &RequestContext,
        _prj: &ProjectContext,
        _path: &Path,
        args: &[String],
        envs: &EnvMap,
        version: Option<&Version>,
        workspace: &str,
    ) -> Result<String> {
        self.calls.lock().unwrap().push(ExecCall {
            args: args.to_vec(),
            envs: envs.clone(),
            version: version.cloned(),
            workspace: workspace.to_string(),
        });
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()))
    }
}

/// Streams a fixed transcript split on `\n`, then an optional error, and
/// records the first string written to its input.
#[derive(Default)]
pub struct ScriptedAsyncExecutor {
    pub transcript: String,
    pub err: Option<Error>,
    pub called_args: Mutex<Vec<String>>,
    pub passed_input: Arc<Mutex<Option<String>>>,
}

impl ScriptedAsyncExecutor {
    pub fn new(transcript: impl Into<String>, err: Option<Error>) -> Arc<Self> {
        Arc::new(Self {
            transcript: transcript.into(),
            err,
            ..Default::default()
        })
    }

    pub fn passed_input(&self) -> Option<String> {
        self.passed_input.lock().unwrap().clone()
    }
}

impl AsyncCommandExecutor for ScriptedAsyncExecutor {
    fn run_command_async_with_input(
        &self,
        _ctx: &RequestContext,
        _prj: &ProjectContext,
        _path: &Path,
        args: &[String],
        _envs: &EnvMap,
        _version: Option<&Version>,
        _workspace: &str,
        input: Receiver<String>,
    ) -> CommandStream {
        *self.called_args.lock().unwrap() = args.to_vec();

        let (tx, rx) = mpsc::channel();
        let lines: Vec<String> = self.transcript.split('\n').map(str::to_string).collect();
        let err = self.err.clone();
        let passed = self.passed_input.clone();

        let worker = thread::spawn(move || {
            let reader = thread::spawn(move || {
                if let Ok(first) = input.recv() {
                    *passed.lock().unwrap() = Some(first);
                }
                for _ in input {}
            });
            for line in lines {
                let _ = tx.send(Line::Text(line));
            }
            if let Some(err) = err {
                let _ = tx.send(Line::Err(err));
            }
            drop(tx);
            reader.join().unwrap();
        });

        CommandStream::new(rx, worker)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusCall {
    pub command: CommandName,
    pub status: VcsStatus,
    pub run_url: String,
    pub status_id: String,
}

#[derive(Default)]
pub struct RecordingUpdater {
    pub calls: Mutex<Vec<StatusCall>>,
    /// Hand out a fresh `minted-N` id whenever no id is passed in.
    pub mint: bool,
}

impl RecordingUpdater {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn minting() -> Arc<Self> {
        Arc::new(Self {
            mint: true,
            ..Self::default()
        })
    }

    pub fn calls(&self) -> Vec<StatusCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl VcsStatusUpdater for RecordingUpdater {
    fn update_project(
        &self,
        _ctx: &RequestContext,
        _prj: &ProjectContext,
        command: CommandName,
        status: VcsStatus,
        run_url: &str,
        status_id: &str,
    ) -> Result<String> {
        let mut calls = self.calls.lock().unwrap();
        let id = if self.mint && status_id.is_empty() {
            format!("minted-{}", calls.len())
        } else {
            status_id.to_string()
        };
        calls.push(StatusCall {
            command,
            status,
            run_url: run_url.to_string(),
            status_id: status_id.to_string(),
        });
        Ok(id)
    }
}

/// Returns a fixed result and counts invocations.
pub struct StubRunner {
    pub result: Result<String>,
    pub calls: AtomicUsize,
}

impl StubRunner {
    pub fn ok(output: &str) -> Arc<Self> {
        Arc::new(Self {
            result: Ok(output.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn err(err: Error) -> Arc<Self> {
        Arc::new(Self {
            result: Err(err),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl StepRunner for StubRunner {
    fn run(
        &self,
        _ctx: &RequestContext,
        _prj: &ProjectContext,
        _extra_args: &[String],
        _path: &Path,
        _envs: &EnvMap,
    ) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

pub fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Steps runner whose terraform steps are stubs. `env` and `run` are real.
pub fn stub_steps_runner(apply: Arc<dyn StepRunner>) -> StepsRunner {
    let run = Arc::new(RunStepRunner::new(Version::new(1, 5, 7)));
    StepsRunner {
        init: StubRunner::ok("init"),
        plan: StubRunner::ok("plan"),
        show: StubRunner::ok(""),
        policy_check: StubRunner::ok("policies passed"),
        version: StubRunner::ok("Terraform v1.5.7"),
        apply,
        env: EnvStepRunner::new(run.clone()),
        run,
    }
}
