//! Subprocess execution for terraform and shell steps.
//!
//! Two capability contracts live here: a synchronous executor that returns
//! combined output, and a streaming executor that hands back a line stream
//! plus an input sink for interactive prompts. `LocalExecutor` implements
//! both by shelling out with `sh -c`.

use semver::Version;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::context::{RequestContext, POLL_INTERVAL};
use crate::error::{CommandFailedDetails, Error, Result};
use crate::project::ProjectContext;
use crate::runtime::remote_apply::CONFIRM_PROMPT;
use crate::utils::shell;

/// Environment variables accumulated by `env` steps.
pub type EnvMap = HashMap<String, String>;

pub trait CommandExecutor: Send + Sync {
    /// Run terraform with `args` in `path` and return its combined output.
    #[allow(clippy::too_many_arguments)]
    fn run_command_with_version(
        &self,
        ctx: &RequestContext,
        prj: &ProjectContext,
        path: &Path,
        args: &[String],
        envs: &EnvMap,
        version: Option<&Version>,
        workspace: &str,
    ) -> Result<String>;

    /// Like `run_command_with_version` but returns stdout alone, for output
    /// that is parsed rather than shown. Executors that cannot separate the
    /// streams return combined output.
    #[allow(clippy::too_many_arguments)]
    fn run_command_stdout_with_version(
        &self,
        ctx: &RequestContext,
        prj: &ProjectContext,
        path: &Path,
        args: &[String],
        envs: &EnvMap,
        version: Option<&Version>,
        workspace: &str,
    ) -> Result<String> {
        self.run_command_with_version(ctx, prj, path, args, envs, version, workspace)
    }
}

pub trait AsyncCommandExecutor: Send + Sync {
    /// Start terraform and stream its output line by line. Strings received
    /// on `input` are written to the process's stdin as-is.
    #[allow(clippy::too_many_arguments)]
    fn run_command_async_with_input(
        &self,
        ctx: &RequestContext,
        prj: &ProjectContext,
        path: &Path,
        args: &[String],
        envs: &EnvMap,
        version: Option<&Version>,
        workspace: &str,
        input: Receiver<String>,
    ) -> CommandStream;
}

/// One item of a streamed command: a line of text, or the terminal error.
#[derive(Debug, Clone)]
pub enum Line {
    Text(String),
    Err(Error),
}

/// Output side of a streamed command.
///
/// The stream ends when every sender is dropped. `finish` joins the worker
/// that owns the process so nothing outlives the caller.
pub struct CommandStream {
    lines: Receiver<Line>,
    worker: Option<JoinHandle<()>>,
}

impl CommandStream {
    pub fn new(lines: Receiver<Line>, worker: JoinHandle<()>) -> Self {
        Self {
            lines,
            worker: Some(worker),
        }
    }

    /// A stream with no backing worker, fed entirely by `lines`.
    pub fn detached(lines: Receiver<Line>) -> Self {
        Self {
            lines,
            worker: None,
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> std::result::Result<Line, RecvTimeoutError> {
        self.lines.recv_timeout(timeout)
    }

    /// Drain anything left on the stream, then join the worker.
    pub fn finish(mut self) -> Vec<Line> {
        let rest: Vec<Line> = self.lines.iter().collect();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("command stream worker panicked");
            }
        }
        rest
    }
}

/// Captured result of a shell invocation.
#[derive(Debug, Clone)]
pub struct ShellOutput {
    pub output: String,
    pub status: ExitStatus,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.status.code()
    }
}

fn shell_command(command_line: &str) -> Command {
    #[cfg(windows)]
    let cmd = {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command_line]);
        cmd
    };

    #[cfg(not(windows))]
    let cmd = {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command_line]);
        cmd
    };

    cmd
}

/// Run `command_line` through the shell in `dir`, capturing stdout and stderr
/// interleaved into one buffer. A cancelled context kills the process.
pub fn run_shell(
    ctx: &RequestContext,
    command_line: &str,
    dir: &Path,
    envs: &[(String, String)],
) -> Result<ShellOutput> {
    let (out, _) = capture(ctx, command_line, dir, envs, false)?;
    Ok(out)
}

/// Like `run_shell`, but `output` holds stdout only. Stderr comes back as
/// the second value.
pub fn run_shell_split(
    ctx: &RequestContext,
    command_line: &str,
    dir: &Path,
    envs: &[(String, String)],
) -> Result<(ShellOutput, String)> {
    capture(ctx, command_line, dir, envs, true)
}

fn capture(
    ctx: &RequestContext,
    command_line: &str,
    dir: &Path,
    envs: &[(String, String)],
    split: bool,
) -> Result<(ShellOutput, String)> {
    ctx.check("command start")?;

    let mut child = shell_command(command_line)
        .current_dir(dir)
        .envs(envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::command_spawn_failed(command_line, e))?;

    let primary = Mutex::new(Vec::new());
    let secondary = Mutex::new(Vec::new());
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let status = thread::scope(|s| {
        let primary = &primary;
        let err_sink = if split { &secondary } else { primary };
        if let Some(out) = stdout {
            s.spawn(move || copy_into(out, primary));
        }
        if let Some(err) = stderr {
            s.spawn(move || copy_into(err, err_sink));
        }
        wait_with_cancel(&mut child, ctx, command_line)
    })?;

    let text = |sink: Mutex<Vec<u8>>| {
        sink.into_inner()
            .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
            .map_err(|_| Error::internal_unexpected("command output buffer poisoned"))
    };

    Ok((
        ShellOutput {
            output: text(primary)?,
            status,
        },
        text(secondary)?,
    ))
}

fn copy_into<R: Read>(mut reader: R, sink: &Mutex<Vec<u8>>) {
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if let Ok(mut out) = sink.lock() {
                    out.extend_from_slice(&buf[..n]);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
}

fn wait_with_cancel(child: &mut Child, ctx: &RequestContext, command_line: &str) -> Result<ExitStatus> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {}
            Err(e) => {
                return Err(Error::internal_io(
                    e.to_string(),
                    Some(format!("wait for {:?}", command_line)),
                ))
            }
        }

        if ctx.is_cancelled() {
            tracing::info!(command = command_line, "cancelling running command");
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::request_cancelled(format!("{:?}", command_line)));
        }

        thread::sleep(POLL_INTERVAL);
    }
}

/// Split a byte stream into lines and send them on `tx`.
///
/// A trailing partial line that ends in the confirmation prompt is flushed
/// immediately: the process is blocked on stdin and will not print a
/// newline until it gets an answer. The newline that later closes that
/// prompt line is not reported as a line of its own.
pub(crate) fn stream_lines<R: Read>(mut reader: R, tx: &Sender<Line>) {
    let mut pending: Vec<u8> = Vec::new();
    let mut buf = [0u8; 4096];
    let mut after_prompt = false;

    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                pending.extend_from_slice(&buf[..n]);
                while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = pending.drain(..=pos).collect();
                    let text = String::from_utf8_lossy(&line[..line.len() - 1]);
                    let text = text.trim_end_matches('\r');
                    if std::mem::take(&mut after_prompt) && text.is_empty() {
                        continue;
                    }
                    if tx.send(Line::Text(text.to_string())).is_err() {
                        return;
                    }
                }
                let partial = String::from_utf8_lossy(&pending).to_string();
                if partial.trim_end().ends_with(CONFIRM_PROMPT) {
                    pending.clear();
                    after_prompt = true;
                    if tx.send(Line::Text(partial)).is_err() {
                        return;
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }

    if !pending.is_empty() {
        let _ = tx.send(Line::Text(String::from_utf8_lossy(&pending).to_string()));
    }
}

fn pump_input(input: Receiver<String>, stdin: Option<ChildStdin>) {
    let Some(mut stdin) = stdin else {
        // Keep draining so senders never see a closed channel mid-exchange.
        for _ in input {}
        return;
    };
    for text in input {
        if stdin.write_all(text.as_bytes()).and_then(|_| stdin.flush()).is_err() {
            break;
        }
    }
}

/// Runs terraform on this host.
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    pub terraform_binary: String,
    /// Directory of `terraform<version>` binaries.
    pub bin_dir: Option<PathBuf>,
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self {
            terraform_binary: "terraform".to_string(),
            bin_dir: None,
        }
    }
}

impl LocalExecutor {
    pub fn new(terraform_binary: impl Into<String>, bin_dir: Option<PathBuf>) -> Self {
        Self {
            terraform_binary: terraform_binary.into(),
            bin_dir,
        }
    }

    pub fn from_defaults(defaults: &crate::defaults::Defaults) -> Self {
        let bin_dir = defaults
            .terraform_bin_dir
            .as_deref()
            .map(|dir| PathBuf::from(shellexpand::tilde(dir).into_owned()))
            .or_else(|| crate::paths::bin().ok());
        Self::new(defaults.terraform_binary.clone(), bin_dir)
    }

    /// Prefer a binary pinned to `version`, else the configured default.
    pub fn resolve_binary(&self, version: Option<&Version>) -> String {
        if let (Some(version), Some(dir)) = (version, self.bin_dir.as_ref()) {
            let candidate = dir.join(format!("terraform{}", version));
            if candidate.is_file() {
                return candidate.to_string_lossy().to_string();
            }
        }
        self.terraform_binary.clone()
    }

    fn command_line(&self, args: &[String], version: Option<&Version>) -> String {
        let binary = shell::quote_arg(&self.resolve_binary(version));
        if args.is_empty() {
            binary
        } else {
            format!("{} {}", binary, args.join(" "))
        }
    }

    fn command_env(
        &self,
        path: &Path,
        envs: &EnvMap,
        version: Option<&Version>,
        workspace: &str,
    ) -> Vec<(String, String)> {
        let mut vars = vec![
            ("TF_IN_AUTOMATION".to_string(), "true".to_string()),
            ("WORKSPACE".to_string(), workspace.to_string()),
            ("DIR".to_string(), path.to_string_lossy().to_string()),
        ];
        if let Some(version) = version {
            vars.push(("TERRAFORM_VERSION".to_string(), version.to_string()));
        }
        let mut custom: Vec<_> = envs.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        custom.sort();
        vars.extend(custom);
        vars
    }
}

impl CommandExecutor for LocalExecutor {
    fn run_command_with_version(
        &self,
        ctx: &RequestContext,
        prj: &ProjectContext,
        path: &Path,
        args: &[String],
        envs: &EnvMap,
        version: Option<&Version>,
        workspace: &str,
    ) -> Result<String> {
        let command_line = self.command_line(args, version);
        let vars = self.command_env(path, envs, version, workspace);

        tracing::debug!(
            repo = %prj.base_repo.full_name,
            pull = prj.pull.num,
            workspace,
            command = %command_line,
            "running terraform"
        );

        let out = run_shell(ctx, &command_line, path, &vars)?;
        if !out.success() {
            return Err(command_failed(&command_line, path, &out));
        }
        Ok(out.output)
    }

    fn run_command_stdout_with_version(
        &self,
        ctx: &RequestContext,
        prj: &ProjectContext,
        path: &Path,
        args: &[String],
        envs: &EnvMap,
        version: Option<&Version>,
        workspace: &str,
    ) -> Result<String> {
        let command_line = self.command_line(args, version);
        let vars = self.command_env(path, envs, version, workspace);

        tracing::debug!(
            repo = %prj.base_repo.full_name,
            pull = prj.pull.num,
            workspace,
            command = %command_line,
            "running terraform for stdout"
        );

        let (out, stderr) = run_shell_split(ctx, &command_line, path, &vars)?;
        if !out.success() {
            let combined = ShellOutput {
                output: format!("{}{}", out.output, stderr),
                status: out.status,
            };
            return Err(command_failed(&command_line, path, &combined));
        }
        if !stderr.trim().is_empty() {
            tracing::debug!(command = %command_line, stderr = %stderr.trim_end(), "terraform wrote to stderr");
        }
        Ok(out.output)
    }
}

impl AsyncCommandExecutor for LocalExecutor {
    fn run_command_async_with_input(
        &self,
        ctx: &RequestContext,
        prj: &ProjectContext,
        path: &Path,
        args: &[String],
        envs: &EnvMap,
        version: Option<&Version>,
        workspace: &str,
        input: Receiver<String>,
    ) -> CommandStream {
        let command_line = self.command_line(args, version);
        let vars = self.command_env(path, envs, version, workspace);
        let dir = path.to_path_buf();
        let ctx = ctx.clone();
        let (tx, rx) = mpsc::channel();

        tracing::debug!(
            repo = %prj.base_repo.full_name,
            pull = prj.pull.num,
            workspace,
            command = %command_line,
            "streaming terraform"
        );

        let worker = thread::spawn(move || {
            let spawned = shell_command(&command_line)
                .current_dir(&dir)
                .envs(vars.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn();

            let mut child = match spawned {
                Ok(child) => child,
                Err(e) => {
                    let _ = tx.send(Line::Err(Error::command_spawn_failed(&command_line, e)));
                    for _ in input {}
                    return;
                }
            };

            let stdin = child.stdin.take();
            let stdout = child.stdout.take();
            let stderr = child.stderr.take();
            let pump = thread::spawn(move || pump_input(input, stdin));

            let waited = thread::scope(|s| {
                if let Some(out) = stdout {
                    let tx = tx.clone();
                    s.spawn(move || stream_lines(out, &tx));
                }
                if let Some(err) = stderr {
                    let tx = tx.clone();
                    s.spawn(move || stream_lines(err, &tx));
                }
                wait_with_cancel(&mut child, &ctx, &command_line)
            });

            match waited {
                Ok(status) if status.success() => {}
                Ok(status) => {
                    let message = format!(
                        "running {:?} in {:?}: {}",
                        command_line,
                        dir.display().to_string(),
                        describe_status(&status)
                    );
                    let _ = tx.send(Line::Err(Error::command_failed(
                        message,
                        CommandFailedDetails {
                            command: command_line.clone(),
                            dir: dir.display().to_string(),
                            exit_code: status.code(),
                            output: String::new(),
                        },
                    )));
                }
                Err(e) => {
                    let _ = tx.send(Line::Err(e));
                }
            }

            // Closing the stream lets the reader drop its input sender,
            // which in turn ends the stdin pump.
            drop(tx);
            let _ = pump.join();
        });

        CommandStream::new(rx, worker)
    }
}

pub(crate) fn describe_status(status: &ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit status {}", code),
        None => "terminated by signal".to_string(),
    }
}

fn command_failed(command_line: &str, path: &Path, out: &ShellOutput) -> Error {
    let message = format!(
        "running {:?} in {:?}: {}\n{}",
        command_line,
        path.display().to_string(),
        describe_status(&out.status),
        out.output
    );
    Error::command_failed(
        message,
        CommandFailedDetails {
            command: command_line.to_string(),
            dir: path.display().to_string(),
            exit_code: out.exit_code(),
            output: out.output.clone(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn collect(input: &str) -> Vec<String> {
        let (tx, rx) = mpsc::channel();
        stream_lines(Cursor::new(input.as_bytes().to_vec()), &tx);
        drop(tx);
        rx.iter()
            .map(|line| match line {
                Line::Text(text) => text,
                Line::Err(e) => panic!("unexpected error line: {}", e),
            })
            .collect()
    }

    #[test]
    fn stream_lines_splits_and_keeps_trailing_partial() {
        assert_eq!(collect("a\nb\r\n\nlast"), vec!["a", "b", "", "last"]);
    }

    struct Chunked(std::collections::VecDeque<&'static [u8]>);

    impl Read for Chunked {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.0.pop_front() {
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(chunk);
                    Ok(chunk.len())
                }
                None => Ok(0),
            }
        }
    }

    #[test]
    fn stream_lines_prompt_line_is_reported_once() {
        let (tx, rx) = mpsc::channel();
        let reader = Chunked(vec![&b"  Enter a value: "[..], &b"\n\nApply complete!\n"[..]].into());
        stream_lines(reader, &tx);
        drop(tx);
        let chunked: Vec<String> = rx
            .iter()
            .filter_map(|line| match line {
                Line::Text(text) => Some(text),
                Line::Err(_) => None,
            })
            .collect();

        assert_eq!(chunked, vec!["  Enter a value: ", "", "Apply complete!"]);
        assert_eq!(collect("  Enter a value: \n\nApply complete!\n"), chunked);
    }

    #[test]
    fn stream_lines_flushes_prompt_without_newline() {
        let lines = collect("Only 'yes' will be accepted to approve.\n\n  Enter a value: ");
        assert_eq!(lines.last().unwrap(), "  Enter a value: ");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn run_shell_captures_stdout_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_shell(
            &RequestContext::new(),
            "echo out; echo err 1>&2",
            dir.path(),
            &[],
        )
        .unwrap();
        assert!(out.success());
        assert!(out.output.contains("out\n"));
        assert!(out.output.contains("err\n"));
    }

    #[test]
    fn run_shell_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_shell(&RequestContext::new(), "exit 3", dir.path(), &[]).unwrap();
        assert!(!out.success());
        assert_eq!(out.exit_code(), Some(3));
    }

    #[test]
    fn run_shell_refuses_cancelled_context() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RequestContext::new();
        ctx.cancel();
        let err = run_shell(&ctx, "echo never", dir.path(), &[]).unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn local_executor_runs_binary_with_args_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let exec = LocalExecutor::new("echo", None);
        let mut envs = EnvMap::new();
        envs.insert("EXTRA".to_string(), "x".to_string());
        let out = exec
            .run_command_with_version(
                &RequestContext::new(),
                &ProjectContext::default(),
                dir.path(),
                &["init".to_string(), "-input=false".to_string()],
                &envs,
                None,
                "staging",
            )
            .unwrap();
        assert_eq!(out, "init -input=false\n");
    }

    #[test]
    fn local_executor_failure_includes_output() {
        let dir = tempfile::tempdir().unwrap();
        let exec = LocalExecutor::new("sh", None);
        let err = exec
            .run_command_with_version(
                &RequestContext::new(),
                &ProjectContext::default(),
                dir.path(),
                &["-c".to_string(), "'echo boom; exit 2'".to_string()],
                &EnvMap::new(),
                None,
                "default",
            )
            .unwrap_err();
        assert_eq!(err.code.as_str(), "command.failed");
        assert!(err.message.contains("exit status 2"));
        assert!(err.message.ends_with("boom\n"));
    }

    #[test]
    fn run_shell_split_keeps_stderr_apart() {
        let dir = tempfile::tempdir().unwrap();
        let (out, stderr) = run_shell_split(
            &RequestContext::new(),
            "echo out; echo err 1>&2",
            dir.path(),
            &[],
        )
        .unwrap();
        assert_eq!(out.output, "out\n");
        assert_eq!(stderr, "err\n");
    }

    #[test]
    fn local_executor_stdout_excludes_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let exec = LocalExecutor::new("sh", None);
        let run = |script: &str| {
            exec.run_command_stdout_with_version(
                &RequestContext::new(),
                &ProjectContext::default(),
                dir.path(),
                &["-c".to_string(), format!("'{}'", script)],
                &EnvMap::new(),
                None,
                "default",
            )
        };

        let out = run("echo \"{}\"; echo \"Warning: deprecated\" >&2").unwrap();
        assert_eq!(out, "{}\n");

        let err = run("echo partial; echo \"Error: no plan\" >&2; exit 1").unwrap_err();
        assert_eq!(err.code.as_str(), "command.failed");
        assert!(err.message.ends_with("partial\nError: no plan\n"));
    }

    #[test]
    fn resolve_binary_prefers_versioned_binary() {
        let dir = tempfile::tempdir().unwrap();
        let pinned = dir.path().join("terraform0.12.31");
        std::fs::write(&pinned, "").unwrap();
        let exec = LocalExecutor::new("terraform", Some(dir.path().to_path_buf()));

        assert_eq!(
            exec.resolve_binary(Some(&Version::new(0, 12, 31))),
            pinned.to_string_lossy()
        );
        assert_eq!(exec.resolve_binary(Some(&Version::new(1, 0, 0))), "terraform");
        assert_eq!(exec.resolve_binary(None), "terraform");
    }

    #[test]
    fn async_executor_streams_lines_and_accepts_input() {
        let dir = tempfile::tempdir().unwrap();
        let exec = LocalExecutor::new("sh", None);
        let (in_tx, in_rx) = mpsc::channel();
        let stream = exec.run_command_async_with_input(
            &RequestContext::new(),
            &ProjectContext::default(),
            dir.path(),
            &[
                "-c".to_string(),
                "'printf \"ready\\n  Enter a value: \"; read answer; echo got=$answer'".to_string(),
            ],
            &EnvMap::new(),
            None,
            "default",
            in_rx,
        );

        let mut seen = Vec::new();
        loop {
            match stream.recv_timeout(Duration::from_secs(5)) {
                Ok(Line::Text(text)) => {
                    let at_prompt = text.trim_end().ends_with(CONFIRM_PROMPT);
                    seen.push(text);
                    if at_prompt {
                        in_tx.send("yes\n".to_string()).unwrap();
                    }
                }
                Ok(Line::Err(e)) => panic!("unexpected error: {}", e),
                Err(_) => break,
            }
        }
        drop(in_tx);
        stream.finish();

        assert_eq!(seen, vec!["ready", "  Enter a value: ", "got=yes"]);
    }

    #[test]
    fn async_executor_kills_process_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let exec = LocalExecutor::new("exec", None);
        let ctx = RequestContext::new();
        let (in_tx, in_rx) = mpsc::channel::<String>();
        let started = std::time::Instant::now();
        let stream = exec.run_command_async_with_input(
            &ctx,
            &ProjectContext::default(),
            dir.path(),
            &["sleep".to_string(), "5".to_string()],
            &EnvMap::new(),
            None,
            "default",
            in_rx,
        );

        thread::sleep(Duration::from_millis(200));
        ctx.cancel();
        drop(in_tx);
        let lines = stream.finish();

        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(lines
            .iter()
            .any(|line| matches!(line, Line::Err(e) if e.is_cancelled())));
    }
}
