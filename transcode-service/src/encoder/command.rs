//! Subprocess plumbing shared by every encoder operation
//!
//! Children are spawned into their own process group so cancellation can
//! kill ffmpeg together with any helpers it forks. Stderr is drained into a
//! bounded tail that gets attached to `EncoderFailure`.

use crate::error::{AppError, Result};
use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::progress::{parse_progress_line, ProgressSink};

/// Lines of stderr kept for error reporting.
const STDERR_TAIL_LINES: usize = 20;

/// Grace period between SIGTERM and SIGKILL on cancellation.
const KILL_GRACE_MS: u64 = 2_000;

#[derive(Clone)]
pub struct CommandRunner {
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl CommandRunner {
    pub fn new(ffmpeg_path: impl Into<String>, ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
        }
    }

    fn command(&self, program: &str) -> Command {
        let mut cmd = Command::new(program);
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        #[cfg(unix)]
        unsafe {
            // New process group per child; see kill_process_group.
            cmd.pre_exec(|| {
                libc::setpgid(0, 0);
                Ok(())
            });
        }
        cmd
    }

    fn ffmpeg_command(&self, args: &[String]) -> Command {
        let mut cmd = self.command(&self.ffmpeg_path);
        cmd.arg("-hide_banner").arg("-nostdin").arg("-y").args(args);
        cmd
    }

    /// Run ffmpeg to completion, discarding output.
    pub async fn run_ffmpeg(&self, args: &[String], cancel: &CancellationToken) -> Result<()> {
        let mut cmd = self.ffmpeg_command(args);
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::piped());
        debug!(args = ?args, "spawning ffmpeg");

        let mut child = cmd
            .spawn()
            .map_err(|e| AppError::TransientIo(format!("failed to spawn ffmpeg: {e}")))?;

        let stderr_task = spawn_stderr_tail(&mut child);
        wait_for_exit(child, stderr_task, None, cancel).await?;
        Ok(())
    }

    /// Run ffmpeg to completion and return the captured stderr. Used by the
    /// operations that scrape measurements out of filter logs.
    pub async fn run_ffmpeg_capture_stderr(
        &self,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<String> {
        let mut cmd = self.ffmpeg_command(args);
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::piped());
        debug!(args = ?args, "spawning ffmpeg (capture)");

        let mut child = cmd
            .spawn()
            .map_err(|e| AppError::TransientIo(format!("failed to spawn ffmpeg: {e}")))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Internal("ffmpeg stderr not piped".to_string()))?;

        let capture = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut out = String::new();
            while let Ok(Some(line)) = lines.next_line().await {
                out.push_str(&line);
                out.push('\n');
            }
            out
        });

        let pid = child.id();
        let status = tokio::select! {
            status = child.wait() => status
                .map_err(|e| AppError::TransientIo(format!("ffmpeg wait failed: {e}")))?,
            _ = cancel.cancelled() => {
                kill_child(pid, &mut child).await;
                return Err(AppError::Cancelled);
            }
        };

        let stderr_text = capture.await.unwrap_or_default();
        if !status.success() {
            return Err(AppError::encoder(
                exit_description(&status),
                tail_of(&stderr_text),
            ));
        }
        Ok(stderr_text)
    }

    /// Run ffmpeg with `-progress pipe:1`, forwarding parsed percentages to
    /// `sink`. `map` rescales raw percent (two-pass runs use it to split the
    /// 0..100 range between passes).
    pub async fn run_ffmpeg_with_progress(
        &self,
        args: &[String],
        total_duration: Option<f64>,
        sink: Arc<dyn ProgressSink>,
        map: impl Fn(f64) -> f64 + Send + 'static,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut full_args = vec![
            "-progress".to_string(),
            "pipe:1".to_string(),
            "-nostats".to_string(),
        ];
        full_args.extend_from_slice(args);

        let mut cmd = self.ffmpeg_command(&full_args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        debug!(args = ?full_args, "spawning ffmpeg (progress)");

        let mut child = cmd
            .spawn()
            .map_err(|e| AppError::TransientIo(format!("failed to spawn ffmpeg: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Internal("ffmpeg stdout not piped".to_string()))?;

        let progress_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut last_percent = 0.0f64;
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(seconds) = parse_progress_line(&line) {
                    if let Some(total) = total_duration.filter(|t| *t > 0.0) {
                        let percent = (seconds / total * 100.0).min(100.0);
                        let mapped = map(percent).clamp(0.0, 100.0);
                        if mapped > last_percent {
                            last_percent = mapped;
                            sink.report(mapped);
                        }
                    }
                } else if line.trim() == "progress=end" {
                    let mapped = map(100.0).clamp(0.0, 100.0);
                    if mapped > last_percent {
                        sink.report(mapped);
                    }
                }
            }
        });

        let stderr_task = spawn_stderr_tail(&mut child);
        let result = wait_for_exit(child, stderr_task, Some(progress_task), cancel).await;
        result
    }

    /// Spawn ffmpeg without waiting; used by the live encode session which
    /// manages its own child lifetime.
    pub fn spawn_ffmpeg_raw(
        &self,
        args: &[String],
        stdout: Stdio,
        stderr: Stdio,
    ) -> std::io::Result<Child> {
        let mut cmd = self.ffmpeg_command(args);
        cmd.stdout(stdout);
        cmd.stderr(stderr);
        cmd.spawn()
    }

    /// Run ffprobe and return its stdout.
    pub async fn run_ffprobe(&self, args: &[String], cancel: &CancellationToken) -> Result<String> {
        let mut cmd = self.command(&self.ffprobe_path);
        cmd.args(args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let child = cmd
            .spawn()
            .map_err(|e| AppError::TransientIo(format!("failed to spawn ffprobe: {e}")))?;

        let output = tokio::select! {
            output = child.wait_with_output() => output
                .map_err(|e| AppError::TransientIo(format!("ffprobe wait failed: {e}")))?,
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::InvalidMedia(format!(
                "ffprobe {}: {}",
                exit_description(&output.status),
                tail_of(&stderr)
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Path rendered for an ffmpeg argument.
pub fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn exit_description(status: &std::process::ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("ffmpeg exited with status {code}"),
        None => "ffmpeg terminated by signal".to_string(),
    }
}

fn tail_of(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

fn spawn_stderr_tail(child: &mut Child) -> tokio::task::JoinHandle<String> {
    let stderr = child.stderr.take();
    tokio::spawn(async move {
        let Some(stderr) = stderr else {
            return String::new();
        };
        let mut lines = BufReader::new(stderr).lines();
        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
        while let Ok(Some(line)) = lines.next_line().await {
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
        tail.into_iter().collect::<Vec<_>>().join("\n")
    })
}

async fn wait_for_exit(
    mut child: Child,
    stderr_task: tokio::task::JoinHandle<String>,
    progress_task: Option<tokio::task::JoinHandle<()>>,
    cancel: &CancellationToken,
) -> Result<()> {
    let pid = child.id();
    let status = tokio::select! {
        status = child.wait() => status
            .map_err(|e| AppError::TransientIo(format!("ffmpeg wait failed: {e}")))?,
        _ = cancel.cancelled() => {
            kill_child(pid, &mut child).await;
            if let Some(task) = progress_task {
                task.abort();
            }
            stderr_task.abort();
            return Err(AppError::Cancelled);
        }
    };

    if let Some(task) = progress_task {
        let _ = task.await;
    }
    let stderr_tail = stderr_task.await.unwrap_or_default();

    if !status.success() {
        return Err(AppError::encoder(exit_description(&status), stderr_tail));
    }
    Ok(())
}

/// Kill the child's whole process group: SIGTERM first so ffmpeg can flush
/// its outputs, SIGKILL after the grace period.
pub(super) async fn terminate_child(pid: Option<u32>, child: &mut Child) {
    kill_child(pid, child).await
}

async fn kill_child(pid: Option<u32>, child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        kill_process_group(pid, libc::SIGTERM);
        let deadline = tokio::time::Instant::now() + tokio::time::Duration::from_millis(KILL_GRACE_MS);
        loop {
            match child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) if tokio::time::Instant::now() < deadline => {
                    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
                }
                _ => break,
            }
        }
        kill_process_group(pid, libc::SIGKILL);
    }

    if let Err(e) = child.kill().await {
        warn!("failed to kill encoder child: {e}");
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32, signal: i32) {
    unsafe {
        libc::killpg(pid as i32, signal);
    }
}
