//! Child-process supervision for a locally launched analysis backend.

use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct BackendCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    Started { pid: Option<u32> },
    /// `unexpected` is set for a non-zero exit that `stop()` did not cause.
    Exited { code: Option<i32>, unexpected: bool },
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
}

struct Running {
    stop: oneshot::Sender<()>,
    watcher: JoinHandle<()>,
}

/// Launches the backend, forwards its output to the log, and reports exits.
pub struct BackendSupervisor {
    command: BackendCommand,
    events: mpsc::UnboundedSender<BackendEvent>,
    running: Option<Running>,
}

impl BackendSupervisor {
    pub fn new(command: BackendCommand) -> (Self, mpsc::UnboundedReceiver<BackendEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                command,
                events,
                running: None,
            },
            rx,
        )
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|r| !r.watcher.is_finished())
    }

    /// Launch the backend unless it is already running.
    pub fn start(&mut self) -> Result<(), SupervisorError> {
        if self.is_running() {
            return Ok(());
        }

        let program = self.command.program.display().to_string();
        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.command.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| SupervisorError::Spawn {
            program: program.clone(),
            source,
        })?;
        let pid = child.id();
        tracing::info!(%program, ?pid, "backend started");

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, false));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, true));
        }
        let _ = self.events.send(BackendEvent::Started { pid });

        let (stop_tx, stop_rx) = oneshot::channel();
        let events = self.events.clone();
        let watcher = tokio::spawn(async move {
            let (status, requested) = tokio::select! {
                status = child.wait() => (status, false),
                _ = stop_rx => {
                    if let Err(e) = child.start_kill() {
                        tracing::warn!(error = %e, "failed to signal backend");
                    }
                    (child.wait().await, true)
                }
            };

            let code = match status {
                Ok(status) => status.code(),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to reap backend");
                    None
                }
            };
            let unexpected = !requested && code != Some(0);
            if unexpected {
                tracing::warn!(?code, "backend exited unexpectedly");
            } else {
                tracing::info!(?code, "backend exited");
            }
            let _ = events.send(BackendEvent::Exited { code, unexpected });
        });

        self.running = Some(Running {
            stop: stop_tx,
            watcher,
        });
        Ok(())
    }

    /// Terminate the backend and wait for it to be reaped.
    pub async fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.stop.send(());
            let _ = running.watcher.await;
        }
    }

    pub async fn restart(&mut self) -> Result<(), SupervisorError> {
        tracing::info!("restarting backend");
        self.stop().await;
        self.start()
    }
}

async fn forward_lines<R: AsyncRead + Unpin>(reader: R, is_stderr: bool) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if is_stderr {
            tracing::warn!(target: "backend", "{line}");
        } else {
            tracing::info!(target: "backend", "{line}");
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn shell(script: &str) -> BackendCommand {
        BackendCommand {
            program: PathBuf::from("sh"),
            args: vec!["-c".into(), script.into()],
            working_dir: None,
        }
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<BackendEvent>) -> BackendEvent {
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("event in time")
            .expect("channel open")
    }

    #[tokio::test]
    async fn test_crash_reported_as_unexpected() {
        let (mut supervisor, mut rx) = BackendSupervisor::new(shell("echo booting; exit 3"));
        supervisor.start().unwrap();
        assert!(matches!(next(&mut rx).await, BackendEvent::Started { pid: Some(_) }));
        assert_eq!(
            next(&mut rx).await,
            BackendEvent::Exited {
                code: Some(3),
                unexpected: true
            }
        );
    }

    #[tokio::test]
    async fn test_clean_exit_is_expected() {
        let (mut supervisor, mut rx) = BackendSupervisor::new(shell("exit 0"));
        supervisor.start().unwrap();
        next(&mut rx).await;
        assert_eq!(
            next(&mut rx).await,
            BackendEvent::Exited {
                code: Some(0),
                unexpected: false
            }
        );
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn test_stop_kills_without_crash_report() {
        let (mut supervisor, mut rx) = BackendSupervisor::new(shell("sleep 30"));
        supervisor.start().unwrap();
        next(&mut rx).await;
        assert!(supervisor.is_running());

        supervisor.stop().await;
        assert!(matches!(
            next(&mut rx).await,
            BackendEvent::Exited {
                unexpected: false,
                ..
            }
        ));
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn test_restart_launches_again() {
        let (mut supervisor, mut rx) = BackendSupervisor::new(shell("sleep 30"));
        supervisor.start().unwrap();
        next(&mut rx).await;

        supervisor.restart().await.unwrap();
        assert!(matches!(next(&mut rx).await, BackendEvent::Exited { .. }));
        assert!(matches!(next(&mut rx).await, BackendEvent::Started { .. }));
        assert!(supervisor.is_running());
        supervisor.stop().await;
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let (mut supervisor, _rx) = BackendSupervisor::new(BackendCommand {
            program: PathBuf::from("/nonexistent/facecam-backend"),
            args: Vec::new(),
            working_dir: None,
        });
        assert!(matches!(supervisor.start(), Err(SupervisorError::Spawn { .. })));
    }
}
