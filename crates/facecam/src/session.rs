//! Capture-analyze-render loop.
//!
//! A single task owns the loop state and serializes every transition:
//! manual triggers, auto-mode ticks, request completions and camera
//! recovery all pass through it. In-flight work lives in owned slots so
//! that teardown or disabling auto-mode cancels it by dropping the slot.

use crate::client::{AnalysisBackend, AnalysisError};
use async_trait::async_trait;
use facecam_core::labels::{Locale, Text};
use facecam_core::presenter::{Presentation, Presenter};
use facecam_core::{AnalysisResult, RegisterReply};
use facecam_hw::frame::FrameError;
use facecam_hw::{CaptureError, Frame, StreamInfo};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, Sleep};

/// Live frames as the session sees them.
#[async_trait]
pub trait FrameProvider: Send + Sync {
    async fn start(&self) -> Result<StreamInfo, CaptureError>;
    async fn snapshot(&self) -> Result<Frame, CaptureError>;
    async fn stop(&self);
    fn is_frame_ready(&self) -> bool;
}

/// Timing and encoding knobs for the loop.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// Minimum spacing between the last successful request and a new one.
    pub min_request_interval: Duration,
    /// Delay between a completed attempt and the next auto-mode tick.
    pub analysis_interval: Duration,
    /// Upper bound on a single capture-encode-request attempt.
    pub request_timeout: Duration,
    /// Delay before the first auto-mode tick once the camera is up.
    pub start_delay: Duration,
    pub camera_retry: Duration,
    pub jpeg_quality: u8,
    pub auto_mode: bool,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            min_request_interval: Duration::from_millis(500),
            analysis_interval: Duration::from_millis(700),
            request_timeout: Duration::from_secs(10),
            start_delay: Duration::from_millis(1500),
            camera_retry: Duration::from_secs(2),
            jpeg_quality: 90,
            auto_mode: true,
        }
    }
}

/// Why a single attempt produced no result.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("frame has no picture data")]
    DegenerateFrame,
    #[error("capture: {0}")]
    Capture(#[from] CaptureError),
    #[error("encode: {0}")]
    Encode(#[from] FrameError),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
}

/// Reason a trigger did not dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    InFlight,
    NotReady,
    TooSoon,
}

#[derive(Debug, Clone, Default)]
pub struct LoopState {
    pub auto_mode: bool,
    pub analyzing: bool,
    pub registering: bool,
    /// Completion time of the last successful analysis.
    pub last_request: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterKind {
    Pending,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterBanner {
    pub kind: RegisterKind,
    pub text: String,
}

/// Everything a front end renders. Published on every transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewState {
    pub status: String,
    pub analysis_status: Option<String>,
    pub loading: bool,
    pub analyze_enabled: bool,
    pub auto_mode: bool,
    pub camera_ready: bool,
    pub presentation: Option<Presentation>,
    /// Incremented for each new presentation.
    pub presentations: u64,
    pub register: Option<RegisterBanner>,
    /// Incremented when a successful registration should clear the name input.
    pub name_input_resets: u64,
}

#[derive(Debug, Error)]
#[error("session has shut down")]
pub struct SessionClosed;

enum SessionCommand {
    AnalyzeNow,
    SetAutoMode(bool),
    Register(String),
    RestartCamera,
    BackendExited(Option<i32>),
    Shutdown(oneshot::Sender<()>),
}

/// Clone-safe handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
    view: watch::Receiver<ViewState>,
}

impl SessionHandle {
    async fn send(&self, cmd: SessionCommand) -> Result<(), SessionClosed> {
        self.tx.send(cmd).await.map_err(|_| SessionClosed)
    }

    /// Manual trigger. Subject to the same preconditions as auto ticks.
    pub async fn analyze_now(&self) -> Result<(), SessionClosed> {
        self.send(SessionCommand::AnalyzeNow).await
    }

    pub async fn set_auto_mode(&self, on: bool) -> Result<(), SessionClosed> {
        self.send(SessionCommand::SetAutoMode(on)).await
    }

    pub async fn register(&self, name: impl Into<String>) -> Result<(), SessionClosed> {
        self.send(SessionCommand::Register(name.into())).await
    }

    pub async fn restart_camera(&self) -> Result<(), SessionClosed> {
        self.send(SessionCommand::RestartCamera).await
    }

    pub async fn backend_exited(&self, code: Option<i32>) -> Result<(), SessionClosed> {
        self.send(SessionCommand::BackendExited(code)).await
    }

    /// Cancel pending work, release the camera, and wait for the loop to end.
    pub async fn shutdown(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.send(SessionCommand::Shutdown(reply_tx)).await.is_ok() {
            let _ = reply_rx.await;
        }
    }

    pub fn view(&self) -> watch::Receiver<ViewState> {
        self.view.clone()
    }
}

/// Start the loop task. The camera is started immediately.
pub fn spawn_session(
    backend: Arc<dyn AnalysisBackend>,
    frames: Arc<dyn FrameProvider>,
    presenter: Presenter,
    settings: LoopSettings,
) -> SessionHandle {
    let (tx, rx) = mpsc::channel(16);
    let (view_tx, view_rx) = watch::channel(ViewState {
        auto_mode: settings.auto_mode,
        analyze_enabled: true,
        ..ViewState::default()
    });

    let session = Session {
        backend,
        frames,
        presenter,
        state: LoopState {
            auto_mode: settings.auto_mode,
            ..LoopState::default()
        },
        settings,
        initial_done: false,
        startup: None,
        analysis: None,
        registration: None,
        next_tick: None,
        camera_retry: None,
        view: view_tx,
    };
    tokio::spawn(session.run(rx));

    SessionHandle { tx, view: view_rx }
}

type Pending<T> = Pin<Box<dyn Future<Output = T> + Send>>;

struct Session {
    backend: Arc<dyn AnalysisBackend>,
    frames: Arc<dyn FrameProvider>,
    presenter: Presenter,
    settings: LoopSettings,
    state: LoopState,
    initial_done: bool,
    startup: Option<Pending<Result<StreamInfo, CaptureError>>>,
    analysis: Option<Pending<Result<AnalysisResult, AttemptError>>>,
    registration: Option<Pending<Result<RegisterReply, AttemptError>>>,
    next_tick: Option<Pin<Box<Sleep>>>,
    camera_retry: Option<Pin<Box<Sleep>>>,
    view: watch::Sender<ViewState>,
}

impl Session {
    async fn run(mut self, mut rx: mpsc::Receiver<SessionCommand>) {
        tracing::info!(auto_mode = self.state.auto_mode, "session started");
        self.begin_camera();

        let done = loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(SessionCommand::Shutdown(reply)) => break Some(reply),
                    Some(cmd) => self.handle(cmd),
                    None => break None,
                },
                started = poll_slot(&mut self.startup) => {
                    self.startup = None;
                    self.camera_started(started);
                }
                outcome = poll_slot(&mut self.analysis) => {
                    self.analysis = None;
                    self.analysis_finished(outcome);
                }
                outcome = poll_slot(&mut self.registration) => {
                    self.registration = None;
                    self.registration_finished(outcome);
                }
                () = sleep_slot(&mut self.next_tick) => {
                    self.next_tick = None;
                    self.auto_tick();
                }
                () = sleep_slot(&mut self.camera_retry) => {
                    self.camera_retry = None;
                    self.begin_camera();
                }
            }
        };

        self.teardown().await;
        if let Some(reply) = done {
            let _ = reply.send(());
        }
    }

    fn handle(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::AnalyzeNow => {
                if let Err(skip) = self.try_dispatch() {
                    tracing::debug!(?skip, "manual analysis skipped");
                }
            }
            SessionCommand::SetAutoMode(on) => self.set_auto_mode(on),
            SessionCommand::Register(name) => self.begin_registration(name),
            SessionCommand::RestartCamera => self.begin_camera(),
            SessionCommand::BackendExited(code) => {
                tracing::warn!(?code, "analysis backend exited");
                let text = self.locale().text(Text::BackendExited).to_string();
                self.publish(|v| v.status = text);
            }
            SessionCommand::Shutdown(_) => {}
        }
    }

    fn locale(&self) -> Locale {
        self.presenter.locale()
    }

    fn publish(&self, update: impl FnOnce(&mut ViewState)) {
        self.view.send_modify(update);
    }

    fn arm_tick(&mut self, delay: Duration) {
        self.next_tick = Some(Box::pin(tokio::time::sleep(delay)));
    }

    fn begin_camera(&mut self) {
        self.camera_retry = None;
        let text = self.locale().text(Text::CameraStarting).to_string();
        self.publish(|v| {
            v.status = text;
            v.camera_ready = false;
        });
        let frames = Arc::clone(&self.frames);
        self.startup = Some(Box::pin(async move {
            frames.stop().await;
            frames.start().await
        }));
    }

    fn camera_started(&mut self, started: Result<StreamInfo, CaptureError>) {
        let locale = self.locale();
        match started {
            Ok(info) => {
                tracing::info!(width = info.width, height = info.height, "camera ready");
                self.presenter.resize(info.width, info.height);
                self.publish(|v| {
                    v.status = locale.text(Text::CameraConnected).to_string();
                    v.camera_ready = true;
                });
                if self.state.auto_mode {
                    self.arm_tick(self.settings.start_delay);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, retry = ?self.settings.camera_retry, "camera start failed");
                self.publish(|v| {
                    v.status = locale.camera_error(&e.to_string());
                    v.camera_ready = false;
                });
                self.camera_retry = Some(Box::pin(tokio::time::sleep(self.settings.camera_retry)));
            }
        }
    }

    fn set_auto_mode(&mut self, on: bool) {
        tracing::info!(auto_mode = on, "auto mode changed");
        self.state.auto_mode = on;
        if on {
            if !self.state.analyzing {
                self.arm_tick(Duration::ZERO);
            }
        } else {
            self.next_tick = None;
        }
        self.publish(|v| v.auto_mode = on);
    }

    fn auto_tick(&mut self) {
        if !self.state.auto_mode {
            return;
        }
        if let Err(skip) = self.try_dispatch() {
            tracing::debug!(?skip, "auto tick skipped");
            self.arm_tick(self.settings.analysis_interval);
        }
    }

    /// Start an analysis attempt if every precondition holds.
    fn try_dispatch(&mut self) -> Result<(), Skip> {
        if self.state.analyzing {
            return Err(Skip::InFlight);
        }
        if !self.frames.is_frame_ready() {
            return Err(Skip::NotReady);
        }
        if let Some(last) = self.state.last_request {
            if last.elapsed() < self.settings.min_request_interval {
                return Err(Skip::TooSoon);
            }
        }

        self.state.analyzing = true;
        self.publish(|v| {
            v.loading = true;
            v.analyze_enabled = false;
        });

        let frames = Arc::clone(&self.frames);
        let backend = Arc::clone(&self.backend);
        let quality = self.settings.jpeg_quality;
        self.analysis = Some(Box::pin(with_deadline(
            self.settings.request_timeout,
            async move {
                let frame = frames.snapshot().await?;
                if frame.is_degenerate() {
                    return Err(AttemptError::DegenerateFrame);
                }
                let jpeg = frame.encode_jpeg(quality)?;
                Ok::<_, AttemptError>(backend.analyze(jpeg).await?)
            },
        )));
        Ok(())
    }

    fn analysis_finished(&mut self, outcome: Result<AnalysisResult, AttemptError>) {
        self.state.analyzing = false;
        let locale = self.locale();

        match outcome {
            Ok(result) => {
                self.state.last_request = Some(Instant::now());
                let presentation = self.presenter.present(&result);
                let analysis_status = if self.initial_done {
                    Text::AnalysisUpdated
                } else {
                    Text::InitialAnalysisDone
                };
                self.initial_done = true;
                tracing::debug!(
                    face = result.region.is_some(),
                    matched = ?result.face_match.as_ref().map(|m| m.name.as_str()),
                    "analysis complete"
                );
                self.publish(|v| {
                    if let Some(status) = &presentation.status {
                        v.status = status.clone();
                    }
                    v.analysis_status = Some(locale.text(analysis_status).to_string());
                    v.presentation = Some(presentation);
                    v.presentations += 1;
                });
            }
            Err(AttemptError::DegenerateFrame) => {
                tracing::debug!("skipping analysis: blank frame");
            }
            Err(AttemptError::Capture(e)) => {
                tracing::warn!(error = %e, "frame capture failed");
                self.publish(|v| {
                    v.status = locale.text(Text::CameraLost).to_string();
                    v.camera_ready = false;
                });
                if self.startup.is_none() && self.camera_retry.is_none() {
                    self.camera_retry =
                        Some(Box::pin(tokio::time::sleep(self.settings.camera_retry)));
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "analysis failed");
                let status = describe(locale, &e);
                self.publish(|v| {
                    v.status = status;
                    v.analysis_status = Some(locale.text(Text::AnalysisFailed).to_string());
                });
            }
        }

        self.publish(|v| {
            v.loading = false;
            v.analyze_enabled = true;
        });
        if self.state.auto_mode {
            self.arm_tick(self.settings.analysis_interval);
        }
    }

    fn begin_registration(&mut self, name: String) {
        let locale = self.locale();
        let name = name.trim().to_string();
        if name.is_empty() {
            self.publish(|v| {
                v.register = Some(RegisterBanner {
                    kind: RegisterKind::Error,
                    text: locale.text(Text::NameRequired).to_string(),
                })
            });
            return;
        }
        if self.state.registering {
            tracing::debug!("registration already in flight");
            return;
        }

        self.state.registering = true;
        self.publish(|v| {
            v.register = Some(RegisterBanner {
                kind: RegisterKind::Pending,
                text: locale.text(Text::Registering).to_string(),
            })
        });

        let frames = Arc::clone(&self.frames);
        let backend = Arc::clone(&self.backend);
        let quality = self.settings.jpeg_quality;
        self.registration = Some(Box::pin(with_deadline(
            self.settings.request_timeout,
            async move {
                let frame = frames.snapshot().await?;
                let jpeg = frame.encode_jpeg(quality)?;
                Ok::<_, AttemptError>(backend.register(&name, jpeg).await?)
            },
        )));
    }

    fn registration_finished(&mut self, outcome: Result<RegisterReply, AttemptError>) {
        self.state.registering = false;
        let locale = self.locale();

        let (kind, text) = match outcome {
            Ok(reply) if reply.is_success() => {
                tracing::info!(message = ?reply.message, "face registered");
                let text = reply
                    .message
                    .unwrap_or_else(|| locale.text(Text::RegisterSucceeded).to_string());
                (RegisterKind::Success, text)
            }
            Ok(reply) => {
                tracing::warn!(status = %reply.status, message = ?reply.message, "registration rejected");
                let text = reply
                    .message
                    .unwrap_or_else(|| locale.text(Text::RegisterFailed).to_string());
                (RegisterKind::Error, text)
            }
            Err(e) => {
                tracing::warn!(error = %e, "registration failed");
                let text = match e {
                    AttemptError::Analysis(AnalysisError::Backend(message))
                    | AttemptError::Analysis(AnalysisError::Status {
                        message: Some(message),
                        ..
                    }) => message,
                    AttemptError::Analysis(AnalysisError::Status { status, .. }) => {
                        locale.http_status(status)
                    }
                    AttemptError::Analysis(AnalysisError::RateLimited) => {
                        locale.text(Text::RateLimited).to_string()
                    }
                    _ => locale.text(Text::RegisterError).to_string(),
                };
                (RegisterKind::Error, text)
            }
        };

        self.publish(|v| {
            if kind == RegisterKind::Success {
                v.name_input_resets += 1;
            }
            v.register = Some(RegisterBanner { kind, text });
        });
    }

    async fn teardown(&mut self) {
        self.next_tick = None;
        self.camera_retry = None;
        self.startup = None;
        self.analysis = None;
        self.registration = None;
        self.state.analyzing = false;
        self.state.registering = false;

        self.frames.stop().await;

        let text = self.locale().text(Text::SessionStopped).to_string();
        self.publish(|v| {
            v.status = text;
            v.camera_ready = false;
            v.loading = false;
        });
        tracing::info!("session stopped");
    }
}

/// Status line text for a failed analysis.
fn describe(locale: Locale, err: &AttemptError) -> String {
    match err {
        AttemptError::Analysis(AnalysisError::RateLimited) => {
            locale.error(locale.text(Text::RateLimited))
        }
        AttemptError::Analysis(AnalysisError::TimedOut(_)) => {
            locale.error(locale.text(Text::TimedOut))
        }
        AttemptError::Analysis(AnalysisError::Status {
            status,
            message: Some(message),
        }) => locale.error(&format!("{} ({message})", locale.http_status(*status))),
        AttemptError::Analysis(AnalysisError::Status {
            status,
            message: None,
        }) => locale.error(&locale.http_status(*status)),
        AttemptError::Analysis(AnalysisError::Backend(message)) => locale.error(message),
        other => locale.error(&other.to_string()),
    }
}

async fn with_deadline<T>(
    limit: Duration,
    attempt: impl Future<Output = Result<T, AttemptError>>,
) -> Result<T, AttemptError> {
    match tokio::time::timeout(limit, attempt).await {
        Ok(outcome) => outcome,
        Err(_) => Err(AnalysisError::TimedOut(limit).into()),
    }
}

async fn poll_slot<T>(slot: &mut Option<Pending<T>>) -> T {
    match slot {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn sleep_slot(slot: &mut Option<Pin<Box<Sleep>>>) {
    match slot {
        Some(sleep) => sleep.await,
        None => std::future::pending().await,
    }
}
