use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facecam_core::presenter::Presentation;
use facecam_core::{raster, Presenter};
use facecam_hw::{Camera, Frame, FrameSource, SyntheticSource, V4lSource};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

mod capture;
mod client;
mod config;
mod session;
mod supervisor;

use client::{AnalysisBackend, HttpBackend};
use config::Config;
use session::{RegisterKind, SessionHandle, ViewState};
use supervisor::{BackendEvent, BackendSupervisor};

#[derive(Parser)]
#[command(name = "facecam", about = "Live camera face analysis client")]
struct Cli {
    /// TOML config file (default: $FACECAM_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the live capture-analyze loop, controlled from stdin
    Run {
        /// Use a generated test pattern instead of the camera
        #[arg(long)]
        synthetic: bool,
        /// Write the latest overlay to this PNG after each analysis
        #[arg(long)]
        overlay_out: Option<PathBuf>,
        /// Start with auto-mode off
        #[arg(long)]
        manual: bool,
    },
    /// Analyze a single image file
    Analyze {
        #[arg(short, long)]
        image: PathBuf,
        /// Write the mirrored image with its overlay to this PNG
        #[arg(long)]
        overlay_out: Option<PathBuf>,
    },
    /// Register a face from an image file
    Register {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        image: PathBuf,
    },
    /// List V4L2 capture devices
    Devices,
    /// Run camera diagnostics
    Test {
        /// Frames to grab after warmup
        #[arg(long, default_value_t = 5)]
        frames: usize,
    },
}

const HELP: &str = "commands: a | analyze, auto on|off, register <name>, restart-camera, restart-backend, q";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Run {
            synthetic,
            overlay_out,
            manual,
        } => run_live(config, synthetic, overlay_out, manual).await,
        Commands::Analyze { image, overlay_out } => {
            analyze_file(&config, &image, overlay_out.as_deref()).await
        }
        Commands::Register { name, image } => register_file(&config, &name, &image).await,
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
            Ok(())
        }
        Commands::Test { frames } => camera_diagnostics(&config, frames),
    }
}

fn http_backend(config: &Config) -> Result<HttpBackend> {
    HttpBackend::new(&config.backend_url, config.payload, Duration::from_secs(5))
        .context("building HTTP client")
}

async fn run_live(
    config: Config,
    synthetic: bool,
    overlay_out: Option<PathBuf>,
    manual: bool,
) -> Result<()> {
    let (mut supervisor, mut backend_events) = match config.backend_command() {
        Some(command) => {
            let (mut supervisor, events) = BackendSupervisor::new(command);
            supervisor.start().context("launching backend")?;
            (Some(supervisor), Some(events))
        }
        None => (None, None),
    };

    let source: Box<dyn FrameSource> = if synthetic {
        Box::new(SyntheticSource::new(config.capture_width, config.capture_height))
    } else {
        Box::new(V4lSource::new(
            config.camera_device.clone(),
            config.capture_width,
            config.capture_height,
        ))
    };
    let frames = capture::spawn_capture(source, config.warmup_frames)
        .context("starting capture thread")?;

    let mut settings = config.loop_settings();
    if manual {
        settings.auto_mode = false;
    }
    let session = session::spawn_session(
        Arc::new(http_backend(&config)?),
        Arc::new(frames),
        Presenter::new(config.capture_width, config.capture_height, config.locale),
        settings,
    );

    println!("{HELP}");
    let mut view = session.view();
    let mut printed = String::new();
    let mut shown = 0u64;
    let mut stdin = Some(BufReader::new(tokio::io::stdin()).lines());

    loop {
        tokio::select! {
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = view.borrow_and_update().clone();
                let line = summarize(&snapshot);
                if line != printed {
                    println!("{line}");
                    printed = line;
                }
                if snapshot.presentations != shown {
                    shown = snapshot.presentations;
                    if let (Some(path), Some(presentation)) = (&overlay_out, &snapshot.presentation) {
                        if let Err(e) = write_overlay(path, presentation, None) {
                            tracing::warn!(error = %e, "overlay not written");
                            println!("overlay not written: {e:#}");
                        }
                    }
                }
            }
            line = next_line(&mut stdin) => {
                let line = line.context("reading stdin")?;
                if !dispatch(&line, &session, supervisor.as_mut()).await {
                    break;
                }
            }
            event = next_event(&mut backend_events) => {
                if let BackendEvent::Exited { code, unexpected: true } = event {
                    let _ = session.backend_exited(code).await;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.shutdown().await;
    if let Some(supervisor) = supervisor.as_mut() {
        supervisor.stop().await;
    }
    Ok(())
}

/// Apply one stdin command. Returns false to quit.
async fn dispatch(
    line: &str,
    session: &SessionHandle,
    supervisor: Option<&mut BackendSupervisor>,
) -> bool {
    let line = line.trim();
    let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
    let sent = match (cmd, rest.trim()) {
        ("a" | "analyze", _) => session.analyze_now().await,
        ("auto", "on") => session.set_auto_mode(true).await,
        ("auto", "off") => session.set_auto_mode(false).await,
        ("register", name) => session.register(name).await,
        ("restart-camera", _) => session.restart_camera().await,
        ("restart-backend", _) => {
            match supervisor {
                Some(supervisor) => {
                    if let Err(e) = supervisor.restart().await {
                        tracing::warn!(error = %e, "backend restart failed");
                        println!("backend restart failed: {e}");
                    }
                }
                None => println!("no supervised backend configured"),
            }
            Ok(())
        }
        ("q" | "quit", _) => return false,
        ("", _) => Ok(()),
        _ => {
            println!("{HELP}");
            Ok(())
        }
    };
    match sent {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "command not delivered");
            false
        }
    }
}

/// Next stdin command. Once stdin reaches EOF the reader is dropped and this
/// never resolves again, so the session keeps running until Ctrl-C.
async fn next_line<R: AsyncBufRead + Unpin>(
    lines: &mut Option<Lines<R>>,
) -> std::io::Result<String> {
    let Some(reader) = lines.as_mut() else {
        return std::future::pending().await;
    };
    match reader.next_line().await? {
        Some(line) => Ok(line),
        None => {
            tracing::info!("stdin closed, press Ctrl-C to stop");
            *lines = None;
            std::future::pending().await
        }
    }
}

/// Wait for the next supervisor event; never resolves without a supervisor.
async fn next_event(rx: &mut Option<UnboundedReceiver<BackendEvent>>) -> BackendEvent {
    loop {
        let Some(events) = rx.as_mut() else {
            return std::future::pending().await;
        };
        if let Some(event) = events.recv().await {
            return event;
        }
        *rx = None;
    }
}

fn summarize(view: &ViewState) -> String {
    let mut line = format!("[{}]", view.status);
    if view.loading {
        line.push_str(" (analyzing)");
    }
    if let Some(status) = &view.analysis_status {
        line.push_str(&format!(" {status}"));
    }
    if let Some(presentation) = &view.presentation {
        let labels = &presentation.labels;
        for value in [&labels.age, &labels.gender, &labels.emotion, &labels.race]
            .into_iter()
            .flatten()
        {
            line.push_str(&format!(" | {value}"));
        }
        line.push_str(&format!(" | {}", presentation.banner.text));
    }
    if let Some(banner) = &view.register {
        let tag = match banner.kind {
            RegisterKind::Pending => "...",
            RegisterKind::Success => "ok",
            RegisterKind::Error => "error",
        };
        line.push_str(&format!(" | register {tag}: {}", banner.text));
    }
    line
}

fn write_overlay(path: &Path, presentation: &Presentation, base: Option<&image::RgbImage>) -> Result<()> {
    let base = base.map(raster::mirror);
    raster::render(&presentation.overlay, base.as_ref())
        .save(path)
        .with_context(|| format!("writing overlay to {}", path.display()))
}

/// Decode an image file and re-encode it as the JPEG still the backend expects.
fn load_still(path: &Path, quality: u8) -> Result<(image::RgbImage, Vec<u8>)> {
    let image = image::open(path)
        .with_context(|| format!("opening {}", path.display()))?
        .to_rgb8();
    let jpeg = Frame::from_rgb_image(image.clone(), 0)
        .encode_jpeg(quality)
        .context("encoding JPEG")?;
    Ok((image, jpeg))
}

async fn analyze_file(config: &Config, path: &Path, overlay_out: Option<&Path>) -> Result<()> {
    let (image, jpeg) = load_still(path, config.jpeg_quality)?;
    let backend = http_backend(config)?;
    let result = tokio::time::timeout(config.request_timeout(), backend.analyze(jpeg))
        .await
        .context("analysis timed out")?
        .context("analysis failed")?;

    let presentation =
        Presenter::new(image.width(), image.height(), config.locale).present(&result);
    if let Some(status) = &presentation.status {
        println!("{status}");
    }
    let labels = &presentation.labels;
    for value in [&labels.age, &labels.gender, &labels.emotion, &labels.race]
        .into_iter()
        .flatten()
    {
        println!("  {value}");
    }
    println!("{}", presentation.banner.text);

    if let Some(out) = overlay_out {
        write_overlay(out, &presentation, Some(&image))?;
        println!("overlay written to {}", out.display());
    }
    Ok(())
}

async fn register_file(config: &Config, name: &str, path: &Path) -> Result<()> {
    let name = name.trim();
    anyhow::ensure!(!name.is_empty(), "name must not be empty");
    let (_, jpeg) = load_still(path, config.jpeg_quality)?;
    let backend = http_backend(config)?;
    let reply = tokio::time::timeout(config.request_timeout(), backend.register(name, jpeg))
        .await
        .context("registration timed out")?
        .context("registration failed")?;

    let message = reply.message.clone().unwrap_or_else(|| reply.status.clone());
    anyhow::ensure!(reply.is_success(), "registration rejected: {message}");
    println!("{message}");
    Ok(())
}

fn camera_diagnostics(config: &Config, frames: usize) -> Result<()> {
    println!("Running camera diagnostics on {}...", config.camera_device);
    let mut source = V4lSource::new(
        config.camera_device.clone(),
        config.capture_width,
        config.capture_height,
    );
    let info = source.open().context("opening camera")?;
    println!("  negotiated {}x{}", info.width, info.height);

    for _ in 0..config.warmup_frames {
        let _ = source.grab();
    }
    let mut blank = 0;
    for _ in 0..frames {
        let frame = source.grab().context("grabbing frame")?;
        if frame.is_degenerate() {
            blank += 1;
        }
        println!(
            "  seq {:>4}  {}x{}  brightness {:>6.1}  dark {}  blank {}",
            frame.sequence,
            frame.width,
            frame.height,
            frame.avg_brightness(),
            facecam_hw::frame::is_dark_frame(&frame.data, 0.95),
            frame.is_degenerate(),
        );
    }
    source.close();
    println!("  {blank}/{frames} blank frames");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::AnalysisError;
    use crate::session::{FrameProvider, LoopSettings};
    use crate::supervisor::BackendCommand;
    use async_trait::async_trait;
    use facecam_core::{AnalysisResult, Locale, RegisterReply};
    use facecam_hw::{CaptureError, StreamInfo};

    /// Backend and camera that are both unavailable.
    struct Offline;

    #[async_trait]
    impl AnalysisBackend for Offline {
        async fn analyze(&self, _jpeg: Vec<u8>) -> Result<AnalysisResult, AnalysisError> {
            Err(AnalysisError::Transport("offline".into()))
        }

        async fn register(&self, _name: &str, _jpeg: Vec<u8>) -> Result<RegisterReply, AnalysisError> {
            Err(AnalysisError::Transport("offline".into()))
        }
    }

    #[async_trait]
    impl FrameProvider for Offline {
        async fn start(&self) -> Result<StreamInfo, CaptureError> {
            Err(CaptureError::NotStarted)
        }

        async fn snapshot(&self) -> Result<Frame, CaptureError> {
            Err(CaptureError::NotStarted)
        }

        async fn stop(&self) {}

        fn is_frame_ready(&self) -> bool {
            false
        }
    }

    fn offline_session() -> SessionHandle {
        let backend: Arc<dyn AnalysisBackend> = Arc::new(Offline);
        let frames: Arc<dyn FrameProvider> = Arc::new(Offline);
        let settings = LoopSettings {
            auto_mode: false,
            ..LoopSettings::default()
        };
        session::spawn_session(backend, frames, Presenter::new(64, 48, Locale::En), settings)
    }

    #[tokio::test]
    async fn test_failed_backend_restart_keeps_running() {
        let session = offline_session();
        let (mut supervisor, _events) = BackendSupervisor::new(BackendCommand {
            program: PathBuf::from("/nonexistent/facecam-backend"),
            args: Vec::new(),
            working_dir: None,
        });

        assert!(dispatch("restart-backend", &session, Some(&mut supervisor)).await);
        assert!(!supervisor.is_running());
        assert!(dispatch("analyze", &session, Some(&mut supervisor)).await);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_dispatch_quit_and_closed_session() {
        let session = offline_session();
        assert!(dispatch("bogus", &session, None).await);
        assert!(dispatch("restart-backend", &session, None).await);
        assert!(!dispatch(" q ", &session, None).await);

        session.shutdown().await;
        assert!(!dispatch("analyze", &session, None).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stdin_eof_waits_instead_of_quitting() {
        let mut lines = Some((&b"auto off\n"[..]).lines());
        assert_eq!(next_line(&mut lines).await.unwrap(), "auto off");

        let waited = tokio::time::timeout(Duration::from_secs(3600), next_line(&mut lines)).await;
        assert!(waited.is_err());
        assert!(lines.is_none());
    }

    #[test]
    fn test_overlay_write_failure_is_an_error() {
        let presentation = Presenter::new(8, 8, Locale::En).present(&AnalysisResult::default());
        let missing = Path::new("/nonexistent/facecam/overlay.png");
        assert!(write_overlay(missing, &presentation, None).is_err());
    }
}
