use crate::session::FrameProvider;
use async_trait::async_trait;
use facecam_hw::{CaptureError, Frame, FrameSource, StreamInfo};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Grabs allowed after warmup before a stream that only yields blank
/// frames is declared unusable.
const MAX_STARTUP_GRABS: usize = 30;

/// Messages sent from the session to the capture thread.
enum CaptureRequest {
    Start {
        reply: oneshot::Sender<Result<StreamInfo, CaptureError>>,
    },
    Snapshot {
        reply: oneshot::Sender<Result<Frame, CaptureError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

/// Clone-safe handle to the capture thread.
///
/// The thread exclusively owns the frame source; dropping the last handle
/// ends the thread and releases the device.
#[derive(Clone)]
pub struct CaptureHandle {
    tx: mpsc::Sender<CaptureRequest>,
    ready: Arc<AtomicBool>,
}

impl CaptureHandle {
    /// Acquire the stream and wait until it produces a real frame.
    pub async fn start(&self) -> Result<StreamInfo, CaptureError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(CaptureRequest::Start { reply: reply_tx })
            .await
            .map_err(|_| CaptureError::ChannelClosed)?;
        reply_rx.await.map_err(|_| CaptureError::ChannelClosed)?
    }

    /// Grab the current frame.
    pub async fn snapshot(&self) -> Result<Frame, CaptureError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(CaptureRequest::Snapshot { reply: reply_tx })
            .await
            .map_err(|_| CaptureError::ChannelClosed)?;
        reply_rx.await.map_err(|_| CaptureError::ChannelClosed)?
    }

    /// Release the hardware stream. Idempotent; a no-op once the thread is gone.
    pub async fn stop(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(CaptureRequest::Stop { reply: reply_tx })
            .await
            .is_ok()
        {
            let _ = reply_rx.await;
        }
        self.ready.store(false, Ordering::SeqCst);
    }

    /// True once the stream has delivered a decodable, non-blank frame.
    pub fn is_frame_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameProvider for CaptureHandle {
    async fn start(&self) -> Result<StreamInfo, CaptureError> {
        CaptureHandle::start(self).await
    }

    async fn snapshot(&self) -> Result<Frame, CaptureError> {
        CaptureHandle::snapshot(self).await
    }

    async fn stop(&self) {
        CaptureHandle::stop(self).await
    }

    fn is_frame_ready(&self) -> bool {
        CaptureHandle::is_frame_ready(self)
    }
}

/// Spawn the capture controller on a dedicated OS thread.
///
/// The source is not opened until `start()` is requested.
pub fn spawn_capture<S>(mut source: S, warmup_frames: usize) -> Result<CaptureHandle, CaptureError>
where
    S: FrameSource + 'static,
{
    let (tx, mut rx) = mpsc::channel::<CaptureRequest>(4);
    let ready = Arc::new(AtomicBool::new(false));
    let thread_ready = Arc::clone(&ready);

    std::thread::Builder::new()
        .name("facecam-capture".into())
        .spawn(move || {
            tracing::info!("capture thread started");
            let mut running = false;
            while let Some(req) = rx.blocking_recv() {
                match req {
                    CaptureRequest::Start { reply } => {
                        if running {
                            source.close();
                            thread_ready.store(false, Ordering::SeqCst);
                        }
                        let result = start_stream(&mut source, warmup_frames);
                        running = result.is_ok();
                        thread_ready.store(running, Ordering::SeqCst);
                        let _ = reply.send(result);
                    }
                    CaptureRequest::Snapshot { reply } => {
                        let result = if running {
                            source.grab()
                        } else {
                            Err(CaptureError::NotStarted)
                        };
                        let _ = reply.send(result);
                    }
                    CaptureRequest::Stop { reply } => {
                        source.close();
                        running = false;
                        thread_ready.store(false, Ordering::SeqCst);
                        let _ = reply.send(());
                    }
                }
            }
            source.close();
            thread_ready.store(false, Ordering::SeqCst);
            tracing::info!("capture thread exiting");
        })
        .map_err(|e| CaptureError::CaptureFailed(format!("failed to spawn capture thread: {e}")))?;

    Ok(CaptureHandle { tx, ready })
}

/// Open the source, discard warmup frames, then wait for the first frame
/// that actually carries picture data.
fn start_stream<S: FrameSource>(source: &mut S, warmup_frames: usize) -> Result<StreamInfo, CaptureError> {
    let info = source.open()?;
    tracing::info!(width = info.width, height = info.height, "stream opened");

    if warmup_frames > 0 {
        tracing::debug!(count = warmup_frames, "discarding warmup frames");
        for _ in 0..warmup_frames {
            let _ = source.grab();
        }
    }

    for attempt in 0..MAX_STARTUP_GRABS {
        let frame = match source.grab() {
            Ok(frame) => frame,
            Err(e) => {
                source.close();
                return Err(e);
            }
        };
        if !frame.is_degenerate() {
            tracing::info!(
                attempt,
                width = frame.width,
                height = frame.height,
                "stream producing frames"
            );
            return Ok(StreamInfo {
                width: frame.width,
                height: frame.height,
            });
        }
        tracing::debug!(seq = frame.sequence, "blank frame while starting");
    }

    source.close();
    Err(CaptureError::NoFrames(MAX_STARTUP_GRABS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use facecam_hw::SyntheticSource;

    struct MissingDevice;

    impl FrameSource for MissingDevice {
        fn open(&mut self) -> Result<StreamInfo, CaptureError> {
            Err(CaptureError::DeviceNotFound("/dev/video9".into()))
        }
        fn grab(&mut self) -> Result<Frame, CaptureError> {
            Err(CaptureError::NotStarted)
        }
        fn close(&mut self) {}
    }

    #[tokio::test]
    async fn test_start_waits_for_real_frame() {
        let handle = spawn_capture(SyntheticSource::new(32, 24).with_blank_frames(5), 2).unwrap();
        assert!(!handle.is_frame_ready());
        let info = handle.start().await.unwrap();
        assert_eq!(info, StreamInfo { width: 32, height: 24 });
        assert!(handle.is_frame_ready());
        let frame = handle.snapshot().await.unwrap();
        assert!(!frame.is_degenerate());
    }

    #[tokio::test]
    async fn test_snapshot_before_start_fails() {
        let handle = spawn_capture(SyntheticSource::new(8, 8), 0).unwrap();
        assert!(matches!(handle.snapshot().await, Err(CaptureError::NotStarted)));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_clears_ready() {
        let handle = spawn_capture(SyntheticSource::new(8, 8), 0).unwrap();
        handle.start().await.unwrap();
        handle.stop().await;
        handle.stop().await;
        assert!(!handle.is_frame_ready());
        assert!(matches!(handle.snapshot().await, Err(CaptureError::NotStarted)));
        // a later start() brings the stream back
        handle.start().await.unwrap();
        assert!(handle.is_frame_ready());
    }

    #[tokio::test]
    async fn test_blank_stream_is_unusable() {
        let source = SyntheticSource::new(8, 8).with_blank_frames(1_000);
        let handle = spawn_capture(source, 0).unwrap();
        assert!(matches!(
            handle.start().await,
            Err(CaptureError::NoFrames(MAX_STARTUP_GRABS))
        ));
        assert!(!handle.is_frame_ready());
    }

    #[tokio::test]
    async fn test_missing_device_reported() {
        let handle = spawn_capture(MissingDevice, 0).unwrap();
        assert!(matches!(
            handle.start().await,
            Err(CaptureError::DeviceNotFound(_))
        ));
        assert!(!handle.is_frame_ready());
    }
}
