//! Frame source abstraction shared by the V4L2 camera and the synthetic
//! test pattern.

use crate::camera::CaptureError;
use crate::frame::Frame;

/// Native resolution of an opened stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
}

/// A blocking source of RGB frames. Driven from a single capture thread.
pub trait FrameSource: Send {
    /// Acquire the underlying stream and report its resolution.
    fn open(&mut self) -> Result<StreamInfo, CaptureError>;
    /// Block until the next frame is available.
    fn grab(&mut self) -> Result<Frame, CaptureError>;
    /// Release the stream. Must be safe to call when already closed.
    fn close(&mut self);
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn open(&mut self) -> Result<StreamInfo, CaptureError> {
        (**self).open()
    }

    fn grab(&mut self) -> Result<Frame, CaptureError> {
        (**self).grab()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Deterministic moving gradient, for running without a camera.
///
/// The first `blank_frames` frames after each `open()` are all-zero, like a
/// real sensor before its first exposure.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    blank_frames: u32,
    sequence: u32,
    open: bool,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            blank_frames: 0,
            sequence: 0,
            open: false,
        }
    }

    pub fn with_blank_frames(mut self, count: u32) -> Self {
        self.blank_frames = count;
        self
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}

impl FrameSource for SyntheticSource {
    fn open(&mut self) -> Result<StreamInfo, CaptureError> {
        if self.width == 0 || self.height == 0 {
            return Err(CaptureError::FormatNegotiationFailed(format!(
                "synthetic source has no area: {}x{}",
                self.width, self.height
            )));
        }
        self.open = true;
        self.sequence = 0;
        Ok(StreamInfo {
            width: self.width,
            height: self.height,
        })
    }

    fn grab(&mut self) -> Result<Frame, CaptureError> {
        if !self.open {
            return Err(CaptureError::NotStarted);
        }
        let seq = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);

        let (w, h) = (self.width as usize, self.height as usize);
        let mut data = vec![0u8; w * h * 3];
        if seq >= self.blank_frames {
            let shift = (seq * 4) as usize;
            for y in 0..h {
                for x in 0..w {
                    let i = (y * w + x) * 3;
                    data[i] = ((x + shift) * 255 / w.max(1)) as u8;
                    data[i + 1] = (y * 255 / h.max(1)) as u8;
                    data[i + 2] = 96;
                }
            }
        }

        Ok(Frame {
            data,
            width: self.width,
            height: self.height,
            timestamp: std::time::Instant::now(),
            sequence: seq,
        })
    }

    fn close(&mut self) {
        self.open = false;
    }
}
