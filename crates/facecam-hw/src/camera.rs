//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use crate::source::{FrameSource, StreamInfo};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::capability::Flags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("capture not started")]
    NotStarted,
    #[error("stream produced no usable frame after {0} attempts")]
    NoFrames(usize),
    #[error("capture thread exited")]
    ChannelClosed,
}

/// A V4L2 node that can capture video.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Pixel layouts the camera may hand back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2, two pixels per four bytes.
    Yuyv,
    /// Motion JPEG, one complete JPEG per buffer.
    Mjpg,
    /// Packed RGB24.
    Rgb3,
}

impl PixelFormat {
    /// Preferred request order.
    const PREFERENCE: [PixelFormat; 3] = [PixelFormat::Yuyv, PixelFormat::Mjpg, PixelFormat::Rgb3];

    pub fn fourcc(self) -> FourCC {
        match self {
            PixelFormat::Yuyv => FourCC::new(b"YUYV"),
            PixelFormat::Mjpg => FourCC::new(b"MJPG"),
            PixelFormat::Rgb3 => FourCC::new(b"RGB3"),
        }
    }

    pub fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        Self::PREFERENCE.into_iter().find(|f| f.fourcc() == fourcc)
    }

    /// Decode one buffer into packed RGB24 and its actual dimensions.
    fn to_rgb(self, buf: &[u8], width: u32, height: u32) -> Result<(Vec<u8>, u32, u32), CaptureError> {
        match self {
            PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, width, height)
                .map(|rgb| (rgb, width, height))
                .map_err(|e| CaptureError::CaptureFailed(format!("YUYV buffer: {e}"))),
            PixelFormat::Mjpg => frame::decode_mjpeg(buf)
                .map_err(|e| CaptureError::CaptureFailed(format!("MJPG buffer: {e}"))),
            PixelFormat::Rgb3 => {
                let needed = (width * height * 3) as usize;
                buf.get(..needed)
                    .map(|rgb| (rgb.to_vec(), width, height))
                    .ok_or_else(|| {
                        CaptureError::CaptureFailed(format!(
                            "RGB3 buffer: {} of {needed} bytes",
                            buf.len()
                        ))
                    })
            }
        }
    }
}

/// An opened V4L2 capture device. Dropping it releases the device.
pub struct Camera {
    device: Device,
    pub device_path: String,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
}

impl Camera {
    /// Open `device_path` and negotiate `width`x`height`, preferring YUYV.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CaptureError> {
        let device = open_capture_device(device_path)?;

        let mut requested = device.format().map_err(|e| {
            CaptureError::FormatNegotiationFailed(format!("reading current format: {e}"))
        })?;
        requested.width = width;
        requested.height = height;
        requested.fourcc = PixelFormat::Yuyv.fourcc();

        let granted = device.set_format(&requested).map_err(|e| {
            CaptureError::FormatNegotiationFailed(format!("applying format: {e}"))
        })?;
        let pixel_format = PixelFormat::from_fourcc(granted.fourcc).ok_or_else(|| {
            CaptureError::FormatNegotiationFailed(format!(
                "driver offered {:?}, expected one of YUYV, MJPG, RGB3",
                granted.fourcc
            ))
        })?;

        tracing::info!(
            device = device_path,
            width = granted.width,
            height = granted.height,
            format = ?pixel_format,
            "camera format negotiated"
        );

        Ok(Self {
            device,
            device_path: device_path.to_string(),
            width: granted.width,
            height: granted.height,
            pixel_format,
        })
    }

    /// Dequeue one buffer and convert it to an RGB24 frame.
    pub fn capture_frame(&self) -> Result<Frame, CaptureError> {
        let mut stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4)
            .map_err(|e| CaptureError::CaptureFailed(format!("mapping buffers: {e}")))?;
        let (buf, meta) = stream
            .next()
            .map_err(|e| CaptureError::CaptureFailed(format!("dequeuing buffer: {e}")))?;

        let (data, width, height) = self.pixel_format.to_rgb(buf, self.width, self.height)?;
        Ok(Frame {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence: meta.sequence,
        })
    }

    /// Enumerate `/dev/video0` through `/dev/video15` for capture-capable nodes.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..16)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| {
                let caps = Device::with_path(&path).ok()?.query_caps().ok()?;
                caps.capabilities
                    .contains(Flags::VIDEO_CAPTURE)
                    .then(|| DeviceInfo {
                        path,
                        name: caps.card,
                        driver: caps.driver,
                        bus: caps.bus,
                    })
            })
            .collect()
    }
}

fn open_capture_device(device_path: &str) -> Result<Device, CaptureError> {
    if !Path::new(device_path).exists() {
        return Err(CaptureError::DeviceNotFound(device_path.to_string()));
    }

    let device = Device::with_path(device_path).map_err(|e| {
        if e.raw_os_error() == Some(16) || e.to_string().contains("busy") {
            CaptureError::DeviceBusy
        } else {
            CaptureError::DeviceNotFound(format!("{device_path}: {e}"))
        }
    })?;

    let caps = device
        .query_caps()
        .map_err(|e| CaptureError::CaptureFailed(format!("querying capabilities: {e}")))?;
    tracing::info!(
        device = device_path,
        driver = %caps.driver,
        card = %caps.card,
        "opened camera"
    );
    if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
        return Err(CaptureError::StreamingNotSupported);
    }
    Ok(device)
}

/// `FrameSource` over a V4L2 device, opened on `open()` and released on `close()`.
pub struct V4lSource {
    device_path: String,
    width: u32,
    height: u32,
    camera: Option<Camera>,
}

impl V4lSource {
    pub fn new(device_path: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            device_path: device_path.into(),
            width,
            height,
            camera: None,
        }
    }
}

impl FrameSource for V4lSource {
    fn open(&mut self) -> Result<StreamInfo, CaptureError> {
        let camera = Camera::open(&self.device_path, self.width, self.height)?;
        let info = StreamInfo {
            width: camera.width,
            height: camera.height,
        };
        self.camera = Some(camera);
        Ok(info)
    }

    fn grab(&mut self) -> Result<Frame, CaptureError> {
        self.camera
            .as_ref()
            .ok_or(CaptureError::NotStarted)?
            .capture_frame()
    }

    fn close(&mut self) {
        if self.camera.take().is_some() {
            tracing::info!(device = %self.device_path, "camera released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_mapping() {
        for format in PixelFormat::PREFERENCE {
            assert_eq!(PixelFormat::from_fourcc(format.fourcc()), Some(format));
        }
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"GREY")), None);
    }

    #[test]
    fn test_rgb3_short_buffer_rejected() {
        assert!(PixelFormat::Rgb3.to_rgb(&[0u8; 5], 2, 1).is_err());
        let (rgb, w, h) = PixelFormat::Rgb3.to_rgb(&[7u8; 8], 2, 1).unwrap();
        assert_eq!((rgb.len(), w, h), (6, 2, 1));
    }

    #[test]
    fn test_missing_device_path() {
        assert!(matches!(
            Camera::open("/dev/facecam-does-not-exist", 640, 480),
            Err(CaptureError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn test_grab_before_open() {
        let mut source = V4lSource::new("/dev/video0", 640, 480);
        assert!(matches!(source.grab(), Err(CaptureError::NotStarted)));
        source.close();
    }
}
