//! facecam-core: face analysis result model and overlay presentation.
//!
//! Decodes the analysis backend's JSON into typed results and maps them
//! to a mirrored overlay display list plus localized text state.

pub mod labels;
pub mod presenter;
pub mod raster;
pub mod types;

pub use labels::{Locale, Text};
pub use presenter::{DrawOp, MatchClass, OverlayPlan, Presentation, Presenter};
pub use types::{AnalysisResult, Emotion, FaceMatch, FaceRegion, Gender, Race, RegisterReply};
