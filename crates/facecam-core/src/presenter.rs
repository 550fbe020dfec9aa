//! Maps an analysis result onto overlay draw operations and text state.
//!
//! The displayed video is mirrored for a selfie view while the backend
//! reports geometry in unmirrored frame space, so every x coordinate is
//! flipped against the surface width before drawing.

use crate::labels::{Locale, Text};
use crate::types::{percent, AnalysisResult, FaceMatch, FaceRegion};

/// RGBA colour.
pub type Color = [u8; 4];

const ALERT: Color = [255, 71, 87, 255];
const POSITIVE: Color = [46, 213, 115, 255];
const CAUTION: Color = [255, 159, 67, 255];
const FILL_ALPHA: u8 = 51; // 0.2
const EYE_FILL: Color = [255, 255, 255, 77];
const LABEL_BACKING: Color = [0, 0, 0, 204];

const MASK_WIDTH_SCALE: f32 = 1.4;
const MASK_LIFT: f32 = 0.2;
const MASK_STROKE: f32 = 4.0;
const MASK_GLOW: f32 = 20.0;
const EYE_RADIUS_SCALE: f32 = 0.08;
const EYE_LIFT: f32 = 0.1;
const PUPIL_SCALE: f32 = 0.4;
const LABEL_WIDTH: f32 = 240.0;
const LABEL_HEIGHT: f32 = 35.0;
const LABEL_FONT_PX: u32 = 18;

/// Colour class of the face mask, chosen by match state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchClass {
    /// Match with confidence strictly above the threshold.
    Positive,
    /// Match at or below the threshold.
    Caution,
    /// No gallery match.
    Alert,
}

impl MatchClass {
    pub const THRESHOLD: f32 = 0.6;

    pub fn of(face_match: Option<&FaceMatch>) -> Self {
        match face_match {
            Some(m) if m.confidence > Self::THRESHOLD => MatchClass::Positive,
            Some(_) => MatchClass::Caution,
            None => MatchClass::Alert,
        }
    }

    pub fn border(self) -> Color {
        match self {
            MatchClass::Positive => POSITIVE,
            MatchClass::Caution => CAUTION,
            MatchClass::Alert => ALERT,
        }
    }

    pub fn fill(self) -> Color {
        let [r, g, b, _] = self.border();
        [r, g, b, FILL_ALPHA]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stroke {
    pub color: Color,
    pub width: f32,
}

/// One overlay drawing primitive, in mirrored surface coordinates.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    Ellipse {
        center: (f32, f32),
        radii: (f32, f32),
        fill: Option<Color>,
        stroke: Option<Stroke>,
        /// Blur radius of the outer glow, 0 for none.
        glow: f32,
    },
    Rect {
        xywh: (f32, f32, f32, f32),
        fill: Color,
    },
    /// Centre-aligned text with its baseline at `anchor.1`.
    Label {
        anchor: (f32, f32),
        text: String,
        font_px: u32,
        color: Color,
    },
}

/// A complete overlay. Applying a plan always clears the previous one first.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayPlan {
    pub width: u32,
    pub height: u32,
    pub ops: Vec<DrawOp>,
}

impl OverlayPlan {
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ops: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BannerKind {
    Matched,
    LowConfidence,
    NoMatch,
    NoFace,
}

/// Match banner text shown beside the video.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchBanner {
    pub kind: BannerKind,
    pub text: String,
}

/// Translated attribute text fields. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeLabels {
    pub age: Option<String>,
    pub gender: Option<String>,
    pub emotion: Option<String>,
    pub race: Option<String>,
}

/// Everything the view needs to show for one analysis result.
#[derive(Debug, Clone, PartialEq)]
pub struct Presentation {
    pub overlay: OverlayPlan,
    /// New status line, or `None` to keep the current one.
    pub status: Option<String>,
    pub labels: AttributeLabels,
    pub banner: MatchBanner,
}

/// Stateless mapping from results to presentations for a fixed surface size.
#[derive(Debug, Clone)]
pub struct Presenter {
    width: u32,
    height: u32,
    locale: Locale,
}

impl Presenter {
    pub fn new(width: u32, height: u32, locale: Locale) -> Self {
        Self {
            width,
            height,
            locale,
        }
    }

    /// Track the capture stream's native resolution.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }

    pub fn present(&self, result: &AnalysisResult) -> Presentation {
        let labels = self.labels(result);
        let mut overlay = OverlayPlan::empty(self.width, self.height);

        let Some(region) = &result.region else {
            return Presentation {
                overlay,
                status: Some(self.locale.text(Text::NoFaceDetected).to_string()),
                labels,
                banner: MatchBanner {
                    kind: BannerKind::NoFace,
                    text: self.locale.text(Text::NoFaceDetected).to_string(),
                },
            };
        };

        self.draw_face(&mut overlay.ops, region, result.face_match.as_ref());

        let status = result
            .face_confidence
            .filter(|c| *c > 0.0)
            .map(|c| self.locale.face_detected(percent(c)));

        Presentation {
            overlay,
            status,
            labels,
            banner: self.banner(result.face_match.as_ref()),
        }
    }

    fn labels(&self, result: &AnalysisResult) -> AttributeLabels {
        AttributeLabels {
            age: result.age.map(|a| self.locale.age(a)),
            gender: result.gender.as_ref().map(|g| self.locale.gender(g)),
            emotion: result.emotion.as_ref().map(|e| self.locale.emotion(e)),
            race: result.race.as_ref().map(|r| self.locale.race(r)),
        }
    }

    fn banner(&self, face_match: Option<&FaceMatch>) -> MatchBanner {
        match face_match {
            Some(m) => MatchBanner {
                kind: match MatchClass::of(Some(m)) {
                    MatchClass::Positive => BannerKind::Matched,
                    _ => BannerKind::LowConfidence,
                },
                text: self.locale.matched(&m.name, m.percent()),
            },
            None => MatchBanner {
                kind: BannerKind::NoMatch,
                text: self.locale.text(Text::NoMatch).to_string(),
            },
        }
    }

    fn draw_face(&self, ops: &mut Vec<DrawOp>, region: &FaceRegion, face_match: Option<&FaceMatch>) {
        let surface_w = self.width as f32;
        let class = MatchClass::of(face_match);
        let border = class.border();

        let flipped_x = surface_w - region.x - region.w;
        let mask_w = region.w * MASK_WIDTH_SCALE;
        let mask_h = region.h;
        let mask_x = flipped_x - (mask_w - region.w) / 2.0;
        let mask_y = region.y - region.h * MASK_LIFT;
        let center = (mask_x + mask_w / 2.0, mask_y + mask_h / 2.0);

        ops.push(DrawOp::Ellipse {
            center,
            radii: (mask_w / 2.0, mask_h / 2.0),
            fill: Some(class.fill()),
            stroke: Some(Stroke {
                color: border,
                width: MASK_STROKE,
            }),
            glow: MASK_GLOW,
        });

        if let Some((left, right)) = region.eyes() {
            // Eyes share one row just above the mask centre.
            let eye_y = center.1 - region.h * EYE_LIFT;
            let eye_r = region.w * EYE_RADIUS_SCALE;
            let pupil_r = eye_r * PUPIL_SCALE;
            let eyes = [surface_w - left.0, surface_w - right.0];

            for eye_x in eyes {
                ops.push(DrawOp::Ellipse {
                    center: (eye_x, eye_y),
                    radii: (eye_r, eye_r * 0.6),
                    fill: Some(EYE_FILL),
                    stroke: Some(Stroke {
                        color: border,
                        width: 2.0,
                    }),
                    glow: 0.0,
                });
            }
            for eye_x in eyes {
                ops.push(DrawOp::Ellipse {
                    center: (eye_x, eye_y),
                    radii: (pupil_r, pupil_r * 0.8),
                    fill: Some(border),
                    stroke: None,
                    glow: 0.0,
                });
            }
        }

        if let Some(m) = face_match {
            let text_y = mask_y - 15.0;
            ops.push(DrawOp::Rect {
                xywh: (
                    center.0 - LABEL_WIDTH / 2.0,
                    text_y - 30.0,
                    LABEL_WIDTH,
                    LABEL_HEIGHT,
                ),
                fill: LABEL_BACKING,
            });
            ops.push(DrawOp::Label {
                anchor: (center.0, text_y),
                text: format!("{} ({}%)", m.name, m.percent()),
                font_px: LABEL_FONT_PX,
                color: border,
            });
        }
    }
}
