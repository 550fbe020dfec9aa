use serde::{Deserialize, Serialize};

/// Face bounding box in unmirrored frame space, as reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    #[serde(default)]
    pub left_eye: Option<(f32, f32)>,
    #[serde(default)]
    pub right_eye: Option<(f32, f32)>,
}

impl FaceRegion {
    /// Both eye centres, when the detector reported them.
    pub fn eyes(&self) -> Option<((f32, f32), (f32, f32))> {
        Some((self.left_eye?, self.right_eye?))
    }
}

/// Best gallery match for the analysed face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceMatch {
    pub name: String,
    /// Cosine similarity of the match, 0–1.
    pub confidence: f32,
}

impl FaceMatch {
    /// Confidence as a rounded percentage.
    pub fn percent(&self) -> i64 {
        percent(self.confidence)
    }
}

/// Decoded `/analyze` response.
///
/// Produced once per round trip and consumed by the presenter; never retained.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(default)]
    pub age: Option<f32>,
    #[serde(default, rename = "dominant_gender")]
    pub gender: Option<Gender>,
    #[serde(default, rename = "dominant_emotion")]
    pub emotion: Option<Emotion>,
    #[serde(default, rename = "dominant_race")]
    pub race: Option<Race>,
    #[serde(default)]
    pub face_confidence: Option<f32>,
    #[serde(default)]
    pub region: Option<FaceRegion>,
    #[serde(default, rename = "match")]
    pub face_match: Option<FaceMatch>,
    /// Application-level failure reported inside a 2xx body.
    #[serde(default)]
    pub error: Option<String>,
}

impl AnalysisResult {
    pub fn from_json(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}

/// Decoded `/register` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterReply {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl RegisterReply {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// Dominant gender. Unknown values keep the raw backend string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Gender {
    Man,
    Woman,
    Other(String),
}

impl Gender {
    pub fn as_str(&self) -> &str {
        match self {
            Gender::Man => "Man",
            Gender::Woman => "Woman",
            Gender::Other(raw) => raw,
        }
    }
}

impl From<String> for Gender {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "Man" => Gender::Man,
            "Woman" => Gender::Woman,
            _ => Gender::Other(raw),
        }
    }
}

impl From<Gender> for String {
    fn from(g: Gender) -> Self {
        g.as_str().to_string()
    }
}

/// Dominant facial expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Emotion {
    Happy,
    Sad,
    Angry,
    Fear,
    Surprise,
    Neutral,
    Disgust,
    Other(String),
}

impl Emotion {
    pub fn as_str(&self) -> &str {
        match self {
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Angry => "angry",
            Emotion::Fear => "fear",
            Emotion::Surprise => "surprise",
            Emotion::Neutral => "neutral",
            Emotion::Disgust => "disgust",
            Emotion::Other(raw) => raw,
        }
    }
}

impl From<String> for Emotion {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "happy" => Emotion::Happy,
            "sad" => Emotion::Sad,
            "angry" => Emotion::Angry,
            "fear" => Emotion::Fear,
            "surprise" => Emotion::Surprise,
            "neutral" => Emotion::Neutral,
            "disgust" => Emotion::Disgust,
            _ => Emotion::Other(raw),
        }
    }
}

impl From<Emotion> for String {
    fn from(e: Emotion) -> Self {
        e.as_str().to_string()
    }
}

/// Dominant race class. Matching is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Race {
    Asian,
    Indian,
    Black,
    White,
    MiddleEastern,
    LatinoHispanic,
    Other(String),
}

impl Race {
    pub fn as_str(&self) -> &str {
        match self {
            Race::Asian => "asian",
            Race::Indian => "indian",
            Race::Black => "black",
            Race::White => "white",
            Race::MiddleEastern => "middle eastern",
            Race::LatinoHispanic => "latino hispanic",
            Race::Other(raw) => raw,
        }
    }
}

impl From<String> for Race {
    fn from(raw: String) -> Self {
        match raw.to_lowercase().as_str() {
            "asian" => Race::Asian,
            "indian" => Race::Indian,
            "black" => Race::Black,
            "white" => Race::White,
            "middle eastern" => Race::MiddleEastern,
            "latino hispanic" => Race::LatinoHispanic,
            _ => Race::Other(raw),
        }
    }
}

impl From<Race> for String {
    fn from(r: Race) -> Self {
        r.as_str().to_string()
    }
}

/// Round a 0–1 score to a whole percentage.
pub fn percent(score: f32) -> i64 {
    (score * 100.0).round() as i64
}
