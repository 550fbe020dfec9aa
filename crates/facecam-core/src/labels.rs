//! Localized display strings and the lookup tables that translate backend
//! enum values. Unknown values always fall back to the raw backend string.

use crate::types::{Emotion, Gender, Race};
use serde::{Deserialize, Serialize};

const FALLBACK_EMOJI: &str = "\u{1F610}";

/// UI language.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Uz,
}

/// Fixed, parameterless UI strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Text {
    NoFaceDetected,
    NoMatch,
    RateLimited,
    TimedOut,
    CameraStarting,
    CameraConnected,
    CameraLost,
    InitialAnalysisDone,
    AnalysisUpdated,
    AnalysisFailed,
    Registering,
    RegisterSucceeded,
    RegisterFailed,
    RegisterError,
    NameRequired,
    BackendExited,
    SessionStopped,
}

impl Locale {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "en" | "english" => Some(Locale::En),
            "uz" | "uzbek" => Some(Locale::Uz),
            _ => None,
        }
    }

    pub fn text(self, key: Text) -> &'static str {
        match self {
            Locale::En => match key {
                Text::NoFaceDetected => "No face detected",
                Text::NoMatch => "No matching face found",
                Text::RateLimited => "Too many requests. Please wait a moment.",
                Text::TimedOut => "The analysis request timed out",
                Text::CameraStarting => "Starting camera...",
                Text::CameraConnected => "Camera connected",
                Text::CameraLost => "Camera stream failed, reconnecting",
                Text::InitialAnalysisDone => {
                    "Initial analysis complete. Press analyze to refresh."
                }
                Text::AnalysisUpdated => "Analysis updated.",
                Text::AnalysisFailed => "Analysis failed. Please try again.",
                Text::Registering => "Registering...",
                Text::RegisterSucceeded => "Face registered successfully",
                Text::RegisterFailed => "Registration was not completed",
                Text::RegisterError => "An error occurred during registration",
                Text::NameRequired => "Please enter a name",
                Text::BackendExited => "Backend process terminated unexpectedly",
                Text::SessionStopped => "Session stopped",
            },
            Locale::Uz => match key {
                Text::NoFaceDetected => "Yuz aniqlanmadi",
                Text::NoMatch => "Mos kelgan yuz topilmadi",
                Text::RateLimited => "Juda ko'p so'rovlar yuborildi. Iltimos, biroz kuting.",
                Text::TimedOut => "So'rov vaqti tugadi",
                Text::CameraStarting => "Kamera ishga tushirilmoqda...",
                Text::CameraConnected => "Kamera ulandi",
                Text::CameraLost => "Video elementida xatolik yuz berdi",
                Text::InitialAnalysisDone => {
                    "Dastlabki tahlil yakunlandi. Yangilash uchun tugmani bosing."
                }
                Text::AnalysisUpdated => "Tahlil muvaffaqiyatli yangilandi.",
                Text::AnalysisFailed => "Tahlil amalga oshirilmadi. Qaytadan urinib ko'ring.",
                Text::Registering => "Ro'yxatdan o'tkazilmoqda...",
                Text::RegisterSucceeded => "Yuz muvaffaqiyatli ro'yxatdan o'tkazildi",
                Text::RegisterFailed => "Ro'yxatdan o'tkazish amalga oshirilmadi",
                Text::RegisterError => "Ro'yxatdan o'tkazish vaqtida xatolik yuz berdi",
                Text::NameRequired => "Iltimos, ism kiriting",
                Text::BackendExited => "Server jarayoni kutilmaganda to'xtadi",
                Text::SessionStopped => "Sessiya to'xtatildi",
            },
        }
    }

    pub fn age(self, age: f32) -> String {
        match self {
            Locale::En => format!("{age} years"),
            Locale::Uz => format!("{age} yosh"),
        }
    }

    pub fn gender(self, gender: &Gender) -> String {
        let translated = match (self, gender) {
            (Locale::En, Gender::Man) => "Male",
            (Locale::En, Gender::Woman) => "Female",
            (Locale::Uz, Gender::Man) => "Erkak",
            (Locale::Uz, Gender::Woman) => "Ayol",
            (_, Gender::Other(raw)) => raw.as_str(),
        };
        translated.to_string()
    }

    /// Emoji plus translated emotion name, e.g. "😊 Happy".
    pub fn emotion(self, emotion: &Emotion) -> String {
        format!("{} {}", emotion_emoji(emotion), self.emotion_name(emotion))
    }

    fn emotion_name(self, emotion: &Emotion) -> String {
        let name = match (self, emotion) {
            (_, Emotion::Other(raw)) => raw.as_str(),
            (Locale::En, Emotion::Happy) => "Happy",
            (Locale::En, Emotion::Sad) => "Sad",
            (Locale::En, Emotion::Angry) => "Angry",
            (Locale::En, Emotion::Fear) => "Afraid",
            (Locale::En, Emotion::Surprise) => "Surprised",
            (Locale::En, Emotion::Neutral) => "Neutral",
            (Locale::En, Emotion::Disgust) => "Disgusted",
            (Locale::Uz, Emotion::Happy) => "Baxtli",
            (Locale::Uz, Emotion::Sad) => "G'amgin",
            (Locale::Uz, Emotion::Angry) => "Jahli chiqqan",
            (Locale::Uz, Emotion::Fear) => "Qo'rqqan",
            (Locale::Uz, Emotion::Surprise) => "Ajablanib qolgan",
            (Locale::Uz, Emotion::Neutral) => "Betaraf",
            (Locale::Uz, Emotion::Disgust) => "Jirkanib qolgan",
        };
        name.to_string()
    }

    pub fn race(self, race: &Race) -> String {
        let name = match (self, race) {
            (_, Race::Other(raw)) => raw.as_str(),
            (Locale::En, Race::Asian) => "Asian",
            (Locale::En, Race::Indian) => "Indian",
            (Locale::En, Race::Black) => "Black",
            (Locale::En, Race::White) => "White",
            (Locale::En, Race::MiddleEastern) => "Middle Eastern",
            (Locale::En, Race::LatinoHispanic) => "Latino",
            (Locale::Uz, Race::Asian) => "Osiyolik",
            (Locale::Uz, Race::Indian) => "Hind",
            (Locale::Uz, Race::Black) => "Qora tanli",
            (Locale::Uz, Race::White) => "Oq tanli",
            (Locale::Uz, Race::MiddleEastern) => "Yaqin Sharq",
            (Locale::Uz, Race::LatinoHispanic) => "Latino",
        };
        name.to_string()
    }

    pub fn face_detected(self, pct: i64) -> String {
        match self {
            Locale::En => format!("Face detected ({pct}% confidence)"),
            Locale::Uz => format!("Yuz aniqlandi ({pct}% ishonchlilik)"),
        }
    }

    pub fn matched(self, name: &str, pct: i64) -> String {
        match self {
            Locale::En => format!("Matched {name} ({pct}% confidence)"),
            Locale::Uz => format!("{name} bilan mos keldi ({pct}% ishonchlilik)"),
        }
    }

    pub fn http_status(self, status: u16) -> String {
        match self {
            Locale::En => format!("HTTP error! status: {status}"),
            Locale::Uz => format!("HTTP xatosi! status: {status}"),
        }
    }

    pub fn camera_error(self, detail: &str) -> String {
        match self {
            Locale::En => format!("Camera access failed: {detail}"),
            Locale::Uz => format!("Kameraga kirishda xatolik: {detail}"),
        }
    }

    /// Prefix a failure detail for the status line.
    pub fn error(self, detail: &str) -> String {
        match self {
            Locale::En => format!("Error: {detail}"),
            Locale::Uz => format!("Xatolik: {detail}"),
        }
    }
}

pub fn emotion_emoji(emotion: &Emotion) -> &'static str {
    match emotion {
        Emotion::Happy => "\u{1F60A}",
        Emotion::Sad => "\u{1F622}",
        Emotion::Angry => "\u{1F620}",
        Emotion::Fear => "\u{1F628}",
        Emotion::Surprise => "\u{1F632}",
        Emotion::Neutral => "\u{1F610}",
        Emotion::Disgust => "\u{1F922}",
        Emotion::Other(_) => FALLBACK_EMOJI,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locale_parse() {
        assert_eq!(Locale::parse("EN"), Some(Locale::En));
        assert_eq!(Locale::parse(" uz "), Some(Locale::Uz));
        assert_eq!(Locale::parse("fr"), None);
    }

    #[test]
    fn test_emotion_label_with_emoji() {
        assert_eq!(Locale::En.emotion(&Emotion::Happy), "\u{1F60A} Happy");
        assert_eq!(Locale::Uz.emotion(&Emotion::Sad), "\u{1F622} G'amgin");
    }

    #[test]
    fn test_unknown_values_fall_back_to_raw() {
        let emotion = Emotion::from("contempt".to_string());
        assert_eq!(Locale::En.emotion(&emotion), "\u{1F610} contempt");
        assert_eq!(Locale::Uz.gender(&Gender::from("X".to_string())), "X");
        assert_eq!(Locale::En.race(&Race::from("Martian".to_string())), "Martian");
    }

    #[test]
    fn test_race_lookup_is_case_insensitive() {
        assert_eq!(Locale::Uz.race(&Race::from("ASIAN".to_string())), "Osiyolik");
        assert_eq!(
            Locale::En.race(&Race::from("Latino Hispanic".to_string())),
            "Latino"
        );
    }

    #[test]
    fn test_whole_ages_print_without_fraction() {
        assert_eq!(Locale::En.age(31.0), "31 years");
        assert_eq!(Locale::Uz.age(27.0), "27 yosh");
    }
}
