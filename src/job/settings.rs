//! Settings describing what to generate and a request wrapping them.

use serde::{Deserialize, Serialize};

use crate::VidgenError;

/// Output resolutions supported by the generation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "480p")]
    Sd480,
    #[serde(rename = "720p")]
    Hd720,
    #[serde(rename = "1080p")]
    Hd1080,
    #[serde(rename = "2160p")]
    Uhd2160,
}

impl Resolution {
    /// The credit multiplier applied for this resolution.
    pub fn cost_multiplier(&self) -> f64 {
        match self {
            Self::Sd480 => 0.5,
            Self::Hd720 => 1.0,
            Self::Hd1080 => 1.5,
            Self::Uhd2160 => 2.5,
        }
    }
}

/// Quality presets trading fidelity against generation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Draft,
    Balanced,
    High,
}

impl Quality {
    /// The credit multiplier applied for this quality preset.
    pub fn cost_multiplier(&self) -> f64 {
        match self {
            Self::Draft => 0.5,
            Self::Balanced => 1.0,
            Self::High => 1.5,
        }
    }
}

/// Container format of the generated video.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoFormat {
    #[default]
    Mp4,
    Webm,
    Mov,
}

/// Aspect ratio of the generated video.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "16:9")]
    Widescreen,
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "1:1")]
    Square,
}

/// Clip durations accepted by the generation service, in seconds.
pub const SUPPORTED_DURATIONS: [u8; 3] = [5, 10, 30];

/// The inclusive range of valid guidance scales.
pub const GUIDANCE_SCALE_RANGE: std::ops::RangeInclusive<f32> = 1.0..=20.0;

/// The knobs controlling a single generation.
///
/// Settings are immutable once a job has been admitted; changing them for a
/// new attempt means submitting a new request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationSettings {
    pub resolution: Resolution,
    /// Clip length in seconds. Must be one of [`SUPPORTED_DURATIONS`].
    pub duration_seconds: u8,
    pub quality: Quality,
    pub format: VideoFormat,
    pub aspect_ratio: AspectRatio,
    /// How strongly the model should follow the prompt.
    pub guidance_scale: f32,
    /// Fixed seed for reproducible output.
    pub seed: Option<u64>,
    pub negative_prompt: Option<String>,
    pub enable_enhancement: bool,
    pub enable_upscaling: bool,
    pub enable_stabilization: bool,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            resolution: Resolution::Hd720,
            duration_seconds: 10,
            quality: Quality::Balanced,
            format: VideoFormat::default(),
            aspect_ratio: AspectRatio::default(),
            guidance_scale: 7.5,
            seed: None,
            negative_prompt: None,
            enable_enhancement: false,
            enable_upscaling: false,
            enable_stabilization: false,
        }
    }
}

impl GenerationSettings {
    pub fn validate(&self) -> Result<(), VidgenError> {
        if !SUPPORTED_DURATIONS.contains(&self.duration_seconds) {
            return Err(VidgenError::Validation {
                field: "duration_seconds",
                message: format!(
                    "duration must be one of {SUPPORTED_DURATIONS:?} seconds, got {}",
                    self.duration_seconds
                ),
            });
        }
        if !GUIDANCE_SCALE_RANGE.contains(&self.guidance_scale) {
            return Err(VidgenError::Validation {
                field: "guidance_scale",
                message: format!(
                    "guidance scale must be between {} and {}, got {}",
                    GUIDANCE_SCALE_RANGE.start(),
                    GUIDANCE_SCALE_RANGE.end(),
                    self.guidance_scale
                ),
            });
        }
        Ok(())
    }
}

/// A caller's request for one generated video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub title: String,
    pub prompt: String,
    pub settings: GenerationSettings,
}

impl GenerationRequest {
    /// Creates a request with default settings.
    pub fn new(title: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            prompt: prompt.into(),
            settings: GenerationSettings::default(),
        }
    }

    pub fn with_settings(self, settings: GenerationSettings) -> Self {
        Self { settings, ..self }
    }

    pub fn validate(&self) -> Result<(), VidgenError> {
        if self.prompt.trim().is_empty() {
            return Err(VidgenError::Validation {
                field: "prompt",
                message: "prompt must not be empty".to_owned(),
            });
        }
        if self.title.trim().is_empty() {
            return Err(VidgenError::Validation {
                field: "title",
                message: "title must not be empty".to_owned(),
            });
        }
        self.settings.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn default_settings_are_valid() {
        GenerationSettings::default().validate().unwrap();
    }

    #[test]
    fn rejects_unsupported_duration() {
        let settings = GenerationSettings {
            duration_seconds: 17,
            ..Default::default()
        };

        assert_matches!(
            settings.validate(),
            Err(VidgenError::Validation {
                field: "duration_seconds",
                ..
            })
        );
    }

    #[test]
    fn rejects_out_of_range_guidance_scale() {
        let settings = GenerationSettings {
            guidance_scale: 25.0,
            ..Default::default()
        };

        assert_matches!(
            settings.validate(),
            Err(VidgenError::Validation {
                field: "guidance_scale",
                ..
            })
        );
    }

    #[test]
    fn rejects_blank_prompt_and_title() {
        assert_matches!(
            GenerationRequest::new("Lion", "  ").validate(),
            Err(VidgenError::Validation { field: "prompt", .. })
        );
        assert_matches!(
            GenerationRequest::new("", "a lion at sunset").validate(),
            Err(VidgenError::Validation { field: "title", .. })
        );
        GenerationRequest::new("Lion", "a lion at sunset")
            .validate()
            .unwrap();
    }
}
