use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

use crate::audio::{AudioBackendKind, CaptureConfig, InterruptReset, OutputConfig};
use crate::session::{
    SessionConfig, DEFAULT_ENDPOINT, DEFAULT_MODEL, DEFAULT_PERSONA, DEFAULT_VOICE,
};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub concierge: ConciergeConfig,
    pub audio: AudioConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "dinesa-concierge".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ConciergeConfig {
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    pub endpoint: String,
    /// Overrides GEMINI_API_KEY / API_KEY when set
    pub api_key: Option<String>,
    pub interrupt_reset: InterruptReset,
}

impl Default for ConciergeConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            system_instruction: DEFAULT_PERSONA.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            interrupt_reset: InterruptReset::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub backend: AudioBackendKind,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub output_channels: u16,
    pub frame_size: usize,
    /// Recording replayed as the microphone (file backend)
    pub wav_input: Option<PathBuf>,
    /// Where the file backend renders playback
    pub wav_output: Option<PathBuf>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        let capture = CaptureConfig::default();
        let output = OutputConfig::default();

        Self {
            backend: AudioBackendKind::default(),
            input_sample_rate: capture.sample_rate,
            output_sample_rate: output.sample_rate,
            output_channels: output.channels,
            frame_size: capture.frame_size,
            wav_input: None,
            wav_output: None,
        }
    }
}

impl Config {
    /// Load `path` (any extension the config crate knows, optional) plus
    /// `CONCIERGE__SECTION__KEY` environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("CONCIERGE").separator("__"))
            .build()
            .with_context(|| format!("Failed to load config from {}", path))?;

        Ok(settings.try_deserialize()?)
    }

    /// API key from config, then GEMINI_API_KEY, then API_KEY
    pub fn api_key(&self) -> Option<String> {
        self.concierge
            .api_key
            .clone()
            .or_else(|| std::env::var("GEMINI_API_KEY").ok())
            .or_else(|| std::env::var("API_KEY").ok())
            .filter(|key| !key.is_empty())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            model: self.concierge.model.clone(),
            voice_name: self.concierge.voice.clone(),
            system_instruction: self.concierge.system_instruction.clone(),
            api_key: self.api_key(),
            endpoint: self.concierge.endpoint.clone(),
            capture: CaptureConfig {
                sample_rate: self.audio.input_sample_rate,
                channels: 1,
                frame_size: self.audio.frame_size,
            },
            output: OutputConfig {
                sample_rate: self.audio.output_sample_rate,
                channels: self.audio.output_channels,
            },
            interrupt_reset: self.concierge.interrupt_reset,
            ..SessionConfig::default()
        }
    }
}
