use secrecy::{ExposeSecret, SecretString};

pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-exp";
pub const DEFAULT_HOST: &str = "generativelanguage.googleapis.com";

const BIDI_PATH: &str = "ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent";

/// Response modality requested in the setup frame, fixed per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseModality {
    Audio,
    Text,
    AudioAndText,
}

impl ResponseModality {
    pub fn as_wire(&self) -> Vec<String> {
        match self {
            Self::Audio => vec!["AUDIO".to_string()],
            Self::Text => vec!["TEXT".to_string()],
            Self::AudioAndText => vec!["AUDIO".to_string(), "TEXT".to_string()],
        }
    }
}

/// Per-session configuration, declared once in the setup frame.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub model: String,
    pub host: String,
    pub response_modality: ResponseModality,
    /// System-instruction paragraphs, one part each.
    pub system_instruction: Vec<String>,
    /// Optional turn sent right after the setup frame, before the ack.
    pub greeting: Option<String>,
    api_key: SecretString,
}

impl SessionConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            host: DEFAULT_HOST.to_string(),
            response_modality: ResponseModality::Audio,
            system_instruction: Vec::new(),
            greeting: None,
            api_key: SecretString::from(api_key.into()),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_modality(mut self, modality: ResponseModality) -> Self {
        self.response_modality = modality;
        self
    }

    pub fn with_instruction(mut self, parts: Vec<String>) -> Self {
        self.system_instruction = parts;
        self
    }

    pub fn with_greeting(mut self, greeting: impl Into<String>) -> Self {
        self.greeting = Some(greeting.into());
        self
    }

    pub fn ws_url(&self) -> String {
        format!(
            "wss://{}/{}?key={}",
            self.host,
            BIDI_PATH,
            self.api_key.expose_secret()
        )
    }
}
