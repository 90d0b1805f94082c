use thiserror::Error;

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("SVG rendering failed: {0}")]
    Svg(#[from] resvg::usvg::Error),

    #[error("API key missing. Add an API key in the settings.")]
    MissingCredential,

    #[error("{0}")]
    NothingToProcess(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Blocked by safety settings.")]
    SafetyBlocked,

    #[error("Invalid API response structure: {0}")]
    InvalidResponse(String),

    #[error("Service returned HTTP {status}: {body}")]
    Service { status: u16, body: String },

    #[error("API data is missing for {0}")]
    MissingPayload(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedMedia(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Generation was cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl GenerationError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Missing payloads and cancellation end an attempt immediately; every
    /// service-side failure goes back through the backoff loop.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            GenerationError::MissingPayload(_)
                | GenerationError::Cancelled
                | GenerationError::MissingCredential
                | GenerationError::InvalidConfig(_)
        )
    }
}

impl From<anyhow::Error> for GenerationError {
    fn from(err: anyhow::Error) -> Self {
        GenerationError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GenerationError>;
