use crate::playlist::MediaKind;
use anyhow::Result;
use async_trait::async_trait;

/// Pre-display states shown instead of a blank screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Banner {
    Connecting,
    Standby,
    NoContent,
    Error(String),
}

impl Banner {
    pub fn text(&self) -> String {
        match self {
            Banner::Connecting => "Connecting...".to_string(),
            Banner::Standby => "Standby".to_string(),
            Banner::NoContent => "Waiting for content".to_string(),
            Banner::Error(message) => format!("Error: {}", message),
        }
    }
}

#[async_trait]
pub trait Display: Send + Sync {
    async fn show(&self, location: &str, kind: MediaKind) -> Result<()>;

    /// True once the current video has played to its end.
    async fn finished(&self) -> Result<bool>;

    async fn stop(&self) -> Result<()>;

    async fn banner(&self, banner: &Banner) -> Result<()>;
}
