//! Session and editor configuration.

use crate::error::{Result, SessionError};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::time::Duration;

pub const FONT_SIZE_RANGE: RangeInclusive<u32> = 8..=48;
pub const CONTENT_WIDTH_RANGE: RangeInclusive<u32> = 400..=2000;

/// Runtime settings of a session controller. Not persisted.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Quiet period before a change is written to the local store.
    pub save_debounce_ms: u64,
    /// Give up connecting to the replication provider after this long.
    pub connect_timeout_ms: u64,
    /// Base of the web share link.
    pub web_url: String,
    /// Presence name; a random one is generated when unset.
    pub user_name: Option<String>,
    /// Rejoin the persisted room on startup.
    pub resume_collab: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            save_debounce_ms: 200,
            connect_timeout_ms: 5000,
            web_url: "https://quire.app".to_string(),
            user_name: None,
            resume_collab: true,
        }
    }
}

impl SessionConfig {
    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Builder for [`SessionConfig`].
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
        }
    }

    pub fn save_debounce(mut self, ms: u64) -> Self {
        self.config.save_debounce_ms = ms;
        self
    }

    pub fn connect_timeout(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    pub fn web_url(mut self, url: impl Into<String>) -> Self {
        self.config.web_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn user_name(mut self, name: impl Into<String>) -> Self {
        self.config.user_name = Some(name.into());
        self
    }

    pub fn resume_collab(mut self, enabled: bool) -> Self {
        self.config.resume_collab = enabled;
        self
    }

    pub fn build(self) -> SessionConfig {
        self.config
    }
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// User-facing editor preferences, persisted in the `Config` collection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorConfig {
    pub theme: String,
    pub code_theme: String,
    pub font: String,
    pub font_size: u32,
    pub content_width: u32,
    #[serde(default)]
    pub typewriter_mode: bool,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            theme: "light".to_string(),
            code_theme: "material-light".to_string(),
            font: "ia-writer-mono".to_string(),
            font_size: 24,
            content_width: 800,
            typewriter_mode: false,
        }
    }
}

impl EditorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.font.trim().is_empty() {
            return Err(SessionError::InvalidConfig("font must not be empty".into()));
        }
        if self.theme.trim().is_empty() {
            return Err(SessionError::InvalidConfig("theme must not be empty".into()));
        }
        if !FONT_SIZE_RANGE.contains(&self.font_size) {
            return Err(SessionError::InvalidConfig(format!(
                "font size {} outside {:?}",
                self.font_size, FONT_SIZE_RANGE
            )));
        }
        if !CONTENT_WIDTH_RANGE.contains(&self.content_width) {
            return Err(SessionError::InvalidConfig(format!(
                "content width {} outside {:?}",
                self.content_width, CONTENT_WIDTH_RANGE
            )));
        }
        Ok(())
    }

    /// Parse and validate a persisted config record.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let config: EditorConfig = serde_json::from_slice(bytes)
            .map_err(|e| SessionError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply a partial update, leaving `self` untouched if the result is invalid.
    pub fn merged(&self, patch: &ConfigPatch) -> Result<Self> {
        let mut next = self.clone();
        if let Some(theme) = &patch.theme {
            next.theme = theme.clone();
        }
        if let Some(code_theme) = &patch.code_theme {
            next.code_theme = code_theme.clone();
        }
        if let Some(font) = &patch.font {
            next.font = font.clone();
        }
        if let Some(size) = patch.font_size {
            next.font_size = size;
        }
        if let Some(width) = patch.content_width {
            next.content_width = width;
        }
        if let Some(typewriter) = patch.typewriter_mode {
            next.typewriter_mode = typewriter;
        }
        next.validate()?;
        Ok(next)
    }
}

/// Partial [`EditorConfig`] update.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigPatch {
    pub theme: Option<String>,
    pub code_theme: Option<String>,
    pub font: Option<String>,
    pub font_size: Option<u32>,
    pub content_width: Option<u32>,
    pub typewriter_mode: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = SessionConfigBuilder::new()
            .save_debounce(50)
            .web_url("https://example.org/")
            .user_name("Tess")
            .build();
        assert_eq!(config.save_debounce(), Duration::from_millis(50));
        assert_eq!(config.web_url, "https://example.org");
        assert_eq!(config.user_name.as_deref(), Some("Tess"));
        assert!(config.resume_collab);
    }

    #[test]
    fn test_default_editor_config_is_valid() {
        assert!(EditorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_merge_rejects_out_of_range() {
        let config = EditorConfig::default();
        let patch = ConfigPatch {
            font_size: Some(100),
            ..Default::default()
        };
        assert!(matches!(
            config.merged(&patch),
            Err(SessionError::InvalidConfig(_))
        ));

        let patch = ConfigPatch {
            font_size: Some(16),
            theme: Some("dark".into()),
            ..Default::default()
        };
        let merged = config.merged(&patch).unwrap();
        assert_eq!(merged.font_size, 16);
        assert_eq!(merged.theme, "dark");
        assert_eq!(merged.font, config.font);
    }

    #[test]
    fn test_from_slice_validates() {
        let bytes = br#"{"theme":"light","code_theme":"x","font":"","font_size":12,"content_width":800}"#;
        assert!(matches!(
            EditorConfig::from_slice(bytes),
            Err(SessionError::InvalidConfig(_))
        ));
        assert!(matches!(
            EditorConfig::from_slice(b"not json"),
            Err(SessionError::InvalidConfig(_))
        ));
    }
}
