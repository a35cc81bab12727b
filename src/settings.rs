//! Settings management for cluster playback
//!
//! Handles loading/saving of the cluster configuration XML file. The file is
//! read once at startup; every field has a default so partial files load.

use quick_xml::de::from_str;
use quick_xml::se::to_string;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Which of the two video backends a policy entry refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BackendKind {
    /// Broad format support
    #[default]
    General,
    /// Narrower codec set, tuned for throughput
    Accelerated,
}

impl BackendKind {
    /// The backend that is not this one
    pub fn other(self) -> Self {
        match self {
            BackendKind::General => BackendKind::Accelerated,
            BackendKind::Accelerated => BackendKind::General,
        }
    }

    pub fn index(self) -> usize {
        match self {
            BackendKind::General => 0,
            BackendKind::Accelerated => 1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::General => "general",
            BackendKind::Accelerated => "accelerated",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Backend selection policy as stored in the configuration file.
///
/// The list fields are free-form text (`"mp4 mov, avi"`); use the accessor
/// methods to get normalized entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendPolicySettings {
    /// Backend used when neither list matches
    #[serde(rename = "defaultBackend", default)]
    pub default_backend: BackendKind,

    /// Re-evaluate the choice once the loaded file's codec is known
    #[serde(rename = "selectByCodec", default)]
    pub select_by_codec: bool,

    #[serde(rename = "generalExtensions", default)]
    pub general_extensions: String,

    #[serde(rename = "acceleratedExtensions", default = "default_accelerated_extensions")]
    pub accelerated_extensions: String,

    #[serde(rename = "generalCodecs", default)]
    pub general_codecs: String,

    #[serde(rename = "acceleratedCodecs", default = "default_accelerated_codecs")]
    pub accelerated_codecs: String,
}

fn default_accelerated_extensions() -> String {
    String::new()
}

fn default_accelerated_codecs() -> String {
    "hap hap_alpha hap_q hap_q_alpha".to_string()
}

impl Default for BackendPolicySettings {
    fn default() -> Self {
        Self {
            default_backend: BackendKind::General,
            select_by_codec: false,
            general_extensions: String::new(),
            accelerated_extensions: default_accelerated_extensions(),
            general_codecs: String::new(),
            accelerated_codecs: default_accelerated_codecs(),
        }
    }
}

impl BackendPolicySettings {
    /// Extensions preferring the given backend (lowercase, no leading dot)
    pub fn extensions(&self, kind: BackendKind) -> Vec<String> {
        match kind {
            BackendKind::General => parse_list(&self.general_extensions),
            BackendKind::Accelerated => parse_list(&self.accelerated_extensions),
        }
    }

    /// Codecs preferring the given backend (lowercase)
    pub fn codecs(&self, kind: BackendKind) -> Vec<String> {
        match kind {
            BackendKind::General => parse_list(&self.general_codecs),
            BackendKind::Accelerated => parse_list(&self.accelerated_codecs),
        }
    }
}

/// Split a configuration list on whitespace, commas and semicolons
fn parse_list(raw: &str) -> Vec<String> {
    raw.split(|c: char| c.is_whitespace() || c == ',' || c == ';')
        .map(|entry| entry.trim().trim_start_matches('.').to_lowercase())
        .filter(|entry| !entry.is_empty())
        .collect()
}

/// Cluster configuration stored as XML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "ClusterSettings")]
pub struct ClusterSettings {
    /// How many consecutive frames a changed field is re-broadcast (1-16)
    #[serde(rename = "syncRedundancy", default = "default_sync_redundancy")]
    pub sync_redundancy: u32,

    /// Default "keep visible across N slides" for new layers
    #[serde(rename = "keepVisibleDefault", default)]
    pub keep_visible_default: u32,

    /// Playback drift (seconds) tolerated on nodes before they seek
    #[serde(rename = "timeSyncThreshold", default = "default_time_sync_threshold")]
    pub time_sync_threshold: f64,

    /// Largest texture edge accepted before any allocation
    #[serde(rename = "maxTextureSize", default = "default_max_texture_size")]
    pub max_texture_size: u32,

    /// Configured volume for new media layers (0-100)
    #[serde(rename = "defaultVolume", default = "default_volume")]
    pub default_volume: f32,

    /// Append a length trailer to every layer entry and check it on decode.
    /// Master and nodes must agree on this flag.
    #[serde(rename = "verifyFrames", default)]
    pub verify_frames: bool,

    /// Video backend selection policy
    #[serde(rename = "backendPolicy", default)]
    pub backend_policy: BackendPolicySettings,
}

fn default_sync_redundancy() -> u32 {
    3
}

fn default_time_sync_threshold() -> f64 {
    0.1
}

fn default_max_texture_size() -> u32 {
    16384
}

fn default_volume() -> f32 {
    100.0
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            sync_redundancy: default_sync_redundancy(),
            keep_visible_default: 0,
            time_sync_threshold: default_time_sync_threshold(),
            max_texture_size: default_max_texture_size(),
            default_volume: default_volume(),
            verify_frames: false,
            backend_policy: BackendPolicySettings::default(),
        }
    }
}

impl ClusterSettings {
    /// Clamp values into their valid ranges
    pub fn sanitize(&mut self) {
        self.sync_redundancy = self.sync_redundancy.clamp(1, 16);
        self.max_texture_size = self.max_texture_size.max(1);
        self.default_volume = self.default_volume.clamp(0.0, 100.0);
        if !self.time_sync_threshold.is_finite() || self.time_sync_threshold < 0.0 {
            self.time_sync_threshold = default_time_sync_threshold();
        }
    }

    /// Parse settings from an XML string
    pub fn from_xml(contents: &str) -> Result<Self, SettingsError> {
        let mut settings: Self = from_str(contents)?;
        settings.sanitize();
        Ok(settings)
    }

    /// Load settings from an XML file
    pub fn load_from_file(path: &Path) -> Result<Self, SettingsError> {
        let contents = fs::read_to_string(path)?;
        Self::from_xml(&contents)
    }

    /// Load settings, falling back to defaults when the file is missing or malformed
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load_from_file(path) {
            Ok(settings) => {
                tracing::info!("Loaded cluster settings from {}", path.display());
                settings
            }
            Err(e) => {
                tracing::warn!("Using default cluster settings ({}): {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save settings to an XML file
    pub fn save_to_file(&self, path: &Path) -> Result<(), SettingsError> {
        let xml = to_string(self)?;
        let formatted = format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}", xml);
        fs::write(path, formatted)?;
        Ok(())
    }

    /// Default settings location in the user config directory
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("ImmersiveCluster");
            p.push("cluster.xml");
            p
        })
    }
}

/// Settings-related errors
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XML parse error: {0}")]
    XmlParse(#[from] quick_xml::DeError),
    #[error("XML write error: {0}")]
    XmlWrite(#[from] quick_xml::SeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = ClusterSettings::default();
        assert_eq!(settings.sync_redundancy, 3);
        assert_eq!(settings.keep_visible_default, 0);
        assert_eq!(settings.max_texture_size, 16384);
        assert_eq!(settings.backend_policy.default_backend, BackendKind::General);
        assert!(!settings.verify_frames);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let xml = r#"<ClusterSettings>
            <syncRedundancy>40</syncRedundancy>
            <backendPolicy>
                <defaultBackend>Accelerated</defaultBackend>
                <generalExtensions>.MKV, avi;webm</generalExtensions>
            </backendPolicy>
        </ClusterSettings>"#;
        let settings = ClusterSettings::from_xml(xml).unwrap();
        assert_eq!(settings.sync_redundancy, 16);
        assert_eq!(settings.time_sync_threshold, 0.1);
        let policy = &settings.backend_policy;
        assert_eq!(policy.default_backend, BackendKind::Accelerated);
        assert_eq!(policy.extensions(BackendKind::General), vec!["mkv", "avi", "webm"]);
        assert_eq!(policy.codecs(BackendKind::Accelerated)[0], "hap");
    }

    #[test]
    fn test_missing_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ClusterSettings::load_or_default(&dir.path().join("missing.xml"));
        assert_eq!(settings, ClusterSettings::default());
    }

    #[test]
    fn test_malformed_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.xml");
        fs::write(&path, "<ClusterSettings><syncRedundancy>three").unwrap();
        let settings = ClusterSettings::load_or_default(&path);
        assert_eq!(settings.sync_redundancy, 3);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.xml");
        let mut settings = ClusterSettings::default();
        settings.keep_visible_default = 2;
        settings.backend_policy.accelerated_extensions = "mov".to_string();
        settings.save_to_file(&path).unwrap();

        let loaded = ClusterSettings::load_from_file(&path).unwrap();
        assert_eq!(loaded.keep_visible_default, 2);
        assert_eq!(loaded.backend_policy.extensions(BackendKind::Accelerated), vec!["mov"]);
    }
}
