//! Persisted composition document
//!
//! A project stores the master layer list and every slide with the
//! replicated state of each layer. Source paths can be stored relative to
//! the document so a show folder can be moved between machines.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use glam::Vec3;
use quick_xml::de::from_str;
use quick_xml::se::to_string;
use serde::{Deserialize, Serialize};

use crate::compositor::{
    CaptureRegion, ContainerError, GridMode, Hierarchy, Layer, LayerKind, PlaneParams, Roi, SlideContainer,
    StereoMode, TextAlign, TextStyle,
};
use crate::context::ClusterContext;
use crate::video::{is_url, EndAction, LoopMode};

/// Project-related errors
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XML parse error: {0}")]
    XmlParse(#[from] quick_xml::DeError),
    #[error("XML write error: {0}")]
    XmlWrite(#[from] quick_xml::SeError),
    #[error("invalid composition: {0}")]
    Container(#[from] ContainerError),
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    #[serde(rename = "@x")]
    pub x: f32,
    #[serde(rename = "@y")]
    pub y: f32,
    #[serde(rename = "@z")]
    pub z: f32,
}

impl From<Vec3> for Vector3 {
    fn from(v: Vec3) -> Self {
        Self { x: v.x, y: v.y, z: v.z }
    }
}

impl From<Vector3> for Vec3 {
    fn from(v: Vector3) -> Self {
        Vec3::new(v.x, v.y, v.z)
    }
}

/// Saved state of one layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerRecord {
    #[serde(rename = "@id")]
    pub id: u32,
    pub kind: LayerKind,
    pub name: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub hierarchy: Hierarchy,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub master_only: bool,
    #[serde(default)]
    pub flip: bool,
    #[serde(default = "default_alpha")]
    pub alpha: f32,
    #[serde(default)]
    pub grid: GridMode,
    #[serde(default)]
    pub stereo: StereoMode,
    #[serde(default)]
    pub rotation: Vector3,
    #[serde(default)]
    pub translation: Vector3,
    #[serde(default)]
    pub roi: Roi,
    #[serde(default)]
    pub plane: PlaneParams,
    #[serde(default)]
    pub keep_visible: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point_size: Option<f32>,
    /// `#rrggbbaa`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_align: Option<TextAlign>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_mode: Option<LoopMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_action: Option<EndAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_region: Option<CaptureRegion>,
}

fn default_alpha() -> f32 {
    1.0
}

impl LayerRecord {
    /// Snapshot a layer
    pub fn capture(layer: &Layer) -> Self {
        let style = layer.text_style();
        let capture = layer.capture_region();
        Self {
            id: layer.id(),
            kind: layer.kind(),
            name: layer.name().to_string(),
            source: layer.source().to_string(),
            hierarchy: layer.hierarchy(),
            locked: layer.is_locked(),
            master_only: layer.is_master_only(),
            flip: layer.flip(),
            alpha: layer.alpha(),
            grid: layer.grid(),
            stereo: layer.stereo(),
            rotation: layer.rotation().into(),
            translation: layer.translation().into(),
            roi: layer.roi(),
            plane: *layer.plane().params(),
            keep_visible: layer.keep_visible(),
            volume: layer.volume(),
            page: layer.page(),
            text: layer.text().map(str::to_string),
            font_family: style.map(|s| s.font_family.clone()),
            point_size: style.map(|s| s.point_size),
            text_color: style.map(|s| format_color(s.color)),
            text_align: style.map(|s| s.alignment),
            loop_mode: layer.loop_mode(),
            end_action: layer.end_action(),
            speed: layer.speed(),
            display: capture.map(|(display, _)| display),
            capture_region: capture.map(|(_, region)| region),
        }
    }

    /// Build a layer carrying this record's state
    pub fn build(&self, ctx: &Arc<ClusterContext>) -> Layer {
        let mut layer = Layer::with_id(self.id, self.kind, ctx);
        layer.set_name(self.name.clone());
        layer.set_source(self.source.clone());
        layer.set_hierarchy(self.hierarchy);
        layer.set_master_only(self.master_only);
        layer.set_flip(self.flip);
        layer.set_grid(self.grid);
        layer.set_stereo(self.stereo);
        layer.set_rotation(self.rotation.into());
        layer.set_translation(self.translation.into());
        layer.set_roi(self.roi);
        layer.set_plane_params(self.plane);
        layer.set_keep_visible(self.keep_visible);

        if let Some(volume) = self.volume {
            layer.set_volume(volume);
        }
        if let Some(page) = self.page {
            layer.set_page(page);
        }
        if let Some(text) = &self.text {
            layer.set_text(text);
        }
        if layer.text_style().is_some() {
            let mut style = TextStyle::default();
            if let Some(family) = &self.font_family {
                style.font_family = family.clone();
            }
            if let Some(size) = self.point_size {
                style.point_size = size;
            }
            if let Some(color) = self.text_color.as_deref().and_then(parse_color) {
                style.color = color;
            }
            if let Some(alignment) = self.text_align {
                style.alignment = alignment;
            }
            layer.set_text_style(style);
        }
        if let Some(mode) = self.loop_mode {
            layer.set_loop_mode(mode);
        }
        if let Some(action) = self.end_action {
            layer.set_end_action(action);
        }
        if let Some(speed) = self.speed {
            layer.set_speed(speed);
        }
        if let Some(region) = self.capture_region {
            layer.set_capture_region(self.display.unwrap_or(0), region);
        }

        layer.set_alpha(self.alpha);
        layer.set_locked(self.locked);
        layer
    }
}

fn format_color(color: [u8; 4]) -> String {
    format!("#{:02x}{:02x}{:02x}{:02x}", color[0], color[1], color[2], color[3])
}

fn parse_color(text: &str) -> Option<[u8; 4]> {
    let hex = text.trim().strip_prefix('#')?;
    if hex.len() != 8 || !hex.is_ascii() {
        return None;
    }
    let mut color = [0u8; 4];
    for (i, channel) in color.iter_mut().enumerate() {
        *channel = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(color)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerList {
    #[serde(rename = "layer", default)]
    pub layers: Vec<LayerRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideRecord {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "layer", default)]
    pub layers: Vec<LayerRecord>,
}

/// The saved composition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename = "ClusterProject")]
pub struct ProjectDocument {
    #[serde(default)]
    pub master: LayerList,
    #[serde(rename = "slide", default)]
    pub slides: Vec<SlideRecord>,
}

impl ProjectDocument {
    /// Snapshot the current composition
    pub fn capture(container: &SlideContainer) -> Self {
        let master = LayerList {
            layers: container.master().iter().map(LayerRecord::capture).collect(),
        };
        let slides = (0..container.slide_count())
            .filter_map(|index| {
                let slide = container.slide(index)?;
                Some(SlideRecord {
                    name: container.slide_name(index).unwrap_or_default().to_string(),
                    layers: slide.iter().map(LayerRecord::capture).collect(),
                })
            })
            .collect();
        Self { master, slides }
    }

    /// Replace the whole composition with this document
    pub fn apply(&self, container: &mut SlideContainer) -> Result<(), ProjectError> {
        let ctx = Arc::clone(container.context());
        let removed = container.reset();
        tracing::debug!(count = removed.len(), "Replaced layers");
        drop(removed);

        for record in &self.master.layers {
            container.add_layer(None, record.build(&ctx))?;
        }
        for slide in &self.slides {
            let index = container.add_slide(slide.name.clone());
            for record in &slide.layers {
                container.add_layer(Some(index), record.build(&ctx))?;
            }
        }
        container.refresh_structure();
        tracing::info!(
            master = self.master.layers.len(),
            slides = self.slides.len(),
            "Project applied"
        );
        Ok(())
    }

    fn records_mut(&mut self) -> impl Iterator<Item = &mut LayerRecord> {
        self.master
            .layers
            .iter_mut()
            .chain(self.slides.iter_mut().flat_map(|s| s.layers.iter_mut()))
    }

    /// Store file sources under `dir` relative to it
    pub fn make_relative(&mut self, dir: &Path) {
        for record in self.records_mut() {
            if !record.kind.has_file_source() || record.source.is_empty() || is_url(&record.source) {
                continue;
            }
            if let Ok(relative) = Path::new(&record.source).strip_prefix(dir) {
                record.source = relative.to_string_lossy().into_owned();
            }
        }
    }

    /// Resolve relative file sources against `dir`
    pub fn resolve_paths(&mut self, dir: &Path) {
        for record in self.records_mut() {
            if !record.kind.has_file_source() || record.source.is_empty() || is_url(&record.source) {
                continue;
            }
            let source = Path::new(&record.source);
            if source.is_relative() {
                record.source = dir.join(source).to_string_lossy().into_owned();
            }
        }
    }

    pub fn from_xml(contents: &str) -> Result<Self, ProjectError> {
        Ok(from_str(contents)?)
    }

    pub fn to_xml(&self) -> Result<String, ProjectError> {
        Ok(to_string(self)?)
    }

    /// Load a project; relative sources are resolved against its folder
    pub fn load(path: &Path) -> Result<Self, ProjectError> {
        let contents = fs::read_to_string(path)?;
        let mut document = Self::from_xml(&contents)?;
        if let Some(dir) = path.parent() {
            document.resolve_paths(dir);
        }
        Ok(document)
    }

    /// Save a project, optionally with sources relative to its folder
    pub fn save(&self, path: &Path, relative_paths: bool) -> Result<(), ProjectError> {
        let xml = match path.parent() {
            Some(dir) if relative_paths => {
                let mut document = self.clone();
                document.make_relative(dir);
                document.to_xml()?
            }
            _ => self.to_xml()?,
        };
        let formatted = format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}", xml);
        fs::write(path, formatted)?;
        tracing::info!("Saved project to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextServices, Role};
    use crate::settings::ClusterSettings;

    fn context() -> Arc<ClusterContext> {
        ClusterContext::new(Role::Master, ClusterSettings::default(), ContextServices::default())
    }

    fn record(id: u32, kind: LayerKind, source: &str) -> LayerRecord {
        let ctx = context();
        let mut record = LayerRecord::capture(&Layer::with_id(id, kind, &ctx));
        record.source = source.to_string();
        record
    }

    #[test]
    fn test_relative_paths_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("media").join("intro.png");
        let document = ProjectDocument {
            master: LayerList {
                layers: vec![
                    record(1, LayerKind::Image, &media.to_string_lossy()),
                    record(2, LayerKind::Stream, "rtsp://camera/live"),
                ],
            },
            slides: Vec::new(),
        };

        let path = dir.path().join("show.xml");
        document.save(&path, true).unwrap();
        let saved = fs::read_to_string(&path).unwrap();
        assert!(!saved.contains(&*dir.path().to_string_lossy()));
        assert!(saved.contains("rtsp://camera/live"));

        let loaded = ProjectDocument::load(&path).unwrap();
        assert_eq!(Path::new(&loaded.master.layers[0].source), media);
        assert_eq!(loaded.master.layers[1].source, "rtsp://camera/live");
    }

    #[test]
    fn test_capture_and_apply_restore_composition() {
        let ctx = context();
        let mut original = SlideContainer::new(&ctx);
        let intro = original.add_slide("Intro");
        let title = original.add_layer(Some(intro), Layer::new(LayerKind::Text, &ctx)).unwrap();
        {
            let layer = original.layer_mut(title).unwrap();
            layer.set_text("Opening night");
            layer.set_text_style(TextStyle {
                point_size: 72.0,
                color: [255, 128, 0, 255],
                ..TextStyle::default()
            });
            layer.set_translation(Vec3::new(0.0, 1.5, -2.0));
            layer.set_keep_visible(2);
        }
        let background = original.add_layer(None, Layer::new(LayerKind::Image, &ctx)).unwrap();
        original.layer_mut(background).unwrap().set_locked(true);

        let xml = ProjectDocument::capture(&original).to_xml().unwrap();
        let document = ProjectDocument::from_xml(&xml).unwrap();

        let mut restored = SlideContainer::new(&ctx);
        restored.add_layer(None, Layer::new(LayerKind::Pdf, &ctx)).unwrap();
        document.apply(&mut restored).unwrap();

        assert_eq!(restored.layer_count(), 2);
        assert_eq!(restored.slide_name(0), Some("Intro"));
        let layer = restored.layer(title).unwrap();
        assert_eq!(layer.text(), Some("Opening night"));
        assert_eq!(layer.text_style().unwrap().color, [255, 128, 0, 255]);
        assert_eq!(layer.translation(), Vec3::new(0.0, 1.5, -2.0));
        assert_eq!(layer.keep_visible(), 2);
        assert!(restored.layer(background).unwrap().is_locked());
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let ctx = context();
        let document = ProjectDocument {
            master: LayerList {
                layers: vec![record(5, LayerKind::Image, ""), record(5, LayerKind::Image, "")],
            },
            slides: Vec::new(),
        };
        let mut container = SlideContainer::new(&ctx);
        let err = document.apply(&mut container).unwrap_err();
        assert!(matches!(err, ProjectError::Container(ContainerError::Duplicate(5))));
    }

    #[test]
    fn test_color_parsing() {
        assert_eq!(parse_color("#10ff00c0"), Some([0x10, 0xff, 0x00, 0xc0]));
        assert_eq!(parse_color("10ff00c0"), None);
        assert_eq!(parse_color("#fff"), None);
        assert_eq!(format_color([1, 2, 3, 4]), "#01020304");
    }
}
