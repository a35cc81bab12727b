//! Global replicated state
//!
//! The primary background/overlay playback shown outside the layer system:
//! one record per process, created with the coordinator. The master mutates
//! it through setters; nodes only apply decoded values.

use glam::Vec3;

use crate::compositor::{GridMode, StereoMode};
use crate::video::LoopMode;

use super::codec::{SyncError, SyncReader, SyncWriter, WireEnum};
use super::tracker::SyncTracker;

/// Colour grading applied to the primary playback
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorGrading {
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    pub gamma: f32,
    /// Hue shift in degrees
    pub hue: f32,
}

impl Default for ColorGrading {
    fn default() -> Self {
        Self {
            brightness: 1.0,
            contrast: 1.0,
            saturation: 1.0,
            gamma: 1.0,
            hue: 0.0,
        }
    }
}

/// Dome projection geometry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DomeGeometry {
    pub radius: f32,
    /// Tilt in degrees
    pub tilt: f32,
    /// Field of view in degrees
    pub fov: f32,
}

impl Default for DomeGeometry {
    fn default() -> Self {
        Self {
            radius: 7.4,
            tilt: 0.0,
            fov: 180.0,
        }
    }
}

/// Flat plane geometry for the primary playback in plane mode
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneGeometry {
    pub width: f32,
    pub height: f32,
    pub elevation: f32,
    pub distance: f32,
}

impl Default for PlaneGeometry {
    fn default() -> Self {
        Self {
            width: 4.0,
            height: 2.25,
            elevation: 0.0,
            distance: 5.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GlobalState {
    // always
    paused: bool,
    time_position: f64,
    time_dirty: bool,

    // properties
    loaded_file: String,
    time_threshold: f64,
    stereo: StereoMode,
    grid: GridMode,
    loop_mode: LoopMode,
    grading: ColorGrading,
    dome: DomeGeometry,
    plane: PlaneGeometry,
    /// Yaw, pitch, roll in degrees
    orientation: Vec3,

    tracker: SyncTracker,
}

impl GlobalState {
    pub fn new(redundancy: u32, time_threshold: f64) -> Self {
        Self {
            paused: true,
            time_position: 0.0,
            time_dirty: false,
            loaded_file: String::new(),
            time_threshold,
            stereo: StereoMode::default(),
            grid: GridMode::default(),
            loop_mode: LoopMode::Loop,
            grading: ColorGrading::default(),
            dome: DomeGeometry::default(),
            plane: PlaneGeometry::default(),
            orientation: Vec3::ZERO,
            tracker: SyncTracker::new_dirty(redundancy),
        }
    }

    pub fn tracker(&self) -> &SyncTracker {
        &self.tracker
    }

    pub fn need_sync(&self) -> bool {
        self.tracker.need_sync()
    }

    pub fn complete_sync_pass(&mut self) {
        self.tracker.complete_pass();
        if !self.tracker.need_sync() {
            self.time_dirty = false;
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
        self.tracker.mark();
    }

    pub fn time_position(&self) -> f64 {
        self.time_position
    }

    /// Report playback progress; streamed every frame, does not dirty
    pub fn set_time_position(&mut self, position: f64) {
        if position.is_finite() {
            self.time_position = position.max(0.0);
        }
    }

    /// Jump to a position; nodes seek once on receipt
    pub fn seek(&mut self, position: f64) {
        self.set_time_position(position);
        self.time_dirty = true;
        self.tracker.mark();
    }

    pub fn time_dirty(&self) -> bool {
        self.time_dirty
    }

    pub fn loaded_file(&self) -> &str {
        &self.loaded_file
    }

    pub fn set_loaded_file(&mut self, file: impl Into<String>) {
        self.loaded_file = file.into();
        self.time_position = 0.0;
        self.tracker.mark();
    }

    /// Drift tolerated before a node seeks (seconds)
    pub fn time_threshold(&self) -> f64 {
        self.time_threshold
    }

    pub fn set_time_threshold(&mut self, threshold: f64) {
        if threshold.is_finite() && threshold >= 0.0 {
            self.time_threshold = threshold;
            self.tracker.mark();
        }
    }

    /// Whether a node playing at `local` should seek to the master position
    pub fn should_seek(&self, local: f64) -> bool {
        self.time_dirty || (local - self.time_position).abs() > self.time_threshold
    }

    pub fn stereo(&self) -> StereoMode {
        self.stereo
    }

    pub fn set_stereo(&mut self, stereo: StereoMode) {
        self.stereo = stereo;
        self.tracker.mark();
    }

    pub fn grid(&self) -> GridMode {
        self.grid
    }

    pub fn set_grid(&mut self, grid: GridMode) {
        self.grid = grid;
        self.tracker.mark();
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        self.loop_mode = mode;
        self.tracker.mark();
    }

    pub fn grading(&self) -> ColorGrading {
        self.grading
    }

    pub fn set_grading(&mut self, grading: ColorGrading) {
        self.grading = grading;
        self.tracker.mark();
    }

    pub fn dome(&self) -> DomeGeometry {
        self.dome
    }

    pub fn set_dome(&mut self, dome: DomeGeometry) {
        self.dome = dome;
        self.tracker.mark();
    }

    pub fn plane(&self) -> PlaneGeometry {
        self.plane
    }

    pub fn set_plane(&mut self, plane: PlaneGeometry) {
        self.plane = plane;
        self.tracker.mark();
    }

    pub fn orientation(&self) -> Vec3 {
        self.orientation
    }

    pub fn set_orientation(&mut self, orientation: Vec3) {
        self.orientation = orientation;
        self.tracker.mark();
    }

    pub fn encode_always(&self, w: &mut SyncWriter) {
        w.put_bool(self.paused);
        w.put_f64(self.time_position);
        w.put_bool(self.time_dirty);
    }

    pub fn decode_always(&mut self, r: &mut SyncReader<'_>) -> Result<(), SyncError> {
        self.paused = r.bool()?;
        self.time_position = r.f64()?;
        self.time_dirty = r.bool()?;
        Ok(())
    }

    pub fn encode_properties(&self, w: &mut SyncWriter) {
        w.put_str(&self.loaded_file);
        w.put_f64(self.time_threshold);
        self.stereo.write(w);
        self.grid.write(w);
        self.loop_mode.write(w);
        w.put_f32(self.grading.brightness);
        w.put_f32(self.grading.contrast);
        w.put_f32(self.grading.saturation);
        w.put_f32(self.grading.gamma);
        w.put_f32(self.grading.hue);
        w.put_f32(self.dome.radius);
        w.put_f32(self.dome.tilt);
        w.put_f32(self.dome.fov);
        w.put_f32(self.plane.width);
        w.put_f32(self.plane.height);
        w.put_f32(self.plane.elevation);
        w.put_f32(self.plane.distance);
        w.put_vec3(self.orientation);
    }

    pub fn decode_properties(&mut self, r: &mut SyncReader<'_>) -> Result<(), SyncError> {
        self.loaded_file = r.string()?;
        self.time_threshold = r.f64()?;
        self.stereo = StereoMode::read(r)?;
        self.grid = GridMode::read(r)?;
        self.loop_mode = LoopMode::read(r)?;
        self.grading = ColorGrading {
            brightness: r.f32()?,
            contrast: r.f32()?,
            saturation: r.f32()?,
            gamma: r.f32()?,
            hue: r.f32()?,
        };
        self.dome = DomeGeometry {
            radius: r.f32()?,
            tilt: r.f32()?,
            fov: r.f32()?,
        };
        self.plane = PlaneGeometry {
            width: r.f32()?,
            height: r.f32()?,
            elevation: r.f32()?,
            distance: r.f32()?,
        };
        self.orientation = r.vec3()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setters_dirty_the_record() {
        let mut state = GlobalState::new(2, 0.1);
        state.complete_sync_pass();
        state.complete_sync_pass();
        assert!(!state.need_sync());

        state.set_time_position(4.0);
        assert!(!state.need_sync());

        state.set_grading(ColorGrading {
            gamma: 2.2,
            ..ColorGrading::default()
        });
        assert!(state.need_sync());
    }

    #[test]
    fn test_seek_flag_clears_with_tracker() {
        let mut state = GlobalState::new(2, 0.1);
        state.seek(30.0);
        assert!(state.time_dirty());
        assert!(state.should_seek(30.0));
        state.complete_sync_pass();
        state.complete_sync_pass();
        assert!(!state.time_dirty());
        assert!(!state.should_seek(30.05));
        assert!(state.should_seek(31.0));
    }

    #[test]
    fn test_properties_apply_on_node() {
        let mut master = GlobalState::new(3, 0.1);
        master.set_loaded_file("/media/show.mov");
        master.set_grid(GridMode::Sphere);
        master.set_orientation(Vec3::new(90.0, 0.0, 0.0));

        let mut w = SyncWriter::new();
        master.encode_always(&mut w);
        master.encode_properties(&mut w);
        let bytes = w.freeze();

        let mut node = GlobalState::new(3, 0.5);
        let mut r = SyncReader::new(&bytes);
        node.decode_always(&mut r).unwrap();
        node.decode_properties(&mut r).unwrap();
        assert_eq!(r.remaining(), 0);
        assert_eq!(node.loaded_file(), "/media/show.mov");
        assert_eq!(node.grid(), GridMode::Sphere);
        assert_eq!(node.time_threshold(), 0.1);
        assert_eq!(node.orientation().x, 90.0);
    }
}
