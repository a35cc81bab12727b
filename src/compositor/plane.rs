//! Plane placement for layers in plane grid mode
//!
//! A plane is a flat quad placed on a sphere around the viewer by azimuth
//! and elevation, rolled about its own normal and pushed out to a distance.
//! Its actual size keeps the content's aspect ratio inside the requested box,
//! so it is recomputed whenever the requested size, the content size or the
//! stereo mode change. The mesh is rebuilt lazily on next use.

use bytemuck::{Pod, Zeroable};
use glam::{EulerRot, Quat, Vec3};

use crate::sync::{SyncError, SyncReader, SyncWriter};

use super::params::StereoMode;

/// User-facing plane parameters (angles in degrees, sizes in scene units)
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PlaneParams {
    pub azimuth: f32,
    pub elevation: f32,
    pub roll: f32,
    pub distance: f32,
    pub h_offset: f32,
    pub v_offset: f32,
    pub requested_width: f32,
    pub requested_height: f32,
}

impl Default for PlaneParams {
    fn default() -> Self {
        Self {
            azimuth: 0.0,
            elevation: 0.0,
            roll: 0.0,
            distance: 5.0,
            h_offset: 0.0,
            v_offset: 0.0,
            requested_width: 4.0,
            requested_height: 2.25,
        }
    }
}

impl PlaneParams {
    pub fn encode(&self, w: &mut SyncWriter) {
        w.put_f32(self.azimuth);
        w.put_f32(self.elevation);
        w.put_f32(self.roll);
        w.put_f32(self.distance);
        w.put_f32(self.h_offset);
        w.put_f32(self.v_offset);
        w.put_f32(self.requested_width);
        w.put_f32(self.requested_height);
    }

    pub fn decode(r: &mut SyncReader<'_>) -> Result<Self, SyncError> {
        Ok(Self {
            azimuth: r.f32()?,
            elevation: r.f32()?,
            roll: r.f32()?,
            distance: r.f32()?,
            h_offset: r.f32()?,
            v_offset: r.f32()?,
            requested_width: r.f32()?,
            requested_height: r.f32()?,
        })
    }

    /// Orientation of the plane as seen from the origin
    pub fn rotation(&self) -> Quat {
        Quat::from_euler(
            EulerRot::YXZ,
            -self.azimuth.to_radians(),
            self.elevation.to_radians(),
            self.roll.to_radians(),
        )
    }
}

/// Vertex uploaded for plane rendering
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PlaneVertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
}

/// Two-triangle quad in world space
#[derive(Debug, Clone, PartialEq)]
pub struct PlaneMesh {
    pub vertices: [PlaneVertex; 4],
    pub indices: [u16; 6],
}

impl PlaneMesh {
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

/// Plane parameters with derived size and cached mesh
#[derive(Debug, Clone, Default)]
pub struct Plane {
    params: PlaneParams,
    content_size: (u32, u32),
    stereo: StereoMode,
    actual_size: (f32, f32),
    mesh: Option<PlaneMesh>,
}

impl Plane {
    pub fn new(params: PlaneParams) -> Self {
        let mut plane = Self {
            params,
            ..Self::default()
        };
        plane.recompute();
        plane
    }

    pub fn params(&self) -> &PlaneParams {
        &self.params
    }

    /// Replace parameters; returns whether anything changed
    pub fn set_params(&mut self, params: PlaneParams) -> bool {
        if params == self.params {
            return false;
        }
        self.params = params;
        self.recompute();
        true
    }

    /// Tell the plane what it displays
    pub fn set_content(&mut self, width: u32, height: u32, stereo: StereoMode) {
        if (width, height) == self.content_size && stereo == self.stereo {
            return;
        }
        self.content_size = (width, height);
        self.stereo = stereo;
        self.recompute();
    }

    /// Size actually drawn, fitted into the requested box
    pub fn actual_size(&self) -> (f32, f32) {
        self.actual_size
    }

    fn recompute(&mut self) {
        let (req_w, req_h) = (self.params.requested_width.max(0.0), self.params.requested_height.max(0.0));
        let (eye_w, eye_h) = self.stereo.eye_size(self.content_size.0, self.content_size.1);

        self.actual_size = if eye_w == 0 || eye_h == 0 || req_h == 0.0 {
            (req_w, req_h)
        } else {
            let aspect = eye_w as f32 / eye_h as f32;
            if req_w / req_h > aspect {
                (req_h * aspect, req_h)
            } else {
                (req_w, req_w / aspect)
            }
        };
        self.mesh = None;
    }

    pub fn has_mesh(&self) -> bool {
        self.mesh.is_some()
    }

    /// World-space mesh, rebuilt if parameters changed since last use
    pub fn mesh(&mut self) -> &PlaneMesh {
        let (params, (width, height)) = (self.params, self.actual_size);
        self.mesh.get_or_insert_with(|| {
            let rotation = params.rotation();
            let (hw, hh) = (width * 0.5, height * 0.5);
            let corner = |x: f32, y: f32, u: f32, v: f32| PlaneVertex {
                position: (rotation
                    * Vec3::new(x + params.h_offset, y + params.v_offset, -params.distance))
                .to_array(),
                uv: [u, v],
            };
            PlaneMesh {
                vertices: [
                    corner(-hw, -hh, 0.0, 0.0),
                    corner(hw, -hh, 1.0, 0.0),
                    corner(hw, hh, 1.0, 1.0),
                    corner(-hw, hh, 0.0, 1.0),
                ],
                indices: [0, 1, 2, 0, 2, 3],
            }
        })
    }
}
