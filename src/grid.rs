//! Discretized axes and the dense water-depth cube.
//!
//! Axis values are generated by repeated truncated addition from the
//! context bounds: timestamps ascending by a fixed step, longitudes
//! ascending by the x resolution, latitudes descending by the y
//! resolution. The running coordinate sum is re-truncated to one decimal
//! digit after every addition so float drift can never push a value off
//! the 0.1-degree lattice.

use crate::error::{Error, Result};
use crate::records::SpatiotemporalContext;
use std::collections::HashMap;

/// Fixed temporal step, in seconds (3 hours).
pub const TIMESTAMP_STEP: i64 = 10_800;

/// Truncate toward zero to the given number of decimal digits.
///
/// `truncate(3.14159, 1) == 3.1` and `truncate(-3.14159, 1) == -3.1`;
/// this is not rounding and not floor.
pub fn truncate(value: f64, digits: i32) -> f64 {
    let stepper = 10f64.powi(digits);
    (value * stepper).trunc() / stepper
}

/// Canonical string form of a discretized coordinate: truncated to one
/// decimal digit and rendered with exactly one decimal digit. These are
/// the keys of the land/water mask and the axis index maps.
pub fn coord_key(value: f64) -> String {
    let truncated = truncate(value, 1);
    // Negative zero and zero are the same key.
    let truncated = if truncated == 0.0 { 0.0 } else { truncated };
    format!("{truncated:.1}")
}

/// The three ordered axes of one job's grid: timestamps ascending,
/// longitudes ascending, latitudes descending. Both endpoints are
/// included when they land exactly on a step.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscretizedAxes {
    pub timestamps: Vec<i64>,
    pub longitudes: Vec<f64>,
    pub latitudes: Vec<f64>,
}

/// Derive the discretized axes from a context.
///
/// Resolutions that are non-positive, or that truncate to zero on the
/// 0.1-degree lattice, would leave the generation loop stuck on one
/// value; both fail fast as configuration errors. Inverted bounds yield
/// empty axes, not errors.
pub fn build_axes(context: &SpatiotemporalContext) -> Result<DiscretizedAxes> {
    let spatial = &context.spatial;
    for (name, resolution) in [
        ("x_resolution", spatial.x_resolution),
        ("y_resolution", spatial.y_resolution),
    ] {
        if truncate(resolution, 1) <= 0.0 {
            return Err(Error::Config(format!(
                "{name} must be at least 0.1 degrees, got {resolution}"
            )));
        }
    }

    let mut timestamps = Vec::new();
    let mut t = context.temporal.begin;
    while t <= context.temporal.end {
        timestamps.push(t);
        t += TIMESTAMP_STEP;
    }

    let mut longitudes = Vec::new();
    let mut lon = truncate(spatial.left, 1);
    let east = truncate(spatial.right, 1);
    while lon <= east {
        longitudes.push(lon);
        lon = truncate(lon + spatial.x_resolution, 1);
    }

    let mut latitudes = Vec::new();
    let mut lat = truncate(spatial.top, 1);
    let south = truncate(spatial.bottom, 1);
    while lat >= south {
        latitudes.push(lat);
        lat = truncate(lat - spatial.y_resolution, 1);
    }

    Ok(DiscretizedAxes {
        timestamps,
        longitudes,
        latitudes,
    })
}

/// Dense depth cube over one job's axes: every (timestamp, longitude,
/// latitude) combination is present, zeroed before ingestion. Owned by
/// exactly one accumulation engine for the duration of one job.
///
/// Storage is a flat timestamp-major vector with index maps keyed by
/// exact axis timestamp and canonical coordinate string.
#[derive(Debug, Clone)]
pub struct WaterDepthGrid {
    axes: DiscretizedAxes,
    ts_index: HashMap<i64, usize>,
    lon_index: HashMap<String, usize>,
    lat_index: HashMap<String, usize>,
    depths: Vec<f64>,
}

impl WaterDepthGrid {
    pub fn new(axes: DiscretizedAxes) -> Self {
        let ts_index = axes
            .timestamps
            .iter()
            .enumerate()
            .map(|(i, &t)| (t, i))
            .collect();
        let lon_index = axes
            .longitudes
            .iter()
            .enumerate()
            .map(|(i, &v)| (coord_key(v), i))
            .collect();
        let lat_index = axes
            .latitudes
            .iter()
            .enumerate()
            .map(|(i, &v)| (coord_key(v), i))
            .collect();
        let cells = axes.timestamps.len() * axes.longitudes.len() * axes.latitudes.len();
        WaterDepthGrid {
            axes,
            ts_index,
            lon_index,
            lat_index,
            depths: vec![0.0; cells],
        }
    }

    pub fn axes(&self) -> &DiscretizedAxes {
        &self.axes
    }

    fn flat(&self, t: usize, lon: usize, lat: usize) -> usize {
        (t * self.axes.longitudes.len() + lon) * self.axes.latitudes.len() + lat
    }

    /// Depth at the given axis positions.
    pub fn depth_at(&self, t: usize, lon: usize, lat: usize) -> f64 {
        self.depths[self.flat(t, lon, lat)]
    }

    pub fn depth_at_mut(&mut self, t: usize, lon: usize, lat: usize) -> &mut f64 {
        let idx = self.flat(t, lon, lat);
        &mut self.depths[idx]
    }

    /// Cell addressed by exact axis timestamp and already-truncated
    /// coordinates. `None` when any of the three does not land on an
    /// axis value; the caller decides whether that is a skip or a bug.
    pub fn cell_mut(&mut self, timestamp: i64, lon: f64, lat: f64) -> Option<&mut f64> {
        let t = *self.ts_index.get(&timestamp)?;
        let i = *self.lon_index.get(&coord_key(lon))?;
        let j = *self.lat_index.get(&coord_key(lat))?;
        Some(self.depth_at_mut(t, i, j))
    }
}
