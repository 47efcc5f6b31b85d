//! The accumulation engine: one dense grid per job, raw observation
//! ingestion, then a per-cell prefix sum along time.

use crate::grid::{DiscretizedAxes, WaterDepthGrid, truncate};
use crate::mask::LandWaterMask;
use crate::records::ObservationRecord;

/// What happened to one ingested record. Skips are silent by design;
/// the pipeline only counts them for its summary log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Applied,
    SkippedWater,
    SkippedUnknown,
    /// Timestamp or truncated coordinate did not land on a generated
    /// axis value. No snapping to the nearest cell.
    SkippedOffGrid,
}

/// Owns one job's [`WaterDepthGrid`] for its whole lifetime.
pub struct AccumulationEngine<'m> {
    grid: WaterDepthGrid,
    mask: &'m LandWaterMask,
    scaling_factor: f64,
}

impl<'m> AccumulationEngine<'m> {
    pub fn new(axes: DiscretizedAxes, mask: &'m LandWaterMask, scaling_factor: f64) -> Self {
        AccumulationEngine {
            grid: WaterDepthGrid::new(axes),
            mask,
            scaling_factor,
        }
    }

    /// Ingest one raw observation.
    ///
    /// The coordinate is truncated onto the 0.1-degree lattice, the mask
    /// is consulted, and on land the cell is set to
    /// `rainfall * scaling_factor`, overwriting any prior value for the
    /// same cell and timestamp. Ingestion order is unspecified upstream,
    /// so two records colliding on one cell are last-write-wins; kept
    /// as-is rather than summed (documented ambiguity).
    pub fn ingest(&mut self, record: &ObservationRecord) -> IngestOutcome {
        let lon = truncate(record.coordinate[0], 1);
        let lat = truncate(record.coordinate[1], 1);

        match self.mask.classify(lon, lat) {
            crate::mask::CellClass::Water => return IngestOutcome::SkippedWater,
            crate::mask::CellClass::Unknown => return IngestOutcome::SkippedUnknown,
            crate::mask::CellClass::Land => {}
        }

        let rainfall = record.observation.first().copied().unwrap_or(0.0);
        match self.grid.cell_mut(record.timestamp, lon, lat) {
            Some(cell) => {
                *cell = rainfall * self.scaling_factor;
                IngestOutcome::Applied
            }
            None => IngestOutcome::SkippedOffGrid,
        }
    }

    /// Per-cell prefix sum along time: walk timestamps in ascending axis
    /// order from the second, adding the previous step's depth. Cells
    /// the mask excludes are never touched, so water stays at zero all
    /// the way through.
    pub fn accumulate(&mut self) {
        let axes = self.grid.axes().clone();
        for t in 1..axes.timestamps.len() {
            for (i, &lon) in axes.longitudes.iter().enumerate() {
                for (j, &lat) in axes.latitudes.iter().enumerate() {
                    if self.mask.classify(lon, lat).blocks_writes() {
                        continue;
                    }
                    let previous = self.grid.depth_at(t - 1, i, j);
                    *self.grid.depth_at_mut(t, i, j) += previous;
                }
            }
        }
    }

    pub fn grid(&self) -> &WaterDepthGrid {
        &self.grid
    }
}
