//! Flatten the dense cube into the sparse result list.

use crate::grid::WaterDepthGrid;
use crate::records::ResultRecord;

/// Emit one record per cell with non-zero final depth, in timestamp-
/// major, then longitude, then latitude order. The order is part of the
/// contract: reruns over identical input must serialize byte-identically.
///
/// The comparison is exact (`!= 0.0`), not epsilon-based: a depth that
/// computes to a tiny non-zero float is retained.
pub fn to_records(grid: &WaterDepthGrid) -> Vec<ResultRecord> {
    let axes = grid.axes();
    let mut records = Vec::new();
    for (t, &timestamp) in axes.timestamps.iter().enumerate() {
        for (i, &lon) in axes.longitudes.iter().enumerate() {
            for (j, &lat) in axes.latitudes.iter().enumerate() {
                let depth = grid.depth_at(t, i, j);
                if depth == 0.0 {
                    continue;
                }
                records.push(ResultRecord {
                    timestamp,
                    coordinate: [lon, lat],
                    observation: vec![depth],
                });
            }
        }
    }
    records
}
