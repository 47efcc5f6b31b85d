//! Land/water classification, gating every grid write.
//!
//! The mask is read-only external input: a JSON object mapping canonical
//! longitude keys to objects mapping canonical latitude keys to a
//! boolean (`true` = water). A coordinate absent from either level is
//! `Unknown`: a data-completeness gap in the mask, treated exactly like
//! water (no rainfall, no accumulation), never an error.

use crate::grid::coord_key;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellClass {
    Land,
    Water,
    Unknown,
}

impl CellClass {
    /// Whether writes to this cell are suppressed.
    pub fn blocks_writes(self) -> bool {
        !matches!(self, CellClass::Land)
    }
}

/// The land/water legend, keyed by canonical truncated-coordinate
/// strings (see [`coord_key`]).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LandWaterMask(BTreeMap<String, BTreeMap<String, bool>>);

impl LandWaterMask {
    pub fn classify(&self, lon: f64, lat: f64) -> CellClass {
        match self
            .0
            .get(&coord_key(lon))
            .and_then(|lats| lats.get(&coord_key(lat)))
        {
            Some(true) => CellClass::Water,
            Some(false) => CellClass::Land,
            None => CellClass::Unknown,
        }
    }

    #[cfg(test)]
    pub fn insert(&mut self, lon: f64, lat: f64, water: bool) {
        self.0
            .entry(coord_key(lon))
            .or_default()
            .insert(coord_key(lat), water);
    }
}
