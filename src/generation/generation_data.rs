//! Generation Data - Pure DOP
//!
//! Heap layout of the point buffer: generation k occupies
//! `[S_k, S_k + T^(k+1))` with `S_0 = 0`, clamped to capacity.

use serde::{Deserialize, Serialize};

/// Where generation 0 starts from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SeedMode {
    /// Every seed at the origin
    #[default]
    Origin,
    /// Seeds spread over a centred unit cube grid of `ceil(cbrt(capacity))^3` cells
    UniformGrid,
}

/// Half-open index range written by one generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationRange {
    pub generation: u32,
    pub offset: u32,
    pub limit: u32,
    /// Range was cut short by the buffer capacity
    pub clamped: bool,
}

impl GenerationRange {
    pub fn len(&self) -> u32 {
        self.limit - self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.limit == self.offset
    }
}

/// Outcome of one reset + expand sequence
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationReport {
    pub generations: u32,
    pub points_written: u32,
    /// Last generation was clamped to capacity
    pub clamped: bool,
    /// Device dispatches issued, chunks included
    pub dispatches: u32,
}
