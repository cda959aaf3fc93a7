//! Arena size negotiation between the two peers.

use serde::{Deserialize, Serialize};

/// Usable display area a peer reports in its READY signal.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Arena size both peers simulate and render for one match.
/// Always a whole number of tiles in each axis.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct GridSize {
    pub width: u32,
    pub height: u32,
}

impl GridSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of tiles in each axis for the given tile edge.
    pub fn tiles(&self, tile_size: u32) -> (u32, u32) {
        let tile = tile_size.max(1);
        (self.width / tile, self.height / tile)
    }
}

/// Element-wise minimum of both reports, floored to a multiple of `tile_size`.
///
/// The result does not depend on argument order.
pub fn negotiate_grid_size(a: Dimensions, b: Dimensions, tile_size: u32) -> GridSize {
    let tile = tile_size.max(1);
    let width = a.width.min(b.width);
    let height = a.height.min(b.height);

    GridSize {
        width: width / tile * tile,
        height: height / tile * tile,
    }
}
