use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tile-local coordinate extent of one tile.
pub const EXTENT: f32 = 8192.0;
/// Rendered size of one tile in screen pixels at its own zoom level.
pub const TILE_SIZE: f32 = 512.0;
/// Deepest zoom whose coordinates still fit the `u32` tile grid.
pub const MAX_ZOOM: u8 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TileIdError {
    #[error("zoom {0} exceeds the maximum of {MAX_ZOOM}")]
    ZoomOutOfRange(u8),
    #[error("tile {x}/{y} lies outside the 2^{z} grid")]
    OutOfGrid { z: u8, x: u32, y: u32 },
    #[error("overscaled zoom {overscaled_z} is below canonical zoom {canonical_z}")]
    BelowCanonical { overscaled_z: u8, canonical_z: u8 },
}

#[inline]
fn grid_size(z: u8) -> u64 {
    1u64 << z.min(MAX_ZOOM)
}

/// Opaque numeric key used by upstream caches.
///
/// Callers must treat the value as a key only; it is not decoded anywhere in
/// this crate.
pub fn tile_key(z: u8, x: u32, y: u32) -> u64 {
    grid_size(z)
        .wrapping_mul(y as u64)
        .wrapping_add(x as u64)
        .wrapping_mul(32)
        .wrapping_add(z as u64)
}

/// A tile in the logical pyramid rooted at `0/0/0`. Identifies content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawCanonicalTileId")]
pub struct CanonicalTileId {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl CanonicalTileId {
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        debug_assert!(
            Self::try_new(z, x, y).is_ok(),
            "invalid canonical tile {z}/{x}/{y}"
        );
        Self { z, x, y }
    }

    pub fn try_new(z: u8, x: u32, y: u32) -> Result<Self, TileIdError> {
        if z > MAX_ZOOM {
            return Err(TileIdError::ZoomOutOfRange(z));
        }
        let size = grid_size(z);
        if x as u64 >= size || y as u64 >= size {
            return Err(TileIdError::OutOfGrid { z, x, y });
        }
        Ok(Self { z, x, y })
    }

    /// True when `parent` is a strict ancestor of this tile.
    pub fn is_child_of(&self, parent: &CanonicalTileId) -> bool {
        if parent.z >= self.z {
            return false;
        }
        let shift = u32::from(self.z - parent.z);
        let up = |v: u32| (v as u64).checked_shr(shift).unwrap_or(0);
        up(self.x) == parent.x as u64 && up(self.y) == parent.y as u64
    }

    /// Ancestor at a lower zoom, or the top-left descendant at a higher one.
    /// Targets past [`MAX_ZOOM`] stop at `MAX_ZOOM`.
    pub fn scaled_to(&self, target_z: u8) -> CanonicalTileId {
        let target_z = target_z.min(MAX_ZOOM);
        if target_z <= self.z {
            let shift = u32::from(self.z - target_z);
            CanonicalTileId {
                z: target_z,
                x: (self.x as u64 >> shift) as u32,
                y: (self.y as u64 >> shift) as u32,
            }
        } else {
            let shift = u32::from(target_z - self.z);
            CanonicalTileId {
                z: target_z,
                x: ((self.x as u64) << shift) as u32,
                y: ((self.y as u64) << shift) as u32,
            }
        }
    }

    /// The four quadrants one zoom deeper. `None` at [`MAX_ZOOM`], whose
    /// children would not fit the grid.
    pub fn children(&self) -> Option<[CanonicalTileId; 4]> {
        if self.z >= MAX_ZOOM {
            return None;
        }
        let z = self.z + 1;
        let x = self.x.checked_mul(2)?;
        let y = self.y.checked_mul(2)?;
        Some([
            CanonicalTileId { z, x, y },
            CanonicalTileId { z, x, y: y + 1 },
            CanonicalTileId { z, x: x + 1, y },
            CanonicalTileId { z, x: x + 1, y: y + 1 },
        ])
    }

    pub fn key(&self) -> u64 {
        tile_key(self.z, self.x, self.y)
    }
}

#[derive(Deserialize)]
struct RawCanonicalTileId {
    z: u8,
    x: u32,
    y: u32,
}

impl TryFrom<RawCanonicalTileId> for CanonicalTileId {
    type Error = TileIdError;

    fn try_from(raw: RawCanonicalTileId) -> Result<Self, Self::Error> {
        Self::try_new(raw.z, raw.x, raw.y)
    }
}

impl fmt::Display for CanonicalTileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// The zoom level data was requested at, which may exceed the canonical zoom
/// when the client over-zooms past the source's max zoom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawOverscaledTileId")]
pub struct OverscaledTileId {
    pub overscaled_z: u8,
    pub wrap: i16,
    pub canonical: CanonicalTileId,
}

impl OverscaledTileId {
    pub fn new(overscaled_z: u8, wrap: i16, canonical: CanonicalTileId) -> Self {
        debug_assert!(
            overscaled_z >= canonical.z,
            "overscaled zoom {overscaled_z} below canonical zoom {}",
            canonical.z
        );
        Self {
            overscaled_z,
            wrap,
            canonical,
        }
    }

    pub fn try_new(overscaled_z: u8, wrap: i16, canonical: CanonicalTileId) -> Result<Self, TileIdError> {
        if overscaled_z < canonical.z {
            return Err(TileIdError::BelowCanonical {
                overscaled_z,
                canonical_z: canonical.z,
            });
        }
        Ok(Self {
            overscaled_z,
            wrap,
            canonical,
        })
    }

    /// `2^(overscaled_z - canonical.z)`, or `None` when that does not fit a
    /// `u32` or the id is inverted.
    pub fn overscale_factor(&self) -> Option<u32> {
        let gap = self.overscaled_z.checked_sub(self.canonical.z)?;
        1u32.checked_shl(u32::from(gap))
    }

    pub fn is_child_of(&self, parent: &OverscaledTileId) -> bool {
        self.overscaled_z > parent.overscaled_z
            && (self.canonical == parent.canonical || self.canonical.is_child_of(&parent.canonical))
    }

    /// Keeps the canonical content when zooming further in; walks up to the
    /// ancestor when zooming below the canonical zoom.
    pub fn scaled_to(&self, z: u8) -> OverscaledTileId {
        let canonical = if z >= self.canonical.z {
            self.canonical
        } else {
            self.canonical.scaled_to(z)
        };
        OverscaledTileId {
            overscaled_z: z,
            wrap: self.wrap,
            canonical,
        }
    }

    pub fn to_unwrapped(&self) -> UnwrappedTileId {
        UnwrappedTileId {
            wrap: self.wrap,
            canonical: self.canonical,
        }
    }

    pub fn unwrap_to(&self, wrap: i16) -> OverscaledTileId {
        OverscaledTileId { wrap, ..*self }
    }
}

impl From<CanonicalTileId> for OverscaledTileId {
    fn from(canonical: CanonicalTileId) -> Self {
        Self {
            overscaled_z: canonical.z,
            wrap: 0,
            canonical,
        }
    }
}

#[derive(Deserialize)]
struct RawOverscaledTileId {
    overscaled_z: u8,
    wrap: i16,
    canonical: CanonicalTileId,
}

impl TryFrom<RawOverscaledTileId> for OverscaledTileId {
    type Error = TileIdError;

    fn try_from(raw: RawOverscaledTileId) -> Result<Self, Self::Error> {
        Self::try_new(raw.overscaled_z, raw.wrap, raw.canonical)
    }
}

impl fmt::Display for OverscaledTileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} => {} (wrap {})",
            self.canonical, self.overscaled_z, self.wrap
        )
    }
}

/// Position of a tile in a horizontally repeated world. Only used to build
/// render matrices, never to request data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnwrappedTileId {
    pub wrap: i16,
    pub canonical: CanonicalTileId,
}

impl UnwrappedTileId {
    pub fn new(wrap: i16, canonical: CanonicalTileId) -> Self {
        Self { wrap, canonical }
    }

    /// Folds an unbounded x into `wrap` + canonical x and clamps y into the grid.
    pub fn from_world(z: u8, x: i64, y: i64) -> Self {
        let z = z.min(MAX_ZOOM);
        let size = grid_size(z) as i64;
        let wrap = x.div_euclid(size);
        let cx = x.rem_euclid(size);
        let cy = y.clamp(0, size - 1);
        Self {
            wrap: wrap.clamp(i16::MIN as i64, i16::MAX as i64) as i16,
            canonical: CanonicalTileId {
                z,
                x: cx as u32,
                y: cy as u32,
            },
        }
    }

    pub fn is_child_of(&self, parent: &UnwrappedTileId) -> bool {
        self.wrap == parent.wrap && self.canonical.is_child_of(&parent.canonical)
    }

    pub fn children(&self) -> Option<[UnwrappedTileId; 4]> {
        let children = self.canonical.children()?;
        Some(children.map(|canonical| UnwrappedTileId {
            wrap: self.wrap,
            canonical,
        }))
    }

    pub fn overscale_to(&self, overscaled_z: u8) -> OverscaledTileId {
        OverscaledTileId::new(overscaled_z, self.wrap, self.canonical)
    }

    pub fn unwrap_to(&self, wrap: i16) -> UnwrappedTileId {
        UnwrappedTileId { wrap, ..*self }
    }

    /// Converts a length in screen pixels at `zoom` into tile units.
    pub fn pixels_to_tile_units(&self, pixels: f32, zoom: f64) -> f32 {
        let scale = 2f64.powf(zoom - f64::from(self.canonical.z));
        (f64::from(pixels) * f64::from(EXTENT) / (f64::from(TILE_SIZE) * scale)) as f32
    }
}

impl fmt::Display for UnwrappedTileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (wrap {})", self.canonical, self.wrap)
    }
}
