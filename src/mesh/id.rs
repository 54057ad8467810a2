//! Packed 32-bit trixel identifiers.
//!
//! Layout, most significant bit first:
//!
//! ```text
//! 31      30      28-29     24-27    0-23
//! valid | hemi | quadrant | depth | position
//! ```
//!
//! `position` holds one base-4 digit per subdivision level, the digit for
//! level L (1-based) at bits `(L - 1) * 2`. The id survives serialization
//! and is the only trixel reference that crosses the crate boundary; the
//! bit layout itself never leaks to callers.

use std::fmt;

use super::{Hemisphere, MAX_DEPTH};

const VALID_SHIFT: u32 = 31;
const HEMI_SHIFT: u32 = 30;
const QUAD_SHIFT: u32 = 28;
const QUAD_MASK: u32 = 0x3;
const DEPTH_SHIFT: u32 = 24;
const DEPTH_MASK: u32 = 0xf;
const POS_MASK: u32 = 0x3;

/// Identifier of a single trixel in a mesh of any depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrixelId(u32);

impl TrixelId {
    pub(crate) fn pack(hemisphere: Hemisphere, quadrant: u8, depth: u8, position: u32) -> TrixelId {
        let hemi = match hemisphere {
            Hemisphere::North => 0,
            Hemisphere::South => 1,
        };
        TrixelId(
            1 << VALID_SHIFT
                | hemi << HEMI_SHIFT
                | u32::from(quadrant & QUAD_MASK as u8) << QUAD_SHIFT
                | u32::from(depth) << DEPTH_SHIFT
                | position,
        )
    }

    /// Validate a raw id read from disk or a foreign source.
    ///
    /// Requires the valid bit, a depth within range, and no path digits
    /// beyond the encoded depth.
    pub fn from_raw(raw: u32) -> Option<TrixelId> {
        if raw & (1 << VALID_SHIFT) == 0 {
            return None;
        }
        let id = TrixelId(raw);
        if id.depth() > MAX_DEPTH {
            return None;
        }
        let pos_mask = (1u32 << (2 * u32::from(id.depth()))) - 1;
        if id.position() & !pos_mask != 0 {
            return None;
        }
        Some(id)
    }

    /// The raw packed value.
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Which hemisphere's root family the trixel belongs to.
    pub fn hemisphere(self) -> Hemisphere {
        if self.0 & (1 << HEMI_SHIFT) == 0 {
            Hemisphere::North
        } else {
            Hemisphere::South
        }
    }

    /// Root quadrant, 0-3.
    pub fn quadrant(self) -> u8 {
        ((self.0 >> QUAD_SHIFT) & QUAD_MASK) as u8
    }

    /// Subdivision depth; 0 is a root trixel.
    pub fn depth(self) -> u8 {
        ((self.0 >> DEPTH_SHIFT) & DEPTH_MASK) as u8
    }

    fn position(self) -> u32 {
        self.0 & ((1 << DEPTH_SHIFT) - 1)
    }

    /// Child index (0-3) taken at `level` on the path from the root,
    /// 1-based: `branch(1)` selects among the root's children.
    pub(crate) fn branch(self, level: u8) -> usize {
        ((self.0 >> ((u32::from(level) - 1) * 2)) & POS_MASK) as usize
    }
}

impl fmt::Display for TrixelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hemi = match self.hemisphere() {
            Hemisphere::North => 'N',
            Hemisphere::South => 'S',
        };
        write!(f, "{hemi}{}", self.quadrant())?;
        for level in 1..=self.depth() {
            write!(f, "{}", self.branch(level))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_fields_roundtrip() {
        for quadrant in 0..4u8 {
            for depth in 0..=MAX_DEPTH {
                let position = if depth == 0 { 0 } else { 0b10 }; // digit 2 at level 1
                for hemisphere in [Hemisphere::North, Hemisphere::South] {
                    let id = TrixelId::pack(hemisphere, quadrant, depth, position);
                    assert_eq!(id.hemisphere(), hemisphere);
                    assert_eq!(id.quadrant(), quadrant);
                    assert_eq!(id.depth(), depth);
                    if depth > 0 {
                        assert_eq!(id.branch(1), 2);
                    }
                }
            }
        }
    }

    #[test]
    fn branch_digits() {
        // Path 3, 1, 2 at levels 1, 2, 3.
        let position = 0b10_01_11;
        let id = TrixelId::pack(Hemisphere::South, 1, 3, position);
        assert_eq!(id.branch(1), 3);
        assert_eq!(id.branch(2), 1);
        assert_eq!(id.branch(3), 2);
    }

    #[test]
    fn deepest_level_fits_below_depth_field() {
        let position = 0b11 << (2 * (u32::from(MAX_DEPTH) - 1));
        let id = TrixelId::pack(Hemisphere::North, 0, MAX_DEPTH, position);
        assert_eq!(id.depth(), MAX_DEPTH);
        assert_eq!(id.branch(MAX_DEPTH), 3);
        assert_eq!(id.quadrant(), 0);
    }

    #[test]
    fn raw_roundtrip() {
        let id = TrixelId::pack(Hemisphere::South, 3, 5, 0b01_11_00_10_01);
        let back = TrixelId::from_raw(id.raw()).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn from_raw_rejects_invalid() {
        // Missing valid bit.
        assert!(TrixelId::from_raw(0).is_none());
        // Depth beyond the mesh maximum.
        let bad_depth = 1 << 31 | 13 << DEPTH_SHIFT;
        assert!(TrixelId::from_raw(bad_depth).is_none());
        // Path digits beyond the encoded depth.
        let bad_pos = 1 << 31 | 1 << DEPTH_SHIFT | 0b1100;
        assert!(TrixelId::from_raw(bad_pos).is_none());
    }

    #[test]
    fn display_path() {
        let id = TrixelId::pack(Hemisphere::North, 2, 3, 0b10_01_11);
        assert_eq!(id.to_string(), "N2312");
        let root = TrixelId::pack(Hemisphere::South, 0, 0, 0);
        assert_eq!(root.to_string(), "S0");
    }
}
