//! Per-dataset mapping from object key value to storage depth.
//!
//! A histogram of the import key (magnitude or angular size) is carved
//! into one value band per mesh depth, from the faint tail inward: the
//! deepest band takes ~80% of all objects, the next ~80% of the rest, and
//! so on. Bright or large objects end up in the few shallow trixels a
//! wide-field query scans, while the faint bulk spreads over the full
//! mesh resolution.

use tracing::debug;

use crate::error::CatalogError;

/// Number of equal-width histogram bins over the declared value range.
pub const HISTOGRAM_BINS: usize = 100;

/// Fraction of the still-unassigned objects each deeper band absorbs.
const TAIL_FRACTION: f64 = 0.8;

/// Value band covered by one mesh depth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthBand {
    pub min_value: f64,
    pub max_value: f64,
}

/// Monotonic, contiguous value bands, one per depth `0..=mesh_depth`.
///
/// Bands are half-open `[min, max)`; the deepest band also includes its
/// upper bound, so every value of the declared range maps to exactly one
/// depth.
#[derive(Debug, Clone)]
pub struct DepthMap {
    bands: Vec<DepthBand>,
    min_value: f64,
    max_value: f64,
}

/// Index into the histogram below which `TAIL_FRACTION` of the remaining
/// objects sit, scanning down from `from`.
fn percent_limit(histogram: &[usize], from: usize, remaining: &mut usize) -> usize {
    let required = (TAIL_FRACTION * *remaining as f64) as usize;
    let mut accumulated = 0;

    for i in (0..=from).rev() {
        accumulated += histogram[i];
        if accumulated >= required {
            // The boundary bin straddles two bands; its objects stay in
            // the remaining pool for the shallower bands.
            *remaining = *remaining - accumulated + histogram[i];
            return i;
        }
    }
    0
}

impl DepthMap {
    /// Derive the bands for a dataset from its key values.
    ///
    /// Values outside the declared range are counted and skipped; a range
    /// no value falls into is an error.
    pub fn from_values(
        values: impl IntoIterator<Item = f64>,
        min_value: f64,
        max_value: f64,
        depth: u8,
    ) -> Result<DepthMap, CatalogError> {
        if !(min_value < max_value) {
            return Err(CatalogError::InvalidValueRange {
                min: min_value,
                max: max_value,
            });
        }

        let bin_width = (max_value - min_value) / (HISTOGRAM_BINS - 1) as f64;
        let mut histogram = [0usize; HISTOGRAM_BINS];
        let mut used = 0usize;
        let mut out_of_range = 0usize;

        for value in values {
            if value < min_value || value > max_value {
                out_of_range += 1;
                continue;
            }
            let index = (((value - min_value) / bin_width) as usize).min(HISTOGRAM_BINS - 1);
            histogram[index] += 1;
            used += 1;
        }

        if out_of_range > 0 {
            debug!(out_of_range, "key values outside the declared range");
        }
        if used == 0 {
            return Err(CatalogError::EmptyDataset);
        }

        let mut bands = vec![
            DepthBand {
                min_value: 0.0,
                max_value: 0.0,
            };
            usize::from(depth) + 1
        ];
        let mut old_start = HISTOGRAM_BINS - 1;
        let mut remaining = used;

        for level in (0..bands.len()).rev() {
            let start = percent_limit(&histogram, old_start, &mut remaining);
            bands[level] = DepthBand {
                min_value: min_value + start as f64 * bin_width,
                max_value: min_value + old_start as f64 * bin_width,
            };
            debug!(
                level,
                min = bands[level].min_value,
                max = bands[level].max_value,
                "depth band"
            );
            old_start = start;
        }

        // The carve works on bin boundaries; pin the outer bands to the
        // declared range so coverage is total.
        bands[0].min_value = min_value;
        bands.last_mut().expect("at least one band").max_value = max_value;

        Ok(DepthMap {
            bands,
            min_value,
            max_value,
        })
    }

    /// The single depth a key value is stored at.
    pub fn depth_for(&self, value: f64) -> Result<u8, CatalogError> {
        if value < self.min_value || value > self.max_value {
            return Err(CatalogError::ValueOutOfRange {
                value,
                min: self.min_value,
                max: self.max_value,
            });
        }
        for (depth, band) in self.bands.iter().enumerate() {
            if value < band.max_value {
                return Ok(depth as u8);
            }
        }
        Ok((self.bands.len() - 1) as u8)
    }

    /// Map a queried value range to its depth bounds.
    pub fn clip_depths(&self, min_value: f64, max_value: f64) -> Result<(u8, u8), CatalogError> {
        if min_value > max_value {
            return Err(CatalogError::InvalidValueRange {
                min: min_value,
                max: max_value,
            });
        }
        Ok((self.depth_for(min_value)?, self.depth_for(max_value)?))
    }

    /// Band covered by one depth level.
    pub fn band(&self, depth: u8) -> DepthBand {
        self.bands[usize::from(depth)]
    }

    /// Number of depth levels, `mesh_depth + 1`.
    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    /// The dataset's declared value range.
    pub fn declared_range(&self) -> (f64, f64) {
        (self.min_value, self.max_value)
    }

    pub(crate) fn from_bands(bands: Vec<DepthBand>, min_value: f64, max_value: f64) -> DepthMap {
        DepthMap {
            bands,
            min_value,
            max_value,
        }
    }

    pub(crate) fn bands(&self) -> &[DepthBand] {
        &self.bands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Uniform spread of keys over the range, deterministic.
    fn uniform_keys(n: usize, min: f64, max: f64) -> Vec<f64> {
        (0..n)
            .map(|i| min + (max - min) * (i as f64 + 0.5) / n as f64)
            .collect()
    }

    #[test]
    fn bands_are_contiguous_and_monotonic() {
        let keys = uniform_keys(10_000, -2.0, 16.0);
        let map = DepthMap::from_values(keys, -2.0, 16.0, 7).unwrap();

        assert_eq!(map.len(), 8);
        assert_eq!(map.band(0).min_value, -2.0);
        assert_eq!(map.band(7).max_value, 16.0);

        for depth in 0..7u8 {
            let band = map.band(depth);
            let next = map.band(depth + 1);
            assert!(band.min_value <= band.max_value);
            assert_eq!(band.max_value, next.min_value, "depth {depth}");
        }
    }

    #[test]
    fn every_value_maps_to_exactly_one_depth() {
        let keys = uniform_keys(5_000, 0.0, 20.0);
        let map = DepthMap::from_values(keys, 0.0, 20.0, 6).unwrap();

        for i in 0..=400 {
            let value = i as f64 * 0.05;
            let depth = map.depth_for(value).unwrap();
            assert!(usize::from(depth) < map.len());

            // The band at that depth actually covers the value under the
            // half-open rule.
            let band = map.band(depth);
            let last = depth as usize == map.len() - 1;
            assert!(
                value >= band.min_value && (value < band.max_value || last),
                "value {value} outside band {depth}"
            );
        }

        // Both declared bounds map.
        assert!(map.depth_for(0.0).is_ok());
        assert_eq!(map.depth_for(20.0).unwrap() as usize, map.len() - 1);
    }

    #[test]
    fn faint_tail_sinks_deep() {
        let keys = uniform_keys(10_000, 0.0, 10.0);
        let map = DepthMap::from_values(keys.clone(), 0.0, 10.0, 5).unwrap();

        let mut per_depth = vec![0usize; map.len()];
        for &k in &keys {
            per_depth[usize::from(map.depth_for(k).unwrap())] += 1;
        }

        // The deepest band absorbs roughly the tail fraction of all
        // objects, and shallower bands shrink geometrically.
        assert!(per_depth[5] as f64 >= 0.7 * keys.len() as f64);
        assert!(per_depth[4] < per_depth[5]);

        // Bright objects land shallow.
        let bright = map.depth_for(0.0).unwrap();
        let faint = map.depth_for(10.0).unwrap();
        assert!(bright < faint);
    }

    #[test]
    fn out_of_range_values_are_skipped() {
        let mut keys = uniform_keys(1_000, 0.0, 10.0);
        keys.push(-5.0);
        keys.push(40.0);
        let map = DepthMap::from_values(keys, 0.0, 10.0, 4).unwrap();
        assert!(map.depth_for(-5.0).is_err());
        assert!(map.depth_for(40.0).is_err());
    }

    #[test]
    fn clip_depths_orders_and_validates() {
        let keys = uniform_keys(2_000, -1.0, 14.0);
        let map = DepthMap::from_values(keys, -1.0, 14.0, 7).unwrap();

        let (min_depth, max_depth) = map.clip_depths(-1.0, 14.0).unwrap();
        assert!(min_depth <= max_depth);
        assert_eq!(max_depth, 7);

        let (lo, hi) = map.clip_depths(2.0, 9.0).unwrap();
        assert!(lo <= hi);

        assert!(matches!(
            map.clip_depths(9.0, 2.0),
            Err(CatalogError::InvalidValueRange { .. })
        ));
        assert!(matches!(
            map.clip_depths(-3.0, 9.0),
            Err(CatalogError::ValueOutOfRange { .. })
        ));
    }

    #[test]
    fn degenerate_inputs_error() {
        assert!(matches!(
            DepthMap::from_values([1.0], 5.0, 5.0, 3),
            Err(CatalogError::InvalidValueRange { .. })
        ));
        assert!(matches!(
            DepthMap::from_values([99.0], 0.0, 10.0, 3),
            Err(CatalogError::EmptyDataset)
        ));
        assert!(matches!(
            DepthMap::from_values(std::iter::empty(), 0.0, 10.0, 3),
            Err(CatalogError::EmptyDataset)
        ));
    }

    #[test]
    fn depth_zero_mesh_gets_single_band() {
        let keys = uniform_keys(100, 0.0, 1.0);
        let map = DepthMap::from_values(keys, 0.0, 1.0, 0).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.depth_for(0.5).unwrap(), 0);
    }
}
