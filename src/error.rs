//! Error types for catalog operations.

/// Errors raised by mesh construction, import and queries.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CatalogError {
    /// A point lies outside RA `[0, 2*pi)` / Dec `[-pi/2, pi/2]`.
    #[error("point RA {ra} Dec {dec} is outside the celestial domain")]
    InvalidPoint {
        /// Right ascension in radians.
        ra: f64,
        /// Declination in radians.
        dec: f64,
    },

    /// A depth was requested beyond what the mesh was built with.
    #[error("depth {depth} exceeds mesh depth {max}")]
    DepthOutOfRange {
        /// Requested depth.
        depth: u8,
        /// Deepest level the mesh supports.
        max: u8,
    },

    /// A declared or queried value range has `min > max`.
    #[error("invalid value range {min} .. {max}")]
    InvalidValueRange { min: f64, max: f64 },

    /// A key value falls outside the dataset's declared range.
    #[error("value {value} is outside the dataset range {min} .. {max}")]
    ValueOutOfRange { value: f64, min: f64, max: f64 },

    /// The dataset slot is not in use.
    #[error("no dataset in slot {0}")]
    UnknownDataset(usize),

    /// Every dataset slot of the catalog is already claimed.
    #[error("all {0} dataset slots are in use")]
    DatasetSlotsExhausted(usize),

    /// An operation that needs objects ran against an empty dataset.
    #[error("dataset is empty")]
    EmptyDataset,

    /// Placement or a query ran before the dataset was imported.
    #[error("dataset has no depth map yet; import it first")]
    NotImported,

    /// A nearest-neighbour query ran before the KD-tree was built.
    #[error("kd-tree has not been built for this dataset")]
    KdTreeNotBuilt,

    /// A region was consumed after its last clip failed.
    #[error("region has no valid clip constraints")]
    Unclipped,

    /// The candidate trixel buffer outgrew the mesh itself.
    #[error("candidate set needs {needed} trixels but the mesh only has {capacity}")]
    CandidateOverflow { needed: usize, capacity: usize },

    /// A packed trixel id did not resolve to a trixel in this mesh.
    #[error("invalid trixel id {0:#010x}")]
    InvalidTrixelId(u32),

    /// A persisted dataset file failed validation.
    #[error("corrupt dataset file: {0}")]
    Corrupt(String),

    /// Underlying I/O failure while reading or writing a dataset file.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
