//! Cache keys
//!
//! A key names one cell of one resolution level of one image source
//! ("setup") at one timepoint. All four parts are packed into a single
//! `u128`, which gives keys a total order and a cheap hash.

use std::fmt;

/// Number of bits available for the flat cell index
pub const CELL_INDEX_BITS: u32 = 56;

/// Largest representable flat cell index
pub const MAX_CELL_INDEX: u64 = (1 << CELL_INDEX_BITS) - 1;

/// Identity of a cell: (timepoint, setup, level, cell index)
///
/// Keys are ordered by timepoint, then setup, then level, then cell index.
///
/// # Example
///
/// ```
/// use pyramid_cache::CacheKey;
///
/// let key = CacheKey::new(3, 1, 2, 4711);
/// assert_eq!(key.timepoint(), 3);
/// assert_eq!(key.setup(), 1);
/// assert_eq!(key.level(), 2);
/// assert_eq!(key.cell_index(), 4711);
/// assert!(key < CacheKey::new(3, 1, 3, 0));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey(u128);

impl CacheKey {
    /// Build a key
    ///
    /// # Panics
    ///
    /// Panics if `cell_index` exceeds [`MAX_CELL_INDEX`].
    pub fn new(timepoint: u32, setup: u32, level: u8, cell_index: u64) -> Self {
        Self::try_new(timepoint, setup, level, cell_index)
            .unwrap_or_else(|| panic!("cell index {cell_index} exceeds {MAX_CELL_INDEX}"))
    }

    /// Build a key, or `None` if `cell_index` exceeds [`MAX_CELL_INDEX`]
    pub fn try_new(timepoint: u32, setup: u32, level: u8, cell_index: u64) -> Option<Self> {
        if cell_index > MAX_CELL_INDEX {
            return None;
        }
        Some(Self(
            (timepoint as u128) << 96
                | (setup as u128) << 64
                | (level as u128) << CELL_INDEX_BITS
                | cell_index as u128,
        ))
    }

    pub fn timepoint(&self) -> u32 {
        (self.0 >> 96) as u32
    }

    pub fn setup(&self) -> u32 {
        (self.0 >> 64) as u32
    }

    pub fn level(&self) -> u8 {
        (self.0 >> CELL_INDEX_BITS) as u8
    }

    pub fn cell_index(&self) -> u64 {
        (self.0 as u64) & MAX_CELL_INDEX
    }

    /// The packed representation
    pub fn packed(&self) -> u128 {
        self.0
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheKey")
            .field("timepoint", &self.timepoint())
            .field("setup", &self.setup())
            .field("level", &self.level())
            .field("cell_index", &self.cell_index())
            .finish()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "t{}/s{}/l{}/c{}",
            self.timepoint(),
            self.setup(),
            self.level(),
            self.cell_index()
        )
    }
}
