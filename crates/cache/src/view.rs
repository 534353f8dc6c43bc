//! Cell access for one image
//!
//! [`VolatileCells`] is what an image view holds: the shared cache plus the
//! coordinates of one resolution level of one setup at one timepoint. Cells
//! are addressed by their flat index in the level's [`CellGrid`].

use crate::{CacheArrayLoader, CacheError, CacheHints, CacheKey, CellCache, CellGrid, CellRef};
use std::sync::Arc;

/// Cells of one resolution level, requested with adjustable hints
///
/// # Example
///
/// ```
/// # use pyramid_cache::{CacheArrayLoader, CellLayout, LoadError};
/// # struct Ones;
/// # impl CacheArrayLoader for Ones {
/// #     type Array = Vec<u8>;
/// #     fn load_array(&self, _: u32, _: u32, _: u8, l: &CellLayout) -> Result<Vec<u8>, LoadError> {
/// #         Ok(vec![1; l.num_elements() as usize])
/// #     }
/// #     fn empty_array(&self, l: &CellLayout) -> Vec<u8> { vec![0; l.num_elements() as usize] }
/// #     fn bytes_per_element(&self) -> usize { 1 }
/// # }
/// use pyramid_cache::{CacheConfig, CacheHints, CellCache, CellGrid, VolatileCells};
/// use std::sync::Arc;
///
/// let cache = Arc::new(CellCache::new(Ones, &CacheConfig::without_fetchers()).unwrap());
/// let mut cells = VolatileCells::new(cache, 0, 0, 1, CellGrid::new([64, 64, 8], [32, 32, 8]));
///
/// cells.set_hints(CacheHints::blocking());
/// let cell = cells.get(3).unwrap().unwrap();
/// assert!(cell.is_valid());
/// assert_eq!(cell.origin(), [32, 32, 0]);
/// assert!(cells.get(4).unwrap().is_none());
/// ```
pub struct VolatileCells<L: CacheArrayLoader> {
    cache: Arc<CellCache<L>>,
    timepoint: u32,
    setup: u32,
    level: u8,
    grid: CellGrid,
    hints: CacheHints,
}

impl<L: CacheArrayLoader> VolatileCells<L> {
    /// Create a view with default (volatile, priority 0) hints
    pub fn new(
        cache: Arc<CellCache<L>>,
        timepoint: u32,
        setup: u32,
        level: u8,
        grid: CellGrid,
    ) -> Self {
        Self {
            cache,
            timepoint,
            setup,
            level,
            grid,
            hints: CacheHints::default(),
        }
    }

    pub fn cache(&self) -> &Arc<CellCache<L>> {
        &self.cache
    }

    pub fn grid(&self) -> &CellGrid {
        &self.grid
    }

    pub fn hints(&self) -> CacheHints {
        self.hints
    }

    /// Hints for subsequent requests
    pub fn set_hints(&mut self, hints: CacheHints) {
        self.hints = hints;
    }

    /// Key of the cell with flat index `cell_index`, if it is in the grid
    pub fn key(&self, cell_index: u64) -> Option<CacheKey> {
        if cell_index >= self.grid.num_cells() {
            return None;
        }
        CacheKey::try_new(self.timepoint, self.setup, self.level, cell_index)
    }

    /// Request a cell with the current hints
    ///
    /// Returns `Ok(None)` for indices outside the grid and for absent cells
    /// under [`LoadingStrategy::DontLoad`](crate::LoadingStrategy::DontLoad).
    pub fn get(&self, cell_index: u64) -> Result<Option<CellRef<L::Array>>, CacheError> {
        self.get_with_hints(cell_index, &self.hints)
    }

    /// Request a cell with explicit hints
    pub fn get_with_hints(
        &self,
        cell_index: u64,
        hints: &CacheHints,
    ) -> Result<Option<CellRef<L::Array>>, CacheError> {
        let (Some(key), Some(layout)) = (self.key(cell_index), self.grid.cell_layout(cell_index))
        else {
            return Ok(None);
        };
        self.cache.get_with_hints(key, &layout, hints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CacheConfig, CellLayout, LoadError, LoadingStrategy};

    struct Levels;

    impl CacheArrayLoader for Levels {
        type Array = Vec<u8>;

        fn load_array(
            &self,
            timepoint: u32,
            setup: u32,
            level: u8,
            layout: &CellLayout,
        ) -> Result<Vec<u8>, LoadError> {
            let value = (timepoint * 100 + setup * 10) as u8 + level;
            Ok(vec![value; layout.num_elements() as usize])
        }

        fn empty_array(&self, layout: &CellLayout) -> Vec<u8> {
            vec![0; layout.num_elements() as usize]
        }

        fn bytes_per_element(&self) -> usize {
            1
        }
    }

    fn cells(level: u8) -> VolatileCells<Levels> {
        let cache = Arc::new(CellCache::new(Levels, &CacheConfig::without_fetchers()).unwrap());
        VolatileCells::new(cache, 1, 2, level, CellGrid::new([10, 10, 1], [4, 4, 1]))
    }

    #[test]
    fn test_keys_carry_coordinates() {
        let view = cells(3);
        let key = view.key(8).unwrap();
        assert_eq!(
            (key.timepoint(), key.setup(), key.level(), key.cell_index()),
            (1, 2, 3, 8)
        );
        assert!(view.key(9).is_none());
    }

    #[test]
    fn test_default_hints_are_volatile() {
        let view = cells(0);
        assert_eq!(view.hints().strategy, LoadingStrategy::Volatile);

        let cell = view.get(0).unwrap().unwrap();
        assert!(!cell.is_valid());
        assert_eq!(view.cache().queue_stats().pending(), 1);
    }

    #[test]
    fn test_blocking_get_uses_grid_layout() {
        let mut view = cells(4);
        view.set_hints(CacheHints::blocking());

        let border = view.get(8).unwrap().unwrap();
        assert_eq!(border.origin(), [8, 8, 0]);
        assert_eq!(border.dimensions(), [2, 2, 1]);
        assert_eq!(border.data(), &vec![124; 4]);
    }

    #[test]
    fn test_out_of_grid_is_none() {
        let view = cells(0);
        assert!(view
            .get_with_hints(100, &CacheHints::blocking())
            .unwrap()
            .is_none());
    }
}
