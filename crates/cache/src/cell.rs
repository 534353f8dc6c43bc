//! Cells and their layout
//!
//! A [`Cell`] is never mutated once constructed. Loading a cell produces a
//! new `Cell` that replaces the placeholder wholesale, so a reader holding
//! an `Arc<Cell>` always sees a complete block.

use std::fmt;

/// Position and extent of one cell within its image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellLayout {
    /// Extent in voxels along x, y, z
    pub dimensions: [u32; 3],
    /// Minimum voxel coordinate along x, y, z
    pub origin: [i64; 3],
}

impl CellLayout {
    pub fn new(dimensions: [u32; 3], origin: [i64; 3]) -> Self {
        Self { dimensions, origin }
    }

    /// Number of voxels in the cell
    pub fn num_elements(&self) -> u64 {
        self.dimensions.iter().map(|&d| d as u64).product()
    }
}

/// One block of voxel data
///
/// # Example
///
/// ```
/// use pyramid_cache::{Cell, CellLayout};
///
/// let layout = CellLayout::new([2, 2, 1], [0, 0, 0]);
/// let placeholder = Cell::placeholder(layout, vec![0u8; 4]);
/// assert!(!placeholder.is_valid());
///
/// let loaded = Cell::valid(layout, vec![7u8; 4]);
/// assert!(loaded.is_valid());
/// assert_eq!(loaded.data()[0], 7);
/// ```
pub struct Cell<A> {
    layout: CellLayout,
    data: A,
    valid: bool,
}

impl<A> Cell<A> {
    /// A cell holding data read from storage
    pub fn valid(layout: CellLayout, data: A) -> Self {
        Self {
            layout,
            data,
            valid: true,
        }
    }

    /// A cell holding stand-in data until the real data has been loaded
    pub fn placeholder(layout: CellLayout, data: A) -> Self {
        Self {
            layout,
            data,
            valid: false,
        }
    }

    pub fn layout(&self) -> &CellLayout {
        &self.layout
    }

    pub fn dimensions(&self) -> [u32; 3] {
        self.layout.dimensions
    }

    pub fn origin(&self) -> [i64; 3] {
        self.layout.origin
    }

    pub fn data(&self) -> &A {
        &self.data
    }

    /// Check if the cell holds loaded data
    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

impl<A> fmt::Debug for Cell<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("layout", &self.layout)
            .field("valid", &self.valid)
            .finish_non_exhaustive()
    }
}
