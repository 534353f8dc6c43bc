//! Regular cell grid over one resolution level
//!
//! Cells are numbered with x varying fastest, then y, then z. Cells on the
//! upper border are clipped to the image.

/// Partition of an image into equally sized cells
///
/// # Example
///
/// ```
/// use pyramid_cache::CellGrid;
///
/// let grid = CellGrid::new([100, 64, 10], [32, 32, 10]);
/// assert_eq!(grid.grid_dimensions(), [4, 2, 1]);
/// assert_eq!(grid.num_cells(), 8);
///
/// let border = grid.cell_layout(3).unwrap();
/// assert_eq!(border.origin, [96, 0, 0]);
/// assert_eq!(border.dimensions, [4, 32, 10]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellGrid {
    image_dimensions: [u64; 3],
    cell_dimensions: [u32; 3],
    grid_dimensions: [u64; 3],
}

impl CellGrid {
    /// Create a grid
    ///
    /// Zero cell extents are treated as one.
    pub fn new(image_dimensions: [u64; 3], cell_dimensions: [u32; 3]) -> Self {
        let cell_dimensions = cell_dimensions.map(|d| d.max(1));
        let mut grid_dimensions = [0; 3];
        for axis in 0..3 {
            grid_dimensions[axis] = image_dimensions[axis].div_ceil(cell_dimensions[axis] as u64);
        }
        Self {
            image_dimensions,
            cell_dimensions,
            grid_dimensions,
        }
    }

    pub fn image_dimensions(&self) -> [u64; 3] {
        self.image_dimensions
    }

    pub fn cell_dimensions(&self) -> [u32; 3] {
        self.cell_dimensions
    }

    /// Number of cells along each axis
    pub fn grid_dimensions(&self) -> [u64; 3] {
        self.grid_dimensions
    }

    /// Total number of cells
    pub fn num_cells(&self) -> u64 {
        self.grid_dimensions.iter().product()
    }

    /// Flat index of the cell at `grid_position`, if inside the grid
    pub fn cell_index(&self, grid_position: [u64; 3]) -> Option<u64> {
        let [gx, gy, _] = self.grid_dimensions;
        let inside = grid_position
            .iter()
            .zip(&self.grid_dimensions)
            .all(|(p, n)| p < n);
        inside.then(|| grid_position[0] + gx * (grid_position[1] + gy * grid_position[2]))
    }

    /// Grid position of the cell with flat index `index`
    pub fn grid_position(&self, index: u64) -> Option<[u64; 3]> {
        if index >= self.num_cells() {
            return None;
        }
        let [gx, gy, _] = self.grid_dimensions;
        Some([index % gx, (index / gx) % gy, index / (gx * gy)])
    }

    /// Layout of the cell with flat index `index`, or `None` past the end
    pub fn cell_layout(&self, index: u64) -> Option<crate::CellLayout> {
        let position = self.grid_position(index)?;
        let mut dimensions = [0u32; 3];
        let mut origin = [0i64; 3];
        for axis in 0..3 {
            let cell = self.cell_dimensions[axis] as u64;
            let min = position[axis] * cell;
            let extent = cell.min(self.image_dimensions[axis] - min);
            origin[axis] = min as i64;
            dimensions[axis] = extent as u32;
        }
        Some(crate::CellLayout::new(dimensions, origin))
    }
}
