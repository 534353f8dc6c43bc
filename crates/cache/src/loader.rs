//! Storage collaborator interface
//!
//! The cache is format agnostic. A [`CacheArrayLoader`] reads the voxels of
//! one cell from whatever backend holds the pyramid (HDF5, N5, Zarr, a
//! remote service) and supplies cheap stand-in arrays for cells that have
//! not been loaded yet.

use crate::{CellLayout, LoadError};

/// Reads cell data from storage
pub trait CacheArrayLoader: Send + Sync + 'static {
    /// In-memory representation of one cell's voxels
    type Array: Send + Sync + 'static;

    /// Read the voxels of the cell described by `layout`
    ///
    /// Called by the render thread for blocking loads and by fetcher
    /// threads otherwise. May block for as long as the backend needs.
    fn load_array(
        &self,
        timepoint: u32,
        setup: u32,
        level: u8,
        layout: &CellLayout,
    ) -> Result<Self::Array, LoadError>;

    /// Placeholder data for a cell that has not been loaded
    ///
    /// Must be cheap. Implementations are free to hand out one shared
    /// array per cell shape.
    fn empty_array(&self, layout: &CellLayout) -> Self::Array;

    /// Size of one voxel, used for I/O accounting and retention sizing
    fn bytes_per_element(&self) -> usize;
}

/// Estimated size in bytes of a cell with `layout` for `loader`
pub(crate) fn cell_bytes<L: CacheArrayLoader>(loader: &L, layout: &CellLayout) -> u64 {
    layout
        .num_elements()
        .saturating_mul(loader.bytes_per_element() as u64)
}
