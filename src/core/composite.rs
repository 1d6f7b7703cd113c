//! Precedence compositor for aligned surface pairs.
//!
//! Layers are pasted into the output strictly in job order: wherever a layer
//! holds valid elevation data it overwrites elevation, uncertainty, and the
//! key cell, regardless of what earlier layers put there. Inputs are
//! pre-aligned upstream (identical origin and resolution), so placement is a
//! straight index overlay clipped to the common shape; no coordinate
//! arithmetic happens here.

use ndarray::{Array2, Axis};

use crate::core::value_table::key_for;
use crate::types::{
    BagError, BagResult, BandGrid, BaseGeometry, GridSurface, KeyGrid, KEY_UNASSIGNED,
};

/// Output triple of one composite: elevation and uncertainty bands plus the
/// parallel key layer, all shaped to the base geometry.
#[derive(Debug, Clone)]
pub struct CompositeLayers {
    pub elevation: BandGrid,
    pub uncertainty: BandGrid,
    pub keys: KeyGrid,
}

impl CompositeLayers {
    fn unset(base: &BaseGeometry) -> Self {
        let shape = (base.rows, base.cols);
        Self {
            elevation: Array2::from_elem(shape, base.nodata),
            uncertainty: Array2::from_elem(shape, base.nodata),
            keys: Array2::from_elem(shape, KEY_UNASSIGNED),
        }
    }

    /// Flip all three grids to the storage layer's bottom-to-top row order.
    /// The same flip must reach elevation, uncertainty, and keys, or the
    /// provenance mask drifts from the surface it describes.
    pub fn flipped_for_storage(&self) -> Self {
        let mut flipped = self.clone();
        flipped.elevation.invert_axis(Axis(0));
        flipped.uncertainty.invert_axis(Axis(0));
        flipped.keys.invert_axis(Axis(0));
        flipped
    }
}

/// Composite `layers` (surface + value-table record index, lowest precedence
/// first) onto the base geometry. An empty layer slice yields an all-nodata
/// composite with every key unassigned.
pub fn composite(
    base: &BaseGeometry,
    layers: &[(GridSurface, u16)],
) -> BagResult<CompositeLayers> {
    let mut out = CompositeLayers::unset(base);

    for (surface, record_index) in layers {
        if surface.cell_size != base.cell_size || surface.origin != base.origin {
            return Err(BagError::GeometryMismatch(format!(
                "layer registration (cell {:?} at {:?}) differs from base (cell {:?} at {:?})",
                surface.cell_size, surface.origin, base.cell_size, base.origin
            )));
        }

        let rows = surface.rows.min(base.rows);
        let cols = surface.cols.min(base.cols);
        let key = key_for(*record_index);

        for r in 0..rows {
            for c in 0..cols {
                // exact sentinel comparison, no epsilon
                if surface.is_set(r, c) {
                    out.elevation[[r, c]] = surface.elevation[[r, c]];
                    out.uncertainty[[r, c]] = surface.uncertainty[[r, c]];
                    out.keys[[r, c]] = key;
                }
            }
        }
    }

    let assigned = out.keys.iter().filter(|&&k| k != KEY_UNASSIGNED).count();
    log::info!(
        "composited {} layer(s): {}/{} cells assigned",
        layers.len(),
        assigned,
        base.rows * base.cols
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    const NODATA: f32 = 1_000_000.0;

    fn base_3x3() -> BaseGeometry {
        BaseGeometry {
            rows: 3,
            cols: 3,
            cell_size: (1.0, 1.0),
            origin: (400_000.0, 4_000_000.0),
            nodata: NODATA,
        }
    }

    fn surface(elevation: BandGrid) -> GridSurface {
        let uncertainty = elevation.mapv(|v| if v != NODATA { 0.5 } else { NODATA });
        let mut geometry = base_3x3();
        geometry.rows = elevation.nrows();
        geometry.cols = elevation.ncols();
        GridSurface::new(geometry, elevation, uncertainty).unwrap()
    }

    #[test]
    fn test_later_layer_overwrites_valid_cells_only() {
        let a = surface(arr2(&[[1.0, 1.0, 1.0], [1.0, 1.0, 1.0], [1.0, 1.0, 1.0]]));
        let b = surface(arr2(&[
            [NODATA, NODATA, NODATA],
            [NODATA, 9.0, NODATA],
            [NODATA, NODATA, NODATA],
        ]));

        let out = composite(&base_3x3(), &[(a, 0), (b, 1)]).unwrap();
        assert_eq!(
            out.elevation,
            arr2(&[[1.0, 1.0, 1.0], [1.0, 9.0, 1.0], [1.0, 1.0, 1.0]])
        );
        assert_eq!(out.keys, arr2(&[[1, 1, 1], [1, 2, 1], [1, 1, 1]]));
    }

    #[test]
    fn test_empty_layer_set_yields_unset_composite() {
        let out = composite(&base_3x3(), &[]).unwrap();
        assert!(out.elevation.iter().all(|&v| v == NODATA));
        assert!(out.keys.iter().all(|&k| k == KEY_UNASSIGNED));
    }

    #[test]
    fn test_smaller_layer_is_clipped_to_overlap() {
        let small = surface(arr2(&[[7.0, 7.0]]));
        let out = composite(&base_3x3(), &[(small, 0)]).unwrap();
        assert_eq!(out.elevation[[0, 0]], 7.0);
        assert_eq!(out.elevation[[0, 1]], 7.0);
        assert_eq!(out.elevation[[0, 2]], NODATA);
        assert_eq!(out.keys[[1, 0]], KEY_UNASSIGNED);
    }

    #[test]
    fn test_misregistered_layer_is_rejected() {
        let mut shifted = surface(arr2(&[[1.0]]));
        shifted.origin = (0.0, 0.0);
        assert!(matches!(
            composite(&base_3x3(), &[(shifted, 0)]),
            Err(BagError::GeometryMismatch(_))
        ));
    }

    #[test]
    fn test_storage_flip_moves_all_three_grids_together() {
        let a = surface(arr2(&[
            [1.0, 1.0, 1.0],
            [NODATA, NODATA, NODATA],
            [NODATA, NODATA, NODATA],
        ]));
        let out = composite(&base_3x3(), &[(a, 0)]).unwrap();
        let flipped = out.flipped_for_storage();
        assert_eq!(flipped.elevation[[2, 0]], 1.0);
        assert_eq!(flipped.keys[[2, 0]], 1);
        assert_eq!(flipped.elevation[[0, 0]], NODATA);
        assert_eq!(flipped.keys[[0, 0]], KEY_UNASSIGNED);
    }
}
