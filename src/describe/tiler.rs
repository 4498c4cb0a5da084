//! # 区块切分
//!
//! 按光栅顺序（先行后列：自上而下、自左而右）切分画布。描述结果按下标与此顺序对齐，
//! 因此顺序本身就是协议的一部分。

use super::DescribeError;
use super::source::{GridLayout, Tile};

/// 生成区块列表。画布宽高必须是区块边长的整数倍。
///
/// # 示例
/// ```rust
/// use talk_art::describe::tile_grid;
///
/// let tiles = tile_grid(400, 200, 200)?;
/// let coords: Vec<[u32; 2]> = tiles.iter().map(|t| t.coords()).collect();
/// assert_eq!(coords, vec![[0, 0], [200, 0]]);
/// # Ok::<(), talk_art::describe::DescribeError>(())
/// ```
pub fn tile_grid(
    padded_width: u32,
    padded_height: u32,
    region_size: u32,
) -> Result<Vec<Tile>, DescribeError> {
    if region_size == 0 {
        return Err(DescribeError::Validation("region_size 必须大于 0".to_string()));
    }
    if padded_width % region_size != 0 || padded_height % region_size != 0 {
        return Err(DescribeError::Validation(format!(
            "画布 {}x{} 不是区块边长 {} 的整数倍",
            padded_width, padded_height, region_size
        )));
    }

    let columns = (padded_width / region_size) as usize;
    let rows = (padded_height / region_size) as usize;
    let mut tiles = Vec::with_capacity(columns * rows);

    for y in (0..padded_height).step_by(region_size as usize) {
        for x in (0..padded_width).step_by(region_size as usize) {
            tiles.push(Tile {
                index: tiles.len(),
                x,
                y,
            });
        }
    }

    Ok(tiles)
}

/// 按几何参数切分。
pub fn tiles_for_layout(layout: &GridLayout) -> Result<Vec<Tile>, DescribeError> {
    tile_grid(layout.padded_width, layout.padded_height, layout.region_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn single_row_of_two_tiles() {
        let tiles = tile_grid(400, 200, 200).expect("tiling failed");

        assert_eq!(
            tiles,
            vec![
                Tile { index: 0, x: 0, y: 0 },
                Tile { index: 1, x: 200, y: 0 },
            ]
        );
    }

    #[test]
    fn raster_order_is_row_major() {
        let coords: Vec<[u32; 2]> = tile_grid(400, 400, 200)
            .expect("tiling failed")
            .iter()
            .map(Tile::coords)
            .collect();

        assert_eq!(coords, vec![[0, 0], [200, 0], [0, 200], [200, 200]]);
    }

    #[test]
    fn misaligned_canvas_is_rejected() {
        assert!(matches!(tile_grid(401, 200, 200), Err(DescribeError::Validation(_))));
        assert!(matches!(tile_grid(400, 200, 0), Err(DescribeError::Validation(_))));
    }

    proptest! {
        #[test]
        fn tile_count_is_exact(columns in 1u32..20, rows in 1u32..20, region_size in 1u32..300) {
            let tiles = tile_grid(columns * region_size, rows * region_size, region_size)
                .expect("tiling failed");

            prop_assert_eq!(tiles.len(), (columns * rows) as usize);
            for (i, tile) in tiles.iter().enumerate() {
                prop_assert_eq!(tile.index, i);
                prop_assert_eq!(tile.x, (i as u32 % columns) * region_size);
                prop_assert_eq!(tile.y, (i as u32 / columns) * region_size);
            }
        }
    }
}
