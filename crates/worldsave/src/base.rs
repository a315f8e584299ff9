use thiserror::Error;
use tracing::debug;

use crate::equipment::builtin_frame_x;
use crate::grid::{Cell, Grid, GridError, TileCell, WallCell};
use crate::registry::{is_mod_kind, ContentRegistry, Layer};
use crate::wire::{ByteReader, ByteWriter, WireError};

const HAS_TILE: u8 = 1;
const HAS_TILE_COLOR: u8 = 2;
const HAS_WALL: u8 = 4;
const HAS_WALL_COLOR: u8 = 8;
const HAS_RUN: u8 = 16;
const KNOWN_FLAGS: u8 = HAS_TILE | HAS_TILE_COLOR | HAS_WALL | HAS_WALL_COLOR | HAS_RUN;

#[derive(Debug, Error)]
pub enum BaseLayerError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error("builtin layer: run at cell {position} covers {run} cells, past the {cells} of the grid")]
    Overrun {
        position: usize,
        run: usize,
        cells: usize,
    },
    #[error("builtin layer: invalid flag byte {flags:#04x} at cell {position}")]
    InvalidFlags { flags: u8, position: usize },
}

fn builtin_part(cell: &Cell, registry: &dyn ContentRegistry) -> Cell {
    let tile = cell
        .tile
        .filter(|tile| !is_mod_kind(registry, Layer::Tile, tile.kind))
        .map(|tile| TileCell {
            frame_x: builtin_frame_x(registry, &tile),
            ..tile
        });
    let wall = cell
        .wall
        .filter(|wall| !is_mod_kind(registry, Layer::Wall, wall.kind));
    Cell { tile, wall }
}

pub fn write_builtin_layer(grid: &Grid, registry: &dyn ContentRegistry) -> Vec<u8> {
    let parts: Vec<Cell> = grid
        .cells()
        .iter()
        .map(|cell| builtin_part(cell, registry))
        .collect();
    let mut writer = ByteWriter::new("builtin layer");
    let mut records = 0usize;
    let mut index = 0usize;
    while index < parts.len() {
        let cell = parts[index];
        let mut run = 0usize;
        while run < u16::MAX as usize && parts.get(index + 1 + run) == Some(&cell) {
            run += 1;
        }

        let mut flags = 0u8;
        if let Some(tile) = cell.tile {
            flags |= HAS_TILE;
            if tile.color != 0 {
                flags |= HAS_TILE_COLOR;
            }
        }
        if let Some(wall) = cell.wall {
            flags |= HAS_WALL;
            if wall.color != 0 {
                flags |= HAS_WALL_COLOR;
            }
        }
        if run > 0 {
            flags |= HAS_RUN;
        }

        writer.put_u8(flags);
        if let Some(tile) = cell.tile {
            writer.put_u16(tile.kind);
            writer.put_i16(tile.frame_x);
            writer.put_i16(tile.frame_y);
            if tile.color != 0 {
                writer.put_u8(tile.color);
            }
        }
        if let Some(wall) = cell.wall {
            writer.put_u16(wall.kind);
            if wall.color != 0 {
                writer.put_u8(wall.color);
            }
        }
        if run > 0 {
            writer.put_u16(run as u16);
        }
        records += 1;
        index += 1 + run;
    }
    debug!(records, bytes = writer.len(), "builtin_layer_encoded");
    writer.into_bytes()
}

pub fn read_builtin_layer(bytes: &[u8], width: u16, height: u16) -> Result<Grid, BaseLayerError> {
    let mut grid = Grid::new(width, height)?;
    let cells = grid.len();
    let mut reader = ByteReader::new("builtin layer", bytes);
    let mut position = 0usize;
    while position < cells {
        let flags = reader.read_u8()?;
        let invalid = flags & !KNOWN_FLAGS != 0
            || (flags & HAS_TILE == 0 && flags & HAS_TILE_COLOR != 0)
            || (flags & HAS_WALL == 0 && flags & HAS_WALL_COLOR != 0);
        if invalid {
            return Err(BaseLayerError::InvalidFlags { flags, position });
        }

        let mut cell = Cell::default();
        if flags & HAS_TILE != 0 {
            let kind = reader.read_u16()?;
            let frame_x = reader.read_i16()?;
            let frame_y = reader.read_i16()?;
            let color = if flags & HAS_TILE_COLOR != 0 {
                reader.read_u8()?
            } else {
                0
            };
            cell.tile = Some(TileCell {
                kind,
                frame_x,
                frame_y,
                color,
            });
        }
        if flags & HAS_WALL != 0 {
            let kind = reader.read_u16()?;
            let color = if flags & HAS_WALL_COLOR != 0 {
                reader.read_u8()?
            } else {
                0
            };
            cell.wall = Some(WallCell { kind, color });
        }
        let run = if flags & HAS_RUN != 0 {
            reader.read_u16()? as usize
        } else {
            0
        };
        if position + run >= cells {
            return Err(BaseLayerError::Overrun {
                position,
                run,
                cells,
            });
        }
        grid.cells_mut()[position..=position + run].fill(cell);
        position += run + 1;
    }
    reader.expect_end()?;
    Ok(grid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridPos;
    use crate::identity::ContentKey;
    use crate::registry::ContentTable;

    #[test]
    fn builtin_parts_roundtrip_and_mod_parts_are_dropped() {
        let mut registry = ContentTable::new(10, 10).expect("table");
        let block = registry
            .register_tile(ContentKey::new("ExampleMod", "Block"), false)
            .expect("block");
        let mut grid = Grid::new(3, 4).expect("grid");
        let mut painted = TileCell::framed(2, 18, 36);
        painted.color = 4;
        grid.set(
            GridPos::new(0, 0),
            Cell {
                tile: Some(painted),
                wall: Some(WallCell { kind: 1, color: 9 }),
            },
        );
        grid.set(
            GridPos::new(1, 2),
            Cell {
                tile: Some(TileCell::unframed(block)),
                wall: Some(WallCell::new(3)),
            },
        );

        let bytes = write_builtin_layer(&grid, &registry);
        let decoded = read_builtin_layer(&bytes, 3, 4).expect("decode");
        assert_eq!(decoded.get(GridPos::new(0, 0)), grid.get(GridPos::new(0, 0)));
        assert_eq!(
            decoded.get(GridPos::new(1, 2)),
            Some(&Cell {
                tile: None,
                wall: Some(WallCell::new(3)),
            })
        );
    }

    #[test]
    fn uniform_grid_is_one_record() {
        let registry = ContentTable::new(10, 10).expect("table");
        let grid = Grid::new(20, 20).expect("grid");
        let bytes = write_builtin_layer(&grid, &registry);
        assert_eq!(bytes, vec![HAS_RUN, 143, 1]);
        assert_eq!(read_builtin_layer(&bytes, 20, 20).expect("decode"), grid);
    }

    #[test]
    fn overruns_and_short_streams_fail() {
        assert!(matches!(
            read_builtin_layer(&[HAS_RUN, 4, 0], 2, 2),
            Err(BaseLayerError::Overrun { .. })
        ));
        assert!(matches!(
            read_builtin_layer(&[0, 0], 2, 2),
            Err(BaseLayerError::Wire(WireError::UnexpectedEnd { .. }))
        ));
        assert!(matches!(
            read_builtin_layer(&[HAS_TILE_COLOR], 1, 1),
            Err(BaseLayerError::InvalidFlags { .. })
        ));
    }
}
