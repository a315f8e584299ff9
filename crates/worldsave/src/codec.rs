use thiserror::Error;
use tracing::debug;

use crate::grid::{Cell, Grid, TileCell, WallCell, FRAME_UNSET};
use crate::identity::IdentityRecord;
use crate::registry::{is_frame_important, is_mod_kind, ContentRegistry, Layer};
use crate::tables::{ResolvedKind, ResolvedTables, UsageFlags};
use crate::unloaded::{StoreError, UnloadedStore};
use crate::wire::{ByteReader, ByteWriter, WireError};

pub const FLAG_MOD_TILE: u8 = 1;
pub const FLAG_FRAME_X_WIDE: u8 = 2;
pub const FLAG_FRAME_Y_WIDE: u8 = 4;
pub const FLAG_TILE_COLOR: u8 = 8;
pub const FLAG_MOD_WALL: u8 = 16;
pub const FLAG_WALL_COLOR: u8 = 32;
pub const FLAG_SAME_FOLLOWS: u8 = 64;
pub const FLAG_NEXT_SPECIAL: u8 = 128;

// A skip byte of 255 means "255 ordinary cells, keep reading".
const SKIP_CONTINUE: u8 = u8::MAX;
const MAX_SAME: usize = u8::MAX as usize;
const SECTION: &str = "grid blob";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("grid blob: {what} at cell {position} runs past the {cells} cells of the grid")]
    Overrun {
        what: &'static str,
        position: usize,
        cells: usize,
    },
    #[error("grid blob: invalid flag byte {flags:#04x} at cell {position}")]
    InvalidFlags { flags: u8, position: usize },
    #[error("grid blob: {layer} save id {save_id} at cell {position} is not in the identity table")]
    UnknownSaveId {
        layer: Layer,
        save_id: u16,
        position: usize,
    },
}

#[derive(Debug, Default)]
pub struct EncodedGrid {
    pub bytes: Vec<u8>,
    pub usage: UsageFlags,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecodeSummary {
    pub records: usize,
    pub special_cells: usize,
    pub pending_tile_cells: usize,
    pub pending_wall_cells: usize,
}

fn is_special(cell: &Cell, registry: &dyn ContentRegistry) -> bool {
    cell.tile
        .is_some_and(|tile| is_mod_kind(registry, Layer::Tile, tile.kind))
        || cell
            .wall
            .is_some_and(|wall| is_mod_kind(registry, Layer::Wall, wall.kind))
}

pub fn write_tile_data(
    grid: &Grid,
    registry: &dyn ContentRegistry,
) -> Result<EncodedGrid, CodecError> {
    let cells = grid.cells();
    let mut writer = ByteWriter::new(SECTION);
    let mut usage = UsageFlags::default();
    let mut skip = 0u8;
    let mut next_special = false;
    let mut records = 0usize;
    let mut index = 0usize;

    while index < cells.len() {
        let cell = &cells[index];
        if !is_special(cell, registry) {
            skip += 1;
            if skip == SKIP_CONTINUE {
                writer.put_u8(SKIP_CONTINUE);
                skip = 0;
            }
            index += 1;
            continue;
        }

        if !next_special {
            writer.put_u8(skip);
        }
        skip = 0;

        let mut flags = 0u8;
        let mut fields = ByteWriter::new(SECTION);
        if let Some(tile) = cell.tile.filter(|tile| is_mod_kind(registry, Layer::Tile, tile.kind)) {
            flags |= FLAG_MOD_TILE;
            usage.note(Layer::Tile, tile.kind);
            fields.put_u16(tile.kind);
            if is_frame_important(registry, tile.kind) {
                flags |= put_frame(&mut fields, tile.frame_x, FLAG_FRAME_X_WIDE);
                flags |= put_frame(&mut fields, tile.frame_y, FLAG_FRAME_Y_WIDE);
            }
            if tile.color != 0 {
                flags |= FLAG_TILE_COLOR;
                fields.put_u8(tile.color);
            }
        }
        if let Some(wall) = cell.wall.filter(|wall| is_mod_kind(registry, Layer::Wall, wall.kind)) {
            flags |= FLAG_MOD_WALL;
            usage.note(Layer::Wall, wall.kind);
            fields.put_u16(wall.kind);
            if wall.color != 0 {
                flags |= FLAG_WALL_COLOR;
                fields.put_u8(wall.color);
            }
        }

        let mut same = 0usize;
        while same < MAX_SAME && cells.get(index + 1 + same) == Some(cell) {
            same += 1;
        }
        if same > 0 {
            flags |= FLAG_SAME_FOLLOWS;
        }
        index += 1 + same;
        next_special = cells
            .get(index)
            .is_some_and(|next| is_special(next, registry));
        if next_special {
            flags |= FLAG_NEXT_SPECIAL;
        }

        writer.put_u8(flags);
        writer.put_raw(&fields.into_bytes());
        if same > 0 {
            writer.put_u8(same as u8);
        }
        records += 1;
    }
    if skip > 0 {
        writer.put_u8(skip);
    }

    debug!(
        records,
        bytes = writer.len(),
        mod_tiles = usage.kinds(Layer::Tile).len(),
        mod_walls = usage.kinds(Layer::Wall).len(),
        "grid_encoded"
    );
    Ok(EncodedGrid {
        bytes: writer.into_bytes(),
        usage,
    })
}

fn put_frame(writer: &mut ByteWriter, value: i16, wide_flag: u8) -> u8 {
    match u8::try_from(value) {
        Ok(narrow) => {
            writer.put_u8(narrow);
            0
        }
        Err(_) => {
            writer.put_i16(value);
            wide_flag
        }
    }
}

fn read_frame(reader: &mut ByteReader<'_>, flags: u8, wide_flag: u8) -> Result<i16, WireError> {
    if flags & wide_flag != 0 {
        reader.read_i16()
    } else {
        Ok(reader.read_u8()? as i16)
    }
}

fn validate_flags(flags: u8, position: usize) -> Result<(), CodecError> {
    let tile_fields = FLAG_FRAME_X_WIDE | FLAG_FRAME_Y_WIDE | FLAG_TILE_COLOR;
    let invalid = flags & (FLAG_MOD_TILE | FLAG_MOD_WALL) == 0
        || (flags & FLAG_MOD_TILE == 0 && flags & tile_fields != 0)
        || (flags & FLAG_MOD_WALL == 0 && flags & FLAG_WALL_COLOR != 0);
    if invalid {
        return Err(CodecError::InvalidFlags { flags, position });
    }
    Ok(())
}

fn resolve<'t>(
    tables: &'t ResolvedTables,
    layer: Layer,
    save_id: u16,
    position: usize,
) -> Result<&'t ResolvedKind, CodecError> {
    tables
        .get(layer, save_id)
        .ok_or(CodecError::UnknownSaveId {
            layer,
            save_id,
            position,
        })
}

pub fn read_tile_data(
    bytes: &[u8],
    tables: &ResolvedTables,
    grid: &mut Grid,
    store: &mut UnloadedStore,
) -> Result<DecodeSummary, CodecError> {
    let cells = grid.len();
    let mut reader = ByteReader::new(SECTION, bytes);
    let mut summary = DecodeSummary::default();
    let mut position = 0usize;
    let mut next_special = false;

    while position < cells {
        if !next_special {
            let skip = reader.read_u8()?;
            position += skip as usize;
            if position > cells {
                return Err(CodecError::Overrun {
                    what: "skip count",
                    position,
                    cells,
                });
            }
            if skip == SKIP_CONTINUE || position == cells {
                continue;
            }
        }

        let flags = reader.read_u8()?;
        validate_flags(flags, position)?;

        let mut tile = None;
        if flags & FLAG_MOD_TILE != 0 {
            let save_id = reader.read_u16()?;
            let resolved = resolve(tables, Layer::Tile, save_id, position)?;
            let wide = flags & (FLAG_FRAME_X_WIDE | FLAG_FRAME_Y_WIDE) != 0;
            if wide && !resolved.frame_important {
                return Err(CodecError::InvalidFlags { flags, position });
            }
            let (frame_x, frame_y) = if resolved.frame_important {
                (
                    read_frame(&mut reader, flags, FLAG_FRAME_X_WIDE)?,
                    read_frame(&mut reader, flags, FLAG_FRAME_Y_WIDE)?,
                )
            } else {
                (FRAME_UNSET, FRAME_UNSET)
            };
            let color = if flags & FLAG_TILE_COLOR != 0 {
                reader.read_u8()?
            } else {
                0
            };
            let mut decoded = TileCell {
                kind: resolved.kind,
                frame_x,
                frame_y,
                color,
            };
            if let Some(key) = &resolved.unresolved {
                let identity = if resolved.frame_important {
                    IdentityRecord::framed(key.clone(), frame_x, frame_y)
                } else {
                    IdentityRecord::new(key.clone())
                };
                let pending = store.queue_pending_tile(identity)?;
                (decoded.frame_x, decoded.frame_y) = pending.to_frames();
            }
            tile = Some((decoded, resolved.unresolved.is_some()));
        }

        let mut wall = None;
        if flags & FLAG_MOD_WALL != 0 {
            let save_id = reader.read_u16()?;
            let resolved = resolve(tables, Layer::Wall, save_id, position)?;
            let color = if flags & FLAG_WALL_COLOR != 0 {
                reader.read_u8()?
            } else {
                0
            };
            let pending = resolved
                .unresolved
                .as_ref()
                .map(|key| IdentityRecord::new(key.clone()));
            wall = Some((
                WallCell {
                    kind: resolved.kind,
                    color,
                },
                pending,
            ));
        }

        let same = if flags & FLAG_SAME_FOLLOWS != 0 {
            reader.read_u8()? as usize
        } else {
            0
        };
        let end = position + same;
        if end >= cells {
            return Err(CodecError::Overrun {
                what: "same count",
                position,
                cells,
            });
        }

        for index in position..=end {
            let pos = grid.pos_of(index);
            let cell = &mut grid.cells_mut()[index];
            if let Some((decoded, pending)) = tile {
                cell.tile = Some(decoded);
                if pending {
                    summary.pending_tile_cells += 1;
                }
            }
            if let Some((decoded, pending)) = &wall {
                cell.wall = Some(*decoded);
                if let Some(identity) = pending {
                    store.queue_pending_wall(pos, identity.clone());
                    summary.pending_wall_cells += 1;
                }
            }
        }
        summary.records += 1;
        summary.special_cells += same + 1;
        position = end + 1;

        next_special = flags & FLAG_NEXT_SPECIAL != 0;
        if next_special && position == cells {
            return Err(CodecError::Overrun {
                what: "next-special flag",
                position,
                cells,
            });
        }
    }
    reader.expect_end()?;

    debug!(
        records = summary.records,
        special_cells = summary.special_cells,
        pending_tile_cells = summary.pending_tile_cells,
        pending_wall_cells = summary.pending_wall_cells,
        "grid_decoded"
    );
    Ok(summary)
}
