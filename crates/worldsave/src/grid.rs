use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const FRAME_UNSET: i16 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridPos {
    pub x: i16,
    pub y: i16,
}

impl GridPos {
    pub const fn new(x: i16, y: i16) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileCell {
    pub kind: u16,
    pub frame_x: i16,
    pub frame_y: i16,
    /// Paint; 0 means unpainted.
    pub color: u8,
}

impl TileCell {
    pub const fn unframed(kind: u16) -> Self {
        Self {
            kind,
            frame_x: FRAME_UNSET,
            frame_y: FRAME_UNSET,
            color: 0,
        }
    }

    pub const fn framed(kind: u16, frame_x: i16, frame_y: i16) -> Self {
        Self {
            kind,
            frame_x,
            frame_y,
            color: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WallCell {
    pub kind: u16,
    pub color: u8,
}

impl WallCell {
    pub const fn new(kind: u16) -> Self {
        Self { kind, color: 0 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cell {
    pub tile: Option<TileCell>,
    pub wall: Option<WallCell>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GridError {
    #[error("grid dimensions {width}x{height} are invalid (each side must be 1..={max})")]
    InvalidDimensions { width: u16, height: u16, max: u16 },
}

/// Cells are stored column-major (`y` fastest); every codec walks them in this
/// order, so the linear index doubles as the stream position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    width: u16,
    height: u16,
    cells: Vec<Cell>,
}

impl Grid {
    pub const MAX_SIDE: u16 = i16::MAX as u16;

    pub fn new(width: u16, height: u16) -> Result<Self, GridError> {
        if width == 0 || height == 0 || width > Self::MAX_SIDE || height > Self::MAX_SIDE {
            return Err(GridError::InvalidDimensions {
                width,
                height,
                max: Self::MAX_SIDE,
            });
        }
        Ok(Self {
            width,
            height,
            cells: vec![Cell::default(); width as usize * height as usize],
        })
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn contains(&self, pos: GridPos) -> bool {
        pos.x >= 0 && pos.y >= 0 && (pos.x as u16) < self.width && (pos.y as u16) < self.height
    }

    pub fn index_of(&self, pos: GridPos) -> Option<usize> {
        if !self.contains(pos) {
            return None;
        }
        Some(pos.x as usize * self.height as usize + pos.y as usize)
    }

    pub fn pos_of(&self, index: usize) -> GridPos {
        let height = self.height as usize;
        GridPos::new((index / height) as i16, (index % height) as i16)
    }

    pub fn get(&self, pos: GridPos) -> Option<&Cell> {
        self.index_of(pos).map(|index| &self.cells[index])
    }

    pub fn get_mut(&mut self, pos: GridPos) -> Option<&mut Cell> {
        self.index_of(pos).map(move |index| &mut self.cells[index])
    }

    pub fn set(&mut self, pos: GridPos, cell: Cell) -> bool {
        match self.get_mut(pos) {
            Some(slot) => {
                *slot = cell;
                true
            }
            None => false,
        }
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub(crate) fn cells_mut(&mut self) -> &mut [Cell] {
        &mut self.cells
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iteration_order_is_column_major() {
        let grid = Grid::new(3, 4).expect("grid");
        assert_eq!(grid.index_of(GridPos::new(0, 1)), Some(1));
        assert_eq!(grid.index_of(GridPos::new(1, 0)), Some(4));
        assert_eq!(grid.pos_of(7), GridPos::new(1, 3));
        assert_eq!(grid.len(), 12);
    }

    #[test]
    fn out_of_bounds_positions_are_rejected() {
        let mut grid = Grid::new(2, 2).expect("grid");
        assert!(grid.get(GridPos::new(2, 0)).is_none());
        assert!(grid.get(GridPos::new(0, -1)).is_none());
        assert!(!grid.set(GridPos::new(5, 5), Cell::default()));
    }

    #[test]
    fn zero_sized_grid_is_invalid() {
        assert!(matches!(
            Grid::new(0, 10),
            Err(GridError::InvalidDimensions { .. })
        ));
    }
}
