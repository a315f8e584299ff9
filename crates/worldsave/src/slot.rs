use thiserror::Error;

const BITS_PER_AXIS: u32 = 15;
const AXIS_MASK: u32 = (1 << BITS_PER_AXIS) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("slot index {index} does not fit in a packed frame (max {max})")]
pub struct SlotOverflow {
    pub index: usize,
    pub max: u32,
}

/// Slot index carried in a placeholder tile's frames: frame X holds the low 15
/// bits and frame Y the next 15, so both stay non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackedSlot(u32);

impl PackedSlot {
    pub const MAX: u32 = (1 << (BITS_PER_AXIS * 2)) - 1;

    pub fn new(index: usize) -> Result<Self, SlotOverflow> {
        match u32::try_from(index) {
            Ok(value) if value <= Self::MAX => Ok(Self(value)),
            _ => Err(SlotOverflow {
                index,
                max: Self::MAX,
            }),
        }
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn to_frames(self) -> (i16, i16) {
        let x = (self.0 & AXIS_MASK) as i16;
        let y = ((self.0 >> BITS_PER_AXIS) & AXIS_MASK) as i16;
        (x, y)
    }

    pub fn from_frames(frame_x: i16, frame_y: i16) -> Option<Self> {
        if frame_x < 0 || frame_y < 0 {
            return None;
        }
        Some(Self((frame_x as u32) | ((frame_y as u32) << BITS_PER_AXIS)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_survive_frame_packing() {
        for index in [0usize, 1, 0x7FFF, 0x8000, 123_456, PackedSlot::MAX as usize] {
            let slot = PackedSlot::new(index).expect("slot");
            let (x, y) = slot.to_frames();
            assert!(x >= 0 && y >= 0);
            assert_eq!(PackedSlot::from_frames(x, y), Some(slot));
        }
    }

    #[test]
    fn oversized_index_is_rejected() {
        let error = PackedSlot::new(PackedSlot::MAX as usize + 1).expect_err("overflow");
        assert_eq!(error.max, PackedSlot::MAX);
    }

    #[test]
    fn unset_frames_are_not_slots() {
        assert_eq!(PackedSlot::from_frames(-1, -1), None);
    }
}
