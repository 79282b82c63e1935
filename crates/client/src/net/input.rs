use bitflags::bitflags;
use glam::Vec2;

bitflags! {
    /// Direction keys held this frame, as reported by the host.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MoveIntent: u8 {
        const UP = 1 << 0;
        const DOWN = 1 << 1;
        const LEFT = 1 << 2;
        const RIGHT = 1 << 3;
    }
}

impl MoveIntent {
    /// Screen-space movement axis, +y pointing down. Opposite keys
    /// cancel; diagonals are not normalized.
    pub fn axis(self) -> Vec2 {
        let mut axis = Vec2::ZERO;
        if self.contains(MoveIntent::UP) {
            axis.y -= 1.0;
        }
        if self.contains(MoveIntent::DOWN) {
            axis.y += 1.0;
        }
        if self.contains(MoveIntent::LEFT) {
            axis.x -= 1.0;
        }
        if self.contains(MoveIntent::RIGHT) {
            axis.x += 1.0;
        }
        axis
    }
}
