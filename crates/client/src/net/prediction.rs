use glam::Vec2;

use super::config::PredictionConfig;

/// Noise floor below which predicted and server positions count as
/// identical.
const DEADBAND: f32 = 0.001;

/// A discrete adjustment applied by `reconcile`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correction {
    pub previous: Vec2,
    pub corrected: Vec2,
    pub snapped: bool,
}

/// Client-side movement for the local player, corrected against the
/// server's authoritative position. Everything is gated on the first
/// authoritative position: until it arrives there is nothing sensible
/// to move or render.
pub struct LocalPrediction {
    config: PredictionConfig,
    predicted: Vec2,
    server: Vec2,
    spawned: bool,
}

impl LocalPrediction {
    pub fn new(config: PredictionConfig) -> Self {
        Self {
            config,
            predicted: Vec2::ZERO,
            server: Vec2::ZERO,
            spawned: false,
        }
    }

    /// Records an authoritative position. The first one snaps the
    /// prediction onto it and opens the gate.
    pub fn apply_server_position(&mut self, position: Vec2) {
        if !self.spawned {
            self.predicted = position;
            self.spawned = true;
        }
        self.server = position;
    }

    /// Integrates one frame of movement intent. No-op until spawned.
    pub fn tick(&mut self, dt: f32, axis: Vec2) {
        if !self.spawned {
            return;
        }
        let next = self.predicted + axis * self.config.speed * dt;
        self.predicted = next.clamp(Vec2::ZERO, self.config.bounds);
    }

    /// Pulls the prediction toward the authoritative position: small
    /// divergence blends by the configured fraction, large divergence
    /// snaps. Callable whether or not the supervisor's correction flag
    /// is on; the flag only decides if it gets called.
    pub fn reconcile(&mut self) -> Option<Correction> {
        if !self.spawned {
            return None;
        }
        let divergence = self.predicted.distance(self.server);
        if divergence <= DEADBAND {
            return None;
        }
        let previous = self.predicted;
        let snapped = divergence > self.config.snap_threshold;
        self.predicted = if snapped {
            self.server
        } else {
            self.predicted.lerp(self.server, self.config.blend_factor)
        };
        Some(Correction {
            previous,
            corrected: self.predicted,
            snapped,
        })
    }

    pub fn predicted(&self) -> Vec2 {
        self.predicted
    }

    pub fn server_position(&self) -> Vec2 {
        self.server
    }

    /// True once the first authoritative position arrived; the host
    /// should not render the local player before this.
    pub fn is_spawned(&self) -> bool {
        self.spawned
    }

    pub fn reset(&mut self) {
        self.predicted = Vec2::ZERO;
        self.server = Vec2::ZERO;
        self.spawned = false;
    }
}
