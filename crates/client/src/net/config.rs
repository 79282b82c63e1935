use glam::Vec2;

/// Movement and correction tunables for the local player.
#[derive(Debug, Clone)]
pub struct PredictionConfig {
    /// Movement speed in world units per second.
    pub speed: f32,
    /// Playfield extent; predicted positions clamp to `[0, bounds]`.
    pub bounds: Vec2,
    /// When false the supervisor never reconciles and the local player
    /// moves purely client-side.
    pub correction: bool,
    /// Fraction of the divergence pulled per reconcile below the snap
    /// threshold.
    pub blend_factor: f32,
    /// Divergence beyond which reconcile snaps instead of blending.
    pub snap_threshold: f32,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            speed: 200.0,
            bounds: Vec2::new(800.0, 600.0),
            correction: true,
            blend_factor: 0.1,
            snap_threshold: 15.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect_timeout_secs: f32,
    pub liveness_timeout_secs: f32,
    pub heartbeat_interval_secs: f32,
    /// Cadence of outbound position reports once spawned.
    pub position_interval_secs: f32,
    /// Total datagram registration sends before the channel is assumed
    /// registered.
    pub registration_attempts: u32,
    pub registration_interval_secs: f32,
    pub prediction: PredictionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10.0,
            liveness_timeout_secs: 15.0,
            heartbeat_interval_secs: 5.0,
            position_interval_secs: 0.1,
            registration_attempts: 5,
            registration_interval_secs: 0.5,
            prediction: PredictionConfig::default(),
        }
    }
}
