use std::time::Duration;

use trellis::DEFAULT_MAX_PAYLOAD;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub tick_rate: u32,
    pub max_payload: u32,
    /// How long a departed peer's sync state survives before it is dropped.
    pub disconnect_grace: Duration,
    pub spawn_demo_scene: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            max_payload: DEFAULT_MAX_PAYLOAD,
            disconnect_grace: Duration::from_secs(5),
            spawn_demo_scene: true,
        }
    }
}
