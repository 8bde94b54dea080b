pub mod entity;
pub mod source;

pub use entity::device_heartbeat;
pub use source::DbHeartbeatSource;
