pub mod aggregator;
pub mod analyzer;
pub mod config;
pub mod db;
pub mod error;
pub mod merger;
pub mod model;
pub mod poller;
pub mod service;
pub mod source;

pub use aggregator::{aggregate, intervals};
pub use analyzer::{analyze, analyze_until, Thresholds};
pub use crate::config::UptimeConfig;
pub use db::DbHeartbeatSource;
pub use error::{HeartbeatParseError, Result, SourceError, UptimeError};
pub use merger::{is_online, latest_per_device, merge};
pub use model::{
    parse_batch, parse_timestamp, ConnectionState, DeviceReport, Heartbeat, RawHeartbeat,
    StatusInterval, StatusMap, StatusPoint, UptimeStats,
};
pub use poller::{PollOutcome, PollStats, PollerState, StatusPoller};
pub use service::UptimeService;
pub use source::{HeartbeatQuery, HeartbeatSource, MemoryHeartbeatSource};
