use crate::error::HeartbeatParseError;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// 设备 ID -> 最后已知心跳时间
pub type StatusMap = HashMap<String, DateTime<Utc>>;

/// 设备心跳（已校验）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// 设备 ID
    pub device_id: String,

    /// 心跳时间
    pub timestamp: DateTime<Utc>,
}

impl Heartbeat {
    pub fn new(device_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            device_id: device_id.into(),
            timestamp,
        }
    }
}

/// 数据源返回的原始心跳记录
///
/// 字段可能缺失或格式错误，需要经过 [`Heartbeat::try_from`] 校验后才能进入分析流程。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawHeartbeat {
    pub device_id: Option<String>,
    pub timestamp: Option<String>,
}

impl RawHeartbeat {
    pub fn new(device_id: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            device_id: Some(device_id.into()),
            timestamp: Some(timestamp.into()),
        }
    }
}

impl From<&Heartbeat> for RawHeartbeat {
    fn from(heartbeat: &Heartbeat) -> Self {
        Self {
            device_id: Some(heartbeat.device_id.clone()),
            timestamp: Some(heartbeat.timestamp.to_rfc3339()),
        }
    }
}

impl TryFrom<RawHeartbeat> for Heartbeat {
    type Error = HeartbeatParseError;

    fn try_from(raw: RawHeartbeat) -> Result<Self, Self::Error> {
        let device_id = raw
            .device_id
            .filter(|id| !id.trim().is_empty())
            .ok_or(HeartbeatParseError::MissingDeviceId)?;
        let timestamp = raw.timestamp.ok_or(HeartbeatParseError::MissingTimestamp)?;

        Ok(Self {
            device_id,
            timestamp: parse_timestamp(&timestamp)?,
        })
    }
}

/// 解析心跳时间
///
/// 支持 RFC 3339，以及不带时区的 `YYYY-MM-DD HH:MM:SS[.fff]`（按 UTC 处理，SQLite 的默认文本格式）。
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, HeartbeatParseError> {
    let s = s.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }

    Err(HeartbeatParseError::InvalidTimestamp(s.to_string()))
}

/// 批量校验原始心跳
///
/// 单条记录解析失败只丢弃该条记录，不影响同批次其余数据。
pub fn parse_batch(raws: impl IntoIterator<Item = RawHeartbeat>) -> Vec<Heartbeat> {
    raws.into_iter()
        .filter_map(|raw| {
            let device_id = raw.device_id.clone();
            match Heartbeat::try_from(raw) {
                Ok(heartbeat) => Some(heartbeat),
                Err(e) => {
                    warn!(
                        device_id = ?device_id,
                        error = %e,
                        "Discarding malformed heartbeat"
                    );
                    None
                }
            }
        })
        .collect()
}

/// 状态时间线上的一个转换点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPoint {
    /// 转换时间（心跳到达时间，或判定离线的时间）
    pub timestamp: DateTime<Utc>,

    /// 该时刻起是否在线
    pub online: bool,

    /// 距上一次心跳的秒数（向下取整，仅用于展示）
    pub gap_seconds: u64,
}

impl StatusPoint {
    pub fn online(timestamp: DateTime<Utc>, gap_seconds: u64) -> Self {
        Self {
            timestamp,
            online: true,
            gap_seconds,
        }
    }

    pub fn offline(timestamp: DateTime<Utc>, gap_seconds: u64) -> Self {
        Self {
            timestamp,
            online: false,
            gap_seconds,
        }
    }
}

/// 时间线上一段连续的在线/离线区间
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub online: bool,
}

impl StatusInterval {
    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }
}

/// 在线率统计
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UptimeStats {
    /// 在线率（0-100）
    pub uptime_percent: f64,

    /// 在线秒数
    pub online_seconds: u64,

    /// 离线秒数
    pub offline_seconds: u64,

    /// 断线次数
    pub disconnection_count: u64,
}

impl Default for UptimeStats {
    fn default() -> Self {
        Self {
            uptime_percent: 100.0,
            online_seconds: 0,
            offline_seconds: 0,
            disconnection_count: 0,
        }
    }
}

/// 面向用户的设备连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// 从未收到过心跳
    NeverConnected,
    /// 所选时间范围内无数据，但存在历史心跳
    NoDataInWindow { last_seen: DateTime<Utc> },
    /// 当前离线
    Offline {
        last_seen: DateTime<Utc>,
        offline_for_seconds: u64,
    },
    /// 在线
    Online { last_seen: DateTime<Utc> },
}

impl ConnectionState {
    /// 推导连接状态
    ///
    /// # 参数
    /// * `last_in_window` - 所选窗口内最后一次心跳
    /// * `last_ever` - 不限时间范围的最后一次心跳
    /// * `now` - 当前时间
    /// * `offline_threshold` - 离线阈值
    pub fn derive(
        last_in_window: Option<DateTime<Utc>>,
        last_ever: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        offline_threshold: chrono::Duration,
    ) -> Self {
        match (last_in_window, last_ever) {
            (Some(in_window), ever) => {
                let last_seen = ever.map_or(in_window, |ever| ever.max(in_window));
                let elapsed = now - last_seen;
                if elapsed <= offline_threshold {
                    ConnectionState::Online { last_seen }
                } else {
                    ConnectionState::Offline {
                        last_seen,
                        offline_for_seconds: elapsed.num_seconds().max(0) as u64,
                    }
                }
            }
            (None, Some(last_seen)) => ConnectionState::NoDataInWindow { last_seen },
            (None, None) => ConnectionState::NeverConnected,
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, ConnectionState::Online { .. })
    }

    pub fn as_str(&self) -> &str {
        match self {
            ConnectionState::NeverConnected => "NeverConnected",
            ConnectionState::NoDataInWindow { .. } => "NoDataInWindow",
            ConnectionState::Offline { .. } => "Offline",
            ConnectionState::Online { .. } => "Online",
        }
    }
}

/// 单个设备在某个时间窗口内的状态报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceReport {
    pub device_id: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub points: Vec<StatusPoint>,
    pub stats: UptimeStats,
    pub state: ConnectionState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_parse_rfc3339() {
        let raw = RawHeartbeat::new("dev_001", "2024-05-01T12:00:00+08:00");
        let heartbeat = Heartbeat::try_from(raw).unwrap();
        assert_eq!(heartbeat.device_id, "dev_001");
        assert_eq!(
            heartbeat.timestamp,
            Utc.with_ymd_and_hms(2024, 5, 1, 4, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_sqlite_format() {
        let ts = parse_timestamp("2024-05-01 04:00:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 5, 1, 4, 0, 0).unwrap());

        let ts = parse_timestamp("2024-05-01 04:00:00.250").unwrap();
        assert_eq!(ts.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn test_parse_errors() {
        let missing_id = RawHeartbeat {
            device_id: None,
            timestamp: Some("2024-05-01T00:00:00Z".to_string()),
        };
        assert_eq!(
            Heartbeat::try_from(missing_id),
            Err(HeartbeatParseError::MissingDeviceId)
        );

        let blank_id = RawHeartbeat::new("  ", "2024-05-01T00:00:00Z");
        assert_eq!(
            Heartbeat::try_from(blank_id),
            Err(HeartbeatParseError::MissingDeviceId)
        );

        let missing_ts = RawHeartbeat {
            device_id: Some("dev_001".to_string()),
            timestamp: None,
        };
        assert_eq!(
            Heartbeat::try_from(missing_ts),
            Err(HeartbeatParseError::MissingTimestamp)
        );

        let bad_ts = RawHeartbeat::new("dev_001", "yesterday");
        assert!(matches!(
            Heartbeat::try_from(bad_ts),
            Err(HeartbeatParseError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_parse_batch_skips_malformed() {
        let raws = vec![
            RawHeartbeat::new("dev_001", "2024-05-01T00:00:00Z"),
            RawHeartbeat::new("dev_001", "not-a-time"),
            RawHeartbeat::default(),
            RawHeartbeat::new("dev_002", "2024-05-01T00:00:30Z"),
        ];

        let parsed = parse_batch(raws);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].device_id, "dev_001");
        assert_eq!(parsed[1].device_id, "dev_002");
    }

    #[test]
    fn test_connection_state_derive() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let threshold = Duration::seconds(120);

        assert_eq!(
            ConnectionState::derive(None, None, now, threshold),
            ConnectionState::NeverConnected
        );

        let long_ago = now - Duration::days(3);
        assert_eq!(
            ConnectionState::derive(None, Some(long_ago), now, threshold),
            ConnectionState::NoDataInWindow { last_seen: long_ago }
        );

        let recent = now - Duration::seconds(30);
        let state = ConnectionState::derive(Some(recent), Some(recent), now, threshold);
        assert!(state.is_online());

        let ten_minutes_ago = now - Duration::minutes(10);
        assert_eq!(
            ConnectionState::derive(Some(ten_minutes_ago), None, now, threshold),
            ConnectionState::Offline {
                last_seen: ten_minutes_ago,
                offline_for_seconds: 600,
            }
        );
    }

    #[test]
    fn test_connection_state_json() {
        let last_seen = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let json = serde_json::to_value(ConnectionState::Online { last_seen }).unwrap();
        assert_eq!(json["state"], "online");

        let json = serde_json::to_value(ConnectionState::NeverConnected).unwrap();
        assert_eq!(json, serde_json::json!({ "state": "never_connected" }));
    }

    #[test]
    fn test_default_stats_report_fully_up() {
        let stats = UptimeStats::default();
        assert_eq!(stats.uptime_percent, 100.0);
        assert_eq!(stats.disconnection_count, 0);
    }
}
