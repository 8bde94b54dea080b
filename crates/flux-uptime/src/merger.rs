use crate::model::{Heartbeat, StatusMap};
use chrono::{DateTime, Duration, Utc};

/// 单调合并两次观测结果
///
/// `incoming` 中的设备只有在 `current` 中不存在、或新时间不早于已知时间时才会被采用；
/// `incoming` 中缺失的设备保持不变。合并满足幂等与交换律，
/// 因此重叠的轮询结果无论以何种顺序到达，最终状态都一致。
pub fn merge(current: &StatusMap, incoming: &StatusMap) -> StatusMap {
    let mut merged = current.clone();

    for (device_id, &incoming_ts) in incoming {
        match merged.get(device_id) {
            Some(&known) if incoming_ts < known => {}
            _ => {
                merged.insert(device_id.clone(), incoming_ts);
            }
        }
    }

    merged
}

/// 将一批心跳折叠为每个设备的最新心跳时间
pub fn latest_per_device<'a>(heartbeats: impl IntoIterator<Item = &'a Heartbeat>) -> StatusMap {
    let mut latest = StatusMap::new();

    for heartbeat in heartbeats {
        latest
            .entry(heartbeat.device_id.clone())
            .and_modify(|ts: &mut DateTime<Utc>| {
                if heartbeat.timestamp > *ts {
                    *ts = heartbeat.timestamp;
                }
            })
            .or_insert(heartbeat.timestamp);
    }

    latest
}

/// 判断设备当前是否在线
///
/// 未知设备视为不在线。
pub fn is_online(
    status: &StatusMap,
    device_id: &str,
    now: DateTime<Utc>,
    offline_threshold: Duration,
) -> bool {
    status
        .get(device_id)
        .map_or(false, |&last| now - last <= offline_threshold)
}
