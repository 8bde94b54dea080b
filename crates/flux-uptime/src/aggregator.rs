use crate::model::{StatusInterval, StatusPoint, UptimeStats};
use chrono::{DateTime, Duration, Utc};

/// 将状态转换点展开为连续区间
///
/// 每个点开启一个与其状态相同的区间，直到下一个点为止。
/// 最后一个点如果是离线点，区间延续到 `now`（正在离线）；在线点之后没有任何证据，不计入。
/// 区间被裁剪到 `[window_start, now]`，第一个心跳之前的时间永远不计入。
/// 相邻的同状态区间会被合并。
pub fn intervals(
    points: &[StatusPoint],
    window_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Vec<StatusInterval> {
    let mut result: Vec<StatusInterval> = Vec::new();

    for (i, point) in points.iter().enumerate() {
        let end = match points.get(i + 1) {
            Some(next) => next.timestamp,
            None if !point.online => now,
            None => continue,
        };

        let start = point.timestamp.max(window_start);
        let end = end.min(now);
        if end <= start {
            continue;
        }

        match result.last_mut() {
            Some(prev) if prev.online == point.online && prev.end == start => prev.end = end,
            _ => result.push(StatusInterval {
                start,
                end,
                online: point.online,
            }),
        }
    }

    result
}

/// 计算在线率统计
///
/// 只累加分析器已经判定好的区间，不重新推导间隔。
/// 断线次数只统计裁剪到窗口后仍然存在的离线区间。
/// 没有任何数据时在线率为 100。
pub fn aggregate(points: &[StatusPoint], window_start: DateTime<Utc>, now: DateTime<Utc>) -> UptimeStats {
    let (online, offline, disconnection_count) = intervals(points, window_start, now).iter().fold(
        (Duration::zero(), Duration::zero(), 0u64),
        |(online, offline, count), interval| {
            if interval.online {
                (online + interval.duration(), offline, count)
            } else {
                (online, offline + interval.duration(), count + 1)
            }
        },
    );

    let online_ms = online.num_milliseconds() as f64;
    let total_ms = online_ms + offline.num_milliseconds() as f64;
    let uptime_percent = if total_ms > 0.0 {
        online_ms / total_ms * 100.0
    } else {
        100.0
    };

    UptimeStats {
        uptime_percent,
        online_seconds: online.num_seconds().max(0) as u64,
        offline_seconds: offline.num_seconds().max(0) as u64,
        disconnection_count,
    }
}
