use crate::model::StatusPoint;
use chrono::{DateTime, Duration, Utc};

/// 离线判定阈值
///
/// `offline_threshold` 决定多久没有心跳视为不可达，
/// `min_disconnection` 过滤掉短于该时长的离线（网络抖动），不计入断线次数。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub offline_threshold: Duration,
    pub min_disconnection: Duration,
}

impl Thresholds {
    pub fn new(offline_threshold: Duration, min_disconnection: Duration) -> Self {
        Self {
            offline_threshold,
            min_disconnection,
        }
    }

    /// 计算 `prev` 与 `next` 之间的离线起点
    ///
    /// 间隔严格大于离线阈值，且离线时长不短于最短断线时长时返回 `Some`。
    pub fn offline_start(&self, prev: DateTime<Utc>, next: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if next - prev <= self.offline_threshold {
            return None;
        }

        let offline_start = prev + self.offline_threshold;
        if next - offline_start >= self.min_disconnection {
            Some(offline_start)
        } else {
            None
        }
    }
}

/// 分析单个设备的心跳序列，生成状态转换点
///
/// 输入顺序任意；空输入返回空结果。
pub fn analyze(heartbeats: &[DateTime<Utc>], thresholds: &Thresholds) -> Vec<StatusPoint> {
    analyze_inner(heartbeats, thresholds, None)
}

/// 实时分析：在 [`analyze`] 的基础上，按同样规则判断最后一次心跳到 `now` 之间是否正在离线
pub fn analyze_until(
    heartbeats: &[DateTime<Utc>],
    thresholds: &Thresholds,
    now: DateTime<Utc>,
) -> Vec<StatusPoint> {
    analyze_inner(heartbeats, thresholds, Some(now))
}

fn analyze_inner(
    heartbeats: &[DateTime<Utc>],
    thresholds: &Thresholds,
    now: Option<DateTime<Utc>>,
) -> Vec<StatusPoint> {
    let mut sorted = heartbeats.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let (first, last) = match (sorted.first(), sorted.last()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => return Vec::new(),
    };

    let mut points = Vec::with_capacity(sorted.len() + 1);
    points.push(StatusPoint::online(first, 0));

    for pair in sorted.windows(2) {
        let (prev, curr) = (pair[0], pair[1]);
        let gap_seconds = whole_seconds(curr - prev);

        if let Some(offline_start) = thresholds.offline_start(prev, curr) {
            points.push(StatusPoint::offline(offline_start, gap_seconds));
        }
        points.push(StatusPoint::online(curr, gap_seconds));
    }

    if let Some(now) = now {
        if let Some(offline_start) = thresholds.offline_start(last, now) {
            points.push(StatusPoint::offline(offline_start, whole_seconds(now - last)));
        }
    }

    points
}

fn whole_seconds(d: Duration) -> u64 {
    d.num_seconds().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn thresholds() -> Thresholds {
        Thresholds::new(Duration::seconds(120), Duration::seconds(30))
    }

    fn offline_points(points: &[StatusPoint]) -> Vec<StatusPoint> {
        points.iter().filter(|p| !p.online).copied().collect()
    }

    #[test]
    fn test_empty_input() {
        assert!(analyze(&[], &thresholds()).is_empty());
        assert!(analyze_until(&[], &thresholds(), at(1000)).is_empty());
    }

    #[test]
    fn test_continuous_heartbeats() {
        let heartbeats: Vec<_> = (0..=20).map(|i| at(i * 30)).collect();
        let points = analyze(&heartbeats, &thresholds());

        assert_eq!(points.len(), 21);
        assert!(offline_points(&points).is_empty());
        assert_eq!(points[0].gap_seconds, 0);
        assert_eq!(points[1].gap_seconds, 30);
    }

    #[test]
    fn test_one_real_outage() {
        let heartbeats = vec![at(0), at(30), at(60), at(400)];
        let points = analyze(&heartbeats, &thresholds());

        let offline = offline_points(&points);
        assert_eq!(offline.len(), 1);
        assert_eq!(offline[0].timestamp, at(180));
        assert_eq!(offline[0].gap_seconds, 340);

        // 离线点之后紧跟心跳恢复点
        assert_eq!(points.last().unwrap(), &StatusPoint::online(at(400), 340));
    }

    #[test]
    fn test_unsorted_input_is_sorted() {
        let heartbeats = vec![at(400), at(0), at(60), at(30)];
        let points = analyze(&heartbeats, &thresholds());

        let timestamps: Vec<_> = points.iter().map(|p| p.timestamp).collect();
        assert_eq!(timestamps, vec![at(0), at(30), at(60), at(180), at(400)]);
    }

    #[test]
    fn test_threshold_boundary() {
        // 恰好等于阈值不算离线
        let points = analyze(&[at(0), at(120)], &thresholds());
        assert!(offline_points(&points).is_empty());

        // 超出阈值（且离线时长足够）则离线
        let no_filter = Thresholds::new(Duration::seconds(120), Duration::zero());
        let points = analyze(&[at(0), at(0) + Duration::milliseconds(120_001)], &no_filter);
        assert_eq!(offline_points(&points).len(), 1);
    }

    #[test]
    fn test_brief_blip_filtered() {
        // 离线起点为上一次心跳 + 阈值（30 + 120 = 150），与 test_one_real_outage 的 60 + 120 = 180 一致。
        // 间隔 130 秒超过阈值，但离线时长只有 160 - 150 = 10 秒，低于最短断线时长
        let points = analyze(&[at(0), at(30), at(160)], &thresholds());
        assert!(offline_points(&points).is_empty());

        // 间隔 160 秒，离线时长 190 - 150 = 40 秒
        let points = analyze(&[at(0), at(30), at(190)], &thresholds());
        let offline = offline_points(&points);
        assert_eq!(offline.len(), 1);
        assert_eq!(offline[0].timestamp, at(150));

        // 间隔 115 秒，未超过阈值
        let points = analyze(&[at(0), at(30), at(145)], &thresholds());
        assert!(offline_points(&points).is_empty());
    }

    #[test]
    fn test_ongoing_outage() {
        let now = at(600);
        let points = analyze_until(&[at(0)], &thresholds(), now);

        assert_eq!(points.len(), 2);
        assert_eq!(points[1], StatusPoint::offline(at(120), 600));
    }

    #[test]
    fn test_no_ongoing_outage_within_threshold() {
        let points = analyze_until(&[at(0), at(30)], &thresholds(), at(140));
        assert!(offline_points(&points).is_empty());

        // 超过阈值但离线时长不足
        let points = analyze_until(&[at(0)], &thresholds(), at(140));
        assert!(offline_points(&points).is_empty());
    }

    #[test]
    fn test_duplicate_heartbeats_collapsed() {
        let points = analyze(&[at(0), at(30), at(30), at(60)], &thresholds());
        assert_eq!(points.len(), 3);
    }
}
