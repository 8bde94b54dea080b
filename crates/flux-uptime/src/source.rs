use crate::error::SourceError;
use crate::model::{parse_timestamp, Heartbeat, RawHeartbeat};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

/// 心跳查询条件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatQuery {
    /// 设备 ID 列表（为空表示所有设备）
    pub device_ids: Vec<String>,

    /// 窗口起点（包含）
    pub window_start: DateTime<Utc>,

    /// 窗口终点（包含），`None` 表示不设上界
    pub window_end: Option<DateTime<Utc>>,
}

impl HeartbeatQuery {
    pub fn new(device_ids: Vec<String>, window_start: DateTime<Utc>) -> Self {
        Self {
            device_ids,
            window_start,
            window_end: None,
        }
    }

    pub fn for_device(device_id: impl Into<String>, window_start: DateTime<Utc>) -> Self {
        Self::new(vec![device_id.into()], window_start)
    }

    pub fn until(mut self, window_end: DateTime<Utc>) -> Self {
        self.window_end = Some(window_end);
        self
    }

    /// 判断某个设备与时间是否落在查询范围内
    pub fn matches(&self, device_id: &str, timestamp: DateTime<Utc>) -> bool {
        let device_ok = self.device_ids.is_empty() || self.device_ids.iter().any(|id| id == device_id);
        let end_ok = self.window_end.map_or(true, |end| timestamp <= end);
        device_ok && timestamp >= self.window_start && end_ok
    }
}

/// 心跳数据源
///
/// 实现方只需保证返回所有时间不早于 `window_start` 的心跳，不要求有序。
/// 数据源故障必须以 `Err` 返回，与"窗口内没有心跳"的空结果区分开。
#[async_trait]
pub trait HeartbeatSource: Send + Sync {
    /// 查询窗口内的心跳
    async fn fetch(&self, query: &HeartbeatQuery) -> Result<Vec<RawHeartbeat>, SourceError>;

    /// 不限时间范围查询设备最后一次心跳
    async fn latest(&self, device_id: &str) -> Result<Option<RawHeartbeat>, SourceError>;
}

/// 内存心跳数据源
#[derive(Default)]
pub struct MemoryHeartbeatSource {
    records: RwLock<Vec<RawHeartbeat>>,
}

impl MemoryHeartbeatSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次心跳
    pub async fn record(&self, heartbeat: &Heartbeat) {
        self.records.write().await.push(RawHeartbeat::from(heartbeat));
    }

    /// 写入原始记录（可能是格式错误的数据）
    pub async fn record_raw(&self, raw: RawHeartbeat) {
        self.records.write().await.push(raw);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl HeartbeatSource for MemoryHeartbeatSource {
    async fn fetch(&self, query: &HeartbeatQuery) -> Result<Vec<RawHeartbeat>, SourceError> {
        let records = self.records.read().await;

        // 时间无法解析的记录原样返回，由调用方决定丢弃
        let matched = records
            .iter()
            .filter(|raw| {
                match (raw.device_id.as_deref(), raw.timestamp.as_deref().map(parse_timestamp)) {
                    (Some(id), Some(Ok(ts))) => query.matches(id, ts),
                    _ => true,
                }
            })
            .cloned()
            .collect();

        Ok(matched)
    }

    async fn latest(&self, device_id: &str) -> Result<Option<RawHeartbeat>, SourceError> {
        let records = self.records.read().await;

        let latest = records
            .iter()
            .filter(|raw| raw.device_id.as_deref() == Some(device_id))
            .filter_map(|raw| {
                let ts = parse_timestamp(raw.timestamp.as_deref()?).ok()?;
                Some((ts, raw))
            })
            .max_by_key(|(ts, _)| *ts)
            .map(|(_, raw)| raw.clone());

        Ok(latest)
    }
}
