use crate::aggregator::aggregate;
use crate::analyzer::analyze_until;
use crate::config::UptimeConfig;
use crate::error::Result;
use crate::model::{parse_batch, ConnectionState, DeviceReport, Heartbeat};
use crate::poller::StatusPoller;
use crate::source::{HeartbeatQuery, HeartbeatSource};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

/// 在线状态服务
///
/// 统一入口：单设备状态报告、连接状态查询，以及创建实时轮询会话。
pub struct UptimeService {
    source: Arc<dyn HeartbeatSource>,
    config: UptimeConfig,
}

impl UptimeService {
    pub fn new(source: Arc<dyn HeartbeatSource>, config: UptimeConfig) -> Self {
        Self { source, config }
    }

    pub fn config(&self) -> &UptimeConfig {
        &self.config
    }

    /// 生成单个设备在 `[window_start, now]` 内的状态报告
    ///
    /// 数据源故障以错误返回；窗口内没有心跳不是错误，
    /// 此时通过不限时间范围的查询区分"从未连接"和"窗口内无数据"。
    pub async fn device_report(
        &self,
        device_id: &str,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<DeviceReport> {
        let query = HeartbeatQuery::for_device(device_id, window_start).until(now);
        let raws = self.source.fetch(&query).await?;

        let timestamps: Vec<_> = parse_batch(raws)
            .into_iter()
            .filter(|h| h.device_id == device_id)
            .map(|h| h.timestamp)
            .collect();

        let points = analyze_until(&timestamps, &self.config.thresholds(), now);
        let stats = aggregate(&points, window_start, now);

        let last_in_window = timestamps.iter().max().copied();
        let last_ever = match last_in_window {
            Some(_) => None,
            None => self.last_seen(device_id).await?,
        };
        let state = ConnectionState::derive(
            last_in_window,
            last_ever,
            now,
            self.config.offline_threshold(),
        );

        debug!(
            device_id = %device_id,
            heartbeats = timestamps.len(),
            disconnections = stats.disconnection_count,
            uptime_percent = stats.uptime_percent,
            state = state.as_str(),
            "Device report computed"
        );

        Ok(DeviceReport {
            device_id: device_id.to_string(),
            window_start,
            window_end: now,
            points,
            stats,
            state,
        })
    }

    /// 只根据最后一次心跳判断连接状态
    pub async fn connection_state(&self, device_id: &str, now: DateTime<Utc>) -> Result<ConnectionState> {
        let last_seen = self.last_seen(device_id).await?;
        Ok(ConnectionState::derive(
            last_seen,
            last_seen,
            now,
            self.config.offline_threshold(),
        ))
    }

    /// 创建实时轮询会话
    pub fn poller(&self, device_ids: Vec<String>, window: chrono::Duration) -> StatusPoller {
        StatusPoller::new(self.source.clone(), device_ids, window, &self.config)
    }

    async fn last_seen(&self, device_id: &str) -> Result<Option<DateTime<Utc>>> {
        let latest = self.source.latest(device_id).await?;
        Ok(latest
            .and_then(|raw| Heartbeat::try_from(raw).ok())
            .map(|h| h.timestamp))
    }
}
