use crate::analyzer::Thresholds;
use crate::error::{Result, UptimeError};
use config::{Config, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 默认心跳间隔（秒）
pub const DEFAULT_HEARTBEAT_INTERVAL: u64 = 30;

/// 时长类配置的上限（秒），约 10 年
pub const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 3600;

/// 在线状态引擎配置
///
/// 所有时间单位均为秒。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct UptimeConfig {
    /// 设备预期心跳间隔
    pub heartbeat_interval: u64,

    /// 离线阈值（超过此时间未收到心跳则认为离线），默认约为心跳间隔的 4 倍
    pub offline_threshold: u64,

    /// 最短断线时长（短于此时长的离线视为抖动），默认约为一个心跳间隔
    pub min_disconnection: u64,

    /// 短窗口轮询间隔
    pub poll_interval_short: u64,

    /// 长窗口轮询间隔
    pub poll_interval_long: u64,

    /// 短/长窗口分界
    pub window_cutoff: u64,
}

impl Default for UptimeConfig {
    fn default() -> Self {
        Self::from_heartbeat_interval(DEFAULT_HEARTBEAT_INTERVAL)
    }
}

impl UptimeConfig {
    /// 根据设备心跳间隔推导默认配置
    pub fn from_heartbeat_interval(heartbeat_interval: u64) -> Self {
        Self {
            heartbeat_interval,
            offline_threshold: heartbeat_interval.saturating_mul(4),
            min_disconnection: heartbeat_interval,
            poll_interval_short: 15,
            poll_interval_long: 30,
            window_cutoff: 3600,
        }
    }

    /// 从 TOML 文件加载配置
    ///
    /// 文件不存在时返回默认配置；文件中未出现的字段使用默认值。
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let config = Config::builder()
            .add_source(File::new(
                path.to_str()
                    .ok_or_else(|| UptimeError::config("Invalid config path"))?,
                FileFormat::Toml,
            ))
            .build()?;

        let loaded: Self = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval == 0 {
            return Err(UptimeError::config("heartbeat_interval must be greater than 0"));
        }

        for (name, value) in [
            ("heartbeat_interval", self.heartbeat_interval),
            ("offline_threshold", self.offline_threshold),
            ("min_disconnection", self.min_disconnection),
            ("poll_interval_short", self.poll_interval_short),
            ("poll_interval_long", self.poll_interval_long),
            ("window_cutoff", self.window_cutoff),
        ] {
            if value > MAX_DURATION_SECS {
                return Err(UptimeError::config(format!(
                    "{} ({}) cannot exceed {} seconds",
                    name, value, MAX_DURATION_SECS
                )));
            }
        }

        if self.offline_threshold < self.heartbeat_interval {
            return Err(UptimeError::config(format!(
                "offline_threshold ({}) cannot be less than heartbeat_interval ({})",
                self.offline_threshold, self.heartbeat_interval
            )));
        }

        if self.min_disconnection > self.offline_threshold {
            return Err(UptimeError::config(format!(
                "min_disconnection ({}) cannot be greater than offline_threshold ({})",
                self.min_disconnection, self.offline_threshold
            )));
        }

        if self.poll_interval_short == 0 || self.poll_interval_long == 0 {
            return Err(UptimeError::config("poll intervals must be greater than 0"));
        }

        if self.poll_interval_short > self.poll_interval_long {
            return Err(UptimeError::config(format!(
                "poll_interval_short ({}) cannot be greater than poll_interval_long ({})",
                self.poll_interval_short, self.poll_interval_long
            )));
        }

        Ok(())
    }

    /// 分析阈值
    pub fn thresholds(&self) -> Thresholds {
        Thresholds::new(
            seconds(self.offline_threshold),
            seconds(self.min_disconnection),
        )
    }

    pub fn offline_threshold(&self) -> chrono::Duration {
        seconds(self.offline_threshold)
    }

    /// 根据分析窗口长度选择轮询间隔
    ///
    /// 短于分界的窗口使用短间隔，以保证短窗口视图的响应性。
    pub fn poll_interval_for(&self, window: chrono::Duration) -> Duration {
        if window < seconds(self.window_cutoff) {
            Duration::from_secs(self.poll_interval_short)
        } else {
            Duration::from_secs(self.poll_interval_long)
        }
    }
}

/// 秒数转换为 chrono 时长，超出上限的值按上限处理
fn seconds(value: u64) -> chrono::Duration {
    chrono::Duration::seconds(value.min(MAX_DURATION_SECS) as i64)
}
