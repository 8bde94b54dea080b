use thiserror::Error;

/// 在线状态引擎错误类型
#[derive(Error, Debug)]
pub enum UptimeError {
    /// 心跳数据源错误
    #[error("Heartbeat source error: {0}")]
    Source(#[from] SourceError),

    /// 配置错误
    #[error("Config error: {0}")]
    ConfigError(String),

    /// 轮询器状态转换无效
    #[error("Invalid poller transition: {event} while {state}")]
    InvalidTransition {
        state: &'static str,
        event: &'static str,
    },

    /// 其他错误
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// 结果类型
pub type Result<T> = std::result::Result<T, UptimeError>;

impl UptimeError {
    /// 创建配置错误
    pub fn config(msg: impl Into<String>) -> Self {
        UptimeError::ConfigError(msg.into())
    }
}

impl From<config::ConfigError> for UptimeError {
    fn from(e: config::ConfigError) -> Self {
        UptimeError::ConfigError(e.to_string())
    }
}

/// 心跳数据源错误
///
/// 与"窗口内没有心跳"严格区分：空结果是 `Ok(vec![])`，不是错误。
#[derive(Error, Debug)]
pub enum SourceError {
    /// 数据源不可达
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    /// 数据库错误
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::DbErr),
}

impl SourceError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        SourceError::Unavailable(msg.into())
    }
}

/// 单条心跳记录解析错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatParseError {
    #[error("Heartbeat is missing device id")]
    MissingDeviceId,

    #[error("Heartbeat is missing timestamp")]
    MissingTimestamp,

    #[error("Invalid heartbeat timestamp: {0}")]
    InvalidTimestamp(String),
}
