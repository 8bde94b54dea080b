use super::device_heartbeat;
use crate::error::SourceError;
use crate::model::{parse_timestamp, Heartbeat, RawHeartbeat};
use crate::source::{HeartbeatQuery, HeartbeatSource};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::{ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use std::sync::Arc;
use tracing::debug;

/// `format_timestamp` 输出格式的 LIKE 模式
///
/// 只有这种格式的记录可以直接在 SQL 中按字符串比较时间；
/// 其他格式（外部写入的无时区时间、带偏移的时间）取出后解析再过滤。
const CANONICAL_PATTERN: &str = "____-__-__T__:__:__.___Z";

/// 基于数据库的心跳数据源
pub struct DbHeartbeatSource {
    db: Arc<DatabaseConnection>,
}

impl DbHeartbeatSource {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// 写入一次心跳
    pub async fn record(&self, heartbeat: &Heartbeat) -> Result<(), SourceError> {
        let model = device_heartbeat::ActiveModel {
            id: NotSet,
            device_id: Set(heartbeat.device_id.clone()),
            timestamp: Set(format_timestamp(heartbeat.timestamp)),
        };

        device_heartbeat::Entity::insert(model)
            .exec(&*self.db)
            .await?;

        debug!(device_id = %heartbeat.device_id, "Heartbeat stored");
        Ok(())
    }
}

/// 数据库中的统一时间格式
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[async_trait]
impl HeartbeatSource for DbHeartbeatSource {
    async fn fetch(&self, query: &HeartbeatQuery) -> Result<Vec<RawHeartbeat>, SourceError> {
        let mut in_range = Condition::all()
            .add(device_heartbeat::Column::Timestamp.like(CANONICAL_PATTERN))
            .add(device_heartbeat::Column::Timestamp.gte(format_timestamp(query.window_start)));
        if let Some(end) = query.window_end {
            in_range = in_range.add(device_heartbeat::Column::Timestamp.lte(format_timestamp(end)));
        }

        let mut select = device_heartbeat::Entity::find().filter(
            Condition::any()
                .add(in_range)
                .add(device_heartbeat::Column::Timestamp.not_like(CANONICAL_PATTERN)),
        );
        if !query.device_ids.is_empty() {
            select = select.filter(device_heartbeat::Column::DeviceId.is_in(query.device_ids.clone()));
        }

        let models = select
            .order_by_asc(device_heartbeat::Column::Timestamp)
            .all(&*self.db)
            .await?;
        let rows = models.len();

        // 时间无法解析的记录原样返回，由调用方决定丢弃
        let matched: Vec<RawHeartbeat> = models
            .into_iter()
            .filter(|m| match parse_timestamp(&m.timestamp) {
                Ok(ts) => query.matches(&m.device_id, ts),
                Err(_) => true,
            })
            .map(RawHeartbeat::from)
            .collect();

        debug!(
            devices = query.device_ids.len(),
            rows,
            matched = matched.len(),
            "Heartbeats fetched from database"
        );

        Ok(matched)
    }

    async fn latest(&self, device_id: &str) -> Result<Option<RawHeartbeat>, SourceError> {
        let canonical = device_heartbeat::Entity::find()
            .filter(device_heartbeat::Column::DeviceId.eq(device_id))
            .filter(device_heartbeat::Column::Timestamp.like(CANONICAL_PATTERN))
            .order_by_desc(device_heartbeat::Column::Timestamp)
            .one(&*self.db)
            .await?;

        let others = device_heartbeat::Entity::find()
            .filter(device_heartbeat::Column::DeviceId.eq(device_id))
            .filter(device_heartbeat::Column::Timestamp.not_like(CANONICAL_PATTERN))
            .all(&*self.db)
            .await?;

        Ok(canonical
            .into_iter()
            .chain(others)
            .filter_map(|m| {
                let ts = parse_timestamp(&m.timestamp).ok()?;
                Some((ts, m))
            })
            .max_by_key(|(ts, _)| *ts)
            .map(|(_, m)| RawHeartbeat::from(m)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use sea_orm::{ConnectionTrait, Database, Statement};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    async fn create_test_source() -> DbHeartbeatSource {
        let db = Database::connect("sqlite::memory:").await.unwrap();

        db.execute(Statement::from_string(
            db.get_database_backend(),
            r#"
            CREATE TABLE IF NOT EXISTS device_heartbeats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                device_id TEXT NOT NULL,
                timestamp TEXT NOT NULL
            )
            "#
            .to_string(),
        ))
        .await
        .unwrap();

        DbHeartbeatSource::new(Arc::new(db))
    }

    /// 绕过 `record` 直接写入任意格式的时间
    async fn insert_raw(source: &DbHeartbeatSource, device_id: &str, timestamp: &str) {
        let model = device_heartbeat::ActiveModel {
            id: NotSet,
            device_id: Set(device_id.to_string()),
            timestamp: Set(timestamp.to_string()),
        };
        device_heartbeat::Entity::insert(model)
            .exec(&*source.db)
            .await
            .unwrap();
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(at(90)), "2024-05-01T00:01:30.000Z");
    }

    #[tokio::test]
    async fn test_fetch_window() {
        let source = create_test_source().await;
        for secs in [0, 30, 60, 90] {
            source.record(&Heartbeat::new("dev_a", at(secs))).await.unwrap();
        }
        source.record(&Heartbeat::new("dev_b", at(40))).await.unwrap();

        let query = HeartbeatQuery::for_device("dev_a", at(30)).until(at(60));
        let rows = source.fetch(&query).await.unwrap();
        assert_eq!(rows.len(), 2);

        let all = source
            .fetch(&HeartbeatQuery::new(vec![], at(0)))
            .await
            .unwrap();
        assert_eq!(all.len(), 5);
    }

    #[tokio::test]
    async fn test_fetch_empty_is_ok() {
        let source = create_test_source().await;
        let rows = source
            .fetch(&HeartbeatQuery::for_device("dev_a", at(0)))
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_latest_skips_malformed() {
        let source = create_test_source().await;
        source.record(&Heartbeat::new("dev_a", at(30))).await.unwrap();
        source.record(&Heartbeat::new("dev_a", at(90))).await.unwrap();

        insert_raw(&source, "dev_a", "garbage").await;

        let latest = source.latest("dev_a").await.unwrap().unwrap();
        assert_eq!(Heartbeat::try_from(latest).unwrap().timestamp, at(90));

        assert!(source.latest("dev_unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_externally_written_timestamps() {
        let source = create_test_source().await;
        for secs in [0, 30, 60, 90] {
            source.record(&Heartbeat::new("dev_a", at(secs))).await.unwrap();
        }
        // 无时区时间按 UTC 处理，即 at(120)
        insert_raw(&source, "dev_a", "2024-05-01 00:02:00").await;
        // 带偏移的时间，即 at(45)
        insert_raw(&source, "dev_a", "2024-05-01T08:00:45+08:00").await;

        let query = HeartbeatQuery::for_device("dev_a", at(30)).until(at(60));
        let mut timestamps: Vec<_> = source
            .fetch(&query)
            .await
            .unwrap()
            .into_iter()
            .map(|raw| Heartbeat::try_from(raw).unwrap().timestamp)
            .collect();
        timestamps.sort();
        assert_eq!(timestamps, vec![at(30), at(45), at(60)]);

        let rows = source
            .fetch(&HeartbeatQuery::for_device("dev_a", at(100)))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);

        let latest = source.latest("dev_a").await.unwrap().unwrap();
        assert_eq!(Heartbeat::try_from(latest).unwrap().timestamp, at(120));
    }
}
