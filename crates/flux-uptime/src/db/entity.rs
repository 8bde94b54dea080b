/// 设备心跳实体
///
/// `timestamp` 以文本保存，写入时统一为毫秒精度的 UTC RFC 3339 格式，
/// 因此可以直接按字符串比较做范围查询。
pub mod device_heartbeat {
    use sea_orm::entity::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "device_heartbeats")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub device_id: String,
        pub timestamp: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

use crate::model::RawHeartbeat;

impl From<device_heartbeat::Model> for RawHeartbeat {
    fn from(model: device_heartbeat::Model) -> Self {
        Self {
            device_id: Some(model.device_id),
            timestamp: Some(model.timestamp),
        }
    }
}
