/// flux-uptime 使用示例
///
/// 演示心跳分析、在线率统计和实时轮询会话

use chrono::{Duration, Utc};
use flux_uptime::{Heartbeat, MemoryHeartbeatSource, UptimeConfig, UptimeService};
use std::sync::Arc;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== FLUX IOT 设备在线状态示例 ===\n");

    // 1. 加载配置（文件不存在时使用默认值）
    let config = UptimeConfig::load("config/uptime.toml")?;

    // 2. 准备心跳数据：每 30 秒一次，中间断开约 5 分钟
    let source = Arc::new(MemoryHeartbeatSource::new());
    let now = Utc::now();
    let start = now - Duration::minutes(20);
    for offset in (0..=600).step_by(30).chain((900..=1200).step_by(30)) {
        source
            .record(&Heartbeat::new("dev_sensor_01", start + Duration::seconds(offset)))
            .await;
    }
    source
        .record(&Heartbeat::new("dev_camera_01", now - Duration::minutes(10)))
        .await;

    let service = UptimeService::new(source.clone(), config);
    println!(
        "✓ 配置: 离线阈值 {}s, 最短断线 {}s",
        service.config().offline_threshold,
        service.config().min_disconnection
    );
    println!("✓ 已写入 {} 条心跳\n", source.len().await);

    // 3. 单设备报告
    println!("--- 设备报告 ---");
    for device_id in ["dev_sensor_01", "dev_camera_01", "dev_gateway_01"] {
        let report = service.device_report(device_id, start, now).await?;
        println!(
            "{}: {:?}, 在线率 {:.1}%, 断线 {} 次, 在线 {}s / 离线 {}s",
            device_id,
            report.state,
            report.stats.uptime_percent,
            report.stats.disconnection_count,
            report.stats.online_seconds,
            report.stats.offline_seconds,
        );
    }

    let report = service.device_report("dev_sensor_01", start, now).await?;
    println!("\n{}", serde_json::to_string_pretty(&report.stats)?);

    // 4. 实时轮询会话
    println!("\n--- 实时轮询 ---");
    let poller = service.poller(
        vec!["dev_sensor_01".to_string(), "dev_camera_01".to_string()],
        Duration::minutes(30),
    );
    poller.start()?;
    println!("会话 {}, 轮询间隔 {:?}", poller.session_id(), poller.interval());
    sleep(std::time::Duration::from_millis(200)).await;

    for (device_id, last_seen) in poller.snapshot().iter() {
        println!(
            "{}: 最后心跳 {}, 在线: {}",
            device_id,
            last_seen,
            poller.is_online(device_id, Utc::now())
        );
    }

    // 观察者不可见时暂停，新心跳在恢复后被立即拉取
    poller.pause()?;
    source
        .record(&Heartbeat::new("dev_camera_01", Utc::now()))
        .await;
    poller.resume()?;
    sleep(std::time::Duration::from_millis(200)).await;
    println!(
        "dev_camera_01 恢复后在线: {}",
        poller.is_online("dev_camera_01", Utc::now())
    );

    poller.stop();
    println!("\n✓ 轮询统计: {:?}", poller.stats());

    Ok(())
}
