use crate::config::UptimeConfig;
use crate::error::{Result, UptimeError};
use crate::merger::{is_online, latest_per_device, merge};
use crate::model::{parse_batch, StatusMap};
use crate::source::{HeartbeatQuery, HeartbeatSource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// 轮询器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PollerState {
    /// 未启动
    Idle,
    /// 定时轮询中
    Polling,
    /// 已暂停（观察者不可见）
    Paused,
    /// 已停止（终态）
    Stopped,
}

impl PollerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollerState::Idle => "Idle",
            PollerState::Polling => "Polling",
            PollerState::Paused => "Paused",
            PollerState::Stopped => "Stopped",
        }
    }
}

/// 单次轮询结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// 结果已合并
    Merged { devices: usize },
    /// 拉取失败，保留原状态
    Failed,
    /// 会话已停止，结果被丢弃
    Discarded,
}

/// 轮询统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollStats {
    pub fetches: u64,
    pub failures: u64,
    pub merges: u64,
}

/// 定时器任务句柄
struct TimerHandle {
    shutdown_tx: watch::Sender<bool>,
    join_handle: JoinHandle<()>,
}

impl TimerHandle {
    fn cancel(self) {
        let _ = self.shutdown_tx.send(true);
        self.join_handle.abort();
    }
}

struct Control {
    state: PollerState,
    device_ids: Vec<String>,
    timer: Option<TimerHandle>,
}

struct PollerInner {
    session_id: String,
    source: Arc<dyn HeartbeatSource>,
    window: chrono::Duration,
    interval: Duration,
    offline_threshold: chrono::Duration,
    control: Mutex<Control>,
    status_tx: watch::Sender<Arc<StatusMap>>,
    fetches: AtomicU64,
    failures: AtomicU64,
    merges: AtomicU64,
}

impl PollerInner {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 拉取一次并单调合并
    async fn poll_once(&self) -> PollOutcome {
        let device_ids = {
            let control = self.control();
            if control.state == PollerState::Stopped {
                return PollOutcome::Discarded;
            }
            control.device_ids.clone()
        };

        let query = HeartbeatQuery::new(device_ids, Utc::now() - self.window);
        self.fetches.fetch_add(1, Ordering::Relaxed);

        let raws = match self.source.fetch(&query).await {
            Ok(raws) => raws,
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    session_id = %self.session_id,
                    error = %e,
                    "Heartbeat fetch failed, keeping last known status"
                );
                return PollOutcome::Failed;
            }
        };

        let heartbeats = parse_batch(raws);
        let incoming = latest_per_device(&heartbeats);

        // 持有控制锁完成合并，保证 stop() 之后不会再写入
        let control = self.control();
        if control.state == PollerState::Stopped {
            debug!(session_id = %self.session_id, "Dropping poll result after stop");
            return PollOutcome::Discarded;
        }

        self.status_tx.send_if_modified(|current| {
            let merged = merge(&**current, &incoming);
            if merged == **current {
                false
            } else {
                *current = Arc::new(merged);
                true
            }
        });
        self.merges.fetch_add(1, Ordering::Relaxed);
        drop(control);

        debug!(
            session_id = %self.session_id,
            heartbeats = heartbeats.len(),
            devices = incoming.len(),
            "Poll result merged"
        );

        PollOutcome::Merged {
            devices: incoming.len(),
        }
    }

    fn spawn_timer(self: &Arc<Self>) -> TimerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let inner = self.clone();

        let join_handle = tokio::spawn(async move {
            // 第一次 tick 立即完成，即进入轮询时立即拉取一次
            let mut ticker = interval(inner.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // 拉取放到独立任务中，暂停只取消定时器，不取消进行中的拉取
                        let inner = inner.clone();
                        tokio::spawn(async move {
                            inner.poll_once().await;
                        });
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        TimerHandle {
            shutdown_tx,
            join_handle,
        }
    }

    /// 进入 Polling 状态：先取消旧定时器，保证每个会话最多一个定时器
    fn enter_polling(self: &Arc<Self>, control: &mut Control) {
        if let Some(timer) = control.timer.take() {
            timer.cancel();
        }
        control.timer = Some(self.spawn_timer());
        control.state = PollerState::Polling;
    }
}

/// 设备在线状态轮询会话
///
/// 每个观察会话持有一个独立的实例：一个定时器、一份被跟踪的设备集合、一份状态表。
/// 状态表只会通过 `merge(current, incoming)` 整体替换，读者总能看到完整的快照。
pub struct StatusPoller {
    inner: Arc<PollerInner>,
}

impl StatusPoller {
    /// 创建轮询会话
    ///
    /// # 参数
    /// * `source` - 心跳数据源
    /// * `device_ids` - 跟踪的设备（为空表示所有设备）
    /// * `window` - 每次拉取的回看窗口，同时决定轮询间隔
    /// * `config` - 引擎配置
    pub fn new(
        source: Arc<dyn HeartbeatSource>,
        device_ids: Vec<String>,
        window: chrono::Duration,
        config: &UptimeConfig,
    ) -> Self {
        let (status_tx, _) = watch::channel(Arc::new(StatusMap::new()));

        Self {
            inner: Arc::new(PollerInner {
                session_id: format!("poll_{}", uuid::Uuid::new_v4().simple()),
                source,
                window,
                interval: config.poll_interval_for(window),
                offline_threshold: config.offline_threshold(),
                control: Mutex::new(Control {
                    state: PollerState::Idle,
                    device_ids,
                    timer: None,
                }),
                status_tx,
                fetches: AtomicU64::new(0),
                failures: AtomicU64::new(0),
                merges: AtomicU64::new(0),
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn state(&self) -> PollerState {
        self.inner.control().state
    }

    /// 当前轮询间隔
    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// 启动轮询：立即拉取一次，然后按间隔定时拉取
    ///
    /// # Panics
    /// 定时器通过 `tokio::spawn` 启动，必须在 Tokio 运行时内调用，否则会 panic。
    pub fn start(&self) -> Result<()> {
        let mut control = self.inner.control();
        match control.state {
            PollerState::Idle => {
                self.inner.enter_polling(&mut control);
                info!(
                    session_id = %self.inner.session_id,
                    devices = control.device_ids.len(),
                    interval = ?self.inner.interval,
                    "Status poller started"
                );
                Ok(())
            }
            state => Err(invalid(state, "start")),
        }
    }

    /// 暂停轮询（观察者不可见）
    ///
    /// 只取消定时器；进行中的拉取仍会完成并被合并。
    pub fn pause(&self) -> Result<()> {
        let mut control = self.inner.control();
        match control.state {
            PollerState::Polling => {
                if let Some(timer) = control.timer.take() {
                    timer.cancel();
                }
                control.state = PollerState::Paused;
                info!(session_id = %self.inner.session_id, "Status poller paused");
                Ok(())
            }
            PollerState::Paused => Ok(()),
            state => Err(invalid(state, "pause")),
        }
    }

    /// 恢复轮询：立即拉取一次，然后恢复定时拉取
    ///
    /// # Panics
    /// 定时器通过 `tokio::spawn` 启动，必须在 Tokio 运行时内调用，否则会 panic。
    pub fn resume(&self) -> Result<()> {
        let mut control = self.inner.control();
        match control.state {
            PollerState::Paused => {
                self.inner.enter_polling(&mut control);
                info!(session_id = %self.inner.session_id, "Status poller resumed");
                Ok(())
            }
            PollerState::Polling => Ok(()),
            state => Err(invalid(state, "resume")),
        }
    }

    /// 手动刷新一次
    ///
    /// 可能与定时拉取重叠，结果由单调合并处理。
    pub async fn refresh(&self) -> Result<PollOutcome> {
        match self.state() {
            PollerState::Polling | PollerState::Paused => Ok(self.inner.poll_once().await),
            state => Err(invalid(state, "refresh")),
        }
    }

    /// 停止会话：取消定时器，释放设备集合并丢弃状态表
    pub fn stop(&self) {
        let mut control = self.inner.control();
        if control.state == PollerState::Stopped {
            return;
        }

        if let Some(timer) = control.timer.take() {
            timer.cancel();
        }
        control.state = PollerState::Stopped;
        control.device_ids = Vec::new();
        self.inner.status_tx.send_replace(Arc::new(StatusMap::new()));

        info!(session_id = %self.inner.session_id, "Status poller stopped");
    }

    /// 当前状态表快照
    pub fn snapshot(&self) -> Arc<StatusMap> {
        self.inner.status_tx.borrow().clone()
    }

    /// 订阅状态表变化
    pub fn subscribe(&self) -> watch::Receiver<Arc<StatusMap>> {
        self.inner.status_tx.subscribe()
    }

    /// 设备在 `now` 时是否在线
    pub fn is_online(&self, device_id: &str, now: DateTime<Utc>) -> bool {
        is_online(&self.snapshot(), device_id, now, self.inner.offline_threshold)
    }

    pub fn stats(&self) -> PollStats {
        PollStats {
            fetches: self.inner.fetches.load(Ordering::Relaxed),
            failures: self.inner.failures.load(Ordering::Relaxed),
            merges: self.inner.merges.load(Ordering::Relaxed),
        }
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        if let Some(timer) = self.inner.control().timer.take() {
            timer.cancel();
        }
    }
}

fn invalid(state: PollerState, event: &'static str) -> UptimeError {
    UptimeError::InvalidTransition {
        state: state.as_str(),
        event,
    }
}
