//! 规则快照热重载
//!
//! 后台任务订阅规则存储的修订号通道，收到变更通知后刷新引擎快照；
//! 同时按固定间隔做一次比对同步，兜底丢失的通知。
//! 重载失败时引擎保留旧快照，任务继续运行。

use crate::engine::RuleEngine;
use journey_shared::config::RuleEngineConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// 快照重载任务
pub struct ReloadWorker {
    engine: Arc<RuleEngine>,
    revisions: watch::Receiver<u64>,
    resync_interval: Duration,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ReloadWorker {
    pub fn new(
        engine: Arc<RuleEngine>,
        revisions: watch::Receiver<u64>,
        resync_interval: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            engine,
            revisions,
            resync_interval,
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn from_config(
        engine: Arc<RuleEngine>,
        revisions: watch::Receiver<u64>,
        config: &RuleEngineConfig,
    ) -> Self {
        let interval = Duration::from_secs(config.reload_interval_seconds.max(1));
        Self::new(engine, revisions, interval)
    }

    /// 启动后台任务
    pub fn spawn(self) -> ReloadHandle {
        let Self {
            engine,
            mut revisions,
            resync_interval,
            shutdown_tx,
            mut shutdown_rx,
        } = self;

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(resync_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // interval 的第一次 tick 立即完成
            ticker.tick().await;

            info!(interval_secs = resync_interval.as_secs(), "规则快照重载任务已启动");

            loop {
                tokio::select! {
                    changed = revisions.changed() => {
                        if changed.is_err() {
                            info!("规则存储已关闭，重载任务退出");
                            break;
                        }
                        let revision = *revisions.borrow_and_update();
                        debug!(revision, "收到规则变更通知");
                        if let Err(e) = engine.reload_if_stale() {
                            error!(revision, error = %e, "规则快照重载失败，保留当前快照");
                        }
                    }
                    _ = ticker.tick() => {
                        match engine.reload_if_stale() {
                            Ok(true) => info!("定期同步发现规则变更，快照已刷新"),
                            Ok(false) => {}
                            Err(e) => error!(error = %e, "定期同步重载失败，保留当前快照"),
                        }
                    }
                    // 句柄被丢弃同样视为停止
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("规则快照重载任务已停止");
                            break;
                        }
                    }
                }
            }
        });

        ReloadHandle { shutdown_tx, join }
    }
}

/// 重载任务句柄
pub struct ReloadHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ReloadHandle {
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// 通知任务退出并等待其结束
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.join.await {
            error!(error = %e, "重载任务异常退出");
        }
    }
}
