//! 预占回收 Worker
//!
//! 以固定间隔运行，与请求流量无关：
//! 1. 预占超时的券 RESERVED → ISSUED（清空预占信息，库存不变）
//! 2. 活动已结束的 ISSUED / RESERVED 券 → EXPIRED
//! 3. 清理过期的幂等记录
//!
//! 每一步都分批执行并使用 `FOR UPDATE SKIP LOCKED`，多实例部署时不会重复处理。
//! 单轮执行时间受 `max_run` 限制，剩余数据留到下一轮。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{error, info};

use loyalty_shared::config::ReaperConfig;
use loyalty_shared::observability::metrics;

use crate::clock::Clock;
use crate::error::Result;
use crate::repository::{CouponRepositoryTrait, IdempotencyRepositoryTrait};

const WORKER_NAME: &str = "reservation_reaper";

/// 单轮回收结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub released: u64,
    pub expired: u64,
    pub purged: u64,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.released == 0 && self.expired == 0 && self.purged == 0
    }
}

pub struct ReservationReaper {
    coupons: Arc<dyn CouponRepositoryTrait>,
    idempotency: Arc<dyn IdempotencyRepositoryTrait>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    /// 每批处理的最大记录数
    batch_size: i64,
    /// 单轮最长执行时间
    max_run: Duration,
}

impl ReservationReaper {
    pub fn new(
        coupons: Arc<dyn CouponRepositoryTrait>,
        idempotency: Arc<dyn IdempotencyRepositoryTrait>,
        clock: Arc<dyn Clock>,
        config: &ReaperConfig,
    ) -> Self {
        Self {
            coupons,
            idempotency,
            clock,
            poll_interval: Duration::from_secs(config.interval_seconds.max(1)),
            batch_size: config.batch_size.max(1),
            max_run: Duration::from_secs(config.max_run_seconds.max(1)),
        }
    }

    /// 主循环：直到收到停止信号
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval = ?self.poll_interval,
            batch_size = self.batch_size,
            max_run = ?self.max_run,
            "预占回收 Worker 已启动"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.run_once().await;

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("预占回收 Worker 已停止");
    }

    /// 执行一轮回收，错误只记录日志，下一轮重试
    pub async fn run_once(&self) -> SweepReport {
        let deadline = Instant::now() + self.max_run;
        let mut report = SweepReport::default();

        match self.release_stale(deadline).await {
            Ok(count) => report.released = count,
            Err(e) => error!(error = %e, "回退超时预占出错"),
        }

        match self.expire_elapsed(deadline).await {
            Ok(count) => report.expired = count,
            Err(e) => error!(error = %e, "处理过期活动的券出错"),
        }

        match self.purge_idempotency(deadline).await {
            Ok(count) => report.purged = count,
            Err(e) => error!(error = %e, "清理过期幂等记录出错"),
        }

        metrics::set_worker_last_run(WORKER_NAME);

        if !report.is_empty() {
            info!(
                released = report.released,
                expired = report.expired,
                purged = report.purged,
                "预占回收完成"
            );
        }
        report
    }

    async fn release_stale(&self, deadline: Instant) -> Result<u64> {
        let mut total = 0u64;
        loop {
            let ids = self
                .coupons
                .release_stale_reservations(self.clock.now(), self.batch_size)
                .await?;
            let count = ids.len() as u64;
            total += count;
            metrics::record_reaper_sweep("release", count);

            if !self.has_more(count, deadline) {
                return Ok(total);
            }
        }
    }

    async fn expire_elapsed(&self, deadline: Instant) -> Result<u64> {
        let mut total = 0u64;
        loop {
            let ids = self
                .coupons
                .expire_elapsed(self.clock.now(), self.batch_size)
                .await?;
            let count = ids.len() as u64;
            total += count;
            metrics::record_reaper_sweep("expire", count);

            if !self.has_more(count, deadline) {
                return Ok(total);
            }
        }
    }

    async fn purge_idempotency(&self, deadline: Instant) -> Result<u64> {
        let mut total = 0u64;
        loop {
            let count = self
                .idempotency
                .purge_expired(self.clock.now(), self.batch_size)
                .await?;
            total += count;
            metrics::record_reaper_sweep("purge", count);

            if !self.has_more(count, deadline) {
                return Ok(total);
            }
        }
    }

    /// 满批且未超时才继续下一批
    fn has_more(&self, count: u64, deadline: Instant) -> bool {
        count >= self.batch_size as u64 && Instant::now() < deadline
    }
}
