//! 주기 작업 스케줄러.
//!
//! [`Market`](crate::Market)은 생성 시 [`Scheduler`]를 주입받아 조정 작업과
//! 일일 차트 재생성 작업을 등록합니다. 기본 구현 [`TokioScheduler`]는 작업마다
//! 태스크 하나를 띄우고, 공유 [`CancellationToken`]으로 모두 중지합니다.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 중지 시 작업 태스크 종료 대기 시간.
const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// 등록 가능한 작업.
pub type Job = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// 클로저를 [`Job`]으로 감쌉니다.
pub fn job<F, Fut>(f: F) -> Job
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move || -> BoxFuture<'static, ()> { Box::pin(f()) })
}

/// 실행 일정.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// 고정 간격 (첫 실행은 한 간격 뒤)
    Every(Duration),
    /// 매일 UTC 시각
    DailyAt(NaiveTime),
    /// 즉시 한 번
    Once,
}

#[async_trait]
pub trait Scheduler: Send + Sync {
    /// 작업을 등록하고 바로 일정에 따라 실행을 시작합니다.
    fn register(&self, name: &str, schedule: Schedule, job: Job);

    /// 모든 작업을 중지합니다. 진행 중인 실행은 중단됩니다.
    async fn shutdown(&self);
}

/// tokio 태스크 기반 스케줄러.
pub struct TokioScheduler {
    cancel: CancellationToken,
    tasks: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// 작업 태스크가 공유하는 취소 토큰.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn job_count(&self) -> usize {
        self.tasks.lock().len()
    }
}

#[async_trait]
impl Scheduler for TokioScheduler {
    fn register(&self, name: &str, schedule: Schedule, job: Job) {
        if self.cancel.is_cancelled() {
            warn!(job = name, "Scheduler already shut down, job not registered");
            return;
        }

        let cancel = self.cancel.child_token();
        let job_name = name.to_string();
        let handle = tokio::spawn(run_job(job_name.clone(), schedule, job, cancel));

        info!(job = name, schedule = ?schedule, "Job registered");
        self.tasks.lock().push((job_name, handle));
    }

    async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());

        for (name, handle) in tasks {
            if tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, handle)
                .await
                .is_err()
            {
                warn!(job = %name, "Job did not stop in time");
            }
        }
        info!("Scheduler stopped");
    }
}

async fn run_job(name: String, schedule: Schedule, job: Job, cancel: CancellationToken) {
    match schedule {
        Schedule::Once => {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = job() => debug!(job = %name, "One-shot job finished"),
            }
        }
        Schedule::Every(period) => {
            let period = period.max(Duration::from_millis(1));
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = job() => {}
                        }
                    }
                }
            }
        }
        Schedule::DailyAt(at) => loop {
            let now = Utc::now();
            let next = next_daily_run(now, at);
            let wait = (next - now).to_std().unwrap_or_default();
            debug!(job = %name, next = %next, "Next daily run scheduled");

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = job() => {}
                    }
                }
            }
        },
    }
    debug!(job = %name, "Job task exited");
}

/// `now` 이후 처음 오는 UTC `at` 시각. `now`와 같으면 다음 날.
pub fn next_daily_run(now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(at).and_utc();
    if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_job(counter: Arc<AtomicUsize>) -> Job {
        job(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
    }

    #[test]
    fn test_next_daily_run() {
        let at = NaiveTime::from_hms_opt(0, 5, 0).unwrap();

        let before = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            next_daily_run(before, at),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap()
        );

        let after = Utc.with_ymd_and_hms(2024, 12, 31, 12, 0, 0).unwrap();
        assert_eq!(
            next_daily_run(after, at),
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 5, 0).unwrap()
        );

        let exact = Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap();
        assert_eq!(
            next_daily_run(exact, at),
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 5, 0).unwrap()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_runs_on_interval() {
        let scheduler = TokioScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler.register(
            "reconcile",
            Schedule::Every(Duration::from_secs(5)),
            counting_job(counter.clone()),
        );

        tokio::time::sleep(Duration::from_millis(16_000)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        scheduler.shutdown().await;
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_once_runs_immediately() {
        let scheduler = TokioScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler.register("initial", Schedule::Once, counting_job(counter.clone()));

        for _ in 0..50 {
            if counter.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_register_after_shutdown_is_ignored() {
        let scheduler = TokioScheduler::new();
        scheduler.shutdown().await;

        let counter = Arc::new(AtomicUsize::new(0));
        scheduler.register("late", Schedule::Once, counting_job(counter.clone()));
        assert_eq!(scheduler.job_count(), 0);
    }
}
