// src/scheduler.rs
//
// One timer per job name; registering a name again aborts the old timer.
// Each name also owns a lock held for a whole run, timer-fired or manual.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Days, FixedOffset, NaiveTime, TimeZone, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
pub struct JobScheduler {
    timers: StdMutex<HashMap<String, JoinHandle<()>>>,
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl JobScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(name.to_string()).or_default())
    }

    fn install(&self, name: &str, timer: JoinHandle<()>) {
        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = timers.insert(name.to_string(), timer) {
            previous.abort();
            debug!(job = name, "replaced existing timer");
        }
    }

    pub async fn run_exclusive<T, Fut>(&self, name: &str, job: Fut) -> T
    where
        Fut: Future<Output = T>,
    {
        let lock = self.lock_for(name);
        let _running = lock.lock().await;
        job.await
    }

    /// Fire `job` every `period`, starting immediately. Missed ticks are skipped.
    pub fn every<F, Fut>(&self, name: &str, period: Duration, job: F)
    where
        F: Fn(DateTime<Utc>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let lock = self.lock_for(name);
        let job_name = name.to_string();
        let timer = tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                fire(&job_name, &lock, job(Utc::now())).await;
            }
        });
        self.install(name, timer);
        info!(job = name, period_secs = period.as_secs(), "periodic job scheduled");
    }

    /// Fire `job` once a day when the wall clock at `offset` reads `at`.
    pub fn daily_at<F, Fut>(&self, name: &str, at: NaiveTime, offset: FixedOffset, job: F)
    where
        F: Fn(DateTime<Utc>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.daily_at_with_clock(name, at, offset, Utc::now, job);
    }

    fn daily_at_with_clock<C, F, Fut>(
        &self,
        name: &str,
        at: NaiveTime,
        offset: FixedOffset,
        clock: C,
        job: F,
    ) where
        C: Fn() -> DateTime<Utc> + Send + 'static,
        F: Fn(DateTime<Utc>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let lock = self.lock_for(name);
        let job_name = name.to_string();
        let timer = tokio::spawn(async move {
            loop {
                let now = clock();
                let next = next_daily_occurrence(now, at, offset);
                let wait = (next - now).to_std().unwrap_or_default();
                debug!(job = %job_name, next = %next, "waiting for next daily run");
                time::sleep(wait).await;
                fire(&job_name, &lock, job(next)).await;
            }
        });
        self.install(name, timer);
        info!(job = name, at = %at, offset = %offset, "daily job scheduled");
    }

    pub fn cancel(&self, name: &str) -> bool {
        let removed = self.timers.lock().unwrap_or_else(|e| e.into_inner()).remove(name);
        match removed {
            Some(timer) => {
                timer.abort();
                true
            }
            None => false,
        }
    }

    pub fn scheduled_jobs(&self) -> Vec<String> {
        let timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = timers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn shutdown(&self) {
        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        for (name, timer) in timers.drain() {
            timer.abort();
            debug!(job = %name, "timer cancelled");
        }
    }
}

// A run gets its own task so aborting the timer never cuts it short.
async fn fire<Fut>(name: &str, lock: &Arc<Mutex<()>>, run: Fut)
where
    Fut: Future<Output = ()> + Send + 'static,
{
    let lock = Arc::clone(lock);
    let handle = tokio::spawn(async move {
        let _running = lock.lock().await;
        run.await;
    });
    if let Err(e) = handle.await {
        warn!(job = name, error = %e, "job task ended abnormally");
    }
}

/// First instant strictly after `now` at which the clock at `offset` shows `at`.
pub fn next_daily_occurrence(now: DateTime<Utc>, at: NaiveTime, offset: FixedOffset) -> DateTime<Utc> {
    let local_today = now.with_timezone(&offset).date_naive();
    let mut day = local_today;
    loop {
        let candidate = offset
            .from_local_datetime(&day.and_time(at))
            .single()
            .map(|dt| dt.with_timezone(&Utc));
        if let Some(candidate) = candidate.filter(|c| *c > now) {
            return candidate;
        }
        day = match day.checked_add_days(Days::new(1)) {
            Some(next) => next,
            None => return now,
        };
    }
}
