// src/schedule.rs
//! Job scheduling: a pure due-time computation plus a ticker-driven
//! executor. The poll loop wakes every `poll_secs`, fires due jobs onto
//! a bounded worker pool, and recomputes each job's next due time from
//! its fire time. A job name never has two executions in flight.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use metrics::{counter, gauge};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::model::{JobDefinition, Trigger, TriggerSource};
use crate::pipeline::{Pipeline, RunOutcome};
use crate::store::Store;

/// When a trigger next fires. Pure: wall clock comes in as `now`.
///
/// Cron triggers fire at the next occurrence of their HH:MM in `tz`,
/// strictly after `now`. Interval triggers fire `interval` after the
/// previous run, or immediately when the job has never run.
pub fn next_run_at(
    trigger: Trigger,
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    tz: FixedOffset,
) -> DateTime<Utc> {
    match trigger {
        Trigger::DailyAt { hour, minute } => {
            let local_now = now.with_timezone(&tz);
            let today = local_now.date_naive();
            let candidate = today
                .and_hms_opt(hour, minute, 0)
                .and_then(|naive| tz.from_local_datetime(&naive).single())
                .unwrap_or(local_now);
            let next_local = if candidate > local_now {
                candidate
            } else {
                candidate + chrono::Duration::days(1)
            };
            next_local.with_timezone(&Utc)
        }
        Trigger::Every { minutes } => match last_run {
            Some(prev) => prev + chrono::Duration::minutes(minutes as i64),
            None => now,
        },
    }
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct BatchOutcome {
    pub success: usize,
    pub failed: usize,
    pub total_records: usize,
}

/// Job definition plus the scheduler's advisory bookkeeping, for the
/// admin surface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct JobRow {
    #[serde(flatten)]
    pub job: JobDefinition,
    pub running: bool,
}

#[derive(Debug, Clone)]
pub struct SchedulerCfg {
    pub poll_secs: u64,
    pub worker_slots: usize,
    pub tz: FixedOffset,
}

pub struct Scheduler {
    store: Arc<Store>,
    pipeline: Arc<Pipeline>,
    cfg: SchedulerCfg,
    paused: AtomicBool,
    shutting_down: AtomicBool,
    /// Job names currently executing. Guarded on its own, never held
    /// together with the cache lock.
    running: Mutex<HashSet<String>>,
    /// Next due time per job, recomputed after each fire; an entry is
    /// dropped on toggle/retime so the next tick rebuilds it.
    next_due: Mutex<HashMap<String, DateTime<Utc>>>,
    workers: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(store: Arc<Store>, pipeline: Arc<Pipeline>, mut cfg: SchedulerCfg) -> Arc<Self> {
        // tokio::time::interval panics on a zero period.
        cfg.poll_secs = cfg.poll_secs.max(1);
        let workers = Arc::new(Semaphore::new(cfg.worker_slots.max(1)));
        Arc::new(Self {
            store,
            pipeline,
            cfg,
            paused: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            running: Mutex::new(HashSet::new()),
            next_due: Mutex::new(HashMap::new()),
            workers,
        })
    }

    /// Start the poll loop. The handle runs until `shutdown`.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(scheduler.cfg.poll_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if scheduler.shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                if scheduler.paused.load(Ordering::SeqCst) {
                    continue;
                }
                scheduler.tick().await;
            }
        })
    }

    async fn tick(self: &Arc<Self>) {
        let jobs = match self.store.list_enabled_jobs().await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!(target: "schedule", error = %e, "job listing failed, skipping tick");
                return;
            }
        };
        let now = Utc::now();
        gauge!("schedule_enabled_jobs").set(jobs.len() as f64);

        for job in jobs {
            let Some(trigger) = job.trigger() else {
                // Malformed timing row; dormant until retimed.
                continue;
            };

            let due = {
                let mut map = self.next_due.lock().expect("next_due mutex poisoned");
                *map.entry(job.name.clone())
                    .or_insert_with(|| next_run_at(trigger, job.last_run, now, self.cfg.tz))
            };
            if due > now {
                continue;
            }

            self.fire(job, trigger, TriggerSource::Scheduler);
        }
    }

    /// Move a job to Running on a pooled worker. The overlap guard drops
    /// a fire whose job is still executing; the due entry stays put so
    /// the next tick retries.
    fn fire(self: &Arc<Self>, job: JobDefinition, trigger: Trigger, source: TriggerSource) {
        {
            let mut running = self.running.lock().expect("running mutex poisoned");
            if !running.insert(job.name.clone()) {
                tracing::debug!(target: "schedule", job = %job.name, "still running, fire skipped");
                return;
            }
        }

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = scheduler
                .workers
                .acquire()
                .await
                .expect("worker semaphore closed");
            counter!("schedule_fires_total").increment(1);

            let fired_at = Utc::now();
            let outcome = scheduler.pipeline.execute(&job, &source).await;
            if !outcome.success {
                tracing::warn!(
                    target: "schedule",
                    job = %job.name,
                    error = outcome.error.as_deref().unwrap_or("unknown"),
                    "job run failed, waiting for next trigger"
                );
            }

            // Back to Scheduled regardless of outcome.
            let next = next_run_at(trigger, Some(fired_at), Utc::now(), scheduler.cfg.tz);
            {
                let mut map = scheduler.next_due.lock().expect("next_due mutex poisoned");
                map.insert(job.name.clone(), next);
            }
            if let Err(e) = scheduler.store.set_job_next_run(&job.name, Some(next)).await {
                tracing::warn!(target: "schedule", job = %job.name, error = %e, "next_run update failed");
            }
            let mut running = scheduler.running.lock().expect("running mutex poisoned");
            running.remove(&job.name);
        });
    }

    // ---- admin surface --------------------------------------------------

    /// Immediate execution outside the due-time check. Does not disturb
    /// the regular schedule.
    pub async fn run_job_now(self: &Arc<Self>, name: &str, actor: &str) -> RunOutcome {
        let job = match self.store.job_by_name(name).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                return RunOutcome {
                    success: false,
                    record_count: 0,
                    error: Some(format!("job not found: {name}")),
                }
            }
            Err(e) => {
                return RunOutcome {
                    success: false,
                    record_count: 0,
                    error: Some(e.to_string()),
                }
            }
        };

        {
            let mut running = self.running.lock().expect("running mutex poisoned");
            if !running.insert(job.name.clone()) {
                return RunOutcome {
                    success: false,
                    record_count: 0,
                    error: Some(format!("job already running: {name}")),
                };
            }
        }

        let _permit = self
            .workers
            .acquire()
            .await
            .expect("worker semaphore closed");
        let source = TriggerSource::Manual(actor.to_string());
        let outcome = self.pipeline.execute(&job, &source).await;

        let mut running = self.running.lock().expect("running mutex poisoned");
        running.remove(&job.name);
        outcome
    }

    /// Run every enabled job once, sequentially, aggregating outcomes.
    pub async fn run_all_now(self: &Arc<Self>, source: TriggerSource) -> BatchOutcome {
        let jobs = match self.store.list_enabled_jobs().await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!(target: "schedule", error = %e, "job listing failed");
                return BatchOutcome::default();
            }
        };

        let mut outcome = BatchOutcome::default();
        for job in jobs {
            {
                let mut running = self.running.lock().expect("running mutex poisoned");
                if !running.insert(job.name.clone()) {
                    outcome.failed += 1;
                    continue;
                }
            }
            let run = self.pipeline.execute(&job, &source).await;
            if run.success {
                outcome.success += 1;
                outcome.total_records += run.record_count;
            } else {
                outcome.failed += 1;
            }
            let mut running = self.running.lock().expect("running mutex poisoned");
            running.remove(&job.name);
        }
        outcome
    }

    /// Toggle a job's enabled flag; its trigger bookkeeping is replaced
    /// atomically. An in-flight execution is never interrupted.
    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<bool, sqlx::Error> {
        let found = self.store.set_job_enabled(name, enabled).await?;
        if found {
            let mut map = self.next_due.lock().expect("next_due mutex poisoned");
            map.remove(name);
        }
        Ok(found)
    }

    /// Retime a job (cron time or interval); effective on the next tick.
    pub async fn retime(
        &self,
        name: &str,
        cron_time: Option<&str>,
        interval_minutes: Option<u32>,
    ) -> Result<bool, sqlx::Error> {
        let found = self
            .store
            .set_job_timing(name, cron_time, interval_minutes)
            .await?;
        if found {
            let mut map = self.next_due.lock().expect("next_due mutex poisoned");
            map.remove(name);
        }
        Ok(found)
    }

    /// Suspend due-time evaluation without touching enabled flags.
    pub fn pause_all(&self) {
        self.paused.store(true, Ordering::SeqCst);
        tracing::info!(target: "schedule", "scheduler paused");
    }

    pub fn resume_all(&self) {
        self.paused.store(false, Ordering::SeqCst);
        tracing::info!(target: "schedule", "scheduler resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// All job definitions with fresh advisory next-run times and the
    /// running flag; the admin jobs listing.
    pub async fn job_rows(&self) -> Result<Vec<JobRow>, sqlx::Error> {
        let jobs = self.store.list_jobs().await?;
        let now = Utc::now();
        let running = self.running.lock().expect("running mutex poisoned").clone();
        let due_map = self.next_due.lock().expect("next_due mutex poisoned").clone();

        Ok(jobs
            .into_iter()
            .map(|mut job| {
                let is_running = running.contains(&job.name);
                if job.enabled {
                    job.next_run = due_map.get(&job.name).copied().or_else(|| {
                        job.trigger()
                            .map(|t| next_run_at(t, job.last_run, now, self.cfg.tz))
                    });
                } else {
                    job.next_run = None;
                }
                JobRow {
                    job,
                    running: is_running,
                }
            })
            .collect())
    }

    /// Stop firing and wait for in-flight executions to drain.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        loop {
            let in_flight = self.running.lock().expect("running mutex poisoned").len();
            if in_flight == 0 {
                break;
            }
            tracing::info!(target: "schedule", in_flight, "waiting for in-flight runs");
            tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_UTC_OFFSET_SECS;

    fn ist() -> FixedOffset {
        FixedOffset::east_opt(DEFAULT_UTC_OFFSET_SECS).unwrap()
    }

    #[test]
    fn cron_due_time_is_strictly_future_and_advances_24h() {
        let tz = ist();
        let trigger = Trigger::DailyAt { hour: 7, minute: 0 };
        // 06:30 IST: today's 07:00 is still ahead.
        let now = tz
            .with_ymd_and_hms(2026, 1, 2, 6, 30, 0)
            .unwrap()
            .with_timezone(&Utc);
        let first = next_run_at(trigger, None, now, tz);
        assert!(first > now);
        assert_eq!(
            first,
            tz.with_ymd_and_hms(2026, 1, 2, 7, 0, 0)
                .unwrap()
                .with_timezone(&Utc)
        );

        // Firing at that instant schedules exactly 24 hours later.
        let second = next_run_at(trigger, Some(first), first, tz);
        assert_eq!(second - first, chrono::Duration::hours(24));
    }

    #[test]
    fn cron_past_todays_slot_rolls_to_tomorrow() {
        let tz = ist();
        let trigger = Trigger::DailyAt {
            hour: 7,
            minute: 0,
        };
        let now = tz
            .with_ymd_and_hms(2026, 1, 2, 7, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        // Exactly at the slot: "strictly after" pushes a day out.
        let next = next_run_at(trigger, None, now, tz);
        assert_eq!(
            next,
            tz.with_ymd_and_hms(2026, 1, 3, 7, 0, 0)
                .unwrap()
                .with_timezone(&Utc)
        );
    }

    #[test]
    fn interval_fires_after_last_run_or_immediately() {
        let tz = ist();
        let trigger = Trigger::Every { minutes: 120 };
        let now = Utc::now();

        // Never run: due right away.
        assert_eq!(next_run_at(trigger, None, now, tz), now);

        // Two consecutive firings are at least the interval apart.
        let last = now;
        let next = next_run_at(trigger, Some(last), now, tz);
        assert_eq!(next - last, chrono::Duration::minutes(120));
    }
}
