use crate::config::ConfigStore;
use crate::control::ControlReceiver;
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use common::{format_duration, format_time, AutoEmailConfig, ControlSignal, JobKey};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

pub const MIN_WAIT: Duration = Duration::from_secs(common::MIN_WAIT_SECS);
pub const MIN_WATCH_PERIOD: Duration = Duration::from_secs(common::MIN_WATCH_PERIOD_SECS);

pub type Clock = fn() -> NaiveDateTime;

pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// What a job does when it fires.
#[async_trait]
pub trait JobAction: Send + Sync {
    async fn fire(&self, key: JobKey) -> anyhow::Result<()>;
}

/// How long a periodic job should sleep, derived from its `AutoEmailConfig`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitPlan {
    /// Disabled: sleep until signalled.
    Indefinite,
    Timed(Duration),
    /// The stored time is unusable; store this one and look again.
    Reschedule(NaiveDateTime),
}

/// Result of one pass through a job loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Rescheduled,
    Reloaded,
    Fired,
    Unchanged,
    Failed,
}

pub fn plan_wait(aec: &AutoEmailConfig, now: NaiveDateTime) -> anyhow::Result<WaitPlan> {
    if !aec.auto_email_enable {
        return Ok(WaitPlan::Indefinite);
    }
    let usable = match common::parse_time(&aec.auto_email_next) {
        // next == now counts as expired.
        Ok(next) if next > now => (next - now).to_std().ok().filter(|d| *d >= MIN_WAIT),
        _ => None,
    };
    let next = match usable {
        Some(wait) => return Ok(WaitPlan::Timed(wait)),
        None => common::calculate_next_time(now, aec.auto_email_count, aec.auto_email_period)?,
    };
    // A recurrence under MIN_WAIT would be rejected again on the next pass.
    let floor = chrono::Duration::from_std(MIN_WAIT)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .ok_or_else(|| anyhow::anyhow!("cannot schedule after {}", format_time(&now)))?;
    Ok(WaitPlan::Reschedule(next.max(floor)))
}

/// Poll period for the status-file watch, clamped to `MIN_WATCH_PERIOD`.
pub fn watch_period(secs: i64) -> Duration {
    Duration::from_secs(secs.max(0) as u64).max(MIN_WATCH_PERIOD)
}

/// Block until a signal arrives. `None` if the channel is closed.
pub async fn wait_indefinite(control: &mut ControlReceiver) -> Option<ControlSignal> {
    control.recv().await
}

/// Race a one-shot timer against the control channel. A signal already
/// queued wins over a timer expiring in the same poll. The sleep is dropped
/// on return whichever side wins. A closed channel leaves only the timer.
pub async fn wait_timed(control: &mut ControlReceiver, wait: Duration) -> ControlSignal {
    let timer = tokio::time::sleep(wait);
    tokio::pin!(timer);
    tokio::select! {
        biased;
        Some(signal) = control.recv() => signal,
        _ = &mut timer => ControlSignal::TimerExpired,
    }
}

async fn park(key: JobKey) -> ControlSignal {
    log::error!("mailer({}): control channel closed; parking", key);
    std::future::pending().await
}

async fn fire(key: JobKey, action: &dyn JobAction) -> Outcome {
    log::info!("mailer({}): mailing...", key);
    match action.fire(key).await {
        Ok(()) => Outcome::Fired,
        Err(e) => {
            log::error!("mailer({}): {:#}", key, e);
            Outcome::Failed
        }
    }
}

/// Sends a job's email on the schedule stored in its `AutoEmailConfig`.
pub struct PeriodicScheduler {
    key: JobKey,
    config: Arc<ConfigStore>,
    control: ControlReceiver,
    action: Arc<dyn JobAction>,
    clock: Clock,
}

impl PeriodicScheduler {
    pub fn new(config: Arc<ConfigStore>, control: ControlReceiver, action: Arc<dyn JobAction>) -> Self {
        Self {
            key: control.key(),
            config,
            control,
            action,
            clock: local_now,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub async fn run(mut self) {
        log::info!("mailer({}): starting", self.key);
        loop {
            self.step().await;
        }
    }

    pub async fn step(&mut self) -> Outcome {
        let key = self.key;
        let aec = match self.config.get().map(|c| c.auto_email(key).cloned()) {
            Ok(Some(aec)) => aec,
            Ok(None) => {
                log::error!("mailer({}): job has no auto-email settings", key);
                return self.wait_for_signal().await;
            }
            Err(e) => {
                log::error!("mailer({}): reading config: {}", key, e);
                return self.wait_for_signal().await;
            }
        };

        let signal = match plan_wait(&aec, (self.clock)()) {
            Ok(WaitPlan::Reschedule(next)) => {
                self.reschedule(&aec, next);
                tokio::task::yield_now().await;
                return Outcome::Rescheduled;
            }
            Ok(WaitPlan::Indefinite) => {
                log::info!("mailer({}): disabled, waiting indefinitely...", key);
                match wait_indefinite(&mut self.control).await {
                    Some(signal) => signal,
                    None => park(key).await,
                }
            }
            Ok(WaitPlan::Timed(wait)) => {
                log::info!(
                    "mailer({}): waiting for timeout {} ...",
                    key,
                    format_duration(chrono::Duration::from_std(wait).unwrap_or_else(|_| chrono::Duration::zero()))
                );
                wait_timed(&mut self.control, wait).await
            }
            Err(e) => {
                log::error!("mailer({}): cannot schedule next email: {:#}", key, e);
                return self.wait_for_signal().await;
            }
        };

        log::info!("mailer({}): wait completed, msg: {}", key, signal);
        match signal {
            ControlSignal::ConfigChanged => Outcome::Reloaded,
            _ => fire(key, self.action.as_ref()).await,
        }
    }

    async fn wait_for_signal(&mut self) -> Outcome {
        let signal = match wait_indefinite(&mut self.control).await {
            Some(signal) => signal,
            None => park(self.key).await,
        };
        match signal {
            ControlSignal::ConfigChanged => Outcome::Reloaded,
            _ => fire(self.key, self.action.as_ref()).await,
        }
    }

    /// Store `next`, unless the job's settings changed since `seen` was read;
    /// in that case the fresh settings are planned on the next pass.
    fn reschedule(&self, seen: &AutoEmailConfig, next: NaiveDateTime) {
        let key = self.key;
        let next = format_time(&next);
        let stored = self.config.update(|c| match c.auto_email_mut(key) {
            Some(aec) if aec == seen => {
                aec.auto_email_next = next.clone();
                true
            }
            _ => false,
        });
        match stored {
            Ok(true) => log::info!(
                "mailer({}): calculated new next time after {} {} ==> {}",
                key,
                seen.auto_email_count,
                seen.auto_email_period,
                next
            ),
            Ok(false) => log::info!("mailer({}): settings changed while rescheduling; re-reading", key),
            Err(e) => log::error!("mailer({}): saving next time {}: {}", key, next, e),
        }
    }
}

/// Sends the status email whenever the watched file's modification time moves.
pub struct WatchScheduler {
    key: JobKey,
    config: Arc<ConfigStore>,
    control: ControlReceiver,
    action: Arc<dyn JobAction>,
    last_modified: Option<SystemTime>,
}

impl WatchScheduler {
    pub fn new(config: Arc<ConfigStore>, control: ControlReceiver, action: Arc<dyn JobAction>) -> Self {
        let key = control.key();
        let last_modified = match config.get() {
            Ok(c) => match modified(&c.acer_file_path) {
                Ok(t) => Some(t),
                Err(e) => {
                    // Unset compares unequal to the first successful stat.
                    log::error!("mailer({}): stat {}: {}", key, c.acer_file_path, e);
                    None
                }
            },
            Err(e) => {
                log::error!("mailer({}): reading config: {}", key, e);
                None
            }
        };
        Self {
            key,
            config,
            control,
            action,
            last_modified,
        }
    }

    pub async fn run(mut self) {
        log::info!("watcher({}): starting", self.key);
        loop {
            self.step().await;
        }
    }

    pub async fn step(&mut self) -> Outcome {
        let key = self.key;
        let config = match self.config.get() {
            Ok(c) => Some(c),
            Err(e) => {
                log::error!("watcher({}): reading config: {}", key, e);
                None
            }
        };
        let config = match config {
            Some(c) if c.enable_acer_file_watch => c,
            _ => {
                let signal = match wait_indefinite(&mut self.control).await {
                    Some(signal) => signal,
                    None => park(key).await,
                };
                return match signal {
                    ControlSignal::ConfigChanged => {
                        log::info!("watcher({}): config change occurred", key);
                        Outcome::Reloaded
                    }
                    _ => fire(key, self.action.as_ref()).await,
                };
            }
        };

        let period = watch_period(config.acer_file_watch_period);
        match wait_timed(&mut self.control, period).await {
            ControlSignal::ConfigChanged => {
                log::info!("watcher({}): config change occurred", key);
                Outcome::Reloaded
            }
            ControlSignal::SendNow => fire(key, self.action.as_ref()).await,
            ControlSignal::TimerExpired => self.check_file(&config.acer_file_path).await,
        }
    }

    async fn check_file(&mut self, path: &str) -> Outcome {
        match modified(path) {
            Ok(t) if Some(t) != self.last_modified => {
                log::info!("watcher({}): {} changed", self.key, path);
                self.last_modified = Some(t);
                fire(self.key, self.action.as_ref()).await
            }
            Ok(_) => Outcome::Unchanged,
            Err(e) => {
                log::error!("watcher({}): stat {}: {}", self.key, path, e);
                Outcome::Failed
            }
        }
    }
}

fn modified(path: impl AsRef<Path>) -> std::io::Result<SystemTime> {
    std::fs::metadata(path)?.modified()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ControlBus;
    use common::{parse_time, Configuration, Period};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    #[derive(Default)]
    struct CountingAction {
        fired: AtomicUsize,
    }

    impl CountingAction {
        fn count(&self) -> usize {
            self.fired.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl JobAction for CountingAction {
        async fn fire(&self, _key: JobKey) -> anyhow::Result<()> {
            self.fired.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn fixed_now() -> NaiveDateTime {
        parse_time("2026-06-01 12:00:00").unwrap()
    }

    fn aec(enable: bool, count: i64, period: Period, next: &str) -> AutoEmailConfig {
        AutoEmailConfig {
            auto_email_enable: enable,
            auto_email_count: count,
            auto_email_period: period,
            auto_email_next: next.to_string(),
        }
    }

    fn store_with(dir: &tempfile::TempDir, f: impl FnOnce(&mut Configuration)) -> Arc<ConfigStore> {
        let mut c = Configuration::default();
        f(&mut c);
        let path = dir.path().join("config.json");
        std::fs::write(&path, serde_json::to_string_pretty(&c).unwrap()).unwrap();
        Arc::new(ConfigStore::open(path).unwrap())
    }

    #[test]
    fn test_plan_disabled_waits_indefinitely() {
        let plan = plan_wait(&aec(false, 1, Period::Hours, "garbage"), fixed_now()).unwrap();
        assert_eq!(plan, WaitPlan::Indefinite);
    }

    #[test]
    fn test_plan_future_next_is_timed() {
        let plan = plan_wait(&aec(true, 1, Period::Hours, "2026-06-01 12:30:00"), fixed_now()).unwrap();
        assert_eq!(plan, WaitPlan::Timed(Duration::from_secs(30 * 60)));
    }

    #[test]
    fn test_plan_past_next_rolls_forward_once() {
        let plan = plan_wait(&aec(true, 2, Period::Hours, "2026-06-01 11:00:00"), fixed_now()).unwrap();
        assert_eq!(plan, WaitPlan::Reschedule(parse_time("2026-06-01 14:00:00").unwrap()));

        // Far in the past still lands one period after now, not a burst.
        let plan = plan_wait(&aec(true, 1, Period::Days, "2020-01-01 00:00:00"), fixed_now()).unwrap();
        assert_eq!(plan, WaitPlan::Reschedule(parse_time("2026-06-02 12:00:00").unwrap()));
    }

    #[test]
    fn test_plan_rejects_too_close_equal_and_unparsable() {
        let expected = WaitPlan::Reschedule(parse_time("2026-06-01 12:05:00").unwrap());
        for next in ["2026-06-01 12:00:05", "2026-06-01 12:00:00", "", "soon"] {
            let plan = plan_wait(&aec(true, 5, Period::Mins, next), fixed_now()).unwrap();
            assert_eq!(plan, expected, "next = {:?}", next);
        }
        let plan = plan_wait(&aec(true, 5, Period::Mins, "2026-06-01 12:00:10"), fixed_now()).unwrap();
        assert_eq!(plan, WaitPlan::Timed(MIN_WAIT));
    }

    #[test]
    fn test_short_recurrence_rolls_forward_to_min_wait() {
        let plan = plan_wait(&aec(true, 5, Period::Secs, ""), fixed_now()).unwrap();
        assert_eq!(plan, WaitPlan::Reschedule(parse_time("2026-06-01 12:00:10").unwrap()));

        // The rolled-forward time is accepted on the next pass.
        let plan = plan_wait(&aec(true, 5, Period::Secs, "2026-06-01 12:00:10"), fixed_now()).unwrap();
        assert_eq!(plan, WaitPlan::Timed(MIN_WAIT));
    }

    #[test]
    fn test_watch_period_is_clamped() {
        assert_eq!(watch_period(3), Duration::from_secs(10));
        assert_eq!(watch_period(-1), Duration::from_secs(10));
        assert_eq!(watch_period(45), Duration::from_secs(45));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_next_is_rescheduled_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, |c| {
            c.history_log_auto_email = aec(true, 2, Period::Hours, "2026-06-01 11:00:00");
        });
        let bus = ControlBus::new();
        let action = Arc::new(CountingAction::default());
        let mut sched = PeriodicScheduler::new(
            store.clone(),
            bus.take_receiver(JobKey::History).unwrap(),
            action.clone(),
        )
        .with_clock(fixed_now);

        assert_eq!(sched.step().await, Outcome::Rescheduled);
        assert_eq!(store.get().unwrap().history_log_auto_email.auto_email_next, "2026-06-01 14:00:00");
        let on_disk: Configuration =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("config.json")).unwrap()).unwrap();
        assert_eq!(on_disk.history_log_auto_email.auto_email_next, "2026-06-01 14:00:00");
        assert_eq!(action.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_five_seconds_out_is_rescheduled_not_waited() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, |c| {
            c.simmon_log_auto_email = aec(true, 1, Period::Days, "2026-06-01 12:00:05");
        });
        let bus = ControlBus::new();
        let action = Arc::new(CountingAction::default());
        let mut sched =
            PeriodicScheduler::new(store.clone(), bus.take_receiver(JobKey::Simmon).unwrap(), action.clone())
                .with_clock(fixed_now);

        let start = Instant::now();
        assert_eq!(sched.step().await, Outcome::Rescheduled);
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(store.get().unwrap().simmon_log_auto_email.auto_email_next, "2026-06-02 12:00:00");
    }

    #[tokio::test(start_paused = true)]
    async fn test_five_second_recurrence_still_fires() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, |c| {
            c.reporter_log_auto_email = aec(true, 5, Period::Secs, "");
        });
        let bus = ControlBus::new();
        let action = Arc::new(CountingAction::default());
        let mut sched =
            PeriodicScheduler::new(store.clone(), bus.take_receiver(JobKey::Reporter).unwrap(), action.clone())
                .with_clock(fixed_now);

        assert_eq!(sched.step().await, Outcome::Rescheduled);
        assert_eq!(store.get().unwrap().reporter_log_auto_email.auto_email_next, "2026-06-01 12:00:10");

        let start = Instant::now();
        assert_eq!(sched.step().await, Outcome::Fired);
        assert_eq!(start.elapsed(), MIN_WAIT);
        assert_eq!(action.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_at_next() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, |c| {
            c.reporter_log_auto_email = aec(true, 1, Period::Hours, "2026-06-01 12:01:00");
        });
        let bus = ControlBus::new();
        let action = Arc::new(CountingAction::default());
        let mut sched =
            PeriodicScheduler::new(store, bus.take_receiver(JobKey::Reporter).unwrap(), action.clone())
                .with_clock(fixed_now);

        let start = Instant::now();
        assert_eq!(sched.step().await, Outcome::Fired);
        assert_eq!(start.elapsed(), Duration::from_secs(60));
        assert_eq!(action.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_change_before_timer_does_not_fire() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, |c| {
            c.history_log_auto_email = aec(true, 1, Period::Hours, "2026-06-01 12:01:00");
        });
        let bus = ControlBus::new();
        let action = Arc::new(CountingAction::default());
        let mut sched = PeriodicScheduler::new(
            store.clone(),
            bus.take_receiver(JobKey::History).unwrap(),
            action.clone(),
        )
        .with_clock(fixed_now);

        let (outcome, sent) = tokio::join!(sched.step(), async {
            tokio::time::sleep(Duration::from_secs(59)).await;
            store.update(|c| c.history_log_auto_email.auto_email_enable = false).unwrap();
            bus.signal(JobKey::History, ControlSignal::ConfigChanged).await
        });
        sent.unwrap();
        assert_eq!(outcome, Outcome::Reloaded);
        assert_eq!(action.count(), 0);

        // The new settings are picked up: disabled now, so only a signal wakes it.
        let (outcome, _) = tokio::join!(sched.step(), async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            assert_eq!(action.count(), 0);
            bus.signal(JobKey::History, ControlSignal::ConfigChanged).await
        });
        assert_eq!(outcome, Outcome::Reloaded);
        assert_eq!(action.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_now_interrupts_timed_wait() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, |c| {
            c.history_log_auto_email = aec(true, 1, Period::Weeks, "2026-06-05 12:00:00");
        });
        let bus = ControlBus::new();
        let action = Arc::new(CountingAction::default());
        let mut sched =
            PeriodicScheduler::new(store, bus.take_receiver(JobKey::History).unwrap(), action.clone())
                .with_clock(fixed_now);

        let start = Instant::now();
        let (outcome, sent) = tokio::join!(sched.step(), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            bus.signal(JobKey::History, ControlSignal::SendNow).await
        });
        sent.unwrap();
        assert_eq!(outcome, Outcome::Fired);
        assert_eq!(action.count(), 1);
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_job_fires_once_on_send_now() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, |_| {});
        let bus = ControlBus::new();
        let action = Arc::new(CountingAction::default());
        let mut sched =
            PeriodicScheduler::new(store, bus.take_receiver(JobKey::Simmon).unwrap(), action.clone())
                .with_clock(fixed_now);

        let (outcome, _) = tokio::join!(sched.step(), async {
            tokio::time::sleep(Duration::from_secs(30 * 86_400)).await;
            assert_eq!(action.count(), 0);
            bus.signal(JobKey::Simmon, ControlSignal::SendNow).await.unwrap();
        });
        assert_eq!(outcome, Outcome::Fired);
        assert_eq!(action.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_then_enabled_schedules() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, |_| {});
        let bus = ControlBus::new();
        let action = Arc::new(CountingAction::default());
        let mut sched = PeriodicScheduler::new(
            store.clone(),
            bus.take_receiver(JobKey::Reporter).unwrap(),
            action.clone(),
        )
        .with_clock(fixed_now);

        let (outcome, _) = tokio::join!(sched.step(), async {
            store
                .update(|c| c.reporter_log_auto_email = aec(true, 10, Period::Mins, "2026-06-01 12:10:00"))
                .unwrap();
            bus.signal(JobKey::Reporter, ControlSignal::ConfigChanged).await.unwrap();
        });
        assert_eq!(outcome, Outcome::Reloaded);

        let start = Instant::now();
        assert_eq!(sched.step().await, Outcome::Fired);
        assert_eq!(start.elapsed(), Duration::from_secs(600));
        assert_eq!(action.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_does_not_clobber_newer_settings() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, |c| {
            c.history_log_auto_email = aec(true, 1, Period::Hours, "");
        });
        let bus = ControlBus::new();
        let sched = PeriodicScheduler::new(
            store.clone(),
            bus.take_receiver(JobKey::History).unwrap(),
            Arc::new(CountingAction::default()),
        )
        .with_clock(fixed_now);

        let seen = store.get().unwrap().history_log_auto_email;
        store
            .update(|c| c.history_log_auto_email = aec(true, 3, Period::Days, "2026-06-04 12:00:00"))
            .unwrap();
        sched.reschedule(&seen, parse_time("2026-06-01 13:00:00").unwrap());
        assert_eq!(store.get().unwrap().history_log_auto_email.auto_email_next, "2026-06-04 12:00:00");
    }

    fn set_mtime(path: &Path, secs: u64) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs)).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_polls_at_clamped_period_and_fires_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let watched = dir.path().join("acer.txt");
        std::fs::write(&watched, "status").unwrap();
        set_mtime(&watched, 1_000_000);
        let watched_str = watched.to_string_lossy().to_string();
        let store = store_with(&dir, |c| {
            c.enable_acer_file_watch = true;
            c.acer_file_watch_period = 3;
            c.acer_file_path = watched_str;
        });
        let bus = ControlBus::new();
        let action = Arc::new(CountingAction::default());
        let mut watcher = WatchScheduler::new(store, bus.take_receiver(JobKey::Status).unwrap(), action.clone());

        let start = Instant::now();
        assert_eq!(watcher.step().await, Outcome::Unchanged);
        assert_eq!(start.elapsed(), Duration::from_secs(10));

        set_mtime(&watched, 2_000_000);
        assert_eq!(watcher.step().await, Outcome::Fired);
        assert_eq!(watcher.step().await, Outcome::Unchanged);
        assert_eq!(action.count(), 1);
    }

    fn watching(dir: &tempfile::TempDir, period: i64) -> (Arc<ConfigStore>, std::path::PathBuf) {
        let watched = dir.path().join("acer.txt");
        std::fs::write(&watched, "status").unwrap();
        set_mtime(&watched, 1_000_000);
        let watched_str = watched.to_string_lossy().to_string();
        let store = store_with(dir, |c| {
            c.enable_acer_file_watch = true;
            c.acer_file_watch_period = period;
            c.acer_file_path = watched_str;
        });
        (store, watched)
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_config_change_during_poll_rereads() {
        let dir = tempfile::tempdir().unwrap();
        let (store, watched) = watching(&dir, 60);
        let bus = ControlBus::new();
        let action = Arc::new(CountingAction::default());
        let mut watcher =
            WatchScheduler::new(store.clone(), bus.take_receiver(JobKey::Status).unwrap(), action.clone());

        // The file changes too, but a config change must not fire.
        let start = Instant::now();
        let (outcome, sent) = tokio::join!(watcher.step(), async {
            tokio::time::sleep(Duration::from_secs(20)).await;
            set_mtime(&watched, 2_000_000);
            store.update(|c| c.acer_file_watch_period = 15).unwrap();
            bus.signal(JobKey::Status, ControlSignal::ConfigChanged).await
        });
        sent.unwrap();
        assert_eq!(outcome, Outcome::Reloaded);
        assert_eq!(start.elapsed(), Duration::from_secs(20));
        assert_eq!(action.count(), 0);

        // The next poll uses the new period.
        let start = Instant::now();
        assert_eq!(watcher.step().await, Outcome::Fired);
        assert_eq!(start.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_send_now_during_poll_skips_mtime_check() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _watched) = watching(&dir, 60);
        let bus = ControlBus::new();
        let action = Arc::new(CountingAction::default());
        let mut watcher = WatchScheduler::new(store, bus.take_receiver(JobKey::Status).unwrap(), action.clone());
        let before = watcher.last_modified;

        let (outcome, sent) = tokio::join!(watcher.step(), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            bus.signal(JobKey::Status, ControlSignal::SendNow).await
        });
        sent.unwrap();
        assert_eq!(outcome, Outcome::Fired);
        assert_eq!(action.count(), 1);
        assert_eq!(watcher.last_modified, before);

        assert_eq!(watcher.step().await, Outcome::Unchanged);
        assert_eq!(action.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_signal_beats_expiring_timer() {
        use std::future::Future;
        use std::task::Poll;

        let bus = Arc::new(ControlBus::new());
        let mut rx = bus.take_receiver(JobKey::History).unwrap();
        let mut wait = Box::pin(wait_timed(&mut rx, Duration::from_secs(10)));
        let first = std::future::poll_fn(|cx| Poll::Ready(wait.as_mut().poll(cx))).await;
        assert!(first.is_pending());

        // Both sides are ready by the next poll.
        let sender = bus.clone();
        let pending = tokio::spawn(async move { sender.signal(JobKey::History, ControlSignal::ConfigChanged).await });
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(wait.await, ControlSignal::ConfigChanged);
        pending.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_stat_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.txt").to_string_lossy().to_string();
        let store = store_with(&dir, |c| {
            c.enable_acer_file_watch = true;
            c.acer_file_watch_period = 30;
            c.acer_file_path = missing;
        });
        let bus = ControlBus::new();
        let action = Arc::new(CountingAction::default());
        let mut watcher = WatchScheduler::new(store, bus.take_receiver(JobKey::Status).unwrap(), action.clone());

        assert_eq!(watcher.step().await, Outcome::Failed);
        assert_eq!(watcher.step().await, Outcome::Failed);
        assert_eq!(action.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_disabled_waits_for_signals() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, |_| {});
        let bus = ControlBus::new();
        let action = Arc::new(CountingAction::default());
        let mut watcher = WatchScheduler::new(store, bus.take_receiver(JobKey::Status).unwrap(), action.clone());

        let (outcome, _) = tokio::join!(watcher.step(), async {
            tokio::time::sleep(Duration::from_secs(86_400)).await;
            bus.signal(JobKey::Status, ControlSignal::ConfigChanged).await.unwrap();
        });
        assert_eq!(outcome, Outcome::Reloaded);

        let (outcome, _) = tokio::join!(watcher.step(), async {
            bus.signal(JobKey::Status, ControlSignal::SendNow).await.unwrap();
        });
        assert_eq!(outcome, Outcome::Fired);
        assert_eq!(action.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timed_returns_signal_or_timer() {
        let bus = ControlBus::new();
        let mut rx = bus.take_receiver(JobKey::History).unwrap();

        let signal = wait_timed(&mut rx, Duration::from_secs(10)).await;
        assert_eq!(signal, ControlSignal::TimerExpired);

        let (signal, sent) = tokio::join!(wait_timed(&mut rx, Duration::from_secs(10)), async {
            tokio::time::sleep(Duration::from_secs(9)).await;
            bus.signal(JobKey::History, ControlSignal::ConfigChanged).await
        });
        sent.unwrap();
        assert_eq!(signal, ControlSignal::ConfigChanged);
    }
}
