use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Context;
use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;
use podctl_common::{
    jobs::led_brightness_at,
    plan_jobs,
    protocol::{alarm_request, AlarmPayload},
    trigger::next_alarm_instant,
    window::local_minutes,
    Component, DeviceStatusUpdate, JobAction, JobSpec, PlanOptions, ServiceState, TimeOfDay,
};
use serde::Serialize;
use tokio::{
    sync::{Mutex, Notify},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    device::{BaseController, DeviceStatusService},
    status::StatusBoard,
    store::AppStore,
};

const DATE_RETRY_INTERVAL: Duration = Duration::from_secs(10);
const MIN_VALID_YEAR: i32 = 2010;
// Upper bound on one sleep so wall-clock corrections are noticed.
const MAX_SLEEP: Duration = Duration::from_secs(60);

const SCHEDULE_COMPONENTS: [Component; 6] = [
    Component::PowerSchedule,
    Component::TemperatureSchedule,
    Component::ElevationSchedule,
    Component::AlarmSchedule,
    Component::PrimeSchedule,
    Component::LedNightMode,
];

/// Job setup needs a wall clock that has been set at least once.
pub fn system_date_valid(now: DateTime<Utc>) -> bool {
    now.year() > MIN_VALID_YEAR
}

struct ArmedJob {
    spec: JobSpec,
    tz: Tz,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct JobTable {
    armed: HashMap<String, ArmedJob>,
    reconciled: bool,
}

struct SchedulerInner {
    store: AppStore,
    devices: DeviceStatusService,
    base: Arc<dyn BaseController>,
    status: StatusBoard,
    reconcile_on_start: bool,
    ready: AtomicBool,
    rebuild_wanted: Notify,
    // Also serializes rebuilds.
    table: Mutex<JobTable>,
}

/// Arms planned jobs as timer tasks and re-derives them on demand.
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub id: String,
    pub trigger: String,
    pub next_run: Option<DateTime<Utc>>,
}

impl JobScheduler {
    pub fn new(
        store: AppStore,
        devices: DeviceStatusService,
        base: Arc<dyn BaseController>,
        status: StatusBoard,
        reconcile_on_start: bool,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                devices,
                base,
                status,
                reconcile_on_start,
                ready: AtomicBool::new(false),
                rebuild_wanted: Notify::new(),
                table: Mutex::new(JobTable::default()),
            }),
        }
    }

    /// Waits for a plausible system date, arms the first job set, then
    /// serves rebuilds requested by running jobs.
    pub fn start(&self) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let status = &scheduler.inner.status;
            while !system_date_valid(Utc::now()) {
                warn!("system date {} looks unset, retrying", Utc::now());
                status
                    .set(Component::SystemDate, ServiceState::Retrying, "waiting for clock")
                    .await;
                tokio::time::sleep(DATE_RETRY_INTERVAL).await;
            }
            status
                .set(Component::SystemDate, ServiceState::Healthy, Utc::now().to_rfc3339())
                .await;
            scheduler.inner.ready.store(true, Ordering::SeqCst);
            scheduler.rebuild().await;

            loop {
                scheduler.inner.rebuild_wanted.notified().await;
                scheduler.rebuild().await;
            }
        })
    }

    /// Re-derives jobs after a settings or schedule change. A no-op until
    /// [`start`](Self::start) has armed the first set.
    pub async fn reschedule(&self) {
        if self.inner.ready.load(Ordering::SeqCst) {
            self.rebuild().await;
        }
    }

    /// Stops every armed trigger, then plans and arms a fresh set. A job
    /// that is already firing runs to completion. Returns the number of
    /// armed jobs.
    pub async fn rebuild(&self) -> usize {
        let mut table = self.inner.table.lock().await;
        for (_, job) in table.armed.drain() {
            job.handle.abort();
        }

        let settings = self.inner.store.settings().await;
        let schedules = self.inner.store.schedules().await;
        let options = PlanOptions {
            reconcile: self.inner.reconcile_on_start && !table.reconciled,
        };
        let plan = plan_jobs(&settings, &schedules, Utc::now(), options);
        if plan.timezone.is_some() {
            table.reconciled = true;
        }

        for skip in &plan.skipped {
            debug!("not scheduling {}: {}", skip.scope, skip.reason);
        }
        for err in &plan.errors {
            warn!("skipping job: {err}");
        }

        // Reported before arming so an immediate failure is not overwritten.
        self.report(&plan.jobs, plan.timezone.is_some()).await;

        let tz = plan.timezone.unwrap_or(Tz::UTC);
        for (id, spec) in plan.jobs {
            debug!("arming {id} ({})", spec.trigger);
            let handle = tokio::spawn(run_job(self.clone(), tz, spec.clone()));
            table.armed.insert(id, ArmedJob { spec, tz, handle });
        }

        let count = table.armed.len();
        info!("scheduled {count} jobs");
        count
    }

    async fn report(&self, jobs: &BTreeMap<String, JobSpec>, has_timezone: bool) {
        let status = &self.inner.status;
        if !has_timezone {
            status
                .set(Component::Jobs, ServiceState::Started, "time zone not set")
                .await;
        } else {
            status
                .set(
                    Component::Jobs,
                    ServiceState::Healthy,
                    format!("{} jobs scheduled", jobs.len()),
                )
                .await;
        }
        for component in SCHEDULE_COMPONENTS {
            let count = jobs
                .values()
                .filter(|spec| spec.action.component() == component)
                .count();
            status
                .set(component, ServiceState::Healthy, format!("{count} jobs"))
                .await;
        }
    }

    pub async fn jobs(&self) -> Vec<JobView> {
        let now = Utc::now();
        let table = self.inner.table.lock().await;
        let mut jobs: Vec<JobView> = table
            .armed
            .values()
            .map(|job| JobView {
                id: job.spec.id.clone(),
                trigger: job.spec.trigger.to_string(),
                next_run: if job.handle.is_finished() {
                    None
                } else {
                    job.spec.trigger.first_fire(job.tz, now)
                },
            })
            .collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        jobs
    }

    async fn fire(&self, tz: Tz, spec: &JobSpec) {
        let component = spec.action.component();
        match self.execute(tz, &spec.action).await {
            Ok(()) => {
                if matches!(spec.action, JobAction::LedNightMode(_)) {
                    debug!("ran {}", spec.id);
                } else {
                    info!("ran {}", spec.id);
                }
            }
            Err(err) => {
                warn!("job {} failed: {err:#}", spec.id);
                self.inner
                    .status
                    .set(component, ServiceState::Failed, format!("{}: {err}", spec.id))
                    .await;
            }
        }
    }

    async fn execute(&self, tz: Tz, action: &JobAction) -> anyhow::Result<()> {
        match action {
            JobAction::PowerOn { .. }
            | JobAction::PowerOff { .. }
            | JobAction::SetTemperature { .. }
            | JobAction::Prime => {
                if let Some(update) = action.status_update() {
                    self.inner.devices.update(&update).await?;
                }
            }
            JobAction::SetBasePosition { side, position } => {
                self.inner
                    .base
                    .set_position(*position)
                    .await
                    .with_context(|| format!("failed to move {side} base"))?;
            }
            JobAction::ArmAlarm { side, alarm } => {
                let time: TimeOfDay = alarm.time.parse()?;
                let trigger_at = next_alarm_instant(tz, Utc::now(), time)
                    .context("alarm time does not exist in the configured zone")?;
                let payload = AlarmPayload::from_schedule(alarm, trigger_at.timestamp());
                let request = alarm_request(*side, &payload)?;
                self.inner.devices.device().execute(&request).await?;
                info!("{side} alarm armed for {}", trigger_at.with_timezone(&tz));
            }
            JobAction::LedNightMode(led) => {
                let brightness = led_brightness_at(led, local_minutes(Utc::now(), Some(tz)))?;
                self.inner
                    .devices
                    .update(&DeviceStatusUpdate::led_brightness(brightness))
                    .await?;
            }
            JobAction::AwayResume { side } => {
                self.inner.store.resume_from_away(*side).await?;
                info!("{side} side returned from away mode");
                // Rebuilds run on the start task.
                self.inner.rebuild_wanted.notify_one();
            }
        }
        Ok(())
    }
}

/// Waits out each trigger instant and fires in a separate task, so aborting
/// the wait leaves a firing in progress untouched.
async fn run_job(scheduler: JobScheduler, tz: Tz, spec: JobSpec) {
    let spec = Arc::new(spec);
    let mut next = spec.trigger.first_fire(tz, Utc::now());
    while let Some(fire_at) = next {
        sleep_until(fire_at).await;
        let firing = tokio::spawn({
            let scheduler = scheduler.clone();
            let spec = Arc::clone(&spec);
            async move { scheduler.fire(tz, &spec).await }
        });
        if let Err(err) = firing.await {
            warn!("job {} did not finish: {err}", spec.id);
        }
        next = spec.trigger.next_fire(tz, fire_at.max(Utc::now()));
    }
}

async fn sleep_until(at: DateTime<Utc>) {
    while let Ok(remaining) = (at - Utc::now()).to_std() {
        if remaining.is_zero() {
            break;
        }
        tokio::time::sleep(remaining.min(MAX_SLEEP)).await;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashSet};

    use async_trait::async_trait;
    use chrono::TimeZone;
    use podctl_common::{
        schedule::{AlarmSchedule, BasePreset, DailyScheduleUpdate, PowerUpdate},
        BasePosition, DayOfWeek, DeviceRequest, SchedulesUpdate, Settings, SettingsUpdate, Side,
        Trigger,
    };
    use serde_json::json;

    use super::*;
    use crate::{
        device::{tests::RecordingDevice, DeviceControl, LoggingBase},
        error::{DeviceError, TransportError},
    };

    /// Takes 100ms per request before recording it.
    struct SlowDevice(Arc<RecordingDevice>);

    #[async_trait]
    impl DeviceControl for SlowDevice {
        async fn execute(&self, request: &DeviceRequest) -> Result<String, TransportError> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.0.execute(request).await
        }
    }

    /// Never answers in time.
    struct BusyDevice;

    #[async_trait]
    impl DeviceControl for BusyDevice {
        async fn execute(&self, _request: &DeviceRequest) -> Result<String, TransportError> {
            Err(TransportError::Timeout {
                after: Duration::from_secs(5),
            })
        }
    }

    struct JammedBase;

    #[async_trait]
    impl BaseController for JammedBase {
        async fn set_position(&self, _position: BasePosition) -> Result<(), DeviceError> {
            Err(DeviceError::Base("motor stalled".to_string()))
        }
    }

    struct Harness {
        scheduler: JobScheduler,
        device: Arc<RecordingDevice>,
        store: AppStore,
        status: StatusBoard,
        _dir: tempfile::TempDir,
    }

    async fn harness() -> Harness {
        harness_with(
            |device| device as Arc<dyn DeviceControl>,
            Arc::new(LoggingBase::new()),
        )
        .await
    }

    /// `wrap` decides what sits between the scheduler and the recorder.
    async fn harness_with(
        wrap: impl FnOnce(Arc<RecordingDevice>) -> Arc<dyn DeviceControl>,
        base: Arc<dyn BaseController>,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = AppStore::open(dir.path()).await.unwrap();
        let device = Arc::new(RecordingDevice::default());
        let devices = DeviceStatusService::new(wrap(device.clone()), store.clone());
        let status = StatusBoard::new();
        let scheduler = JobScheduler::new(store.clone(), devices, base, status.clone(), true);
        Harness {
            scheduler,
            device,
            store,
            status,
            _dir: dir,
        }
    }

    /// Left side powered all day, every day, in UTC.
    async fn always_on_left(store: &AppStore) {
        let settings: SettingsUpdate = serde_json::from_value(json!({ "timeZone": "UTC" })).unwrap();
        store.update_settings(&settings).await.unwrap();

        let day = DailyScheduleUpdate {
            power: Some(PowerUpdate {
                on: Some("00:00".to_string()),
                off: Some("00:00".to_string()),
                enabled: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };
        let update = SchedulesUpdate {
            left: Some(DayOfWeek::ALL.into_iter().map(|d| (d, day.clone())).collect()),
            right: None,
        };
        store.update_schedules(&update).await.unwrap();
    }

    async fn wait_for_requests(device: &RecordingDevice, count: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while device.encoded().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn rejects_unset_clock() {
        assert!(!system_date_valid(Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap()));
        assert!(system_date_valid(Utc.with_ymd_and_hms(2026, 6, 10, 0, 0, 0).unwrap()));
    }

    #[tokio::test]
    async fn nothing_is_armed_without_timezone() {
        let h = harness().await;
        assert_eq!(h.store.settings().await, Settings::default());

        assert_eq!(h.scheduler.rebuild().await, 0);

        let status = h.status.snapshot().await;
        assert_eq!(status.jobs.status, ServiceState::Started);
    }

    #[tokio::test]
    async fn first_setup_powers_on_open_window() {
        let h = harness().await;
        always_on_left(&h.store).await;

        h.scheduler.rebuild().await;
        wait_for_requests(&h.device, 2).await;

        assert_eq!(h.device.encoded(), vec!["9\n43200", "11\n-2"]);
    }

    #[tokio::test]
    async fn rebuild_replaces_instead_of_duplicating() {
        let h = harness().await;
        always_on_left(&h.store).await;

        let first = h.scheduler.rebuild().await;
        wait_for_requests(&h.device, 2).await;
        let second = h.scheduler.rebuild().await;

        // Seven power-on and seven power-off jobs, plus the one-time reconcile.
        assert_eq!(first, 15);
        assert_eq!(second, 14);
        let ids: Vec<String> = h.scheduler.jobs().await.into_iter().map(|j| j.id).collect();
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 14);
        assert!(ids.contains(&"left-friday-00:00-power-on".to_string()));
        assert!(!ids.iter().any(|id| id.starts_with("right-")));

        let status = h.status.snapshot().await;
        assert_eq!(status.power_schedule.message, "14 jobs");
        assert_eq!(status.alarm_schedule.message, "0 jobs");
    }

    #[tokio::test]
    async fn overdue_away_return_resumes_side() {
        let h = harness().await;
        let update: SettingsUpdate = serde_json::from_value(json!({
            "left": { "awayMode": true, "awayReturn": "2020-01-01T00:00:00Z" }
        }))
        .unwrap();
        h.store.update_settings(&update).await.unwrap();

        assert_eq!(h.scheduler.rebuild().await, 1);

        tokio::time::timeout(Duration::from_secs(2), async {
            while h.store.settings().await.is_away(Side::Left) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(h.store.settings().await.left.away_return, None);
    }

    #[tokio::test]
    async fn reschedule_waits_for_start() {
        let h = harness().await;
        always_on_left(&h.store).await;

        h.scheduler.reschedule().await;
        assert!(h.scheduler.jobs().await.is_empty());

        h.scheduler.start();
        tokio::time::timeout(Duration::from_secs(2), async {
            while h.scheduler.jobs().await.len() < 15 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        let schedules: BTreeMap<_, _> = h
            .scheduler
            .jobs()
            .await
            .into_iter()
            .map(|j| (j.id, j.trigger))
            .collect();
        assert_eq!(schedules["left-monday-00:00-power-on"], "weekly monday 00:00");
    }

    #[tokio::test]
    async fn rebuild_lets_a_firing_job_finish() {
        let h = harness_with(
            |device| Arc::new(SlowDevice(device)) as Arc<dyn DeviceControl>,
            Arc::new(LoggingBase::new()),
        )
        .await;
        always_on_left(&h.store).await;

        h.scheduler.rebuild().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.scheduler.rebuild().await;
        wait_for_requests(&h.device, 2).await;

        assert_eq!(h.device.encoded(), vec!["9\n43200", "11\n-2"]);
    }

    #[tokio::test]
    async fn reconcile_waits_for_a_timezone() {
        let h = harness().await;

        assert_eq!(h.scheduler.rebuild().await, 0);
        always_on_left(&h.store).await;
        assert_eq!(h.scheduler.rebuild().await, 15);
        wait_for_requests(&h.device, 2).await;

        assert_eq!(h.device.encoded(), vec!["9\n43200", "11\n-2"]);
    }

    #[tokio::test]
    async fn failed_base_move_is_reported_and_power_still_runs() {
        let h = harness_with(
            |device| device as Arc<dyn DeviceControl>,
            Arc::new(JammedBase),
        )
        .await;
        let elevation = JobSpec {
            id: "left-monday-22:00-elevation".to_string(),
            trigger: Trigger::Immediate,
            action: JobAction::SetBasePosition {
                side: Side::Left,
                position: BasePreset::Relax.position(),
            },
        };
        let power = JobSpec {
            id: "left-monday-22:00-power-on".to_string(),
            trigger: Trigger::Immediate,
            action: JobAction::PowerOn {
                side: Side::Left,
                temperature_f: 82,
            },
        };

        h.scheduler.fire(Tz::UTC, &elevation).await;
        h.scheduler.fire(Tz::UTC, &power).await;

        let status = h.status.snapshot().await;
        assert_eq!(status.elevation_schedule.status, ServiceState::Failed);
        assert!(status
            .elevation_schedule
            .message
            .starts_with("left-monday-22:00-elevation"));
        assert_ne!(status.power_schedule.status, ServiceState::Failed);
        assert_eq!(h.device.encoded(), vec!["9\n43200", "11\n-2"]);
    }

    #[tokio::test]
    async fn malformed_alarm_time_is_reported_at_fire_time() {
        let h = harness().await;
        let alarm = JobSpec {
            id: "left-alarm-tuesday".to_string(),
            trigger: Trigger::Immediate,
            action: JobAction::ArmAlarm {
                side: Side::Left,
                alarm: AlarmSchedule {
                    time: "7am".to_string(),
                    enabled: true,
                    ..Default::default()
                },
            },
        };

        h.scheduler.fire(Tz::UTC, &alarm).await;

        let status = h.status.snapshot().await;
        assert_eq!(status.alarm_schedule.status, ServiceState::Failed);
        assert!(h.device.encoded().is_empty());
    }

    #[tokio::test]
    async fn device_timeout_fails_reconcile_but_keeps_weekly_jobs() {
        let h = harness_with(
            |_| Arc::new(BusyDevice) as Arc<dyn DeviceControl>,
            Arc::new(LoggingBase::new()),
        )
        .await;
        always_on_left(&h.store).await;

        assert_eq!(h.scheduler.rebuild().await, 15);
        tokio::time::timeout(Duration::from_secs(2), async {
            while h.status.snapshot().await.power_schedule.status != ServiceState::Failed {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let jobs = h.scheduler.jobs().await;
        let weekly: Vec<_> = jobs.iter().filter(|job| job.trigger.starts_with("weekly")).collect();
        assert_eq!(weekly.len(), 14);
        assert!(weekly.iter().all(|job| job.next_run.is_some()));
    }
}
