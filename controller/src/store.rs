use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use podctl_common::{
    migration, DailySchedule, DayOfWeek, Schedules, SchedulesUpdate, Settings, SettingsUpdate, Side,
};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

const SETTINGS_FILE: &str = "settingsDB.json";
const SCHEDULES_FILE: &str = "schedulesDB.json";

/// JSON-file backed settings and schedules with an in-memory copy.
///
/// Reads are served from memory. Updates are applied to a copy, written to
/// disk, and only then become visible.
#[derive(Clone)]
pub struct AppStore {
    settings_path: Arc<PathBuf>,
    schedules_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
    settings: Arc<Mutex<Settings>>,
    schedules: Arc<Mutex<Schedules>>,
}

impl AppStore {
    /// Loads both files from `dir`, migrating legacy schedules on the way in.
    /// Missing files start from defaults and are created. A file that cannot
    /// be decoded is moved to `<name>.corrupt` and replaced by defaults.
    pub async fn open(dir: &Path) -> anyhow::Result<Self> {
        let settings_path = dir.join(SETTINGS_FILE);
        let schedules_path = dir.join(SCHEDULES_FILE);

        let settings = match read_file(&settings_path).await? {
            Some(raw) => match serde_json::from_slice::<Settings>(&raw) {
                Ok(mut settings) => {
                    settings.sanitize();
                    Some(settings)
                }
                Err(err) => {
                    set_aside(&settings_path, &anyhow::Error::from(err)).await?;
                    None
                }
            },
            None => None,
        };
        let settings = match settings {
            Some(settings) => settings,
            None => {
                let settings = Settings::default();
                write_json(&settings_path, &settings).await?;
                settings
            }
        };

        let schedules = match read_file(&schedules_path).await? {
            Some(raw) => match decode_schedules(&raw) {
                Ok((schedules, migrated)) => {
                    if migrated {
                        info!("migrated legacy schedules in {}", schedules_path.display());
                        write_json(&schedules_path, &schedules).await?;
                    }
                    Some(schedules)
                }
                Err(err) => {
                    set_aside(&schedules_path, &err).await?;
                    None
                }
            },
            None => None,
        };
        let schedules = match schedules {
            Some(schedules) => schedules,
            None => {
                let schedules = Schedules::default();
                write_json(&schedules_path, &schedules).await?;
                schedules
            }
        };

        Ok(Self {
            settings_path: Arc::new(settings_path),
            schedules_path: Arc::new(schedules_path),
            lock: Arc::new(Mutex::new(())),
            settings: Arc::new(Mutex::new(settings)),
            schedules: Arc::new(Mutex::new(schedules)),
        })
    }

    pub async fn settings(&self) -> Settings {
        self.settings.lock().await.clone()
    }

    pub async fn schedules(&self) -> Schedules {
        self.schedules.lock().await.clone()
    }

    pub async fn schedule_for_day(&self, side: Side, day: DayOfWeek) -> DailySchedule {
        self.schedules.lock().await.schedule_for_day(side, day).clone()
    }

    pub async fn update_settings(&self, update: &SettingsUpdate) -> anyhow::Result<Settings> {
        let _guard = self.lock.lock().await;
        let mut next = self.settings().await;
        next.apply(update)?;
        write_json(&self.settings_path, &next).await?;
        *self.settings.lock().await = next.clone();
        Ok(next)
    }

    pub async fn update_schedules(&self, update: &SchedulesUpdate) -> anyhow::Result<Schedules> {
        let _guard = self.lock.lock().await;
        let mut next = self.schedules().await;
        next.apply(update)?;
        write_json(&self.schedules_path, &next).await?;
        *self.schedules.lock().await = next.clone();
        Ok(next)
    }

    /// Ends away mode for `side` and forgets its return time.
    pub async fn resume_from_away(&self, side: Side) -> anyhow::Result<Settings> {
        let _guard = self.lock.lock().await;
        let mut next = self.settings().await;
        let side_settings = next.side_mut(side);
        side_settings.away_mode = false;
        side_settings.away_return = None;
        write_json(&self.settings_path, &next).await?;
        *self.settings.lock().await = next.clone();
        Ok(next)
    }
}

/// Decodes stored schedules, upgrading the legacy layout. The flag is set
/// when the result differs in shape from what is on disk.
fn decode_schedules(raw: &[u8]) -> anyhow::Result<(Schedules, bool)> {
    let value: Value = serde_json::from_slice(raw).context("not valid JSON")?;
    if migration::is_v2(&value) {
        let schedules = serde_json::from_value(value).context("invalid schedules")?;
        return Ok((schedules, false));
    }
    let schedules =
        serde_json::from_value(migration::migrate(value)).context("invalid legacy schedules")?;
    Ok((schedules, true))
}

async fn set_aside(path: &Path, err: &anyhow::Error) -> anyhow::Result<()> {
    let mut backup = path.as_os_str().to_owned();
    backup.push(".corrupt");
    let backup = PathBuf::from(backup);
    warn!(
        "failed to load {}: {err:#}; moving it to {} and starting from defaults",
        path.display(),
        backup.display()
    );
    tokio::fs::rename(path, &backup)
        .await
        .with_context(|| format!("failed to move {} aside", path.display()))
}

async fn read_file(path: &Path) -> anyhow::Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(raw) => Ok(Some(raw)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let payload = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, payload)
        .await
        .with_context(|| format!("failed to write {}", path.display()))
}
