use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;
use speakcore_core::config::AppConfig;

/// Top-level sections every config must have, checked by
/// [`ConfigStore::validate_before_save`]. Named after this workspace's own
/// `AppConfig` sections rather than the upstream names they were derived from.
const REQUIRED_SECTIONS: [&str; 3] = ["defaults", "profiles", "prompts"];

const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// Payload for the `config.corrupted` event published by
/// [`ConfigStore::load_or_recover`].
#[derive(Debug, Clone)]
pub struct ConfigCorruptedEvent {
    pub path: PathBuf,
    pub backup_path: Option<PathBuf>,
}

/// A fresh, schema-valid config built from this workspace's own defaults,
/// used to boot when the file on disk is missing or unreadable.
fn default_config() -> AppConfig {
    AppConfig {
        defaults: crate::defaults::default_global_defaults(),
        profiles: Vec::new(),
        prompts: crate::defaults::default_prompt_templates(),
        llm_api_key_present: false,
    }
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> anyhow::Result<AppConfig> {
        let bytes = std::fs::read(&self.path)
            .with_context(|| format!("read config: {}", self.path.display()))?;
        let cfg: AppConfig = serde_json::from_slice(&bytes).context("decode config JSON")?;
        Ok(cfg)
    }

    /// Loads the config, recovering from a missing or malformed file instead
    /// of failing the caller's startup: a malformed file is renamed aside
    /// (`<name>.corrupted-<unix_ms>`) so it isn't silently lost, a
    /// `config.corrupted{path, backup_path}` event is published if `events`
    /// is given, and the process boots with `default_config()` in memory
    /// (not written back to disk until the caller explicitly saves, so a
    /// read-only filesystem still boots rather than failing twice). A
    /// missing file (first run) is treated the same way, minus the backup
    /// step, since there is nothing corrupted to preserve.
    pub fn load_or_recover(&self, events: Option<&speakcore_registry::EventBus>) -> AppConfig {
        match self.load() {
            Ok(cfg) => cfg,
            Err(err) => {
                let existed = self.path.exists();
                let mut backup_path = None;

                if existed {
                    let unix_ms = std::time::SystemTime::now()
                        .duration_since(std::time::UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_millis();
                    let backup = self
                        .path
                        .with_file_name(format!(
                            "{}.corrupted-{unix_ms}",
                            self.path
                                .file_name()
                                .map(|n| n.to_string_lossy().into_owned())
                                .unwrap_or_else(|| "config.json".to_string())
                        ));
                    if std::fs::rename(&self.path, &backup).is_ok() {
                        backup_path = Some(backup);
                    }
                    log::warn!(
                        "config at {} failed to load ({err}); backing up and booting with defaults",
                        self.path.display()
                    );
                }

                if let Some(bus) = events {
                    bus.publish(
                        "config.corrupted",
                        &ConfigCorruptedEvent {
                            path: self.path.clone(),
                            backup_path,
                        },
                    );
                }

                default_config()
            }
        }
    }

    pub fn save(&self, cfg: &AppConfig) -> anyhow::Result<()> {
        let value = serde_json::to_value(cfg).context("encode config to value")?;
        Self::validate_before_save(&value)?;

        let json = serde_json::to_vec_pretty(cfg).context("encode config JSON")?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create config directory: {}", parent.display()))?;
        }

        // Atomic-ish write: write temp then replace.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).with_context(|| format!("write temp: {}", tmp.display()))?;
        crate::models::replace_file(&tmp, &self.path)
            .with_context(|| format!("replace file: {}", self.path.display()))?;
        Ok(())
    }

    /// Schema check run before every save: the required top-level sections
    /// must be present, so a partially-built or corrupted in-memory config
    /// can never get written to disk.
    pub fn validate_before_save(value: &serde_json::Value) -> anyhow::Result<()> {
        let obj = value
            .as_object()
            .ok_or_else(|| anyhow::anyhow!("config root is not an object"))?;
        for section in REQUIRED_SECTIONS {
            if !obj.contains_key(section) {
                anyhow::bail!("config missing required section: {section}");
            }
        }
        Ok(())
    }

    /// Reads a single value out of the config tree by dotted path (e.g.
    /// `"defaults.llm_model"`). The typed `AppConfig` stays canonical; this is
    /// a `serde_json::Value` view used for reload diffing and ad hoc
    /// inspection of fields a caller doesn't want to deserialize the whole
    /// struct for.
    pub fn get_path(&self, dotted: &str) -> anyhow::Result<Option<serde_json::Value>> {
        let cfg = self.load()?;
        let value = serde_json::to_value(cfg).context("encode config to value")?;
        Ok(walk_path(&value, dotted).cloned())
    }

    /// Sets a single value by dotted path and saves immediately. Intermediate
    /// objects are created as needed; the final config is validated the same
    /// way [`save`](Self::save) validates a typed `AppConfig`.
    pub fn set_path(&self, dotted: &str, new_value: serde_json::Value) -> anyhow::Result<()> {
        let cfg = self.load()?;
        let mut value = serde_json::to_value(cfg).context("encode config to value")?;
        set_path_mut(&mut value, dotted, new_value)?;
        Self::validate_before_save(&value)?;
        let cfg: AppConfig = serde_json::from_value(value).context("decode config from value")?;
        self.save(&cfg)
    }
}

fn walk_path<'a>(value: &'a serde_json::Value, dotted: &str) -> Option<&'a serde_json::Value> {
    let mut current = value;
    for segment in dotted.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn set_path_mut(
    value: &mut serde_json::Value,
    dotted: &str,
    new_value: serde_json::Value,
) -> anyhow::Result<()> {
    let segments: Vec<&str> = dotted.split('.').collect();
    let Some((last, parents)) = segments.split_last() else {
        anyhow::bail!("empty dotted path");
    };

    let mut current = value;
    for segment in parents {
        if !current.is_object() {
            *current = serde_json::Value::Object(serde_json::Map::new());
        }
        current = current
            .as_object_mut()
            .expect("just ensured object")
            .entry(segment.to_string())
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
    }

    if !current.is_object() {
        *current = serde_json::Value::Object(serde_json::Map::new());
    }
    current
        .as_object_mut()
        .expect("just ensured object")
        .insert(last.to_string(), new_value);
    Ok(())
}

enum DebounceCmd {
    Set(AppConfig),
    Flush,
    Shutdown,
}

/// Coalesces rapid `set()` calls into one save every [`DEBOUNCE_WINDOW`],
/// mirroring the audio recorder's dedicated-worker-thread shape: a command
/// channel feeds a background thread that owns the actual I/O, and dropping
/// the handle joins that thread after flushing anything pending.
pub struct DebouncedConfigStore {
    cmd_tx: mpsc::Sender<DebounceCmd>,
    worker_handle: Option<std::thread::JoinHandle<()>>,
}

impl DebouncedConfigStore {
    pub fn new(store: ConfigStore) -> Self {
        Self::new_with_events(store, None)
    }

    /// Like [`new`](Self::new), but publishes `config.changed` on `events`
    /// after every successful flush, so other services (reload coordinator,
    /// UI) can react to a saved config without polling the file.
    pub fn new_with_events(store: ConfigStore, events: Option<speakcore_registry::EventBus>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel::<DebounceCmd>();
        let pending: Arc<Mutex<Option<AppConfig>>> = Arc::new(Mutex::new(None));

        let worker_handle = std::thread::spawn(move || {
            let flush = |pending: &Arc<Mutex<Option<AppConfig>>>| {
                if let Some(cfg) = pending.lock().expect("debounce mutex poisoned").take() {
                    if store.save(&cfg).is_ok() {
                        if let Some(bus) = &events {
                            bus.publish("config.changed", &cfg);
                        }
                    }
                }
            };

            loop {
                match cmd_rx.recv_timeout(DEBOUNCE_WINDOW) {
                    Ok(DebounceCmd::Set(cfg)) => {
                        *pending.lock().expect("debounce mutex poisoned") = Some(cfg);
                    }
                    Ok(DebounceCmd::Flush) => flush(&pending),
                    Ok(DebounceCmd::Shutdown) => {
                        flush(&pending);
                        break;
                    }
                    Err(mpsc::RecvTimeoutError::Timeout) => flush(&pending),
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        Self {
            cmd_tx,
            worker_handle: Some(worker_handle),
        }
    }

    /// Queues `cfg` to be saved within the debounce window. Multiple calls
    /// before the window elapses collapse into a single save of the latest
    /// value.
    pub fn set(&self, cfg: AppConfig) {
        let _ = self.cmd_tx.send(DebounceCmd::Set(cfg));
    }

    /// Forces an immediate flush of any pending save without waiting out the
    /// debounce window.
    pub fn flush(&self) {
        let _ = self.cmd_tx.send(DebounceCmd::Flush);
    }

    /// Flushes any pending save and joins the background thread.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        let _ = self.cmd_tx.send(DebounceCmd::Shutdown);
        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DebouncedConfigStore {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}
