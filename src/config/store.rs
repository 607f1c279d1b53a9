//! Layered configuration: ordered sources, cardinality-aware merging,
//! package provenance and whole-store rebuild on staleness.

use crate::config::parser::{parse, Assignment};
use crate::config::schema::{cardinality, Cardinality, INCLUDE_FILE, USE_PACKAGE};
use crate::error::ConfigError;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime};

/// Includes and packages nested deeper than this are ignored.
const MAX_DEPTH: usize = 8;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigValue {
    Scalar(String),
    List(Vec<String>),
    Map(BTreeMap<String, String>),
}

impl ConfigValue {
    fn kind(&self) -> &'static str {
        match self {
            ConfigValue::Scalar(_) => "scalar",
            ConfigValue::List(_) => "list",
            ConfigValue::Map(_) => "map",
        }
    }
}

/// Modification metadata for one file read during load.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Fingerprint {
    path: PathBuf,
    modified: Option<SystemTime>,
    len: Option<u64>,
}

impl Fingerprint {
    fn take(path: &Path) -> Self {
        let meta = std::fs::metadata(path).ok();
        Fingerprint {
            path: path.to_path_buf(),
            modified: meta.as_ref().and_then(|m| m.modified().ok()),
            len: meta.map(|m| m.len()),
        }
    }

    fn changed(&self) -> bool {
        Fingerprint::take(&self.path) != *self
    }
}

#[derive(Debug)]
pub struct ConfigStore {
    sources: Vec<PathBuf>,
    values: HashMap<String, ConfigValue>,
    /// name -> (value or map key -> package that declared it)
    provenance: HashMap<String, HashMap<String, String>>,
    fingerprints: Vec<Fingerprint>,
    /// Replace-list names already reset by the current top-level source.
    reset_this_source: HashSet<String>,
    last_checked: Mutex<Instant>,
}

impl ConfigStore {
    /// An empty store that knows no sources.
    pub fn empty() -> Self {
        ConfigStore {
            sources: Vec::new(),
            values: HashMap::new(),
            provenance: HashMap::new(),
            fingerprints: Vec::new(),
            reset_this_source: HashSet::new(),
            last_checked: Mutex::new(Instant::now()),
        }
    }

    /// Load every source in order. Unreadable sources are skipped.
    pub fn load<P: AsRef<Path>>(sources: &[P]) -> Self {
        let mut store = ConfigStore::empty();
        for src in sources {
            store.load_source(src.as_ref());
        }
        store
    }

    /// Merge one top-level source. Returns false when it could not be read.
    pub fn load_source(&mut self, path: &Path) -> bool {
        self.sources.push(path.to_path_buf());
        self.reset_this_source.clear();
        let ok = self.read_file(path, None, 0);
        *self.last_checked.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
        ok
    }

    fn read_file(&mut self, path: &Path, package: Option<&str>, depth: usize) -> bool {
        if depth > MAX_DEPTH {
            tracing::warn!(path = %path.display(), "config nesting too deep, skipping");
            return false;
        }
        self.fingerprints.push(Fingerprint::take(path));
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable config source");
                return false;
            }
        };
        tracing::debug!(path = %path.display(), package = ?package, "loading config source");
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let origin = path.display().to_string();
        for assignment in parse(&origin, &text) {
            self.apply(assignment, &dir, package, depth);
        }
        true
    }

    fn apply(&mut self, a: Assignment, dir: &Path, package: Option<&str>, depth: usize) {
        match a.name.as_str() {
            INCLUDE_FILE => {
                let target = dir.join(&a.value);
                self.read_file(&target, package, depth + 1);
            }
            USE_PACKAGE => {
                let package_dir = self
                    .scalar("package_dir")
                    .map(|d| dir.join(d))
                    .unwrap_or_else(|| dir.join("packages"));
                let name = a.value.clone();
                self.assign(&a, package);
                let file = package_dir.join(format!("{}.conf", name));
                if !self.read_file(&file, Some(&name), depth + 1) {
                    tracing::warn!(package = %name, "package not found, continuing without it");
                }
            }
            _ => self.assign(&a, package),
        }
    }

    fn assign(&mut self, a: &Assignment, package: Option<&str>) {
        let card = cardinality(&a.name);
        let provenance_key = match (card, &a.key) {
            (Cardinality::Map, Some(key)) => key.clone(),
            (Cardinality::Map, None) => {
                tracing::warn!(name = %a.name, line = a.line, "map parameter needs a key, skipping");
                return;
            }
            (_, Some(_)) => {
                tracing::warn!(name = %a.name, line = a.line, "unexpected key on {} parameter, skipping", card.label());
                return;
            }
            (_, None) => a.value.clone(),
        };
        match card {
            Cardinality::Scalar => {
                self.values.insert(a.name.clone(), ConfigValue::Scalar(a.value.clone()));
            }
            Cardinality::List | Cardinality::ReplaceList => {
                if card == Cardinality::ReplaceList && self.reset_this_source.insert(a.name.clone()) {
                    self.values.remove(&a.name);
                    self.provenance.remove(&a.name);
                }
                match self
                    .values
                    .entry(a.name.clone())
                    .or_insert_with(|| ConfigValue::List(Vec::new()))
                {
                    ConfigValue::List(items) => items.push(a.value.clone()),
                    other => *other = ConfigValue::List(vec![a.value.clone()]),
                }
            }
            Cardinality::Map => {
                let key = provenance_key.clone();
                match self
                    .values
                    .entry(a.name.clone())
                    .or_insert_with(|| ConfigValue::Map(BTreeMap::new()))
                {
                    ConfigValue::Map(map) => {
                        map.insert(key, a.value.clone());
                    }
                    other => *other = ConfigValue::Map(BTreeMap::from([(key, a.value.clone())])),
                }
            }
        }
        if let Some(pkg) = package {
            self.provenance
                .entry(a.name.clone())
                .or_default()
                .insert(provenance_key, pkg.to_string());
        }
    }

    pub fn get(&self, name: &str) -> Option<&ConfigValue> {
        self.values.get(name)
    }

    pub fn scalar(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(ConfigValue::Scalar(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// List values in load order; empty when unset.
    pub fn list(&self, name: &str) -> &[String] {
        match self.values.get(name) {
            Some(ConfigValue::List(items)) => items.as_slice(),
            _ => &[],
        }
    }

    pub fn map(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        match self.values.get(name) {
            Some(ConfigValue::Map(m)) => Some(m),
            _ => None,
        }
    }

    /// Scalar read as a boolean flag (`1`, `true`, `yes`, `on`).
    pub fn flag(&self, name: &str) -> Option<bool> {
        self.scalar(name).map(|v| {
            matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
    }

    /// Set a value directly. The variant must match the parameter's declared cardinality.
    pub fn set(&mut self, name: &str, value: ConfigValue) -> Result<(), ConfigError> {
        let expected = cardinality(name).label();
        if expected != value.kind() {
            return Err(ConfigError::Cardinality {
                name: name.to_string(),
                expected,
                got: value.kind(),
            });
        }
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    pub fn all_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.values.keys().cloned().collect();
        names.sort();
        names
    }

    /// Top-level sources in load order.
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    /// Package that declared `value` for `name` (for maps, `value` is the key).
    pub fn package_of(&self, name: &str, value: &str) -> Option<&str> {
        self.provenance
            .get(name)
            .and_then(|m| m.get(value))
            .map(String::as_str)
    }

    pub fn supplied_by(&self, name: &str, value: &str, package: &str) -> bool {
        self.package_of(name, value) == Some(package)
    }

    pub fn class_from_package(&self, class: &str, package: &str) -> bool {
        self.supplied_by("class", class, package)
    }

    pub fn view_from_package(&self, view: &str, package: &str) -> bool {
        self.supplied_by("permitted_view", view, package)
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        self.scalar("refresh_interval")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    /// True when any file read during load changed since. Inside the refresh
    /// interval this returns false without touching the filesystem.
    pub fn is_stale(&self) -> bool {
        {
            let mut last = self.last_checked.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(interval) = self.refresh_interval() {
                if last.elapsed() < interval {
                    return false;
                }
            }
            *last = Instant::now();
        }
        self.fingerprints.iter().any(Fingerprint::changed)
    }

    /// Rebuild from the initial source list when stale. Returns whether a
    /// rebuild happened.
    pub fn refresh(&mut self) -> bool {
        if !self.is_stale() {
            return false;
        }
        tracing::info!(sources = self.sources.len(), "config changed on disk, rebuilding");
        let sources = self.sources.clone();
        *self = ConfigStore::load(sources.as_slice());
        true
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        ConfigStore::empty()
    }
}
