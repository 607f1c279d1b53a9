//! Process-wide registry of site factories, one per tenant key.

use crate::error::FactoryError;
use crate::factory::{Factory, FactoryOptions};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::OnceCell;

/// Key shared by every caller when no tenant can be resolved.
pub const SINGLETON_KEY: &str = "__singleton__";
/// Environment variable naming the site.
pub const SITE_ENV: &str = "SITEKIT_SITE";
/// Host-provided server name, used when no site is named.
pub const SERVER_NAME_ENV: &str = "SERVER_NAME";
/// Most factories a registry builds before new keys share the singleton.
pub const DEFAULT_MAX_TENANTS: usize = 64;

/// Resolve a tenant key: explicit argument, then `SITEKIT_SITE`, then
/// `SERVER_NAME`, then the singleton key.
pub fn resolve_tenant_key(explicit: Option<&str>) -> String {
    resolve_with(explicit, |name| std::env::var(name).ok())
}

/// Like `resolve_tenant_key`, with the request's host standing in for
/// `SERVER_NAME`.
pub fn resolve_request_key(explicit: Option<&str>, host: Option<&str>) -> String {
    resolve_with(explicit, |name| match (name, host) {
        (SERVER_NAME_ENV, Some(h)) => Some(h.to_string()),
        _ => std::env::var(name).ok(),
    })
}

fn resolve_with(explicit: Option<&str>, env: impl Fn(&str) -> Option<String>) -> String {
    explicit
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .or_else(|| env(SITE_ENV).filter(|s| !s.trim().is_empty()))
        .or_else(|| env(SERVER_NAME_ENV).filter(|s| !s.trim().is_empty()))
        .unwrap_or_else(|| SINGLETON_KEY.to_string())
}

/// Tenant keys usable as a file name.
fn safe_file_stem(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

type Slot = Arc<OnceCell<Arc<Factory>>>;

pub struct InstanceRegistry {
    instances: RwLock<HashMap<String, Slot>>,
    defaults: FactoryOptions,
    site_config_dir: Option<PathBuf>,
    sites: BTreeSet<String>,
    max_tenants: usize,
}

impl InstanceRegistry {
    pub fn new(defaults: FactoryOptions) -> Self {
        InstanceRegistry {
            instances: RwLock::new(HashMap::new()),
            defaults,
            site_config_dir: None,
            sites: BTreeSet::new(),
            max_tenants: DEFAULT_MAX_TENANTS,
        }
    }

    /// Directory holding `<tenant>.conf` files appended to the default
    /// sources. Once set, only keys with a file or on the site list get
    /// their own factory.
    pub fn with_site_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.site_config_dir = Some(dir.into());
        self
    }

    /// Keys admitted without a config file. A non-empty list turns on the
    /// same restriction as a site config directory.
    pub fn with_sites<I, S>(mut self, sites: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sites.extend(sites.into_iter().map(Into::into));
        self
    }

    pub fn with_max_tenants(mut self, max: usize) -> Self {
        self.max_tenants = max;
        self
    }

    fn site_file(&self, key: &str) -> Option<PathBuf> {
        let dir = self.site_config_dir.as_ref()?;
        if !safe_file_stem(key) {
            return None;
        }
        let path = dir.join(format!("{}.conf", key));
        path.is_file().then_some(path)
    }

    /// Default construction arguments for `key`.
    pub fn options_for(&self, key: &str) -> FactoryOptions {
        let mut options = self.defaults.clone();
        if let Some(path) = self.site_file(key) {
            options.sources.push(path);
        }
        options
    }

    /// Key a request may use. Unknown sites and keys past the tenant limit
    /// share the singleton factory.
    pub fn admit(&self, key: String) -> String {
        if key == SINGLETON_KEY {
            return key;
        }
        let restricted = self.site_config_dir.is_some() || !self.sites.is_empty();
        if restricted && !self.sites.contains(&key) && self.site_file(&key).is_none() {
            tracing::debug!(tenant = %key, "unknown site, using the default");
            return SINGLETON_KEY.to_string();
        }
        let map = self.instances.read().unwrap_or_else(PoisonError::into_inner);
        if !map.contains_key(&key) && map.len() >= self.max_tenants {
            tracing::warn!(tenant = %key, limit = self.max_tenants, "tenant limit reached, using the default");
            return SINGLETON_KEY.to_string();
        }
        key
    }

    /// The factory for a tenant, built on first use with the default options.
    pub async fn instance(&self, tenant: Option<&str>) -> Result<Arc<Factory>, FactoryError> {
        let key = self.admit(resolve_tenant_key(tenant));
        let options = self.options_for(&key);
        self.get_or_build(key, options).await
    }

    /// Like `instance`, with explicit construction arguments. They are used
    /// only when the factory does not exist yet.
    pub async fn instance_with(&self, tenant: Option<&str>, options: FactoryOptions) -> Result<Arc<Factory>, FactoryError> {
        let key = self.admit(resolve_tenant_key(tenant));
        self.get_or_build(key, options).await
    }

    async fn get_or_build(&self, key: String, options: FactoryOptions) -> Result<Arc<Factory>, FactoryError> {
        let slot = self.slot(&key);
        if let Some(factory) = slot.get() {
            if let Err(e) = factory.refresh_config() {
                tracing::warn!(tenant = %key, error = %e, "config refresh failed, keeping current config");
            }
            return Ok(factory.clone());
        }
        let factory = slot
            .get_or_try_init(|| async {
                tracing::debug!(tenant = %key, "building site factory");
                Factory::new(&key, options).map(Arc::new)
            })
            .await?;
        Ok(factory.clone())
    }

    /// The slot for `key`, inserted if absent. Every caller for one key gets the same slot.
    fn slot(&self, key: &str) -> Slot {
        if let Some(slot) = self
            .instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
        {
            return slot.clone();
        }
        self.instances
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    /// Already built factory for `key`, if any.
    pub fn get(&self, key: &str) -> Option<Arc<Factory>> {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .and_then(|slot| slot.get().cloned())
    }

    /// Keys with a built factory, sorted.
    pub fn tenants(&self) -> Vec<String> {
        let map = self.instances.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = map
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Drop a tenant's factory. Callers still holding it keep a working copy.
    pub fn remove(&self, key: &str) -> bool {
        self.instances
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.tenants().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{ClassCatalog, ClassDef, DataClass, TableClass};
    use crate::config::ConfigValue;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[test]
    fn tenant_key_resolution_order() {
        let env = |vars: &'static [(&'static str, &'static str)]| {
            move |name: &str| vars.iter().find(|(k, _)| *k == name).map(|(_, v)| v.to_string())
        };
        let both: &'static [(&str, &str)] = &[(SITE_ENV, "env-site"), (SERVER_NAME_ENV, "host.example")];
        let host_only: &'static [(&str, &str)] = &[(SERVER_NAME_ENV, "host.example")];
        assert_eq!(resolve_with(Some("given"), env(both)), "given");
        assert_eq!(resolve_with(None, env(both)), "env-site");
        assert_eq!(resolve_with(Some("  "), env(host_only)), "host.example");
        assert_eq!(resolve_with(None, env(&[])), SINGLETON_KEY);
    }

    #[test]
    fn unsafe_keys_never_name_files() {
        assert!(safe_file_stem("music.example"));
        assert!(!safe_file_stem("../etc/passwd"));
        assert!(!safe_file_stem(".hidden"));
    }

    fn counting_options(builds: Arc<AtomicUsize>) -> FactoryOptions {
        let mut catalog = ClassCatalog::new();
        catalog.register("music::Cd", move || {
            builds.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(TableClass::new(ClassDef::new("music::Cd", "cd", &["title"]))) as Arc<dyn DataClass>)
        });
        FactoryOptions::new(Arc::new(catalog)).set("class", ConfigValue::List(vec!["music::Cd".into()]))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_calls_share_one_factory() {
        let builds = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(InstanceRegistry::new(counting_options(builds.clone())));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move { registry.instance(Some("a")).await.unwrap() }));
        }
        let mut factories = Vec::new();
        for h in handles {
            factories.push(h.await.unwrap());
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(factories.iter().all(|f| Arc::ptr_eq(f, &factories[0])));
        assert_eq!(registry.tenants(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn tenants_get_separate_factories() {
        let registry = InstanceRegistry::new(counting_options(Arc::new(AtomicUsize::new(0))));
        let a = registry.instance(Some("a")).await.unwrap();
        let b = registry.instance(Some("b")).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(b.tenant(), "b");
        assert_eq!(registry.len(), 2);
        assert!(registry.remove("a"));
        let a2 = registry.instance(Some("a")).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &a2));
    }

    #[tokio::test]
    async fn failed_construction_is_retried() {
        let registry = InstanceRegistry::new(
            FactoryOptions::default().set("class", ConfigValue::List(vec!["music::Missing".into()])),
        );
        assert!(registry.instance(Some("x")).await.is_err());
        assert!(registry.get("x").is_none());
        let ok = registry.instance_with(Some("x"), FactoryOptions::default()).await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn per_site_config_files_are_appended() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("site.conf"), "site_name = default\npage_size = 5\n").unwrap();
        fs::write(dir.path().join("jazz.conf"), "site_name = Jazz\n").unwrap();
        let registry = InstanceRegistry::new(FactoryOptions::default().source(dir.path().join("site.conf")))
            .with_site_config_dir(dir.path());
        let jazz = registry.instance(Some("jazz")).await.unwrap();
        let other = registry.instance(Some("rock")).await.unwrap();
        assert_eq!(jazz.settings().site_name, "Jazz");
        assert_eq!(jazz.settings().page_size, 5);
        assert_eq!(other.settings().site_name, "default");
    }

    #[tokio::test]
    async fn unknown_sites_share_the_default_factory() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("jazz.conf"), "site_name = Jazz\n").unwrap();
        let registry = InstanceRegistry::new(FactoryOptions::default())
            .with_site_config_dir(dir.path())
            .with_sites(["rock"]);
        for i in 0..50 {
            let factory = registry.instance(Some(&format!("junk-{}", i))).await.unwrap();
            assert_eq!(factory.tenant(), SINGLETON_KEY);
        }
        assert_eq!(registry.instance(Some("jazz")).await.unwrap().tenant(), "jazz");
        assert_eq!(registry.instance(Some("rock")).await.unwrap().tenant(), "rock");
        assert_eq!(
            registry.tenants(),
            vec![SINGLETON_KEY.to_string(), "jazz".to_string(), "rock".to_string()]
        );
    }

    #[tokio::test]
    async fn open_registries_stop_at_the_tenant_limit() {
        let registry = InstanceRegistry::new(FactoryOptions::default()).with_max_tenants(3);
        for i in 0..20 {
            registry.instance(Some(&format!("t{}", i))).await.unwrap();
        }
        assert_eq!(registry.len(), 4);
        assert!(registry.get("t2").is_some());
        assert!(registry.get("t3").is_none());
        assert!(registry.get(SINGLETON_KEY).is_some());
        let again = registry.instance(Some("t1")).await.unwrap();
        assert_eq!(again.tenant(), "t1");
    }
}
