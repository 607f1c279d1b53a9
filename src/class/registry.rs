//! Classes loaded for one factory, keyed by moniker in load order.

use super::{short_name, ClassCatalog, DataClass};
use crate::error::ClassError;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Display metadata recorded once per successful load.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ManagedClass {
    pub moniker: String,
    pub class_name: String,
    pub title: String,
    pub plural: String,
    pub description: Option<String>,
    /// Package the class was configured by, if any.
    pub package: Option<String>,
}

/// One configured class name and the package that declared it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassRequest {
    pub name: String,
    pub package: Option<String>,
}

impl ClassRequest {
    pub fn new(name: &str) -> Self {
        ClassRequest {
            name: name.to_string(),
            package: None,
        }
    }
}

struct Loaded {
    managed: Arc<ManagedClass>,
    class: Arc<dyn DataClass>,
}

#[derive(Default)]
struct Inner {
    by_moniker: HashMap<String, Loaded>,
    order: Vec<String>,
    /// class name -> moniker
    by_class: HashMap<String, String>,
    loaded: bool,
}

#[derive(Default)]
pub struct ClassRegistry {
    inner: RwLock<Inner>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load each requested class in order. A second call is a no-op unless
    /// `force` is set; forcing only adds classes not loaded yet and never
    /// replaces one. In strict mode the first failure is returned; otherwise
    /// failures are logged and skipped. Returns how many classes were added.
    pub fn load_all(
        &self,
        requests: &[ClassRequest],
        catalog: &ClassCatalog,
        strict: bool,
        force: bool,
    ) -> Result<usize, ClassError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.loaded && !force {
            return Ok(0);
        }
        inner.loaded = true;
        let mut added = 0;
        for req in requests {
            if inner.by_class.contains_key(&req.name) {
                continue;
            }
            let result = catalog
                .load(&req.name)
                .and_then(|class| assimilate(&mut inner, class, req.package.clone()));
            match result {
                Ok(moniker) => {
                    tracing::debug!(class = %req.name, moniker = %moniker, "class loaded");
                    added += 1;
                }
                Err(e) if strict => return Err(e),
                Err(e) => tracing::warn!(error = %e, "skipping class that failed to load"),
            }
        }
        Ok(added)
    }

    /// Monikers in load order.
    pub fn monikers(&self) -> Vec<String> {
        self.read().order.clone()
    }

    pub fn get(&self, moniker: &str) -> Option<Arc<dyn DataClass>> {
        self.read().by_moniker.get(moniker).map(|l| l.class.clone())
    }

    pub fn managed(&self, moniker: &str) -> Option<Arc<ManagedClass>> {
        self.read().by_moniker.get(moniker).map(|l| l.managed.clone())
    }

    pub fn moniker_for_class(&self, class_name: &str) -> Option<String> {
        self.read().by_class.get(class_name).cloned()
    }

    pub fn is_loaded(&self, class_name: &str) -> bool {
        self.read().by_class.contains_key(class_name)
    }

    /// Metadata for every class, in load order.
    pub fn all_managed(&self) -> Vec<Arc<ManagedClass>> {
        let inner = self.read();
        inner
            .order
            .iter()
            .filter_map(|m| inner.by_moniker.get(m).map(|l| l.managed.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Record a freshly loaded class under its moniker.
fn assimilate(inner: &mut Inner, class: Arc<dyn DataClass>, package: Option<String>) -> Result<String, ClassError> {
    let class_name = class.class_name().to_string();
    let info = class.info();
    let short = short_name(&class_name).to_string();
    let moniker = info.moniker.unwrap_or_else(|| short.to_lowercase());
    if let Some(existing) = inner.by_moniker.get(&moniker) {
        return Err(ClassError::DuplicateMoniker {
            moniker,
            class: class_name,
            existing: existing.managed.class_name.clone(),
        });
    }
    let title = info.title.unwrap_or(short);
    let plural = info.plural.unwrap_or_else(|| format!("{}s", title));
    let managed = Arc::new(ManagedClass {
        moniker: moniker.clone(),
        class_name: class_name.clone(),
        title,
        plural,
        description: info.description,
        package,
    });
    inner.by_class.insert(class_name, moniker.clone());
    inner.order.push(moniker.clone());
    inner.by_moniker.insert(moniker.clone(), Loaded { managed, class });
    Ok(moniker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::ClassDef;

    fn catalog() -> ClassCatalog {
        let mut c = ClassCatalog::new();
        c.define(ClassDef::new("music::Cd", "cd", &["title"]));
        c.define(ClassDef::new("music::Album", "album", &["title"]).title("Album", "Albums"));
        c.define(ClassDef::new("music::Disc", "disc", &["title"]).moniker("cd"));
        c.define(ClassDef::new("music::Person", "person", &["name"]).moniker("artist"));
        c
    }

    fn reqs(names: &[&str]) -> Vec<ClassRequest> {
        names.iter().map(|n| ClassRequest::new(n)).collect()
    }

    #[test]
    fn assimilate_derives_metadata_and_keeps_order() {
        let reg = ClassRegistry::new();
        let n = reg
            .load_all(&reqs(&["music::Person", "music::Cd"]), &catalog(), true, false)
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(reg.monikers(), vec!["artist", "cd"]);
        let cd = reg.managed("cd").unwrap();
        assert_eq!(cd.title, "Cd");
        assert_eq!(cd.plural, "Cds");
        assert_eq!(reg.moniker_for_class("music::Person").as_deref(), Some("artist"));
    }

    #[test]
    fn strict_mode_fails_on_unknown_class() {
        let reg = ClassRegistry::new();
        let err = reg
            .load_all(&reqs(&["music::Cd", "music::Nope"]), &catalog(), true, false)
            .unwrap_err();
        assert!(matches!(err, ClassError::Load { .. }));
    }

    #[test]
    fn lenient_mode_skips_failures() {
        let reg = ClassRegistry::new();
        let n = reg
            .load_all(&reqs(&["music::Nope", "music::Cd"]), &catalog(), false, false)
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(reg.monikers(), vec!["cd"]);
    }

    #[test]
    fn duplicate_moniker_rejects_the_later_class() {
        let reg = ClassRegistry::new();
        let err = reg
            .load_all(&reqs(&["music::Cd", "music::Disc"]), &catalog(), true, false)
            .unwrap_err();
        assert!(matches!(err, ClassError::DuplicateMoniker { ref existing, .. } if existing == "music::Cd"));
        assert_eq!(reg.get("cd").unwrap().class_name(), "music::Cd");
    }

    #[test]
    fn reload_is_a_noop_unless_forced_and_only_adds() {
        let reg = ClassRegistry::new();
        reg.load_all(&reqs(&["music::Cd"]), &catalog(), true, false).unwrap();
        let n = reg
            .load_all(&reqs(&["music::Cd", "music::Album"]), &catalog(), true, false)
            .unwrap();
        assert_eq!(n, 0);
        assert!(!reg.is_loaded("music::Album"));

        let n = reg
            .load_all(&reqs(&["music::Album"]), &catalog(), true, true)
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(reg.monikers(), vec!["cd", "album"]);
        assert_eq!(reg.all_managed()[1].plural, "Albums");
    }
}
