//! Per-site facade: configuration snapshot, loaded classes, lazily built
//! resources and the generic operation surface keyed by moniker.

mod dispatch;
mod pager;

pub use dispatch::{Call, Operation, Outcome};
pub use pager::{ListQuery, Pager};

use crate::class::{ClassCatalog, ClassCx, ClassRegistry, ClassRequest, ColumnSet, DataClass};
use crate::config::{ConfigStore, ConfigValue, Settings};
use crate::error::FactoryError;
use crate::ghost::Entity;
use crate::notify::{LogNotifier, Notifier};
use crate::session::SessionStore;
use crate::store::{self, Match, Row, Select, Store};
use crate::template::TemplateEngine;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use tokio::sync::OnceCell;

/// Largest page a listing serves, as a multiple of `page_size`.
pub const MAX_PAGE_FACTOR: u32 = 10;

/// Construction arguments for a factory.
#[derive(Clone)]
pub struct FactoryOptions {
    /// Config sources in load order.
    pub sources: Vec<PathBuf>,
    pub catalog: Arc<ClassCatalog>,
    /// Prebuilt store used instead of connecting from config.
    pub store: Option<Arc<dyn Store>>,
    pub notifier: Option<Arc<dyn Notifier>>,
    /// Extra operation names on top of the built-in allow-list.
    pub extra_operations: BTreeMap<String, Operation>,
    /// Values set after every load, overriding the sources.
    pub overrides: Vec<(String, ConfigValue)>,
}

impl Default for FactoryOptions {
    fn default() -> Self {
        FactoryOptions {
            sources: Vec::new(),
            catalog: Arc::new(ClassCatalog::new()),
            store: None,
            notifier: None,
            extra_operations: BTreeMap::new(),
            overrides: Vec::new(),
        }
    }
}

impl FactoryOptions {
    pub fn new(catalog: Arc<ClassCatalog>) -> Self {
        FactoryOptions {
            catalog,
            ..FactoryOptions::default()
        }
    }

    pub fn source(mut self, path: impl Into<PathBuf>) -> Self {
        self.sources.push(path.into());
        self
    }

    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn extra_operation(mut self, name: &str, op: Operation) -> Self {
        self.extra_operations.insert(name.to_string(), op);
        self
    }

    pub fn set(mut self, name: &str, value: ConfigValue) -> Self {
        self.overrides.push((name.to_string(), value));
        self
    }
}

/// One published configuration: the raw store and the settings resolved from it.
#[derive(Debug)]
pub struct ConfigSnapshot {
    pub store: ConfigStore,
    pub settings: Settings,
}

impl ConfigSnapshot {
    fn load(options: &FactoryOptions) -> Result<Self, FactoryError> {
        let mut store = ConfigStore::load(options.sources.as_slice());
        for (name, value) in &options.overrides {
            store.set(name, value.clone())?;
        }
        let settings = Settings::from_store(&store)?;
        Ok(ConfigSnapshot { store, settings })
    }

    fn class_requests(&self) -> Vec<ClassRequest> {
        self.settings
            .classes
            .iter()
            .map(|name| ClassRequest {
                name: name.clone(),
                package: self.store.package_of("class", name).map(String::from),
            })
            .collect()
    }
}

pub struct Factory {
    tenant: String,
    options: FactoryOptions,
    config: RwLock<Arc<ConfigSnapshot>>,
    classes: ClassRegistry,
    database: OnceCell<Arc<dyn Store>>,
    templates: RwLock<Option<Arc<TemplateEngine>>>,
    notifier: OnceLock<Arc<dyn Notifier>>,
    sessions: SessionStore,
}

impl Factory {
    /// Load configuration and classes for `tenant`.
    pub fn new(tenant: &str, options: FactoryOptions) -> Result<Factory, FactoryError> {
        let snapshot = ConfigSnapshot::load(&options)?;
        let classes = ClassRegistry::new();
        classes.load_all(
            &snapshot.class_requests(),
            &options.catalog,
            snapshot.settings.strict_classes,
            false,
        )?;
        tracing::info!(
            tenant = %tenant,
            site = %snapshot.settings.site_name,
            classes = classes.len(),
            "site factory built"
        );
        let sessions = SessionStore::new(snapshot.settings.session_ttl);
        Ok(Factory {
            tenant: tenant.to_string(),
            options,
            config: RwLock::new(Arc::new(snapshot)),
            classes,
            database: OnceCell::new(),
            templates: RwLock::new(None),
            notifier: OnceLock::new(),
            sessions,
        })
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Current configuration. Callers hold the snapshot they got; a refresh
    /// publishes a new one without touching it.
    pub fn config(&self) -> Arc<ConfigSnapshot> {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn settings(&self) -> Settings {
        self.config().settings.clone()
    }

    pub fn classes(&self) -> &ClassRegistry {
        &self.classes
    }

    pub fn class(&self, moniker: &str) -> Option<Arc<dyn DataClass>> {
        self.classes.get(moniker)
    }

    pub fn monikers(&self) -> Vec<String> {
        self.classes.monikers()
    }

    /// Rebuild the configuration if its sources changed. Only sites that
    /// declare `refresh_interval` are checked.
    pub fn refresh_config(&self) -> Result<bool, FactoryError> {
        let current = self.config();
        if current.settings.refresh_interval.is_none() || !current.store.is_stale() {
            return Ok(false);
        }
        tracing::info!(tenant = %self.tenant, "config sources changed, rebuilding");
        self.rebuild()?;
        Ok(true)
    }

    /// Reload every source and publish the result. Newly configured classes
    /// are added; loaded ones stay. Templates are read again on next use.
    pub fn rebuild(&self) -> Result<(), FactoryError> {
        let next = Arc::new(ConfigSnapshot::load(&self.options)?);
        self.classes.load_all(
            &next.class_requests(),
            &self.options.catalog,
            next.settings.strict_classes,
            true,
        )?;
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = next;
        *self.templates.write().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }

    /// Hand an error back to the caller, or stop outright when the site runs
    /// with `throw_errors = 0`.
    pub fn raise<T>(&self, err: FactoryError) -> Result<T, FactoryError> {
        if !self.config().settings.throw_errors {
            tracing::error!(tenant = %self.tenant, error = %err, "fatal error");
            panic!("{}", err);
        }
        Err(err)
    }

    /// Database handle, connected on first use.
    pub async fn database(&self) -> Result<Arc<dyn Store>, FactoryError> {
        let db = self
            .database
            .get_or_try_init(|| async {
                if let Some(store) = &self.options.store {
                    return Ok(store.clone());
                }
                let params = self.config().settings.connect.clone();
                store::connect(&params).await
            })
            .await?;
        Ok(db.clone())
    }

    /// Template engine for the current configuration, built on first use.
    pub fn templates(&self) -> Arc<TemplateEngine> {
        if let Some(engine) = self.templates.read().unwrap_or_else(PoisonError::into_inner).as_ref() {
            return engine.clone();
        }
        let mut slot = self.templates.write().unwrap_or_else(PoisonError::into_inner);
        slot.get_or_insert_with(|| Arc::new(TemplateEngine::from_settings(&self.config().settings)))
            .clone()
    }

    /// Signed-in sessions for this site.
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Operator channel.
    pub fn notifier(&self) -> Arc<dyn Notifier> {
        self.notifier
            .get_or_init(|| match &self.options.notifier {
                Some(n) => n.clone(),
                None => {
                    let settings = self.config().settings.clone();
                    Arc::new(LogNotifier::new(&settings.site_name, settings.operator_email.as_deref()))
                }
            })
            .clone()
    }

    /// Resolve an operation name against the allow-list, the `operation`
    /// config map and the extra operations given at construction.
    pub fn operation(&self, name: &str) -> Option<Operation> {
        if let Some(op) = Operation::from_name(name) {
            return Some(op);
        }
        if let Some(op) = self.options.extra_operations.get(name) {
            return Some(*op);
        }
        let config = self.config();
        let target = config.settings.operations.get(name)?;
        Operation::from_name(target)
    }

    /// Invoke an operation by name. Unknown operations always fail; an
    /// unknown moniker yields `Outcome::Nothing`.
    pub async fn invoke(&self, op_name: &str, moniker: &str, args: &[Value]) -> Result<Outcome, FactoryError> {
        let Some(op) = self.operation(op_name) else {
            return self.raise(FactoryError::UnknownOperation(op_name.to_string()));
        };
        if self.class(moniker).is_none() {
            tracing::debug!(operation = op.name(), moniker, "no class for moniker");
            return Ok(Outcome::Nothing);
        }
        let call = match Call::decode(op, args) {
            Ok(call) => call,
            Err(e) => return self.raise(e),
        };
        self.dispatch(moniker, call).await
    }

    /// Run a decoded call.
    pub async fn dispatch(&self, moniker: &str, call: Call) -> Result<Outcome, FactoryError> {
        Ok(match call {
            Call::Create(fields) => self.create(moniker, fields).await?.map_or(Outcome::Nothing, Outcome::One),
            Call::Retrieve(id) => self.retrieve(moniker, &id).await?.map_or(Outcome::Nothing, Outcome::One),
            Call::Search(criteria) => Outcome::Many(self.search(moniker, criteria).await?),
            Call::SearchLike(criteria) => Outcome::Many(self.search_like(moniker, criteria).await?),
            Call::CountAll => Outcome::Count(self.count_all(moniker).await?),
            Call::All => Outcome::Many(self.all(moniker).await?),
            Call::Columns(set) => Outcome::Columns(self.columns(moniker, set)),
            Call::FindColumn(name) => self.find_column(moniker, &name).map_or(Outcome::Nothing, Outcome::Column),
            Call::Update(id, changes) => self
                .update(moniker, &id, changes)
                .await?
                .map_or(Outcome::Nothing, Outcome::One),
            Call::Delete(id) => self.delete(moniker, &id).await?.map_or(Outcome::Nothing, Outcome::One),
            Call::List(query) => self.list(moniker, &query).await?.map_or(Outcome::Nothing, Outcome::Page),
        })
    }

    pub async fn create(&self, moniker: &str, fields: Row) -> Result<Option<Entity>, FactoryError> {
        let Some(class) = self.class(moniker) else { return Ok(None) };
        let db = self.database().await?;
        let row = class.create(self.cx(&*db), fields).await?;
        Ok(Some(Entity::from_row(moniker, class.primary_key(), row)))
    }

    pub async fn retrieve(&self, moniker: &str, id: &Value) -> Result<Option<Entity>, FactoryError> {
        let Some(class) = self.class(moniker) else { return Ok(None) };
        let db = self.database().await?;
        let row = class.retrieve(self.cx(&*db), id).await?;
        Ok(row.map(|r| Entity::from_row(moniker, class.primary_key(), r)))
    }

    pub async fn search(&self, moniker: &str, criteria: Vec<(String, Value)>) -> Result<Vec<Entity>, FactoryError> {
        self.select(moniker, criteria, Match::Exact).await
    }

    pub async fn search_like(&self, moniker: &str, criteria: Vec<(String, Value)>) -> Result<Vec<Entity>, FactoryError> {
        self.select(moniker, criteria, Match::Like).await
    }

    pub async fn all(&self, moniker: &str) -> Result<Vec<Entity>, FactoryError> {
        self.select(moniker, Vec::new(), Match::Exact).await
    }

    pub async fn count_all(&self, moniker: &str) -> Result<u64, FactoryError> {
        let Some(class) = self.class(moniker) else { return Ok(0) };
        let db = self.database().await?;
        Ok(class.count(self.cx(&*db), &[], Match::Exact).await?)
    }

    pub fn columns(&self, moniker: &str, set: ColumnSet) -> Vec<String> {
        self.class(moniker).map(|c| c.columns(set)).unwrap_or_default()
    }

    pub fn find_column(&self, moniker: &str, name: &str) -> Option<String> {
        self.class(moniker)?.find_column(name)
    }

    pub async fn update(&self, moniker: &str, id: &Value, changes: Row) -> Result<Option<Entity>, FactoryError> {
        let Some(class) = self.class(moniker) else { return Ok(None) };
        let db = self.database().await?;
        let row = class.update(self.cx(&*db), id, changes).await?;
        Ok(row.map(|r| Entity::from_row(moniker, class.primary_key(), r)))
    }

    pub async fn delete(&self, moniker: &str, id: &Value) -> Result<Option<Entity>, FactoryError> {
        let Some(class) = self.class(moniker) else { return Ok(None) };
        let db = self.database().await?;
        let row = class.delete(self.cx(&*db), id).await?;
        Ok(row.map(|r| Entity::from_row(moniker, class.primary_key(), r)))
    }

    /// One page of a class, counted and sorted.
    pub async fn list(&self, moniker: &str, query: &ListQuery) -> Result<Option<Pager>, FactoryError> {
        let Some(class) = self.class(moniker) else { return Ok(None) };
        let db = self.database().await?;
        let cx = self.cx(&*db);
        let page_size = self.config().settings.page_size;
        let per_page = query
            .per_page
            .unwrap_or(page_size)
            .clamp(1, page_size.saturating_mul(MAX_PAGE_FACTOR));
        let page = query.page.max(1);
        let total = class.count(cx, &query.criteria, query.matching).await?;
        let select = Select {
            criteria: query.criteria.clone(),
            matching: query.matching,
            sort: query.sort.clone().map(|s| (s, query.descending)),
            limit: Some(per_page),
            offset: Some(Pager::offset(page, per_page)),
        };
        let items = class
            .search(cx, &select)
            .await?
            .into_iter()
            .map(|r| Entity::from_row(moniker, class.primary_key(), r))
            .collect();
        Ok(Some(
            Pager::new(moniker, page, per_page, total, items).sorted(query.sort.clone(), query.descending),
        ))
    }

    async fn select(&self, moniker: &str, criteria: Vec<(String, Value)>, matching: Match) -> Result<Vec<Entity>, FactoryError> {
        let Some(class) = self.class(moniker) else { return Ok(Vec::new()) };
        let db = self.database().await?;
        let select = Select {
            criteria,
            matching,
            ..Select::default()
        };
        let rows = class.search(self.cx(&*db), &select).await?;
        Ok(rows
            .into_iter()
            .map(|r| Entity::from_row(moniker, class.primary_key(), r))
            .collect())
    }

    fn cx<'a>(&'a self, db: &'a dyn Store) -> ClassCx<'a> {
        ClassCx { factory: self, db }
    }
}
