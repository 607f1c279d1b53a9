//! sitekit: multi-site data framework. One factory per site resolves data
//! classes by moniker and dispatches operations to them; a per-request task
//! sequence turns an HTTP request into a rendered page.

pub mod class;
pub mod config;
pub mod error;
pub mod extractors;
pub mod factory;
pub mod ghost;
pub mod handler;
pub mod handlers;
pub mod notify;
pub mod routes;
pub mod session;
pub mod sql;
pub mod state;
pub mod store;
pub mod template;
pub mod tenant;

pub use class::{ClassCatalog, ClassDef, DataClass, TableClass};
pub use config::{ConfigStore, ConfigValue, Settings};
pub use error::{AppError, ClassError, ConfigError, FactoryError, HandlerError, StoreError};
pub use factory::{Factory, FactoryOptions, ListQuery, Operation, Outcome, Pager};
pub use ghost::{Entity, Ghost, RowLike, Thing};
pub use handler::{Request, RequestHandler, Response};
pub use notify::{LogNotifier, MemoryNotifier, Notifier};
pub use routes::{common_routes, site_routes};
pub use session::SessionStore;
pub use state::AppState;
pub use store::{MemoryStore, Store};
pub use tenant::{resolve_tenant_key, InstanceRegistry};
