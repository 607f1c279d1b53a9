//! Typed settings resolved from a ConfigStore snapshot.

use crate::config::ConfigStore;
use crate::error::ConfigError;
use crate::session::DEFAULT_SESSION_TTL;
use crate::store::{ConnectParams, Driver};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const DEFAULT_SESSION_COOKIE: &str = "sitekit_session";

#[derive(Clone, Debug)]
pub struct Settings {
    pub site_name: String,
    pub classes: Vec<String>,
    pub connect: ConnectParams,
    pub template_root: Option<PathBuf>,
    pub template_dirs: Vec<PathBuf>,
    pub template_subdirs: Vec<String>,
    pub template_extension: String,
    pub throw_errors: bool,
    pub strict_classes: bool,
    pub tasks: Vec<String>,
    pub permitted_views: Vec<String>,
    pub restricted_views: Vec<String>,
    pub restricted_ops: Vec<String>,
    pub admin_users: Vec<String>,
    pub session_cookie: String,
    pub session_ttl: Duration,
    /// Sign-in passwords by user name.
    pub credentials: BTreeMap<String, String>,
    pub page_size: u32,
    pub default_view: String,
    pub operator_email: Option<String>,
    pub base_url: String,
    /// Extra operation names: alias -> allow-listed operation.
    pub operations: BTreeMap<String, String>,
    pub view_status: BTreeMap<String, u16>,
    pub refresh_interval: Option<Duration>,
}

fn parse_num<T: std::str::FromStr>(name: &str, value: Option<&str>) -> Result<Option<T>, ConfigError> {
    match value {
        None => Ok(None),
        Some(v) => v
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                name: name.to_string(),
                value: v.to_string(),
            }),
    }
}

fn resolve_path(base: &Path, p: &str) -> PathBuf {
    let path = PathBuf::from(p);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

impl Settings {
    /// Resolve from a store. Relative paths resolve against the directory of
    /// the first top-level source.
    pub fn from_store(store: &ConfigStore) -> Result<Settings, ConfigError> {
        let base = store
            .sources()
            .first()
            .and_then(|p| p.parent())
            .map(Path::to_path_buf)
            .unwrap_or_default();

        let driver = match store.scalar("db_driver") {
            Some(d) => d.parse::<Driver>().map_err(|_| ConfigError::InvalidValue {
                name: "db_driver".into(),
                value: d.to_string(),
            })?,
            None => Driver::Memory,
        };
        let site_name = store.scalar("site_name").unwrap_or("sitekit").to_string();
        let connect = ConnectParams {
            driver,
            dsn: store.scalar("db_dsn").map(String::from),
            name: store.scalar("db_name").unwrap_or(&site_name).to_string(),
            host: store.scalar("db_host").map(String::from),
            port: parse_num::<u16>("db_port", store.scalar("db_port"))?,
            user: store.scalar("db_user").map(String::from),
            password: store.scalar("db_password").map(String::from),
            options: store.map("db_option").cloned().unwrap_or_default(),
        };

        let mut view_status = BTreeMap::new();
        if let Some(m) = store.map("view_status") {
            for (view, code) in m {
                let code = parse_num::<u16>("view_status", Some(code))?.unwrap_or(200);
                view_status.insert(view.clone(), code);
            }
        }

        Ok(Settings {
            classes: store.list("class").to_vec(),
            connect,
            template_root: store.scalar("template_root").map(|p| resolve_path(&base, p)),
            template_dirs: store
                .list("template_dir")
                .iter()
                .map(|p| resolve_path(&base, p))
                .collect(),
            template_subdirs: store.list("template_subdir").to_vec(),
            template_extension: store
                .scalar("template_extension")
                .unwrap_or("hbs")
                .trim_start_matches('.')
                .to_string(),
            throw_errors: store.flag("throw_errors").unwrap_or(true),
            strict_classes: store.flag("strict_classes").unwrap_or(true),
            tasks: store.list("task").to_vec(),
            permitted_views: store.list("permitted_view").to_vec(),
            restricted_views: store.list("restricted_view").to_vec(),
            restricted_ops: store.list("restricted_op").to_vec(),
            admin_users: store.list("admin_user").to_vec(),
            session_cookie: store
                .scalar("session_cookie")
                .unwrap_or(DEFAULT_SESSION_COOKIE)
                .to_string(),
            session_ttl: parse_num::<u64>("session_ttl", store.scalar("session_ttl"))?
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_SESSION_TTL),
            credentials: store.map("credential").cloned().unwrap_or_default(),
            page_size: parse_num::<u32>("page_size", store.scalar("page_size"))?
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .max(1),
            default_view: store.scalar("default_view").unwrap_or("frontpage").to_string(),
            operator_email: store.scalar("operator_email").map(String::from),
            base_url: store.scalar("base_url").unwrap_or("/").to_string(),
            operations: store.map("operation").cloned().unwrap_or_default(),
            view_status,
            refresh_interval: store.refresh_interval(),
            site_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigValue;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn defaults_apply_to_an_empty_store() {
        let settings = Settings::from_store(&ConfigStore::empty()).unwrap();
        assert_eq!(settings.connect.driver, Driver::Memory);
        assert!(settings.throw_errors);
        assert!(settings.strict_classes);
        assert_eq!(settings.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(settings.session_cookie, DEFAULT_SESSION_COOKIE);
        assert_eq!(settings.template_extension, "hbs");
        assert_eq!(settings.session_ttl, DEFAULT_SESSION_TTL);
        assert!(settings.credentials.is_empty());
    }

    #[test]
    fn relative_paths_resolve_against_first_source() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("site.conf");
        fs::write(&src, "template_root = tmpl\ntemplate_dir = /abs/dir\ntemplate_subdir = base\n").unwrap();
        let settings = Settings::from_store(&ConfigStore::load(&[src])).unwrap();
        assert_eq!(settings.template_root, Some(dir.path().join("tmpl")));
        assert_eq!(settings.template_dirs, vec![PathBuf::from("/abs/dir")]);
        assert_eq!(settings.template_subdirs, vec!["base".to_string()]);
    }

    #[test]
    fn bad_numbers_are_config_errors() {
        let mut store = ConfigStore::empty();
        store.set("db_port", ConfigValue::Scalar("eighty".into())).unwrap();
        let err = Settings::from_store(&store).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref name, .. } if name == "db_port"));
    }

    #[test]
    fn flags_read_common_spellings() {
        let mut store = ConfigStore::empty();
        store.set("throw_errors", ConfigValue::Scalar("no".into())).unwrap();
        store.set("strict_classes", ConfigValue::Scalar("0".into())).unwrap();
        let settings = Settings::from_store(&store).unwrap();
        assert!(!settings.throw_errors);
        assert!(!settings.strict_classes);
    }
}
