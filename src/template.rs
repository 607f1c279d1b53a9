//! Handlebars engine over the site's template search path.

use crate::config::Settings;
use handlebars::Handlebars;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("template not found: {0}")]
    NotFound(String),
    #[error("render {view}: {message}")]
    Render { view: String, message: String },
}

pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
    search_path: Vec<PathBuf>,
    extension: String,
}

impl TemplateEngine {
    /// Directories to search, highest priority first: every `template_dir` in
    /// declared order, then `template_root` joined with each
    /// `template_subdir`, last declared first. Missing directories are left out.
    pub fn search_path(settings: &Settings) -> Vec<PathBuf> {
        let mut path: Vec<PathBuf> = settings.template_dirs.clone();
        if let Some(root) = &settings.template_root {
            path.extend(settings.template_subdirs.iter().rev().map(|sub| root.join(sub)));
            if settings.template_subdirs.is_empty() {
                path.push(root.clone());
            }
        }
        path.retain(|dir| {
            let present = dir.is_dir();
            if !present {
                tracing::debug!(dir = %dir.display(), "template directory missing, skipped");
            }
            present
        });
        path
    }

    pub fn from_settings(settings: &Settings) -> Self {
        TemplateEngine::new(TemplateEngine::search_path(settings), &settings.template_extension)
    }

    /// Register every template on the path. Lower-priority directories are
    /// registered first so a template found earlier on the path replaces them.
    pub fn new(search_path: Vec<PathBuf>, extension: &str) -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.register_escape_fn(handlebars::html_escape);
        let extension = extension.trim_start_matches('.').to_string();
        for dir in search_path.iter().rev() {
            register_dir(&mut handlebars, dir, dir, &extension);
        }
        TemplateEngine {
            handlebars,
            search_path,
            extension,
        }
    }

    pub fn path(&self) -> &[PathBuf] {
        &self.search_path
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn has_template(&self, view: &str) -> bool {
        self.handlebars.has_template(view)
    }

    pub fn render<T: Serialize>(&self, view: &str, data: &T) -> Result<String, TemplateError> {
        if !self.has_template(view) {
            return Err(TemplateError::NotFound(view.to_string()));
        }
        self.handlebars
            .render(view, data)
            .map_err(|e| TemplateError::Render {
                view: view.to_string(),
                message: e.to_string(),
            })
    }
}

/// Register templates under `dir` recursively, named by their path relative
/// to `base` without extension. Unreadable files and parse errors are logged.
fn register_dir(handlebars: &mut Handlebars<'static>, base: &Path, dir: &Path, extension: &str) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "cannot read template directory");
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            register_dir(handlebars, base, &path, extension);
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        let name = path
            .strip_prefix(base)
            .unwrap_or(&path)
            .with_extension("")
            .to_string_lossy()
            .replace('\\', "/");
        let registered = fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|text| handlebars.register_template_string(&name, text).map_err(|e| e.to_string()));
        if let Err(e) = registered {
            tracing::warn!(template = %path.display(), error = %e, "skipping template");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigStore;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, body: &str) {
        let path = dir.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    fn settings(root: &Path) -> Settings {
        let mut s = Settings::from_store(&ConfigStore::empty()).unwrap();
        s.template_root = Some(root.join("root"));
        s.template_subdirs = vec!["base".into(), "app".into(), "missing".into()];
        s.template_dirs = vec![root.join("direct")];
        s
    }

    #[test]
    fn search_path_order() {
        let dir = TempDir::new().unwrap();
        for d in ["root/base", "root/app", "direct"] {
            fs::create_dir_all(dir.path().join(d)).unwrap();
        }
        let path = TemplateEngine::search_path(&settings(dir.path()));
        assert_eq!(
            path,
            vec![
                dir.path().join("direct"),
                dir.path().join("root/app"),
                dir.path().join("root/base"),
            ]
        );
    }

    #[test]
    fn earlier_directories_win() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "root/base/one.hbs", "base {{title}}");
        write(dir.path(), "root/base/list.hbs", "base list");
        write(dir.path(), "root/app/one.hbs", "app {{title}}");
        write(dir.path(), "direct/list.hbs", "direct list");
        write(dir.path(), "root/base/partial/row.hbs", "row");
        let engine = TemplateEngine::from_settings(&settings(dir.path()));
        assert_eq!(engine.render("one", &json!({"title": "T"})).unwrap(), "app T");
        assert_eq!(engine.render("list", &json!({})).unwrap(), "direct list");
        assert!(engine.has_template("partial/row"));
    }

    #[test]
    fn missing_views_are_reported() {
        let engine = TemplateEngine::new(Vec::new(), "hbs");
        assert!(matches!(engine.render("nope", &json!({})), Err(TemplateError::NotFound(_))));
    }
}
