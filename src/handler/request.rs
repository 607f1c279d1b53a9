//! Abstract inbound request: ordered multi-valued parameters, cookies,
//! path-info and uploads.

use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Upload {
    /// Form field name.
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug, Default)]
pub struct Request {
    params: Vec<(String, String)>,
    cookies: BTreeMap<String, String>,
    path_info: String,
    uploads: Vec<Upload>,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: append a parameter.
    pub fn param(mut self, name: &str, value: &str) -> Self {
        self.add(name, value);
        self
    }

    pub fn cookie_in(mut self, name: &str, value: &str) -> Self {
        self.cookies.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_path_info(mut self, path: &str) -> Self {
        self.path_info = path.to_string();
        self
    }

    pub fn with_upload(mut self, upload: Upload) -> Self {
        self.uploads.push(upload);
        self
    }

    /// First value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.params
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn has(&self, name: &str) -> bool {
        self.params.iter().any(|(k, _)| k == name)
    }

    pub fn add(&mut self, name: &str, value: &str) {
        self.params.push((name.to_string(), value.to_string()));
    }

    /// Replace every value of `name` with one value, keeping its first position.
    pub fn set(&mut self, name: &str, value: &str) {
        match self.params.iter().position(|(k, _)| k == name) {
            Some(i) => {
                self.params[i].1 = value.to_string();
                let mut seen = 0;
                self.params.retain(|(k, _)| {
                    if k != name {
                        return true;
                    }
                    seen += 1;
                    seen == 1
                });
            }
            None => self.add(name, value),
        }
    }

    pub fn delete(&mut self, name: &str) {
        self.params.retain(|(k, _)| k != name);
    }

    /// Distinct parameter names in first-seen order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for (k, _) in &self.params {
            if !names.contains(&k.as_str()) {
                names.push(k);
            }
        }
        names
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn path_info(&self) -> &str {
        &self.path_info
    }

    /// Non-empty path-info segments.
    pub fn path_segments(&self) -> Vec<&str> {
        self.path_info.split('/').filter(|s| !s.is_empty()).collect()
    }

    pub fn uploads(&self) -> &[Upload] {
        &self.uploads
    }

    pub fn upload(&self, name: &str) -> Option<&Upload> {
        self.uploads.iter().find(|u| u.name == name)
    }

    /// Parse a `Cookie` header value into the request's cookies.
    pub fn read_cookie_header(&mut self, header: &str) {
        for pair in header.split(';') {
            if let Some((k, v)) = pair.split_once('=') {
                let k = k.trim();
                if !k.is_empty() {
                    self.cookies.insert(k.to_string(), v.trim().to_string());
                }
            }
        }
    }
}
