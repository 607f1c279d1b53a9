//! Outgoing response and the writer that guards it once headers are sent.

use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub path: String,
    /// Seconds; `Some(0)` expires the cookie.
    pub max_age: Option<i64>,
}

impl Cookie {
    pub fn new(name: &str, value: &str) -> Self {
        Cookie {
            name: name.to_string(),
            value: value.to_string(),
            path: "/".to_string(),
            max_age: None,
        }
    }

    pub fn expired(name: &str) -> Self {
        Cookie {
            max_age: Some(0),
            ..Cookie::new(name, "")
        }
    }

    /// `Set-Cookie` header value.
    pub fn header_value(&self) -> String {
        let mut v = format!("{}={}; Path={}; HttpOnly", self.name, self.value, self.path);
        if let Some(age) = self.max_age {
            v.push_str(&format!("; Max-Age={}", age));
        }
        v
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: String,
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<Cookie>,
    pub body: String,
}

impl Default for Response {
    fn default() -> Self {
        Response {
            status: 200,
            content_type: "text/html; charset=utf-8".to_string(),
            headers: Vec::new(),
            cookies: Vec::new(),
            body: String::new(),
        }
    }
}

impl Response {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Builds one response. Status, content type, headers and cookies can change
/// only until the header is sent; later attempts are logged and ignored.
#[derive(Debug, Default)]
pub struct ResponseWriter {
    response: Response,
    header_sent: bool,
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header_sent(&self) -> bool {
        self.header_sent
    }

    fn open(&self, what: &str) -> bool {
        if self.header_sent {
            tracing::warn!(what, "header already sent, ignoring");
        }
        !self.header_sent
    }

    pub fn set_status(&mut self, status: u16) -> bool {
        if !self.open("status") {
            return false;
        }
        self.response.status = status;
        true
    }

    pub fn set_content_type(&mut self, content_type: &str) -> bool {
        if !self.open("content type") {
            return false;
        }
        self.response.content_type = content_type.to_string();
        true
    }

    pub fn set_header(&mut self, name: &str, value: &str) -> bool {
        if !self.open("header") {
            return false;
        }
        self.response.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.response.headers.push((name.to_string(), value.to_string()));
        true
    }

    /// Queue a cookie. A later cookie with the same name replaces it.
    pub fn set_cookie(&mut self, cookie: Cookie) -> bool {
        if !self.open("cookie") {
            return false;
        }
        self.response.cookies.retain(|c| c.name != cookie.name);
        self.response.cookies.push(cookie);
        true
    }

    /// 302 to `target`, keeping queued cookies. Sends the header.
    pub fn redirect(&mut self, target: &str) -> bool {
        if !self.open("redirect") {
            return false;
        }
        self.response.status = 302;
        self.set_header("Location", target);
        self.response.body.clear();
        self.header_sent = true;
        true
    }

    /// Freeze status, headers and cookies.
    pub fn send_header(&mut self) {
        self.header_sent = true;
    }

    pub fn write(&mut self, body: &str) {
        self.header_sent = true;
        self.response.body.push_str(body);
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.response.cookies
    }

    pub fn status(&self) -> u16 {
        self.response.status
    }

    pub fn finish(self) -> Response {
        self.response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookies_are_rejected_once_the_header_is_sent() {
        let mut out = ResponseWriter::new();
        assert!(out.set_cookie(Cookie::new("a", "1")));
        out.send_header();
        assert!(!out.set_cookie(Cookie::new("b", "2")));
        assert!(!out.redirect("/elsewhere"));
        assert!(!out.set_status(500));
        let res = out.finish();
        assert_eq!(res.cookies, vec![Cookie::new("a", "1")]);
        assert_eq!(res.status, 200);
        assert!(res.header("location").is_none());
    }

    #[test]
    fn redirect_keeps_pending_cookies() {
        let mut out = ResponseWriter::new();
        out.set_cookie(Cookie::new("flash", "saved"));
        assert!(out.redirect("/cd/1"));
        assert!(out.header_sent());
        let res = out.finish();
        assert_eq!(res.status, 302);
        assert_eq!(res.header("Location"), Some("/cd/1"));
        assert_eq!(res.cookies.len(), 1);
    }

    #[test]
    fn cookie_header_format() {
        assert_eq!(Cookie::new("s", "v").header_value(), "s=v; Path=/; HttpOnly");
        assert_eq!(Cookie::expired("s").header_value(), "s=; Path=/; HttpOnly; Max-Age=0");
    }
}
