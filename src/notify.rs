//! Operator notification channel.

use std::sync::{Mutex, PoisonError};

pub trait Notifier: Send + Sync {
    fn notify(&self, subject: &str, detail: &str);
}

/// Writes notifications to the error log, addressed to the site operator.
pub struct LogNotifier {
    site: String,
    recipient: Option<String>,
}

impl LogNotifier {
    pub fn new(site: &str, recipient: Option<&str>) -> Self {
        LogNotifier {
            site: site.to_string(),
            recipient: recipient.map(String::from),
        }
    }
}

impl Notifier for LogNotifier {
    fn notify(&self, subject: &str, detail: &str) {
        tracing::error!(
            site = %self.site,
            to = self.recipient.as_deref().unwrap_or("-"),
            subject,
            detail,
            "operator notification"
        );
    }
}

/// Keeps notifications in memory.
#[derive(Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// (subject, detail) pairs in order sent.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, subject: &str, detail: &str) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((subject.to_string(), detail.to_string()));
    }
}
