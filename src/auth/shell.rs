//! # Shell Collaborators
//!
//! The host application renders notices and performs navigation. The
//! session layer only talks to these two traits.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{error, info, warn};

// ==================
// Notices
// ==================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Info,
    Error,
}

/// A user-visible notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub message: String,
}

impl Notice {
    pub fn success(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            title: title.into(),
            message: message.into(),
        }
    }
}

/// Shows notices to the visitor
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Moves the visitor to an in-app route or an external URL
pub trait Navigator: Send + Sync {
    fn navigate(&self, to: &str);
}

// ==================
// Implementations
// ==================

/// Notifier that writes notices to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Success | NoticeLevel::Info => {
                info!(title = %notice.title, "{}", notice.message)
            }
            NoticeLevel::Error => warn!(title = %notice.title, "{}", notice.message),
        }
    }
}

/// Navigator that only logs the destination
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNavigator;

impl Navigator for TracingNavigator {
    fn navigate(&self, to: &str) {
        info!(to = %to, "navigate");
    }
}

/// Notifier that keeps every notice
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<Notice> {
        match self.notices.lock() {
            Ok(notices) => notices.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn errors(&self) -> Vec<Notice> {
        self.notices()
            .into_iter()
            .filter(|n| n.level == NoticeLevel::Error)
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        match self.notices.lock() {
            Ok(mut notices) => notices.push(notice),
            Err(e) => error!(error = %e, "notice recorder poisoned"),
        }
    }
}

/// Navigator that keeps every destination
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    visits: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visits(&self) -> Vec<String> {
        match self.visits.lock() {
            Ok(visits) => visits.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn last(&self) -> Option<String> {
        self.visits().pop()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, to: &str) {
        match self.visits.lock() {
            Ok(mut visits) => visits.push(to.to_string()),
            Err(e) => error!(error = %e, "navigation recorder poisoned"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_notifier_filters_errors() {
        let notifier = RecordingNotifier::new();
        notifier.notify(Notice::success("Welcome", "Signed in"));
        notifier.notify(Notice::error("Oops", "Failed"));

        assert_eq!(notifier.notices().len(), 2);
        assert_eq!(notifier.errors(), vec![Notice::error("Oops", "Failed")]);
    }

    #[test]
    fn test_recording_navigator_keeps_order() {
        let navigator = RecordingNavigator::new();
        navigator.navigate("/login");
        navigator.navigate("/dashboard");

        assert_eq!(navigator.visits(), vec!["/login", "/dashboard"]);
        assert_eq!(navigator.last().as_deref(), Some("/dashboard"));
    }
}
