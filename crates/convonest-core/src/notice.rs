//! User-facing notices raised by the request gateway.
//!
//! The gateway decides *what* to tell the user; a `NoticeSink` decides how
//! (stderr in the CLI, a recording log in tests, `tracing` by default).

use std::sync::{Arc, Mutex, PoisonError};

use crate::error::GENERIC_ERROR_MESSAGE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    /// Must be acknowledged before continuing (session expired).
    Blocking,
    /// Shown without interrupting the user.
    Transient,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub text: String,
}

impl Notice {
    pub fn session_expired() -> Self {
        Self {
            level: NoticeLevel::Blocking,
            title: "Session expired".to_string(),
            text: "You are not authorized to access this resource. Please log in again."
                .to_string(),
        }
    }

    pub fn server_rejected(message: Option<&str>) -> Self {
        Self {
            level: NoticeLevel::Transient,
            title: "Request failed".to_string(),
            text: message.unwrap_or(GENERIC_ERROR_MESSAGE).to_string(),
        }
    }

    pub fn network_error() -> Self {
        Self {
            level: NoticeLevel::Transient,
            title: "Network error".to_string(),
            text: "Could not reach the server. Check your connection and try again.".to_string(),
        }
    }
}

pub trait NoticeSink: Send + Sync {
    fn notify(&self, notice: &Notice);
}

/// Sink that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotices;

impl NoticeSink for TracingNotices {
    fn notify(&self, notice: &Notice) {
        match notice.level {
            NoticeLevel::Blocking => tracing::error!(title = %notice.title, "{}", notice.text),
            NoticeLevel::Transient => tracing::warn!(title = %notice.title, "{}", notice.text),
        }
    }
}

/// Sink that records every notice, in order.
#[derive(Debug, Default, Clone)]
pub struct NoticeLog {
    notices: Arc<Mutex<Vec<Notice>>>,
}

impl NoticeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl NoticeSink for NoticeLog {
    fn notify(&self, notice: &Notice) {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notice.clone());
    }
}
