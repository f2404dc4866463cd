//! Operator-facing admin notices.
//!
//! Notices are queued during startup and handed to the admin page renderer on
//! each page load. Dismissible notices stay hidden once the operator dismisses
//! them; the dismissal is persisted in the option store as `dismissed-<type>`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::store::{OptionStore, StoreError};

const DISMISSED_PREFIX: &str = "dismissed-";

#[derive(Debug, Error)]
pub enum NoticeError {
    #[error("notice type is empty after sanitizing")]
    EmptyType,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    /// Short identifier, also used for the dismissal key.
    pub kind: String,
    pub level: NoticeLevel,
    pub message: String,
    pub dismissible: bool,
}

#[derive(Debug, Default)]
pub struct OperatorNotices {
    provider_conflict: AtomicBool,
    pending: Mutex<Vec<Notice>>,
}

impl OperatorNotices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Another module already provides JWT authentication.
    pub fn raise_provider_conflict(&self, holder: &str) {
        if self.provider_conflict.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!(holder, "jwt authentication already provided by another module");
        self.push(Notice {
            kind: "jwt-provider-conflict".to_string(),
            level: NoticeLevel::Error,
            message: format!(
                "For the mobile app to work, please remove this plugin: {holder}"
            ),
            dismissible: false,
        });
    }

    pub fn provider_conflict(&self) -> bool {
        self.provider_conflict.load(Ordering::SeqCst)
    }

    pub fn push(&self, notice: Notice) {
        let mut pending = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if pending.iter().any(|n| n.kind == notice.kind) {
            return;
        }
        pending.push(notice);
    }

    /// Notices to render for a single admin page load.
    pub fn take_for_page_load(&self, store: &dyn OptionStore) -> Result<Vec<Notice>, NoticeError> {
        let pending = match self.pending.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let mut visible = Vec::with_capacity(pending.len());
        for notice in pending {
            if notice.dismissible && is_dismissed(store, &notice.kind)? {
                continue;
            }
            visible.push(notice);
        }
        Ok(visible)
    }
}

/// Records that the operator dismissed notices of `kind`.
pub fn dismiss(store: &dyn OptionStore, kind: &str) -> Result<String, NoticeError> {
    let kind = sanitize_kind(kind);
    if kind.is_empty() {
        return Err(NoticeError::EmptyType);
    }
    let key = format!("{DISMISSED_PREFIX}{kind}");
    store.set(&key, "1")?;
    info!(key = %key, "notice dismissed");
    Ok(key)
}

pub fn is_dismissed(store: &dyn OptionStore, kind: &str) -> Result<bool, NoticeError> {
    let key = format!("{DISMISSED_PREFIX}{}", sanitize_kind(kind));
    Ok(matches!(store.get(&key)?.as_deref(), Some(v) if !v.is_empty() && v != "0"))
}

fn sanitize_kind(kind: &str) -> String {
    kind.trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{dismiss, is_dismissed, Notice, NoticeError, NoticeLevel, OperatorNotices};
    use crate::store::{MemoryStore, OptionStore};

    fn info_notice(kind: &str) -> Notice {
        Notice {
            kind: kind.to_string(),
            level: NoticeLevel::Info,
            message: "hello".to_string(),
            dismissible: true,
        }
    }

    #[test]
    fn conflict_notice_shows_on_every_page_load() {
        let store = MemoryStore::new();
        let notices = OperatorNotices::new();
        assert!(!notices.provider_conflict());

        notices.raise_provider_conflict("JWT Authentication for WP-API");
        notices.raise_provider_conflict("JWT Authentication for WP-API");
        assert!(notices.provider_conflict());

        let first = notices.take_for_page_load(&store).unwrap();
        let second = notices.take_for_page_load(&store).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first, second);
        assert!(first[0].message.contains("JWT Authentication for WP-API"));
        assert!(!first[0].dismissible);
    }

    #[test]
    fn dismissed_notices_are_hidden() {
        let store = MemoryStore::new();
        let notices = OperatorNotices::new();
        notices.push(info_notice("dt-mobile-app"));
        assert_eq!(notices.take_for_page_load(&store).unwrap().len(), 1);

        let key = dismiss(&store, " DT-Mobile-App<script>").unwrap();
        assert_eq!(key, "dismissed-dt-mobile-appscript");
        dismiss(&store, "dt-mobile-app").unwrap();
        assert!(is_dismissed(&store, "dt-mobile-app").unwrap());
        assert_eq!(store.get("dismissed-dt-mobile-app").unwrap().as_deref(), Some("1"));
        assert!(notices.take_for_page_load(&store).unwrap().is_empty());
    }

    #[test]
    fn rejects_empty_kind() {
        let store = MemoryStore::new();
        assert!(matches!(dismiss(&store, "<>"), Err(NoticeError::EmptyType)));
        assert!(store.is_empty());
    }

    #[test]
    fn duplicate_kinds_are_collapsed() {
        let notices = OperatorNotices::new();
        notices.push(info_notice("a"));
        notices.push(info_notice("a"));
        assert_eq!(notices.take_for_page_load(&MemoryStore::new()).unwrap().len(), 1);
    }
}
