//! Call Context
//!
//! Who is making a change and when. Every mutating operation takes a
//! `CallContext`; audit rows copy `user_name` and the context timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallOrigin {
    Internal,
    External,
    Test,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserType {
    System,
    Admin,
    Customer,
    Migration,
    Test,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallContext {
    pub user_token: Uuid,
    pub user_name: String,
    pub origin: CallOrigin,
    pub user_type: UserType,
    /// Change date recorded for INSERT audit rows
    pub created_date: DateTime<Utc>,
    /// Change date recorded for DELETE audit rows
    pub updated_date: DateTime<Utc>,
    pub reason_code: Option<String>,
    pub comments: Option<String>,
}

impl CallContext {
    pub fn new(
        user_name: impl Into<String>,
        origin: CallOrigin,
        user_type: UserType,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_token: Uuid::new_v4(),
            user_name: user_name.into(),
            origin,
            user_type,
            created_date: now,
            updated_date: now,
            reason_code: None,
            comments: None,
        }
    }

    pub fn with_reason(mut self, reason_code: impl Into<String>) -> Self {
        self.reason_code = Some(reason_code.into());
        self
    }

    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = Some(comments.into());
        self
    }
}

/// Time source for call contexts
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for tests and replays.
#[derive(Debug, Clone)]
pub struct MockClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl MockClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard = instant;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct CallContextFactory {
    clock: Arc<dyn Clock>,
}

impl CallContextFactory {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn create(
        &self,
        user_name: impl Into<String>,
        origin: CallOrigin,
        user_type: UserType,
    ) -> CallContext {
        CallContext::new(user_name, origin, user_type, self.clock.now())
    }
}

impl Default for CallContextFactory {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}
