//! Expiring admin session tokens.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

/// Server-side token store. Tokens are random UUIDs valid until their expiry.
pub struct SessionStore {
    ttl: Duration,
    tokens: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    pub fn issue(&self) -> String {
        self.issue_at(Utc::now())
    }

    fn issue_at(&self, now: DateTime<Utc>) -> String {
        let token = Uuid::new_v4().to_string();
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        tokens.retain(|_, expiry| *expiry > now);
        tokens.insert(token.clone(), now + self.ttl);
        token
    }

    pub fn validate(&self, token: &str) -> bool {
        self.validate_at(token, Utc::now())
    }

    fn validate_at(&self, token: &str, now: DateTime<Utc>) -> bool {
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        match tokens.get(token) {
            Some(expiry) if *expiry > now => true,
            Some(_) => {
                tokens.remove(token);
                false
            }
            None => false,
        }
    }

    pub fn revoke(&self, token: &str) {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token);
    }

    pub fn active(&self) -> usize {
        let now = Utc::now();
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|expiry| **expiry > now)
            .count()
    }
}

/// Checks admin credentials and hands out session tokens.
pub struct AdminAuth {
    username: String,
    password: String,
    sessions: SessionStore,
}

impl AdminAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>, ttl: Duration) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            sessions: SessionStore::new(ttl),
        }
    }

    /// A fresh token on matching credentials.
    pub fn login(&self, username: &str, password: &str) -> Option<String> {
        if username == self.username && password == self.password {
            let token = self.sessions.issue();
            tracing::info!(user = username, "admin session issued");
            Some(token)
        } else {
            tracing::warn!(user = username, "admin login rejected");
            None
        }
    }

    pub fn verify(&self, token: &str) -> bool {
        self.sessions.validate(token)
    }

    pub fn logout(&self, token: &str) {
        self.sessions.revoke(token);
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }
}
