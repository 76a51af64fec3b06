use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::ImgenError;

/// At most one in-flight pipeline per requesting user.
///
/// Check-and-set happens under one lock, so two tasks racing for the same
/// user cannot both be admitted even if they interleave at await points.
#[derive(Debug, Default)]
pub struct AdmissionGuard {
    held: Mutex<HashSet<String>>,
}

/// Held for the duration of one pipeline execution. Dropping it releases the
/// user's slot, which covers early returns, errors and unwinding panics.
#[derive(Debug)]
#[must_use = "the slot is released as soon as the token is dropped"]
pub struct AdmissionToken<'a> {
    guard: &'a AdmissionGuard,
    user: String,
}

impl AdmissionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        // The set stays consistent even if a holder panicked.
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn acquire(&self, user: &str) -> Result<AdmissionToken<'_>, ImgenError> {
        if !self.lock().insert(user.to_string()) {
            tracing::debug!(user, "admission rejected: request already in flight");
            return Err(ImgenError::ConcurrencyRejected {
                user: user.to_string(),
            });
        }
        Ok(AdmissionToken {
            guard: self,
            user: user.to_string(),
        })
    }

    pub fn is_held(&self, user: &str) -> bool {
        self.lock().contains(user)
    }

    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }
}

impl AdmissionToken<'_> {
    pub fn user(&self) -> &str {
        &self.user
    }
}

impl Drop for AdmissionToken<'_> {
    fn drop(&mut self) {
        self.guard.lock().remove(&self.user);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn second_acquire_for_same_user_is_rejected() {
        let guard = AdmissionGuard::new();
        let token = guard.acquire("alice").unwrap();
        assert_eq!(token.user(), "alice");

        let err = guard.acquire("alice").unwrap_err();
        assert!(matches!(err, ImgenError::ConcurrencyRejected { ref user } if user == "alice"));

        // Other users are unaffected
        let _bob = guard.acquire("bob").unwrap();
        assert_eq!(guard.in_flight(), 2);
    }

    #[test]
    fn drop_releases_slot() {
        let guard = AdmissionGuard::new();
        {
            let _token = guard.acquire("alice").unwrap();
            assert!(guard.is_held("alice"));
        }
        assert!(!guard.is_held("alice"));
        assert!(guard.acquire("alice").is_ok());
    }

    #[test]
    fn panic_while_held_still_releases() {
        let guard = Arc::new(AdmissionGuard::new());
        let g = guard.clone();
        let joined = std::thread::spawn(move || {
            let _token = g.acquire("alice").unwrap();
            panic!("pipeline fault");
        })
        .join();
        assert!(joined.is_err());
        assert!(!guard.is_held("alice"));
        assert!(guard.acquire("alice").is_ok());
    }

    #[tokio::test]
    async fn concurrent_acquires_admit_exactly_one() {
        let guard = Arc::new(AdmissionGuard::new());
        let barrier = Arc::new(tokio::sync::Barrier::new(16));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let guard = guard.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                guard.acquire("alice").map(std::mem::forget).is_ok()
            }));
        }
        let mut admitted = 0;
        for h in handles {
            if h.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }
}
