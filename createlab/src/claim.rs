//! Device claim registry.
//!
//! Enumeration can race with connection: two scans may both see the same
//! physical device and try to open it. The registry marks device paths as
//! in use so only one connection ever owns a given path. It is an explicit
//! value, not a global; clone the handle to share it.

use {
    crate::error::{Error, Result},
    log::debug,
    std::{
        collections::HashSet,
        sync::{Arc, Mutex, MutexGuard, PoisonError},
    },
};

/// Set of claimed device paths, shared by cloning.
#[derive(Debug, Clone, Default)]
pub struct ClaimRegistry {
    claimed: Arc<Mutex<HashSet<String>>>,
}

impl ClaimRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        // The set stays consistent even if a holder panicked.
        self.claimed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `path` if nobody holds it. Returns whether the claim succeeded.
    pub fn try_claim(&self, path: &str) -> bool {
        let claimed = self.lock().insert(path.to_string());
        if claimed {
            debug!("Claimed {path}");
        } else {
            debug!("{path} is already claimed");
        }
        claimed
    }

    /// Release `path`. Releasing an unclaimed path does nothing.
    pub fn release(&self, path: &str) {
        if self.lock().remove(path) {
            debug!("Released {path}");
        }
    }

    /// Whether `path` is currently claimed.
    pub fn is_claimed(&self, path: &str) -> bool {
        self.lock().contains(path)
    }

    /// Number of claimed paths.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no path is claimed.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Claim `path` and return a guard that releases it.
    pub fn claim(&self, path: &str) -> Result<ClaimGuard> {
        if self.try_claim(path) {
            Ok(ClaimGuard {
                registry: self.clone(),
                path: Some(path.to_string()),
            })
        } else {
            Err(Error::ClaimConflict(path.to_string()))
        }
    }
}

/// Holds a claim until released or dropped.
#[derive(Debug)]
pub struct ClaimGuard {
    registry: ClaimRegistry,
    path: Option<String>,
}

impl ClaimGuard {
    /// The claimed path.
    pub fn path(&self) -> &str {
        self.path.as_deref().unwrap_or_default()
    }

    /// Release the claim now.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(path) = self.path.take() {
            self.registry.release(&path);
        }
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Barrier, thread};

    #[test]
    fn test_claim_and_release() {
        let registry = ClaimRegistry::new();
        assert!(registry.try_claim("/dev/hidraw0"));
        assert!(!registry.try_claim("/dev/hidraw0"));
        assert!(registry.is_claimed("/dev/hidraw0"));

        registry.release("/dev/hidraw0");
        assert!(!registry.is_claimed("/dev/hidraw0"));
        assert!(registry.try_claim("/dev/hidraw0"));
    }

    #[test]
    fn test_release_is_idempotent() {
        let registry = ClaimRegistry::new();
        registry.release("/dev/hidraw9");
        assert!(registry.try_claim("/dev/hidraw9"));
        registry.release("/dev/hidraw9");
        registry.release("/dev/hidraw9");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_claims_exactly_one_wins() {
        for _ in 0..50 {
            let registry = ClaimRegistry::new();
            let barrier = Arc::new(Barrier::new(2));

            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let registry = registry.clone();
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        registry.try_claim("X")
                    })
                })
                .collect();

            let wins = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|won| *won)
                .count();
            assert_eq!(wins, 1);

            registry.release("X");
            assert!(registry.try_claim("X"));
        }
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let registry = ClaimRegistry::new();
        {
            let guard = registry.claim("COM7").unwrap();
            assert_eq!(guard.path(), "COM7");
            assert!(matches!(registry.claim("COM7"), Err(Error::ClaimConflict(p)) if p == "COM7"));
        }
        assert!(!registry.is_claimed("COM7"));
    }

    #[test]
    fn test_guard_explicit_release() {
        let registry = ClaimRegistry::new();
        let guard = registry.claim("a").unwrap();
        let _other = registry.claim("b").unwrap();
        guard.release();
        assert!(!registry.is_claimed("a"));
        assert!(registry.is_claimed("b"));
        assert_eq!(registry.len(), 1);
    }
}
