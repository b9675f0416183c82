//! Process-wide reference-counted wake lock.

use std::sync::{Arc, Mutex};

/// Platform hook notified on the 0→1 and 1→0 reference edges. The real
/// suspension machinery (keeping the host awake while reconnect sessions run)
/// lives behind this seam.
pub trait WakeHook: Send + Sync + 'static {
    fn acquire(&self);
    fn release(&self);
}

/// Reference-counted guard against host suspension. One reference is held per
/// running reconnect session, across all endpoints; the hook fires only on
/// the first push and the last pop.
pub struct WakeLock {
    count: Mutex<usize>,
    hook: Option<Arc<dyn WakeHook>>,
}

impl WakeLock {
    pub fn new(hook: Option<Arc<dyn WakeHook>>) -> Self {
        Self {
            count: Mutex::new(0),
            hook,
        }
    }

    pub fn count(&self) -> usize {
        *self.count.lock().expect("wake lock poisoned")
    }

    /// Takes one reference; acquires the hook on the 0→1 edge.
    pub fn push(&self) {
        let mut count = self.count.lock().expect("wake lock poisoned");
        *count += 1;
        if *count == 1 {
            if let Some(hook) = &self.hook {
                hook.acquire();
            }
        }
    }

    /// Releases one reference; releases the hook on the 1→0 edge. Unbalanced
    /// pops are reported, not propagated.
    pub fn pop(&self) {
        let mut count = self.count.lock().expect("wake lock poisoned");
        match *count {
            0 => log::error!("wake lock popped below zero"),
            1 => {
                *count = 0;
                if let Some(hook) = &self.hook {
                    hook.release();
                }
            }
            _ => *count -= 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Edges {
        acquires: AtomicUsize,
        releases: AtomicUsize,
    }

    impl WakeHook for Arc<Edges> {
        fn acquire(&self) {
            self.acquires.fetch_add(1, Ordering::SeqCst);
        }
        fn release(&self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_hook_fires_only_on_edges() {
        let edges = Arc::new(Edges {
            acquires: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        });
        let lock = WakeLock::new(Some(Arc::new(edges.clone())));

        lock.push();
        lock.push();
        assert_eq!(edges.acquires.load(Ordering::SeqCst), 1);

        lock.pop();
        assert_eq!(edges.releases.load(Ordering::SeqCst), 0);
        lock.pop();
        assert_eq!(edges.releases.load(Ordering::SeqCst), 1);
        assert_eq!(lock.count(), 0);
    }

    #[test]
    fn test_unbalanced_pop_is_tolerated() {
        let lock = WakeLock::new(None);
        lock.pop();
        assert_eq!(lock.count(), 0);
    }
}
