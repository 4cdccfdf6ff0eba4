//! Exclusive operation guards.
//!
//! The runtime tracks two kinds of exclusive operation: model lifecycle
//! (load, unload, context reset) and generation. Both flags live behind
//! one lock so the admission decision for a new operation sees a
//! consistent picture of both: of any set of racing requests exactly one
//! is admitted and the rest get [`RuntimeError::AlreadyInProgress`] or
//! [`RuntimeError::ResourceBusy`].
//!
//! Acquiring yields a [`GuardPermit`] whose `Drop` clears the flag on
//! every exit path: success, error, timeout, task abort, or a dropped
//! future. Each acquisition gets a fresh ticket and a permit only clears
//! the flag while its own ticket is current, so once the watchdog has
//! evicted a stale holder and someone else acquired the flag, the stale
//! permit's eventual drop leaves the new holder alone.
//!
//! Evicting a holder also fires its permit's eviction token. Operations
//! race their work against [`GuardPermit::evicted`], so a stuck engine
//! call is dropped together with everything it holds and later
//! operations can make progress.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::RuntimeError;

/// The operation class a guard protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardKind {
    /// Load, unload, or context reset.
    Lifecycle,
    /// Token generation.
    Generation,
}

impl GuardKind {
    const fn slot(self) -> usize {
        match self {
            Self::Lifecycle => 0,
            Self::Generation => 1,
        }
    }

    /// Name used in logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Lifecycle => "lifecycle",
            Self::Generation => "generation",
        }
    }
}

#[derive(Debug, Clone)]
struct Holder {
    ticket: u64,
    since: Instant,
    evict: CancellationToken,
}

#[derive(Debug, Default)]
struct GuardState {
    holders: [Option<Holder>; 2],
    next_ticket: u64,
}

/// The lifecycle and generation flags of one runtime.
#[derive(Debug, Default)]
pub struct RuntimeGuards {
    state: Mutex<GuardState>,
}

impl RuntimeGuards {
    /// Creates a guard set with nothing held.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, GuardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admits an operation of `kind`.
    ///
    /// # Errors
    ///
    /// - Lifecycle while another lifecycle operation runs:
    ///   [`RuntimeError::AlreadyInProgress`].
    /// - Lifecycle while a generation runs, or generation while anything
    ///   runs: [`RuntimeError::ResourceBusy`].
    pub fn try_acquire(self: &Arc<Self>, kind: GuardKind) -> Result<GuardPermit, RuntimeError> {
        let mut state = self.lock();
        let lifecycle = state.holders[GuardKind::Lifecycle.slot()].is_some();
        let generation = state.holders[GuardKind::Generation.slot()].is_some();

        match kind {
            GuardKind::Lifecycle if lifecycle => return Err(RuntimeError::AlreadyInProgress),
            GuardKind::Lifecycle if generation => return Err(RuntimeError::ResourceBusy),
            GuardKind::Generation if lifecycle || generation => {
                return Err(RuntimeError::ResourceBusy);
            }
            _ => {}
        }

        let ticket = state.next_ticket;
        let evict = CancellationToken::new();
        state.next_ticket = state.next_ticket.wrapping_add(1);
        state.holders[kind.slot()] = Some(Holder {
            ticket,
            since: Instant::now(),
            evict: evict.clone(),
        });
        drop(state);

        tracing::trace!(guard = kind.name(), ticket, "guard acquired");
        Ok(GuardPermit {
            guards: Arc::clone(self),
            kind,
            ticket,
            evict,
        })
    }

    /// Returns true while an operation of `kind` holds its flag.
    #[must_use]
    pub fn is_held(&self, kind: GuardKind) -> bool {
        self.lock().holders[kind.slot()].is_some()
    }

    /// How long the current holder of `kind` has held it.
    #[must_use]
    pub fn held_for(&self, kind: GuardKind) -> Option<Duration> {
        self.lock().holders[kind.slot()]
            .as_ref()
            .map(|h| h.since.elapsed())
    }

    /// Clears every flag held for at least `threshold` and evicts its
    /// holder.
    ///
    /// Returns the number of flags cleared.
    pub fn clear_stale(&self, threshold: Duration) -> usize {
        let mut cleared = 0;
        let mut state = self.lock();
        for kind in [GuardKind::Lifecycle, GuardKind::Generation] {
            let slot = &mut state.holders[kind.slot()];
            if slot
                .as_ref()
                .is_some_and(|holder| holder.since.elapsed() >= threshold)
                && let Some(holder) = slot.take()
            {
                holder.evict.cancel();
                cleared += 1;
                tracing::warn!(
                    guard = kind.name(),
                    ticket = holder.ticket,
                    held_secs = holder.since.elapsed().as_secs(),
                    "cleared stale guard"
                );
            }
        }
        cleared
    }

    fn release(&self, kind: GuardKind, ticket: u64) {
        let mut state = self.lock();
        let slot = &mut state.holders[kind.slot()];
        if slot.as_ref().is_some_and(|h| h.ticket == ticket) {
            *slot = None;
            tracing::trace!(guard = kind.name(), ticket, "guard released");
        }
    }
}

/// Proof of admission; releases the flag on drop.
#[derive(Debug)]
pub struct GuardPermit {
    guards: Arc<RuntimeGuards>,
    kind: GuardKind,
    ticket: u64,
    evict: CancellationToken,
}

impl GuardPermit {
    /// Returns true if this permit is still the current holder.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.guards.lock().holders[self.kind.slot()]
            .as_ref()
            .is_some_and(|h| h.ticket == self.ticket)
    }

    /// Resolves once the watchdog has evicted this holder.
    pub async fn evicted(&self) {
        self.evict.cancelled().await;
    }

    /// Returns true once the watchdog has evicted this holder.
    #[must_use]
    pub fn is_evicted(&self) -> bool {
        self.evict.is_cancelled()
    }
}

impl Drop for GuardPermit {
    fn drop(&mut self) {
        self.guards.release(self.kind, self.ticket);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_is_exclusive() {
        let guards = RuntimeGuards::new();
        let permit = guards.try_acquire(GuardKind::Generation).unwrap();
        assert!(guards.is_held(GuardKind::Generation));
        assert!(matches!(
            guards.try_acquire(GuardKind::Generation),
            Err(RuntimeError::ResourceBusy)
        ));

        drop(permit);
        assert!(!guards.is_held(GuardKind::Generation));
        assert!(guards.try_acquire(GuardKind::Generation).is_ok());
    }

    #[test]
    fn test_lifecycle_excludes_everything() {
        let guards = RuntimeGuards::new();
        let _permit = guards.try_acquire(GuardKind::Lifecycle).unwrap();
        assert!(matches!(
            guards.try_acquire(GuardKind::Lifecycle),
            Err(RuntimeError::AlreadyInProgress)
        ));
        assert!(matches!(
            guards.try_acquire(GuardKind::Generation),
            Err(RuntimeError::ResourceBusy)
        ));
    }

    #[test]
    fn test_generation_blocks_lifecycle() {
        let guards = RuntimeGuards::new();
        let _permit = guards.try_acquire(GuardKind::Generation).unwrap();
        assert!(matches!(
            guards.try_acquire(GuardKind::Lifecycle),
            Err(RuntimeError::ResourceBusy)
        ));
    }

    #[test]
    fn test_racing_threads_admit_exactly_one() {
        let guards = RuntimeGuards::new();
        let barrier = Arc::new(std::sync::Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let guards = Arc::clone(&guards);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let kind = if i % 2 == 0 {
                        GuardKind::Lifecycle
                    } else {
                        GuardKind::Generation
                    };
                    barrier.wait();
                    guards.try_acquire(kind).ok()
                })
            })
            .collect();

        let permits: Vec<_> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(permits.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_guard_cleared() {
        let guards = RuntimeGuards::new();
        let _permit = guards.try_acquire(GuardKind::Lifecycle).unwrap();

        assert_eq!(guards.clear_stale(Duration::from_secs(300)), 0);
        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(guards.held_for(GuardKind::Lifecycle).unwrap() >= Duration::from_secs(300));
        assert_eq!(guards.clear_stale(Duration::from_secs(300)), 1);
        assert!(!guards.is_held(GuardKind::Lifecycle));
    }

    #[tokio::test(start_paused = true)]
    async fn test_released_permit_is_not_evicted() {
        let guards = RuntimeGuards::new();
        let permit = guards.try_acquire(GuardKind::Generation).unwrap();
        assert!(!permit.is_evicted());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(guards.clear_stale(Duration::from_secs(300)), 0);
        assert!(!permit.is_evicted());
        drop(permit);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_permit_does_not_release_new_holder() {
        let guards = RuntimeGuards::new();
        let stale = guards.try_acquire(GuardKind::Generation).unwrap();

        tokio::time::advance(Duration::from_secs(600)).await;
        assert_eq!(guards.clear_stale(Duration::from_secs(300)), 1);
        assert!(!stale.is_current());
        assert!(stale.is_evicted());

        let fresh = guards.try_acquire(GuardKind::Generation).unwrap();
        drop(stale);
        assert!(guards.is_held(GuardKind::Generation));
        assert!(fresh.is_current());

        drop(fresh);
        assert!(!guards.is_held(GuardKind::Generation));
    }
}
