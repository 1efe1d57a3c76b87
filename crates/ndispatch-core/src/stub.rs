//! Per-operation dispatch stubs.
//!
//! A [`DispatchStub`] starts unresolved. The first call asks its prober for
//! the host capability (never more than the CPU supports), picks the most capable registered kernel that the
//! host can run, and publishes the choice through a [`OnceLock`]. Every later
//! call reads the stored pointer without taking a lock.

use std::fmt;
use std::sync::{Arc, OnceLock};

use tracing::{debug, error};

use crate::capability::{CapabilityTag, Prober};
use crate::error::DispatchError;
use crate::operation::Operation;
use crate::registry::{Registry, RegistryEntry};

/// The kernel a stub settled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved<F> {
    /// Tag of the chosen implementation
    pub tag: CapabilityTag,
    /// The chosen kernel
    pub(crate) kernel: F,
}

/// Pick the first entry whose tag the host can run.
///
/// `entries` must be sorted most capable first, as [`Registry::lookup`]
/// returns them.
pub fn select<F: Copy>(entries: &[RegistryEntry<F>], detected: CapabilityTag) -> Option<Resolved<F>> {
    entries
        .iter()
        .find(|entry| entry.tag <= detected)
        .map(|entry| Resolved {
            tag: entry.tag,
            kernel: entry.kernel,
        })
}

/// Lazily resolved entry point for one operation.
pub struct DispatchStub<O: Operation> {
    entries: Vec<RegistryEntry<O::Kernel>>,
    prober: Arc<Prober>,
    resolved: OnceLock<Resolved<O::Kernel>>,
}

impl<O: Operation> DispatchStub<O> {
    /// Snapshot `O`'s registrations from `registry`.
    pub fn new(registry: &Registry, prober: Arc<Prober>) -> Self {
        Self {
            entries: registry.lookup::<O>(),
            prober,
            resolved: OnceLock::new(),
        }
    }

    /// Resolve the stub, or report why it cannot be resolved.
    ///
    /// On error the stub stays unresolved.
    pub fn try_resolve(&self) -> Result<&Resolved<O::Kernel>, DispatchError> {
        if let Some(resolved) = self.resolved.get() {
            return Ok(resolved);
        }

        let detected = self.prober.detect();
        let choice = select(&self.entries, detected).ok_or_else(|| DispatchError::MissingBaseline {
            operation: O::NAME,
            detected,
            registered: self.registered_tags(),
        })?;

        Ok(self.resolved.get_or_init(|| {
            debug!(
                operation = O::NAME,
                capability = %choice.tag,
                detected = %detected,
                "dispatch stub resolved"
            );
            choice
        }))
    }

    /// Resolve the stub.
    ///
    /// # Panics
    /// Panics when no registered kernel runs on this host. That is a build
    /// configuration error, not a runtime condition.
    pub fn resolve(&self) -> &Resolved<O::Kernel> {
        match self.try_resolve() {
            Ok(resolved) => resolved,
            Err(e) => {
                error!(operation = O::NAME, error = %e, "dispatch stub cannot resolve");
                panic!("{e}");
            }
        }
    }

    /// The kernel to call.
    #[inline]
    pub fn kernel(&self) -> O::Kernel {
        match self.resolved.get() {
            Some(resolved) => resolved.kernel,
            None => self.resolve().kernel,
        }
    }

    /// Tag of the chosen kernel, once resolved.
    pub fn selected(&self) -> Option<CapabilityTag> {
        self.resolved.get().map(|r| r.tag)
    }

    /// Whether the stub has resolved.
    pub fn is_resolved(&self) -> bool {
        self.resolved.get().is_some()
    }

    /// Registered tags, least capable first.
    pub fn registered_tags(&self) -> Vec<CapabilityTag> {
        self.entries.iter().rev().map(|e| e.tag).collect()
    }

    /// Operation name.
    pub fn name(&self) -> &'static str {
        O::NAME
    }
}

impl<O: Operation> fmt::Debug for DispatchStub<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchStub")
            .field("operation", &O::NAME)
            .field("registered", &self.registered_tags())
            .field("selected", &self.selected())
            .finish()
    }
}
