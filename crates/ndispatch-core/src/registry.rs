//! Implementation registry.
//!
//! Kernel modules announce `(operation, capability, kernel)` triples to a
//! [`RegistryBuilder`] during initialization. Once every module has run, the
//! builder is frozen into a [`Registry`], which is read-only and can be shared
//! freely between stubs and threads.

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::capability::CapabilityTag;
use crate::error::DispatchError;
use crate::operation::Operation;

/// A kernel registered for one capability tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryEntry<F> {
    /// Capability the kernel requires
    pub tag: CapabilityTag,
    /// The kernel itself. Only a stub hands it out, after capping the tag at
    /// what the host supports.
    pub(crate) kernel: F,
}

/// Registration hook exported by each kernel module.
pub type ModuleInit = fn(&mut RegistryBuilder) -> Result<(), DispatchError>;

struct Slot {
    name: &'static str,
    kernels: BTreeMap<CapabilityTag, Box<dyn Any + Send + Sync>>,
}

impl Slot {
    fn tags(&self) -> Vec<CapabilityTag> {
        self.kernels.keys().copied().collect()
    }
}

/// Collects registrations before the registry is frozen.
#[derive(Default)]
pub struct RegistryBuilder {
    slots: HashMap<TypeId, Slot>,
}

impl RegistryBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `kernel` as the `tag` implementation of `O`.
    ///
    /// A second registration for the same `(O, tag)` is rejected and the
    /// first one is kept.
    pub fn register<O: Operation>(
        &mut self,
        tag: CapabilityTag,
        kernel: O::Kernel,
    ) -> Result<&mut Self, DispatchError> {
        let slot = self.slots.entry(TypeId::of::<O>()).or_insert_with(|| Slot {
            name: O::NAME,
            kernels: BTreeMap::new(),
        });

        if slot.kernels.contains_key(&tag) {
            warn!(
                operation = O::NAME,
                capability = %tag,
                "rejecting duplicate kernel registration"
            );
            return Err(DispatchError::DuplicateRegistration {
                operation: O::NAME,
                tag,
            });
        }

        trace!(operation = O::NAME, capability = %tag, "registered kernel");
        slot.kernels.insert(tag, Box::new(kernel));
        Ok(self)
    }

    /// Run a kernel module's registration hook.
    pub fn install(&mut self, module: ModuleInit) -> Result<&mut Self, DispatchError> {
        module(self)?;
        Ok(self)
    }

    /// Number of operations with at least one registration.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether nothing has been registered yet.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Freeze the builder.
    pub fn build(self) -> Registry {
        let kernels: usize = self.slots.values().map(|s| s.kernels.len()).sum();
        debug!(operations = self.slots.len(), kernels, "registry frozen");
        Registry { slots: self.slots }
    }
}

impl std::fmt::Debug for RegistryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("operations", &self.slots.len())
            .finish()
    }
}

/// Name and registered tags of one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationSummary {
    /// Operation name
    pub name: &'static str,
    /// Registered tags, least capable first
    pub tags: Vec<CapabilityTag>,
}

impl OperationSummary {
    /// Whether the operation has a baseline kernel.
    pub fn has_baseline(&self) -> bool {
        self.tags.contains(&CapabilityTag::BASELINE)
    }
}

/// Frozen registration table.
pub struct Registry {
    slots: HashMap<TypeId, Slot>,
}

impl Registry {
    /// All kernels registered for `O`, most capable first.
    pub fn lookup<O: Operation>(&self) -> Vec<RegistryEntry<O::Kernel>> {
        let Some(slot) = self.slots.get(&TypeId::of::<O>()) else {
            return Vec::new();
        };
        slot.kernels
            .iter()
            .rev()
            .filter_map(|(&tag, kernel)| {
                kernel
                    .downcast_ref::<O::Kernel>()
                    .map(|&kernel| RegistryEntry { tag, kernel })
            })
            .collect()
    }

    /// Tags registered for `O`, least capable first.
    pub fn tags<O: Operation>(&self) -> Vec<CapabilityTag> {
        self.slots
            .get(&TypeId::of::<O>())
            .map(Slot::tags)
            .unwrap_or_default()
    }

    /// One summary per operation, sorted by name.
    pub fn summaries(&self) -> Vec<OperationSummary> {
        let mut summaries: Vec<_> = self
            .slots
            .values()
            .map(|slot| OperationSummary {
                name: slot.name,
                tags: slot.tags(),
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(b.name));
        summaries
    }

    /// Number of operations.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the registry has no operations.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.summaries()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Square;
    impl Operation for Square {
        const NAME: &'static str = "square";
        type Kernel = fn(i64) -> i64;
    }

    struct Negate;
    impl Operation for Negate {
        const NAME: &'static str = "negate";
        type Kernel = fn(i64) -> i64;
    }

    fn square_generic(x: i64) -> i64 {
        x * x
    }

    fn square_wide(x: i64) -> i64 {
        x.pow(2)
    }

    fn negate_generic(x: i64) -> i64 {
        -x
    }

    #[test]
    fn test_lookup_is_most_capable_first() {
        let mut builder = RegistryBuilder::new();
        builder
            .register::<Square>(CapabilityTag::Default, square_generic)
            .unwrap()
            .register::<Square>(CapabilityTag::Avx512, square_wide)
            .unwrap()
            .register::<Square>(CapabilityTag::Avx2, square_wide)
            .unwrap();
        let registry = builder.build();

        let tags: Vec<_> = registry.lookup::<Square>().iter().map(|e| e.tag).collect();
        assert_eq!(
            tags,
            vec![
                CapabilityTag::Avx512,
                CapabilityTag::Avx2,
                CapabilityTag::Default
            ]
        );
        assert_eq!((registry.lookup::<Square>()[2].kernel)(7), 49);
    }

    #[test]
    fn test_duplicate_keeps_first() {
        let mut builder = RegistryBuilder::new();
        builder
            .register::<Square>(CapabilityTag::Default, square_generic)
            .unwrap();
        let err = builder
            .register::<Square>(CapabilityTag::Default, negate_generic)
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::DuplicateRegistration {
                operation: "square",
                tag: CapabilityTag::Default,
            }
        );

        let registry = builder.build();
        let entries = registry.lookup::<Square>();
        assert_eq!(entries.len(), 1);
        assert_eq!((entries[0].kernel)(3), 9);
    }

    #[test]
    fn test_operations_do_not_share_slots() {
        let mut builder = RegistryBuilder::new();
        builder
            .register::<Square>(CapabilityTag::Default, square_generic)
            .unwrap()
            .register::<Negate>(CapabilityTag::Default, negate_generic)
            .unwrap();
        assert_eq!(builder.len(), 2);
        let registry = builder.build();

        assert_eq!((registry.lookup::<Negate>()[0].kernel)(5), -5);
        assert_eq!((registry.lookup::<Square>()[0].kernel)(5), 25);
    }

    #[test]
    fn test_install_and_summaries() {
        fn module(builder: &mut RegistryBuilder) -> Result<(), DispatchError> {
            builder
                .register::<Square>(CapabilityTag::Avx2, square_wide)?
                .register::<Negate>(CapabilityTag::Default, negate_generic)?;
            Ok(())
        }

        let mut builder = RegistryBuilder::new();
        builder.install(module).unwrap();
        let registry = builder.build();

        let summaries = registry.summaries();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].name, "negate");
        assert!(summaries[0].has_baseline());
        assert_eq!(summaries[1].name, "square");
        assert_eq!(summaries[1].tags, vec![CapabilityTag::Avx2]);
        assert!(!summaries[1].has_baseline());
    }

    #[test]
    fn test_unknown_operation_is_empty() {
        let registry = RegistryBuilder::new().build();
        assert!(registry.is_empty());
        assert!(registry.lookup::<Square>().is_empty());
        assert!(registry.tags::<Square>().is_empty());
    }
}
