//! # Native Stub Table
//!
//! Builds the registry from every kernel module, owns one dispatch stub per
//! operation and exposes the process-wide table.
//!
//! ## Lifecycle
//!
//! 1. `register_all` runs every module hook into a fresh builder
//! 2. The builder is frozen and each stub snapshots its operation's entries
//! 3. Each stub resolves on its first call (or all at once via [`init`])
//!
//! Duplicate registrations surface in step 1, before any stub can resolve.

use std::sync::{Arc, OnceLock};

use serde::Serialize;
use tracing::{error, info};

use ndispatch_core::{
    global_prober, AddrIter, AddrOp, CapabilityTag, DispatchError, DispatchStub, Int4PackMmOp,
    Int8PackMmOp, KernelResult, MatMut, MatRef, PackedInt4, PackedInt4Mut, Prober, Registry,
    RegistryBuilder, WeightToInt4PackOp,
};

use crate::register_all;

/// Resolution state of one stub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StubReport {
    /// Operation name
    pub name: &'static str,
    /// Registered tags, least capable first
    pub registered: Vec<CapabilityTag>,
    /// Tag of the selected kernel, if resolved
    pub selected: Option<CapabilityTag>,
}

/// One dispatch stub per operation, backed by a shared registry.
#[derive(Debug)]
pub struct NativeStubs {
    registry: Registry,
    prober: Arc<Prober>,
    /// `addr` stub
    pub addr: DispatchStub<AddrOp>,
    /// `weight_to_int4pack` stub
    pub weight_to_int4pack: DispatchStub<WeightToInt4PackOp>,
    /// `int4pack_mm` stub
    pub int4pack_mm: DispatchStub<Int4PackMmOp>,
    /// `int8pack_mm` stub
    pub int8pack_mm: DispatchStub<Int8PackMmOp>,
}

impl NativeStubs {
    /// Register every kernel module and build the stubs over `prober`.
    pub fn new(prober: Arc<Prober>) -> Result<Self, DispatchError> {
        let mut builder = RegistryBuilder::new();
        register_all(&mut builder)?;
        Ok(Self::from_registry(builder.build(), prober))
    }

    /// Stubs over the host prober, capped at `ceiling`.
    ///
    /// Reads the process-wide [`ndispatch_core::host_capability`], so the CPU
    /// is not queried again.
    pub fn with_ceiling(ceiling: Option<CapabilityTag>) -> Result<Self, DispatchError> {
        Self::new(Arc::new(Prober::host().with_ceiling(ceiling)))
    }

    /// Build stubs over an already frozen registry.
    pub fn from_registry(registry: Registry, prober: Arc<Prober>) -> Self {
        Self {
            addr: DispatchStub::new(&registry, Arc::clone(&prober)),
            weight_to_int4pack: DispatchStub::new(&registry, Arc::clone(&prober)),
            int4pack_mm: DispatchStub::new(&registry, Arc::clone(&prober)),
            int8pack_mm: DispatchStub::new(&registry, Arc::clone(&prober)),
            registry,
            prober,
        }
    }

    /// The frozen registry behind the stubs.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The prober the stubs consult.
    pub fn prober(&self) -> &Arc<Prober> {
        &self.prober
    }

    /// Capability the stubs select against.
    pub fn capability(&self) -> CapabilityTag {
        self.prober.detect()
    }

    /// Resolve every stub now.
    pub fn resolve_all(&self) -> Result<(), DispatchError> {
        self.addr.try_resolve()?;
        self.weight_to_int4pack.try_resolve()?;
        self.int4pack_mm.try_resolve()?;
        self.int8pack_mm.try_resolve()?;
        Ok(())
    }

    /// Per-stub resolution state, in declaration order.
    pub fn report(&self) -> Vec<StubReport> {
        vec![
            report(&self.addr),
            report(&self.weight_to_int4pack),
            report(&self.int4pack_mm),
            report(&self.int8pack_mm),
        ]
    }
}

fn report<O: ndispatch_core::Operation>(stub: &DispatchStub<O>) -> StubReport {
    StubReport {
        name: stub.name(),
        registered: stub.registered_tags(),
        selected: stub.selected(),
    }
}

static NATIVE: OnceLock<NativeStubs> = OnceLock::new();

/// The process-wide stub table, built on first use over [`global_prober`].
///
/// # Panics
/// Panics if two kernel modules registered the same slot.
pub fn native() -> &'static NativeStubs {
    NATIVE.get_or_init(|| match NativeStubs::new(Arc::clone(global_prober())) {
        Ok(stubs) => stubs,
        Err(e) => {
            error!(error = %e, code = e.error_code(), "kernel registration failed");
            panic!("{e}");
        }
    })
}

/// Install a custom table as the process-wide one.
///
/// Fails, handing the table back, if the process-wide table already exists.
pub fn install(stubs: NativeStubs) -> Result<&'static NativeStubs, NativeStubs> {
    NATIVE.set(stubs)?;
    Ok(native())
}

/// Build the process-wide table and resolve every stub eagerly.
pub fn init() -> Result<&'static NativeStubs, DispatchError> {
    let stubs = native();
    stubs.resolve_all()?;
    info!(
        capability = %stubs.capability(),
        operations = stubs.registry().len(),
        "native dispatch initialized"
    );
    Ok(stubs)
}

/// `out = beta * input + alpha * (vec1 ⊗ vec2)` on the best available kernel.
pub fn addr(iter: &mut AddrIter<'_>, beta: f32, alpha: f32) -> KernelResult {
    native().addr.call(iter, beta, alpha)
}

/// Pack `[N, K]` nibbles into the int4 matmul layout.
pub fn weight_to_int4pack(weights: MatRef<'_, u8>, packed: &mut PackedInt4Mut<'_>) -> KernelResult {
    native().weight_to_int4pack.call(weights, packed)
}

/// Grouped int4 matmul on the best available kernel.
pub fn int4pack_mm(
    a: MatRef<'_, f32>,
    b: PackedInt4<'_>,
    group_size: usize,
    scales_and_zeros: MatRef<'_, f32>,
    out: &mut MatMut<'_, f32>,
) -> KernelResult {
    native()
        .int4pack_mm
        .call(a, b, group_size, scales_and_zeros, out)
}

/// Per-channel int8 matmul on the best available kernel.
pub fn int8pack_mm(
    a: MatRef<'_, f32>,
    b: MatRef<'_, i8>,
    scales: &[f32],
    out: &mut MatMut<'_, f32>,
) -> KernelResult {
    native().int8pack_mm.call(a, b, scales, out)
}
