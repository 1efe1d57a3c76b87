//! # ndispatch Kernels
//!
//! Concrete implementations of the four dispatched operations and the
//! process-wide stub table that routes calls to them.
//!
//! | Operation | Default | AVX2 | AVX-512 |
//! |---|---|---|---|
//! | `addr` | yes | | yes |
//! | `weight_to_int4pack` | yes | | |
//! | `int4pack_mm` | yes | yes | |
//! | `int8pack_mm` | yes | yes | yes |
//!
//! Every kernel module exports a `register` hook. [`register_all`] installs
//! them in order; [`native()`] builds the table on first use.

#![warn(missing_docs)]

mod checks;
pub mod generic;
pub mod native;

#[cfg(target_arch = "x86_64")]
pub mod avx2;
#[cfg(target_arch = "x86_64")]
pub mod avx512;

use ndispatch_core::{DispatchError, ModuleInit, RegistryBuilder};

pub use native::{
    addr, init, install, int4pack_mm, int8pack_mm, native, weight_to_int4pack, NativeStubs,
    StubReport,
};

/// Minimum output rows before a kernel fans out over the rayon pool.
pub const PARALLEL_THRESHOLD: usize = 4;

/// Registration hooks of every kernel module compiled for this target.
pub fn kernel_modules() -> Vec<(&'static str, ModuleInit)> {
    let mut modules: Vec<(&'static str, ModuleInit)> = vec![("generic", generic::register)];
    #[cfg(target_arch = "x86_64")]
    {
        modules.push(("avx2", avx2::register));
        modules.push(("avx512", avx512::register));
    }
    modules
}

/// Register every kernel module into `builder`.
pub fn register_all(builder: &mut RegistryBuilder) -> Result<(), DispatchError> {
    for (name, module) in kernel_modules() {
        tracing::trace!(module = name, "installing kernel module");
        builder.install(module)?;
    }
    Ok(())
}
