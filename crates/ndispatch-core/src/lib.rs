//! # ndispatch Core
//!
//! Runtime dispatch machinery for numeric CPU kernels.
//!
//! This crate provides the pieces that sit between generic numeric code and
//! the architecture-specific kernels that back it:
//!
//! - **Capability probing**: detect the highest [`CapabilityTag`] the host
//!   supports, once per process, and never report more than that
//! - **Implementation registry**: collect `(operation, tag, fn)` entries during
//!   an explicit initialization phase, reject duplicates, then freeze
//! - **Dispatch stubs**: per-operation cells that resolve to the best
//!   registered kernel on first use and stay fixed afterwards
//! - **Operand views**: the borrowed matrix and packed-weight views the
//!   operation signatures are written against
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use ndispatch_core::{CapabilityTag, DispatchStub, Operation, Prober, RegistryBuilder};
//!
//! struct Double;
//! impl Operation for Double {
//!     const NAME: &'static str = "double";
//!     type Kernel = fn(u32) -> u32;
//! }
//!
//! fn double_generic(x: u32) -> u32 { x * 2 }
//! fn double_wide(x: u32) -> u32 { x << 1 }
//!
//! let mut builder = RegistryBuilder::new();
//! builder.register::<Double>(CapabilityTag::Default, double_generic).unwrap();
//! builder.register::<Double>(CapabilityTag::Avx512, double_wide).unwrap();
//! let registry = builder.build();
//!
//! let stub = DispatchStub::<Double>::new(&registry, Arc::new(Prober::fixed(CapabilityTag::Avx2)));
//! assert_eq!((stub.kernel())(21), 42);
//! assert_eq!(stub.selected(), Some(CapabilityTag::Default));
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod capability;
pub mod error;
pub mod operation;
pub mod registry;
pub mod stub;
pub mod tensor;

pub use capability::{
    detect, global_prober, host_capability, parse_override, CapabilityTag, ProbeFn, Prober,
    CAPABILITY_ENV,
};
pub use error::{DispatchError, KernelError, KernelResult};
pub use operation::{
    AddrFn, AddrOp, Int4PackMmFn, Int4PackMmOp, Int8PackMmFn, Int8PackMmOp, Operation,
    WeightToInt4PackFn, WeightToInt4PackOp,
};
pub use registry::{ModuleInit, OperationSummary, Registry, RegistryBuilder, RegistryEntry};
pub use stub::{select, DispatchStub, Resolved};
pub use tensor::{AddrIter, AddrRow, MatMut, MatRef, PackedInt4, PackedInt4Mut, BLOCK_N};

/// Prelude for common imports
pub mod prelude {
    pub use crate::capability::{CapabilityTag, Prober};
    pub use crate::error::{DispatchError, KernelError, KernelResult};
    pub use crate::operation::*;
    pub use crate::registry::{Registry, RegistryBuilder};
    pub use crate::stub::DispatchStub;
    pub use crate::tensor::*;
}
