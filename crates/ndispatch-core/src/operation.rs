//! Logical operations and their fixed kernel signatures.
//!
//! Each operation is a zero-sized marker implementing [`Operation`]. The
//! marker pins the operation's name and its function-pointer type, so the
//! registry and the stubs stay fully typed even though they store many
//! operations side by side.

use crate::error::KernelResult;
use crate::stub::DispatchStub;
use crate::tensor::{AddrIter, MatMut, MatRef, PackedInt4, PackedInt4Mut};

/// A logical operation with a fixed kernel signature.
pub trait Operation: 'static {
    /// Stable operation name used in logs and reports.
    const NAME: &'static str;

    /// Function-pointer type every implementation must match.
    type Kernel: Copy + Send + Sync + 'static;
}

/// `out = beta * input + alpha * (vec1 ⊗ vec2)`
pub type AddrFn = fn(&mut AddrIter<'_>, f32, f32) -> KernelResult;

/// Pack unpacked 4-bit weights `[N, K]` into the int4 matmul layout.
pub type WeightToInt4PackFn = fn(MatRef<'_, u8>, &mut PackedInt4Mut<'_>) -> KernelResult;

/// `out[M, N] = A[M, K] · dequant(W)ᵀ` with grouped scales and zero points.
pub type Int4PackMmFn =
    fn(MatRef<'_, f32>, PackedInt4<'_>, usize, MatRef<'_, f32>, &mut MatMut<'_, f32>) -> KernelResult;

/// `out[M, N] = (A[M, K] · Bᵀ) * scales[N]` with `B` in int8.
pub type Int8PackMmFn =
    fn(MatRef<'_, f32>, MatRef<'_, i8>, &[f32], &mut MatMut<'_, f32>) -> KernelResult;

/// Outer-product update.
#[derive(Debug, Clone, Copy)]
pub struct AddrOp;

impl Operation for AddrOp {
    const NAME: &'static str = "addr";
    type Kernel = AddrFn;
}

/// Int4 weight packing.
#[derive(Debug, Clone, Copy)]
pub struct WeightToInt4PackOp;

impl Operation for WeightToInt4PackOp {
    const NAME: &'static str = "weight_to_int4pack";
    type Kernel = WeightToInt4PackFn;
}

/// Int4 grouped-quantization matmul.
#[derive(Debug, Clone, Copy)]
pub struct Int4PackMmOp;

impl Operation for Int4PackMmOp {
    const NAME: &'static str = "int4pack_mm";
    type Kernel = Int4PackMmFn;
}

/// Int8 per-channel matmul.
#[derive(Debug, Clone, Copy)]
pub struct Int8PackMmOp;

impl Operation for Int8PackMmOp {
    const NAME: &'static str = "int8pack_mm";
    type Kernel = Int8PackMmFn;
}

impl DispatchStub<AddrOp> {
    /// Invoke the resolved `addr` kernel.
    #[inline(always)]
    pub fn call(&self, iter: &mut AddrIter<'_>, beta: f32, alpha: f32) -> KernelResult {
        (self.kernel())(iter, beta, alpha)
    }
}

impl DispatchStub<WeightToInt4PackOp> {
    /// Invoke the resolved `weight_to_int4pack` kernel.
    #[inline(always)]
    pub fn call(&self, weights: MatRef<'_, u8>, packed: &mut PackedInt4Mut<'_>) -> KernelResult {
        (self.kernel())(weights, packed)
    }
}

impl DispatchStub<Int4PackMmOp> {
    /// Invoke the resolved `int4pack_mm` kernel.
    #[inline(always)]
    pub fn call(
        &self,
        a: MatRef<'_, f32>,
        b: PackedInt4<'_>,
        group_size: usize,
        scales_and_zeros: MatRef<'_, f32>,
        out: &mut MatMut<'_, f32>,
    ) -> KernelResult {
        (self.kernel())(a, b, group_size, scales_and_zeros, out)
    }
}

impl DispatchStub<Int8PackMmOp> {
    /// Invoke the resolved `int8pack_mm` kernel.
    #[inline(always)]
    pub fn call(
        &self,
        a: MatRef<'_, f32>,
        b: MatRef<'_, i8>,
        scales: &[f32],
        out: &mut MatMut<'_, f32>,
    ) -> KernelResult {
        (self.kernel())(a, b, scales, out)
    }
}
