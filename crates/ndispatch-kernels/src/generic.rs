//! Portable reference kernels.
//!
//! These run on every target and are registered at
//! [`CapabilityTag::Default`]. Vector tiers must agree with them up to float
//! reassociation.

use rayon::prelude::*;

use ndispatch_core::{
    AddrIter, AddrOp, AddrRow, CapabilityTag, DispatchError, Int4PackMmOp, Int8PackMmOp,
    KernelResult, MatMut, MatRef, PackedInt4, PackedInt4Mut, RegistryBuilder, WeightToInt4PackOp,
    BLOCK_N,
};

use crate::{checks, PARALLEL_THRESHOLD};

/// Register the baseline implementation of every operation.
pub fn register(builder: &mut RegistryBuilder) -> Result<(), DispatchError> {
    builder
        .register::<AddrOp>(CapabilityTag::Default, addr)?
        .register::<WeightToInt4PackOp>(CapabilityTag::Default, weight_to_int4pack)?
        .register::<Int4PackMmOp>(CapabilityTag::Default, int4pack_mm)?
        .register::<Int8PackMmOp>(CapabilityTag::Default, int8pack_mm)?;
    Ok(())
}

/// Run `f(row_index, row)` over every output row, in parallel once there
/// are enough rows.
pub(crate) fn for_each_out_row<F>(out: &mut MatMut<'_, f32>, f: F)
where
    F: Fn(usize, &mut [f32]) + Send + Sync,
{
    let cols = out.cols();
    if cols == 0 {
        return;
    }
    if out.rows() >= PARALLEL_THRESHOLD {
        out.as_mut_slice()
            .par_chunks_mut(cols)
            .enumerate()
            .for_each(|(m, row)| f(m, row));
    } else {
        for (m, row) in out.as_mut_slice().chunks_mut(cols).enumerate() {
            f(m, row);
        }
    }
}

/// Run `f` over every `addr` row, in parallel once there are enough rows.
pub(crate) fn for_each_addr_row<F>(iter: &mut AddrIter<'_>, f: F)
where
    F: Fn(AddrRow<'_>) + Send + Sync,
{
    if iter.rows() >= PARALLEL_THRESHOLD {
        iter.par_for_each_row(f);
    } else {
        iter.for_each_row(f);
    }
}

fn addr_row(row: AddrRow<'_>, beta: f32, alpha: f32) {
    let scale = alpha * row.vec1;
    if beta == 0.0 {
        for (o, &v) in row.out.iter_mut().zip(row.vec2) {
            *o = scale * v;
        }
    } else {
        for ((o, &x), &v) in row.out.iter_mut().zip(row.input).zip(row.vec2) {
            *o = beta * x + scale * v;
        }
    }
}

/// `out = beta * input + alpha * (vec1 ⊗ vec2)`.
///
/// With `beta == 0` the input is never read, so NaN or infinity in it does
/// not reach the output.
pub fn addr(iter: &mut AddrIter<'_>, beta: f32, alpha: f32) -> KernelResult {
    for_each_addr_row(iter, |row| addr_row(row, beta, alpha));
    Ok(())
}

/// Pack `[N, K]` nibbles into the blocked int4 layout.
pub fn weight_to_int4pack(weights: MatRef<'_, u8>, packed: &mut PackedInt4Mut<'_>) -> KernelResult {
    checks::weight_to_int4pack(weights, packed)?;
    let k = packed.k();
    if k == 0 || packed.n() == 0 {
        return Ok(());
    }

    let half = BLOCK_N / 2;
    packed
        .as_mut_bytes()
        .par_chunks_mut(k * half)
        .enumerate()
        .for_each(|(b, block)| {
            let base = b * BLOCK_N;
            for j in 0..half {
                let lo = weights.row(base + j);
                let hi = weights.row(base + j + half);
                for col in 0..k {
                    block[col * half + j] = lo[col] | (hi[col] << 4);
                }
            }
        });
    Ok(())
}

/// Dequantize packed int4 weights into a dense `[N, K]` matrix.
///
/// `W[n][k] = (q[n][k] - 8) * scale[g][n] + zero[g][n]` with
/// `g = k / group_size`. Operands are assumed validated.
pub(crate) fn dequantize_int4(
    b: PackedInt4<'_>,
    group_size: usize,
    scales_and_zeros: MatRef<'_, f32>,
) -> Vec<f32> {
    let (n, k) = (b.n(), b.k());
    let mut dense = vec![0.0f32; n * k];
    if k == 0 {
        return dense;
    }
    dense.par_chunks_mut(k).enumerate().for_each(|(row, w)| {
        for (col, slot) in w.iter_mut().enumerate() {
            let sz = scales_and_zeros.row(col / group_size);
            let scale = sz[2 * row];
            let zero = sz[2 * row + 1];
            *slot = (b.get(row, col) as f32 - 8.0) * scale + zero;
        }
    });
    dense
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// `out[M, N] = A[M, K] · dequant(W)ᵀ`.
pub fn int4pack_mm(
    a: MatRef<'_, f32>,
    b: PackedInt4<'_>,
    group_size: usize,
    scales_and_zeros: MatRef<'_, f32>,
    out: &mut MatMut<'_, f32>,
) -> KernelResult {
    checks::int4pack_mm(a, b, group_size, scales_and_zeros, out)?;
    let k = b.k();
    let w = dequantize_int4(b, group_size, scales_and_zeros);
    for_each_out_row(out, |m, row| {
        let x = a.row(m);
        for (n, o) in row.iter_mut().enumerate() {
            *o = dot(x, &w[n * k..(n + 1) * k]);
        }
    });
    Ok(())
}

/// `out[m][n] = scales[n] * Σ_k A[m][k] * B[n][k]`.
pub fn int8pack_mm(
    a: MatRef<'_, f32>,
    b: MatRef<'_, i8>,
    scales: &[f32],
    out: &mut MatMut<'_, f32>,
) -> KernelResult {
    checks::int8pack_mm(a, b, scales, out)?;
    for_each_out_row(out, |m, row| {
        let x = a.row(m);
        for (n, o) in row.iter_mut().enumerate() {
            let acc: f32 = x.iter().zip(b.row(n)).map(|(&x, &w)| x * w as f32).sum();
            *o = acc * scales[n];
        }
    });
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ndispatch_core::KernelError;
    use rand::prelude::*;

    pub(crate) fn assert_close(actual: &[f32], expected: &[f32], tol: f32) {
        assert_eq!(actual.len(), expected.len());
        for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
            let bound = tol * e.abs().max(1.0);
            assert!((a - e).abs() <= bound, "index {i}: {a} vs {e}");
        }
    }

    pub(crate) fn random_f32(rng: &mut StdRng, len: usize) -> Vec<f32> {
        (0..len).map(|_| rng.gen_range(-1.0..1.0)).collect()
    }

    /// Quantized weights, their packed form and grouped scales/zeros.
    pub(crate) fn int4_fixture(
        rng: &mut StdRng,
        n: usize,
        k: usize,
        group_size: usize,
    ) -> (Vec<u8>, Vec<u8>, Vec<f32>) {
        let q: Vec<u8> = (0..n * k).map(|_| rng.gen_range(0..16)).collect();
        let mut packed = vec![0u8; PackedInt4::packed_len(n, k)];
        let mut view = PackedInt4Mut::new(&mut packed, n, k).unwrap();
        weight_to_int4pack(MatRef::new(&q, n, k).unwrap(), &mut view).unwrap();
        let sz: Vec<f32> = (0..(k / group_size) * n * 2)
            .map(|i| {
                if i % 2 == 0 {
                    rng.gen_range(0.01..0.1)
                } else {
                    rng.gen_range(-0.5..0.5)
                }
            })
            .collect();
        (q, packed, sz)
    }

    #[test]
    fn test_addr_matches_formula() {
        let vec1 = [1.0f32, 2.0, 3.0, 4.0, 5.0];
        let vec2 = [0.5f32, -1.0];
        let input: Vec<f32> = (0..10).map(|i| i as f32).collect();
        let mut out = vec![0.0f32; 10];
        let mut iter = AddrIter::new(
            MatMut::new(&mut out, 5, 2).unwrap(),
            MatRef::new(&input, 5, 2).unwrap(),
            &vec1,
            &vec2,
        )
        .unwrap();
        addr(&mut iter, 2.0, 3.0).unwrap();

        let expected: Vec<f32> = (0..10)
            .map(|idx| 2.0 * input[idx] + 3.0 * vec1[idx / 2] * vec2[idx % 2])
            .collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_addr_beta_zero_ignores_nan_input() {
        let vec1 = [1.0f32, 2.0];
        let vec2 = [3.0f32, 4.0];
        let input = [f32::NAN, f32::INFINITY, f32::NAN, 1.0];
        let mut out = vec![0.0f32; 4];
        let mut iter = AddrIter::new(
            MatMut::new(&mut out, 2, 2).unwrap(),
            MatRef::new(&input, 2, 2).unwrap(),
            &vec1,
            &vec2,
        )
        .unwrap();
        addr(&mut iter, 0.0, 1.0).unwrap();
        assert_eq!(out, vec![3.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn test_pack_layout_matches_view() {
        let mut rng = StdRng::seed_from_u64(7);
        let (n, k) = (16, 5);
        let q: Vec<u8> = (0..n * k).map(|_| rng.gen_range(0..16)).collect();
        let mut packed = vec![0u8; PackedInt4::packed_len(n, k)];
        let mut view = PackedInt4Mut::new(&mut packed, n, k).unwrap();
        weight_to_int4pack(MatRef::new(&q, n, k).unwrap(), &mut view).unwrap();

        let view = PackedInt4::new(&packed, n, k).unwrap();
        for row in 0..n {
            for col in 0..k {
                assert_eq!(view.get(row, col), q[row * k + col]);
            }
        }
        // block 1, col 0, byte 2: row 10 (low) | row 14 (high)
        assert_eq!(packed[k * 4 + 2], q[10 * k] | (q[14 * k] << 4));
    }

    #[test]
    fn test_pack_rejects_wide_values() {
        let q = vec![16u8; 8 * 2];
        let mut packed = vec![0u8; 8];
        let mut view = PackedInt4Mut::new(&mut packed, 8, 2).unwrap();
        let err = weight_to_int4pack(MatRef::new(&q, 8, 2).unwrap(), &mut view).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ARGUMENT");
    }

    #[test]
    fn test_int4pack_mm_against_dense_reference() {
        let mut rng = StdRng::seed_from_u64(11);
        let (m, n, k, gs) = (5, 16, 64, 32);
        let a = random_f32(&mut rng, m * k);
        let (q, packed, sz) = int4_fixture(&mut rng, n, k, gs);

        let mut out = vec![0.0f32; m * n];
        int4pack_mm(
            MatRef::new(&a, m, k).unwrap(),
            PackedInt4::new(&packed, n, k).unwrap(),
            gs,
            MatRef::new(&sz, k / gs, n * 2).unwrap(),
            &mut MatMut::new(&mut out, m, n).unwrap(),
        )
        .unwrap();

        let mut expected = vec![0.0f32; m * n];
        for i in 0..m {
            for j in 0..n {
                let mut acc = 0.0f32;
                for kk in 0..k {
                    let g = kk / gs;
                    let scale = sz[g * n * 2 + 2 * j];
                    let zero = sz[g * n * 2 + 2 * j + 1];
                    let w = (q[j * k + kk] as f32 - 8.0) * scale + zero;
                    acc += a[i * k + kk] * w;
                }
                expected[i * n + j] = acc;
            }
        }
        assert_close(&out, &expected, 1e-4);
    }

    #[test]
    fn test_int8pack_mm_small() {
        let a = [1.0f32, 2.0, 3.0];
        let b = [1i8, 0, -1, 2, 2, 2];
        let scales = [0.5f32, 2.0];
        let mut out = vec![0.0f32; 2];
        int8pack_mm(
            MatRef::new(&a, 1, 3).unwrap(),
            MatRef::new(&b, 2, 3).unwrap(),
            &scales,
            &mut MatMut::new(&mut out, 1, 2).unwrap(),
        )
        .unwrap();
        assert_eq!(out, vec![-1.0, 24.0]);
    }

    #[test]
    fn test_int8pack_mm_shape_error() {
        let a = [0.0f32; 4];
        let b = [0i8; 6];
        let mut out = vec![0.0f32; 2];
        let err = int8pack_mm(
            MatRef::new(&a, 1, 4).unwrap(),
            MatRef::new(&b, 2, 3).unwrap(),
            &[1.0, 1.0],
            &mut MatMut::new(&mut out, 1, 2).unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, KernelError::Shape { what: "int8pack_mm input", .. }));
    }
}
