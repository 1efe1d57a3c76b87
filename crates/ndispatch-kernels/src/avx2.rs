//! AVX2 + FMA kernels.
//!
//! Registered at [`CapabilityTag::Avx2`]. The kernels are private, the
//! registry keeps them to itself, and a stub only selects them when the
//! cached host capability includes `avx2` and `fma`. The `unsafe` inner
//! functions rely on that and nothing else.

use ndispatch_core::{
    CapabilityTag, DispatchError, Int4PackMmOp, Int8PackMmOp, KernelResult, MatMut, MatRef,
    PackedInt4, RegistryBuilder,
};

use crate::checks;
use crate::generic::{dequantize_int4, for_each_out_row};

/// Register the AVX2 kernels.
pub fn register(builder: &mut RegistryBuilder) -> Result<(), DispatchError> {
    builder
        .register::<Int4PackMmOp>(CapabilityTag::Avx2, int4pack_mm)?
        .register::<Int8PackMmOp>(CapabilityTag::Avx2, int8pack_mm)?;
    Ok(())
}

#[target_feature(enable = "avx2,fma")]
unsafe fn hsum(v: std::arch::x86_64::__m256) -> f32 {
    use std::arch::x86_64::*;

    let hi = _mm256_extractf128_ps(v, 1);
    let lo = _mm256_castps256_ps128(v);
    let sum128 = _mm_add_ps(lo, hi);
    let shuf = _mm_movehdup_ps(sum128);
    let sums = _mm_add_ps(sum128, shuf);
    let shuf2 = _mm_movehl_ps(sums, sums);
    _mm_cvtss_f32(_mm_add_ss(sums, shuf2))
}

#[target_feature(enable = "avx2,fma")]
unsafe fn dot_inner(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::*;

    let n = a.len().min(b.len());
    let ap = a.as_ptr();
    let bp = b.as_ptr();
    let mut sum0 = _mm256_setzero_ps();
    let mut sum1 = _mm256_setzero_ps();

    let mut i = 0;
    while i + 16 <= n {
        sum0 = _mm256_fmadd_ps(_mm256_loadu_ps(ap.add(i)), _mm256_loadu_ps(bp.add(i)), sum0);
        sum1 = _mm256_fmadd_ps(
            _mm256_loadu_ps(ap.add(i + 8)),
            _mm256_loadu_ps(bp.add(i + 8)),
            sum1,
        );
        i += 16;
    }
    while i + 8 <= n {
        sum0 = _mm256_fmadd_ps(_mm256_loadu_ps(ap.add(i)), _mm256_loadu_ps(bp.add(i)), sum0);
        i += 8;
    }

    let mut total = hsum(_mm256_add_ps(sum0, sum1));
    while i < n {
        total += a[i] * b[i];
        i += 1;
    }
    total
}

/// `Σ a[i] * b[i]` with `b` widened from int8, 8 lanes at a time.
#[target_feature(enable = "avx2,fma")]
unsafe fn dot_i8_inner(a: &[f32], b: &[i8]) -> f32 {
    use std::arch::x86_64::*;

    let n = a.len().min(b.len());
    let ap = a.as_ptr();
    let bp = b.as_ptr();
    let mut acc = _mm256_setzero_ps();

    let mut i = 0;
    while i + 8 <= n {
        let w = _mm_loadl_epi64(bp.add(i) as *const __m128i);
        let wf = _mm256_cvtepi32_ps(_mm256_cvtepi8_epi32(w));
        acc = _mm256_fmadd_ps(_mm256_loadu_ps(ap.add(i)), wf, acc);
        i += 8;
    }

    let mut total = hsum(acc);
    while i < n {
        total += a[i] * b[i] as f32;
        i += 1;
    }
    total
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    // SAFETY: only called from the kernels below. A stub hands those out only
    // when its prober, capped at `host_capability()`, reports Avx2 or more,
    // so avx2 and fma are present.
    unsafe { dot_inner(a, b) }
}

fn dot_i8(a: &[f32], b: &[i8]) -> f32 {
    // SAFETY: same contract as `dot`.
    unsafe { dot_i8_inner(a, b) }
}

fn int4pack_mm(
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

fn int8pack_mm(
    a: MatRef<'_, f32>,
    b: MatRef<'_, i8>,
    scales: &[f32],
    out: &mut MatMut<'_, f32>,
) -> KernelResult {
    checks::int8pack_mm(a, b, scales, out)?;
    for_each_out_row(out, |m, row| {
        let x = a.row(m);
        for (n, o) in row.iter_mut().enumerate() {
            *o = dot_i8(x, b.row(n)) * scales[n];
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generic;
    use crate::generic::tests::{assert_close, int4_fixture, random_f32};
    use rand::prelude::*;

    fn supported() -> bool {
        is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma")
    }

    #[test]
    fn test_int8pack_mm_matches_generic() {
        if !supported() {
            return;
        }
        let mut rng = StdRng::seed_from_u64(3);
        // K = 37 exercises the scalar tail
        let (m, n, k) = (6, 10, 37);
        let a = random_f32(&mut rng, m * k);
        let b: Vec<i8> = (0..n * k).map(|_| rng.gen_range(-128..=127)).collect();
        let scales = random_f32(&mut rng, n);

        let mut expected = vec![0.0f32; m * n];
        let mut actual = vec![0.0f32; m * n];
        let args = (MatRef::new(&a, m, k).unwrap(), MatRef::new(&b, n, k).unwrap());
        generic::int8pack_mm(args.0, args.1, &scales, &mut MatMut::new(&mut expected, m, n).unwrap())
            .unwrap();
        int8pack_mm(args.0, args.1, &scales, &mut MatMut::new(&mut actual, m, n).unwrap()).unwrap();
        assert_close(&actual, &expected, 1e-3);
    }

    #[test]
    fn test_int4pack_mm_matches_generic() {
        if !supported() {
            return;
        }
        let mut rng = StdRng::seed_from_u64(5);
        let (m, n, k, gs) = (3, 24, 128, 64);
        let a = random_f32(&mut rng, m * k);
        let (_, packed, sz) = int4_fixture(&mut rng, n, k, gs);
        let a = MatRef::new(&a, m, k).unwrap();
        let b = PackedInt4::new(&packed, n, k).unwrap();
        let sz = MatRef::new(&sz, k / gs, n * 2).unwrap();

        let mut expected = vec![0.0f32; m * n];
        let mut actual = vec![0.0f32; m * n];
        generic::int4pack_mm(a, b, gs, sz, &mut MatMut::new(&mut expected, m, n).unwrap()).unwrap();
        int4pack_mm(a, b, gs, sz, &mut MatMut::new(&mut actual, m, n).unwrap()).unwrap();
        assert_close(&actual, &expected, 1e-3);
    }

    #[test]
    fn test_errors_pass_through() {
        if !supported() {
            return;
        }
        let a = [0.0f32; 4];
        let b = [0i8; 4];
        let mut out = [0.0f32; 1];
        let err = int8pack_mm(
            MatRef::new(&a, 1, 4).unwrap(),
            MatRef::new(&b, 1, 4).unwrap(),
            &[],
            &mut MatMut::new(&mut out, 1, 1).unwrap(),
        )
        .unwrap_err();
        assert_eq!(err.error_code(), "SHAPE_MISMATCH");
    }
}
