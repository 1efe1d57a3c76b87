//! AVX-512 kernels.
//!
//! Registered at [`CapabilityTag::Avx512`]. A prober never reports that tag
//! unless the host has F, BW, VL, DQ and FMA, which is what
//! `#[target_feature]` below enables.

use ndispatch_core::{
    AddrIter, AddrOp, AddrRow, CapabilityTag, DispatchError, Int8PackMmOp, KernelResult, MatMut,
    MatRef, RegistryBuilder,
};

use crate::checks;
use crate::generic::{for_each_addr_row, for_each_out_row};

/// Register the AVX-512 kernels.
pub fn register(builder: &mut RegistryBuilder) -> Result<(), DispatchError> {
    builder
        .register::<AddrOp>(CapabilityTag::Avx512, addr)?
        .register::<Int8PackMmOp>(CapabilityTag::Avx512, int8pack_mm)?;
    Ok(())
}

#[target_feature(enable = "avx512f,avx512bw,avx512vl,avx512dq,fma")]
unsafe fn addr_row_inner(row: AddrRow<'_>, beta: f32, alpha: f32) {
    use std::arch::x86_64::*;

    let n = row.out.len();
    let scale = alpha * row.vec1;
    let scale_v = _mm512_set1_ps(scale);
    let beta_v = _mm512_set1_ps(beta);
    let op = row.out.as_mut_ptr();
    let vp = row.vec2.as_ptr();
    let xp = row.input.as_ptr();

    let mut i = 0;
    if beta == 0.0 {
        while i + 16 <= n {
            let v = _mm512_loadu_ps(vp.add(i));
            _mm512_storeu_ps(op.add(i), _mm512_mul_ps(scale_v, v));
            i += 16;
        }
        while i < n {
            row.out[i] = scale * row.vec2[i];
            i += 1;
        }
    } else {
        while i + 16 <= n {
            let v = _mm512_loadu_ps(vp.add(i));
            let x = _mm512_loadu_ps(xp.add(i));
            _mm512_storeu_ps(op.add(i), _mm512_fmadd_ps(scale_v, v, _mm512_mul_ps(beta_v, x)));
            i += 16;
        }
        while i < n {
            row.out[i] = beta * row.input[i] + scale * row.vec2[i];
            i += 1;
        }
    }
}

/// `Σ a[i] * b[i]` with `b` widened from int8, 16 lanes at a time.
#[target_feature(enable = "avx512f,avx512bw,avx512vl,avx512dq,fma")]
unsafe fn dot_i8_inner(a: &[f32], b: &[i8]) -> f32 {
    use std::arch::x86_64::*;

    let n = a.len().min(b.len());
    let ap = a.as_ptr();
    let bp = b.as_ptr();
    let mut acc = _mm512_setzero_ps();

    let mut i = 0;
    while i + 16 <= n {
        let w = _mm_loadu_si128(bp.add(i) as *const __m128i);
        let wf = _mm512_cvtepi32_ps(_mm512_cvtepi8_epi32(w));
        acc = _mm512_fmadd_ps(_mm512_loadu_ps(ap.add(i)), wf, acc);
        i += 16;
    }

    let mut total = _mm512_reduce_add_ps(acc);
    while i < n {
        total += a[i] * b[i] as f32;
        i += 1;
    }
    total
}

fn addr(iter: &mut AddrIter<'_>, beta: f32, alpha: f32) -> KernelResult {
    // SAFETY: only a stub hands out this kernel, and every prober caps its
    // tag at `host_capability()`, so the AVX-512 features are present.
    for_each_addr_row(iter, |row| unsafe { addr_row_inner(row, beta, alpha) });
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
            // SAFETY: as in `addr`, the host supports AVX-512.
            *o = unsafe { dot_i8_inner(x, b.row(n)) } * scales[n];
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generic;
    use crate::generic::tests::{assert_close, random_f32};
    use rand::prelude::*;

    fn supported() -> bool {
        is_x86_feature_detected!("avx512f")
            && is_x86_feature_detected!("avx512bw")
            && is_x86_feature_detected!("avx512vl")
            && is_x86_feature_detected!("avx512dq")
            && is_x86_feature_detected!("fma")
    }

    fn run_addr(kernel: fn(&mut AddrIter<'_>, f32, f32) -> KernelResult, beta: f32) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(9);
        let (rows, cols) = (7, 45);
        let vec1 = random_f32(&mut rng, rows);
        let vec2 = random_f32(&mut rng, cols);
        let mut input = random_f32(&mut rng, rows * cols);
        if beta == 0.0 {
            input[3] = f32::NAN;
        }
        let mut out = vec![0.0f32; rows * cols];
        let mut iter = AddrIter::new(
            MatMut::new(&mut out, rows, cols).unwrap(),
            MatRef::new(&input, rows, cols).unwrap(),
            &vec1,
            &vec2,
        )
        .unwrap();
        kernel(&mut iter, beta, 0.75).unwrap();
        out
    }

    #[test]
    fn test_addr_matches_generic() {
        if !supported() {
            return;
        }
        for beta in [0.0f32, 1.5] {
            let expected = run_addr(generic::addr, beta);
            let actual = run_addr(addr, beta);
            assert!(actual.iter().all(|v| v.is_finite()));
            assert_close(&actual, &expected, 1e-5);
        }
    }

    #[test]
    fn test_int8pack_mm_matches_generic() {
        if !supported() {
            return;
        }
        let mut rng = StdRng::seed_from_u64(13);
        let (m, n, k) = (2, 9, 70);
        let a = random_f32(&mut rng, m * k);
        let b: Vec<i8> = (0..n * k).map(|_| rng.gen_range(-128..=127)).collect();
        let scales = random_f32(&mut rng, n);
        let a = MatRef::new(&a, m, k).unwrap();
        let b = MatRef::new(&b, n, k).unwrap();

        let mut expected = vec![0.0f32; m * n];
        let mut actual = vec![0.0f32; m * n];
        generic::int8pack_mm(a, b, &scales, &mut MatMut::new(&mut expected, m, n).unwrap()).unwrap();
        int8pack_mm(a, b, &scales, &mut MatMut::new(&mut actual, m, n).unwrap()).unwrap();
        assert_close(&actual, &expected, 1e-3);
    }
}
