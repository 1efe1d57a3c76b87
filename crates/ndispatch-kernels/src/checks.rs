//! Operand validation shared by every kernel tier.

use ndispatch_core::{KernelError, KernelResult, MatMut, MatRef, PackedInt4, PackedInt4Mut};

/// Group sizes the int4 matmul accepts.
pub(crate) const INT4_GROUP_SIZES: [usize; 4] = [32, 64, 128, 256];

/// Largest unsigned 4-bit value.
const INT4_MAX: u8 = 15;

pub(crate) fn weight_to_int4pack(weights: MatRef<'_, u8>, packed: &PackedInt4Mut<'_>) -> KernelResult {
    let expected = [packed.n(), packed.k()];
    if weights.shape() != expected {
        return Err(KernelError::shape("int4 weights", &expected, &weights.shape()));
    }
    if let Some(pos) = weights.as_slice().iter().position(|&v| v > INT4_MAX) {
        let cols = weights.cols().max(1);
        return Err(KernelError::invalid_argument(
            "weights",
            format!(
                "value {} at [{}, {}] does not fit in 4 bits",
                weights.as_slice()[pos],
                pos / cols,
                pos % cols
            ),
        ));
    }
    Ok(())
}

pub(crate) fn int4pack_mm(
    a: MatRef<'_, f32>,
    b: PackedInt4<'_>,
    group_size: usize,
    scales_and_zeros: MatRef<'_, f32>,
    out: &MatMut<'_, f32>,
) -> KernelResult {
    let k = b.k();
    if a.cols() != k {
        return Err(KernelError::shape("int4pack_mm input", &[a.rows(), k], &a.shape()));
    }
    if !INT4_GROUP_SIZES.contains(&group_size) {
        return Err(KernelError::invalid_argument(
            "group_size",
            format!("must be one of 32, 64, 128, 256, got {group_size}"),
        ));
    }
    if k % group_size != 0 {
        return Err(KernelError::invalid_argument(
            "group_size",
            format!("{group_size} does not divide K = {k}"),
        ));
    }
    let pairs = b.n().checked_mul(2).ok_or_else(|| {
        KernelError::invalid_argument("n", format!("{} scale/zero pairs overflow usize", b.n()))
    })?;
    let expected = [k / group_size, pairs];
    if scales_and_zeros.shape() != expected {
        return Err(KernelError::shape(
            "scales_and_zeros",
            &expected,
            &scales_and_zeros.shape(),
        ));
    }
    let expected = [a.rows(), b.n()];
    if out.shape() != expected {
        return Err(KernelError::shape("int4pack_mm output", &expected, &out.shape()));
    }
    Ok(())
}

pub(crate) fn int8pack_mm(
    a: MatRef<'_, f32>,
    b: MatRef<'_, i8>,
    scales: &[f32],
    out: &MatMut<'_, f32>,
) -> KernelResult {
    if a.cols() != b.cols() {
        return Err(KernelError::shape(
            "int8pack_mm input",
            &[a.rows(), b.cols()],
            &a.shape(),
        ));
    }
    if scales.len() != b.rows() {
        return Err(KernelError::shape("scales", &[b.rows()], &[scales.len()]));
    }
    let expected = [a.rows(), b.rows()];
    if out.shape() != expected {
        return Err(KernelError::shape("int8pack_mm output", &expected, &out.shape()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_out_of_range_nibble() {
        let weights = vec![0u8, 3, 16, 2, 1, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0];
        let mut buf = vec![0u8; 8];
        let packed = PackedInt4Mut::new(&mut buf, 8, 2).unwrap();
        let err = weight_to_int4pack(MatRef::new(&weights, 8, 2).unwrap(), &packed).unwrap_err();
        assert!(err.to_string().contains("value 16 at [1, 0]"));
    }

    #[test]
    fn test_group_size_must_divide_k() {
        let a = vec![0.0f32; 96];
        let packed = vec![0u8; 8 * 96 / 2];
        let sz = vec![0.0f32; 16];
        let mut out = vec![0.0f32; 8];
        let out = MatMut::new(&mut out, 1, 8).unwrap();

        let err = int4pack_mm(
            MatRef::new(&a, 1, 96).unwrap(),
            PackedInt4::new(&packed, 8, 96).unwrap(),
            64,
            MatRef::new(&sz, 1, 16).unwrap(),
            &out,
        )
        .unwrap_err();
        assert!(matches!(err, KernelError::InvalidArgument { name: "group_size", .. }));

        let err = int4pack_mm(
            MatRef::new(&a, 1, 96).unwrap(),
            PackedInt4::new(&packed, 8, 96).unwrap(),
            48,
            MatRef::new(&sz, 1, 16).unwrap(),
            &out,
        )
        .unwrap_err();
        assert!(err.to_string().contains("must be one of"));
    }

    #[test]
    fn test_scale_columns_overflow_is_an_error() {
        let n = usize::MAX - 7;
        let mut out: Vec<f32> = Vec::new();
        let out = MatMut::new(&mut out, 0, 0).unwrap();
        let err = int4pack_mm(
            MatRef::new(&[], 0, 0).unwrap(),
            PackedInt4::new(&[], n, 0).unwrap(),
            32,
            MatRef::new(&[], 0, 0).unwrap(),
            &out,
        )
        .unwrap_err();
        assert!(matches!(err, KernelError::InvalidArgument { name: "n", .. }));
    }

    #[test]
    fn test_int8_scales_length() {
        let a = vec![0.0f32; 4];
        let b = vec![0i8; 12];
        let mut out = vec![0.0f32; 3];
        let out = MatMut::new(&mut out, 1, 3).unwrap();
        let err = int8pack_mm(
            MatRef::new(&a, 1, 4).unwrap(),
            MatRef::new(&b, 3, 4).unwrap(),
            &[1.0, 1.0],
            &out,
        )
        .unwrap_err();
        assert_eq!(err, KernelError::shape("scales", &[3], &[2]));
    }
}
