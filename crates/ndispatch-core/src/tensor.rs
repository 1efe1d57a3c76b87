//! Borrowed operand views.
//!
//! Kernels never own memory. They read from [`MatRef`] views, write through
//! [`MatMut`] views, and the packed int4 weights travel as [`PackedInt4`].
//! All constructors validate lengths against the declared shape, so a kernel
//! can index rows without re-checking the backing slice.

use rayon::prelude::*;

use crate::error::KernelError;

fn check_len(len: usize, rows: usize, cols: usize) -> Result<(), KernelError> {
    let expected = rows.checked_mul(cols).ok_or_else(|| {
        KernelError::invalid_argument("shape", format!("{rows} x {cols} overflows usize"))
    })?;
    if len != expected {
        return Err(KernelError::shape("matrix data", &[expected], &[len]));
    }
    Ok(())
}

/// Row-major read-only matrix view.
#[derive(Debug, Clone, Copy)]
pub struct MatRef<'a, T> {
    data: &'a [T],
    rows: usize,
    cols: usize,
}

impl<'a, T> MatRef<'a, T> {
    /// Wrap `data` as a `rows x cols` matrix.
    pub fn new(data: &'a [T], rows: usize, cols: usize) -> Result<Self, KernelError> {
        check_len(data.len(), rows, cols)?;
        Ok(Self { data, rows, cols })
    }

    /// Number of rows.
    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `[rows, cols]`
    #[inline]
    pub fn shape(&self) -> [usize; 2] {
        [self.rows, self.cols]
    }

    /// Backing slice.
    #[inline]
    pub fn as_slice(&self) -> &'a [T] {
        self.data
    }

    /// Row `i`.
    ///
    /// # Panics
    /// Panics if `i >= rows`.
    #[inline]
    pub fn row(&self, i: usize) -> &'a [T] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }
}

/// Row-major mutable matrix view.
#[derive(Debug)]
pub struct MatMut<'a, T> {
    data: &'a mut [T],
    rows: usize,
    cols: usize,
}

impl<'a, T> MatMut<'a, T> {
    /// Wrap `data` as a writable `rows x cols` matrix.
    pub fn new(data: &'a mut [T], rows: usize, cols: usize) -> Result<Self, KernelError> {
        check_len(data.len(), rows, cols)?;
        Ok(Self { data, rows, cols })
    }

    /// Number of rows.
    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `[rows, cols]`
    #[inline]
    pub fn shape(&self) -> [usize; 2] {
        [self.rows, self.cols]
    }

    /// Backing slice.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &*self.data
    }

    /// Mutable backing slice.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut *self.data
    }

    /// Read-only view of the same memory.
    #[inline]
    pub fn view(&self) -> MatRef<'_, T> {
        MatRef {
            data: &*self.data,
            rows: self.rows,
            cols: self.cols,
        }
    }

    /// Mutable row `i`.
    ///
    /// # Panics
    /// Panics if `i >= rows`.
    #[inline]
    pub fn row_mut(&mut self, i: usize) -> &mut [T] {
        let cols = self.cols;
        &mut self.data[i * cols..(i + 1) * cols]
    }
}

/// One row of an outer-product update.
#[derive(Debug)]
pub struct AddrRow<'r> {
    /// Output row, length `cols`
    pub out: &'r mut [f32],
    /// Matching input row, length `cols`
    pub input: &'r [f32],
    /// `vec1[i]` for this row
    pub vec1: f32,
    /// The whole of `vec2`, length `cols`
    pub vec2: &'r [f32],
}

/// Operand bundle for `addr`: `out = beta * input + alpha * (vec1 ⊗ vec2)`.
///
/// `out` and `input` are `[vec1.len(), vec2.len()]`. The iterator hands the
/// kernel one [`AddrRow`] at a time, sequentially or across the rayon pool.
#[derive(Debug)]
pub struct AddrIter<'a> {
    out: MatMut<'a, f32>,
    input: MatRef<'a, f32>,
    vec1: &'a [f32],
    vec2: &'a [f32],
}

impl<'a> AddrIter<'a> {
    /// Validate operand shapes and build the iterator.
    pub fn new(
        out: MatMut<'a, f32>,
        input: MatRef<'a, f32>,
        vec1: &'a [f32],
        vec2: &'a [f32],
    ) -> Result<Self, KernelError> {
        let expected = [vec1.len(), vec2.len()];
        if out.shape() != expected {
            return Err(KernelError::shape("addr output", &expected, &out.shape()));
        }
        if input.shape() != expected {
            return Err(KernelError::shape("addr input", &expected, &input.shape()));
        }
        Ok(Self {
            out,
            input,
            vec1,
            vec2,
        })
    }

    /// Number of output rows (`vec1.len()`).
    #[inline]
    pub fn rows(&self) -> usize {
        self.out.rows()
    }

    /// Number of output columns (`vec2.len()`).
    #[inline]
    pub fn cols(&self) -> usize {
        self.out.cols()
    }

    /// Visit every row in order.
    pub fn for_each_row<F>(&mut self, mut f: F)
    where
        F: FnMut(AddrRow<'_>),
    {
        let cols = self.cols().max(1);
        let vec2 = self.vec2;
        let rows = self
            .out
            .as_mut_slice()
            .chunks_exact_mut(cols)
            .zip(self.input.as_slice().chunks_exact(cols))
            .zip(self.vec1);
        for ((out, input), &vec1) in rows {
            f(AddrRow {
                out,
                input,
                vec1,
                vec2,
            });
        }
    }

    /// Visit every row on the rayon pool.
    pub fn par_for_each_row<F>(&mut self, f: F)
    where
        F: Fn(AddrRow<'_>) + Send + Sync,
    {
        let cols = self.cols().max(1);
        let vec2 = self.vec2;
        self.out
            .as_mut_slice()
            .par_chunks_exact_mut(cols)
            .zip(self.input.as_slice().par_chunks_exact(cols))
            .zip(self.vec1.par_iter())
            .for_each(|((out, input), &vec1)| {
                f(AddrRow {
                    out,
                    input,
                    vec1,
                    vec2,
                })
            });
    }
}

/// Output rows interleaved per packed block.
pub const BLOCK_N: usize = 8;

/// Byte offset and nibble position of `(row, col)` in the packed layout.
///
/// Rows are grouped in blocks of [`BLOCK_N`]. Within a block, column `col`
/// occupies 4 bytes; byte `j` holds row `j` in its low nibble and row `j + 4`
/// in its high nibble.
#[inline]
fn packed_index(k: usize, row: usize, col: usize) -> (usize, bool) {
    let block = row / BLOCK_N;
    let lane = row % BLOCK_N;
    let half = BLOCK_N / 2;
    ((block * k + col) * half + lane % half, lane >= half)
}

fn check_packed(len: usize, n: usize, k: usize) -> Result<(), KernelError> {
    if n % BLOCK_N != 0 {
        return Err(KernelError::invalid_argument(
            "n",
            format!("packed int4 weights need N divisible by {BLOCK_N}, got {n}"),
        ));
    }
    let expected = n.checked_mul(k).map(|nk| nk / 2).ok_or_else(|| {
        KernelError::invalid_argument("k", format!("{n} x {k} int4 weights overflow usize"))
    })?;
    if len != expected {
        return Err(KernelError::shape("packed int4 weights", &[expected], &[len]));
    }
    Ok(())
}

/// Packed int4 weights for `N` output channels and `K` inputs.
#[derive(Debug, Clone, Copy)]
pub struct PackedInt4<'a> {
    data: &'a [u8],
    n: usize,
    k: usize,
}

impl<'a> PackedInt4<'a> {
    /// Output rows interleaved per packed block.
    pub const BLOCK_N: usize = BLOCK_N;

    /// Bytes needed to pack an `[n, k]` weight matrix.
    ///
    /// Saturates when `n * k` overflows; [`PackedInt4::new`] rejects such a
    /// shape.
    pub const fn packed_len(n: usize, k: usize) -> usize {
        n.saturating_mul(k) / 2
    }

    /// Wrap packed bytes for an `[n, k]` weight matrix.
    pub fn new(data: &'a [u8], n: usize, k: usize) -> Result<Self, KernelError> {
        check_packed(data.len(), n, k)?;
        Ok(Self { data, n, k })
    }

    /// Output channels.
    #[inline]
    pub fn n(&self) -> usize {
        self.n
    }

    /// Reduction length.
    #[inline]
    pub fn k(&self) -> usize {
        self.k
    }

    /// Unsigned 4-bit value at `(row, col)`.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> u8 {
        let (idx, high) = packed_index(self.k, row, col);
        let byte = self.data[idx];
        if high {
            byte >> 4
        } else {
            byte & 0x0F
        }
    }
}

/// Writable packed int4 buffer.
#[derive(Debug)]
pub struct PackedInt4Mut<'a> {
    data: &'a mut [u8],
    n: usize,
    k: usize,
}

impl<'a> PackedInt4Mut<'a> {
    /// Wrap an output buffer of [`PackedInt4::packed_len`] bytes.
    pub fn new(data: &'a mut [u8], n: usize, k: usize) -> Result<Self, KernelError> {
        check_packed(data.len(), n, k)?;
        Ok(Self { data, n, k })
    }

    /// Output channels.
    #[inline]
    pub fn n(&self) -> usize {
        self.n
    }

    /// Reduction length.
    #[inline]
    pub fn k(&self) -> usize {
        self.k
    }

    /// Mutable packed bytes.
    #[inline]
    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut *self.data
    }

    /// Store the low 4 bits of `value` at `(row, col)`.
    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: u8) {
        let (idx, high) = packed_index(self.k, row, col);
        let byte = &mut self.data[idx];
        if high {
            *byte = (*byte & 0x0F) | ((value & 0x0F) << 4);
        } else {
            *byte = (*byte & 0xF0) | (value & 0x0F);
        }
    }

    /// Read-only view of the packed bytes.
    pub fn as_packed(&self) -> PackedInt4<'_> {
        PackedInt4 {
            data: &*self.data,
            n: self.n,
            k: self.k,
        }
    }
}
