
use ndarray::{Array1, Array2};
use std::sync::atomic::{AtomicU32, Ordering};

/// Row-major `f32` matrix read and updated by many training workers at once, without locks.
///
/// Every cell holds the bits of an `f32` in a relaxed atomic. A worker may read a row
/// while another one is writing to it and see part of the old values, and two workers
/// adding to the same cell at the same moment may lose one of the two additions. There
/// is no ordering between the updates of different workers. Stochastic training
/// tolerates these stale reads and lost updates, exact reproducibility across runs
/// with more than one worker is given up in exchange for throughput.
pub struct SharedMatrix {
    rows: usize,
    cols: usize,
    cells: Vec<AtomicU32>
}

impl SharedMatrix {

    pub fn from_array(arr: &Array2<f32>) -> SharedMatrix {
        let (rows, cols) = arr.dim();
        let cells = arr.iter().map(|x| AtomicU32::new(x.to_bits())).collect();
        Self { rows, cols, cells }
    }

    pub fn zeros(rows: usize, cols: usize) -> SharedMatrix {
        let cells = (0..rows * cols).map(|_| AtomicU32::new(0f32.to_bits())).collect();
        Self { rows, cols, cells }
    }

    pub fn dim(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    fn row(&self, row: usize) -> &[AtomicU32] {
        &self.cells[row * self.cols..(row + 1) * self.cols]
    }

    /// Copies `row` into `out`.
    pub fn read_row(&self, row: usize, out: &mut Array1<f32>) {
        for (o, cell) in out.iter_mut().zip(self.row(row)) {
            *o = f32::from_bits(cell.load(Ordering::Relaxed));
        }
    }

    /// Adds `row` to `acc`, element-wise.
    pub fn add_row_into(&self, row: usize, acc: &mut Array1<f32>) {
        for (a, cell) in acc.iter_mut().zip(self.row(row)) {
            *a += f32::from_bits(cell.load(Ordering::Relaxed));
        }
    }

    pub fn dot_row(&self, row: usize, v: &Array1<f32>) -> f32 {
        self.row(row).iter().zip(v.iter()).map(|(cell, x)| f32::from_bits(cell.load(Ordering::Relaxed)) * x).sum()
    }

    /// `row += alpha * v`, a plain load then store per cell.
    pub fn scaled_add_to_row(&self, row: usize, alpha: f32, v: &Array1<f32>) {
        for (cell, x) in self.row(row).iter().zip(v.iter()) {
            let updated = f32::from_bits(cell.load(Ordering::Relaxed)) + alpha * x;
            cell.store(updated.to_bits(), Ordering::Relaxed);
        }
    }

    pub fn into_array(self) -> Array2<f32> {
        let (rows, cols) = (self.rows, self.cols);
        let data: Vec<f32> = self.cells.into_iter().map(|cell| f32::from_bits(cell.into_inner())).collect();
        // the cell count always matches rows * cols
        Array2::from_shape_vec((rows, cols), data).unwrap_or_else(|_| Array2::zeros((rows, cols)))
    }
}
