use crate::common_io::*;
use crate::mtx_io::*;
use rayon::prelude::*;
use std::io::Write;

/// One sparse row: strictly increasing column indices and their values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseRow {
    pub indices: Vec<usize>,
    pub values: Vec<f64>,
}

impl SparseRow {
    /// Keep non-zero entries of a dense slice
    pub fn from_dense(dense: &[f64]) -> Self {
        let (indices, values) = dense
            .iter()
            .enumerate()
            .filter(|(_, &x)| x != 0.0)
            .map(|(j, &x)| (j, x))
            .unzip();
        SparseRow { indices, values }
    }

    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    /// sum of absolute values
    pub fn norm1(&self) -> f64 {
        self.values.iter().map(|x| x.abs()).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.indices.iter().copied().zip(self.values.iter().copied())
    }

    pub fn to_dense(&self, ncol: usize) -> Vec<f64> {
        let mut ret = vec![0.0; ncol];
        for (j, x) in self.iter() {
            ret[j] += x;
        }
        ret
    }
}

/// A row-indexed collection of sparse vectors of the same length
#[derive(Debug, Clone, PartialEq)]
pub struct SparseRows {
    pub ncol: usize,
    pub rows: Vec<SparseRow>,
}

impl SparseRows {
    pub fn nrows(&self) -> usize {
        self.rows.len()
    }

    pub fn ncols(&self) -> usize {
        self.ncol
    }

    pub fn nnz(&self) -> usize {
        self.rows.iter().map(|r| r.nnz()).sum()
    }

    /// Assemble rows from `(row, col, value)` triplets; duplicated
    /// entries are added up, explicit zeros dropped.
    /// * `nrow` - number of rows
    /// * `ncol` - number of columns
    /// * `triplets` - 0-based triplets in any order
    pub fn from_triplets(nrow: usize, ncol: usize, triplets: &[Triplet]) -> anyhow::Result<Self> {
        let mut sorted = triplets.to_vec();
        sorted.sort_by_key(|&(r, c, _)| (r, c));

        let mut rows = vec![SparseRow::default(); nrow];
        for (r, c, x) in sorted {
            if r >= nrow || c >= ncol {
                return Err(anyhow::anyhow!(
                    "triplet ({}, {}) outside {} x {}",
                    r,
                    c,
                    nrow,
                    ncol
                ));
            }
            let row = &mut rows[r];
            if row.indices.last() == Some(&c) {
                if let Some(v) = row.values.last_mut() {
                    *v += x;
                }
            } else {
                row.indices.push(c);
                row.values.push(x);
            }
        }

        rows.par_iter_mut().for_each(|row| {
            let (indices, values) = row
                .iter()
                .filter(|&(_, x)| x != 0.0)
                .unzip::<usize, f64, Vec<_>, Vec<_>>();
            row.indices = indices;
            row.values = values;
        });

        Ok(SparseRows { ncol, rows })
    }

    pub fn from_dense_rows(ncol: usize, dense: &[Vec<f64>]) -> anyhow::Result<Self> {
        if let Some(bad) = dense.iter().find(|r| r.len() != ncol) {
            return Err(anyhow::anyhow!("row of length {} != {}", bad.len(), ncol));
        }
        Ok(SparseRows {
            ncol,
            rows: dense.iter().map(|r| SparseRow::from_dense(r)).collect(),
        })
    }

    pub fn to_triplets(&self) -> Vec<Triplet> {
        self.rows
            .iter()
            .enumerate()
            .flat_map(|(i, row)| row.iter().map(move |(j, x)| (i, j, x)))
            .collect()
    }

    ///
    /// Read a row-indexed collection.
    ///
    /// * `.mtx` / `.mtx.gz` - MatrixMarket, rows are vectors
    /// * anything else - a `nrow ncol` header followed by lines of
    ///   `row<TAB>col:value col:value ...` (0-based)
    ///
    pub fn read_file(file: &str) -> anyhow::Result<Self> {
        if file.ends_with(".mtx") || file.ends_with(".mtx.gz") {
            let (triplets, (nrow, ncol, _)) = read_mtx_triplets(file)?;
            return Self::from_triplets(nrow, ncol, &triplets);
        }

        let ReadLinesOut { lines, header } = read_lines_of_words(file, 0)?;
        if header.len() != 2 {
            return Err(anyhow::anyhow!("expected `nrow ncol` header in {}", file));
        }
        let nrow = header[0].parse::<usize>()?;
        let ncol = header[1].parse::<usize>()?;

        let parsed = lines
            .par_iter()
            .map(|words| -> anyhow::Result<Vec<Triplet>> {
                let (row, entries) = words
                    .split_first()
                    .ok_or(anyhow::anyhow!("empty line"))?;
                let row = row.parse::<usize>()?;
                entries
                    .iter()
                    .map(|e| {
                        let (c, x) = e
                            .split_once(':')
                            .ok_or(anyhow::anyhow!("expected col:value, found {}", e))?;
                        Ok((row, c.parse::<usize>()?, x.parse::<f64>()?))
                    })
                    .collect()
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let triplets = parsed.into_iter().flatten().collect::<Vec<_>>();
        Self::from_triplets(nrow, ncol, &triplets)
    }

    /// Write in the format `read_file` expects for non-mtx files.
    /// Empty rows are written as a bare row index.
    pub fn write_file(&self, file: &str) -> anyhow::Result<()> {
        if file.ends_with(".mtx") || file.ends_with(".mtx.gz") {
            return write_mtx_triplets(&self.to_triplets(), self.nrows(), self.ncols(), file);
        }

        let mut buf = open_buf_writer(file)?;
        writeln!(buf, "{}\t{}", self.nrows(), self.ncols())?;
        for (i, row) in self.rows.iter().enumerate() {
            let entries = row
                .iter()
                .map(|(j, x)| format!("{}:{}", j, x))
                .collect::<Vec<_>>()
                .join(" ");
            writeln!(buf, "{}\t{}", i, entries)?;
        }
        buf.flush()?;
        Ok(())
    }
}
