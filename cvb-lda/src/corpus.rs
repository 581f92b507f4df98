use crate::error::CvbError;
use log::info;
use matrix_util::sparse_rows::{SparseRow, SparseRows};
use matrix_util::utils::generate_partition_intervals;

/// Read-only document-term counts: row `d` is document `d`, column `w`
/// is term `w`
#[derive(Debug, Clone)]
pub struct Corpus {
    rows: SparseRows,
}

impl Corpus {
    pub fn new(rows: SparseRows) -> anyhow::Result<Self> {
        if rows.nrows() == 0 {
            return Err(CvbError::EmptyCorpus {
                source_name: "in-memory rows".into(),
            }
            .into());
        }
        Self::check(&rows)?;
        Ok(Corpus { rows })
    }

    /// Load a row-indexed collection (`.mtx`, `.mtx.gz` or sparse rows)
    pub fn read_file(file: &str) -> anyhow::Result<Self> {
        let rows = SparseRows::read_file(file)?;
        if rows.nrows() == 0 {
            return Err(CvbError::EmptyCorpus {
                source_name: file.into(),
            }
            .into());
        }
        Self::check(&rows)?;
        info!(
            "corpus {}: {} documents x {} terms, {} non-zeros",
            file,
            rows.nrows(),
            rows.ncols(),
            rows.nnz()
        );
        Ok(Corpus { rows })
    }

    fn check(rows: &SparseRows) -> anyhow::Result<()> {
        // ids travel as i32 in shuffle keys
        let limit = i32::MAX as usize;
        if rows.nrows() > limit || rows.ncols() > limit {
            anyhow::bail!(
                "{} x {} corpus does not fit 32-bit document/term ids",
                rows.nrows(),
                rows.ncols()
            );
        }
        for (d, row) in rows.rows.iter().enumerate() {
            if let Some(&x) = row.values.iter().find(|&&x| !(x.is_finite() && x >= 0.0)) {
                anyhow::bail!("document {} has an invalid term count {}", d, x);
            }
        }
        Ok(())
    }

    pub fn num_docs(&self) -> usize {
        self.rows.nrows()
    }

    pub fn num_terms(&self) -> usize {
        self.rows.ncols()
    }

    pub fn doc(&self, doc_id: usize) -> &SparseRow {
        &self.rows.rows[doc_id]
    }

    pub fn docs(&self) -> &[SparseRow] {
        &self.rows.rows
    }

    pub fn rows(&self) -> &SparseRows {
        &self.rows
    }

    pub fn total_tokens(&self) -> f64 {
        self.rows.rows.iter().map(|r| r.norm1()).sum()
    }

    /// Contiguous document ranges `[lb, ub)`, one per map task
    pub fn shards(&self, num_shards: usize) -> Vec<(usize, usize)> {
        generate_partition_intervals(self.num_docs(), num_shards)
    }
}
