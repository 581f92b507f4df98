use crate::common_io::*;
use rayon::prelude::*;
use std::io::Write;

/// `(row, column, value)` with 0-based indices
pub type Triplet = (usize, usize, f64);

/// Write the triplets into a MatrixMarket file with 1-based indices
/// * `triplets` - the triplets to write
/// * `nrow` - number of rows
/// * `ncol` - number of columns
/// * `mtx_file` - the output file (e.g., "matrix.mtx.gz")
pub fn write_mtx_triplets(
    triplets: &[Triplet],
    nrow: usize,
    ncol: usize,
    mtx_file: &str,
) -> anyhow::Result<()> {
    if let Some(parent_dir) = std::path::Path::new(mtx_file).parent() {
        std::fs::create_dir_all(parent_dir)?;
    }

    let mut buf = open_buf_writer(mtx_file)?;

    writeln!(buf, "%%MatrixMarket matrix coordinate real general")?;
    writeln!(buf, "{}\t{}\t{}", nrow, ncol, triplets.len())?;

    for (row, col, val) in triplets {
        writeln!(buf, "{}\t{}\t{}", row + 1, col + 1, val)?;
    }

    buf.flush()?;
    Ok(())
}

/// Read a matrix market file and return triplets sorted by row, then
/// column, along with the declared `(nrow, ncol, nnz)` shape
/// * `mtx_file` - Path to the matrix market file
pub fn read_mtx_triplets(mtx_file: &str) -> anyhow::Result<(Vec<Triplet>, (usize, usize, usize))> {
    let ReadLinesOut { lines, header } = read_lines_of_words(mtx_file, 0)?;

    if header.len() != 3 {
        return Err(anyhow::anyhow!("Failed to parse mtx header in {}", mtx_file));
    }

    let nrow = header[0].parse::<usize>()?;
    let ncol = header[1].parse::<usize>()?;
    let nnz = header[2].parse::<usize>()?;

    // 1-based on disk
    fn parse_row_col_val(words: &[Box<str>]) -> anyhow::Result<Triplet> {
        if words.len() != 3 {
            return Err(anyhow::anyhow!("expected 3 fields, found {}", words.len()));
        }
        let row = words[0].parse::<usize>()?;
        let col = words[1].parse::<usize>()?;
        let val = words[2].parse::<f64>()?;
        if row == 0 || col == 0 {
            return Err(anyhow::anyhow!("mtx indices are 1-based"));
        }
        Ok((row - 1, col - 1, val))
    }

    let mut triplets = lines
        .par_iter()
        .map(|words| parse_row_col_val(words))
        .collect::<anyhow::Result<Vec<_>>>()?;

    if let Some(&(r, c, _)) = triplets.iter().find(|&&(r, c, _)| r >= nrow || c >= ncol) {
        return Err(anyhow::anyhow!(
            "entry ({}, {}) outside the declared {} x {} shape",
            r + 1,
            c + 1,
            nrow,
            ncol
        ));
    }

    triplets.par_sort_by_key(|&(row, col, _)| (row, col));
    Ok((triplets, (nrow, ncol, nnz)))
}
