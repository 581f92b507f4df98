use crate::common_io::{open_buf_writer, read_lines};
use crate::traits::IoOps;
use ndarray::prelude::*;
use rayon::prelude::*;
use std::fmt::{Debug, Display};
use std::io::Write;
use std::str::FromStr;

impl<T> IoOps for Array2<T>
where
    T: FromStr + Send + Display,
    <T as FromStr>::Err: Debug,
{
    type Scalar = T;
    type Mat = Self;

    fn read_file_delim(file: &str, delim: &str, skip: Option<usize>) -> anyhow::Result<Self::Mat> {
        let lines = read_lines(file)?;
        let lines = &lines[skip.unwrap_or(0).min(lines.len())..];

        let rows = lines
            .par_iter()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                line.split(delim)
                    .map(|v| {
                        v.trim()
                            .parse::<T>()
                            .map_err(|e| anyhow::anyhow!("failed to parse {}: {:?}", v, e))
                    })
                    .collect::<anyhow::Result<Vec<T>>>()
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        if rows.is_empty() {
            return Err(anyhow::anyhow!("No data in file {}", file));
        }

        let nrows = rows.len();
        let ncols = rows[0].len();

        if rows.iter().any(|r| r.len() != ncols) {
            return Err(anyhow::anyhow!("ragged rows in {}", file));
        }

        let data = rows.into_iter().flatten().collect::<Vec<_>>();
        Ok(Array2::from_shape_vec((nrows, ncols), data)?)
    }

    fn write_file_delim(&self, file: &str, delim: &str) -> anyhow::Result<()> {
        let mut buf = open_buf_writer(file)?;
        for row in self.rows() {
            let line = row
                .iter()
                .map(|x| format!("{}", x))
                .collect::<Vec<String>>()
                .join(delim);
            writeln!(buf, "{}", line)?;
        }
        buf.flush()?;
        Ok(())
    }
}
