/// Read and write matrices from and to delimited text files
pub trait IoOps {
    type Scalar;
    type Mat;

    /// * `file` - file name--either gzipped or not
    /// * `delim` - column delimiter
    /// * `skip` - header lines to skip
    fn read_file_delim(file: &str, delim: &str, skip: Option<usize>) -> anyhow::Result<Self::Mat>;

    fn from_tsv(tsv_file: &str, skip: Option<usize>) -> anyhow::Result<Self::Mat> {
        Self::read_file_delim(tsv_file, "\t", skip)
    }

    fn write_file_delim(&self, file: &str, delim: &str) -> anyhow::Result<()>;

    fn to_tsv(&self, tsv_file: &str) -> anyhow::Result<()> {
        self.write_file_delim(tsv_file, "\t")
    }
}

/// Sample random matrices from a seeded generator so that every
/// process asking for the same seed sees the same matrix
pub trait SampleOps {
    type Mat;
    type Scalar;

    /// Sample a matrix from a uniform distribution `U(0,1)`
    fn runif_seeded(dd: usize, nn: usize, seed: u64) -> Self::Mat;
}
