pub mod common_io; // gzip-aware line readers and writers
pub mod dictionary; // string <-> id term dictionaries
pub mod mtx_io; // MatrixMarket triplets
pub mod ndarray_io; // dense matrices as delimited text
pub mod ndarray_util; // random dense matrices
pub mod sparse_rows; // row-indexed sparse vector collections
pub mod traits;
pub mod utils;
