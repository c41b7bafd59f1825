pub mod sparse_matrix;
