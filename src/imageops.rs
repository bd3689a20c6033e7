mod binarize;

pub use binarize::{binarize, invert, mean_intensity, EDGE_THRESHOLD, INVERT_ABOVE_MEAN};
