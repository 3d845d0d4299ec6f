mod entities;

pub use entities::{BucketConfig, File, Upload};
