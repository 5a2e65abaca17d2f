pub mod convolution;
pub mod db;
pub mod error;
pub mod store;

pub use convolution::{convolve, decayed_weight, delta_t_days, ConvolutionInput};
pub use error::{MemoryError, MemoryResult};
pub use store::MemoryStore;
