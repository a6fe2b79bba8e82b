pub mod sma;

pub use sma::{mean, trailing_sma};
