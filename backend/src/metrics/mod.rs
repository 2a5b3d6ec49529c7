pub mod counters;

pub use counters::{Histogram, Metrics};
