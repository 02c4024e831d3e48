pub mod pricing;

pub use pricing::{per_person, FareConfig, FareEngine, FareError, FareQuote};
