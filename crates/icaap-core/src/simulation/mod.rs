pub mod cancel;
pub mod result;

#[cfg(feature = "monte_carlo")]
pub mod market;
#[cfg(feature = "monte_carlo")]
pub mod rng;
