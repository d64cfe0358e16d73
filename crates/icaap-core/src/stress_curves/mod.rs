pub mod curve;
pub mod migration;
pub mod transformer;
