//! API exposures built on top of a `ServerHost`

pub mod rest;

pub use rest::RestExposure;
