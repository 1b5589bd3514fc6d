//! Common types shared by the Strava activity workspace

mod error;
pub mod fs;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
