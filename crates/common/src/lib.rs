//! Types shared by the eBay connector crates

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
