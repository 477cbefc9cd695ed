//! Ticket id generation.
//!
//! Ids are `PREFIX-<url-safe base64>`; consumers treat the prefix as a type
//! tag and must not assume further structure.

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::{RngCore, rngs::OsRng};

/// Pluggable generator for unique ticket ids.
pub trait TicketIdGenerator: Send + Sync {
    /// # Errors
    /// Returns an error if random material cannot be obtained.
    fn new_id(&self, prefix: &str) -> Result<String>;
}

const SUFFIX_BYTES: usize = 32;

/// Default generator: 32 random bytes from the operating system, rendered
/// url-safe. The raw value is the only copy; registries may store a digest
/// instead.
#[derive(Clone, Debug, Default)]
pub struct RandomTicketIdGenerator;

impl TicketIdGenerator for RandomTicketIdGenerator {
    fn new_id(&self, prefix: &str) -> Result<String> {
        let mut bytes = [0u8; SUFFIX_BYTES];
        OsRng
            .try_fill_bytes(&mut bytes)
            .context("failed to generate ticket id")?;
        Ok(format!("{prefix}-{}", URL_SAFE_NO_PAD.encode(bytes)))
    }
}
