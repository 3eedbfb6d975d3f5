//! Anti-CSRF `state` values for the authorization redirect
//!
//! The state is generated before redirecting to eBay, kept server-side, and
//! compared with the value eBay echoes back on the callback.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;

/// 32 random bytes, URL-safe base64 without padding (43 characters).
pub fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
