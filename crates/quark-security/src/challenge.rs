use std::time::{SystemTime, UNIX_EPOCH};

/// Signing input for the server handshake: the three fields concatenated
/// exactly as transmitted, without delimiters.
pub fn build_challenge(nonce: &str, key_enc: &str, key_ver: &str) -> String {
    let mut challenge = String::with_capacity(nonce.len() + key_enc.len() + key_ver.len());
    challenge.push_str(nonce);
    challenge.push_str(key_enc);
    challenge.push_str(key_ver);
    challenge
}

/// Milliseconds since the Unix epoch, as decimal text.
pub fn timestamp_nonce() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default()
        .to_string()
}
