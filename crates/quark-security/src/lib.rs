//! Per-session security context for quark RPC.
//!
//! The client generates an ephemeral P-384 ECDH key pair and sends the
//! public half with its bootstrap request. The server answers with its own
//! ECDH key, an ECDSA verification key and a signature over
//! `nonce + keyEnc + keyVer`. Once the signature checks out, the first 16
//! bytes of the ECDH shared secret become the AES-128-CTR key used for
//! payload encryption in both directions.

pub mod challenge;
pub mod context;
pub mod encoding;
pub mod error;

pub use challenge::{build_challenge, timestamp_nonce};
pub use context::{SecurityContext, SecurityMaterial, SecurityState, IV_LEN, KEY_LEN};
pub use encoding::decode_material;
pub use error::{Result, SecurityError};
