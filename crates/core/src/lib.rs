pub mod error;
pub mod models;
pub mod qr;
pub mod transform;

pub use error::{ClientError, ClientResult};

use sha2::{Digest, Sha256};

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
