//! Upload file descriptors and randomized upload names.

use std::path::Path;

use rand::distr::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Length of the random token that seeds each upload name.
pub const TOKEN_LEN: usize = 8;

/// Hex characters kept from the token digest.
const NAME_HASH_LEN: usize = 32;

/// Describes one file for the presign request.
///
/// A descriptor is built fresh for every upload attempt; the generated name
/// of a failed attempt is never reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDescriptor {
    #[serde(rename = "name")]
    pub generated_name: String,
    #[serde(rename = "size")]
    pub size_bytes: u64,
    #[serde(rename = "type")]
    pub mime_type: Option<String>,
}

impl FileDescriptor {
    /// Build a descriptor for a local file with a newly generated name.
    pub async fn for_path(path: &Path) -> std::io::Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }

        Ok(Self {
            generated_name: generate_file_name(path),
            size_bytes: metadata.len(),
            mime_type: guess_mime_type(path),
        })
    }
}

/// Generate a random alphanumeric token.
pub fn random_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Hash a token into the stem of an upload name.
///
/// The digest only spreads names out; it has no security role.
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    let mut hex = format!("{:x}", digest);
    hex.truncate(NAME_HASH_LEN);
    hex
}

/// Generate an upload name that keeps the extension of `path`.
pub fn generate_file_name(path: &Path) -> String {
    let stem = hash_token(&random_token());
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if !ext.is_empty() => format!("{}.{}", stem, ext),
        _ => stem,
    }
}

/// Best-effort MIME type from the file extension.
pub fn guess_mime_type(path: &Path) -> Option<String> {
    mime_guess::from_path(path).first_raw().map(str::to_string)
}
