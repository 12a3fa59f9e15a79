//! JSON codec used for object bodies and object responses.

use serde::{Serialize, de::DeserializeOwned};

/// Content type set by [`Request::body_json`](crate::Request::body_json).
pub const APPLICATION_JSON: &str = "application/json";

/// Serialize a value into JSON bytes.
///
/// # Errors
///
/// Returns an error if the value cannot be represented as JSON.
pub fn to_vec<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(value)
}

/// Deserialize JSON bytes into any owned shape, including generic ones such as
/// `Vec<T>` or `HashMap<String, T>`.
///
/// # Errors
///
/// Returns an error if the bytes are not valid JSON for `T`.
pub fn from_slice<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, serde_json::Error> {
    serde_json::from_slice(bytes)
}
