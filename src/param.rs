//! Parameter values.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use bytes::Bytes;

/// A single parameter value.
///
/// Text values are rendered as-is in query strings and forms. Bytes and file
/// values become binary parts in multipart bodies; elsewhere they are rendered
/// as lossy UTF-8 and as the file path respectively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    /// Plain text
    Text(String),
    /// In-memory binary data
    Bytes(Bytes),
    /// Reference to a local file
    File(PathBuf),
}

impl ParamValue {
    /// Whether the value is sent as a binary multipart part.
    pub const fn is_binary(&self) -> bool {
        matches!(self, Self::Bytes(_) | Self::File(_))
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Bytes(bytes) => f.write_str(&String::from_utf8_lossy(bytes)),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&String> for ParamValue {
    fn from(value: &String) -> Self {
        Self::Text(value.clone())
    }
}

impl From<Bytes> for ParamValue {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

impl From<Vec<u8>> for ParamValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(value))
    }
}

impl From<&[u8]> for ParamValue {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(Bytes::copy_from_slice(value))
    }
}

impl From<PathBuf> for ParamValue {
    fn from(value: PathBuf) -> Self {
        Self::File(value)
    }
}

impl From<&Path> for ParamValue {
    fn from(value: &Path) -> Self {
        Self::File(value.to_path_buf())
    }
}

macro_rules! display_param {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for ParamValue {
                fn from(value: $ty) -> Self {
                    Self::Text(value.to_string())
                }
            }
        )*
    };
}

display_param!(bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64);

/// Values accepted by [`Request::params_map`](crate::Request::params_map).
///
/// A scalar becomes a one-element sequence, a sequence is copied as-is and
/// `None` means "skip this key".
pub trait IntoParamValues {
    /// Convert into the value sequence, `None` to skip the key.
    fn into_param_values(self) -> Option<Vec<ParamValue>>;
}

macro_rules! scalar_values {
    ($($ty:ty),*) => {
        $(
            impl IntoParamValues for $ty {
                fn into_param_values(self) -> Option<Vec<ParamValue>> {
                    Some(vec![ParamValue::from(self)])
                }
            }
        )*
    };
}

scalar_values!(
    ParamValue, &str, String, &String, Bytes, PathBuf, &Path, bool, char, i8, i16, i32, i64, i128,
    isize, u8, u16, u32, u64, u128, usize, f32, f64
);

impl<T: Into<ParamValue>> IntoParamValues for Vec<T> {
    fn into_param_values(self) -> Option<Vec<ParamValue>> {
        Some(self.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<ParamValue>, const N: usize> IntoParamValues for [T; N] {
    fn into_param_values(self) -> Option<Vec<ParamValue>> {
        Some(self.into_iter().map(Into::into).collect())
    }
}

impl<T: IntoParamValues> IntoParamValues for Option<T> {
    fn into_param_values(self) -> Option<Vec<ParamValue>> {
        self.and_then(IntoParamValues::into_param_values)
    }
}
