//! `multipart/form-data` framing for the hyper backend.

use std::{
    io,
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use bytes::{BufMut, Bytes, BytesMut};

use crate::param::ParamValue;

const OCTET_STREAM: &str = "application/octet-stream";

/// One encoded field.
#[derive(Debug)]
struct MultipartPart {
    name: String,
    filename: Option<String>,
    content_type: Option<&'static str>,
    data: Bytes,
}

impl MultipartPart {
    async fn from_param(name: String, value: ParamValue) -> io::Result<Self> {
        Ok(match value {
            ParamValue::Text(text) => Self {
                name,
                filename: None,
                content_type: None,
                data: Bytes::from(text),
            },
            ParamValue::Bytes(data) => Self {
                filename: Some(name.clone()),
                name,
                content_type: Some(OCTET_STREAM),
                data,
            },
            ParamValue::File(path) => Self {
                filename: Some(file_name(&path).unwrap_or_else(|| name.clone())),
                name,
                content_type: Some(OCTET_STREAM),
                data: Bytes::from(async_fs::read(&path).await?),
            },
        })
    }
}

/// Encode the parts into `(boundary, body)`.
///
/// Bytes and file values become binary parts with a filename, every other
/// value a plain text part.
///
/// # Errors
///
/// Returns an error if a file part cannot be read.
pub(crate) async fn encode(parts: Vec<(String, ParamValue)>) -> io::Result<(String, Bytes)> {
    let mut encoded = Vec::with_capacity(parts.len());
    for (name, value) in parts {
        encoded.push(MultipartPart::from_param(name, value).await?);
    }
    Ok(encode_with(default_boundary(), encoded))
}

fn encode_with(boundary: String, parts: Vec<MultipartPart>) -> (String, Bytes) {
    let mut body = BytesMut::new();

    for part in parts {
        body.put_slice(format!("--{boundary}\r\n").as_bytes());
        body.put_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"{}\r\n",
                escape(&part.name),
                part.filename
                    .map(|name| format!("; filename=\"{}\"", escape(&name)))
                    .unwrap_or_default()
            )
            .as_bytes(),
        );
        if let Some(content_type) = part.content_type {
            body.put_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        body.put_slice(b"\r\n");
        body.put_slice(&part.data);
        body.put_slice(b"\r\n");
    }

    body.put_slice(format!("--{boundary}--\r\n").as_bytes());
    (boundary, body.freeze())
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

fn escape(value: &str) -> String {
    value.replace('"', "%22").replace(['\r', '\n'], " ")
}

fn default_boundary() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!(
        "switchyard-{:x}-{:x}",
        monotonic_suffix(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

fn monotonic_suffix() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_micros())
}
