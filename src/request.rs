//! The request model shared by every backend.
//!
//! A [`Request`] is created by [`Http::new_req`](crate::Http::new_req), mutated
//! through by-value builder calls and consumed by exactly one `submit_*` call
//! such as [`Request::submit_for_text`]. It holds parameters, headers, an optional
//! body, the method, a content type override and the charset used for
//! string-to-bytes conversions.
//!
//! Parameters and headers keep insertion order. Parameter names must not be
//! blank; violating that fails the call with [`Error::Validation`]. Blank
//! header names or values are skipped with a warning instead.

use std::{collections::BTreeMap, fmt, path::PathBuf, str::FromStr};

use bytes::Bytes;
use encoding_rs::{Encoding, UTF_8};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::warn;
use url::Url;

use crate::{
    Error, Http, Result, codec,
    param::{IntoParamValues, ParamValue},
};

/// Maximum number of body bytes rendered into diagnostics.
const DIAGNOSTIC_LIMIT: usize = 4096;

/// HTTP methods supported by the request model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Method {
    /// `GET`
    #[default]
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `PATCH`
    Patch,
    /// `DELETE`
    Delete,
    /// `HEAD`
    Head,
}

impl Method {
    /// Upper-case method name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
        }
    }

    /// Whether requests with this method carry an entity.
    ///
    /// `GET`, `DELETE` and `HEAD` send their parameters in the query string and
    /// never transmit a body.
    pub const fn has_entity(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            "HEAD" => Ok(Self::Head),
            other => Err(Error::validation(format!("unsupported method `{other}`"))),
        }
    }
}

impl From<Method> for http::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => Self::GET,
            Method::Post => Self::POST,
            Method::Put => Self::PUT,
            Method::Patch => Self::PATCH,
            Method::Delete => Self::DELETE,
            Method::Head => Self::HEAD,
        }
    }
}

/// Explicit request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// Raw bytes (also used for text and serialized objects)
    Bytes(Bytes),
    /// Contents of a local file, read when the request is sent
    File(PathBuf),
}

/// A single-use HTTP request bound to a client.
#[derive(Debug)]
pub struct Request {
    pub(crate) client: Http,
    pub(crate) url: Url,
    pub(crate) method: Method,
    pub(crate) params: IndexMap<String, Vec<ParamValue>>,
    pub(crate) headers: IndexMap<String, Vec<String>>,
    pub(crate) body: Option<Body>,
    pub(crate) mime_type: Option<String>,
    pub(crate) charset: &'static Encoding,
}

impl Request {
    pub(crate) fn new(client: Http, url: &str) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|err| Error::validation(format!("invalid url `{url}`: {err}")))?;
        if !matches!(url.scheme(), "http" | "https") || !url.has_host() {
            return Err(Error::validation(format!(
                "url `{url}` must be an absolute http(s) address"
            )));
        }
        Ok(Self {
            client,
            url,
            method: Method::default(),
            params: IndexMap::new(),
            headers: IndexMap::new(),
            body: None,
            mime_type: None,
            charset: UTF_8,
        })
    }

    /// Replace the values of `name` with a single value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if `name` is blank.
    pub fn param(self, name: impl Into<String>, value: impl Into<ParamValue>) -> Result<Self> {
        self.param_values(name, [value])
    }

    /// Replace the values of `name` with `values`.
    ///
    /// The values are stored as one flat sequence: `param_values("a", ["1", "2"])`
    /// sends `a=1&a=2`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if `name` is blank.
    pub fn param_values<V: Into<ParamValue>>(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Result<Self> {
        let name = checked_name(name.into())?;
        self.params
            .insert(name, values.into_iter().map(Into::into).collect());
        Ok(self)
    }

    /// Append a value to `name`, keeping the values already present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if `name` is blank.
    pub fn add_param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Result<Self> {
        let name = checked_name(name.into())?;
        self.params.entry(name).or_default().push(value.into());
        Ok(self)
    }

    /// Set parameters from ordered `(name, value)` pairs.
    ///
    /// Pairs sharing a name accumulate into one sequence; every name present
    /// in `pairs` replaces the values it had before.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if any name is blank.
    pub fn params<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Result<Self>
    where
        K: Into<String>,
        V: Into<ParamValue>,
    {
        let mut grouped: IndexMap<String, Vec<ParamValue>> = IndexMap::new();
        for (name, value) in pairs {
            let name = checked_name(name.into())?;
            grouped.entry(name).or_default().push(value.into());
        }
        self.params.extend(grouped);
        Ok(self)
    }

    /// Set parameters from a flat alternating `name, value, name, value` list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the list has an odd length or a name is
    /// blank.
    pub fn params_flat<S: AsRef<str>>(self, items: impl IntoIterator<Item = S>) -> Result<Self> {
        let pairs = flat_pairs(items)?;
        self.params(pairs)
    }

    /// Merge a name → value(s) mapping.
    ///
    /// A scalar becomes a one-element sequence, a sequence is copied as-is and
    /// `None` values are skipped. Each merged key replaces its previous values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if a name is blank.
    pub fn params_map<K, V>(mut self, map: impl IntoIterator<Item = (K, V)>) -> Result<Self>
    where
        K: Into<String>,
        V: IntoParamValues,
    {
        for (name, value) in map {
            let Some(values) = value.into_param_values() else {
                continue;
            };
            let name = checked_name(name.into())?;
            self.params.insert(name, values);
        }
        Ok(self)
    }

    /// Replace a header. Values containing `;` are split into several values.
    ///
    /// A blank name or value is logged and ignored.
    #[must_use]
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        let name = name.as_ref();
        if let Some(values) = split_header(name, value.as_ref()) {
            self.headers.insert(name.to_owned(), values);
        }
        self
    }

    /// Append a value to a header, keeping the values already present.
    ///
    /// A blank name or value is logged and ignored.
    #[must_use]
    pub fn add_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        let (name, value) = (name.as_ref(), value.as_ref());
        if header_is_blank(name, value) {
            return self;
        }
        self.headers
            .entry(name.to_owned())
            .or_default()
            .push(value.to_owned());
        self
    }

    /// Set headers from ordered `(name, value)` pairs.
    ///
    /// Pairs sharing a name accumulate; every name present replaces its
    /// previous values. Blank entries are logged and ignored.
    #[must_use]
    pub fn headers<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut grouped: IndexMap<String, Vec<String>> = IndexMap::new();
        for (name, value) in pairs {
            let name = name.as_ref();
            let Some(values) = split_header(name, value.as_ref()) else {
                continue;
            };
            grouped.entry(name.to_owned()).or_default().extend(values);
        }
        self.headers.extend(grouped);
        self
    }

    /// Set headers from a flat alternating `name, value, ...` list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the list has an odd length.
    pub fn headers_flat<S: AsRef<str>>(self, items: impl IntoIterator<Item = S>) -> Result<Self> {
        let pairs = flat_pairs(items)?;
        Ok(self.headers(pairs))
    }

    /// Replace one header per map entry, as [`Request::header`] does.
    #[must_use]
    pub fn headers_map<K, V>(self, map: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        map.into_iter()
            .fold(self, |request, (name, value)| request.header(name, value))
    }

    /// Remove headers by name. Missing headers are ignored.
    #[must_use]
    pub fn remove_header<S: AsRef<str>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        for name in names {
            self.headers.shift_remove(name.as_ref());
        }
        self
    }

    /// Use raw bytes as the body.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(Body::Bytes(body.into()));
        self
    }

    /// Use the contents of a file as the body.
    #[must_use]
    pub fn body_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.body = Some(Body::File(path.into()));
        self
    }

    /// Use text as the body, encoded with the configured charset.
    #[must_use]
    pub fn body_text(mut self, text: impl AsRef<str>) -> Self {
        let (encoded, _, _) = self.charset.encode(text.as_ref());
        self.body = Some(Body::Bytes(Bytes::from(encoded.into_owned())));
        self
    }

    /// Serialize `value` as JSON and use it as the body.
    ///
    /// Also sets the content type to `application/json`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] if `value` cannot be serialized.
    pub fn body_json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        let bytes = codec::to_vec(value).map_err(|source| Error::Codec {
            uri: self.url.to_string(),
            diagnostic: self.diagnostic(),
            source,
        })?;
        self.body = Some(Body::Bytes(Bytes::from(bytes)));
        self.mime_type = Some(codec::APPLICATION_JSON.to_owned());
        Ok(self)
    }

    /// Set the method.
    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Override the content type.
    #[must_use]
    pub fn mime_type(mut self, content_type: impl Into<String>) -> Self {
        self.mime_type = Some(content_type.into());
        self
    }

    /// Set the charset by label (`"utf-8"`, `"gbk"`, `"iso-8859-1"`, ...).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the label is unknown.
    pub fn charset(self, label: &str) -> Result<Self> {
        let encoding = Encoding::for_label(label.trim().as_bytes())
            .ok_or_else(|| Error::validation(format!("unknown charset `{label}`")))?;
        Ok(self.with_encoding(encoding))
    }

    /// Set the charset.
    #[must_use]
    pub fn with_encoding(mut self, encoding: &'static Encoding) -> Self {
        self.charset = encoding;
        self
    }

    /// Target URL, without the query parameters added by this request.
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Current method.
    pub const fn http_method(&self) -> Method {
        self.method
    }

    /// Current content type override.
    pub fn mime(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    /// Current charset.
    pub const fn encoding(&self) -> &'static Encoding {
        self.charset
    }

    /// Current explicit body.
    pub const fn payload(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    /// Values of one header.
    pub fn header_values(&self, name: &str) -> Option<&[String]> {
        self.headers.get(name).map(Vec::as_slice)
    }

    /// All headers in insertion order.
    pub const fn header_map(&self) -> &IndexMap<String, Vec<String>> {
        &self.headers
    }

    /// Parameters sorted by name, for display.
    ///
    /// Encoding always uses insertion order.
    pub fn params_snapshot(&self) -> BTreeMap<String, Vec<ParamValue>> {
        self.params
            .iter()
            .map(|(name, values)| (name.clone(), values.clone()))
            .collect()
    }

    /// `name=value` pairs in insertion order joined by `&`, without any
    /// percent encoding. Empty when there are no parameters.
    pub fn params_as_decoding_query_string(&self) -> String {
        self.params
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |value| format!("{name}={value}")))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Best-effort description of the request content for error messages.
    pub(crate) fn diagnostic(&self) -> String {
        match &self.body {
            Some(Body::Bytes(bytes)) => {
                let shown = &bytes[..bytes.len().min(DIAGNOSTIC_LIMIT)];
                let mut text = String::from_utf8_lossy(shown).into_owned();
                if bytes.len() > DIAGNOSTIC_LIMIT {
                    text.push_str(&format!("...({} bytes)", bytes.len()));
                }
                text
            }
            Some(Body::File(path)) => format!("<file {}>", path.display()),
            None => self.params_display(),
        }
    }

    fn params_display(&self) -> String {
        let entries = self
            .params
            .iter()
            .map(|(name, values)| {
                let values = values
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{name}=[{values}]")
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("{{{entries}}}")
    }
}

fn checked_name(name: String) -> Result<String> {
    if name.trim().is_empty() {
        return Err(Error::validation("parameter name must not be blank"));
    }
    Ok(name)
}

fn header_is_blank(name: &str, value: &str) -> bool {
    let blank = name.trim().is_empty() || value.trim().is_empty();
    if blank {
        warn!(name, value, "skipping header with blank name or value");
    }
    blank
}

/// Split a header value on `;`, `None` (logged) when nothing non-blank remains.
fn split_header(name: &str, value: &str) -> Option<Vec<String>> {
    if header_is_blank(name, value) {
        return None;
    }
    let values: Vec<String> = value
        .split(';')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_owned)
        .collect();
    if values.is_empty() {
        warn!(name, value, "skipping header without any value");
        return None;
    }
    Some(values)
}

fn flat_pairs<S: AsRef<str>>(items: impl IntoIterator<Item = S>) -> Result<Vec<(String, String)>> {
    let items: Vec<String> = items
        .into_iter()
        .map(|item| item.as_ref().to_owned())
        .collect();
    if items.len() % 2 != 0 {
        return Err(Error::validation(format!(
            "name/value list must come in pairs, got {} items",
            items.len()
        )));
    }
    let mut pairs = Vec::with_capacity(items.len() / 2);
    let mut items = items.into_iter();
    while let (Some(name), Some(value)) = (items.next(), items.next()) {
        pairs.push((name, value));
    }
    Ok(pairs)
}
