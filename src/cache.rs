//! On-disk HTTP response cache for the hyper backend.
//!
//! Honours the core caching directives (`Cache-Control`, `Expires`, `ETag`,
//! `Last-Modified`): fresh entries are served without touching the network,
//! stale entries are revalidated with conditional requests.
//!
//! Each entry is two files named after the SHA-256 of the URL: the body
//! (`<key>.body`) and its metadata (`<key>.json`).

use core::time::Duration;
use std::{
    io,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use bytes::Bytes;
use http::{
    HeaderMap, HeaderName, HeaderValue, StatusCode,
    header::{self, AUTHORIZATION},
};
use httpdate::parse_http_date;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use url::Url;

use crate::{
    Error, Method, Result,
    error::TransportFailure,
    transport::{Outgoing, ResponseBody, Transport, TransportFuture, TransportResponse},
};

/// Wraps a transport with an on-disk response cache for `GET` requests.
#[derive(Debug)]
pub(crate) struct CachedTransport<T> {
    inner: T,
    dir: PathBuf,
}

impl<T: Transport> CachedTransport<T> {
    pub(crate) fn new(inner: T, dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|err| {
            Error::UnsupportedConfiguration(format!(
                "cache directory `{}` is unusable: {err}",
                dir.display()
            ))
        })?;
        Ok(Self {
            inner,
            dir: dir.to_path_buf(),
        })
    }

    async fn respond(&self, mut request: Outgoing) -> Result<TransportResponse, TransportFailure> {
        if request.method != Method::Get {
            return self.inner.execute(request).await;
        }

        let files = EntryFiles::new(&self.dir, &request.url);
        let request_cc = CacheControl::from_pairs(&request.headers);
        if request_cc.no_store {
            files.remove().await;
            return self.inner.execute(request).await;
        }

        let now = SystemTime::now();
        let mut stale = None;
        if let Some(entry) = files.load().await {
            if !request_cc.no_cache && !entry.meta.must_revalidate && entry.meta.is_fresh(now) {
                debug!(url = %request.url, "serving fresh response from cache");
                return Ok(entry.into_response());
            }
            if entry.meta.can_revalidate() {
                entry.meta.apply_conditional_headers(&mut request.headers);
                stale = Some(entry);
            } else {
                files.remove().await;
            }
        }

        let auth_present = request
            .headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case(AUTHORIZATION.as_str()));
        let mut response = self.inner.execute(request).await?;

        if response.status == StatusCode::NOT_MODIFIED
            && let Some(mut entry) = stale
        {
            debug!("cached response revalidated");
            response.body.close();
            entry.meta.update_from_304(&response.headers, now);
            files.save_meta(&entry.meta).await;
            return Ok(entry.into_response());
        }

        let response_cc = CacheControl::from_header_map(&response.headers);
        let allow_shared = !auth_present || response_cc.public;
        if response.status != StatusCode::OK || !allow_shared || response_cc.no_store {
            return Ok(response);
        }

        let Some(meta) = EntryMeta::from_response(&response, &response_cc, request_cc.no_cache, now)
        else {
            return Ok(response);
        };

        let body = response.body.bytes().await?;
        files.save(&meta, &body).await;
        Ok(TransportResponse {
            status: response.status,
            headers: response.headers,
            body: ResponseBody::from_bytes(body),
        })
    }
}

impl<T: Transport> Transport for CachedTransport<T> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn execute(&self, request: Outgoing) -> TransportFuture<'_> {
        Box::pin(self.respond(request))
    }

    fn close(&self) {
        self.inner.close();
    }
}

struct EntryFiles {
    meta: PathBuf,
    body: PathBuf,
}

impl EntryFiles {
    fn new(dir: &Path, url: &Url) -> Self {
        let key: String = Sha256::digest(url.as_str().as_bytes())
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect();
        Self {
            meta: dir.join(format!("{key}.json")),
            body: dir.join(format!("{key}.body")),
        }
    }

    async fn load(&self) -> Option<CachedEntry> {
        let raw = match async_fs::read(&self.meta).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(path = %self.meta.display(), %err, "unreadable cache entry");
                return None;
            }
        };
        let loaded = match serde_json::from_slice::<EntryMeta>(&raw) {
            Ok(meta) => async_fs::read(&self.body)
                .await
                .map(|body| CachedEntry {
                    meta,
                    body: Bytes::from(body),
                })
                .map_err(|err| err.to_string()),
            Err(err) => Err(err.to_string()),
        };
        match loaded {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(path = %self.meta.display(), %err, "ignoring corrupt cache entry");
                self.remove().await;
                None
            }
        }
    }

    async fn save(&self, meta: &EntryMeta, body: &[u8]) {
        // body first, so a readable meta file always has its body
        if let Err(err) = async_fs::write(&self.body, body).await {
            warn!(path = %self.body.display(), %err, "failed to store cached body");
            return;
        }
        self.save_meta(meta).await;
    }

    async fn save_meta(&self, meta: &EntryMeta) {
        let result = match serde_json::to_vec(meta) {
            Ok(raw) => async_fs::write(&self.meta, raw).await,
            Err(err) => Err(io::Error::other(err)),
        };
        if let Err(err) = result {
            warn!(path = %self.meta.display(), %err, "failed to store cache metadata");
        }
    }

    async fn remove(&self) {
        let _ = async_fs::remove_file(&self.meta).await;
        let _ = async_fs::remove_file(&self.body).await;
    }
}

struct CachedEntry {
    meta: EntryMeta,
    body: Bytes,
}

impl CachedEntry {
    fn into_response(self) -> TransportResponse {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.meta.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.append(name, value);
            }
        }
        let age = SystemTime::now()
            .duration_since(self.meta.stored_at())
            .unwrap_or_default()
            .as_secs();
        headers.insert(header::AGE, HeaderValue::from(age));

        TransportResponse {
            status: StatusCode::from_u16(self.meta.status).unwrap_or(StatusCode::OK),
            headers,
            body: ResponseBody::from_bytes(self.body),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryMeta {
    status: u16,
    headers: Vec<(String, String)>,
    stored_at_ms: u64,
    freshness_ms: Option<u64>,
    must_revalidate: bool,
    etag: Option<String>,
    last_modified: Option<String>,
}

impl EntryMeta {
    fn from_response(
        response: &TransportResponse,
        directives: &CacheControl,
        request_no_cache: bool,
        now: SystemTime,
    ) -> Option<Self> {
        let freshness = directives
            .max_age
            .map(Duration::from_secs)
            .or_else(|| expires_in(&response.headers));
        let must_revalidate = directives.no_cache || directives.must_revalidate || request_no_cache;
        if freshness.is_none() && !must_revalidate {
            return None;
        }

        let headers = response
            .headers
            .iter()
            .filter(|(name, _)| *name != header::AGE)
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_owned(), value.to_owned()))
            })
            .collect();

        Some(Self {
            status: response.status.as_u16(),
            headers,
            stored_at_ms: unix_millis(now),
            freshness_ms: freshness.map(duration_millis),
            must_revalidate,
            etag: header_text(&response.headers, &header::ETAG),
            last_modified: header_text(&response.headers, &header::LAST_MODIFIED),
        })
    }

    fn stored_at(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.stored_at_ms)
    }

    fn is_fresh(&self, now: SystemTime) -> bool {
        let age = now.duration_since(self.stored_at()).unwrap_or_default();
        self.freshness_ms
            .is_some_and(|fresh| age < Duration::from_millis(fresh))
    }

    const fn can_revalidate(&self) -> bool {
        self.etag.is_some() || self.last_modified.is_some()
    }

    fn apply_conditional_headers(&self, headers: &mut Vec<(String, String)>) {
        headers.retain(|(name, _)| {
            !name.eq_ignore_ascii_case(header::IF_NONE_MATCH.as_str())
                && !name.eq_ignore_ascii_case(header::IF_MODIFIED_SINCE.as_str())
        });
        if let Some(etag) = &self.etag {
            headers.push((header::IF_NONE_MATCH.as_str().to_owned(), etag.clone()));
        }
        if let Some(last_modified) = &self.last_modified {
            headers.push((
                header::IF_MODIFIED_SINCE.as_str().to_owned(),
                last_modified.clone(),
            ));
        }
    }

    fn update_from_304(&mut self, headers: &HeaderMap, now: SystemTime) {
        self.stored_at_ms = unix_millis(now);
        for name in [
            header::CACHE_CONTROL,
            header::ETAG,
            header::EXPIRES,
            header::DATE,
            header::LAST_MODIFIED,
        ] {
            if let Some(value) = header_text(headers, &name) {
                self.headers.retain(|(existing, _)| existing.as_str() != name.as_str());
                self.headers.push((name.as_str().to_owned(), value));
            }
        }
        if let Some(etag) = header_text(headers, &header::ETAG) {
            self.etag = Some(etag);
        }
        if let Some(last_modified) = header_text(headers, &header::LAST_MODIFIED) {
            self.last_modified = Some(last_modified);
        }

        let cc = CacheControl::from_header_map(headers);
        if let Some(max_age) = cc.max_age {
            self.freshness_ms = Some(duration_millis(Duration::from_secs(max_age)));
        } else if let Some(duration) = expires_in(headers) {
            self.freshness_ms = Some(duration_millis(duration));
        }
        if cc.no_cache || cc.must_revalidate {
            self.must_revalidate = true;
        }
    }
}

#[derive(Debug, Default, Clone)]
#[allow(clippy::struct_excessive_bools)]
struct CacheControl {
    no_cache: bool,
    no_store: bool,
    max_age: Option<u64>,
    must_revalidate: bool,
    public: bool,
}

impl CacheControl {
    fn from_header_map(headers: &HeaderMap) -> Self {
        headers
            .get_all(header::CACHE_CONTROL)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .fold(Self::default(), Self::merge)
    }

    fn from_pairs(headers: &[(String, String)]) -> Self {
        headers
            .iter()
            .filter(|(name, _)| name.eq_ignore_ascii_case(header::CACHE_CONTROL.as_str()))
            .fold(Self::default(), |acc, (_, value)| acc.merge(value))
    }

    fn merge(mut self, text: &str) -> Self {
        for directive in text.split(',') {
            let lower = directive.trim().to_ascii_lowercase();
            match lower.as_str() {
                "no-cache" => self.no_cache = true,
                "no-store" => self.no_store = true,
                "must-revalidate" => self.must_revalidate = true,
                "public" => self.public = true,
                _ => {
                    if let Some(rest) = lower.strip_prefix("max-age=")
                        && let Ok(value) = rest.parse::<u64>()
                    {
                        self.max_age = Some(value);
                    }
                }
            }
        }
        self
    }
}

fn header_text(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

fn expires_in(headers: &HeaderMap) -> Option<Duration> {
    let text = headers.get(header::EXPIRES)?.to_str().ok()?;
    let timestamp = parse_http_date(text).ok()?;
    let duration = timestamp.duration_since(SystemTime::now()).ok()?;
    if duration.is_zero() { None } else { Some(duration) }
}

fn unix_millis(time: SystemTime) -> u64 {
    duration_millis(time.duration_since(UNIX_EPOCH).unwrap_or_default())
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
