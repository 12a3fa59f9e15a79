use core::time::Duration;
use std::{fs::File, io::Read, str, sync::Arc};

use bytes::Bytes;
use curl::easy::{Easy2, Form, Handler, List, ReadError, WriteError};
use http::{
    HeaderMap, StatusCode,
    header::{CONTENT_TYPE, HeaderName, HeaderValue},
};
use tokio::{sync::Semaphore, task};
use tracing::debug;

use super::Settings;
use crate::{
    Method,
    error::TransportFailure,
    param::ParamValue,
    transport::{Entity, Outgoing, ResponseBody, Transport, TransportFuture, TransportResponse},
};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport implemented with libcurl, one easy handle per exchange on the
/// blocking thread pool.
#[derive(Debug)]
pub(crate) struct CurlTransport {
    options: Options,
    permits: Arc<Semaphore>,
}

#[derive(Debug, Clone, Copy)]
struct Options {
    connect_timeout: Duration,
    read_timeout: Duration,
    max_connections: u32,
    verify_host: bool,
    verify_peer: bool,
}

impl CurlTransport {
    pub(crate) fn new(settings: &Settings) -> Self {
        let max_connections = settings.max_connections();
        Self {
            options: Options {
                connect_timeout: settings.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
                read_timeout: settings.read_timeout.unwrap_or(DEFAULT_READ_TIMEOUT),
                max_connections: u32::try_from(max_connections).unwrap_or(u32::MAX),
                verify_host: !settings.accept_invalid_hostnames,
                verify_peer: !settings.accept_invalid_certs,
            },
            permits: Arc::new(Semaphore::new(max_connections)),
        }
    }

    async fn send(&self, outgoing: Outgoing) -> Result<TransportResponse, TransportFailure> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| TransportFailure::Closed)?;
        let options = self.options;
        let response = task::spawn_blocking(move || perform(&options, outgoing))
            .await
            .map_err(TransportFailure::other)??;

        Ok(TransportResponse {
            status: response.status,
            headers: response.headers,
            body: ResponseBody::from_bytes(response.body).with_guard(permit),
        })
    }
}

impl Transport for CurlTransport {
    fn name(&self) -> &'static str {
        "curl"
    }

    fn execute(&self, request: Outgoing) -> TransportFuture<'_> {
        Box::pin(self.send(request))
    }
}

fn perform(options: &Options, outgoing: Outgoing) -> Result<SessionResponse, TransportFailure> {
    let fail = |err: curl::Error| map_curl_error(err, options);
    let content_type = outgoing.entity_content_type().map(str::to_owned);
    let multipart = matches!(outgoing.entity, Some(Entity::Multipart { .. }));
    let configured_content_type = outgoing.has_header(CONTENT_TYPE.as_str());

    let (upload, form) = match outgoing.entity {
        None | Some(Entity::Empty { .. }) => (Upload::Empty, None),
        Some(Entity::Bytes { data, .. }) => (Upload::Bytes { data, offset: 0 }, None),
        Some(Entity::File { path, .. }) => (Upload::File(File::open(&path)?), None),
        Some(Entity::Multipart { parts }) => (Upload::Empty, Some(multipart_form(parts)?)),
    };
    let upload_len = upload.len()?;

    let mut easy = Easy2::new(Collector::new(upload));
    easy.url(outgoing.url.as_str()).map_err(fail)?;
    easy.connect_timeout(options.connect_timeout).map_err(fail)?;
    // abort when the transfer stalls for the whole read deadline
    easy.low_speed_limit(1).map_err(fail)?;
    easy.low_speed_time(stall_window(options.read_timeout)).map_err(fail)?;
    easy.ssl_verify_host(options.verify_host).map_err(fail)?;
    easy.ssl_verify_peer(options.verify_peer).map_err(fail)?;
    easy.max_connects(options.max_connections).map_err(fail)?;

    match outgoing.method {
        Method::Get => easy.get(true).map_err(fail)?,
        Method::Head => easy.nobody(true).map_err(fail)?,
        Method::Delete => easy.custom_request("DELETE").map_err(fail)?,
        Method::Post | Method::Put | Method::Patch => {
            if let Some(form) = form {
                easy.httppost(form).map_err(fail)?;
            } else {
                easy.post(true).map_err(fail)?;
                easy.post_field_size(upload_len).map_err(fail)?;
            }
            if outgoing.method != Method::Post {
                easy.custom_request(outgoing.method.as_str())
                    .map_err(fail)?;
            }
        }
    }

    let mut list = List::new();
    for (name, value) in &outgoing.headers {
        // libcurl writes the multipart content type with its boundary
        if multipart && name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()) {
            continue;
        }
        list.append(&format!("{name}: {value}")).map_err(fail)?;
    }
    if outgoing.method.has_entity() && !multipart && !configured_content_type {
        // an empty value stops libcurl from adding its form content type
        let line = content_type.map_or_else(
            || "Content-Type:".to_owned(),
            |content_type| format!("Content-Type: {content_type}"),
        );
        list.append(&line).map_err(fail)?;
    }
    list.append("Expect:").map_err(fail)?;
    easy.http_headers(list).map_err(fail)?;

    debug!(method = %outgoing.method, url = %outgoing.url, "curl transfer starting");
    easy.perform().map_err(fail)?;

    easy.get_mut().take_response()
}

/// libcurl counts stalls in whole seconds and treats `0` as "never", so
/// round up and keep at least one second.
fn stall_window(read_timeout: Duration) -> Duration {
    let secs = read_timeout.as_secs() + u64::from(read_timeout.subsec_nanos() > 0);
    Duration::from_secs(secs.max(1))
}

fn multipart_form(parts: Vec<(String, ParamValue)>) -> Result<Form, TransportFailure> {
    let invalid = |err: curl::FormError| TransportFailure::InvalidRequest(err.to_string());
    let mut form = Form::new();
    for (name, value) in parts {
        match value {
            ParamValue::Text(text) => form
                .part(&name)
                .contents(text.as_bytes())
                .add()
                .map_err(invalid)?,
            ParamValue::Bytes(data) => form
                .part(&name)
                .buffer(&name, data.to_vec())
                .content_type("application/octet-stream")
                .add()
                .map_err(invalid)?,
            ParamValue::File(path) => form.part(&name).file(&path).add().map_err(invalid)?,
        }
    }
    Ok(form)
}

fn map_curl_error(err: curl::Error, options: &Options) -> TransportFailure {
    if err.is_operation_timedout() {
        return TransportFailure::Timeout(options.read_timeout);
    }
    if err.is_couldnt_connect() || err.is_couldnt_resolve_host() || err.is_couldnt_resolve_proxy() {
        return TransportFailure::Connect(Box::new(err));
    }
    if err.is_ssl_connect_error()
        || err.is_peer_failed_verification()
        || err.is_ssl_certproblem()
        || err.is_ssl_cacert()
    {
        return TransportFailure::Tls(Box::new(err));
    }
    if err.is_send_error() || err.is_recv_error() || err.is_got_nothing() {
        return TransportFailure::Io(std::io::Error::other(err));
    }
    TransportFailure::other(err)
}

#[derive(Debug)]
enum Upload {
    Empty,
    Bytes { data: Bytes, offset: usize },
    File(File),
}

impl Upload {
    fn len(&self) -> std::io::Result<u64> {
        Ok(match self {
            Self::Empty => 0,
            Self::Bytes { data, .. } => data.len() as u64,
            Self::File(file) => file.metadata()?.len(),
        })
    }
}

#[derive(Debug)]
struct Collector {
    upload: Upload,
    response_body: Vec<u8>,
    headers: HeaderMap,
    status: Option<StatusCode>,
}

impl Collector {
    fn new(upload: Upload) -> Self {
        Self {
            upload,
            response_body: Vec::new(),
            headers: HeaderMap::new(),
            status: None,
        }
    }

    fn take_response(&mut self) -> Result<SessionResponse, TransportFailure> {
        let status = self
            .status
            .ok_or_else(|| TransportFailure::other("curl response missing HTTP status line"))?;
        Ok(SessionResponse {
            status,
            headers: std::mem::take(&mut self.headers),
            body: std::mem::take(&mut self.response_body),
        })
    }

    fn parse_header_line(&mut self, line: &str) {
        if line.is_empty() {
            return;
        }

        if let Some(rest) = line.strip_prefix("HTTP/")
            && let Some(code) = rest.split_whitespace().nth(1)
            && let Ok(value) = code.parse::<u16>()
            && let Ok(status) = StatusCode::from_u16(value)
        {
            // a new status line starts a new response (100 Continue, proxies)
            self.status = Some(status);
            self.headers.clear();
            return;
        }

        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            if name.is_empty() {
                return;
            }
            if let (Ok(header_name), Ok(header_value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value.trim()),
            ) {
                self.headers.append(header_name, header_value);
            }
        }
    }
}

impl Handler for Collector {
    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        self.response_body.extend_from_slice(data);
        Ok(data.len())
    }

    fn header(&mut self, data: &[u8]) -> bool {
        if let Ok(line) = str::from_utf8(data) {
            self.parse_header_line(line.trim());
        }
        true
    }

    fn read(&mut self, data: &mut [u8]) -> Result<usize, ReadError> {
        match &mut self.upload {
            Upload::Empty => Ok(0),
            Upload::Bytes { data: body, offset } => {
                let remaining = &body[(*offset).min(body.len())..];
                let len = remaining.len().min(data.len());
                data[..len].copy_from_slice(&remaining[..len]);
                *offset += len;
                Ok(len)
            }
            Upload::File(file) => file.read(data).map_err(|_| ReadError::Abort),
        }
    }
}

#[derive(Debug)]
struct SessionResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_and_headers() {
        let mut collector = Collector::new(Upload::Empty);
        collector.parse_header_line("HTTP/1.1 100 Continue");
        collector.parse_header_line("X-Ignored: yes");
        collector.parse_header_line("HTTP/1.1 404 Not Found");
        collector.parse_header_line("Content-Type: text/plain");
        collector.parse_header_line("Set-Cookie: a=1");
        collector.parse_header_line("Set-Cookie: b=2");

        let response = collector.take_response().unwrap();
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert!(response.headers.get("x-ignored").is_none());
        assert_eq!(response.headers["content-type"], "text/plain");
        assert_eq!(response.headers.get_all("set-cookie").iter().count(), 2);
    }

    #[test]
    fn missing_status_line_is_a_failure() {
        let mut collector = Collector::new(Upload::Empty);
        assert!(collector.take_response().is_err());
    }

    #[test]
    fn uploads_bytes_in_chunks() {
        let mut collector = Collector::new(Upload::Bytes {
            data: Bytes::from_static(b"hello"),
            offset: 0,
        });
        let mut buffer = [0_u8; 3];
        assert_eq!(collector.read(&mut buffer).unwrap(), 3);
        assert_eq!(&buffer, b"hel");
        assert_eq!(collector.read(&mut buffer).unwrap(), 2);
        assert_eq!(&buffer[..2], b"lo");
        assert_eq!(collector.read(&mut buffer).unwrap(), 0);
    }

    #[test]
    fn stall_window_rounds_up_to_whole_seconds() {
        assert_eq!(stall_window(Duration::from_millis(100)), Duration::from_secs(1));
        assert_eq!(stall_window(Duration::ZERO), Duration::from_secs(1));
        assert_eq!(stall_window(Duration::from_secs(2)), Duration::from_secs(2));
        assert_eq!(stall_window(Duration::from_millis(2001)), Duration::from_secs(3));
    }

    #[test]
    fn defaults_follow_backend_profile() {
        let transport = CurlTransport::new(&Settings::default());
        assert_eq!(transport.options.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(transport.options.read_timeout, DEFAULT_READ_TIMEOUT);
        assert!(transport.options.verify_host && transport.options.verify_peer);
        assert_eq!(transport.options.max_connections, 1000);
    }
}
