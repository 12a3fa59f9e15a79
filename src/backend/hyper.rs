use core::time::Duration;
use std::{
    error::Error as StdError,
    io,
    sync::{Arc, Mutex, PoisonError},
};

use bytes::Bytes;
use futures_util::{Stream, stream};
use http::header::CONTENT_TYPE;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_tls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client as HyperClient, connect::HttpConnector},
    rt::TokioExecutor,
};
use tokio::{sync::Semaphore, time::timeout};
use tracing::debug;

use super::Settings;
use crate::{
    Error, Result, entity,
    error::TransportFailure,
    multipart,
    transport::{Entity, Outgoing, ResponseBody, Transport, TransportFuture, TransportResponse},
};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

type Client = HyperClient<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Transport backed by a pooled hyper client over native-tls.
#[derive(Debug)]
pub(crate) struct HyperTransport {
    client: Mutex<Option<Client>>,
    permits: Arc<Semaphore>,
    read_timeout: Duration,
}

impl HyperTransport {
    pub(crate) fn new(settings: &Settings) -> Result<Self> {
        let max_connections = settings.max_connections();

        let mut http = HttpConnector::new();
        http.set_connect_timeout(Some(
            settings.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
        ));
        http.enforce_http(false);

        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_hostnames(settings.accept_invalid_hostnames)
            .danger_accept_invalid_certs(settings.accept_invalid_certs)
            .build()
            .map_err(|err| Error::UnsupportedConfiguration(format!("native-tls: {err}")))?;
        let https = HttpsConnector::from((http, tokio_native_tls::TlsConnector::from(tls)));

        let client = HyperClient::builder(TokioExecutor::new())
            .pool_max_idle_per_host(max_connections)
            .retry_canceled_requests(false)
            .build(https);

        Ok(Self {
            client: Mutex::new(Some(client)),
            permits: Arc::new(Semaphore::new(max_connections)),
            read_timeout: settings.read_timeout.unwrap_or(DEFAULT_READ_TIMEOUT),
        })
    }

    fn client(&self) -> Option<Client> {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn send(&self, outgoing: Outgoing) -> Result<TransportResponse, TransportFailure> {
        let client = self.client().ok_or(TransportFailure::Closed)?;
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| TransportFailure::Closed)?;

        let request = native_request(outgoing).await?;
        let response = timeout(self.read_timeout, client.request(request))
            .await
            .map_err(|_| TransportFailure::Timeout(self.read_timeout))?
            .map_err(map_error)?;

        let (parts, body) = response.into_parts();
        let body = ResponseBody::from_stream(body_stream(body, self.read_timeout)).with_guard(permit);
        Ok(TransportResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}

impl Transport for HyperTransport {
    fn name(&self) -> &'static str {
        "hyper"
    }

    fn execute(&self, request: Outgoing) -> TransportFuture<'_> {
        Box::pin(self.send(request))
    }

    fn close(&self) {
        let client = self
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.permits.close();
        if client.is_some() {
            debug!("hyper connection pool released");
        }
    }
}

async fn native_request(outgoing: Outgoing) -> Result<http::Request<Full<Bytes>>, TransportFailure> {
    let content_type = outgoing.entity_content_type().map(str::to_owned);
    let multipart = matches!(outgoing.entity, Some(Entity::Multipart { .. }));

    let mut builder = http::Request::builder()
        .method(http::Method::from(outgoing.method))
        .uri(outgoing.url.as_str());
    for (name, value) in &outgoing.headers {
        // the multipart content type must carry our boundary
        if multipart && name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()) {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_str());
    }

    let (body, content_type) = match outgoing.entity {
        None => (Bytes::new(), None),
        Some(Entity::Empty { .. }) => (Bytes::new(), content_type),
        Some(Entity::Bytes { data, .. }) => (data, content_type),
        Some(Entity::File { path, .. }) => (Bytes::from(async_fs::read(&path).await?), content_type),
        Some(Entity::Multipart { parts }) => {
            let (boundary, body) = multipart::encode(parts).await?;
            (
                body,
                Some(format!("{}; boundary={boundary}", entity::MULTIPART_FORM_DATA)),
            )
        }
    };
    if let Some(content_type) = content_type {
        builder = builder.header(CONTENT_TYPE, content_type);
    }

    builder
        .body(Full::new(body))
        .map_err(|err| TransportFailure::InvalidRequest(err.to_string()))
}

fn body_stream(
    body: Incoming,
    read_timeout: Duration,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    stream::unfold(Some(body), move |state| async move {
        let mut body = state?;
        loop {
            match timeout(read_timeout, body.frame()).await {
                Err(_) => {
                    let err = io::Error::new(io::ErrorKind::TimedOut, "response body read timed out");
                    return Some((Err(err), None));
                }
                Ok(None) => return None,
                Ok(Some(Err(err))) => return Some((Err(io::Error::other(err)), None)),
                Ok(Some(Ok(frame))) => {
                    // trailers carry no data
                    if let Ok(data) = frame.into_data() {
                        return Some((Ok(data), Some(body)));
                    }
                }
            }
        }
    })
}

fn map_error(err: hyper_util::client::legacy::Error) -> TransportFailure {
    if caused_by_tls(&err) {
        return TransportFailure::Tls(Box::new(err));
    }
    if err.is_connect() {
        return TransportFailure::Connect(Box::new(err));
    }
    TransportFailure::other(err)
}

fn caused_by_tls(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(error) = current {
        if error.is::<native_tls::Error>() {
            return true;
        }
        current = error.source();
    }
    false
}
