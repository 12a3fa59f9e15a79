//! Submission of requests and response handling.
//!
//! Every `submit_*` call consumes the [`Request`], applies the shared encoding
//! policy, hands the result to the client's transport and maps failures onto
//! [`Error`]. A response status of 300 or above is a failure: its body is read
//! best-effort into the error diagnostic.

use std::{
    io,
    path::{Path, PathBuf},
};

use bytes::Bytes;
use futures_util::io::AsyncWriteExt;
use http::{
    HeaderMap, StatusCode,
    header::{AUTHORIZATION, CONTENT_LENGTH, COOKIE, HOST, LOCATION},
};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::{
    Error, Method, Request, Result, codec, entity,
    error::TransportFailure,
    param::ParamValue,
    transport::{Entity, Outgoing, ResponseBody},
};

/// Prefix of the temporary files created by [`Request::submit_for_file`].
pub const TEMP_FILE_PREFIX: &str = "switchyard-";

const UNREADABLE_BODY: &str = "<unreadable response body>";

/// Target and diagnostic of one submission, captured before the request is
/// consumed.
#[derive(Debug)]
struct Exchange {
    uri: String,
    diagnostic: String,
}

impl Exchange {
    fn transport(&self, source: TransportFailure) -> Error {
        Error::Transport {
            uri: self.uri.clone(),
            diagnostic: self.diagnostic.clone(),
            source,
        }
    }

    fn io(&self, source: io::Error) -> Error {
        Error::Io {
            uri: self.uri.clone(),
            diagnostic: self.diagnostic.clone(),
            source,
        }
    }

    fn codec(&self, source: serde_json::Error) -> Error {
        Error::Codec {
            uri: self.uri.clone(),
            diagnostic: self.diagnostic.clone(),
            source,
        }
    }

    async fn status(self, status: StatusCode, mut body: ResponseBody) -> Error {
        let response = match body.text().await {
            Ok(text) => text,
            Err(err) => {
                warn!(uri = %self.uri, %status, %err, "failed to read error response body");
                UNREADABLE_BODY.to_owned()
            }
        };
        body.close();
        Error::Status {
            status,
            uri: self.uri,
            diagnostic: format!("{}=>resp:{response}", self.diagnostic),
        }
    }
}

impl Request {
    /// Submit and return the response body as text.
    ///
    /// Invalid UTF-8 sequences are replaced.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] on connection, timeout or read failures
    /// and [`Error::Status`] for statuses of 300 or above.
    pub async fn submit_for_text(self) -> Result<String> {
        let bytes = self.submit_for_bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Submit and return the response body as bytes.
    ///
    /// # Errors
    ///
    /// See [`Request::submit_for_text`].
    pub async fn submit_for_bytes(self) -> Result<Bytes> {
        let (exchange, mut body) = self.send().await?;
        let bytes = body
            .bytes()
            .await
            .map_err(|err| exchange.transport(err.into()))?;
        body.close();
        Ok(bytes)
    }

    /// Submit and stream the response body into a new temporary file.
    ///
    /// The file is created in the OS temp directory with the `switchyard-`
    /// prefix and belongs to the caller, it is not removed automatically. A
    /// partially written file is removed when the transfer fails.
    ///
    /// # Errors
    ///
    /// See [`Request::submit_for_text`]. Local file failures are
    /// [`Error::Io`].
    pub async fn submit_for_file(self) -> Result<PathBuf> {
        let (exchange, mut body) = self.send().await?;
        let path = tempfile::Builder::new()
            .prefix(TEMP_FILE_PREFIX)
            .tempfile()
            .and_then(|file| file.into_temp_path().keep().map_err(|err| err.error))
            .map_err(|err| exchange.io(err))?;

        let written = write_body(&exchange, &mut body, &path).await;
        body.close();
        if let Err(err) = written {
            if let Err(remove) = async_fs::remove_file(&path).await {
                warn!(path = %path.display(), %remove, "failed to remove partial download");
            }
            return Err(err);
        }
        Ok(path)
    }

    /// Submit and deserialize the JSON response into `T`.
    ///
    /// `T` can be any owned shape, including generic ones such as
    /// `Vec<Item>` or `HashMap<String, Item>`.
    ///
    /// # Errors
    ///
    /// See [`Request::submit_for_text`]. A body that does not match `T` is
    /// [`Error::Codec`].
    pub async fn submit_for_object<T: DeserializeOwned>(self) -> Result<T> {
        let (exchange, mut body) = self.send().await?;
        let bytes = body
            .bytes()
            .await
            .map_err(|err| exchange.transport(err.into()))?;
        body.close();
        codec::from_slice(&bytes).map_err(|err| exchange.codec(err))
    }

    /// Submit and hand the open response body to `on_success`.
    ///
    /// The body is lent for the duration of the call and closed right after,
    /// whatever the handler does. Any failure, including one returned by
    /// `on_success`, is passed to `on_error` instead of being returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Handler`] if `on_success` failed and `on_error` did
    /// not recover, or if `on_error` itself failed. In the latter case the
    /// error it was given is available through [`Error::suppressed`].
    pub async fn submit_for_stream<T, S, E>(self, on_success: S, on_error: E) -> Result<T>
    where
        S: AsyncFnOnce(&mut ResponseBody) -> anyhow::Result<T>,
        E: AsyncFnOnce(&Error) -> anyhow::Result<T>,
    {
        let outcome = match self.send().await {
            Ok((_exchange, mut body)) => {
                let handled = on_success(&mut body).await;
                body.close();
                handled.map_err(|err| Error::handler(err, None))
            }
            Err(err) => Err(err),
        };
        let error = match outcome {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        let recovered = on_error(&error).await;
        recovered.map_err(|err| Error::handler(err, Some(error)))
    }

    /// Encode, execute and follow redirects. Statuses of 300 or above are
    /// turned into [`Error::Status`].
    async fn send(self) -> Result<(Exchange, ResponseBody)> {
        let exchange = Exchange {
            uri: self.url.to_string(),
            diagnostic: self.diagnostic(),
        };
        if self.client.is_closed() {
            return Err(exchange.transport(TransportFailure::Closed));
        }

        let mut outgoing = entity::encode(&self);
        for path in local_files(outgoing.entity.as_ref()) {
            async_fs::metadata(path)
                .await
                .map_err(|err| exchange.io(err))?;
        }

        let transport = self.client.transport();
        let max_redirects = self.client.max_redirects();
        let mut hops = 0;
        loop {
            debug!(
                backend = transport.name(),
                method = %outgoing.method,
                url = %outgoing.url,
                body = %exchange.diagnostic,
                "sending request"
            );
            let next = (hops < max_redirects).then(|| outgoing.clone());
            let response = transport
                .execute(outgoing)
                .await
                .map_err(|err| exchange.transport(err))?;
            let status = response.status;
            debug!(%status, "response received");

            if status.as_u16() < 300 {
                return Ok((exchange, response.body));
            }
            if let Some(current) = next
                && let Some(redirected) = redirect(&current, status, &response.headers)
            {
                response.body.close();
                debug!(from = %current.url, to = %redirected.url, %status, "following redirect");
                outgoing = redirected;
                hops += 1;
                continue;
            }
            return Err(exchange.status(status, response.body).await);
        }
    }
}

/// Local files the entity reads from, checked before anything is sent.
fn local_files(entity: Option<&Entity>) -> Vec<&Path> {
    match entity {
        Some(Entity::File { path, .. }) => vec![path.as_path()],
        Some(Entity::Multipart { parts }) => parts
            .iter()
            .filter_map(|(_, value)| match value {
                ParamValue::File(path) => Some(path.as_path()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

async fn write_body(exchange: &Exchange, body: &mut ResponseBody, path: &Path) -> Result<()> {
    let mut file = async_fs::File::create(path)
        .await
        .map_err(|err| exchange.io(err))?;
    while let Some(chunk) = body
        .chunk()
        .await
        .map_err(|err| exchange.transport(err.into()))?
    {
        file.write_all(&chunk)
            .await
            .map_err(|err| exchange.io(err))?;
    }
    file.flush().await.map_err(|err| exchange.io(err))?;
    Ok(())
}

/// The request to send after a 3xx, or `None` if it cannot be followed.
fn redirect(current: &Outgoing, status: StatusCode, headers: &HeaderMap) -> Option<Outgoing> {
    let method = match status {
        StatusCode::SEE_OTHER => Method::Get,
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND
            if !matches!(current.method, Method::Get | Method::Head) =>
        {
            Method::Get
        }
        StatusCode::MOVED_PERMANENTLY
        | StatusCode::FOUND
        | StatusCode::TEMPORARY_REDIRECT
        | StatusCode::PERMANENT_REDIRECT => current.method,
        _ => return None,
    };

    let location = headers.get(LOCATION)?.to_str().ok()?;
    let url = current.url.join(location).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }

    let cross_host = current.url.host_str() != url.host_str();
    let mut headers = current.headers.clone();
    headers.retain(|(name, _)| {
        let is = |header: &http::HeaderName| name.eq_ignore_ascii_case(header.as_str());
        !(is(&HOST) || is(&CONTENT_LENGTH) || (cross_host && (is(&AUTHORIZATION) || is(&COOKIE))))
    });
    let entity = if method == current.method {
        current.entity.clone()
    } else {
        None
    };

    Some(Outgoing {
        method,
        url,
        headers,
        entity,
    })
}
