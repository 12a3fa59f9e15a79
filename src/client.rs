//! The shared client handle and its builder.

use core::time::Duration;
use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use tracing::{debug, info};

use crate::{
    Method, Request, Result,
    backend::{self, Backend, Settings},
    config::HttpConfig,
    transport::Transport,
};

/// A configured HTTP client.
///
/// Cheap to clone; every clone shares one backend and its connection pool.
/// The pool is released by [`Http::close`] or when the last clone is dropped.
///
/// ```rust,no_run
/// # async fn example() -> switchyard::Result<()> {
/// use switchyard::Http;
///
/// let http = Http::new()?;
/// let text = http
///     .get("https://example.com/search")?
///     .param("q", "rust")?
///     .submit_for_text()
///     .await?;
/// println!("{text}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Http {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    transport: Arc<dyn Transport>,
    max_redirects: usize,
    closed: AtomicBool,
}

impl Inner {
    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!(backend = self.transport.name(), "closing http client");
            self.transport.close();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.close();
    }
}

impl Http {
    /// Start configuring a client.
    #[must_use]
    pub fn builder() -> HttpBuilder {
        HttpBuilder::default()
    }

    /// Build a client with the default backend and settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedConfiguration`](crate::Error::UnsupportedConfiguration)
    /// if no backend is compiled in.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Build a client from a [`HttpConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedConfiguration`](crate::Error::UnsupportedConfiguration)
    /// if the configured backend is unusable.
    pub fn from_config(config: HttpConfig) -> Result<Self> {
        HttpBuilder::from_config(config).build()
    }

    /// Create a `GET` request for `url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`](crate::Error::Validation) if `url` is not
    /// an absolute http(s) URL.
    pub fn new_req(&self, url: &str) -> Result<Request> {
        Request::new(self.clone(), url)
    }

    /// Create a request with the given method.
    ///
    /// # Errors
    ///
    /// See [`Http::new_req`].
    pub fn request(&self, method: Method, url: &str) -> Result<Request> {
        Ok(self.new_req(url)?.method(method))
    }

    /// Create a `GET` request.
    ///
    /// # Errors
    ///
    /// See [`Http::new_req`].
    pub fn get(&self, url: &str) -> Result<Request> {
        self.request(Method::Get, url)
    }

    /// Create a `POST` request.
    ///
    /// # Errors
    ///
    /// See [`Http::new_req`].
    pub fn post(&self, url: &str) -> Result<Request> {
        self.request(Method::Post, url)
    }

    /// Create a `PUT` request.
    ///
    /// # Errors
    ///
    /// See [`Http::new_req`].
    pub fn put(&self, url: &str) -> Result<Request> {
        self.request(Method::Put, url)
    }

    /// Create a `PATCH` request.
    ///
    /// # Errors
    ///
    /// See [`Http::new_req`].
    pub fn patch(&self, url: &str) -> Result<Request> {
        self.request(Method::Patch, url)
    }

    /// Create a `DELETE` request.
    ///
    /// # Errors
    ///
    /// See [`Http::new_req`].
    pub fn delete(&self, url: &str) -> Result<Request> {
        self.request(Method::Delete, url)
    }

    /// Create a `HEAD` request.
    ///
    /// # Errors
    ///
    /// See [`Http::new_req`].
    pub fn head(&self, url: &str) -> Result<Request> {
        self.request(Method::Head, url)
    }

    /// Release the connection pool. Idempotent.
    ///
    /// Requests submitted afterwards fail with a closed-client transport error.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Whether [`Http::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Name of the backend serving this client.
    pub fn backend_name(&self) -> &'static str {
        self.inner.transport.name()
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.inner.transport.as_ref()
    }

    pub(crate) fn max_redirects(&self) -> usize {
        self.inner.max_redirects
    }
}

/// Builder for [`Http`].
///
/// `build` can be called repeatedly; every call produces an independent
/// client and never touches clients built earlier.
#[derive(Debug, Clone, Default)]
pub struct HttpBuilder {
    settings: Settings,
    backend: Option<Backend>,
    transport: Option<Arc<dyn Transport>>,
    max_redirects: usize,
}

impl HttpBuilder {
    /// Seed a builder from a [`HttpConfig`].
    #[must_use]
    pub fn from_config(config: HttpConfig) -> Self {
        Self {
            settings: Settings {
                connect_timeout: config.connect_timeout,
                read_timeout: config.read_timeout,
                max_connections: config.max_connections,
                cache_dir: config.cache_dir,
                accept_invalid_hostnames: config.accept_invalid_hostnames,
                accept_invalid_certs: config.accept_invalid_certs,
            },
            backend: config.backend,
            transport: None,
            max_redirects: config.max_redirects.unwrap_or(0),
        }
    }

    /// Deadline for establishing a connection.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.settings.connect_timeout = Some(timeout);
        self
    }

    /// Deadline for each read while waiting for the response.
    ///
    /// The curl backend rounds it up to whole seconds.
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.settings.read_timeout = Some(timeout);
        self
    }

    /// Ceiling on concurrent connections, total and per host.
    #[must_use]
    pub fn max_connections(mut self, max: usize) -> Self {
        self.settings.max_connections = Some(max);
        self
    }

    /// Directory of the on-disk response cache. Only the hyper backend uses it.
    #[must_use]
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.settings.cache_dir = Some(dir.into());
        self
    }

    /// Skip TLS hostname verification.
    #[must_use]
    pub fn accept_invalid_hostnames(mut self, accept: bool) -> Self {
        self.settings.accept_invalid_hostnames = accept;
        self
    }

    /// Skip TLS certificate verification.
    #[must_use]
    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.settings.accept_invalid_certs = accept;
        self
    }

    /// Follow up to `max` redirects. `0` (the default) treats 3xx as failures.
    #[must_use]
    pub const fn max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = max;
        self
    }

    /// Use this backend instead of the compiled-in priority order.
    #[must_use]
    pub const fn backend(mut self, backend: Backend) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Use a caller supplied transport. Takes precedence over [`HttpBuilder::backend`].
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build a client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedConfiguration`](crate::Error::UnsupportedConfiguration)
    /// if the requested backend is not compiled in, no backend is, or the
    /// backend rejects the settings.
    pub fn build(&self) -> Result<Http> {
        let transport = match &self.transport {
            Some(transport) => Arc::clone(transport),
            None => backend::build(backend::select(self.backend)?, &self.settings)?,
        };
        debug!(backend = transport.name(), max_redirects = self.max_redirects, "http client ready");
        Ok(Http {
            inner: Arc::new(Inner {
                transport,
                max_redirects: self.max_redirects,
                closed: AtomicBool::new(false),
            }),
        })
    }
}
