//! Transport backends.
//!
//! Backends are compiled in through cargo features. When a client is built
//! without an explicit choice, the first compiled-in backend wins, in this
//! order: `hyper-backend`, `curl-backend`.

use core::{fmt, str::FromStr, time::Duration};
use std::{path::PathBuf, sync::Arc};

use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::{Error, Result, transport::Transport};

#[cfg(feature = "hyper-backend")]
mod hyper;

#[cfg(feature = "curl-backend")]
mod curl;

/// Default ceiling on concurrent connections.
pub(crate) const DEFAULT_MAX_CONNECTIONS: usize = 1000;

/// Known transport backends, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// hyper with native-tls; honours the response cache
    Hyper,
    /// libcurl, driven on the blocking thread pool
    Curl,
}

impl Backend {
    /// Every backend, highest priority first.
    pub const PRIORITY: [Self; 2] = [Self::Hyper, Self::Curl];

    /// Lower-case backend name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Hyper => "hyper",
            Self::Curl => "curl",
        }
    }

    /// Whether this backend was compiled in.
    pub const fn is_available(self) -> bool {
        match self {
            Self::Hyper => cfg!(feature = "hyper-backend"),
            Self::Curl => cfg!(feature = "curl-backend"),
        }
    }

    /// Compiled-in backends in priority order.
    pub fn available() -> Vec<Self> {
        Self::PRIORITY
            .into_iter()
            .filter(|backend| backend.is_available())
            .collect()
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hyper" => Ok(Self::Hyper),
            "curl" => Ok(Self::Curl),
            other => Err(Error::validation(format!("unknown backend `{other}`"))),
        }
    }
}

/// Options shared by every backend. Unset values use backend defaults.
#[derive(Debug, Clone, Default)]
pub(crate) struct Settings {
    pub(crate) connect_timeout: Option<Duration>,
    pub(crate) read_timeout: Option<Duration>,
    pub(crate) max_connections: Option<usize>,
    pub(crate) cache_dir: Option<PathBuf>,
    pub(crate) accept_invalid_hostnames: bool,
    pub(crate) accept_invalid_certs: bool,
}

impl Settings {
    /// Connection ceiling, capped at what a semaphore can hold.
    pub(crate) fn max_connections(&self) -> usize {
        self.max_connections
            .filter(|max| *max > 0)
            .unwrap_or(DEFAULT_MAX_CONNECTIONS)
            .min(Semaphore::MAX_PERMITS)
    }
}

/// Pick the backend to build.
///
/// # Errors
///
/// Returns [`Error::UnsupportedConfiguration`] if the requested backend, or
/// every backend when none was requested, is missing from the build.
pub(crate) fn select(requested: Option<Backend>) -> Result<Backend> {
    if let Some(backend) = requested {
        if backend.is_available() {
            return Ok(backend);
        }
        return Err(Error::UnsupportedConfiguration(format!(
            "backend `{backend}` is not compiled in, enable the `{backend}-backend` feature"
        )));
    }
    Backend::available().into_iter().next().ok_or_else(|| {
        Error::UnsupportedConfiguration(
            "no transport backend compiled in, enable `hyper-backend` or `curl-backend`".to_owned(),
        )
    })
}

/// Construct the transport for `backend`.
///
/// # Errors
///
/// Returns [`Error::UnsupportedConfiguration`] if the backend is missing from
/// the build or refuses the settings.
pub(crate) fn build(backend: Backend, settings: &Settings) -> Result<Arc<dyn Transport>> {
    debug!(%backend, ?settings, "building transport");
    match backend {
        #[cfg(feature = "hyper-backend")]
        Backend::Hyper => {
            let transport = self::hyper::HyperTransport::new(settings)?;
            match &settings.cache_dir {
                Some(dir) => Ok(Arc::new(crate::cache::CachedTransport::new(
                    transport, dir,
                )?)),
                None => Ok(Arc::new(transport)),
            }
        }
        #[cfg(feature = "curl-backend")]
        Backend::Curl => {
            if let Some(dir) = &settings.cache_dir {
                debug!(dir = %dir.display(), "curl backend ignores the response cache");
            }
            Ok(Arc::new(self::curl::CurlTransport::new(settings)))
        }
        #[allow(unreachable_patterns)]
        other => Err(Error::UnsupportedConfiguration(format!(
            "backend `{other}` is not compiled in"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_backend_names() {
        assert_eq!("Hyper".parse::<Backend>().unwrap(), Backend::Hyper);
        assert_eq!(" curl ".parse::<Backend>().unwrap(), Backend::Curl);
        assert!("okhttp".parse::<Backend>().is_err());
    }

    #[test]
    fn selection_follows_priority() {
        let available = Backend::available();
        match select(None) {
            Ok(backend) => assert_eq!(Some(&backend), available.first()),
            Err(err) => {
                assert!(available.is_empty());
                assert!(matches!(err, Error::UnsupportedConfiguration(_)));
            }
        }
    }

    #[test]
    fn missing_backend_is_unsupported() {
        for backend in Backend::PRIORITY {
            let selected = select(Some(backend));
            assert_eq!(selected.is_ok(), backend.is_available());
            if let Err(err) = selected {
                assert!(matches!(err, Error::UnsupportedConfiguration(_)));
                assert!(build(backend, &Settings::default()).is_err());
            }
        }
    }

    #[test]
    fn max_connections_defaults() {
        assert_eq!(Settings::default().max_connections(), DEFAULT_MAX_CONNECTIONS);
        let settings = Settings {
            max_connections: Some(4),
            ..Settings::default()
        };
        assert_eq!(settings.max_connections(), 4);

        let unbounded = Settings {
            max_connections: Some(usize::MAX),
            ..Settings::default()
        };
        assert_eq!(unbounded.max_connections(), Semaphore::MAX_PERMITS);
    }

    #[tokio::test]
    async fn huge_connection_ceiling_builds() {
        for backend in Backend::available() {
            let settings = Settings {
                max_connections: Some(usize::MAX),
                ..Settings::default()
            };
            let transport = build(backend, &settings).unwrap();
            transport.close();
        }
    }
}
