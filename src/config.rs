//! Client configuration.
//!
//! [`HttpConfig`] mirrors every [`HttpBuilder`](crate::HttpBuilder) option so a
//! client can be described in a config file or the environment. Durations are
//! expressed in milliseconds.

use core::{str::FromStr, time::Duration};
use std::{env, path::PathBuf};

use serde::{Deserialize, Deserializer};

use crate::{Error, Result, backend::Backend};

const ENV_BACKEND: &str = "SWITCHYARD_BACKEND";
const ENV_CONNECT_TIMEOUT: &str = "SWITCHYARD_CONNECT_TIMEOUT_MS";
const ENV_READ_TIMEOUT: &str = "SWITCHYARD_READ_TIMEOUT_MS";
const ENV_MAX_CONNECTIONS: &str = "SWITCHYARD_MAX_CONNECTIONS";
const ENV_CACHE_DIR: &str = "SWITCHYARD_CACHE_DIR";
const ENV_MAX_REDIRECTS: &str = "SWITCHYARD_MAX_REDIRECTS";
const ENV_ACCEPT_INVALID_HOSTNAMES: &str = "SWITCHYARD_ACCEPT_INVALID_HOSTNAMES";
const ENV_ACCEPT_INVALID_CERTS: &str = "SWITCHYARD_ACCEPT_INVALID_CERTS";

/// Serializable client options. Unset fields fall back to backend defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Backend to use instead of the compiled-in priority order
    pub backend: Option<Backend>,
    /// Connect deadline
    #[serde(rename = "connect_timeout_ms", deserialize_with = "millis")]
    pub connect_timeout: Option<Duration>,
    /// Read/write deadline
    #[serde(rename = "read_timeout_ms", deserialize_with = "millis")]
    pub read_timeout: Option<Duration>,
    /// Ceiling on concurrent connections, total and per host
    pub max_connections: Option<usize>,
    /// Directory of the on-disk response cache (hyper backend only)
    pub cache_dir: Option<PathBuf>,
    /// Number of redirects to follow, `0` turns 3xx into failures
    pub max_redirects: Option<usize>,
    /// Skip TLS hostname verification
    pub accept_invalid_hostnames: bool,
    /// Skip TLS certificate verification
    pub accept_invalid_certs: bool,
}

impl HttpConfig {
    /// Read the configuration from `SWITCHYARD_*` environment variables.
    ///
    /// Missing variables leave the field unset.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if a variable is set to a malformed value.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            backend: parse_var(ENV_BACKEND)?,
            connect_timeout: parse_var::<u64>(ENV_CONNECT_TIMEOUT)?.map(Duration::from_millis),
            read_timeout: parse_var::<u64>(ENV_READ_TIMEOUT)?.map(Duration::from_millis),
            max_connections: parse_var(ENV_MAX_CONNECTIONS)?,
            cache_dir: env::var_os(ENV_CACHE_DIR)
                .filter(|dir| !dir.is_empty())
                .map(PathBuf::from),
            max_redirects: parse_var(ENV_MAX_REDIRECTS)?,
            accept_invalid_hostnames: parse_var(ENV_ACCEPT_INVALID_HOSTNAMES)?.unwrap_or(false),
            accept_invalid_certs: parse_var(ENV_ACCEPT_INVALID_CERTS)?.unwrap_or(false),
        })
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    let Ok(raw) = env::var(name) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse()
        .map(Some)
        .map_err(|err| Error::validation(format!("{name}=`{raw}`: {err}")))
}

fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
    Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
}
