//! # Fluent HTTP requests over interchangeable backends
//! Switchyard builds requests against one model and sends them through
//! whichever transport backend was compiled in:
//! - `hyper-backend` (default): hyper + native-tls, with an optional on-disk
//!   response cache
//! - `curl-backend`: libcurl on the blocking thread pool
//!
//! When both are enabled hyper wins unless
//! [`HttpBuilder::backend`] asks otherwise. Tests and embedders can plug their
//! own engine in through the [`Transport`] trait.
//!
//! # Quick start
//! ```rust,no_run
//! # async fn example() -> switchyard::Result<()> {
//! use std::time::Duration;
//!
//! use serde::Deserialize;
//! use switchyard::Http;
//!
//! #[derive(Deserialize)]
//! struct Created {
//!     id: u64,
//! }
//!
//! let http = Http::builder()
//!     .connect_timeout(Duration::from_secs(2))
//!     .build()?;
//!
//! let created: Created = http
//!     .post("https://example.com/items")?
//!     .param("name", "widget")?
//!     .header("Accept", "application/json")
//!     .submit_for_object()
//!     .await?;
//! println!("created {}", created.id);
//! # Ok(())
//! # }
//! ```
//!
//! Parameters of `GET`, `DELETE` and `HEAD` requests go into the query
//! string. `POST`, `PUT` and `PATCH` send, in order of preference, a multipart
//! body (when the content type is `multipart/form-data`), the explicit body,
//! a URL-encoded form of the parameters, or nothing.

pub mod backend;
#[cfg(feature = "hyper-backend")]
mod cache;
mod client;
pub mod codec;
mod config;
pub mod entity;
pub mod error;
#[cfg(feature = "hyper-backend")]
mod multipart;
mod param;
mod request;
mod submit;
pub mod transport;

pub use backend::Backend;
pub use client::{Http, HttpBuilder};
pub use config::HttpConfig;
pub use error::{BoxError, Error, ErrorKind, Result, TransportFailure};
pub use param::{IntoParamValues, ParamValue};
pub use request::{Body, Method, Request};
pub use submit::TEMP_FILE_PREFIX;
pub use transport::{Entity, Outgoing, ResponseBody, Transport, TransportFuture, TransportResponse};

pub use encoding_rs::Encoding;
