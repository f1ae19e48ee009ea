//! Ordered, self-authenticating request broker for a REST object store.
//!
//! # Overview
//! Callers enqueue operations (describe, query, search, CRUD by id or by
//! external id, attachments, blob streams) on a [`Broker`]. One session task
//! runs them against the service strictly in submission order, logs in
//! lazily with the OAuth password grant, and re-attempts an action once when
//! its token turns out to be stale.
//!
//! # Design
//! - Requests and responses cross the network boundary as plain data
//!   ([`HttpRequest`], [`HttpResponse`]); header composition, token exchange
//!   parsing and status classification are pure and tested with vectors.
//! - [`Transport`] is the only I/O seam. [`HttpsTransport`] implements it on
//!   `reqwest`; tests script it.
//! - [`Session`] owns the queue, token and sticky login error, and is driven
//!   by exactly one task, so at most one call is in flight per session.
//!
//! ```no_run
//! use sobject_broker::{Broker, Credentials};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = Broker::new(Credentials::from_env()?)?;
//! let account = broker.fetch("Account", "001xx000003DGb2", &["Name"]);
//! let contacts = broker.query("SELECT Id, LastName FROM Contact");
//! println!("{:?}", account.await?);
//! println!("{:?}", contacts.await?);
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod auth;
pub mod broker;
pub mod config;
pub mod error;
pub mod http;
pub mod mime;
pub mod response;
pub mod session;
pub mod stream;
pub mod transport;
pub mod url;

pub use action::{Action, Reply};
pub use auth::TokenBundle;
pub use broker::Broker;
pub use config::{BrokerConfig, ConfigError, Credentials};
pub use error::ApiError;
pub use http::{BodyMode, HttpMethod, HttpRequest, HttpResponse, ResponseBody};
pub use response::{classify, Body, Outcome};
pub use session::Session;
pub use stream::{BlobInfo, BodyStream};
pub use transport::{HttpsTransport, Transport};
