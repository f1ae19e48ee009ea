//! Public operations on the remote object store.
//!
//! # Design
//! `Broker` is a cheap, cloneable handle to one session task. Every
//! operation builds its request target and payload synchronously, enqueues
//! an [`Action`] before returning, and hands back a [`Reply`] to await. So
//! the order of calls on a broker is the order the service sees them, no
//! matter when or whether the replies are awaited.
//!
//! The exceptions read local content first (`attach_stream`, `attach_file`)
//! or chain two requests (`attachment_stream`); they join the queue when
//! their first request is actually ready.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::action::{Action, Reply};
use crate::config::{BrokerConfig, Credentials};
use crate::error::ApiError;
use crate::http::HttpMethod;
use crate::mime::simple_mime;
use crate::response::Body;
use crate::session::Session;
use crate::stream::{BlobInfo, BodyStream};
use crate::transport::{HttpsTransport, Transport};
use crate::url::{build_url, service_root};

const ATTACHMENT: &str = "Attachment";

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct AttachmentRecord<'a> {
    parent_id: &'a str,
    content_type: &'a str,
    name: &'a str,
    body: String,
}

/// Handle to one authenticated session.
///
/// The session task is spawned on the current tokio runtime and lives until
/// the last clone of the handle is dropped. Constructing a broker outside a
/// runtime fails with [`ApiError::Runtime`].
#[derive(Debug, Clone)]
pub struct Broker {
    inbox: mpsc::UnboundedSender<Action>,
    root: String,
}

impl Broker {
    pub fn new(credentials: Credentials) -> Result<Self, ApiError> {
        Self::with_config(credentials, BrokerConfig::default())
    }

    pub fn with_config(credentials: Credentials, config: BrokerConfig) -> Result<Self, ApiError> {
        let transport = HttpsTransport::new(&config)?;
        Self::with_transport(Arc::new(transport), credentials, &config.api_version)
    }

    pub fn with_transport(
        transport: Arc<dyn Transport>,
        credentials: Credentials,
        api_version: &str,
    ) -> Result<Self, ApiError> {
        let runtime = Handle::try_current().map_err(|e| ApiError::Runtime(e.to_string()))?;
        let (inbox, rx) = mpsc::unbounded_channel();
        runtime.spawn(Session::new(transport, credentials).run(rx));
        Ok(Broker {
            inbox,
            root: service_root(api_version),
        })
    }

    fn url<S: AsRef<str>>(&self, segments: &[S], query: &[(&str, &str)]) -> String {
        build_url(&self.root, segments, query)
    }

    fn submit(&self, method: HttpMethod, command: String, payload: Option<Bytes>) -> Reply<Body> {
        let (action, reply) = Action::buffered(method, command, payload);
        // A send error means the session task is gone; dropping the action
        // resolves the reply with `Closed`.
        let _ = self.inbox.send(action);
        reply
    }

    fn submit_with<F>(&self, method: HttpMethod, build: F) -> Reply<Body>
    where
        F: FnOnce() -> Result<(String, Bytes), ApiError>,
    {
        match build() {
            Ok((command, payload)) => self.submit(method, command, Some(payload)),
            Err(err) => Reply::ready(Err(err)),
        }
    }

    // -----------------------------------------------------------------------
    // Schema and search
    // -----------------------------------------------------------------------

    /// Global describe with `None`, per-object describe with `Some(object)`.
    pub fn describe(&self, object: Option<&str>) -> Reply<Body> {
        let command = match object {
            None => self.url(&["sobjects"], &[]),
            Some(object) => self.url(&["sobjects", object, "describe"], &[]),
        };
        self.submit(HttpMethod::Get, command, None)
    }

    pub fn query(&self, soql: &str) -> Reply<Body> {
        self.submit(HttpMethod::Get, self.url(&["query"], &[("q", soql)]), None)
    }

    pub fn search(&self, sosl: &str) -> Reply<Body> {
        self.submit(HttpMethod::Get, self.url(&["search"], &[("q", sosl)]), None)
    }

    // -----------------------------------------------------------------------
    // Records by id
    // -----------------------------------------------------------------------

    pub fn create<V: Serialize + ?Sized>(&self, object: &str, record: &V) -> Reply<Body> {
        self.submit_with(HttpMethod::Post, || Ok((self.url(&["sobjects", object], &[]), encode(record)?)))
    }

    /// Fetch a record, limited to `fields` when non-empty.
    pub fn fetch(&self, object: &str, id: &str, fields: &[&str]) -> Reply<Body> {
        let joined = fields.join(", ");
        let command = if fields.is_empty() {
            self.url(&["sobjects", object, id], &[])
        } else {
            self.url(&["sobjects", object, id], &[("fields", joined.as_str())])
        };
        self.submit(HttpMethod::Get, command, None)
    }

    pub fn update<V: Serialize + ?Sized>(&self, object: &str, id: &str, record: &V) -> Reply<Body> {
        self.submit_with(HttpMethod::Patch, || Ok((self.url(&["sobjects", object, id], &[]), encode(record)?)))
    }

    /// Insert or update keyed on the value of `index_field` inside `record`.
    pub fn upsert<V: Serialize + ?Sized>(&self, object: &str, record: &V, index_field: &str) -> Reply<Body> {
        self.submit_with(HttpMethod::Patch, || {
            let value = serde_json::to_value(record).map_err(|e| ApiError::Encode(e.to_string()))?;
            let key = external_key(&value, index_field)?;
            let command = self.url(&["sobjects", object, index_field, key.as_str()], &[]);
            Ok((command, Bytes::from(value.to_string())))
        })
    }

    pub fn delete(&self, object: &str, id: &str) -> Reply<Body> {
        self.submit(HttpMethod::Delete, self.url(&["sobjects", object, id], &[]), None)
    }

    // -----------------------------------------------------------------------
    // Records by external id
    // -----------------------------------------------------------------------

    pub fn fetch_external(&self, object: &str, index_field: &str, index_value: &str) -> Reply<Body> {
        let command = self.url(&["sobjects", object, index_field, index_value], &[]);
        self.submit(HttpMethod::Get, command, None)
    }

    pub fn update_external<V: Serialize + ?Sized>(&self, object: &str, record: &V, index_field: &str) -> Reply<Body> {
        self.upsert(object, record, index_field)
    }

    pub fn upsert_external<V: Serialize + ?Sized>(&self, object: &str, record: &V, index_field: &str) -> Reply<Body> {
        self.upsert(object, record, index_field)
    }

    pub fn delete_external(&self, object: &str, index_field: &str, index_value: &str) -> Reply<Body> {
        let command = self.url(&["sobjects", object, index_field, index_value], &[]);
        self.submit(HttpMethod::Delete, command, None)
    }

    // -----------------------------------------------------------------------
    // Attachments and blobs
    // -----------------------------------------------------------------------

    /// Store `content` as an `Attachment` on `parent_id`.
    pub fn create_attachment(
        &self,
        parent_id: &str,
        name: &str,
        content: impl AsRef<[u8]>,
        content_type: &str,
    ) -> Reply<Body> {
        let record = AttachmentRecord {
            parent_id,
            content_type,
            name,
            body: BASE64.encode(content.as_ref()),
        };
        self.create(ATTACHMENT, &record)
    }

    pub fn attach_buffer(&self, parent_id: &str, name: &str, content: impl AsRef<[u8]>, content_type: &str) -> Reply<Body> {
        self.create_attachment(parent_id, name, content, content_type)
    }

    /// Read `reader` to the end, then store it as an attachment.
    pub async fn attach_stream<R>(&self, parent_id: &str, name: &str, mut reader: R, content_type: &str) -> Result<Body, ApiError>
    where
        R: AsyncRead + Unpin,
    {
        let mut content = Vec::new();
        reader.read_to_end(&mut content).await?;
        self.create_attachment(parent_id, name, content, content_type).await
    }

    /// Attach a local file, named after its file name. Without an explicit
    /// `content_type` one is inferred from the extension.
    pub async fn attach_file(&self, parent_id: &str, path: impl AsRef<Path>, content_type: Option<&str>) -> Result<Body, ApiError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| ApiError::Encode(format!("{} has no usable file name", path.display())))?
            .to_string();
        let content_type = content_type.unwrap_or_else(|| simple_mime(&name)).to_string();
        let file = tokio::fs::File::open(path).await?;
        self.attach_stream(parent_id, &name, file, &content_type).await
    }

    /// Open a binary field as a live stream.
    pub fn blob_stream(&self, object: &str, id: &str, field: &str) -> Reply<BodyStream> {
        let (action, reply) = Action::streamed(HttpMethod::Get, self.url(&["sobjects", object, id, field], &[]));
        let _ = self.inbox.send(action);
        reply
    }

    /// Stream an attachment body annotated with its name, type and size.
    ///
    /// The metadata request is queued immediately; the body request is
    /// queued once the metadata has arrived.
    pub fn attachment_stream(&self, id: &str) -> impl Future<Output = Result<BodyStream, ApiError>> + Send + 'static {
        let metadata = self.fetch(ATTACHMENT, id, &["Name", "ContentType", "BodyLength"]);
        let broker = self.clone();
        let id = id.to_string();
        async move {
            let info = blob_info(metadata.await?)?;
            let stream = broker.blob_stream(ATTACHMENT, &id, "Body").await?;
            Ok(stream.with_info(info))
        }
    }
}

fn encode<V: Serialize + ?Sized>(record: &V) -> Result<Bytes, ApiError> {
    serde_json::to_vec(record)
        .map(Bytes::from)
        .map_err(|e| ApiError::Encode(e.to_string()))
}

/// Path segment for the external id stored under `field`.
fn external_key(record: &Value, field: &str) -> Result<String, ApiError> {
    match record.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::Bool(b)) => Ok(b.to_string()),
        _ => Err(ApiError::Encode(format!("record has no scalar value for {field}"))),
    }
}

fn blob_info(metadata: Body) -> Result<BlobInfo, ApiError> {
    let record = metadata
        .into_json()
        .filter(Value::is_object)
        .ok_or_else(|| ApiError::Decode("no attachment information".into()))?;
    let name = record.get("Name").and_then(Value::as_str).unwrap_or_default().to_string();
    let content_type = record
        .get("ContentType")
        .and_then(Value::as_str)
        .filter(|ct| !ct.is_empty())
        .unwrap_or_else(|| simple_mime(&name))
        .to_string();
    Ok(BlobInfo {
        size: record.get("BodyLength").and_then(Value::as_u64),
        name,
        content_type,
    })
}

#[cfg(test)]
impl Broker {
    /// A broker with no session behind it; tests read the queued actions.
    fn detached(api_version: &str) -> (Self, mpsc::UnboundedReceiver<Action>) {
        let (inbox, rx) = mpsc::unbounded_channel();
        let broker = Broker {
            inbox,
            root: service_root(api_version),
        };
        (broker, rx)
    }
}
