use async_trait::async_trait;
use futures_util::StreamExt;
use k8s_openapi::api::core::v1::Service;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use umbra_controller::{ControllerError, IntentSnapshot, IntentSource, Result};
use umbra_core::{IntentObject, ServiceConnection, WatchEvent};

const EVENT_BUFFER: usize = 1024;

/// Intent source speaking the cluster API's list+watch conventions.
///
/// A GET per kind seeds the snapshot, then two streaming GETs with
/// `watch=true` feed line-delimited JSON events into a single channel.
/// If either stream ends the other is torn down too, closing the channel
/// so the watch hub reports the loss instead of running half-blind.
pub struct HttpIntentSource {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ObjectList<T> {
    #[serde(default)]
    items: Vec<T>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum WireEventType {
    Added,
    Modified,
    Deleted,
}

#[derive(Deserialize)]
struct WireEvent<T> {
    #[serde(rename = "type")]
    event_type: WireEventType,
    object: T,
}

impl HttpIntentSource {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        // Watch responses stay open indefinitely, so no client-side timeout.
        let http = reqwest::Client::builder()
            .build()
            .map_err(|err| ControllerError::cluster_api(format!("Building HTTP client: {err}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn services_url(&self) -> String {
        format!("{}/api/v1/services", self.base_url)
    }

    fn connections_url(&self) -> String {
        format!("{}/apis/umbra.dev/v1/serviceconnections", self.base_url)
    }

    async fn list<T: DeserializeOwned + Default>(&self, url: &str) -> Result<Vec<T>> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| ControllerError::cluster_api(format!("GET {url} failed: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ControllerError::cluster_api(format!(
                "GET {url} returned {status}: {body}"
            )));
        }
        let list: ObjectList<T> = response.json().await.map_err(|err| {
            ControllerError::cluster_api(format!("GET {url} returned an unreadable body: {err}"))
        })?;
        Ok(list.items)
    }

    async fn open_watch(&self, url: &str) -> Result<reqwest::Response> {
        let response = self
            .http
            .get(url)
            .query(&[("watch", "true")])
            .send()
            .await
            .map_err(|err| ControllerError::cluster_api(format!("GET {url} failed: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ControllerError::cluster_api(format!(
                "Watch on {url} refused with {status}: {body}"
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl IntentSource for HttpIntentSource {
    async fn subscribe(&self) -> Result<(IntentSnapshot, mpsc::Receiver<WatchEvent>)> {
        let services: Vec<Service> = self.list(&self.services_url()).await?;
        let connections: Vec<ServiceConnection> = self.list(&self.connections_url()).await?;
        let snapshot = IntentSnapshot {
            services,
            connections,
        };

        let service_watch = self.open_watch(&self.services_url()).await?;
        let connection_watch = self.open_watch(&self.connections_url()).await?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let mut services_pump = tokio::spawn(pump_events::<Service, _>(
            service_watch,
            tx.clone(),
            IntentObject::Service,
        ));
        let mut connections_pump = tokio::spawn(pump_events::<ServiceConnection, _>(
            connection_watch,
            tx,
            IntentObject::Connection,
        ));
        tokio::spawn(async move {
            // A half-dead source is worse than a dead one.
            tokio::select! {
                _ = &mut services_pump => connections_pump.abort(),
                _ = &mut connections_pump => services_pump.abort(),
            }
        });

        Ok((snapshot, rx))
    }
}

async fn pump_events<T, F>(response: reqwest::Response, tx: mpsc::Sender<WatchEvent>, wrap: F)
where
    T: DeserializeOwned,
    F: Fn(T) -> IntentObject,
{
    let url = response.url().clone();
    let mut stream = response.bytes_stream();
    let mut buffer = LineBuffer::new();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                warn!("Watch stream on {url} failed: {err}");
                return;
            }
        };
        buffer.push(&chunk);
        while let Some(line) = buffer.next_line() {
            if line.is_empty() {
                continue;
            }
            let event: WireEvent<T> = match serde_json::from_slice(&line) {
                Ok(event) => event,
                Err(err) => {
                    warn!("Skipping undecodable watch line from {url}: {err}");
                    continue;
                }
            };
            let event = to_watch_event(event.event_type, wrap(event.object));
            if tx.send(event).await.is_err() {
                return;
            }
        }
    }
    debug!("Watch stream on {url} ended");
}

fn to_watch_event(event_type: WireEventType, object: IntentObject) -> WatchEvent {
    match event_type {
        WireEventType::Added => WatchEvent::added(object),
        WireEventType::Modified => WatchEvent::updated(object),
        WireEventType::Deleted => WatchEvent::deleted(object),
    }
}

/// Reassembles newline-delimited frames from an arbitrarily chunked byte
/// stream.
struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    fn next_line(&mut self) -> Option<Vec<u8>> {
        let end = self.buffer.iter().position(|byte| *byte == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=end).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_core::EventKind;

    #[test]
    fn line_buffer_reassembles_split_frames() {
        let mut buffer = LineBuffer::new();
        buffer.push(b"{\"a\":");
        assert!(buffer.next_line().is_none());

        buffer.push(b"1}\r\n{\"b\":2}\n\n{");
        assert_eq!(buffer.next_line().as_deref(), Some(&b"{\"a\":1}"[..]));
        assert_eq!(buffer.next_line().as_deref(), Some(&b"{\"b\":2}"[..]));
        assert_eq!(buffer.next_line().as_deref(), Some(&b""[..]));
        assert!(buffer.next_line().is_none());

        buffer.push(b"\"c\":3}\n");
        assert_eq!(buffer.next_line().as_deref(), Some(&b"{\"c\":3}"[..]));
    }

    #[test]
    fn wire_events_decode_and_map() {
        let line = br#"{"type":"MODIFIED","object":{"metadata":{"name":"web","namespace":"prod"}}}"#;
        let event: WireEvent<Service> = serde_json::from_slice(line).unwrap();
        let mapped = to_watch_event(event.event_type, IntentObject::Service(event.object));
        assert_eq!(mapped.kind, EventKind::Updated);
        assert_eq!(mapped.key().unwrap().to_string(), "prod/web");

        // Unknown event types fail decoding and get skipped by the pump.
        let bookmark = br#"{"type":"BOOKMARK","object":{}}"#;
        assert!(serde_json::from_slice::<WireEvent<Service>>(bookmark).is_err());
    }

    #[test]
    fn lists_tolerate_missing_items() {
        let empty: ObjectList<Service> = serde_json::from_str("{}").unwrap();
        assert!(empty.items.is_empty());

        let listed: ObjectList<ServiceConnection> = serde_json::from_str(
            r#"{"apiVersion":"umbra.dev/v1","items":[{"metadata":{"name":"conn1"}}]}"#,
        )
        .unwrap();
        assert_eq!(listed.items.len(), 1);
    }

    #[test]
    fn urls_follow_cluster_api_conventions() {
        let source = HttpIntentSource::new("http://localhost:8080/").unwrap();
        assert_eq!(source.services_url(), "http://localhost:8080/api/v1/services");
        assert_eq!(
            source.connections_url(),
            "http://localhost:8080/apis/umbra.dev/v1/serviceconnections"
        );
    }
}
