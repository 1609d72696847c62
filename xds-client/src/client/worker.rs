//! ADS worker that manages the xDS stream.
//!
//! The worker runs as a background task, managing:
//! - The ADS stream lifecycle (connection, reconnection, server fallback)
//! - Resource subscriptions and version/nonce tracking
//! - Dispatching resources to watchers
//! - ACK/NACK protocol

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::channel::{mpsc, oneshot};
use futures::{FutureExt, SinkExt, StreamExt};
use uuid::Uuid;

use crate::client::config::ServerConfig;
use crate::client::retry::{Backoff, RetryPolicy};
use crate::client::watch::{ProcessingDone, ResourceEvent};
use crate::codec::XdsCodec;
use crate::error::{Error, Result};
use crate::message::{DiscoveryRequest, DiscoveryResponse, ErrorDetail, Node};
use crate::resource::{DecodeResult, DecodedResource, DecoderFn};
use crate::runtime::Runtime;
use crate::transport::{Transport, TransportBuilder, TransportStream};

/// Unique identifier for a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatcherId(Uuid);

impl WatcherId {
    /// Create a new unique watcher ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WatcherId {
    fn default() -> Self {
        Self::new()
    }
}

/// Commands sent from `XdsClient` to the worker.
pub(crate) enum WorkerCommand {
    /// Subscribe to a resource.
    Watch {
        type_url: &'static str,
        name: String,
        watcher_id: WatcherId,
        event_tx: mpsc::Sender<ResourceEvent<DecodedResource>>,
        decoder: DecoderFn,
    },
    /// Unsubscribe a watcher.
    Unwatch { watcher_id: WatcherId },
}

/// Mutually exclusive subscription states for one resource type.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SubscriptionMode {
    /// Receive all resources of this type (empty `resource_names` on the wire).
    Wildcard,
    /// Receive only specific resources by name.
    Named(HashSet<String>),
}

impl SubscriptionMode {
    fn resource_names_for_request(&self) -> Vec<String> {
        match self {
            Self::Wildcard => Vec::new(),
            Self::Named(names) => {
                let mut names: Vec<String> = names.iter().cloned().collect();
                names.sort();
                names
            }
        }
    }
}

/// Per-type_url state tracking.
struct TypeState {
    decoder: DecoderFn,
    version_info: String,
    nonce: String,
    watchers: HashMap<WatcherId, WatcherEntry>,
    subscription: SubscriptionMode,
}

impl std::fmt::Debug for TypeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeState")
            .field("decoder", &"<decoder fn>")
            .field("version_info", &self.version_info)
            .field("nonce", &self.nonce)
            .field("watchers", &self.watchers)
            .field("subscription", &self.subscription)
            .finish()
    }
}

impl TypeState {
    fn new(decoder: DecoderFn) -> Self {
        Self {
            decoder,
            version_info: String::new(),
            nonce: String::new(),
            watchers: HashMap::new(),
            subscription: SubscriptionMode::Named(HashSet::new()),
        }
    }

    /// Recalculate subscription mode from watchers. Idempotent: calling this
    /// twice with the same watcher set produces an equal `subscription`.
    fn recalculate_subscriptions(&mut self) {
        let has_wildcard = self.watchers.values().any(|entry| entry.name.is_empty());
        self.subscription = if has_wildcard {
            SubscriptionMode::Wildcard
        } else {
            SubscriptionMode::Named(self.watchers.values().map(|e| e.name.clone()).collect())
        };
    }

    fn resource_names_for_request(&self) -> Vec<String> {
        self.subscription.resource_names_for_request()
    }
}

/// Per-watcher state.
#[derive(Debug)]
struct WatcherEntry {
    event_tx: mpsc::Sender<ResourceEvent<DecodedResource>>,
    /// Resource name this watcher subscribed to (empty = wildcard).
    name: String,
}

/// Configuration for the worker's reconnect backoff.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    /// Caps reconnect attempts (§4.1 "retries are capped at maxRetries
    /// (default 10); exceeding it is fatal"). `None` retries indefinitely.
    pub max_attempts: Option<usize>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            max_attempts: Some(10),
        }
    }
}

impl WorkerConfig {
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.initial_backoff, self.max_backoff, self.backoff_multiplier)
            .expect("worker config's backoff bounds were already validated as a RetryPolicy")
            .with_max_attempts(self.max_attempts)
    }
}

/// The ADS worker manages the xDS stream and dispatches resources to watchers.
pub(crate) struct AdsWorker<B, C, R> {
    transport_builder: B,
    /// Priority-ordered management servers (gRFC A71 fallback).
    servers: Vec<ServerConfig>,
    codec: C,
    runtime: R,
    node: Option<Node>,
    config: WorkerConfig,

    command_rx: mpsc::UnboundedReceiver<WorkerCommand>,
    type_states: HashMap<String, TypeState>,

    backoff: Backoff,
}

impl<B, C, R> AdsWorker<B, C, R>
where
    B: TransportBuilder,
    C: XdsCodec,
    R: Runtime,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        transport_builder: B,
        servers: Vec<ServerConfig>,
        codec: C,
        runtime: R,
        node: Option<Node>,
        config: WorkerConfig,
        command_rx: mpsc::UnboundedReceiver<WorkerCommand>,
    ) -> Self {
        Self {
            transport_builder,
            servers,
            codec,
            runtime,
            node,
            backoff: Backoff::new(config.retry_policy()),
            config,
            command_rx,
            type_states: HashMap::new(),
        }
    }

    /// Run the worker event loop until all `XdsClient` handles are dropped.
    pub(crate) async fn run(mut self) {
        loop {
            // Wait for at least one subscription before connecting: some xDS
            // servers never send response headers until they receive a
            // request, so connecting with nothing to say would deadlock.
            while self.type_states.is_empty() {
                match self.command_rx.next().await {
                    Some(cmd) => self.handle_command_disconnected(cmd),
                    None => return,
                }
            }

            for type_state in self.type_states.values_mut() {
                type_state.nonce.clear();
            }

            let stream = match self.connect().await {
                Some(stream) => {
                    self.backoff.reset();
                    stream
                }
                None => {
                    match self.backoff.next_backoff() {
                        Some(duration) => {
                            self.runtime.sleep(duration).await;
                            continue;
                        }
                        None => {
                            tracing::error!("exceeded max reconnect attempts, shutting down xDS worker");
                            self.fail_all_watchers(Error::Connection(
                                "exceeded max reconnect attempts".into(),
                            ))
                            .await;
                            return;
                        }
                    }
                }
            };

            if self.run_connected(stream).await {
                return; // shutdown
            }
            // else: reconnect
        }
    }

    /// Walk the priority-ordered server list once, trying each in turn. A
    /// failure on server `i` does not reset the backoff clock for server
    /// `i`; the clock only advances once every server in the list has been
    /// tried and failed.
    async fn connect(&self) -> Option<<B::Transport as Transport>::Stream> {
        let initial_requests = self.build_initial_requests();
        for server in &self.servers {
            match self.transport_builder.build(server).await {
                Ok(transport) => match transport.new_stream(initial_requests.clone()).await {
                    Ok(stream) => return Some(stream),
                    Err(e) => tracing::warn!(server = %server.uri, error = %e, "failed to open ADS stream"),
                },
                Err(e) => tracing::warn!(server = %server.uri, error = %e, "failed to connect to management server"),
            }
        }
        None
    }

    fn build_initial_requests(&self) -> Vec<Bytes> {
        let mut requests = Vec::new();
        for (type_url, type_state) in &self.type_states {
            if type_state.watchers.is_empty() {
                continue;
            }
            let request = DiscoveryRequest {
                node: self.node.clone(),
                type_url: type_url.clone(),
                resource_names: type_state.resource_names_for_request(),
                version_info: type_state.version_info.clone(),
                response_nonce: String::new(),
                error_detail: None,
            };
            if let Ok(bytes) = self.codec.encode_request(&request) {
                requests.push(bytes);
            }
        }
        requests
    }

    fn handle_command_disconnected(&mut self, cmd: WorkerCommand) {
        match cmd {
            WorkerCommand::Watch {
                type_url,
                name,
                watcher_id,
                event_tx,
                decoder,
            } => {
                self.add_watcher(type_url, name, watcher_id, event_tx, decoder);
            }
            WorkerCommand::Unwatch { watcher_id } => {
                self.remove_watcher(watcher_id);
            }
        }
    }

    /// Returns `true` if the worker should shut down, `false` to reconnect.
    async fn run_connected<S: TransportStream>(&mut self, mut stream: S) -> bool {
        loop {
            futures::select! {
                result = stream.recv().fuse() => {
                    match result {
                        Ok(Some(bytes)) => {
                            if self.handle_response(&mut stream, bytes).await.is_err() {
                                return false;
                            }
                        }
                        Ok(None) => return false,
                        Err(e) => {
                            tracing::warn!(error = %e, "ADS stream error");
                            return false;
                        }
                    }
                }
                cmd = self.command_rx.next() => {
                    match cmd {
                        Some(cmd) => {
                            if self.handle_command(&mut stream, cmd).await.is_err() {
                                return false;
                            }
                        }
                        None => return true,
                    }
                }
            }
        }
    }

    async fn handle_command<S: TransportStream>(&mut self, stream: &mut S, cmd: WorkerCommand) -> Result<()> {
        match cmd {
            WorkerCommand::Watch {
                type_url,
                name,
                watcher_id,
                event_tx,
                decoder,
            } => {
                self.handle_watch(stream, type_url, name, watcher_id, event_tx, decoder).await
            }
            WorkerCommand::Unwatch { watcher_id } => self.handle_unwatch(stream, watcher_id).await,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_watch<S: TransportStream>(
        &mut self,
        stream: &mut S,
        type_url: &'static str,
        name: String,
        watcher_id: WatcherId,
        event_tx: mpsc::Sender<ResourceEvent<DecodedResource>>,
        decoder: DecoderFn,
    ) -> Result<()> {
        let type_url_string = type_url.to_string();
        let is_new_type = !self.type_states.contains_key(&type_url_string);
        let subscriptions_changed = self.add_watcher(type_url, name, watcher_id, event_tx, decoder);

        if is_new_type || subscriptions_changed {
            self.send_request(stream, &type_url_string).await?;
        }
        Ok(())
    }

    async fn handle_unwatch<S: TransportStream>(&mut self, stream: &mut S, watcher_id: WatcherId) -> Result<()> {
        if let Some((type_url, subscriptions_changed)) = self.remove_watcher(watcher_id) {
            if subscriptions_changed {
                self.send_request(stream, &type_url).await?;
            }
        }
        Ok(())
    }

    /// Returns true if subscriptions changed (need to send a new request).
    /// Idempotent: calling with the same watcher set twice returns false the
    /// second time, per `UpdateSubscriptions`'s idempotency requirement.
    fn add_watcher(
        &mut self,
        type_url: &'static str,
        name: String,
        watcher_id: WatcherId,
        event_tx: mpsc::Sender<ResourceEvent<DecodedResource>>,
        decoder: DecoderFn,
    ) -> bool {
        let type_state = self
            .type_states
            .entry(type_url.to_string())
            .or_insert_with(|| TypeState::new(decoder));

        let old_subscription = type_state.subscription.clone();
        type_state.watchers.insert(watcher_id, WatcherEntry { event_tx, name });
        type_state.recalculate_subscriptions();
        type_state.subscription != old_subscription
    }

    fn remove_watcher(&mut self, watcher_id: WatcherId) -> Option<(String, bool)> {
        let type_url = self
            .type_states
            .iter()
            .find(|(_, state)| state.watchers.contains_key(&watcher_id))
            .map(|(url, _)| url.clone())?;

        let type_state = self.type_states.get_mut(&type_url)?;
        let old_subscription = type_state.subscription.clone();
        type_state.watchers.remove(&watcher_id);
        type_state.recalculate_subscriptions();
        let subscriptions_changed = type_state.subscription != old_subscription;

        if type_state.watchers.is_empty() {
            self.type_states.remove(&type_url);
        }
        Some((type_url, subscriptions_changed))
    }

    async fn send_request<S: TransportStream>(&self, stream: &mut S, type_url: &str) -> Result<()> {
        let Some(type_state) = self.type_states.get(type_url) else {
            return Ok(());
        };
        let request = DiscoveryRequest {
            node: self.node.clone(),
            type_url: type_url.to_string(),
            resource_names: type_state.resource_names_for_request(),
            version_info: type_state.version_info.clone(),
            response_nonce: type_state.nonce.clone(),
            error_detail: None,
        };
        let bytes = self.codec.encode_request(&request)?;
        stream.send(bytes).await
    }

    async fn handle_response<S: TransportStream>(&mut self, stream: &mut S, bytes: Bytes) -> Result<()> {
        let response = self.codec.decode_response(bytes)?;
        let type_url = response.type_url.clone();

        let Some(type_state) = self.type_states.get(&type_url) else {
            return Ok(());
        };

        let mut decoded_resources = Vec::new();
        let mut decode_errors = Vec::new();
        for resource_any in &response.resources {
            match (type_state.decoder)(resource_any.value.clone()) {
                DecodeResult::Success { resource, .. } => decoded_resources.push(resource),
                DecodeResult::ResourceError { name, error } => {
                    decode_errors.push(format!("{name}: {error}"));
                }
                DecodeResult::TopLevelError(error) => decode_errors.push(error.to_string()),
            }
        }

        if let Some(ts) = self.type_states.get_mut(&type_url) {
            ts.nonce = response.nonce.clone();
        }

        if !decode_errors.is_empty() {
            let message = decode_errors.join("; ");
            self.send_nack(stream, &response, message.clone()).await?;
            self.notify_watchers_error(&type_url, Error::Validation(message)).await;
            return Ok(());
        }

        let processing_done_futures = self.dispatch_resources(&type_url, decoded_resources).await;
        for rx in processing_done_futures {
            let _ = rx.await;
        }

        if let Some(ts) = self.type_states.get_mut(&type_url) {
            ts.version_info = response.version_info.clone();
        }

        self.send_ack(stream, &response).await
    }

    /// Dispatch decoded resources to watchers, returning futures that
    /// resolve once each watcher signals [`ProcessingDone`].
    async fn dispatch_resources(&mut self, type_url: &str, resources: Vec<DecodedResource>) -> Vec<oneshot::Receiver<()>> {
        let mut processing_done_futures = Vec::new();

        let Some(type_state) = self.type_states.get(type_url) else {
            return processing_done_futures;
        };
        let watcher_info: Vec<_> = type_state
            .watchers
            .values()
            .map(|entry| (entry.event_tx.clone(), entry.name.clone()))
            .collect();

        for resource in resources {
            let resource_name = resource.name().to_string();
            let resource = Arc::new(resource);

            for (mut event_tx, watcher_name) in watcher_info.clone() {
                if watcher_name.is_empty() || watcher_name == resource_name {
                    let (done, rx) = ProcessingDone::channel();
                    let event = ResourceEvent::ResourceChanged { resource: Arc::clone(&resource), done };
                    let _ = event_tx.send(event).await;
                    processing_done_futures.push(rx);
                }
            }
        }
        processing_done_futures
    }

    /// Notifies every watcher of every subscribed type that the worker is
    /// shutting down, e.g. after exhausting the reconnect backoff's
    /// `max_attempts` (§4.1).
    async fn fail_all_watchers(&mut self, error: Error) {
        let type_urls: Vec<String> = self.type_states.keys().cloned().collect();
        for type_url in type_urls {
            self.notify_watchers_error(&type_url, Error::Connection(error.to_string())).await;
        }
    }

    async fn notify_watchers_error(&mut self, type_url: &str, error: Error) {
        let Some(type_state) = self.type_states.get(type_url) else {
            return;
        };
        let senders: Vec<_> = type_state.watchers.values().map(|e| e.event_tx.clone()).collect();

        for mut event_tx in senders {
            let (done, _rx) = ProcessingDone::channel();
            let event = ResourceEvent::ResourceError { error: Error::Validation(error.to_string()), done };
            let _ = event_tx.send(event).await;
        }
    }

    async fn send_ack<S: TransportStream>(&self, stream: &mut S, response: &DiscoveryResponse) -> Result<()> {
        let Some(type_state) = self.type_states.get(&response.type_url) else {
            return Ok(());
        };
        let request = DiscoveryRequest {
            node: None, // node is only sent on the first request of a stream
            type_url: response.type_url.clone(),
            resource_names: type_state.resource_names_for_request(),
            version_info: response.version_info.clone(),
            response_nonce: response.nonce.clone(),
            error_detail: None,
        };
        let bytes = self.codec.encode_request(&request)?;
        stream.send(bytes).await
    }

    async fn send_nack<S: TransportStream>(&self, stream: &mut S, response: &DiscoveryResponse, error_message: String) -> Result<()> {
        let Some(type_state) = self.type_states.get(&response.type_url) else {
            return Ok(());
        };
        let request = DiscoveryRequest {
            node: None,
            type_url: response.type_url.clone(),
            resource_names: type_state.resource_names_for_request(),
            version_info: type_state.version_info.clone(), // keep last-acked version on NACK
            response_nonce: response.nonce.clone(),
            error_detail: Some(ErrorDetail { code: 3, message: error_message }),
        };
        let bytes = self.codec.encode_request(&request)?;
        stream.send(bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::prost::ProstCodec;
    use crate::resource::decode_fn;
    use crate::runtime::tokio::TokioRuntime;
    use crate::transport::test_support::{mock_transport, MockTransportBuilder};
    use envoy_types::pb::envoy::service::discovery::v3 as discovery;
    use prost::Message;

    /// A no-op resource type for exercising subscription bookkeeping without
    /// needing a real envoy-types message.
    struct TestResource(String);

    impl crate::resource::Resource for TestResource {
        type Message = String;

        const TYPE_URL: crate::resource::TypeUrl =
            crate::resource::TypeUrl::new("type.googleapis.com/test.Resource");

        fn deserialize(bytes: Bytes) -> Result<Self::Message> {
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }

        fn name(message: &Self::Message) -> &str {
            message
        }

        fn validate(message: Self::Message) -> Result<Self> {
            Ok(Self(message))
        }
    }

    fn new_worker() -> (AdsWorker<MockTransportBuilder, ProstCodec, TokioRuntime>, mpsc::UnboundedSender<WorkerCommand>) {
        let (transport_builder, _response_tx, _sent) = mock_transport();
        let (command_tx, command_rx) = mpsc::unbounded();
        let worker = AdsWorker::new(
            transport_builder,
            vec![ServerConfig::new("http://127.0.0.1:0")],
            ProstCodec,
            TokioRuntime,
            None,
            WorkerConfig::default(),
            command_rx,
        );
        (worker, command_tx)
    }

    fn watch_channel() -> (mpsc::Sender<ResourceEvent<DecodedResource>>, mpsc::Receiver<ResourceEvent<DecodedResource>>) {
        mpsc::channel(4)
    }

    #[test]
    fn add_watcher_is_idempotent() {
        let (mut worker, _command_tx) = new_worker();
        let id = WatcherId::new();
        let (event_tx, _event_rx) = watch_channel();

        let changed = worker.add_watcher(
            TestResource::TYPE_URL.as_str(),
            "res-1".to_string(),
            id,
            event_tx.clone(),
            decode_fn::<TestResource>(),
        );
        assert!(changed, "first registration must report a subscription change");

        let changed_again = worker.add_watcher(
            TestResource::TYPE_URL.as_str(),
            "res-1".to_string(),
            id,
            event_tx,
            decode_fn::<TestResource>(),
        );
        assert!(!changed_again, "re-registering the same watcher must be a no-op");
    }

    #[test]
    fn remove_watcher_only_reports_change_when_set_shrinks() {
        let (mut worker, _command_tx) = new_worker();
        let id_a = WatcherId::new();
        let id_b = WatcherId::new();
        let (event_tx, _event_rx) = watch_channel();

        worker.add_watcher(
            TestResource::TYPE_URL.as_str(),
            "res-1".to_string(),
            id_a,
            event_tx.clone(),
            decode_fn::<TestResource>(),
        );
        worker.add_watcher(
            TestResource::TYPE_URL.as_str(),
            "res-1".to_string(),
            id_b,
            event_tx,
            decode_fn::<TestResource>(),
        );

        // Two watchers on the same name: removing one leaves the subscribed
        // name set unchanged, so no new request should be needed.
        let (type_url, changed) = worker.remove_watcher(id_a).expect("watcher was registered");
        assert_eq!(type_url, TestResource::TYPE_URL.as_str());
        assert!(!changed);

        let (_type_url, changed) = worker.remove_watcher(id_b).expect("watcher was registered");
        assert!(changed, "removing the last watcher for a name must change the subscription");
    }

    #[test]
    fn wildcard_subscription_sends_no_resource_names() {
        let mut state = TypeState::new(decode_fn::<TestResource>());
        state.watchers.insert(
            WatcherId::new(),
            WatcherEntry { event_tx: watch_channel().0, name: String::new() },
        );
        state.recalculate_subscriptions();

        assert_eq!(state.subscription, SubscriptionMode::Wildcard);
        assert!(state.resource_names_for_request().is_empty());
    }

    #[test]
    fn named_subscription_sorts_resource_names() {
        let mode = SubscriptionMode::Named(["b", "a", "c"].iter().map(|s| s.to_string()).collect());
        assert_eq!(
            mode.resource_names_for_request(),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
    }

    #[tokio::test]
    async fn nack_retains_last_acked_version_and_echoes_new_nonce() {
        let (transport_builder, _response_tx, sent) = mock_transport();
        let (_command_tx, command_rx) = mpsc::unbounded();
        let mut worker = AdsWorker::new(
            transport_builder,
            vec![ServerConfig::new("http://127.0.0.1:0")],
            ProstCodec,
            TokioRuntime,
            None,
            WorkerConfig::default(),
            command_rx,
        );

        let (event_tx, _event_rx) = watch_channel();
        worker.add_watcher(
            TestResource::TYPE_URL.as_str(),
            "res-1".to_string(),
            WatcherId::new(),
            event_tx,
            decode_fn::<TestResource>(),
        );
        worker
            .type_states
            .get_mut(TestResource::TYPE_URL.as_str())
            .unwrap()
            .version_info = "1".to_string();

        let mut stream = worker.connect().await.expect("mock transport always connects");

        let response = discovery::DiscoveryResponse {
            version_info: "2".to_string(),
            type_url: TestResource::TYPE_URL.as_str().to_string(),
            nonce: "nonce-2".to_string(),
            ..Default::default()
        };
        let bytes: Bytes = response.encode_to_vec().into();
        let response = worker.codec.decode_response(bytes).unwrap();

        worker.send_nack(&mut stream, &response, "decode failed".to_string()).await.unwrap();

        let sent_requests = sent.lock().unwrap();
        let last = sent_requests.last().expect("nack request was sent");
        let decoded = discovery::DiscoveryRequest::decode(last.clone()).unwrap();

        assert_eq!(decoded.version_info, "1", "NACK must keep the last-acked version");
        assert_eq!(decoded.response_nonce, "nonce-2", "NACK must echo the new nonce");
        assert!(decoded.error_detail.is_some());
    }
}
