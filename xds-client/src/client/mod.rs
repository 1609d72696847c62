//! Client interface through which the user can watch and receive updates for xDS resources.

use futures::channel::mpsc;

use crate::client::config::ClientConfig;
use crate::client::watch::ResourceWatcher;
use crate::client::worker::{AdsWorker, WatcherId, WorkerCommand, WorkerConfig};
use crate::codec::XdsCodec;
use crate::error::{Error, Result};
use crate::resource::{decode_fn, Resource};
use crate::runtime::Runtime;
use crate::transport::TransportBuilder;

pub mod config;
pub mod retry;
pub mod watch;
mod worker;

/// Capacity of the per-watcher resource-event channel. Bounded so a slow
/// watcher applies backpressure to the ADS worker (see
/// [`ProcessingDone`](watch::ProcessingDone)) rather than buffering without limit.
const WATCHER_CHANNEL_CAPACITY: usize = 16;

/// Builder for [`XdsClient`].
#[derive(Debug)]
pub struct XdsClientBuilder {
    config: ClientConfig,
}

impl XdsClientBuilder {
    /// Create a new builder with the given configuration.
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Build the client with the given transport builder, codec and runtime.
    ///
    /// This starts the background worker that manages the ADS stream. The
    /// worker does not dial any server until the first `watch` call
    /// registers a subscription.
    pub fn build<B, C, R>(self, transport_builder: B, codec: C, runtime: R) -> Result<XdsClient>
    where
        B: TransportBuilder + 'static,
        C: XdsCodec,
        R: Runtime,
    {
        if self.config.servers.is_empty() {
            return Err(Error::InvalidConfig("at least one server is required".into()));
        }

        let node = crate::message::Node {
            id: self.config.node.id.clone(),
            cluster: self.config.node.cluster.clone(),
            locality: self.config.node.locality.clone(),
            user_agent_name: self.config.node.user_agent_name.clone(),
            user_agent_version: self.config.node.user_agent_version.clone(),
        };

        let (command_tx, command_rx) = mpsc::unbounded();

        let worker_config = WorkerConfig {
            initial_backoff: self.config.retry_policy.initial_backoff,
            max_backoff: self.config.retry_policy.max_backoff,
            backoff_multiplier: self.config.retry_policy.backoff_multiplier,
            max_attempts: self.config.retry_policy.max_attempts,
        };

        let worker = AdsWorker::new(
            transport_builder,
            self.config.servers.clone(),
            codec,
            runtime.clone(),
            Some(node),
            worker_config,
            command_rx,
        );

        runtime.spawn(worker.run());

        Ok(XdsClient { command_tx })
    }
}

/// The xDS client.
///
/// This is a handle to the background worker that manages the ADS stream.
/// Cloning this handle creates a new reference to the same worker; the
/// worker is torn down once every clone and every [`ResourceWatcher`] it
/// produced has been dropped.
#[derive(Clone, Debug)]
pub struct XdsClient {
    command_tx: mpsc::UnboundedSender<WorkerCommand>,
}

impl XdsClient {
    /// Create a new builder.
    pub fn builder(config: ClientConfig) -> XdsClientBuilder {
        XdsClientBuilder::new(config)
    }

    /// Watch a resource by name.
    ///
    /// Returns a [`ResourceWatcher`] that receives events for this resource.
    /// Dropping the watcher automatically unsubscribes. Passing an empty
    /// name subscribes to every resource of type `T` (a wildcard
    /// subscription).
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mut watcher = client.watch::<Listener>("my-listener");
    /// while let Some(event) = watcher.next().await {
    ///     match event {
    ///         ResourceEvent::ResourceChanged { resource, done } => {
    ///             println!("listener updated: {}", resource.name());
    ///             done.signal();
    ///         }
    ///         ResourceEvent::ResourceError { error, done } => {
    ///             println!("error watching listener: {error}");
    ///             done.signal();
    ///         }
    ///         ResourceEvent::AmbientError(error) => {
    ///             println!("ambient error: {error}");
    ///         }
    ///     }
    /// }
    /// ```
    pub fn watch<T: Resource>(&self, name: impl Into<String>) -> ResourceWatcher<T> {
        let watcher_id = WatcherId::new();
        let (event_tx, event_rx) = mpsc::channel(WATCHER_CHANNEL_CAPACITY);

        let _ = self.command_tx.unbounded_send(WorkerCommand::Watch {
            type_url: T::TYPE_URL.as_str(),
            name: name.into(),
            watcher_id,
            event_tx,
            decoder: decode_fn::<T>(),
        });

        ResourceWatcher::new(watcher_id, self.command_tx.clone(), event_rx)
    }
}
