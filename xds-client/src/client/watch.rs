//! Resource watcher types.

use futures::channel::{mpsc, oneshot};
use futures::StreamExt;

use crate::client::worker::{WatcherId, WorkerCommand};
use crate::error::Error;
use crate::resource::{DecodedResource, Resource};

/// A handle the worker holds alongside a dispatched [`ResourceEvent::ResourceChanged`]
/// so it knows when the watcher has finished processing the resource. The
/// worker awaits every outstanding `ProcessingDone` before ACKing a response,
/// giving the watcher backpressure over how fast new resources arrive.
#[derive(Debug)]
pub struct ProcessingDone(oneshot::Sender<()>);

impl ProcessingDone {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), rx)
    }

    /// Signal that this resource has been fully processed.
    pub fn signal(self) {
        let _ = self.0.send(());
    }
}

/// Events delivered to resource watchers.
#[derive(Debug)]
pub enum ResourceEvent<T> {
    /// A new version of the resource is available.
    ResourceChanged {
        /// The decoded, validated resource.
        resource: std::sync::Arc<T>,
        /// Signal handle; drop or call [`ProcessingDone::signal`] once this
        /// event has been acted upon.
        done: ProcessingDone,
    },
    /// An error occurred while trying to fetch or decode this resource.
    /// The previous version of the resource, if any, should no longer be
    /// considered valid for types where `ALL_RESOURCES_REQUIRED_IN_SOTW` is
    /// true.
    ResourceError {
        /// The decode or validation error.
        error: Error,
        done: ProcessingDone,
    },
    /// An ambient error occurred (e.g. a transient stream error) that does
    /// not invalidate the previously delivered resource.
    AmbientError(Error),
}

/// A watcher for resources of type `T`.
///
/// Call [`next()`](Self::next) to receive resource events. Dropping the
/// watcher unsubscribes from the resource.
#[derive(Debug)]
pub struct ResourceWatcher<T: Resource> {
    watcher_id: WatcherId,
    command_tx: mpsc::UnboundedSender<WorkerCommand>,
    event_rx: mpsc::Receiver<ResourceEvent<DecodedResource>>,
    _marker: std::marker::PhantomData<T>,
}

impl<T: Resource> ResourceWatcher<T> {
    pub(crate) fn new(
        watcher_id: WatcherId,
        command_tx: mpsc::UnboundedSender<WorkerCommand>,
        event_rx: mpsc::Receiver<ResourceEvent<DecodedResource>>,
    ) -> Self {
        Self {
            watcher_id,
            command_tx,
            event_rx,
            _marker: std::marker::PhantomData,
        }
    }

    /// Returns the next resource event.
    ///
    /// Returns `None` when the subscription is closed (the worker shut down).
    pub async fn next(&mut self) -> Option<ResourceEvent<T>> {
        let event = self.event_rx.next().await?;
        Some(match event {
            ResourceEvent::ResourceChanged { resource, done } => {
                match resource.downcast::<T>() {
                    Some(typed) => ResourceEvent::ResourceChanged { resource: typed, done },
                    None => ResourceEvent::AmbientError(Error::Validation(
                        "decoded resource type mismatch".to_string(),
                    )),
                }
            }
            ResourceEvent::ResourceError { error, done } => ResourceEvent::ResourceError { error, done },
            ResourceEvent::AmbientError(error) => ResourceEvent::AmbientError(error),
        })
    }
}

impl<T: Resource> Drop for ResourceWatcher<T> {
    fn drop(&mut self) {
        let _ = self.command_tx.unbounded_send(WorkerCommand::Unwatch {
            watcher_id: self.watcher_id,
        });
    }
}
