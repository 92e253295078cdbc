//! Change Source, Change Log Store, Change Streamer Service and Replica
//! Store (spec §4.A-D): the durable, replayable, gap-free log of
//! upstream commits and the single serializer of their order.

pub mod backoff;
pub mod cancellable;
pub mod error;
pub mod log_store;
pub mod replica;
pub mod service;
pub mod source;

pub use backoff::Backoff;
pub use cancellable::{cancel_pair, CancelSignal, CancelToken};
pub use error::{LogStoreError, ReplicaError, SourceError, StreamError};
pub use log_store::{ChangeLogStore, InMemoryLogStore};
pub use replica::{InMemoryReplicaStore, ReplicaStore};
pub use service::{ChangeStreamerService, Commit, CommitStream, SubscribeRequest, SubscriberId};
pub use source::{AckSink, ChangeSource, ChangeStream, InMemoryChangeSource};
