//! Bounds shared by every type carried on a topic.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A type that can be published to and observed from a topic.
///
/// Implemented automatically for every serde type that is `Clone`,
/// `Send`, `Sync` and `'static`; each subscriber of a topic receives its
/// own clone of every item.
pub trait TopicMessage: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> TopicMessage for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}
