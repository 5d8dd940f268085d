use std::fmt::Display;
use std::sync::Arc;

use uuid::Uuid;

/// Uniquely identifies a subscriber for the lifetime of the bridge.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A connected viewer.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct Subscriber {
    /// Unique id.
    pub id: SubscriberId,

    /// Where the viewer connected from.
    pub name: Arc<String>,
}

impl Subscriber {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            id: SubscriberId::new(),
            name: Arc::new(name.into()),
        }
    }
}

impl Display for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}
