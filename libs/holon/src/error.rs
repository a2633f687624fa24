//! Error types for holons and their registry collaborators

use crate::holon::LifecycleState;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, HolonError>;

/// Failures reported by a registry client or agent manager
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Registry unreachable: {0}")]
    Unreachable(String),

    #[error("No such topic '{topic}'")]
    NoSuchTopic { topic: String },

    #[error("'{subscriber}' is already subscribed to topic '{topic}'")]
    AlreadySubscribed { topic: String, subscriber: String },

    #[error("'{subscriber}' is not subscribed to topic '{topic}'")]
    NotSubscribed { topic: String, subscriber: String },

    #[error("Transport error: {0}")]
    Transport(String),
}

impl RegistryError {
    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        RegistryError::Transport(msg.into())
    }

    /// Create an unreachable error
    pub fn unreachable(msg: impl Into<String>) -> Self {
        RegistryError::Unreachable(msg.into())
    }
}

#[derive(Error, Debug)]
pub enum HolonError {
    #[error("Holon '{holon}' is not subscribed to topic '{topic}'")]
    TopicNotFound { holon: String, topic: String },

    #[error("Message {id} not found in mailbox")]
    MessageNotFound { id: Uuid },

    #[error("Holon '{holon}' cannot go from {from:?} to {to:?}")]
    InvalidTransition {
        holon: String,
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("Holon '{holon}' has no registry client")]
    NotRegistered { holon: String },

    #[error("Holon '{holon}' has no message handler to run")]
    HandlerMissing { holon: String },

    #[error("Failed to spawn worker for holon '{holon}': {source}")]
    WorkerSpawn {
        holon: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker of holon '{holon}' panicked")]
    WorkerPanicked { holon: String },

    #[error("Handler error: {0}")]
    Handler(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl HolonError {
    /// Create a handler error
    pub fn handler(msg: impl Into<String>) -> Self {
        HolonError::Handler(msg.into())
    }

    /// Check if this is a lookup failure on a topic or message
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            HolonError::TopicNotFound { .. } | HolonError::MessageNotFound { .. }
        )
    }
}
