use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// One chunk of output read from the transport.
///
/// Frames are text: bytes which are not valid UTF-8 are replaced
/// rather than rejected.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Frame(String);

impl Frame {
    /// Create a frame from bytes, replacing any bad utf8 bytes.
    pub fn new_lossy<B: AsRef<[u8]>>(bytes: B) -> Self {
        Self(String::from_utf8_lossy(bytes.as_ref()).into_owned())
    }

    /// Borrowed form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The payload as delivered to subscribers.
    pub fn into_string(self) -> String {
        self.0
    }

    /// Whether there is anything in this frame.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T: AsRef<str>> From<T> for Frame {
    fn from(string_like: T) -> Self {
        Self(string_like.as_ref().into())
    }
}

impl Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.0.chars().take(48).collect::<String>();

        write!(f, "{}", s.trim())
    }
}

/// Raw bytes headed for the transport.
pub type OutgoingBytes = Vec<u8>;
