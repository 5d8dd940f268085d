use std::fmt::Display;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::trace;

use crate::{
    config::DEFAULT_BAUD,
    frame::{Frame, OutgoingBytes},
    session::SessionState,
};

/// Control messages a subscriber can send to the bridge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    /// Open the given port, closing any open one first.
    Connect {
        /// Something like `/dev/ttyACM0` on unix or `COM3` on Windows.
        port: String,

        /// The baud rate. The server default is used if not given.
        #[serde(
            rename = "baudRate",
            default,
            deserialize_with = "number_or_numeric_string",
            skip_serializing_if = "Option::is_none"
        )]
        baud_rate: Option<u32>,
    },

    /// Close the open port, if any.
    Disconnect {},

    /// Put this on the wire.
    Send {
        /// Written verbatim.
        data: String,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u32),
    String(String),
}

fn number_or_numeric_string<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<NumberOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrString::Number(n)) => Ok(Some(n)),
        Some(NumberOrString::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

impl Display for ControlMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlMessage::Connect { port, baud_rate } => match baud_rate {
                Some(baud) => write!(f, "connect: {port} @ {baud}"),
                None => write!(f, "connect: {port}"),
            },
            ControlMessage::Disconnect {} => write!(f, "disconnect"),
            ControlMessage::Send { data } => {
                write!(f, "send: {}", Frame::from(data))
            }
        }
    }
}

impl ControlMessage {
    /// Create a connect message.
    pub fn connect(port: &str, baud_rate: u32) -> Self {
        Self::Connect {
            port: port.into(),
            baud_rate: Some(baud_rate),
        }
    }

    /// An example of a connect message.
    pub fn example_connect() -> Self {
        Self::connect("COM3", DEFAULT_BAUD)
    }

    /// Create a disconnect message.
    pub fn disconnect() -> Self {
        Self::Disconnect {}
    }

    /// Create a send message.
    pub fn send<S: Into<String>>(data: S) -> Self {
        Self::Send { data: data.into() }
    }

    /// An example of a send message.
    pub fn example_send() -> Self {
        Self::send("LED_ON\n")
    }

    /// Which kind of message this is.
    pub fn kind(&self) -> Kind {
        match self {
            ControlMessage::Connect { .. } => Kind::Connect,
            ControlMessage::Disconnect {} => Kind::Disconnect,
            ControlMessage::Send { .. } => Kind::Send,
        }
    }

    /// Turn a message into serialized json.
    pub fn serialize(&self) -> String {
        serde_json::to_string(self).expect("Should serialize well")
    }
}

/// Anything a subscriber sends, after interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// A recognized control message.
    Control(ControlMessage),

    /// Anything else. Written to the transport as is.
    Passthrough(OutgoingBytes),
}

impl Request {
    /// Interpret a text message.
    ///
    /// Text which is not a control message is not an error,
    /// it is data for the device.
    pub fn from_text(text: &str) -> Self {
        match serde_json::from_str::<ControlMessage>(text) {
            Ok(message) => Self::Control(message),
            Err(e) => {
                trace!(%e, "Not a control message, passing through");
                Self::Passthrough(text.as_bytes().to_vec())
            }
        }
    }

    /// The kind of acknowledgement this request gets.
    pub fn kind(&self) -> Kind {
        match self {
            Request::Control(message) => message.kind(),
            Request::Passthrough(_) => Kind::Send,
        }
    }
}

impl Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Request::Control(message) => write!(f, "{message}"),
            Request::Passthrough(bytes) => write!(f, "passthrough: {}", Frame::new_lossy(bytes)),
        }
    }
}

/// The kinds of control messages, as echoed in acknowledgements.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    /// See [`ControlMessage::Connect`].
    Connect,

    /// See [`ControlMessage::Disconnect`].
    Disconnect,

    /// See [`ControlMessage::Send`].
    Send,
}

/// The reply to every control message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ack {
    /// The kind of message this acknowledges.
    #[serde(rename = "type")]
    pub kind: Kind,

    /// Whether it worked.
    pub success: bool,
}

impl Ack {
    /// Create an acknowledgement.
    pub fn new(kind: Kind, success: bool) -> Self {
        Self { kind, success }
    }

    /// An example of a successful connect acknowledgement.
    pub fn example_connect_ok() -> Self {
        Self::new(Kind::Connect, true)
    }
}

/// Messages the bridge pushes to subscribers on its own initiative.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Notice {
    /// The session changed state without anyone asking.
    Status {
        /// The new state.
        state: SessionState,

        /// The port involved.
        port: String,

        /// Why it happened.
        reason: String,
    },
}

impl Notice {
    /// An example of the notice sent when the device goes away.
    pub fn example_transport_lost() -> Self {
        Self::Status {
            state: SessionState::Closed,
            port: "COM3".into(),
            reason: "Transport I/O problem: Serial port disconnected".into(),
        }
    }
}

/// Anything the bridge sends a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// Acknowledges a control message.
    Ack(Ack),

    /// Unrequested information.
    Notice(Notice),

    /// Device output, delivered without an envelope.
    Frame(Frame),
}

impl Outgoing {
    /// The text put on the socket.
    pub fn into_text(self) -> String {
        match self {
            Outgoing::Ack(ack) => serde_json::to_string(&ack).expect("Should serialize well"),
            Outgoing::Notice(notice) => {
                serde_json::to_string(&notice).expect("Should serialize well")
            }
            Outgoing::Frame(frame) => frame.into_string(),
        }
    }

    /// Interpret text received from the bridge.
    ///
    /// Frames have no envelope, so anything which is not an
    /// acknowledgement or a notice is a frame.
    pub fn from_text(text: &str) -> Self {
        if let Ok(ack) = serde_json::from_str::<Ack>(text) {
            Self::Ack(ack)
        } else if let Ok(notice) = serde_json::from_str::<Notice>(text) {
            Self::Notice(notice)
        } else {
            Self::Frame(Frame::from(text))
        }
    }
}

impl Display for Outgoing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outgoing::Ack(Ack { kind, success }) => write!(f, "ack {kind:?}: {success}"),
            Outgoing::Notice(Notice::Status { state, port, .. }) => {
                write!(f, "status: {port} is {state:?}")
            }
            Outgoing::Frame(frame) => write!(f, "frame: {frame}"),
        }
    }
}
