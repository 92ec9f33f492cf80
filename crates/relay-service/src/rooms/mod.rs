//! Room state: envelopes, per-room sessions, and the session registry.
//!
//! ```text
//! SessionRegistry (one per process, Arc-shared)
//! └── Mutex<HashMap<room code, Session>>
//!     └── Session
//!         ├── presenter: PeerSlot + pending queue + offer/answer caches
//!         └── viewer:    PeerSlot + pending queue + offer/answer caches
//! ```

pub mod connection;
pub mod envelope;
pub mod registry;
pub mod session;

pub use connection::{OutboundFrame, PeerConnection, DEFAULT_CONNECTION_BUFFER};
pub use envelope::{Envelope, EnvelopeKind, ErrorFrame, Role, SubscribeMessage, Subscription};
pub use registry::{RoomMembership, SessionRegistry};
pub use session::{AttachOutcome, Delivery, PeerSlot, Session, SessionLimits};
