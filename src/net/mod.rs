// Networking subsystem: STUN, NAT classification, transport abstraction,
// discovery and NAT traversal.

pub mod discovery;
pub mod nat;
pub mod stun;
pub mod traversal;
pub mod transport;

pub use nat::{NatStatus, NatType};
pub use stun::StunClient;
