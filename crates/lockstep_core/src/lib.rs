//! Lockstep core
//!
//! Shared types for the lockstep mutual-exclusion protocol: peer identity,
//! Lamport logical clocks, claim ordering, and wall-clock bookkeeping.
//! No async, no I/O.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod error;
pub mod name;
pub mod time;

pub use clock::{Claim, LamportClock};
pub use error::{CoreError, CoreResult};
pub use name::PeerName;
pub use time::Timestamp;
