//! Shared building blocks for the rscp transfer tools.
//!
//! `attrs` translates between the 4-digit octal permission strings and
//! epoch-second timestamps the scp wire dialect uses and the host
//! filesystem's notion of modes and times. `events` is the observer surface
//! transfer state machines report progress through.

pub mod attrs;
pub mod events;
#[cfg(any(test, feature = "test-util"))]
pub mod testutils;
