//! Console state ownership
//!
//! One [`SessionActor`] task per console owns the protocol session (cache,
//! encoder, decoder). Everything else talks to it through a cloneable
//! [`SessionHandle`].

mod actor;
mod actor_handle;
mod commands;

pub use actor::SessionActor;
pub use actor_handle::SessionHandle;
pub use commands::{QuerySinkFn, SessionCommand, SubscriberFn};
