//! Call signaling: the per-call state machine and the session's call registry.
//!
//! - [`Call`]: one call's attributes and [`CallTransition`] logic
//! - [`SessionRegistry`]: call-id → call map plus the `current`/`previous` call-waiting slots;
//!   turns inbound protocol events into transitions and local actions into outbound frames
//! - [`CallBridge`]: the host's native call UI, called into on incoming calls and state changes

mod error;
mod registry;
mod state;

pub use error::CallError;
pub use registry::{MAX_TRACKED_CALLS, OutboundInvite, OutboundSink, PlacedCall, SessionRegistry};
pub use state::{Call, CallTransition, InvalidTransition};

use vertocore::types::events::CallStateChanged;

/// Host-side telephony integration (e.g. the platform's native call screen).
///
/// The client calls into it; the host answers by calling `accept`/`reject`/`end` on the client.
pub trait CallBridge: Send + Sync {
    /// A new inbound call is ringing.
    fn incoming_call(&self, call: &Call);

    fn report_state_change(&self, change: &CallStateChanged);
}
