//! Relay wire protocol: event kinds, the signed event object, and frame codec (§4.3, §6).

pub mod codec;
pub mod event;
pub mod kinds;

pub use codec::{parse_frame, serialize_close, serialize_event, serialize_req, validate_subscription_id, Frame};
pub use event::{sign_event, EventData};

pub use crate::constants::MAX_SUBSCRIPTION_ID_LENGTH;
