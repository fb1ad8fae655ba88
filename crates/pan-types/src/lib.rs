//! # pan-types
//!
//! Shared domain types for a PAN node: identifiers, the wire frame shape,
//! and the error taxonomy every component agrees on. This is the single
//! source of truth for the types crossing component boundaries, following
//! the same "shared domain types live in their own crate" split the rest
//! of the workspace uses.

pub mod errors;
pub mod frame;
pub mod ids;

pub use errors::{IdentityError, TokenDecodeError, TrustConfigError};
pub use frame::{Endpoint, Frame, FrameType, EXTENDED_GROUP_ID_LEN, GROUP_ID_LEN, MAX_FRAME_BYTES, MSG_TYPE_MAX_LEN};
pub use ids::{ConnId, MsgId, NodeId, PAN_NAMESPACE};
