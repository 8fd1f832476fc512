//! Verto JSON-RPC control protocol.
//!
//! Outbound requests are built from the typed payloads in [`send`] and wrapped in a
//! [`SignalingMessage`]. Inbound frames are classified by [`decode_frame`] into either a
//! server-initiated message (carrying a method) or a reply to one of our requests.

mod method;
mod receive;
mod send;

pub use method::{SocketMethod, UnknownMethod};
pub use receive::{
    AnswerResult, ByeResult, GatewayStateResult, Inbound, InviteResult, LoginResult,
    MediaResult, ModifyResult, ProtocolError, ReceivedMessage, RingingResult, RpcError,
    decode_frame,
};
pub use send::{
    AckMessage, AttachCallParams, AttachUserVariables, ByeDialogParams, ByeParams,
    CallDialogParams, CallParams, DisablePushParams, InfoParams, LoginParam,
    LoginUserVariables, ModifyAction, ModifyParams, ParamRequest, SignalingMessage,
    StateParams, TokenDisablePushParams, UserVariables, JSONRPC_VERSION,
};
