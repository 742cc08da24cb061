pub mod config;
pub mod error;
pub mod message;
pub mod session;

pub use config::SessionConfig;
pub use error::RpcError;
pub use message::{
    ErrorCode, ErrorResponse, Message, Notification, Request, RequestId, Response, ResponseError,
};
pub use session::{CANCEL_METHOD, Outbound, RpcSession, Subscription};
