pub mod handlers;
pub mod rpc;
pub mod server;
pub mod sessions;

pub use handlers::HandlerState;
pub use server::{start, ServerConfig, ServerHandle};
pub use sessions::{SessionManager, SessionSlot};
