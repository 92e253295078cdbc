mod client_ip;
mod connection;
mod outbound;
mod registry;
mod server;
mod user_agent;

pub use connection::ConnectParams;
pub use registry::ViewSyncerRegistry;
pub use server::WebsocketServer;
pub use user_agent::OptionalUserAgent;
