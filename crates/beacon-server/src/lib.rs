pub mod conn;
pub mod delivery;
pub mod gateway;
pub mod register;
pub mod registry;
pub mod routes;
pub mod server;

pub use conn::{Conn, ConnTracker, Frame};
pub use delivery::{Delivery, DeliveryResult};
pub use gateway::Gateway;
pub use registry::SocketRegistry;
pub use server::{start, AppState, ServerConfig, ServerHandle};
