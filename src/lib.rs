pub mod bridge;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod escalation;
pub mod events;
pub mod frameserver;
pub mod handle;
pub mod monitor;
pub mod registry;
pub mod resources;
pub mod scene;
pub mod script;
pub mod statesnap;
pub mod time;

pub use bridge::Bridge;
pub use config::BridgeConfig;
pub use handle::ObjectHandle;
