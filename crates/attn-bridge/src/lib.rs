pub mod error;
pub mod http;
pub mod hub;
pub mod origin_validation;
pub mod ports;
pub mod protocol;
pub mod rpc;
pub mod transcript_path;
pub mod ws_handler;

pub use error::{BridgeError, Result};
pub use hub::{Hub, HubEventSink, HubPrSink};
pub use http::{health_handler, HealthState};
pub use ports::{GitOps, UnconfiguredGitOps, WorktreeInfo};
pub use protocol::{BridgeEvent, Command, HealthResponse, PROTOCOL_VERSION};
pub use rpc::{run_unix_socket, Dispatcher};
pub use ws_handler::{ws_upgrade, WsState};
