//! Daemon module: the long-running dev server.
//!
//! The session keeps the module cache in memory, recompiles on file
//! changes, and pushes patches to every connected browser over a
//! WebSocket. A hard reload gets a bootstrap page with everything
//! compiled so far.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           hotpack serve                 │
//! │  - module cache in memory               │
//! │  - file watcher → incremental compiler  │
//! │  - HTTP bootstrap + static assets       │
//! └─────────────────────────────────────────┘
//!           │ ws://localhost:<port>/__hotpack/ws
//!           ▼
//! ┌─────────────────────────────────────────┐
//! │           browser runtime               │
//! │  - module table + lazy require          │
//! │  - MODULE_UPDATE / MODULE_UNLINK        │
//! │  - error overlay + console forwarding   │
//! └─────────────────────────────────────────┘
//! ```

pub mod broadcast;
pub mod protocol;
pub mod server;
pub mod session;

pub use broadcast::{Broadcaster, ClientConnection, ConnectionState, SocketErrorPolicy};
pub use protocol::UpdateEvent;
pub use server::{bind_port, router, serve, start_dev_server};
pub use session::{DevSession, WatchOutcome};
