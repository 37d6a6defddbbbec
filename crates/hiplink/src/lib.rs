//! hiplink: the Host-Interface-Protocol (HIP) signal engine.
//!
//! hiplink sits between one serialized hardware transport and several
//! independent logical clients (management/control, the network data path,
//! debug monitors). It guarantees mutual exclusion over the shared
//! transport, multiplexes binary signals to the right client by routing
//! id, layers a blocking timeout-bounded request/reply abstraction over
//! the asynchronous channel, and gates data packets through the
//! controlled/uncontrolled port pair with deferred replay.
//!
//! The stack is three layers, re-exported here:
//! - [`wire`]: the little-endian signal envelope codec
//! - [`bus`]: the serialized hardware worker and transport boundary
//! - [`engine`]: registry, dispatch, request/reply, port gating, sessions
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use hiplink::bus::BusDriver;
//! use hiplink::engine::{HipSession, SessionConfig, SignalClient};
//! use hiplink::wire::{BulkSet, Signal};
//!
//! struct Mgmt;
//!
//! impl SignalClient for Mgmt {
//!     fn on_signal(&self, _signal: &Signal, _bulk: &BulkSet) {
//!         // handle management traffic
//!     }
//! }
//!
//! struct Driver; // talks to the real bus
//!
//! impl BusDriver for Driver {
//!     fn service(&mut self) -> hiplink::bus::Result<Option<Duration>> {
//!         Ok(None)
//!     }
//! }
//!
//! let session = HipSession::start(SessionConfig::default(), |_parts| Box::new(Driver))?;
//! let mgmt = session.register_client(Arc::new(Mgmt))?;
//! session.set_management(&mgmt);
//! # Ok::<(), hiplink::engine::EngineError>(())
//! ```

pub use hiplink_bus as bus;
pub use hiplink_engine as engine;
pub use hiplink_wire as wire;

pub use hiplink_engine::{ClientHandle, HipSession, SessionConfig, SignalClient};
pub use hiplink_wire::{BulkSet, Signal, SignalKind};
