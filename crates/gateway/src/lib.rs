//! The Mintage gateway: the identifier-operation coordinator, the per-key
//! lock registry, the registration daemon, and the service binary's
//! supporting pieces.

pub mod authz;
pub mod cli;
pub mod coordinator;
pub mod daemon;
pub mod external;
pub mod locks;
pub mod notify;
pub mod state;
pub mod status;
