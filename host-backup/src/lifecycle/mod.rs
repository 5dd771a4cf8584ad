//! Run lifecycle: cleanup guard, destination lock, privilege gate and signals.

pub mod guard;
pub mod lock;
pub mod privilege;
pub mod shutdown;

pub use guard::RunContext;
pub use lock::DestinationLock;
pub use privilege::Elevation;
pub use shutdown::{ShutdownCoordinator, ShutdownSignal};
