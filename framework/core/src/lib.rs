mod budget;
mod clock;
mod shutdown;

pub mod prelude {
    pub use crate::budget::IterationBudget;
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::shutdown::{DelegatedShutdownListener, ShutdownHandle, ShutdownSignalError};
}
