pub mod session;
pub mod supervisor;
pub mod task;

pub use session::{SessionSnapshot, WatchOutcome, WatchParams, WatchSession, WatchState};
pub use supervisor::{SubmitOutcome, WatchSupervisor};
pub use task::{WatchError, WatchTask};
