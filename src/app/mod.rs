mod controller;
mod operations;
mod runtime;
mod types;


pub use controller::{Controller, ControllerBuilder};
pub use runtime::cancel_on_signal;
pub use types::StatusReport;
