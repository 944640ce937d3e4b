//! HTTP API handlers

pub mod dispatch;
pub mod health;
pub mod needs;
pub mod respond;
pub mod sweeps;

pub use dispatch::{dispatch_need, dispatch_project};
pub use health::health_routes;
pub use needs::{create_need, get_need, pause_need, resume_need};
pub use respond::{show_response, submit_response};
pub use sweeps::{run_reminder_sweep, run_timeout_sweep};
