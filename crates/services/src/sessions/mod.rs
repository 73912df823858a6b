mod service;
mod view;

// Public API of the session subsystem.
pub use service::SessionAdvancer;
pub use view::AdvanceOutcome;
