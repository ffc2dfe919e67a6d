pub mod details;
pub mod notifier;
pub mod queue;
pub mod readiness;
pub mod resolver;
pub mod store;
