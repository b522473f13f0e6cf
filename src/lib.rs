//! campaign-sync: keeps scheduled email campaigns in step between the
//! record store, the automation platform and the mail sender.

pub mod automation;
pub mod config;
pub mod error;
pub mod mailer;
pub mod notify;
pub mod pipeline;
pub mod retry;
pub mod routes;
pub mod scheduler;
pub mod store;
