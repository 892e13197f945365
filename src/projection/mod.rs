//! Read-only reconstruction of account state from the event log

pub mod classify;
pub mod query;
pub mod view;

pub use classify::{classify, CallClass};
pub use query::{AccountQuery, PendingOperations};
pub use view::{project, AccountView, PendingCallView, PendingConfigView};
