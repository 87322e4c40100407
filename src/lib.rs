//! hrnotify - Date-driven HR email notifications.
//!
//! One invocation evaluates every automated rule against today's date,
//! expands the due ones into emails and sends them, returning one
//! [`DispatchResult`] per notification instance or rule-level failure.

pub mod cli;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod ledger;
pub mod matcher;
pub mod metrics;
pub mod model;
pub mod normalize;
pub mod notify;
pub mod resolver;
pub mod store;
pub mod template;

// Re-export commonly used types
pub use cli::LogFormat;
pub use clock::{CalendarDate, Clock, FixedClock, SystemClock};
pub use dispatch::{DispatchSettings, Dispatcher};
pub use ledger::{DeliveryKey, DeliveryLedger, FileLedger};
pub use metrics::TextfileExporter;
pub use model::{DispatchResult, ErrorKind, NotificationRule, Outcome, Template};
pub use normalize::EmailHtmlNormalizer;
pub use notify::{
    LogTransport, MailTransport, Mailer, OutgoingEmail, RetryPolicy, backoff_delay,
    transport_from_config,
};
pub use store::{JsonDirStore, MemoryStore, RecordStore};
pub use template::{Layout, render};
