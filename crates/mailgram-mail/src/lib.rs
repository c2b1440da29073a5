//! Mail side of Mailgram: transports, the managed session and the watcher.

pub mod connection;
pub mod error;
pub mod imap;
pub mod parser;
pub mod session;
pub mod smtp;
pub mod transport;
pub mod watcher;

pub use connection::{Backoff, ConnectionManager, ConnectionPolicy, ConnectionState};
pub use error::MailError;
pub use imap::ImapTransport;
pub use parser::{parse_email, ParsedEmail};
pub use session::{ExclusiveSession, SharedSession};
pub use smtp::SmtpSender;
pub use transport::{IdleOutcome, MailSender, MailTransport, OutgoingMail, PushGate};
pub use watcher::{MailboxWatcher, MessageSink, PassReport, TriggerSource, WatcherConfig};
