//! Content classification for incoming mail.
//!
//! - [`traits::Classifier`] — what the bridge depends on
//! - [`http_classifier::HttpClassifier`] — OpenAI-compatible `/chat/completions` client
//!
//! Classification is advisory. Callers treat any error as "unclassified" and
//! render the message plainly.

pub mod http_classifier;
pub mod traits;

pub use http_classifier::HttpClassifier;
pub use traits::{Classification, Classifier, Verdict};
