//! # Attack Records
//!
//! Canonical attack-pattern records and the pure transformations every
//! pipeline stage shares.
//!
//! ## Philosophy
//!
//! Search relevance depends on the embedding text being byte-identical no matter
//! which stage produced it. Everything that turns a record into text lives here:
//! - One list-join rule ([`join_scalars`]) for tags / targets
//! - One embedding-text builder ([`embedding_text`])
//! - One scalar projection for denormalized store columns ([`ScalarProjection`])
//!
//! ## Example
//!
//! ```rust
//! use attack_records::{embedding_text, CanonicalRecord};
//!
//! let record = CanonicalRecord::from_json_str(
//!     r#"{"important":{"category":"malware","sub_category":"ransomware","title":"Sample X"}}"#,
//! )
//! .unwrap();
//!
//! assert_eq!(embedding_text(&record), "Sample X malware ransomware");
//! ```

mod error;
mod record;
mod slug;
mod text;

pub use error::{RecordError, Result};
pub use record::{CanonicalRecord, Classification};
pub use slug::{slug_for, to_slug};
pub use text::{embedding_text, join_scalars, ScalarProjection, EMBEDDING_FIELDS};
