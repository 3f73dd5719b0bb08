//! rollcall-store — SQLite-backed persistence for the attendance system.
//!
//! Persons with encrypted reference embeddings, the per-day attendance
//! ledger, the append-only detection log, unknown-face sightings, and the
//! reporting queries the CLI and D-Bus surfaces expose.

pub mod crypto;
pub mod store;

pub use crypto::{CryptoError, EmbeddingCipher};
pub use store::{
    AttendanceOutcome, AttendanceRow, Counts, LogRow, NewPerson, PersonRow, PersonStats,
    ReportRow, Store, StoreError,
};
