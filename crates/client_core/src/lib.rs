//! Client-side session controllers for the lab dashboard.
//!
//! [`LabCollection`] keeps the user's labs consistent with the backend and owns the
//! single global error slot. [`TerminalSession`] drives command execution against one
//! lab. Both talk to the backend only through [`LabApi`].

pub mod api;
pub mod collection;
pub mod config;
pub mod error;
pub mod terminal;

pub use api::{HttpLabApi, LabApi};
pub use collection::{CollectionError, CollectionEvent, CollectionSnapshot, LabCollection};
pub use config::{load_settings, ClientSettings};
pub use error::{ApplicationError, FetchError};
pub use terminal::{
    CommandHistoryEntry, CommandStatus, SessionEvent, SessionSnapshot, SubmitRejection,
    TerminalSession,
};

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
