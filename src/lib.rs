//! KeePassword: a terminal client for encrypted credential databases.
//!
//! [`session::Session`] owns the decrypted database and the UI selection,
//! [`projector`] turns the stored tree into display records, and [`host`]
//! supplies file I/O, the auto-clearing clipboard and the update channel.
//! [`app`] wires these into the terminal UI.

pub mod app;
pub mod clipboard;
pub mod crypto;
pub mod dialogs;
pub mod format;
pub mod generator;
pub mod host;
pub mod logging;
pub mod models;
pub mod projector;
pub mod protected;
pub mod selection;
pub mod session;
pub mod storage;
pub mod ui;
pub mod updater;
