//! The config repo: clones, commits, notes and the sync tag.

pub mod exec;
pub mod note;
pub mod repo;

pub use exec::CommandError;
pub use note::{Note, NoteStore};
pub use repo::{Checkout, Config, Repo};
