//! Cancellation and cleanup.
//!
//! - [`CancellationToken`] stops dispatch and kills running stage processes
//! - [`CleanupRegistry`] reclaims scratch directories in LIFO order

mod cleanup;
mod token;

pub use cleanup::CleanupRegistry;
pub use token::CancellationToken;
