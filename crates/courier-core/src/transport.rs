//! The envelope transport interface.
//!
//! Abstracts over a persistent bidirectional socket and a request/response
//! polling client. The pipeline only reads envelopes and manages
//! connection lifecycle; wire format and authentication live behind this
//! trait.

use std::time::Duration;

use thiserror::Error;

use crate::envelope::Envelope;

/// Transport failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// I/O failure; the caller should reset and reschedule
    #[error("transport i/o error: {0}")]
    Io(String),

    /// The server rejected our credentials
    #[error("unauthorized")]
    Unauthorized,

    /// A read exceeded its timeout without the connection failing
    #[error("read timed out")]
    Timeout,
}

/// A source of encrypted envelopes.
///
/// Implementations are shared across threads; `connect`/`disconnect` are
/// idempotent.
pub trait Transport: Send + Sync {
    /// Open the persistent connection
    fn connect(&self) -> Result<(), TransportError>;

    /// Tear down the persistent connection
    fn disconnect(&self);

    /// Blocking read from the persistent connection.
    ///
    /// Invokes `on_envelope` synchronously for the envelope read, then
    /// returns it. `Ok(None)` means nothing was immediately available,
    /// which callers use as the "drained" signal.
    fn read_or_empty(
        &self,
        timeout: Duration,
        on_envelope: &mut dyn FnMut(Envelope),
    ) -> Result<Option<Envelope>, TransportError>;

    /// Polling retrieval: iterate envelopes until the server reports
    /// exhaustion, invoking `on_envelope` for each.
    fn retrieve_messages(
        &self,
        include_stories: bool,
        on_envelope: &mut dyn FnMut(Envelope),
    ) -> Result<(), TransportError>;

    /// Discard the underlying client instance so the next call starts
    /// fresh. Called after an I/O failure on the polling path.
    fn reset(&self);
}
