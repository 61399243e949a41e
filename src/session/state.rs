//! Classification of inbound reads
//!
//! Pure function: given what the connection produced, decide what the loop
//! does next. No I/O happens here.

use super::envelope::{salvage_thread_id, Envelope, EnvelopeError};
use super::traits::TransportError;

/// What the session loop does with one read
#[derive(Debug)]
pub enum Step {
    /// Connection is gone; `None` means a clean close
    Terminate(Option<TransportError>),
    /// Keep-alive with no text
    Ignore,
    /// Undecodable payload; report it and keep reading
    Recover {
        thread_id: Option<String>,
        error: EnvelopeError,
    },
    /// Run one turn
    ProcessTurn(Envelope),
}

pub fn next_step(inbound: Result<Option<String>, TransportError>) -> Step {
    let raw = match inbound {
        Ok(Some(raw)) => raw,
        Ok(None) => return Step::Terminate(None),
        Err(e) => return Step::Terminate(Some(e)),
    };

    match Envelope::decode(&raw) {
        Ok(envelope) if envelope.is_empty() => Step::Ignore,
        Ok(envelope) => Step::ProcessTurn(envelope),
        Err(error) => Step::Recover {
            thread_id: salvage_thread_id(&raw),
            error,
        },
    }
}
