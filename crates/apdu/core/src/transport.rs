//! Card transport abstraction
//!
//! A [`CardTransport`] exchanges raw command bytes for raw response bytes
//! with whatever sits on the other end: a PC/SC reader, a socket, or a
//! scripted card in tests. Transports must be synchronous and
//! order-preserving, and must accept commands up to 261 bytes.

use bytes::Bytes;
use tracing::trace;

use crate::Error;

/// Trait for card transports
pub trait CardTransport {
    /// Transmit a raw command and return the raw response (data + SW)
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Error>;

    /// Reset the transport
    fn reset(&mut self) -> Result<(), Error>;
}

impl<T: CardTransport + ?Sized> CardTransport for &mut T {
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Error> {
        (**self).transmit_raw(command)
    }

    fn reset(&mut self) -> Result<(), Error> {
        (**self).reset()
    }
}

/// Scripted transport for tests and simulations
///
/// Responses are played back in FIFO order; every transmitted command is
/// recorded and can be inspected afterwards.
#[derive(Debug, Default)]
pub struct MockTransport {
    responses: Vec<Bytes>,
    commands: Vec<Bytes>,
}

impl MockTransport {
    /// Create an empty mock transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock transport that always replays a single response
    pub fn with_response(response: Bytes) -> Self {
        Self {
            responses: vec![response],
            commands: Vec::new(),
        }
    }

    /// Queue a response for playback
    pub fn push_response<T: Into<Bytes>>(&mut self, response: T) -> &mut Self {
        self.responses.push(response.into());
        self
    }

    /// Commands transmitted so far, in order
    pub fn transmitted(&self) -> &[Bytes] {
        &self.commands
    }
}

impl CardTransport for MockTransport {
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Error> {
        trace!("mock transmit: {}", hex::encode_upper(command));
        self.commands.push(Bytes::copy_from_slice(command));

        if self.responses.is_empty() {
            return Err(Error::other("no scripted response available"));
        }

        if self.responses.len() == 1 {
            Ok(self.responses[0].clone())
        } else {
            Ok(self.responses.remove(0))
        }
    }

    fn reset(&mut self) -> Result<(), Error> {
        Ok(())
    }
}
