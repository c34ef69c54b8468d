//! Remote access over a remote shell
//!
//! A remote database is reached by running one remote-shell command per
//! operation. There is no listening service: the peer runs `abcd serve
//! USER` (typically as an ssh forced command), reads one request line from
//! stdin and prints one response line.
//!
//! Codes:
//!
//! | code | payload |
//! |------|---------|
//! | 201 | text |
//! | 202 | JSON list |
//! | 203 | JSON dict |
//! | 204 | JSON list of records |
//! | 220-224 | insert / update / remove / add-keys / remove-keys result |
//! | 400 | error text |
//! | 401 | read error text |
//! | 402 | write error text |

mod client;
mod codec;
mod errors;
mod transport;

pub use client::RemoteBackend;
pub use codec::{Operation, Reply, Request, Response, ResponseCode};
pub use errors::{CommunicationError, ProtocolError};
pub use transport::{Output, SshTransport, Transport, DEFAULT_TIMEOUT_SECS};
