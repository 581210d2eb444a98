use std::borrow::Cow;

use esmtpd_common::{context, error::SessionError, internal, status::Status, tracing};
use esmtpd_tracing::traced;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    State, command,
    command::Command,
    state::{self, Bdat},
};

use super::{Context, Session};

/// Maximum length of a single text line, excluding the CRLF, per RFC 5321 §4.5.3.1.6.
const MAX_LINE_OCTETS: usize = 998;

/// Undo dot-stuffing (RFC 5321 §4.5.2) across a finalised message body.
///
/// Lines beginning with `.` have the leading dot removed; all other lines
/// pass through unchanged. `data` must not include the `.CRLF` terminator.
fn unstuff_dots(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut start = 0;
    let mut i = 0;

    while i + 1 < data.len() {
        if data[i] == b'\r' && data[i + 1] == b'\n' {
            let line = &data[start..i];
            out.extend_from_slice(line.strip_prefix(b".").unwrap_or(line));
            out.extend_from_slice(b"\r\n");
            i += 2;
            start = i;
        } else {
            i += 1;
        }
    }

    if start < data.len() {
        let line = &data[start..];
        out.extend_from_slice(line.strip_prefix(b".").unwrap_or(line));
    }

    out
}

/// Locate the first CRLF in `buf`, returning the offset of the `\r`.
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send + Sync> Session<Stream> {
    /// Receive and process data from the client
    ///
    /// Returns `Ok(true)` if the connection should be closed, `Ok(false)` to continue.
    ///
    /// # Errors
    /// Returns `SessionError` if there's a protocol error or I/O failure.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all, ret), timing)]
    pub(super) async fn receive(
        &mut self,
        validate_context: &mut context::Context,
    ) -> Result<bool, SessionError> {
        // A prior call may have stashed a second pipelined command (RFC 2920)
        // left over in the same read; drain it before touching the socket.
        if !self.cmd_buffer.is_empty() {
            let buffered = std::mem::take(&mut self.cmd_buffer);
            self.dispatch_received(&buffered, validate_context);
            return Ok(false);
        }

        let mut received_data = [0; 4096];

        match self.connection.receive(&mut received_data).await {
            // Consider any errors received here to be fatal
            Err(err) => {
                internal!("Error: {err}");
                Err(SessionError::Protocol(err.to_string()))
            }
            Ok(0) => {
                // Reading 0 bytes means the other side has closed the
                // connection or is done writing, then so are we.
                Ok(true)
            }
            Ok(bytes_read) => {
                let received = &received_data[..bytes_read];
                self.dispatch_received(received, validate_context);
                Ok(false)
            }
        }
    }

    /// Route a chunk of received bytes to the handler matching the current
    /// protocol state.
    fn dispatch_received(&mut self, received: &[u8], validate_context: &mut context::Context) {
        if matches!(self.context.state, State::Reading(_)) {
            self.handle_data_reception(received, validate_context);
        } else if matches!(self.context.state, State::Bdat(Bdat { remaining, .. }) if remaining > 0)
        {
            self.handle_bdat_reception(received, validate_context);
        } else {
            self.handle_command_reception(received, validate_context);
        }
    }

    /// Handle reception of message data (during DATA state)
    fn handle_data_reception(
        &mut self,
        received: &[u8],
        validate_context: &mut context::Context,
    ) {
        // Check if adding received data would exceed limit (BEFORE extending buffer)
        // This prevents the buffer overflow vulnerability where an attacker could
        // consume up to max_message_size + 4095 bytes before being rejected
        // Use checked_add to prevent integer overflow on 32-bit systems
        if self.max_message_size > 0 {
            let total_size = self.context.message.len().saturating_add(received.len());

            if total_size > self.max_message_size {
                validate_context.response = Some((
                    Status::ExceededStorage,
                    Cow::Owned(format!(
                        "Actual message size {total_size} bytes exceeds maximum allowed size {} bytes",
                        self.max_message_size
                    )),
                ));

                // Resource exhaustion is recoverable (spec.md §7): reset the
                // transaction, same as RSET, and keep the session open.
                validate_context.metadata.clear();
                *validate_context.envelope.sender_mut() = None;
                *validate_context.envelope.recipients_mut() = None;
                *validate_context.envelope.mail_params_mut() = None;

                let state = if validate_context.extended {
                    State::Ehlo(state::Ehlo {
                        id: validate_context.id.clone(),
                    })
                } else {
                    State::Helo(state::Helo {
                        id: validate_context.id.clone(),
                    })
                };

                self.context = Context {
                    state,
                    sent: false,
                    ..Default::default()
                };
                return;
            }
        }

        for &byte in received {
            if byte == b'\n' {
                self.context.line_len = 0;
            } else if byte != b'\r' {
                self.context.line_len += 1;

                if self.context.line_len > MAX_LINE_OCTETS {
                    validate_context.response = Some((
                        Status::Error,
                        Cow::Borrowed("Line too long"),
                    ));
                    self.context.state = State::Close(state::Close);
                    self.context.sent = false;
                    return;
                }
            }
        }

        self.context.message.extend(received);

        if self.context.message.ends_with(b"\r\n.\r\n") {
            // Move the message buffer to avoid double cloning
            let mut message = std::mem::take(&mut self.context.message);
            message.truncate(message.len() - 3); // drop the ".\r\n" terminator
            let message = unstuff_dots(&message);

            self.context = Context {
                state: State::PostDot(state::PostDot),
                message: message.clone(),
                sent: false,
                ..Default::default()
            };

            validate_context.data = Some(message.into());
        }
    }

    /// Handle reception of raw `BDAT` chunk octets (RFC 3030).
    ///
    /// Unlike `DATA`, the bytes are not dot-stuffed text and carry no
    /// terminator of their own; the chunk boundary is the `size` declared on
    /// the `BDAT` command line. Any bytes past that boundary belong to the
    /// next pipelined command and are reprocessed immediately.
    fn handle_bdat_reception(&mut self, received: &[u8], validate_context: &mut context::Context) {
        let State::Bdat(Bdat { remaining, last }) = self.context.state else {
            return;
        };

        let take = received.len().min(remaining);
        self.bdat_buffer.extend_from_slice(&received[..take]);
        let remaining = remaining - take;

        if remaining > 0 {
            self.context.state = State::Bdat(Bdat { remaining, last });
            return;
        }

        self.finish_bdat_chunk(last, validate_context);

        let leftover = &received[take..];
        if !leftover.is_empty() {
            self.handle_command_reception(leftover, validate_context);
        }
    }

    /// Finish the current `BDAT` chunk: on the `LAST` chunk, hand the
    /// accumulated body off exactly as `DATA` does (to `PostDot`, for
    /// `emit()` to validate and spool); otherwise return to a quiescent
    /// `Bdat` state awaiting the next `BDAT` command line.
    fn finish_bdat_chunk(&mut self, last: bool, validate_context: &mut context::Context) {
        let chunk_octets = self.bdat_buffer.len() - self.bdat_chunk_start;

        if last {
            let message = std::mem::take(&mut self.bdat_buffer);
            self.context = Context {
                state: State::PostDot(state::PostDot),
                message: chunk_octets.to_string().into_bytes(),
                sent: false,
                ..Default::default()
            };
            validate_context.data = Some(message.into());
        } else {
            self.context = Context {
                state: State::Bdat(Bdat {
                    remaining: 0,
                    last: false,
                }),
                message: chunk_octets.to_string().into_bytes(),
                sent: false,
                ..Default::default()
            };
        }
    }

    /// Handle reception of SMTP commands
    fn handle_command_reception(
        &mut self,
        received: &[u8],
        validate_context: &mut context::Context,
    ) {
        use esmtpd_common::incoming;

        // Pipelined clients (RFC 2920) may queue several commands in one
        // segment; only the first CRLF-terminated line is a command, the
        // rest is stashed for the next call. Absent a CRLF the whole buffer
        // is treated as the command, matching unpipelined single-line input.
        let (line, rest) = match find_crlf(received) {
            Some(pos) => (&received[..pos], &received[pos + 2..]),
            None => (received, &[][..]),
        };

        let command = Command::try_from(line).unwrap_or_else(|e| e);

        if let Command::Bdat(size, _) = &command
            && *size > command::MAX_CHUNK_SIZE
        {
            let size = *size;
            incoming!("{command}");
            validate_context.response = Some((
                Status::SyntaxError,
                Cow::Owned(format!(
                    "Chunk size {size} exceeds maximum allowed size {}",
                    command::MAX_CHUNK_SIZE
                )),
            ));
            self.context.sent = false;
            return;
        }

        let message = command.inner().as_bytes().to_vec();
        let starts_bdat_chunk = matches!(command, Command::Bdat(_, _));

        incoming!("{command}");

        self.context = Context {
            state: self
                .context
                .state
                .clone()
                .transition(command, validate_context),
            message,
            sent: false,
            ..Default::default()
        };

        if starts_bdat_chunk {
            self.bdat_chunk_start = self.bdat_buffer.len();
        }

        tracing::debug!("Transitioned to {:#?}", self.context);

        if !rest.is_empty() {
            if starts_bdat_chunk {
                // Chunk data pipelined right after its BDAT command line.
                self.handle_bdat_reception(rest, validate_context);
            } else {
                self.cmd_buffer.extend_from_slice(rest);
            }
        }
    }
}
