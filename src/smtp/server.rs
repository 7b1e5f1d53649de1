//! SMTP server implementation

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::smtp::backend::RelayBackend;
use crate::smtp::commands::SmtpCommandHandler;
use crate::smtp::error::{SmtpError, SmtpLimits};
use crate::smtp::response::SmtpResponse;
use crate::smtp::session::{InputMode, SmtpSession};

/// Deadline for a single read from the client
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for a single reply to the client
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// SMTP listener that relays every accepted message through its backend
#[derive(Debug, Clone)]
pub struct SmtpServer {
    /// Server hostname
    hostname: String,
    backend: Arc<RelayBackend>,
}

impl SmtpServer {
    /// Create a new SMTP server
    pub fn new(hostname: impl Into<String>, backend: Arc<RelayBackend>) -> Self {
        Self {
            hostname: hostname.into(),
            backend,
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Bind to `addr` and serve connections until the task is dropped
    pub async fn start(&self, addr: &str) -> Result<(), SmtpError> {
        let listener = TcpListener::bind(addr).await?;
        self.start_with_listener(listener).await
    }

    /// Serve connections from an existing listener, one task per client
    pub async fn start_with_listener(&self, listener: TcpListener) -> Result<(), SmtpError> {
        info!(
            addr = %listener.local_addr()?,
            domain = %self.hostname,
            "SMTP server listening"
        );

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let server = self.clone();
                    let span = info_span!("session", %peer);
                    tokio::spawn(
                        async move {
                            debug!("Client connected");
                            if let Err(e) = server.handle_client(stream).await {
                                warn!(error = %e, "Error handling client");
                            }
                            debug!("Client disconnected");
                        }
                        .instrument(span),
                    );
                }
                Err(e) => {
                    error!(error = %e, "Error accepting connection");
                }
            }
        }
    }

    /// Run one SMTP conversation to completion
    pub async fn handle_client<S>(&self, stream: S) -> Result<(), SmtpError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (read_half, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);
        let mut session = SmtpSession::new(self.backend.clone());
        let command_handler = SmtpCommandHandler::new(&self.hostname);

        send_response(&mut writer, &SmtpResponse::greeting(&self.hostname)).await?;

        let mut line_buffer = Vec::new();
        loop {
            line_buffer.clear();

            match read_line(&mut reader, &mut line_buffer).await {
                Ok(0) => break, // Connection closed
                Ok(_) => {}
                Err(e @ SmtpError::Timeout) => {
                    send_response(&mut writer, &error_response(&e)).await?;
                    return Err(e);
                }
                Err(e) => return Err(e),
            }

            // Invalid UTF-8 in a command line is replaced rather than rejected
            let line = String::from_utf8_lossy(&line_buffer);
            let command = line.trim_end_matches(['\r', '\n']);

            let result = match session.mode {
                InputMode::AuthPlain => command_handler.process_auth_response(command, &mut session),
                _ => {
                    if command.trim().is_empty() {
                        continue;
                    }
                    command_handler.process_command(command, &mut session)
                }
            };

            let response = match result {
                Ok(response) => response,
                Err(e) => error_response(&e),
            };
            send_response(&mut writer, &response).await?;

            if session.is_closed() {
                break;
            }

            if session.mode == InputMode::Data {
                self.receive_message(&mut reader, &mut writer, &mut session)
                    .await?;
            }
        }

        Ok(())
    }

    /// Collect the DATA payload, submit it and reply; the transaction is
    /// over afterwards
    async fn receive_message<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        session: &mut SmtpSession,
    ) -> Result<(), SmtpError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let response = match read_data(reader).await {
            Ok(payload) => {
                debug!(size = payload.len(), "Message data received");
                match session.submit_body(&payload).await {
                    Ok(()) => SmtpResponse::message_accepted(),
                    Err(e) => error_response(&e),
                }
            }
            Err(e @ SmtpError::Timeout) => {
                send_response(writer, &error_response(&e)).await?;
                return Err(e);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(error = %e, "Rejected message data");
                session.reset();
                error_response(&e)
            }
        };

        send_response(writer, &response).await
    }
}

fn error_response(e: &SmtpError) -> SmtpResponse {
    SmtpResponse::error(e.to_response_code(), &e.to_response_message())
}

/// Read one line, including its terminator, under the read deadline
async fn read_line<R>(reader: &mut R, buffer: &mut Vec<u8>) -> Result<usize, SmtpError>
where
    R: AsyncBufRead + Unpin,
{
    timeout(READ_TIMEOUT, reader.read_until(b'\n', buffer))
        .await
        .map_err(|_| SmtpError::Timeout)?
        .map_err(SmtpError::from)
}

/// Read message lines up to the lone "." terminator.
///
/// Leading dots are unstuffed and lines are rejoined with CRLF. Once a limit
/// is exceeded the rest of the data is still consumed so the client stays in
/// sync, and the limit error is returned at the terminator.
async fn read_data<R>(reader: &mut R) -> Result<Vec<u8>, SmtpError>
where
    R: AsyncBufRead + Unpin,
{
    let mut payload = Vec::new();
    let mut line = Vec::new();
    let mut rejected: Option<SmtpError> = None;

    loop {
        line.clear();
        if read_line(reader, &mut line).await? == 0 {
            return Err(SmtpError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed during DATA",
            )));
        }

        let content = strip_line_ending(&line);
        if content == b"." {
            break;
        }

        if rejected.is_some() {
            continue;
        }

        if line.len() > SmtpLimits::TEXT_LINE_MAX_LENGTH {
            rejected = Some(SmtpError::LineTooLong {
                max: SmtpLimits::TEXT_LINE_MAX_LENGTH,
            });
            continue;
        }

        let content = content.strip_prefix(b".").unwrap_or(content);
        if payload.len() + content.len() + 2 > SmtpLimits::MAX_DATA_SIZE {
            rejected = Some(SmtpError::TooMuchData {
                max: SmtpLimits::MAX_DATA_SIZE,
            });
            continue;
        }

        payload.extend_from_slice(content);
        payload.extend_from_slice(b"\r\n");
    }

    match rejected {
        Some(e) => Err(e),
        None => Ok(payload),
    }
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Send a response to the client under the write deadline
async fn send_response<W>(writer: &mut W, response: &SmtpResponse) -> Result<(), SmtpError>
where
    W: AsyncWrite + Unpin,
{
    // Ensure response doesn't exceed maximum line length
    let formatted = response.format();
    let bytes = if response.multiline.is_none()
        && formatted.len() > SmtpLimits::REPLY_LINE_MAX_LENGTH
    {
        SmtpResponse::new(&response.code, "Response too long (truncated)").format()
    } else {
        formatted
    };

    timeout(WRITE_TIMEOUT, async {
        writer.write_all(bytes.as_bytes()).await?;
        writer.flush().await
    })
    .await
    .map_err(|_| SmtpError::Timeout)??;

    Ok(())
}
