//! Per-connection handling: reads requests off the wire, dispatches them against the shared
//! `Engine`, and writes responses back — one `tokio` task per accepted connection.

use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tracing::{info, warn};

use lumen_core::protocol::{encode_response, finish_value_request, parse_header, ParsedHeader, Response};
use lumen_core::Engine;

/// Drive one client connection until it disconnects.
///
/// A malformed request yields `ERR <message>` and the connection stays open (mirrors the
/// "log and continue" shape of the original request loop); only a clean EOF, or a write
/// failure, ends the task.
pub async fn handle_connection(socket: TcpStream, peer: SocketAddr, engine: Engine) {
    info!(%peer, "connection opened");
    let (read_half, write_half) = socket.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = BufWriter::new(write_half);

    loop {
        let mut line = String::new();
        let bytes_read = match reader.read_line(&mut line).await {
            Ok(n) => n,
            Err(e) => {
                warn!(%peer, error = %e, "connection read error");
                break;
            }
        };
        if bytes_read == 0 {
            break; // clean EOF
        }
        trim_newline(&mut line);

        let response = match parse_header(&line) {
            Ok(ParsedHeader::Complete(request)) => engine.dispatch(request),
            Ok(ParsedHeader::NeedsValue(pending)) => {
                match read_value(&mut reader, pending.len()).await {
                    Ok(value) => engine.dispatch(finish_value_request(pending, value)),
                    Err(e) => {
                        warn!(%peer, error = %e, "failed reading value payload");
                        break;
                    }
                }
            }
            Err(e) => {
                engine.stats().record_error();
                Response::err(e.to_string())
            }
        };

        if let Err(e) = write_response(&mut writer, &response).await {
            warn!(%peer, error = %e, "connection write error");
            break;
        }
    }

    info!(%peer, "connection closed");
}

/// Strip a trailing `\n` and an optional preceding `\r`.
fn trim_newline(line: &mut String) {
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
}

/// Read exactly `len` value bytes followed by the terminating newline (`\n` or `\r\n`).
async fn read_value<R: tokio::io::AsyncRead + Unpin>(
    reader: &mut R,
    len: usize,
) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;

    let mut terminator = [0u8; 1];
    reader.read_exact(&mut terminator).await?;
    if terminator[0] == b'\r' {
        reader.read_exact(&mut terminator).await?;
    }
    if terminator[0] != b'\n' {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "value payload missing terminating newline",
        ));
    }
    Ok(buf)
}

async fn write_response<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    response: &Response,
) -> std::io::Result<()> {
    writer.write_all(&encode_response(response)).await?;
    writer.flush().await
}
