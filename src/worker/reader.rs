//! Worker output reader task.
//!
//! Reads lines from one of a worker's output pipes and appends them to the
//! session's log stream. The pipes are connected at spawn time, so lines
//! emitted before this task first polls sit in the pipe buffer and are
//! never lost.

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::logs::LogHub;

/// Upper bound for a single worker log line.
const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Pump `stream` line-by-line into the session's log stream until EOF,
/// an unrecoverable I/O error, or cancellation.
///
/// Over-long lines are dropped with a warning; they do not terminate the
/// reader. Exit reporting is the exit monitor's job, not the reader's.
pub async fn run_reader<R>(
    session_id: String,
    stream: R,
    hub: std::sync::Arc<LogHub>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(session_id, "log reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!(session_id, "log reader: EOF");
                        break;
                    }
                    Some(Ok(line)) => {
                        hub.append(&session_id, line);
                    }
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        warn!(session_id, "log reader: line over limit, dropped");
                    }
                    Some(Err(LinesCodecError::Io(err))) => {
                        warn!(session_id, %err, "log reader: IO error, stopping");
                        break;
                    }
                }
            }
        }
    }
}
