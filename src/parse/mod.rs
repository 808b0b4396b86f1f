//! The structured-stream parser: consumes the dump format and reconstructs
//! a lazy fragment stream.
//!
//! The parser runs on its own cooperative task and hands fragments over a
//! single-slot channel, so a slow downstream consumer naturally paces the
//! lexer. Any structural error carries the input position and a snapshot of
//! the handler's state stack, and aborts the stream.

mod handler;
mod lexer;

use std::sync::Arc;

use log::Level;
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::error::{Error, Result};
use crate::fragment::Fragment;
use crate::logging::sst_log;
use crate::schema::Schema;
use handler::Handler;
use lexer::Lexer;

/// A structural error from the structured-stream parser.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("parsing input failed at line {line}, column {column}: {message} (state: {state})")]
pub struct ParseError {
    /// 1-based input line of the offending token.
    pub line: u64,
    /// 1-based input column of the offending token.
    pub column: u64,
    /// Snapshot of the parser state stack, innermost state first.
    pub state: String,
    /// What went wrong.
    pub message: String,
}

/// A fragment stream reconstructed from a structured dump.
pub struct MutationStreamParser {
    rx: flume::Receiver<Result<Fragment, ParseError>>,
}

impl MutationStreamParser {
    /// Start parsing `input` on a dedicated task.
    pub fn spawn(
        schema: Arc<Schema>,
        input: impl AsyncRead + Send + Unpin + 'static,
    ) -> Self {
        let (tx, rx) = flume::bounded(1);
        tokio::spawn(run(schema, input, tx));
        MutationStreamParser { rx }
    }

    /// The next fragment, or `None` at end of stream. A structural error
    /// aborts the stream.
    pub async fn next(&mut self) -> Result<Option<Fragment>> {
        match self.rx.recv_async().await {
            Ok(Ok(fragment)) => Ok(Some(fragment)),
            Ok(Err(e)) => Err(Error::Structural(e)),
            // The parser task dropped its sender: clean end of stream.
            Err(flume::RecvError::Disconnected) => Ok(None),
        }
    }
}

async fn run(
    schema: Arc<Schema>,
    input: impl AsyncRead + Send + Unpin,
    tx: flume::Sender<Result<Fragment, ParseError>>,
) {
    let mut lexer = Lexer::new(input);
    let mut handler = Handler::new(schema);
    loop {
        let event = match lexer.next().await {
            Ok(Some(event)) => event,
            Ok(None) => return,
            Err(e) => {
                let _ = tx.send_async(Err(e)).await;
                return;
            }
        };
        sst_log!(Level::Trace, "parse event {}", event.name());
        if let Err(e) = handler.on_event(event) {
            let _ = tx
                .send_async(Err(ParseError {
                    line: lexer.token_line(),
                    column: lexer.token_column(),
                    state: e.stack,
                    message: e.message,
                }))
                .await;
            return;
        }
        let emitted = handler.take_output();
        for fragment in emitted.fragments {
            sst_log!(Level::Trace, "parsed {}", fragment.kind());
            if tx.send_async(Ok(fragment)).await.is_err() {
                // Receiver gone; downstream cancelled the stream.
                return;
            }
        }
        if emitted.end_of_stream {
            return;
        }
    }
}
