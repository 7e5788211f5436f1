use crate::Result;

use std::pin::Pin;

use futures_util::stream::{select_all, Stream, StreamExt};
use tokio::signal::unix::{signal, SignalKind};
use tokio_stream::wrappers::SignalStream;

/// Signals that abort a run (teardown still happens)
static SIGNALS: [(SignalKind, &str); 2] = [
    (SignalKind::interrupt(), "SIGINT"),
    (SignalKind::terminate(), "SIGTERM"),
];

/// Merged stream of the abort signals, yielding the name of each one received
pub struct Signals {
    stream: Pin<Box<dyn Stream<Item = &'static str> + Send>>,
}

impl Signals {
    pub fn new() -> Result<Self> {
        let signal_streams = SIGNALS
            .iter()
            .map(|&(kind, name)| signal(kind).map(|s| SignalStream::new(s).map(move |()| name)))
            .collect::<std::io::Result<Vec<_>>>()?;

        Ok(Signals {
            stream: Box::pin(select_all(signal_streams)),
        })
    }

    pub async fn next(&mut self) -> Option<&'static str> {
        self.stream.next().await
    }

    /// Resolves with the first signal; never resolves if the stream ends.
    pub async fn first(mut self) -> &'static str {
        match self.next().await {
            Some(name) => name,
            None => std::future::pending().await,
        }
    }
}
