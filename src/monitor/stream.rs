use tokio::sync::mpsc;

/// Lines delivered through a channel, in order
///
/// Ends once every sender is dropped.
pub struct LineStream {
    rx: mpsc::Receiver<String>,
}

impl LineStream {
    pub fn new(rx: mpsc::Receiver<String>) -> Self {
        Self { rx }
    }

    /// Create a stream together with the sender that feeds it
    pub fn channel(capacity: usize) -> (mpsc::Sender<String>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }

    /// Next line, or `None` once the stream has ended; cancel safe
    pub async fn next(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}
