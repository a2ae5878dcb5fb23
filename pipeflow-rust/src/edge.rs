use crate::{
    datum::Datum,
    error::{Error, Result},
};
use flume::{Receiver, RecvTimeoutError, Selector, Sender, TrySendError};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

/// The receiving half of a pipeline-wide abort signal.
///
/// The signal fires when its [AbortHandle] is dropped or
/// [triggered](AbortHandle::trigger). Every blocking edge operation
/// waits on the signal along with the edge.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: Receiver<()>,
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        self.rx.is_disconnected()
    }
}

/// The owner of an abort signal.
#[derive(Debug)]
pub struct AbortHandle {
    tx: Option<Sender<()>>,
}

impl AbortHandle {
    pub fn new() -> (Self, AbortSignal) {
        let (tx, rx) = flume::bounded(0);
        (Self { tx: Some(tx) }, AbortSignal { rx })
    }

    pub fn trigger(&mut self) {
        self.tx = None;
    }

    pub fn is_triggered(&self) -> bool {
        self.tx.is_none()
    }
}

/// A bounded FIFO queue of datums between an output port and an input port.
///
/// Sending blocks while the queue is full and receiving blocks while
/// it is empty. The edge closes once the consumer has dequeued a
/// `Complete` datum or has [closed](Edge::close) it on finishing.
/// Clones refer to the same queue.
#[derive(Debug, Clone)]
pub struct Edge {
    capacity: usize,
    tx: Sender<Datum>,
    rx: Receiver<Datum>,
    closed: Arc<AtomicBool>,
    abort: Option<AbortSignal>,
}

impl Edge {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::configuration(
                "edge",
                "capacity",
                Some("0".into()),
                "edge capacity must be at least 1",
            ));
        }

        let (tx, rx) = flume::bounded(capacity);
        Ok(Self {
            capacity,
            tx,
            rx,
            closed: Arc::new(AtomicBool::new(false)),
            abort: None,
        })
    }

    /// Make blocking operations return [Error::Aborted] once `signal` fires.
    pub fn with_abort(mut self, signal: AbortSignal) -> Self {
        self.abort = Some(signal);
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.tx.is_full()
    }

    /// Whether the consumer has dequeued `Complete` or has finished.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the edge from the consumer side and discard the queued datums.
    ///
    /// A producer blocked on the full edge is released; its datum is
    /// discarded along with the rest.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // each receive also admits one blocked sender
        while self.rx.try_recv().is_ok() {}
    }

    /// Enqueue a datum, blocking while the edge is full.
    pub fn send(&self, datum: Datum) -> Result<()> {
        if self.is_closed() {
            return Err(Error::EdgeClosed);
        }

        match &self.abort {
            None => self.tx.send(datum).map_err(|_| Error::EdgeClosed),
            Some(abort) => {
                if abort.is_aborted() {
                    return Err(Error::Aborted);
                }
                Selector::new()
                    .send(&self.tx, datum, |result| {
                        result.map_err(|_| Error::EdgeClosed)
                    })
                    .recv(&abort.rx, |_| Err(Error::Aborted))
                    .wait()
            }
        }
    }

    /// Enqueue a datum without blocking.
    pub fn try_send(&self, datum: Datum) -> Result<()> {
        if self.is_closed() {
            return Err(Error::EdgeClosed);
        }

        self.tx.try_send(datum).map_err(|err| match err {
            TrySendError::Full(_) => Error::EdgeFull,
            TrySendError::Disconnected(_) => Error::EdgeClosed,
        })
    }

    /// Dequeue the oldest datum, blocking while the edge is empty.
    pub fn receive(&self) -> Result<Datum> {
        if self.is_closed() {
            return Err(Error::EdgeClosed);
        }

        let datum = match &self.abort {
            None => self.rx.recv().map_err(|_| Error::EdgeClosed)?,
            Some(abort) => {
                if abort.is_aborted() {
                    return Err(Error::Aborted);
                }
                Selector::new()
                    .recv(&self.rx, |result| result.map_err(|_| Error::EdgeClosed))
                    .recv(&abort.rx, |_| Err(Error::Aborted))
                    .wait()?
            }
        };
        self.observe(&datum);
        Ok(datum)
    }

    /// Dequeue the oldest datum, waiting at most `timeout` for one to arrive.
    pub fn receive_timeout(&self, timeout: Duration) -> Result<Option<Datum>> {
        if self.is_closed() {
            return Err(Error::EdgeClosed);
        }

        let datum = match &self.abort {
            None => match self.rx.recv_timeout(timeout) {
                Ok(datum) => datum,
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => return Err(Error::EdgeClosed),
            },
            Some(abort) => {
                if abort.is_aborted() {
                    return Err(Error::Aborted);
                }
                let selected = Selector::new()
                    .recv(&self.rx, |result| result.map_err(|_| Error::EdgeClosed))
                    .recv(&abort.rx, |_| Err(Error::Aborted))
                    .wait_timeout(timeout);
                match selected {
                    Ok(result) => result?,
                    Err(_) => return Ok(None),
                }
            }
        };
        self.observe(&datum);
        Ok(Some(datum))
    }

    /// Dequeue the oldest datum if there is one.
    pub fn try_receive(&self) -> Result<Option<Datum>> {
        if self.is_closed() {
            return Err(Error::EdgeClosed);
        }

        match self.rx.try_recv() {
            Ok(datum) => {
                self.observe(&datum);
                Ok(Some(datum))
            }
            Err(_) => Ok(None),
        }
    }

    fn observe(&self, datum: &Datum) {
        if datum.is_complete() {
            self.closed.store(true, Ordering::SeqCst);
        }
    }
}
