use common::{ControlSignal, JobKey};
use std::sync::{Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("job {0} is not listening for control signals")]
    Closed(JobKey),
    #[error("{0} cannot be sent from outside a job loop")]
    Internal(ControlSignal),
}

struct Envelope {
    signal: ControlSignal,
    ack: oneshot::Sender<()>,
}

/// Receiving end of one job's control channel, owned by that job's loop.
pub struct ControlReceiver {
    key: JobKey,
    rx: mpsc::Receiver<Envelope>,
}

impl ControlReceiver {
    pub fn key(&self) -> JobKey {
        self.key
    }

    /// Next signal, acknowledging it to the sender. `None` once every sender
    /// is gone. Cancel-safe: nothing is consumed unless a value is returned.
    pub async fn recv(&mut self) -> Option<ControlSignal> {
        let envelope = self.rx.recv().await?;
        let _ = envelope.ack.send(());
        Some(envelope.signal)
    }
}

/// One control channel per job key, all created up front.
///
/// `signal` is a hand-off: it returns only after the job loop has taken the
/// signal, so a caller knows the job has seen it.
pub struct ControlBus {
    senders: Vec<mpsc::Sender<Envelope>>,
    receivers: Mutex<Vec<Option<ControlReceiver>>>,
}

impl ControlBus {
    pub fn new() -> Self {
        let mut senders = Vec::with_capacity(JobKey::ALL.len());
        let mut receivers = Vec::with_capacity(JobKey::ALL.len());
        for key in JobKey::ALL {
            let (tx, rx) = mpsc::channel(1);
            senders.push(tx);
            receivers.push(Some(ControlReceiver { key, rx }));
        }
        Self {
            senders,
            receivers: Mutex::new(receivers),
        }
    }

    /// Hand out the receiver for `key`. Only the first call gets it.
    pub fn take_receiver(&self, key: JobKey) -> Option<ControlReceiver> {
        let mut receivers = self.receivers.lock().unwrap_or_else(PoisonError::into_inner);
        receivers[key.index()].take()
    }

    pub async fn signal(&self, key: JobKey, signal: ControlSignal) -> Result<(), ControlError> {
        if signal == ControlSignal::TimerExpired {
            return Err(ControlError::Internal(signal));
        }
        log::info!("control: {} ==> {}", signal, key);
        let (ack, acked) = oneshot::channel();
        self.senders[key.index()]
            .send(Envelope { signal, ack })
            .await
            .map_err(|_| ControlError::Closed(key))?;
        acked.await.map_err(|_| ControlError::Closed(key))
    }

    /// Tell each job in `keys` that its configuration changed.
    pub async fn config_changed(&self, keys: &[JobKey]) -> Result<(), ControlError> {
        for key in keys {
            self.signal(*key, ControlSignal::ConfigChanged).await?;
        }
        Ok(())
    }
}

impl Default for ControlBus {
    fn default() -> Self {
        Self::new()
    }
}
