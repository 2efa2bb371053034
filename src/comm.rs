//! Device worker: the only owner of the TBBOX session.
//!
//! GPIO edges and HTTP requests arrive concurrently, but TBBOX takes a single
//! connection. All device operations are queued to one task and handled in
//! arrival order. Callers await a oneshot reply, so no request handler ever
//! blocks on device I/O.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::consts::DEVICE_QUEUE_LENGTH;
use crate::error::SessionError;
use crate::payload::CommandPayload;
use crate::session::{Connector, DeviceSession};

type Reply = oneshot::Sender<Result<(), SessionError>>;

#[derive(Debug)]
enum Request {
    /// Establish (or re-establish) an authenticated connection.
    Connect { reply: Reply },
    /// Deliver a command with the configured retry budget.
    Send { payload: CommandPayload, reply: Reply },
    Close { reply: oneshot::Sender<()> },
}

/// Cheap to clone; all clones feed the same worker.
#[derive(Debug, Clone)]
pub struct DeviceHandle {
    tx: mpsc::Sender<Request>,
}

pub struct Comm {
    pub handle: DeviceHandle,
    pub worker: JoinHandle<()>,
}

impl DeviceHandle {
    pub async fn connect(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.request(Request::Connect { reply }, rx).await?
    }

    pub async fn send_command(&self, payload: CommandPayload) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.request(Request::Send { payload, reply }, rx).await?
    }

    /// Close the device connection. Does nothing when already closed or the
    /// worker is gone.
    pub async fn close(&self) {
        let (reply, rx) = oneshot::channel();
        if self.request(Request::Close { reply }, rx).await.is_err() {
            debug!("Device worker already stopped");
        }
    }

    async fn request<T>(&self, request: Request, rx: oneshot::Receiver<T>) -> Result<T, SessionError> {
        self.tx
            .send(request)
            .await
            .map_err(|_| SessionError::WorkerGone)?;
        rx.await.map_err(|_| SessionError::WorkerGone)
    }
}

async fn worker<C: Connector>(mut session: DeviceSession<C>, mut queue: mpsc::Receiver<Request>) {
    while let Some(request) = queue.recv().await {
        match request {
            Request::Connect { reply } => {
                let result = if session.is_authenticated() {
                    Ok(())
                } else {
                    session.connect().await
                };
                let _ = reply.send(result);
            }
            Request::Send { payload, reply } => {
                let retries = session.config().send_retries;
                let result = session.send_command(&payload, retries).await;
                if reply.send(result).is_err() {
                    warn!("Requester left before command {:?} finished", payload);
                }
            }
            Request::Close { reply } => {
                session.close().await;
                let _ = reply.send(());
            }
        }
    }

    // Every handle dropped.
    session.close().await;
    info!("Device worker finishing");
}

/// Move the session into its worker task.
#[tracing::instrument(skip_all)]
pub fn spawn<C: Connector + 'static>(session: DeviceSession<C>) -> Comm {
    let (tx, rx) = mpsc::channel(DEVICE_QUEUE_LENGTH);
    let worker = tokio::spawn(worker(session, rx));

    Comm {
        handle: DeviceHandle { tx },
        worker,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::{login, Outcome, ScriptedConnector};
    use crate::session::SessionConfig;
    use std::sync::atomic::Ordering;
    use tokio::io::AsyncReadExt;

    #[tokio::test(start_paused = true)]
    async fn requests_are_serialized() {
        let (connector, mut peers) = ScriptedConnector::new(&[Outcome::Accept]);
        let attempts = connector.attempts.clone();
        let session = DeviceSession::new(connector, login(), SessionConfig::default());
        let Comm { handle, worker } = spawn(session);

        let a = handle.clone();
        let b = handle.clone();
        let (ra, rb) = tokio::join!(
            a.send_command(CommandPayload::parse("0a0a").unwrap()),
            b.send_command(CommandPayload::parse("0b0b").unwrap()),
        );
        ra.unwrap();
        rb.unwrap();
        // Second request found an authenticated session.
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        drop((a, b, handle));
        worker.await.unwrap();

        let mut device = peers.recv().await.unwrap();
        let mut received = Vec::new();
        device.read_to_end(&mut received).await.unwrap();
        assert_eq!(received.len(), 4 + 2 + 2);
        assert_eq!(&received[..4], &[0x55, 0xaa, 0x00, 0x01]);
        let (first, second) = received[4..].split_at(2);
        assert!(first[0] != second[0]);
        assert!(first[0] == first[1] && second[0] == second[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_reported_not_fatal() {
        let (connector, _peers) = ScriptedConnector::new(&[Outcome::Refuse; 5]);
        let session = DeviceSession::new(connector, login(), SessionConfig::default());
        let Comm { handle, worker } = spawn(session);

        let result = handle.send_command(CommandPayload::parse("0a0a").unwrap()).await;
        assert!(matches!(result, Err(SessionError::ConnectFailed { .. })));

        // Worker keeps serving.
        handle.close().await;
        assert!(handle.connect().await.is_err());
        assert!(!worker.is_finished());
    }

    #[tokio::test]
    async fn stopped_worker_is_reported() {
        let (connector, _peers) = ScriptedConnector::new(&[]);
        let session = DeviceSession::new(connector, login(), SessionConfig::default());
        let Comm { handle, worker } = spawn(session);
        worker.abort();
        let _ = worker.await;

        let result = handle.send_command(CommandPayload::parse("0a0a").unwrap()).await;
        assert!(matches!(result, Err(SessionError::WorkerGone)));
        handle.close().await;
    }
}
