//! Program and transport requests resolved to payloads and handed to the
//! device worker.

use std::sync::Arc;

use tracing::{error, info};

use crate::comm::DeviceHandle;
use crate::directory::{ControlAction, ProgramDirectory};
use crate::error::{ControlError, SessionError};
use crate::pattern::ProgramId;

/// Resolves programs and transport actions to payloads and hands them to the
/// device worker.
#[derive(Debug, Clone)]
pub struct SwitchController {
    directory: Arc<ProgramDirectory>,
    device: DeviceHandle,
}

impl SwitchController {
    pub fn new(directory: Arc<ProgramDirectory>, device: DeviceHandle) -> Self {
        Self { directory, device }
    }

    pub fn directory(&self) -> &ProgramDirectory {
        &self.directory
    }

    /// Make TBBOX play the given program.
    pub async fn switch_program(&self, id: ProgramId) -> Result<(), ControlError> {
        let payload = match self.directory.command_for(id) {
            Ok(payload) => payload.clone(),
            Err(err) => {
                error!(
                    "{} (configured: {:?})",
                    err,
                    self.directory
                        .program_ids()
                        .iter()
                        .map(ProgramId::to_string)
                        .collect::<Vec<_>>()
                );
                return Err(err.into());
            }
        };

        info!("Switching to program '{}'", id);
        match self.device.send_command(payload).await {
            Ok(()) => {
                info!("Switched to program '{}'", id);
                Ok(())
            }
            Err(err) => {
                error!("Switching to program '{}' failed: {}", id, err);
                Err(err.into())
            }
        }
    }

    pub async fn pause(&self) -> Result<(), ControlError> {
        self.control(ControlAction::Pause).await
    }

    pub async fn resume(&self) -> Result<(), ControlError> {
        self.control(ControlAction::Resume).await
    }

    pub async fn stop(&self) -> Result<(), ControlError> {
        self.control(ControlAction::Stop).await
    }

    pub async fn control(&self, action: ControlAction) -> Result<(), ControlError> {
        info!("Sending {} to device", action);
        let payload = self.directory.control_command(action).clone();
        self.device.send_command(payload).await.map_err(|err| {
            error!("{} failed: {}", action, err);
            err.into()
        })
    }

    /// Set volume; rounded to tens and clamped to 0-100. Returns the level
    /// actually set.
    pub async fn set_volume(&self, percent: i32) -> Result<u8, ControlError> {
        let (level, payload) = match self.directory.volume_command(percent) {
            Ok((level, payload)) => (level, payload.clone()),
            Err(err) => {
                error!("{}", err);
                return Err(err.into());
            }
        };

        info!("Setting volume to {}%", level);
        match self.device.send_command(payload).await {
            Ok(()) => Ok(level),
            Err(err) => {
                error!("Setting volume failed: {}", err);
                Err(err.into())
            }
        }
    }

    pub async fn connect(&self) -> Result<(), SessionError> {
        self.device.connect().await
    }

    pub async fn close(&self) {
        self.device.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{self, Comm};
    use crate::error::DirectoryError;
    use crate::payload::CommandPayload;
    use crate::session::testing::{login, Outcome, ScriptedConnector};
    use crate::session::{DeviceSession, SessionConfig};
    use std::collections::{BTreeMap, HashMap};
    use tokio::io::{AsyncReadExt, DuplexStream};
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;

    fn payload(hex: &str) -> CommandPayload {
        CommandPayload::parse(hex).unwrap()
    }

    fn controller(script: &[Outcome]) -> (SwitchController, JoinHandle<()>, mpsc::UnboundedReceiver<DuplexStream>) {
        let programs = HashMap::from([
            ("01".parse().unwrap(), payload("1001")),
            ("11".parse().unwrap(), payload("100b")),
        ]);
        let volume = BTreeMap::from([(50, payload("3032"))]);
        let directory =
            ProgramDirectory::new(programs, payload("2001"), payload("2002"), payload("2003"), volume)
                .unwrap();

        let (connector, peers) = ScriptedConnector::new(script);
        let session = DeviceSession::new(connector, login(), SessionConfig::default());
        let Comm { handle, worker } = comm::spawn(session);
        (SwitchController::new(Arc::new(directory), handle), worker, peers)
    }

    async fn delivered(
        controller: SwitchController,
        worker: JoinHandle<()>,
        mut peers: mpsc::UnboundedReceiver<DuplexStream>,
    ) -> Vec<u8> {
        drop(controller);
        worker.await.unwrap();
        let mut device = peers.recv().await.unwrap();
        let mut received = Vec::new();
        device.read_to_end(&mut received).await.unwrap();
        // Strip login frame.
        received.split_off(4)
    }

    #[tokio::test(start_paused = true)]
    async fn switch_program_sends_payload() {
        let (controller, worker, peers) = controller(&[Outcome::Accept]);
        controller.switch_program("11".parse().unwrap()).await.unwrap();
        assert_eq!(delivered(controller, worker, peers).await, vec![0x10, 0x0b]);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_program_is_not_sent() {
        let (controller, worker, peers) = controller(&[Outcome::Accept]);
        let result = controller.switch_program("07".parse().unwrap()).await;
        assert!(matches!(
            result,
            Err(ControlError::Directory(DirectoryError::UnknownProgram(_)))
        ));

        drop(controller);
        worker.await.unwrap();
        let mut peers = peers;
        assert!(peers.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn transport_controls_and_volume() {
        let (controller, worker, peers) = controller(&[Outcome::Accept]);
        controller.pause().await.unwrap();
        controller.resume().await.unwrap();
        controller.stop().await.unwrap();
        assert_eq!(controller.set_volume(47).await.unwrap(), 50);
        assert!(matches!(
            controller.set_volume(10).await,
            Err(ControlError::Directory(DirectoryError::UnsupportedVolume(10)))
        ));

        assert_eq!(
            delivered(controller, worker, peers).await,
            vec![0x20, 0x01, 0x20, 0x02, 0x20, 0x03, 0x30, 0x32]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn delivery_failure_is_returned() {
        let (controller, _worker, _peers) = controller(&[]);
        let result = controller.switch_program("01".parse().unwrap()).await;
        assert!(matches!(
            result,
            Err(ControlError::Delivery(SessionError::ConnectFailed { .. }))
        ));
        controller.close().await;
        controller.close().await;
    }
}
