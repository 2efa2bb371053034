//! Program id and transport action -> TBBOX command payload.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::config::Config;
use crate::error::DirectoryError;
use crate::pattern::ProgramId;
use crate::payload::CommandPayload;

/// Playlist transport actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlAction {
    Pause,
    Resume,
    Stop,
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Stop => "stop",
        };
        f.write_str(name)
    }
}

impl FromStr for ControlAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pause" => Ok(Self::Pause),
            "resume" => Ok(Self::Resume),
            "stop" => Ok(Self::Stop),
            _ => Err(format!("unknown control action {:?}", s)),
        }
    }
}

/// Round to the nearest multiple of 10 (ties to even) and clamp to 0-100.
pub fn volume_level(percent: i32) -> u8 {
    let tens = (f64::from(percent) / 10.0).round_ties_even();
    (tens * 10.0).clamp(0.0, 100.0) as u8
}

/// Read-only command table, built once from configuration.
#[derive(Debug, Clone)]
pub struct ProgramDirectory {
    programs: HashMap<ProgramId, CommandPayload>,
    pause: CommandPayload,
    resume: CommandPayload,
    stop: CommandPayload,
    volume: BTreeMap<u8, CommandPayload>,
}

impl ProgramDirectory {
    pub fn new(
        programs: HashMap<ProgramId, CommandPayload>,
        pause: CommandPayload,
        resume: CommandPayload,
        stop: CommandPayload,
        volume: BTreeMap<u16, CommandPayload>,
    ) -> Result<Self, DirectoryError> {
        let mut levels = BTreeMap::new();
        for (level, payload) in volume {
            if level > 100 || level % 10 != 0 {
                return Err(DirectoryError::InvalidVolumeLevel(level));
            }
            levels.insert(level as u8, payload);
        }

        Ok(Self {
            programs,
            pause,
            resume,
            stop,
            volume: levels,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, DirectoryError> {
        Self::new(
            config.programs.clone(),
            config.controls.pause.clone(),
            config.controls.resume.clone(),
            config.controls.stop.clone(),
            config.volume.clone(),
        )
    }

    pub fn command_for(&self, id: ProgramId) -> Result<&CommandPayload, DirectoryError> {
        self.programs
            .get(&id)
            .ok_or(DirectoryError::UnknownProgram(id))
    }

    pub fn control_command(&self, action: ControlAction) -> &CommandPayload {
        match action {
            ControlAction::Pause => &self.pause,
            ControlAction::Resume => &self.resume,
            ControlAction::Stop => &self.stop,
        }
    }

    /// Returns the effective level together with its payload.
    pub fn volume_command(&self, percent: i32) -> Result<(u8, &CommandPayload), DirectoryError> {
        let level = volume_level(percent);
        self.volume
            .get(&level)
            .map(|payload| (level, payload))
            .ok_or(DirectoryError::UnsupportedVolume(level))
    }

    /// Configured program ids, sorted.
    pub fn program_ids(&self) -> Vec<ProgramId> {
        let mut ids: Vec<ProgramId> = self.programs.keys().copied().collect();
        ids.sort();
        ids
    }
}
