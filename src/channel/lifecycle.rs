// src/channel/lifecycle.rs
//! `Idle → Loaded → Active → Unloaded` state shared by both channel halves.

use crate::channel::messages::DropReason;
use crate::error::ChannelError;
use log::debug;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Created, content not yet initialized.
    Idle,
    /// Content signalled it is ready.
    Loaded,
    /// Traffic has flowed.
    Active,
    Unloaded,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelState::Idle => "idle",
            ChannelState::Loaded => "loaded",
            ChannelState::Active => "active",
            ChannelState::Unloaded => "unloaded",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: Mutex<ChannelState>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(ChannelState::Idle),
        }
    }

    fn state_mut(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> ChannelState {
        *self.state_mut()
    }

    /// `Idle → Loaded`. Later calls are no-ops.
    pub(crate) fn loaded(&self) {
        let mut state = self.state_mut();
        if *state == ChannelState::Idle {
            debug!("Channel loaded");
            *state = ChannelState::Loaded;
        }
    }

    /// Admits one inbound message, activating a loaded channel.
    pub(crate) fn admit(&self) -> Result<(), DropReason> {
        let mut state = self.state_mut();
        match *state {
            ChannelState::Idle => Err(DropReason::NotReady),
            ChannelState::Unloaded => Err(DropReason::Closed),
            ChannelState::Loaded => {
                *state = ChannelState::Active;
                Ok(())
            }
            ChannelState::Active => Ok(()),
        }
    }

    /// Admits one outbound message, activating a loaded channel.
    pub(crate) fn admit_outbound(&self) -> Result<(), ChannelError> {
        self.admit().map_err(|reason| match reason {
            DropReason::Closed => ChannelError::Closed,
            _ => ChannelError::NotReady(self.state().to_string()),
        })
    }

    /// Moves to `Unloaded`. Returns `false` when already unloaded.
    pub(crate) fn unload(&self) -> bool {
        let mut state = self.state_mut();
        if *state == ChannelState::Unloaded {
            return false;
        }
        *state = ChannelState::Unloaded;
        true
    }
}
