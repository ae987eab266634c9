use serde::{Deserialize, Serialize};

use crate::{header::Header, player::Player};

pub const HEADER_PARSED: &str = "header_parsed";
pub const PLAYER_CONNECTED: &str = "player_connected";
pub const TICK_DONE: &str = "tick_done";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderParsed {
    pub header: Header,
}

/// Sent the first time a slot reports a non-zero steam id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerConnected {
    pub player: Player,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickDone;
