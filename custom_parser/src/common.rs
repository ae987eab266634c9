use serde::{Deserialize, Serialize};

pub type Vector = glam::DVec3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Team {
    #[default]
    Unassigned,
    Spectators,
    Terrorists,
    CounterTerrorists,
}
