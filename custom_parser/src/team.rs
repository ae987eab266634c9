use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    common::Team,
    error::Result,
    serverclass::ServerClasses,
    subscription::{BindingContext, PropertyUpdate, Subscriptions},
    ParserError,
};

const TEAM_NAME_UNASSIGNED: &str = "Unassigned";
const TEAM_NAME_SPECTATOR: &str = "Spectator";
const TEAM_NAME_TERRORIST: &str = "TERRORIST";
const TEAM_NAME_CT: &str = "CT";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamState {
    pub id: i32,
    pub clan_name: String,
    pub flag: String,
    pub score: i32,
}

impl Default for TeamState {
    fn default() -> Self {
        Self {
            id: -1,
            clan_name: String::new(),
            flag: String::new(),
            score: 0,
        }
    }
}

/// Values a team entity sent before its name told which side it is.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTeam {
    pub id: i32,
    pub clan_name: String,
    pub flag: String,
    pub score: i32,
    pub bound: Option<Team>,
}

impl Default for PendingTeam {
    fn default() -> Self {
        Self {
            id: -1,
            clan_name: String::new(),
            flag: String::new(),
            score: 0,
            bound: None,
        }
    }
}

pub(crate) fn bind_team_states(classes: &ServerClasses, subs: &mut Subscriptions) {
    match classes.find_by_name("CCSTeam") {
        Some(idx) => subs.on_created(idx, bind_team),
        None => debug!("no CCSTeam class, team states stay unbound"),
    }
}

fn pending<'s>(ctx: &'s mut BindingContext<'_>, u: &PropertyUpdate<'_>) -> &'s mut PendingTeam {
    ctx.state.pending_teams.entry(u.entity_id).or_default()
}

fn bind_team(ctx: &mut BindingContext<'_>) -> Result<()> {
    ctx.state
        .pending_teams
        .insert(ctx.entity_id, PendingTeam::default());

    ctx.on_update("m_iTeamNum", |ctx, u| {
        pending(ctx, u).id = u.int()?;
        Ok(())
    });
    ctx.on_update("m_szClanTeamname", |ctx, u| {
        pending(ctx, u).clan_name = u.string()?.to_string();
        Ok(())
    });
    ctx.on_update("m_szTeamFlagImage", |ctx, u| {
        pending(ctx, u).flag = u.string()?.to_string();
        Ok(())
    });
    ctx.on_update("m_scoreTotal", |ctx, u| {
        pending(ctx, u).score = u.int()?;
        Ok(())
    });

    ctx.on_update("m_szTeamname", resolve_team);
    Ok(())
}

fn resolve_team(ctx: &mut BindingContext<'_>, u: &PropertyUpdate<'_>) -> Result<()> {
    let team = match u.string()? {
        TEAM_NAME_CT => Team::CounterTerrorists,
        TEAM_NAME_TERRORIST => Team::Terrorists,
        TEAM_NAME_UNASSIGNED | TEAM_NAME_SPECTATOR => return Ok(()),
        other => return Err(ParserError::UnexpectedTeam(other.to_string())),
    };

    let snapshot = pending(ctx, u).clone();
    if let Some(s) = ctx.state.team_state_mut(team) {
        s.id = snapshot.id;
        s.clan_name = snapshot.clan_name.clone();
        s.flag = snapshot.flag.clone();
        s.score = snapshot.score;
    }
    debug!("team entity {} is {team:?} (id {})", u.entity_id, snapshot.id);

    match snapshot.bound {
        None => {
            pending(ctx, u).bound = Some(team);
            bind_team_side(ctx, team);
        }
        Some(bound) if bound != team => {
            warn!("team entity {} switched from {bound:?} to {team:?}", u.entity_id);
        }
        Some(_) => {}
    }

    if snapshot.id != -1 {
        for pl in ctx.state.players.iter_mut().flatten() {
            if pl.team_id == snapshot.id {
                pl.team = team;
            }
        }
    }
    Ok(())
}

/// Later updates go straight to the resolved side.
fn bind_team_side(ctx: &mut BindingContext<'_>, team: Team) {
    ctx.on_update("m_iTeamNum", move |ctx, u| {
        if let Some(s) = ctx.state.team_state_mut(team) {
            s.id = u.int()?;
        }
        Ok(())
    });
    ctx.on_update("m_szClanTeamname", move |ctx, u| {
        if let Some(s) = ctx.state.team_state_mut(team) {
            s.clan_name = u.string()?.to_string();
        }
        Ok(())
    });
    ctx.on_update("m_szTeamFlagImage", move |ctx, u| {
        if let Some(s) = ctx.state.team_state_mut(team) {
            s.flag = u.string()?.to_string();
        }
        Ok(())
    });
    ctx.on_update("m_scoreTotal", move |ctx, u| {
        if let Some(s) = ctx.state.team_state_mut(team) {
            s.score = u.int()?;
        }
        Ok(())
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        entity::PropertyValue,
        player::Player,
        sendtable::SendTableProperty,
        serverclass::{FlattenedPropEntry, ServerClass},
        state::GameState,
    };

    const PROPS: [&str; 5] = [
        "m_iTeamNum",
        "m_szClanTeamname",
        "m_szTeamFlagImage",
        "m_scoreTotal",
        "m_szTeamname",
    ];

    fn team_class() -> ServerClass {
        ServerClass {
            name: "CCSTeam".to_string(),
            flattened_props: PROPS
                .iter()
                .map(|name| FlattenedPropEntry {
                    prop: SendTableProperty::default(),
                    array_elem_prop: None,
                    name: name.to_string(),
                })
                .collect(),
            prop_name_to_idx: PROPS
                .iter()
                .enumerate()
                .map(|(i, n)| (n.to_string(), i))
                .collect(),
            ..Default::default()
        }
    }

    fn string(s: &str) -> PropertyValue {
        PropertyValue::String(s.to_string())
    }

    #[test]
    fn buffered_values_land_on_resolved_side() {
        let class = team_class();
        let mut state = GameState::new();
        let mut pl = Player::new(1);
        pl.team_id = 3;
        state.players[0] = Some(pl);
        let mut subs = Subscriptions::default();

        let mut ctx = BindingContext::new(&mut state, &mut subs, &class, 0, 40);
        bind_team(&mut ctx).unwrap();
        ctx.dispatch(0, &PropertyValue::Integer(3)).unwrap();
        ctx.dispatch(1, &string("Natus Vincere")).unwrap();
        ctx.dispatch(3, &PropertyValue::Integer(7)).unwrap();
        ctx.dispatch(4, &string("CT")).unwrap();
        // Direct subscription from here on.
        ctx.dispatch(3, &PropertyValue::Integer(8)).unwrap();
        ctx.dispatch(4, &string("CT")).unwrap();

        assert_eq!(state.ct_state.id, 3);
        assert_eq!(state.ct_state.clan_name, "Natus Vincere");
        assert_eq!(state.ct_state.score, 8);
        assert_eq!(state.t_state, TeamState::default());
        assert_eq!(state.player(0).unwrap().team, Team::CounterTerrorists);
        // One set of direct handlers, not two.
        assert_eq!(subs.update_count(40, 3), 2);
    }

    #[test]
    fn ignored_and_unexpected_names() {
        let class = team_class();
        let mut state = GameState::new();
        let mut subs = Subscriptions::default();

        let mut ctx = BindingContext::new(&mut state, &mut subs, &class, 0, 41);
        bind_team(&mut ctx).unwrap();
        ctx.dispatch(4, &string("Spectator")).unwrap();
        ctx.dispatch(4, &string("Unassigned")).unwrap();
        let err = ctx.dispatch(4, &string("Zombies")).unwrap_err();
        assert!(matches!(err, ParserError::UnexpectedTeam(t) if t == "Zombies"));
        assert_eq!(state.ct_state.id, -1);
    }
}
