mod common;

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use common::*;
use csgo_demofile::{
    common::Team,
    events::{HeaderParsed, PlayerConnected, TickDone, HEADER_PARSED, PLAYER_CONNECTED, TICK_DONE},
    header::Header,
    netmessage::{
        CMsgCVars, CVar, CnetMsgSetConVar, CsvcMsgPacketEntities, CsvcMsgServerInfo, MessageType,
    },
    ErrorKind, Parser, ParserError,
};
use custom_bitreader::BitWriter;
use prost::Message;
use proptest::prelude::*;

fn counter(p: &mut Parser, event: &'static str) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    match event {
        TICK_DONE => p.dispatcher_mut().on(event, move |_: TickDone| {
            c.fetch_add(1, Ordering::SeqCst);
        }),
        HEADER_PARSED => p.dispatcher_mut().on(event, move |_: HeaderParsed| {
            c.fetch_add(1, Ordering::SeqCst);
        }),
        _ => p.dispatcher_mut().on(event, move |_: PlayerConnected| {
            c.fetch_add(1, Ordering::SeqCst);
        }),
    };
    count
}

fn run(bytes: Vec<u8>) -> Result<Parser, ParserError> {
    let mut p = Parser::new(bytes);
    p.parse_header()?;
    p.parse_to_end(None)?;
    Ok(p)
}

#[test]
fn end_to_end_notifications() {
    let mut p = Parser::new(match_demo());
    let headers = counter(&mut p, HEADER_PARSED);
    let ticks = counter(&mut p, TICK_DONE);
    let names = Arc::new(Mutex::new(Vec::new()));
    {
        let names = Arc::clone(&names);
        p.dispatcher_mut()
            .on(PLAYER_CONNECTED, move |e: PlayerConnected| {
                names.lock().unwrap().push((e.player.name, e.player.steam_id));
            });
    }

    assert_eq!(p.parse_header().unwrap().map, "de_nuke");
    let mut advanced = 0;
    while p.parse_next_tick().unwrap() {
        advanced += 1;
    }

    assert_eq!(advanced, 4);
    // Stop is read and counted but emits no tick_done.
    assert_eq!(p.current_tick(), 5);
    assert_eq!(headers.load(Ordering::SeqCst), 1);
    assert_eq!(ticks.load(Ordering::SeqCst), 4);
    assert_eq!(
        *names.lock().unwrap(),
        vec![("s1mple".to_string(), 76561198034202275)]
    );
    assert!(p.is_finished());

    let err = p.parse_next_tick().unwrap_err();
    assert!(matches!(err, ParserError::StreamClosed));
    assert_eq!(err.kind(), ErrorKind::Precedence);
}

#[test]
fn players_and_teams_are_reconstructed() {
    let p = run(match_demo()).unwrap();
    let state = p.game_state();

    assert_eq!(state.ct_state.id, 3);
    assert_eq!(state.ct_state.clan_name, "Natus Vincere");
    assert_eq!(state.ct_state.flag, "UA");
    assert_eq!(state.ct_state.score, 16);
    assert_eq!(state.t_state.id, -1);

    let pl = state.player(0).unwrap();
    assert_eq!(pl.entity_id, 1);
    assert_eq!(pl.name, "s1mple");
    assert_eq!(pl.steam_id, 76561198034202275);
    assert_eq!(pl.hp, 100);
    assert_eq!(pl.team_id, 3);
    // The team entity came after the player and fixed up its side.
    assert_eq!(pl.team, Team::CounterTerrorists);
    assert!(state.is_connected(0));
    assert_eq!(state.active_players().count(), 1);

    assert_eq!(p.server_classes().len(), 3);
    let team = p.entity(10).unwrap();
    assert_eq!(team.props[TEAM_NAME].as_str(), Some("CT"));
}

#[test]
fn header_is_exposed_after_parsing() {
    let mut p = Parser::new(match_demo());
    assert!(p.header().is_none());
    p.parse_header().unwrap();
    assert_eq!(p.header(), Some(&sample_header()));
    // ticks / duration
    assert_eq!(p.tick_rate(), 128.0);

    assert!(matches!(
        p.parse_header(),
        Err(ParserError::HeaderAlreadyParsed)
    ));
}

#[test]
fn bad_signature_leaves_no_state() {
    let header = Header {
        demo_type: "PBDEMS2".to_string(),
        ..sample_header()
    };
    let bytes = DemoBuilder::with_header(&header).synctick().stop().build();
    let mut p = Parser::new(bytes);
    let headers = counter(&mut p, HEADER_PARSED);

    let err = p.parse_header().unwrap_err();
    assert!(matches!(err, ParserError::InvalidSignature(ref s) if s == "PBDEMS2"));
    assert_eq!(err.kind(), ErrorKind::Format);
    assert!(p.header().is_none());
    assert_eq!(headers.load(Ordering::SeqCst), 0);
    assert!(matches!(p.parse_next_tick(), Err(ParserError::Poisoned)));
}

#[test]
fn truncated_header() {
    let mut p = Parser::new(vec![b'H', b'L', b'2']);
    assert_eq!(p.parse_header().unwrap_err().kind(), ErrorKind::Format);
}

#[test]
fn tick_before_header() {
    let mut p = Parser::new(match_demo());
    let err = p.parse_next_tick().unwrap_err();
    assert!(matches!(err, ParserError::HeaderNotParsed));
    assert_eq!(err.kind(), ErrorKind::Precedence);

    // The misuse is reported without consuming anything.
    p.parse_header().unwrap();
    assert!(p.parse_next_tick().unwrap());
}

#[test]
fn unknown_command_poisons_the_parser() {
    let bytes = DemoBuilder::new().synctick().command(8).synctick().stop().build();
    let mut p = Parser::new(bytes);
    p.parse_header().unwrap();
    assert!(p.parse_next_tick().unwrap());

    let err = p.parse_next_tick().unwrap_err();
    assert!(matches!(err, ParserError::UnknownCommand(8)));
    assert_eq!(err.kind(), ErrorKind::Format);
    assert!(matches!(p.parse_next_tick(), Err(ParserError::Poisoned)));
    assert_eq!(p.current_tick(), 2);
}

#[test]
fn negative_region_length() {
    let bytes = DemoBuilder::new()
        .command(CONSOLE_COMMAND)
        .raw(&(-5_i32).to_le_bytes())
        .build();
    let err = run(bytes).err().unwrap();
    assert!(matches!(err, ParserError::InvalidLength(-5)));
}

#[test]
fn truncated_stream_is_a_format_error() {
    let mut bytes = match_demo();
    bytes.truncate(bytes.len() - 20);
    let err = run(bytes).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Format);
}

#[test]
fn regions_are_skipped_whole() {
    let bytes = DemoBuilder::new()
        .console_command(b"say gl hf\0\x07\x07\x07")
        .user_command(&[7; 37])
        .synctick()
        .stop()
        .build();
    let p = run(bytes).unwrap();
    assert_eq!(p.current_tick(), 4);
    assert_eq!(p.ingame_tick(), 3);
}

#[test]
fn cancellation_stops_at_a_tick_boundary() {
    let mut builder = DemoBuilder::new();
    for _ in 0..10 {
        builder.synctick();
    }
    let mut p = Parser::new(builder.stop().build());
    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        let seen = AtomicUsize::new(0);
        p.dispatcher_mut().on(TICK_DONE, move |_: TickDone| {
            if seen.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                cancel.store(true, Ordering::SeqCst);
            }
        });
    }

    p.parse_header().unwrap();
    let err = p.parse_to_end(Some(&*cancel)).unwrap_err();
    assert!(matches!(err, ParserError::Cancelled));
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(p.current_tick(), 3);
    assert!(matches!(p.parse_next_tick(), Err(ParserError::Poisoned)));
}

#[test]
fn non_numeric_userinfo_slot() {
    let bytes = DemoBuilder::new()
        .data_tables(&schema())
        .string_tables(&userinfo_tables(&[("abc", player_info("ropz", 1))]))
        .stop()
        .build();
    let err = run(bytes).err().unwrap();
    assert!(matches!(err, ParserError::SlotIdParse(ref s) if s == "abc"));
    assert_eq!(err.kind(), ErrorKind::ProtocolAssumption);
}

#[test]
fn bots_are_never_announced() {
    let mut entities = EntityData::new();
    entities.enter(1, CLASS_PLAYER, &[(PLAYER_HEALTH, Field::Int(100, 8))]);
    let bytes = DemoBuilder::new()
        .data_tables(&schema())
        .string_tables(&userinfo_tables(&[(
            "0",
            csgo_demofile::player::PlayerInfo {
                name: "BOT Ted".to_string(),
                is_fake_player: true,
                ..Default::default()
            },
        )]))
        .packet(&[entities.message()])
        .stop()
        .build();

    let mut p = Parser::new(bytes);
    let connected = counter(&mut p, PLAYER_CONNECTED);
    p.parse_header().unwrap();
    p.parse_to_end(None).unwrap();

    assert_eq!(connected.load(Ordering::SeqCst), 0);
    let bot = p.game_state().player(0).unwrap();
    assert!(bot.is_bot);
    assert_eq!(bot.name, "BOT Ted");
}

#[test]
fn unexpected_team_name() {
    let mut entities = EntityData::new();
    entities.enter(11, CLASS_TEAM, &[(TEAM_NAME, Field::Str("Zombies"))]);
    let bytes = DemoBuilder::new()
        .data_tables(&schema())
        .packet(&[entities.message()])
        .stop()
        .build();

    let err = run(bytes).err().unwrap();
    assert!(matches!(err, ParserError::UnexpectedTeam(ref t) if t == "Zombies"));
    assert_eq!(err.kind(), ErrorKind::ProtocolAssumption);
}

#[test]
fn entity_lifecycle() {
    let mut first = EntityData::new();
    first.enter(1, CLASS_PLAYER, &[(PLAYER_HEALTH, Field::Int(100, 8))]);
    let mut second = EntityData::new();
    second.update(1, &[(PLAYER_HEALTH, Field::Int(0, 8))]);
    let mut third = EntityData::new();
    third.delete(1);

    let bytes = DemoBuilder::new()
        .data_tables(&schema())
        .packet(&[first.message()])
        .packet(&[second.message()])
        .packet(&[third.message()])
        .stop()
        .build();

    let mut p = Parser::new(bytes);
    p.parse_header().unwrap();
    for _ in 0..2 {
        p.parse_next_tick().unwrap();
    }
    assert_eq!(p.game_state().player(0).unwrap().hp, 100);
    p.parse_next_tick().unwrap();
    assert_eq!(p.game_state().player(0).unwrap().hp, 0);
    assert!(!p.game_state().player(0).unwrap().is_alive());
    p.parse_next_tick().unwrap();
    assert!(p.entity(1).is_none());
    // Players outlive their entity.
    assert!(p.game_state().player(0).is_some());
    assert!(!p.parse_next_tick().unwrap());
}

#[test]
fn update_for_unknown_entity() {
    let mut entities = EntityData::new();
    entities.update(5, &[(PLAYER_HEALTH, Field::Int(1, 8))]);
    let bytes = DemoBuilder::new()
        .data_tables(&schema())
        .packet(&[entities.message()])
        .stop()
        .build();

    let err = run(bytes).err().unwrap();
    assert!(matches!(err, ParserError::UnknownEntity(5)));
}

fn entity_gap(gap: u32) -> (MessageType, Vec<u8>) {
    let mut w = BitWriter::new();
    w.write_ubitint(gap);
    w.write_int(0, 2);
    let msg = CsvcMsgPacketEntities {
        max_entries: Some(2048),
        updated_entries: Some(1),
        is_delta: Some(false),
        entity_data: Some(w.into_bytes()),
        ..Default::default()
    };
    (MessageType::PacketEntities, msg.encode_to_vec())
}

#[test]
fn entity_index_past_the_table() {
    for gap in [i32::MAX as u32, u32::MAX, 2048] {
        let bytes = DemoBuilder::new()
            .data_tables(&schema())
            .packet(&[entity_gap(gap)])
            .stop()
            .build();

        let err = run(bytes).err().unwrap();
        assert!(
            matches!(err, ParserError::EntityIndexOutOfRange(i) if i == i64::from(gap)),
            "{err}"
        );
        assert_eq!(err.kind(), ErrorKind::Format);
    }
}

#[test]
fn server_messages_and_skipped_ones() {
    let convars = CnetMsgSetConVar {
        convars: Some(CMsgCVars {
            cvars: vec![
                CVar {
                    name: "mp_roundtime".to_string(),
                    value: "1.92".to_string(),
                    dictionary_name: None,
                },
                CVar {
                    name: "mp_freezetime".to_string(),
                    value: "20".to_string(),
                    dictionary_name: None,
                },
            ],
        }),
    };
    let info = CsvcMsgServerInfo {
        tick_interval: Some(1.0 / 64.0),
        map_name: Some("de_nuke".to_string()),
        ..Default::default()
    };

    let bytes = DemoBuilder::new()
        .packet(&[
            (MessageType::Other(4), vec![0xde, 0xad, 0xbe, 0xef]),
            (MessageType::SetConVar, convars.encode_to_vec()),
            (MessageType::ServerInfo, info.encode_to_vec()),
        ])
        .stop()
        .build();

    let p = run(bytes).unwrap();
    assert_eq!(p.tick_rate(), 64.0);
    assert_eq!(p.server_convars()["mp_roundtime"], "1.92");
    assert_eq!(p.server_convars()["mp_freezetime"], "20");
}

#[test]
fn repeated_data_tables_are_ignored() {
    let bytes = DemoBuilder::new()
        .data_tables(&schema())
        .data_tables(&[0xff; 16])
        .stop()
        .build();
    let p = run(bytes).unwrap();
    assert_eq!(p.current_tick(), 3);
    assert_eq!(p.server_classes().len(), 3);
    assert_eq!(p.server_classes().class_bits(), CLASS_BITS);
}

#[test]
fn headerless_stream() {
    let bytes = DemoBuilder::headerless().synctick().stop().build();
    let mut p = Parser::new(bytes);
    assert!(p.parse_header().is_err());
}

proptest! {
    #[test]
    fn tick_counter_counts_every_command(
        commands in prop::collection::vec((0_u8..3, prop::collection::vec(any::<u8>(), 0..24)), 0..40)
    ) {
        let mut builder = DemoBuilder::new();
        for (kind, payload) in commands.iter() {
            match kind {
                0 => builder.synctick(),
                1 => builder.console_command(payload),
                _ => builder.user_command(payload),
            };
        }

        let mut p = Parser::new(builder.stop().build());
        let ticks = counter(&mut p, TICK_DONE);
        p.parse_header().unwrap();

        let mut expected = 0;
        while p.parse_next_tick().unwrap() {
            expected += 1;
            prop_assert_eq!(p.current_tick(), expected);
        }
        prop_assert_eq!(expected, commands.len());
        prop_assert_eq!(p.current_tick(), commands.len() + 1);
        prop_assert_eq!(ticks.load(Ordering::SeqCst), commands.len());
    }
}
