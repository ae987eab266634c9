use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use csgo_demofile::{
    events::{PlayerConnected, PLAYER_CONNECTED},
    Parser,
};
use log::{error, info, warn};
use parking_lot::Mutex;
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::new().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let path: PathBuf = match std::env::args_os().nth(1) {
        Some(path) => path.into(),
        None => {
            eprintln!("usage: demoinfo <demo.dem>");
            std::process::exit(2);
        }
    };

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping after the current tick");
                cancel.store(true, Ordering::Relaxed);
            }
        });
    }

    let connected = Arc::new(Mutex::new(Vec::new()));
    let s = Instant::now();

    let summary = {
        let connected = Arc::clone(&connected);
        tokio::task::spawn_blocking(move || -> csgo_demofile::Result<serde_json::Value> {
            let mut p = Parser::from_file(&path)?;
            p.dispatcher_mut()
                .on(PLAYER_CONNECTED, move |e: PlayerConnected| {
                    connected.lock().push(e.player.name);
                });

            p.parse_header()?;
            p.parse_to_end(Some(&*cancel))?;

            let state = p.game_state();
            Ok(json!({
                "header": p.header(),
                "ticks": p.current_tick(),
                "tick_rate": p.tick_rate(),
                "players": state.active_players().collect::<Vec<_>>(),
                "ct": state.ct_state,
                "t": state.t_state,
                "convars": p.server_convars(),
            }))
        })
        .await?
    };

    match summary {
        Ok(summary) => {
            let names = connected.lock();
            info!(
                "parsed in {:?}, {} players connected: {:?}",
                s.elapsed(),
                names.len(),
                *names
            );
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Err(e) => {
            error!("{e} ({:?})", e.kind());
            Err(e.into())
        }
    }
}
