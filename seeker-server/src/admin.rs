//! Line-oriented operator command surface.
//!
//! One vocabulary per component kind (`names`, `intrin`, `status`,
//! `reqstat`, `reset`, `resetsocket`, `shutdown`, `restart`, `send`) plus
//! activity and scheduler controls, served on a local TCP port. The command
//! handler itself is synchronous-in/synchronous-out so it is testable
//! without a socket.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use seeker_contracts::{ComponentContract, ControlCommand, MessageCode};
use seeker_model::ActivityId;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::activity::ActivityHandle;
use crate::errors::AppResult;
use crate::manager::ComponentManager;
use crate::proxy::ManagedProxy;
use crate::site::Site;

/// Everything the command handler can reach.
#[derive(Clone)]
pub struct AdminContext {
    pub site: Arc<Site>,
    pub current_activity: Arc<Mutex<Option<ActivityHandle>>>,
    pub scheduler_stop: watch::Sender<bool>,
}

impl std::fmt::Debug for AdminContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminContext").finish_non_exhaustive()
    }
}

/// Outcome of one command line.
#[derive(Debug, Clone, PartialEq)]
pub enum AdminResponse {
    Text(String),
    Quit,
}

const HELP: &str = "\
commands:
  <kind> names                     list connected components
  <kind> intrin [name|all]         cached intrinsics
  <kind> status [name|all]         cached status
  <kind> reqstat                   request fresh status from all
  <kind> resetsocket <name|all>    drop connections
  <kind> shutdown <name|all>       ask components to exit
  <kind> send <name> <raw...>      send a raw text command
  dx missing                       expected detectors not connected
  control restart <component>      restart via the component controller
  act status                       current activity
  act stop                         stop the current activity
  sched stop                       stop scheduling new activities
  help | quit
kinds: tscope ifc tsig dx archiver chan control";

pub async fn handle_command(ctx: &AdminContext, line: &str) -> AdminResponse {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some(&first) = tokens.first() else {
        return AdminResponse::Text(String::new());
    };

    match first {
        "quit" | "exit" => AdminResponse::Quit,
        "help" => AdminResponse::Text(HELP.to_string()),
        "act" => activity_command(ctx, &tokens[1..]),
        "sched" => scheduler_command(ctx, &tokens[1..]),
        "tscope" => kind_command(&ctx.site.telescopes, &tokens[1..]).await,
        "ifc" => kind_command(&ctx.site.if_chains, &tokens[1..]).await,
        "tsig" => kind_command(&ctx.site.test_signals, &tokens[1..]).await,
        "dx" => {
            if tokens.get(1) == Some(&"missing") {
                let missing = ctx.site.missing_detectors();
                AdminResponse::Text(if missing.is_empty() {
                    "<none>".to_string()
                } else {
                    missing.join(" ")
                })
            } else {
                kind_command(&ctx.site.detectors, &tokens[1..]).await
            }
        }
        "archiver" => kind_command(&ctx.site.archivers, &tokens[1..]).await,
        "chan" => kind_command(&ctx.site.channelizers, &tokens[1..]).await,
        "control" => control_command(ctx, &tokens[1..]).await,
        other => AdminResponse::Text(format!("unknown command '{other}'; try 'help'")),
    }
}

fn activity_command(ctx: &AdminContext, args: &[&str]) -> AdminResponse {
    match args.first().copied() {
        Some("status") | None => {
            let current = ctx.current_activity.lock();
            match current.as_ref() {
                Some(handle) => AdminResponse::Text(format!(
                    "activity {} running",
                    handle.activity_id
                )),
                None => AdminResponse::Text("no activity running".to_string()),
            }
        }
        Some("stop") => {
            let current = ctx.current_activity.lock();
            match current.as_ref() {
                Some(handle) => {
                    handle.stop();
                    AdminResponse::Text(format!(
                        "stop requested for activity {}",
                        handle.activity_id
                    ))
                }
                None => AdminResponse::Text("no activity running".to_string()),
            }
        }
        Some(other) => AdminResponse::Text(format!("unknown act subcommand '{other}'")),
    }
}

fn scheduler_command(ctx: &AdminContext, args: &[&str]) -> AdminResponse {
    match args.first().copied() {
        Some("stop") => {
            let _ = ctx.scheduler_stop.send(true);
            AdminResponse::Text("scheduler stopping".to_string())
        }
        Some(other) => AdminResponse::Text(format!("unknown sched subcommand '{other}'")),
        None => AdminResponse::Text("sched stop".to_string()),
    }
}

async fn control_command(ctx: &AdminContext, args: &[&str]) -> AdminResponse {
    if let Some(&"restart") = args.first() {
        let Some(component) = args.get(1) else {
            return AdminResponse::Text("usage: control restart <component>".to_string());
        };
        let controllers = ctx.site.controls.proxy_list();
        if controllers.is_empty() {
            return AdminResponse::Text("no component controller connected".to_string());
        }
        for controller in &controllers {
            if let Err(err) = controller
                .command(&ControlCommand::Restart {
                    component: (*component).to_string(),
                })
                .await
            {
                return AdminResponse::Text(format!("restart failed: {err}"));
            }
        }
        return AdminResponse::Text(format!("restart sent for {component}"));
    }
    kind_command(&ctx.site.controls, args).await
}

async fn kind_command<P: ManagedProxy>(
    manager: &ComponentManager<P>,
    args: &[&str],
) -> AdminResponse {
    let Some(&verb) = args.first() else {
        return AdminResponse::Text(format!(
            "{}: {} connected",
            manager.manager_name(),
            manager.number_of_proxies()
        ));
    };

    let text = match verb {
        "names" => {
            let names = manager.names_of_proxies();
            if names.is_empty() {
                "<none>".to_string()
            } else {
                names
            }
        }
        "intrin" => render_selected(manager, args.get(1).copied(), |proxy| {
            match proxy.cached_intrinsics() {
                Some(intrinsics) => format!(
                    "{}: version {} host {} ({})",
                    intrinsics.name,
                    intrinsics.interface_version,
                    intrinsics.host,
                    intrinsics.capabilities
                ),
                None => format!("{}: no intrinsics cached", proxy.name()),
            }
        }),
        "status" => render_selected(manager, args.get(1).copied(), |proxy| {
            match proxy.cached_status() {
                Some(status) => format!("{}: {}", status.name, status.detail),
                None => format!("{}: no status cached", proxy.name()),
            }
        }),
        "reqstat" => {
            for proxy in manager.proxy_list() {
                if let Err(err) = proxy.request_status().await {
                    warn!(component = %proxy.name(), %err, "reqstat failed");
                }
            }
            "status requested".to_string()
        }
        "resetsocket" => {
            for proxy in select(manager, args.get(1).copied()) {
                proxy.reset_socket().await;
            }
            "socket reset".to_string()
        }
        "shutdown" => {
            for proxy in select(manager, args.get(1).copied()) {
                proxy.shutdown().await;
            }
            "shutdown sent".to_string()
        }
        "send" => {
            let Some(name) = args.get(1) else {
                return AdminResponse::Text("usage: <kind> send <name> <raw...>".to_string());
            };
            let raw = args[2..].join(" ");
            match manager.find_by_name(name) {
                Some(proxy) => {
                    match proxy
                        .send_command(
                            MessageCode::Message,
                            ActivityId::NONE,
                            Bytes::from(raw.into_bytes()),
                        )
                        .await
                    {
                        Ok(()) => "sent".to_string(),
                        Err(err) => format!("send failed: {err}"),
                    }
                }
                None => format!("no component named '{name}'"),
            }
        }
        other => format!("unknown subcommand '{other}'; try 'help'"),
    };
    AdminResponse::Text(text)
}

fn select<P: ManagedProxy>(manager: &ComponentManager<P>, which: Option<&str>) -> Vec<P> {
    match which {
        None | Some("all") => manager.proxy_list(),
        Some(name) => manager.find_by_name(name).into_iter().collect(),
    }
}

fn render_selected<P: ManagedProxy>(
    manager: &ComponentManager<P>,
    which: Option<&str>,
    render: impl Fn(&P) -> String,
) -> String {
    let selected = select(manager, which);
    if selected.is_empty() {
        return "<none>".to_string();
    }
    selected
        .iter()
        .map(|proxy| render(proxy))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Serve the command surface on a local TCP port until the process exits.
pub async fn serve(ctx: AdminContext, port: u16) -> AppResult<()> {
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    info!(port, "admin surface listening");

    tokio::spawn(async move {
        loop {
            let Ok((stream, peer)) = listener.accept().await else {
                continue;
            };
            info!(%peer, "admin session opened");
            let ctx = ctx.clone();
            tokio::spawn(async move {
                let (read_half, mut write_half) = stream.into_split();
                let mut lines = BufReader::new(read_half).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    match handle_command(&ctx, &line).await {
                        AdminResponse::Text(text) => {
                            let _ = write_half.write_all(text.as_bytes()).await;
                            let _ = write_half.write_all(b"\n").await;
                        }
                        AdminResponse::Quit => break,
                    }
                }
            });
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use seeker_config::SeekerConfig;
    use seeker_core::ExpectedTopology;
    use tokio::sync::mpsc;

    async fn context() -> AdminContext {
        let mut config = SeekerConfig::default();
        config.database.use_database = false;
        let topology = ExpectedTopology::parse(
            "seeker expected components v1.0\n\
             Site main IfChainList ifc1\n\
             IfChain ifc1 BeamList beam1\n\
             Beam beam1 DetectorList dx1\n",
        )
        .unwrap();
        let site = Arc::new(Site::new(&config, topology).await.unwrap());
        let (scheduler_stop, _) = watch::channel(false);
        AdminContext {
            site,
            current_activity: Arc::new(Mutex::new(None)),
            scheduler_stop,
        }
    }

    #[tokio::test]
    async fn empty_registries_answer_politely() {
        let ctx = context().await;
        assert_eq!(
            handle_command(&ctx, "dx names").await,
            AdminResponse::Text("<none>".to_string())
        );
        assert_eq!(
            handle_command(&ctx, "dx status all").await,
            AdminResponse::Text("<none>".to_string())
        );
        assert_eq!(
            handle_command(&ctx, "act status").await,
            AdminResponse::Text("no activity running".to_string())
        );
        // The whole expected pool is missing while nothing is connected.
        assert_eq!(
            handle_command(&ctx, "dx missing").await,
            AdminResponse::Text("dx1".to_string())
        );
    }

    #[tokio::test]
    async fn unknown_commands_point_to_help() {
        let ctx = context().await;
        match handle_command(&ctx, "warp 9").await {
            AdminResponse::Text(text) => assert!(text.contains("unknown command")),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(handle_command(&ctx, "quit").await, AdminResponse::Quit);
    }

    #[tokio::test]
    async fn act_stop_reaches_the_running_activity() {
        let ctx = context().await;
        let (events, mut events_rx) = mpsc::unbounded_channel();
        *ctx.current_activity.lock() = Some(ActivityHandle {
            activity_id: ActivityId(7),
            events,
        });

        match handle_command(&ctx, "act stop").await {
            AdminResponse::Text(text) => assert!(text.contains("activity 7")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            events_rx.try_recv(),
            Ok(crate::activity::ActivityEvent::Stop)
        ));
    }

    #[tokio::test]
    async fn sched_stop_flips_the_watch() {
        let ctx = context().await;
        let mut rx = ctx.scheduler_stop.subscribe();
        handle_command(&ctx, "sched stop").await;
        assert!(*rx.borrow_and_update());
    }
}
