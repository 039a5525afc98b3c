mod sinks;

use airavata::alerts::{AlertCenter, AlertOptions};
use airavata::api::{ApiError, HotspotQuery};
use airavata::app::AppContext;
use airavata::realtime::{Channel, ConnectionState};
use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "airavata")]
#[command(about = "Airavata CLI: elephant alerts and the Airavata API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and an empty config file.
    Init {
        /// Config file path (default: AIRAVATA_CONFIG_PATH or ~/.airavata/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Sign in and store the credential.
    Login {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        #[arg(long, short)]
        email: String,

        /// Read from stdin when omitted.
        #[arg(long, short)]
        password: Option<String>,
    },

    /// Create an account and sign in with it.
    Register {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        #[arg(long, short)]
        name: String,

        #[arg(long, short)]
        email: String,

        /// Read from stdin when omitted.
        #[arg(long, short)]
        password: Option<String>,
    },

    /// Sign out and forget the stored credential.
    Logout {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Show the signed-in user.
    Whoami {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Connect to the event socket and print alerts and hotspot changes until Ctrl+C.
    Listen {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Send one event upstream over the socket.
    Emit {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Event name (e.g. location_update)
        event: String,

        /// JSON payload
        payload: String,
    },

    /// List devices.
    Devices {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// List hotspots, optionally near a point.
    Hotspots {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// LAT,LON
        #[arg(long, value_parser = parse_point)]
        near: Option<(f64, f64)>,

        /// Search radius in km (default 10)
        #[arg(long)]
        radius: Option<f64>,
    },

    /// List detection events; with --device, the latest (or --history) for one device.
    Events {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        #[arg(long, value_name = "ID")]
        device: Option<String>,

        #[arg(long, requires = "device")]
        history: bool,
    },

    /// List my notifications.
    Notifications {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        #[arg(long)]
        limit: Option<u32>,

        #[arg(long)]
        offset: Option<u32>,
    },

    /// Mark a notification as read.
    MarkRead {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        id: String,
    },
}

fn parse_point(s: &str) -> Result<(f64, f64), String> {
    let (lat, lon) = s
        .split_once(',')
        .ok_or_else(|| "expected LAT,LON".to_string())?;
    let lat: f64 = lat.trim().parse().map_err(|_| format!("bad latitude: {}", lat))?;
    let lon: f64 = lon.trim().parse().map_err(|_| format!("bad longitude: {}", lon))?;
    Ok((lat, lon))
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("airavata {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init { config }) => run_init(config),
        Some(Commands::Login { config, email, password }) => run_login(config, email, password).await,
        Some(Commands::Register { config, name, email, password }) => {
            run_register(config, name, email, password).await
        }
        Some(Commands::Logout { config }) => run_logout(config).await,
        Some(Commands::Whoami { config }) => run_whoami(config).await,
        Some(Commands::Listen { config }) => run_listen(config).await,
        Some(Commands::Emit { config, event, payload }) => run_emit(config, event, payload).await,
        Some(Commands::Devices { config }) => run_devices(config).await,
        Some(Commands::Hotspots { config, near, radius }) => run_hotspots(config, near, radius).await,
        Some(Commands::Events { config, device, history }) => run_events(config, device, history).await,
        Some(Commands::Notifications { config, limit, offset }) => {
            run_notifications(config, limit, offset).await
        }
        Some(Commands::MarkRead { config, id }) => run_mark_read(config, id).await,
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };

    if let Err(e) = result {
        if matches!(e.downcast_ref::<ApiError>(), Some(ApiError::Unauthorized)) {
            log::error!("session expired, run `airavata login` again");
        } else {
            log::error!("{:#}", e);
        }
        std::process::exit(1);
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(airavata::config::default_config_path);
    let dir = airavata::config::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

/// Load config and build the application context with terminal alert sinks.
async fn load_context(config_path: Option<PathBuf>) -> anyhow::Result<AppContext> {
    let (config, path) = airavata::config::load_config(config_path)?;
    let alerts = AlertCenter::with_sinks(
        AlertOptions::from_config(&config.alerts),
        Some(Arc::new(sinks::TerminalNotifier)),
        Some(Arc::new(sinks::BellCue::default())),
    );
    AppContext::load(config, path, alerts).await
}

async fn require_login(ctx: &AppContext) -> anyhow::Result<()> {
    if !ctx.credentials().is_authenticated().await {
        anyhow::bail!("not signed in, run `airavata login` first");
    }
    Ok(())
}

fn read_password(given: Option<String>) -> anyhow::Result<String> {
    if let Some(p) = given {
        return Ok(p);
    }
    use std::io::{self, Write};
    let mut stdout = io::stdout();
    write!(stdout, "password: ")?;
    stdout.flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line).context("reading password")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn display_name(user: &Value) -> String {
    let name = user.get("name").and_then(Value::as_str);
    let email = user.get("email").and_then(Value::as_str);
    match (name, email) {
        (Some(n), Some(e)) => format!("{} <{}>", n, e),
        (Some(n), None) => n.to_string(),
        (None, Some(e)) => e.to_string(),
        (None, None) => user.to_string(),
    }
}

fn or_dash<T: ToString>(v: Option<T>) -> String {
    v.map(|x| x.to_string()).unwrap_or_else(|| "-".to_string())
}

async fn run_login(config_path: Option<PathBuf>, email: String, password: Option<String>) -> anyhow::Result<()> {
    let ctx = load_context(config_path).await?;
    let password = read_password(password)?;
    let user = ctx.sign_in(&email, &password).await?;
    println!("signed in as {}", display_name(&user));
    Ok(())
}

async fn run_register(
    config_path: Option<PathBuf>,
    name: String,
    email: String,
    password: Option<String>,
) -> anyhow::Result<()> {
    let ctx = load_context(config_path).await?;
    let password = read_password(password)?;
    let user = ctx.sign_up(&name, &email, &password).await?;
    println!("registered and signed in as {}", display_name(&user));
    Ok(())
}

async fn run_logout(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let ctx = load_context(config_path).await?;
    ctx.logout().await;
    println!("signed out");
    Ok(())
}

async fn run_whoami(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let ctx = load_context(config_path).await?;
    require_login(&ctx).await?;
    match ctx.api().profile().await {
        Ok(user) => {
            let role = user.role.clone();
            let value = serde_json::to_value(&user)?;
            println!("{} ({})", display_name(&value), or_dash(role));
        }
        Err(ApiError::Unauthorized) => return Err(ApiError::Unauthorized.into()),
        Err(e) => {
            log::warn!("profile request failed, showing stored user: {}", e);
            if let Some(user) = ctx.credentials().user().await {
                println!("{}", display_name(&user));
            }
        }
    }
    Ok(())
}

async fn run_listen(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let ctx = load_context(config_path).await?;
    require_login(&ctx).await?;

    let hotspot_subs: Vec<_> = [Channel::HotspotCreated, Channel::HotspotUpdated, Channel::HotspotDeleted]
        .into_iter()
        .map(|channel| {
            ctx.events().on(channel, move |payload: &Value| {
                let name = payload.get("name").and_then(Value::as_str).unwrap_or("?");
                println!("[{}] {}", channel, name);
                Ok(())
            })
        })
        .collect();

    let mut state = ctx.events().subscribe_state();
    ctx.start_realtime().await;
    println!("listening for alerts on {} (Ctrl+C to stop)", ctx.events().options().base_url);

    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let now = *state.borrow_and_update();
                log::info!("connection state: {:?}", now);
                if now == ConnectionState::Disconnected {
                    eprintln!("event socket disconnected");
                    break;
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("waiting for Ctrl+C")?;
                break;
            }
        }
    }

    for s in &hotspot_subs {
        s.unsubscribe();
    }
    ctx.stop_realtime();
    Ok(())
}

async fn run_emit(config_path: Option<PathBuf>, event: String, payload: String) -> anyhow::Result<()> {
    let payload: Value = serde_json::from_str(&payload).context("payload is not valid JSON")?;
    let ctx = load_context(config_path).await?;
    require_login(&ctx).await?;
    let token = ctx.credentials().token().await.unwrap_or_default();

    let mut state = ctx.events().subscribe_state();
    ctx.events().connect(token);
    let timeout = ctx.events().options().connect_timeout;
    let connected = tokio::time::timeout(timeout, async {
        loop {
            let now = *state.borrow_and_update();
            if now == ConnectionState::Connected {
                return true;
            }
            if state.changed().await.is_err() {
                return false;
            }
        }
    })
    .await
    .unwrap_or(false);
    if !connected {
        ctx.events().disconnect();
        anyhow::bail!("could not connect to the event socket");
    }
    ctx.events().emit(&event, payload);
    // Give the connection task a moment to write the frame before closing.
    tokio::time::sleep(Duration::from_millis(100)).await;
    ctx.events().disconnect();
    println!("sent {}", event);
    Ok(())
}

async fn run_devices(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let ctx = load_context(config_path).await?;
    require_login(&ctx).await?;
    let devices = ctx.api().list_devices().await?;
    if devices.is_empty() {
        println!("no devices");
    }
    for d in devices {
        println!(
            "{}\t{}\t{}\tbattery {}\tlast seen {}",
            or_dash(d.device_id.or(d.id.map(|i| i.to_string()))),
            or_dash(d.name),
            or_dash(d.status),
            or_dash(d.battery_percentage.map(|b| format!("{:.0}%", b))),
            or_dash(d.last_seen),
        );
    }
    Ok(())
}

async fn run_hotspots(
    config_path: Option<PathBuf>,
    near: Option<(f64, f64)>,
    radius: Option<f64>,
) -> anyhow::Result<()> {
    let ctx = load_context(config_path).await?;
    require_login(&ctx).await?;
    let hotspots = match near {
        Some((lat, lon)) => ctx.api().nearby_hotspots(lat, lon, radius).await?,
        None => ctx.api().list_hotspots(&HotspotQuery::default()).await?,
    };
    if hotspots.is_empty() {
        println!("no hotspots");
    }
    for h in hotspots {
        let location = match (h.latitude, h.longitude) {
            (Some(lat), Some(lon)) => format!("{:.4}, {:.4}", lat, lon),
            _ => "-".to_string(),
        };
        println!(
            "{}\t{}\t{}\t{}\tradius {} km{}",
            or_dash(h.id),
            or_dash(h.name),
            or_dash(h.typ),
            location,
            or_dash(h.radius_km),
            if h.is_active == Some(false) { "\t(inactive)" } else { "" },
        );
    }
    Ok(())
}

fn print_event(e: &airavata::api::DetectionEvent) {
    let location = match (e.latitude, e.longitude) {
        (Some(lat), Some(lon)) => format!("{:.4}, {:.4}", lat, lon),
        _ => "-".to_string(),
    };
    println!(
        "{}\t{}\t{}\tconfidence {}",
        or_dash(e.detected_at.as_deref()),
        or_dash(e.source_device.as_deref()),
        location,
        or_dash(e.confidence.map(|c| format!("{:.2}", c))),
    );
}

async fn run_events(config_path: Option<PathBuf>, device: Option<String>, history: bool) -> anyhow::Result<()> {
    let ctx = load_context(config_path).await?;
    require_login(&ctx).await?;
    let events = match device {
        Some(id) if history => ctx.api().event_history(&id).await?,
        Some(id) => ctx.api().latest_event(&id).await?.into_iter().collect(),
        None => ctx.api().list_events().await?,
    };
    if events.is_empty() {
        println!("no events");
    }
    for e in &events {
        print_event(e);
    }
    Ok(())
}

async fn run_notifications(
    config_path: Option<PathBuf>,
    limit: Option<u32>,
    offset: Option<u32>,
) -> anyhow::Result<()> {
    let ctx = load_context(config_path).await?;
    require_login(&ctx).await?;
    let notifications = ctx.api().my_notifications(limit, offset).await?;
    if notifications.is_empty() {
        println!("no notifications");
    }
    for n in notifications {
        let marker = if n.read == Some(true) { " " } else { "*" };
        println!(
            "{} {}\t{}\t{}\t{}",
            marker,
            or_dash(n.id),
            or_dash(n.created_at),
            or_dash(n.title),
            or_dash(n.body),
        );
    }
    Ok(())
}

async fn run_mark_read(config_path: Option<PathBuf>, id: String) -> anyhow::Result<()> {
    let ctx = load_context(config_path).await?;
    require_login(&ctx).await?;
    ctx.api().mark_notification_read(&id).await?;
    println!("marked {} as read", id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_parsing() {
        assert_eq!(parse_point("11.5, 76.25").unwrap(), (11.5, 76.25));
        assert!(parse_point("11.5").is_err());
        assert!(parse_point("north,76").is_err());
    }

    #[test]
    fn user_display() {
        let user = serde_json::json!({"name": "Asha", "email": "asha@example.org"});
        assert_eq!(display_name(&user), "Asha <asha@example.org>");
        assert_eq!(display_name(&serde_json::json!({"email": "x@y"})), "x@y");
    }
}
