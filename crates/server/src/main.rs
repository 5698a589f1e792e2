mod config;
mod events;
mod server;
mod tui;

use std::io;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

use config::ServerConfig;
use events::ServerEvent;
use server::GameServer;
use tui::{DashboardStats, TuiState};

#[derive(Parser)]
#[command(name = "trellis-server")]
#[command(about = "Authoritative scene-graph server")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = trellis::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = 60)]
    tick_rate: u32,

    #[arg(long)]
    headless: bool,

    #[arg(long, help = "Do not spawn the orbiting demo scene")]
    no_demo: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let bind_addr = format!("{}:{}", args.bind, args.port);

    let config = ServerConfig {
        tick_rate: args.tick_rate,
        spawn_demo_scene: !args.no_demo,
        ..Default::default()
    };

    let mut server = GameServer::new(&bind_addr, config)?;

    if args.headless {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
        log::info!("server started on {:?}", server.local_addr());
        server.run();
        log::info!("server shutting down");
    } else {
        run_with_tui(&mut server)?;
    }

    Ok(())
}

fn run_with_tui(server: &mut GameServer) -> io::Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let running = server.running();
    let started = Instant::now();
    let mut tui_state = TuiState::new();

    if let Some(addr) = server.local_addr() {
        tui_state.log(format!("Server started on {addr}"));
    }

    while running.load(Ordering::SeqCst) {
        server.tick_once();

        for event in server.drain_events() {
            match event {
                ServerEvent::ClientConnected { client_id } => {
                    tui_state.log(format!("Client {client_id} connected"));
                }
                ServerEvent::ClientIdentified { client_id, name } => {
                    tui_state.log(format!("Client {client_id} identifies as '{name}'"));
                }
                ServerEvent::ClientDisconnected { client_id } => {
                    tui_state.log(format!("Client {client_id} disconnected"));
                }
                ServerEvent::Chat { name, text, .. } => {
                    tui_state.log(format!("<{name}> {text}"));
                }
            }
        }

        if event::poll(Duration::from_millis(1))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => {
                            running.store(false, Ordering::SeqCst);
                        }
                        _ => {}
                    }
                }
            }
        }

        let stats = DashboardStats {
            uptime_secs: started.elapsed().as_secs(),
            tick_rate: server.tick_rate(),
            client_count: server.connected_count(),
            root_count: server.root_count(),
        };
        let clients = server.client_infos();
        terminal.draw(|frame| {
            tui::render(frame, &tui_state, &stats, &clients);
        })?;
    }

    tui_state.log("Shutting down...");
    server.shutdown_connections();

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;

    Ok(())
}
