mod client;

use anyhow::Result;
use clap::Parser;

use client::{ClientConfig, GameClient};

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "Scene-graph client")]
struct Args {
    #[arg(short, long, default_value = "127.0.0.1")]
    server: String,

    #[arg(short, long, default_value_t = trellis::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value = "player")]
    name: String,

    #[arg(short, long, default_value_t = 60)]
    tick_rate: u32,

    #[arg(long, help = "Observe only; do not spawn and drive an owned object")]
    spectate: bool,

    #[arg(long, help = "Send one chat line after connecting")]
    say: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = ClientConfig {
        tick_rate: args.tick_rate,
        name: args.name,
        drive_demo: !args.spectate,
        ..Default::default()
    };

    let mut client = GameClient::new(config);
    client.connect(&format!("{}:{}", args.server, args.port))?;

    if let Some(line) = args.say {
        client.send_chat(&line);
    }

    client.run();
    Ok(())
}
