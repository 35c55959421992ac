use clap::Parser;
use client::input::{InputEvent, ScriptedInput};
use client::network::Client;
use log::info;
use shared::Vec2;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,
}

/// A simple bot timeline: drive forward, sweep the turret, take a few
/// shots, then coast and collect whatever it rolls over.
fn bot_script() -> ScriptedInput {
    ScriptedInput::new(vec![
        (0.5, InputEvent::Move(Vec2::new(0.0, 1.0))),
        (1.0, InputEvent::Aim(Vec2::new(700.0, 500.0))),
        (1.5, InputEvent::Fire(true)),
        (2.5, InputEvent::Fire(false)),
        (3.0, InputEvent::Move(Vec2::new(0.5, 1.0))),
        (6.0, InputEvent::Move(Vec2::new(-0.5, 1.0))),
        (9.0, InputEvent::Move(Vec2::new(0.0, 1.0))),
    ])
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    info!("Starting client, connecting to {}", args.server);

    let mut client = Client::new(&args.server, Box::new(bot_script())).await?;
    client.run().await?;

    Ok(())
}
