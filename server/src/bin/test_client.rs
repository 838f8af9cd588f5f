use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use shared::{decode_message, encode_message, MoveMessage, PlayerState, GAME_PATH};
use std::time::Duration;
use tokio::time::{interval, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// Connects to a relay server, walks in a circle and prints what others do
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server address
    #[clap(long, default_value = "127.0.0.1:8080")]
    server: String,
    /// Number of moves to send
    #[clap(short, long, default_value = "10")]
    moves: u32,
    /// Milliseconds between moves
    #[clap(short, long, default_value = "1000")]
    interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let url = format!("ws://{}{}", args.server, GAME_PATH);

    println!("Connecting to {}", url);
    let (ws, _) = connect_async(url.as_str()).await?;
    let (mut write, mut read) = ws.split();

    // The first frame is always our own record
    let me: PlayerState = match timeout(Duration::from_secs(10), read.next()).await? {
        Some(Ok(Message::Text(text))) => serde_json::from_str(&text)?,
        other => return Err(format!("Expected initial state, got {:?}", other).into()),
    };
    println!("Connected as player {} at ({:.2}, {:.2})", me.id, me.x, me.y);

    let reader = tokio::spawn(async move {
        while let Some(frame) = read.next().await {
            match frame {
                Ok(Message::Text(text)) => match decode_message(text.as_bytes()) {
                    Ok(msg) => println!(
                        "  Player {} moved to ({:.2}, {:.2})",
                        msg.player_id, msg.x, msg.y
                    ),
                    Err(e) => println!("  Unreadable message {}: {}", text, e),
                },
                Ok(Message::Close(_)) => {
                    println!("Server closed the connection");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    println!("Error receiving: {}", e);
                    break;
                }
            }
        }
    });

    let mut ticker = interval(Duration::from_millis(args.interval_ms));
    for i in 0..args.moves {
        ticker.tick().await;

        let angle = i as f64 / 5.0;
        let msg = MoveMessage::new(me.id.clone(), 100.0 * angle.cos(), 100.0 * angle.sin());
        println!("Sending move: ({:.2}, {:.2})", msg.x, msg.y);
        write.send(Message::Text(encode_message(&msg)?)).await?;
    }

    write.send(Message::Close(None)).await?;
    let _ = timeout(Duration::from_secs(2), reader).await;
    println!("Test client finished");

    Ok(())
}
