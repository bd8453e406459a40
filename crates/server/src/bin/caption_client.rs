// crates/server/src/bin/caption_client.rs
//! Interactive test client for the caption-meter server.
//!
//! Usage: `caption-client <TOKEN> [URL]`
//!
//! Sends one audio packet per second, plus one each time Enter is pressed.
//! Type `exit` to quit. Every server message and the close frame are printed.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use rand::RngCore;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::{connect_async, tungstenite::Message};

const DEFAULT_URL: &str = "ws://localhost:3000";
const PAYLOAD_BYTES: usize = 100;
const SEND_INTERVAL: Duration = Duration::from_secs(1);

fn connect_url(base: &str, token: &str) -> String {
    let sep = if base.contains('?') { '&' } else { '?' };
    format!("{base}{sep}token={token}")
}

fn audio_packet() -> String {
    let mut payload = [0u8; PAYLOAD_BYTES];
    rand::thread_rng().fill_bytes(&mut payload);
    serde_json::json!({
        "type": "audio",
        "data": base64::engine::general_purpose::STANDARD.encode(payload),
        "timestamp": caption_meter_core::now_millis(),
    })
    .to_string()
}

/// One-line rendering of a server frame.
fn describe(text: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        return format!("[unparsed] {text}");
    };
    let kind = value.get("type").and_then(|t| t.as_str()).unwrap_or("unknown");
    match kind {
        "caption" => format!(
            "[caption] {}",
            value.get("text").and_then(|t| t.as_str()).unwrap_or_default()
        ),
        "limit_exceeded" => format!(
            "[limit_exceeded] {} (used {} of {} ms)",
            value.get("text").and_then(|t| t.as_str()).unwrap_or_default(),
            value.get("usageMs").and_then(|v| v.as_u64()).unwrap_or_default(),
            value.get("limitMs").and_then(|v| v.as_u64()).unwrap_or_default(),
        ),
        "error" => format!(
            "[error] {}",
            value.get("text").and_then(|t| t.as_str()).unwrap_or_default()
        ),
        other => format!("[{other}] {text}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let Some(token) = args.next() else {
        bail!("usage: caption-client <TOKEN> [URL]");
    };
    let base = args.next().unwrap_or_else(|| DEFAULT_URL.to_string());
    let url = connect_url(&base, &token);

    let (ws, _response) = connect_async(url.as_str())
        .await
        .with_context(|| format!("Failed to connect to {base}"))?;
    eprintln!("connected to {base}; sending a packet every second, Enter sends one more, `exit` quits");

    let (mut sink, mut stream) = ws.split();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(SEND_INTERVAL);
    let mut sent: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if sink.send(Message::Text(audio_packet().into())).await.is_err() {
                    break;
                }
                sent += 1;
            }
            line = stdin.next_line() => {
                match line.context("Failed to read stdin")? {
                    Some(line) if line.trim() == "exit" => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    Some(_) => {
                        if sink.send(Message::Text(audio_packet().into())).await.is_err() {
                            break;
                        }
                        sent += 1;
                        println!("sent packet #{sent}");
                    }
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => println!("{}", describe(text.as_str())),
                    Some(Ok(Message::Close(frame))) => {
                        match frame {
                            Some(frame) => println!(
                                "connection closed: {} {}",
                                u16::from(frame.code),
                                frame.reason.as_str()
                            ),
                            None => println!("connection closed"),
                        }
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        eprintln!("connection error: {e}");
                        break;
                    }
                    None => {
                        println!("connection closed");
                        break;
                    }
                }
            }
        }
    }

    eprintln!("sent {sent} packets");
    Ok(())
}
