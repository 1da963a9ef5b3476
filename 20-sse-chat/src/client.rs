use anyhow::{Context, Result};
use reqwest::{Response, Url};
use tokio::{io::AsyncWriteExt, select};
use tracing::{info, warn};

use crate::{
    cli::{ListenArgs, SendArgs},
    message::SseDecoder,
};

pub async fn send(args: SendArgs) -> Result<()> {
    let url = chat_url(&args.server, &args.message)?;
    reqwest::get(url)
        .await
        .with_context(|| format!("failed to reach {}", args.server))?
        .error_for_status()
        .context("server rejected the message")?;

    info!(server = %args.server, "message sent");
    Ok(())
}

pub async fn listen(args: ListenArgs) -> Result<()> {
    let mut response = open_stream(&args.server).await?;
    write_stdout(&format!("*** connected to {}", args.server)).await?;

    let mut decoder = SseDecoder::new();
    run_listen_loop(&mut response, &mut decoder).await
}

fn chat_url(server: &Url, message: &str) -> Result<Url> {
    let mut url = server
        .join("chat")
        .with_context(|| format!("invalid server url {server}"))?;
    url.query_pairs_mut().append_pair("message", message);
    Ok(url)
}

async fn open_stream(server: &Url) -> Result<Response> {
    let url = server
        .join("sse")
        .with_context(|| format!("invalid server url {server}"))?;
    let response = reqwest::get(url)
        .await
        .with_context(|| format!("failed to connect to {server}"))?
        .error_for_status()
        .context("server refused the event stream")?;
    Ok(response)
}

async fn run_listen_loop(response: &mut Response, decoder: &mut SseDecoder) -> Result<()> {
    loop {
        select! {
            chunk = response.chunk() => {
                if !handle_chunk(chunk, decoder).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                break;
            }
        }
    }
    Ok(())
}

async fn handle_chunk(
    chunk: reqwest::Result<Option<bytes::Bytes>>,
    decoder: &mut SseDecoder,
) -> Result<bool> {
    match chunk.context("event stream failed")? {
        Some(bytes) => {
            for message in decoder.push(&bytes) {
                write_stdout(message.as_str()).await?;
            }
            Ok(true)
        }
        None => {
            write_stdout("*** server closed the stream").await?;
            Ok(false)
        }
    }
}

async fn write_stdout(line: &str) -> std::io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
