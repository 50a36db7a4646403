//! `legion chat <id>`: interactive streaming chat.
//!
//! Each stdin line is sent as a message. `/stop` cancels the reply in
//! progress, `/reconnect` retries a dropped connection right away, `/status`
//! prints context usage and `/quit` leaves.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use console::style;
use legion_client::render::{render_transcript, LiveRenderer};
use legion_client::{
    ChatSession, ClientConfig, ClientError, ConnectionHandle, ConnectionState, ConversationApi,
    HttpApi, SendOptions, TokioSleeper,
};
use legion_transcript::StatusInfo;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use crate::cli::ChatArgs;

const OPEN_TIMEOUT: Duration = Duration::from_secs(15);

pub async fn run(api: HttpApi, config: &ClientConfig, args: ChatArgs) -> anyhow::Result<()> {
    let api: Arc<dyn ConversationApi> = Arc::new(api);
    let options = SendOptions {
        model: args.model.or_else(|| config.model.clone()),
        thinking: args.thinking || config.thinking.unwrap_or(false),
    };

    let (connection, events) = ConnectionHandle::spawn(
        config.ws_base.clone(),
        config.reconnect.policy(),
        Arc::new(TokioSleeper),
    );
    let mut state_rx = connection.subscribe_state();
    let mut session = ChatSession::new(api, connection, events);
    session.switch_conversation(&args.id).await?;

    if !session.transcript().turns().is_empty() {
        println!("{}\n", render_transcript(session.transcript().turns()));
    }

    let opened = match tokio::time::timeout(
        OPEN_TIMEOUT,
        state_rx.wait_for(|s| s.is_open() || matches!(s, ConnectionState::Closed { .. })),
    )
    .await
    {
        Ok(Ok(state)) => state.is_open(),
        _ => false,
    };
    if opened {
        println!(
            "{} {}  {}",
            style("Connected to").dim(),
            style(&args.id).cyan(),
            style("(/stop, /reconnect, /status, /quit)").dim()
        );
    } else {
        println!(
            "{}",
            style("Not connected yet; messages will be refused until the socket opens.").yellow()
        );
    }

    let mut pending_attachments = args.attachments;
    let mut renderer = LiveRenderer::new();
    let mut stdout = io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "" => {}
                    "/quit" | "/exit" => break,
                    "/stop" => {
                        let effects = session.stop().await;
                        renderer.render(session.transcript(), &effects, &mut stdout)?;
                        println!("{}", style("stopped").dim());
                    }
                    "/reconnect" => {
                        session.connection().set_visible(true).await?;
                    }
                    "/status" => print_status(session.transcript().status()),
                    text => {
                        if session.transcript().is_streaming() {
                            println!("{}", style("Still answering; /stop to cancel.").yellow());
                            continue;
                        }
                        match session.send_message(text, &pending_attachments, &options).await {
                            Ok(report) => {
                                pending_attachments.clear();
                                for failed in &report.failed_uploads {
                                    println!(
                                        "{} {} ({})",
                                        style("upload failed, not attached:").yellow(),
                                        failed.path.display(),
                                        failed.error
                                    );
                                }
                                renderer.render(session.transcript(), &report.effects, &mut stdout)?;
                            }
                            Err(ClientError::NotConnected) => {
                                println!("{}", style("Not connected; message not sent.").red());
                            }
                            Err(e) => return Err(e.into()),
                        }
                    }
                }
            }
            effects = session.next_effects() => {
                let Some(effects) = effects else { break };
                renderer.render(session.transcript(), &effects, &mut stdout)?;
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = state_rx.borrow_and_update().clone();
                print_state(&mut stdout, &state)?;
            }
        }
    }

    info!(
        component = "cli",
        event = "chat.exit",
        conversation_id = %args.id,
        turns = session.transcript().turns().len(),
    );
    session.leave().await?;
    Ok(())
}

fn print_state(out: &mut impl Write, state: &ConnectionState) -> io::Result<()> {
    let line = match state {
        ConnectionState::Reconnecting { attempt, delay } => style(format!(
            "connection lost, reconnecting in {}s (attempt {attempt})",
            delay.as_secs()
        ))
        .yellow(),
        ConnectionState::Closed { code } => style(format!(
            "connection closed (code {code}); /reconnect to try again"
        ))
        .red(),
        ConnectionState::Open => style("connected".to_string()).green(),
        ConnectionState::Connecting | ConnectionState::Idle => return Ok(()),
    };
    writeln!(out, "{line}")?;
    out.flush()
}

fn print_status(status: &StatusInfo) {
    match status.context_usage {
        Some(usage) => println!("context: {:.1}%", usage * 100.0),
        None => println!("context: unknown"),
    }
    if let Some(tokens) = &status.token_usage {
        println!(
            "tokens: {} in ({:.0}% cached), {} out",
            tokens.input_total(),
            tokens.cache_hit_percent(),
            tokens.output
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_line(state: ConnectionState) -> String {
        let mut out = Vec::new();
        print_state(&mut out, &state).unwrap();
        console::strip_ansi_codes(&String::from_utf8(out).unwrap()).into_owned()
    }

    #[test]
    fn connection_changes_are_reported() {
        assert_eq!(
            state_line(ConnectionState::Reconnecting {
                attempt: 2,
                delay: Duration::from_secs(2),
            }),
            "connection lost, reconnecting in 2s (attempt 2)\n"
        );
        assert_eq!(
            state_line(ConnectionState::Closed { code: 1006 }),
            "connection closed (code 1006); /reconnect to try again\n"
        );
        assert_eq!(state_line(ConnectionState::Open), "connected\n");
        assert_eq!(state_line(ConnectionState::Connecting), "");
    }

    #[test]
    fn write_failures_propagate() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        let err = print_state(&mut Broken, &ConnectionState::Open).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
