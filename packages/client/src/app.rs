//! Prompt loop and room output.

use std::sync::Arc;

use chatlink_session::{
    ChatClient, ConnectionState, DeliveryFailure, DeliveryState, EventKind, Message,
    MessageEvent, MessageSession, ServerEvent, StaticIdentity, UserId, WebSocketConnector,
};
use chatlink_shared::time::timestamp_to_jst_clock;
use rustyline::{DefaultEditor, error::ReadlineError};
use tokio::{
    sync::{broadcast::error::RecvError, mpsc},
    task::JoinHandle,
};

use crate::{
    args::Args,
    command::{Command, HELP, parse},
    error::{ClientError, CommandError},
};

const PROMPT: &str = "> ";

/// The room the prompt is currently attached to
struct CurrentRoom {
    session: Arc<MessageSession>,
    printer: JoinHandle<()>,
}

/// Connect, then run the prompt until `/quit` or end of input.
pub async fn run_client(args: Args) -> Result<(), ClientError> {
    let user_id = UserId::new(args.user_id.clone())?;
    let client = ChatClient::new(
        Arc::new(WebSocketConnector::new(args.url.clone())),
        Arc::new(StaticIdentity::new(user_id.clone())),
        args.session_config(),
    );

    client.on_state_change(|state| {
        if let Some(line) = render_state(state) {
            println!("{line}");
        }
    });
    let me = user_id.clone();
    client.on(EventKind::Presence, move |event| {
        if let ServerEvent::Presence(presence) = event
            && presence.user_id != me
        {
            let status = if presence.online { "online" } else { "offline" };
            println!("-- {} is {status}", presence.user_id);
        }
    });
    let me = user_id.clone();
    client.on(EventKind::Typing, move |event| {
        if let ServerEvent::Typing(typing) = event
            && typing.is_typing
            && typing.user_id != me
        {
            println!("-- {} is typing...", typing.user_id);
        }
    });

    tracing::info!(url = %args.url, user = %user_id, "connecting");
    client.connect().await?;
    println!("connected as {user_id}, /help for commands");

    let (line_tx, mut line_rx) = mpsc::unbounded_channel();
    let reader = tokio::task::spawn_blocking(move || read_lines(line_tx));

    let mut current: Option<CurrentRoom> = None;
    while let Some(line) = line_rx.recv().await {
        let command = match parse(&line) {
            Ok(Some(Command::Quit)) => break,
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("! {e}");
                continue;
            }
        };
        if let Err(e) = execute(&client, &mut current, command) {
            println!("! {e}");
        }
    }

    if let Some(room) = current.take() {
        room.printer.abort();
    }
    client.disconnect();
    drop(line_rx);

    match reader.await {
        Ok(Err(e)) => Err(e.into()),
        _ => Ok(()),
    }
}

/// Blocking prompt; stops on `/quit`, Ctrl-C, Ctrl-D or when the receiver is gone.
fn read_lines(lines: mpsc::UnboundedSender<String>) -> Result<(), ReadlineError> {
    let mut editor = DefaultEditor::new()?;
    loop {
        match editor.readline(PROMPT) {
            Ok(line) => {
                let quit = matches!(parse(&line), Ok(Some(Command::Quit)));
                if !line.trim().is_empty() {
                    let _ = editor.add_history_entry(line.as_str());
                }
                if lines.send(line).is_err() || quit {
                    return Ok(());
                }
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

fn execute(
    client: &ChatClient,
    current: &mut Option<CurrentRoom>,
    command: Command,
) -> Result<(), CommandError> {
    match command {
        Command::Join(users) => {
            let session = client.open_direct(&users)?;
            if let Some(previous) = current.take() {
                previous.printer.abort();
                if previous.session.room_id() != session.room_id() {
                    client.leave(previous.session.room_id());
                }
            }
            let names = users
                .iter()
                .map(UserId::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            println!("-- joined room {} with {names}", session.room_id());
            let printer = spawn_printer(Arc::clone(&session));
            *current = Some(CurrentRoom { session, printer });
        }
        Command::Leave => {
            let room = current.take().ok_or(CommandError::NoRoom)?;
            room.printer.abort();
            client.leave(room.session.room_id());
            println!("-- left room {}", room.session.room_id());
        }
        Command::Room => match current {
            Some(room) => println!("-- in room {}", room.session.room_id()),
            None => println!("-- not in a room"),
        },
        Command::Retry => {
            let room = current.as_ref().ok_or(CommandError::NoRoom)?;
            let me = client.user_id();
            let failed = room
                .session
                .messages()
                .into_iter()
                .rev()
                .find(|m| m.sender_id == me && m.delivery_state == DeliveryState::Failed);
            match failed {
                Some(message) => {
                    client.resend(room.session.room_id(), message.local_id)?;
                }
                None => println!("-- nothing to retry"),
            }
        }
        Command::Help => println!("{HELP}"),
        Command::Say(text) => {
            let room = current.as_ref().ok_or(CommandError::NoRoom)?;
            client.send(room.session.room_id(), Some(text), None)?;
        }
        Command::Quit => {}
    }
    Ok(())
}

fn spawn_printer(session: Arc<MessageSession>) -> JoinHandle<()> {
    let mut events = session.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(line) = render_event(&event) {
                        println!("{line}");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(room_id = %session.room_id(), skipped, "output fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn render_state(state: ConnectionState) -> Option<&'static str> {
    match state {
        ConnectionState::Reconnecting => Some("-- connection lost, reconnecting..."),
        ConnectionState::Connected => Some("-- connected"),
        ConnectionState::Failed => Some("-- connection failed, restart the client to try again"),
        _ => None,
    }
}

/// Terminal line for a timeline change; own queued and acked sends stay quiet.
fn render_event(event: &MessageEvent) -> Option<String> {
    match event {
        MessageEvent::Received(message) => Some(format!(
            "[{}] {}: {}",
            timestamp_to_jst_clock(message.sent_at.value()),
            message.sender_id,
            body(message)
        )),
        MessageEvent::Failed(message) => {
            let reason = match &message.failure {
                Some(DeliveryFailure::Timeout) => "no response".to_string(),
                Some(DeliveryFailure::Rejected { reason, .. }) => reason.clone(),
                Some(DeliveryFailure::Cancelled) | None => "cancelled".to_string(),
            };
            Some(format!(
                "! not delivered ({reason}): {}, /retry to resend",
                body(message)
            ))
        }
        MessageEvent::Read(message) => Some(format!("-- read: {}", body(message))),
        MessageEvent::Queued(_) | MessageEvent::Sent(_) => None,
    }
}

fn body(message: &Message) -> String {
    match (&message.text, &message.attachment_ref) {
        (Some(text), Some(attachment)) => format!("{text} [attachment {attachment}]"),
        (Some(text), None) => text.to_string(),
        (None, Some(attachment)) => format!("[attachment {attachment}]"),
        (None, None) => String::new(),
    }
}
