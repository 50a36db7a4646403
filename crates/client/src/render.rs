//! Terminal rendering of turns.
//!
//! [`render_turn`] draws a finished turn in one go (history, `--json`-less
//! output). [`LiveRenderer`] follows [`Effect`]s and prints only what is new,
//! so streamed text appears as it arrives.

use std::io::{self, Write};

use console::style;
use legion_transcript::{
    AssistantTurn, Effect, Part, PartKind, ToolArguments, ToolCallPart, Transcript, Turn,
    TurnBody,
};
use serde_json::Value;

const OUTPUT_PREVIEW_CHARS: usize = 400;

fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn arguments_text(arguments: &ToolArguments) -> String {
    match arguments {
        ToolArguments::Raw(raw) => raw.clone(),
        ToolArguments::Parsed(value) => value.to_string(),
    }
}

fn tool_call_line(call: &ToolCallPart) -> String {
    format!(
        "{} {} {}",
        style("⚙").cyan(),
        style(&call.tool_name).cyan().bold(),
        style(preview(&arguments_text(&call.arguments), OUTPUT_PREVIEW_CHARS)).dim()
    )
}

fn tool_result_line(tool_call_id: Option<&str>, output: &Value) -> String {
    let label = tool_call_id.unwrap_or("result");
    format!(
        "{} {} {}",
        style("↳").green(),
        style(label).green(),
        preview(&value_text(output), OUTPUT_PREVIEW_CHARS)
    )
}

fn part_text(part: &Part) -> String {
    match part {
        Part::Thinking { content } => style(content).dim().italic().to_string(),
        Part::Text { content } => content.clone(),
        Part::ToolCall(call) => tool_call_line(call),
        Part::ToolResult {
            tool_call_id,
            output,
        } => tool_result_line(tool_call_id.as_deref(), output),
    }
}

fn assistant_text(turn: &AssistantTurn) -> String {
    turn.parts()
        .iter()
        .map(part_text)
        .collect::<Vec<_>>()
        .join("\n")
}

/// One turn, fully rendered
pub fn render_turn(turn: &Turn) -> String {
    match &turn.body {
        TurnBody::User {
            content,
            attachments,
        } => {
            let mut out = format!("{} {}", style("you ›").bold().blue(), content);
            for attachment in attachments {
                out.push_str(&format!(
                    "\n  {} {}",
                    style("📎").dim(),
                    style(&attachment.filename).dim()
                ));
            }
            out
        }
        TurnBody::Assistant(assistant) => {
            format!("{}\n{}", style("legion ›").bold().magenta(), assistant_text(assistant))
        }
        TurnBody::ToolResult {
            tool_call_id,
            output,
        } => tool_result_line(tool_call_id.as_deref(), output),
        TurnBody::Error { message } => style(format!("error: {message}")).red().to_string(),
        TurnBody::Approval {
            action,
            description,
            approved,
        } => approval_line(action, description, *approved),
    }
}

fn approval_line(action: &str, description: &str, approved: Option<bool>) -> String {
    let verdict = match approved {
        Some(true) => style("approved").green(),
        Some(false) => style("rejected").red(),
        None => style("pending").yellow(),
    };
    format!("{verdict} {action}: {}", style(description).dim())
}

pub fn render_transcript(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(render_turn)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// How much of one part has been written
#[derive(Debug, Clone, Copy)]
struct Printed {
    kind: PartKind,
    bytes: usize,
    done: bool,
}

/// Incremental printer for a live transcript
#[derive(Debug, Default)]
pub struct LiveRenderer {
    turn: Option<usize>,
    printed: Vec<Printed>,
}

impl LiveRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(
        &mut self,
        transcript: &Transcript,
        effects: &[Effect],
        out: &mut impl Write,
    ) -> io::Result<()> {
        for effect in effects {
            match *effect {
                Effect::TurnAppended { index }
                | Effect::TurnInserted { index }
                | Effect::TurnUpdated { index } => {
                    if let Some(turn) = transcript.turns().get(index) {
                        self.show(index, turn, out)?;
                    }
                }
                Effect::TurnClosed { index } => {
                    if let Some(turn) = transcript.turns().get(index) {
                        self.show(index, turn, out)?;
                    }
                    if self.turn == Some(index) {
                        writeln!(out)?;
                        self.turn = None;
                        self.printed.clear();
                    }
                }
                Effect::StatusChanged => {}
                Effect::StreamingFinished => {
                    if self.turn.take().is_some() {
                        writeln!(out)?;
                    }
                    self.printed.clear();
                }
            }
        }
        out.flush()
    }

    fn show(&mut self, index: usize, turn: &Turn, out: &mut impl Write) -> io::Result<()> {
        match &turn.body {
            TurnBody::Assistant(assistant) => self.stream_assistant(index, assistant, out),
            // The user's own line is already on screen.
            TurnBody::User { .. } => Ok(()),
            _ => writeln!(out, "{}", render_turn(turn)),
        }
    }

    fn stream_assistant(
        &mut self,
        index: usize,
        turn: &AssistantTurn,
        out: &mut impl Write,
    ) -> io::Result<()> {
        if self.turn != Some(index) {
            if self.turn.is_some() {
                writeln!(out)?;
            }
            self.turn = Some(index);
            self.printed.clear();
            writeln!(out, "{}", style("legion ›").bold().magenta())?;
        }

        // Parts are only appended, except a late thinking part inserted up front.
        for (i, part) in turn.parts().iter().enumerate() {
            if self.printed.get(i).map(|p| p.kind) != Some(part.kind()) {
                self.printed.insert(
                    i,
                    Printed {
                        kind: part.kind(),
                        bytes: 0,
                        done: false,
                    },
                );
            }
        }

        for (i, part) in turn.parts().iter().enumerate() {
            let active = turn.is_active(i);
            let printed = &mut self.printed[i];
            if printed.done {
                continue;
            }
            match part {
                Part::Thinking { content } | Part::Text { content } => {
                    let Some(delta) = content.get(printed.bytes..) else {
                        continue;
                    };
                    if delta.is_empty() {
                        continue;
                    }
                    if printed.bytes == 0 && i > 0 {
                        writeln!(out)?;
                    }
                    if part.kind() == PartKind::Thinking {
                        write!(out, "{}", style(delta).dim().italic())?;
                    } else {
                        write!(out, "{delta}")?;
                    }
                    printed.bytes = content.len();
                }
                Part::ToolCall(_) | Part::ToolResult { .. } => {
                    if active {
                        continue;
                    }
                    write!(out, "\n{}", part_text(part))?;
                    printed.done = true;
                }
            }
        }
        Ok(())
    }
}
