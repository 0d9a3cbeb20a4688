//! Line-oriented command syntax for the terminal host.
//!
//! ```text
//! :open <file-id>        switch to another file
//! :new <filename>        create a file in the room
//! :goto <line> <col>     move the caret (1-based)
//! :set <text>            replace the buffer (`\n` for newlines)
//! :bs [count]            delete before the caret
//! :complete / :accept    ask for ghost text, then commit it
//! :save / :run / :quit
//! anything else          typed at the caret, followed by a newline
//! ```

use anyhow::{bail, Context};
use codecollab_core::{FileId, Position};
use codecollab_sync::SessionCommand;

pub const HELP: &str = "\
commands:
  :open <file-id>      switch file
  :new <filename>      create file
  :goto <line> <col>   move caret
  :set <text>          replace buffer (\\n for newline)
  :bs [count]          delete before the caret
  :complete            request a suggestion
  :accept              accept the suggestion
  :save                save active file
  :run                 run active file
  :quit                leave the room
  other lines are typed at the caret";

/// Parse one input line.
pub fn parse_line(line: &str) -> anyhow::Result<SessionCommand> {
    let Some(rest) = line.strip_prefix(':') else {
        return Ok(SessionCommand::Insert(format!("{line}\n")));
    };

    let (name, args) = rest.split_once(' ').unwrap_or((rest, ""));
    let args = args.trim();
    let command = match name {
        "open" => SessionCommand::SwitchFile(FileId(
            args.parse().with_context(|| format!("invalid file id {args:?}"))?,
        )),
        "new" => SessionCommand::NewFile(args.to_string()),
        "goto" => {
            let mut parts = args.split_whitespace();
            let (Some(line), Some(column), None) = (parts.next(), parts.next(), parts.next()) else {
                bail!("usage: :goto <line> <col>");
            };
            SessionCommand::MoveCursor(Position::new(
                line.parse().context("invalid line")?,
                column.parse().context("invalid column")?,
            ))
        }
        "set" => SessionCommand::SetContent(args.replace("\\n", "\n")),
        "bs" if args.is_empty() => SessionCommand::Backspace(1),
        "bs" => SessionCommand::Backspace(args.parse().context("invalid count")?),
        "complete" => SessionCommand::Complete,
        "accept" => SessionCommand::AcceptSuggestion,
        "save" => SessionCommand::Save,
        "run" => SessionCommand::Run,
        "quit" | "q" => SessionCommand::Close,
        other => bail!("unknown command :{other}"),
    };
    Ok(command)
}
