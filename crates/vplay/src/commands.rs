//! Interactive commands typed on stdin during `vplay play`.

use anyhow::{Result, anyhow, bail};

#[derive(Clone, Debug, PartialEq)]
pub enum ControlCommand {
    TogglePause,
    Resume,
    Speed(f32),
    SeekFrame(i64),
    SeekMs(i64),
    Status,
    Quit,
}

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<ControlCommand>> {
    let mut parts = line.split_whitespace();
    let Some(head) = parts.next() else {
        return Ok(None);
    };
    let arg = parts.next();
    if parts.next().is_some() {
        bail!("too many arguments: {line:?}");
    }

    let cmd = match (head, arg) {
        ("p", None) => ControlCommand::TogglePause,
        ("r", None) => ControlCommand::Resume,
        ("i", None) => ControlCommand::Status,
        ("q", None) => ControlCommand::Quit,
        ("s", Some(v)) => ControlCommand::Speed(
            v.parse()
                .map_err(|_| anyhow!("speed must be a number, got {v:?}"))?,
        ),
        ("f", Some(v)) => ControlCommand::SeekFrame(
            v.parse()
                .map_err(|_| anyhow!("frame must be an integer, got {v:?}"))?,
        ),
        ("t", Some(v)) => ControlCommand::SeekMs(
            v.parse()
                .map_err(|_| anyhow!("timestamp must be integer ms, got {v:?}"))?,
        ),
        ("s" | "f" | "t", None) => bail!("{head} needs a value"),
        _ => bail!("unknown command {line:?} (p, r, s <x>, f <n>, t <ms>, i, q)"),
    };
    Ok(Some(cmd))
}
