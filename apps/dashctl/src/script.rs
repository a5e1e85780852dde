use anyhow::{bail, Context};
use serde_json::Value;
use shared::protocol::{Command, CommandKind};

/// Parses a command script: either a JSON array of wire commands or one wire command per
/// line. Blank lines and lines starting with `#` are skipped in the line form.
pub fn parse_script(raw: &str) -> anyhow::Result<Vec<Value>> {
    let trimmed = raw.trim_start();
    if trimmed.starts_with('[') {
        let commands: Vec<Value> =
            serde_json::from_str(trimmed).context("script is not a JSON array")?;
        return Ok(commands);
    }

    let mut commands = Vec::new();
    for (number, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let value = serde_json::from_str(line)
            .with_context(|| format!("line {} is not valid JSON", number + 1))?;
        commands.push(value);
    }
    Ok(commands)
}

/// Checks every entry against the wire format without running it.
pub fn validate(commands: &[Value]) -> anyhow::Result<()> {
    let mut problems = Vec::new();
    for (position, value) in commands.iter().enumerate() {
        match Command::from_wire(value.clone()) {
            Ok(command) => {
                if let CommandKind::Custom { name, .. } = &command.kind {
                    problems.push(format!("#{position}: unknown command type {name}"));
                }
            }
            Err(err) => problems.push(format!("#{position}: {err}")),
        }
    }
    if !problems.is_empty() {
        bail!("{} invalid commands:\n{}", problems.len(), problems.join("\n"));
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/script_tests.rs"]
mod tests;
