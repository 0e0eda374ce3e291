//! Interactive confirmation for wiping the graph.

use std::io::{BufRead, Write};

/// Proof that an operator agreed to wipe the graph. Only
/// [`confirm_wipe`] hands these out.
#[derive(Debug)]
pub struct WipeConfirmed(());

/// Ask for confirmation on `output` and read the answer from `input`.
///
/// Only `yes` (any case, surrounding whitespace ignored) confirms. End of
/// input counts as a refusal.
pub fn confirm_wipe<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    uri: &str,
) -> std::io::Result<Option<WipeConfirmed>> {
    writeln!(
        output,
        "All nodes and relationships in {uri} will be deleted. This cannot be undone."
    )?;
    write!(output, "Type 'yes' to continue: ")?;
    output.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;

    if answer.trim().eq_ignore_ascii_case("yes") {
        Ok(Some(WipeConfirmed(())))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(text: &str) -> Option<WipeConfirmed> {
        let mut input = text.as_bytes();
        let mut output = Vec::new();
        let confirmed = confirm_wipe(&mut input, &mut output, "bolt://db:7687").unwrap();
        let prompt = String::from_utf8(output).unwrap();
        assert!(prompt.contains("bolt://db:7687"));
        confirmed
    }

    #[test]
    fn test_yes_confirms() {
        assert!(answer("yes\n").is_some());
        assert!(answer("  YES \n").is_some());
    }

    #[test]
    fn test_anything_else_refuses() {
        assert!(answer("y\n").is_none());
        assert!(answer("no\n").is_none());
        assert!(answer("yes please\n").is_none());
        assert!(answer("").is_none());
    }
}
