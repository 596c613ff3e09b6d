//! Turns a free-text event description into an AppleScript that adds the
//! event to the "Work" calendar, and runs it once the user agrees.

use anyhow::{anyhow, bail, Context, Result};
use chrono::Datelike;
use std::io::{BufRead, Write};
use std::process::Output;
use tokio::process::Command;

use crate::layers::llm::{ChatModel, Conversation};

const EXAMPLE_SCRIPT: &str = r#"
set eventTitle to "Talk by Bob Frey"
set eventDate to current date
set year of eventDate to 2024
set month of eventDate to October
set day of eventDate to 16
set time of eventDate to (15 * hours) -- 15:00

set eventEndDate to current date
set year of eventEndDate to 2024
set month of eventEndDate to October
set day of eventEndDate to 16
set time of eventEndDate to (16 * hours) -- 16:00

set eventLocation to "BA 5187"
set eventDescription to "A talk by Bob Frey (Cornell University) followed by a reception with light refreshments."

tell application "Calendar"
    tell calendar "Work"
        set newEvent to make new event with properties {summary:eventTitle, start date:eventDate, end date:eventEndDate, location:eventLocation, description:eventDescription}
    end tell
end tell
"#;

pub fn applescript_prompt(event_info: &str, year: i32) -> String {
    format!(
        "Here is a brief description of an event that I want to attend.\n\n\
         Event info: {event_info}\n\n\
         Please help me build an AppleScript that adds the event to my Apple Calendar called Work.\n\n\
         Here is an example AppleScript that you can derive from:\n{EXAMPLE_SCRIPT}\n\
         Please note the current year is {year}.\n\n\
         Please provide the updated AppleScript code in markdown format wrapped with ```applescript \
         at the beginning and ``` at the end.\n\nModified AppleScript:\n"
    )
}

/// Body of the first fenced code block, without its language tag.
pub fn extract_fenced_code(text: &str) -> Option<String> {
    let open = text.find("```")?;
    let rest = &text[open + 3..];
    let close = rest.find("```")?;
    let block = &rest[..close];

    // the info string runs to the end of the fence line
    let body = match block.split_once('\n') {
        Some((info, body)) if !info.trim().contains(char::is_whitespace) => body,
        _ => block,
    };
    let body = body.trim();
    (!body.is_empty()).then(|| body.to_string())
}

/// Reads lines until one that says `END` (any case).
pub fn read_description<R: BufRead>(input: R) -> std::io::Result<String> {
    let mut lines = Vec::new();
    for line in input.lines() {
        let line = line?;
        if line.trim().eq_ignore_ascii_case("END") {
            break;
        }
        lines.push(line);
    }
    Ok(lines.join("\n"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Execute,
    Revise(String),
    Abort,
}

pub fn ask_decision<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> std::io::Result<Decision> {
    write!(output, "Do you want to execute the AppleScript? (y/n, or e to request changes): ")?;
    output.flush()?;
    let mut answer = String::new();
    input.read_line(&mut answer)?;
    match answer.trim().to_lowercase().as_str() {
        "y" | "yes" => Ok(Decision::Execute),
        "e" | "edit" => {
            write!(output, "What should change? ")?;
            output.flush()?;
            let mut request = String::new();
            input.read_line(&mut request)?;
            Ok(Decision::Revise(request.trim().to_string()))
        }
        _ => Ok(Decision::Abort),
    }
}

async fn script_from(conversation: &mut Conversation<'_>, prompt: &str) -> Result<String> {
    let response = conversation.ask(prompt).await?;
    extract_fenced_code(&response).ok_or_else(|| {
        tracing::debug!("Response: {}", response);
        anyhow!("Failed to parse AppleScript")
    })
}

/// Writes `script` to a temporary `.scpt` file and runs it with `osascript`.
/// The file is removed whether or not `osascript` could be started.
pub async fn execute_script<W: Write>(script: &str, output: &mut W) -> Result<Output> {
    let mut file = tempfile::Builder::new()
        .prefix("event-")
        .suffix(".scpt")
        .tempfile()
        .context("create temporary AppleScript file")?;
    file.write_all(script.as_bytes())?;
    file.flush()?;
    let path = file.path().to_path_buf();
    writeln!(output, "AppleScript saved to: {}", path.display())?;

    let result = Command::new("osascript").arg(&path).output().await;
    file.close().context("remove temporary AppleScript file")?;
    writeln!(output, "Temporary file removed: {}", path.display())?;
    result.context("run osascript")
}

/// The interactive flow: describe, draft, review (and revise), execute.
pub async fn run<R: BufRead, W: Write>(model: &dyn ChatModel, input: &mut R, output: &mut W) -> Result<()> {
    writeln!(output, "Please provide a brief description of the event.")?;
    writeln!(output, "Enter your description, and type 'END' on a new line when you're finished:")?;
    let description = read_description(&mut *input)?;
    if description.trim().is_empty() {
        bail!("No event description given");
    }

    let mut conversation = Conversation::new(model, None);
    let year = chrono::Local::now().year();
    let mut script = script_from(&mut conversation, &applescript_prompt(&description, year)).await?;

    loop {
        writeln!(output, "AppleScript:\n{}", script)?;
        match ask_decision(input, output)? {
            Decision::Execute => break,
            Decision::Abort => {
                writeln!(output, "Exiting...")?;
                return Ok(());
            }
            Decision::Revise(request) => {
                let prompt = format!(
                    "Please revise the AppleScript: {request}\n\
                     Provide the complete updated script wrapped with ```applescript and ```."
                );
                let turns = conversation.history().len();
                match script_from(&mut conversation, &prompt).await {
                    Ok(revised) => script = revised,
                    Err(e) => {
                        // forget the unusable turn so the next request builds on the last script
                        let added = conversation.history().len() - turns;
                        conversation.clear_history(Some(added));
                        writeln!(output, "{}; keeping the previous script.", e)?;
                    }
                }
            }
        }
    }

    let result = execute_script(&script, output).await?;
    if result.status.success() {
        writeln!(output, "AppleScript executed successfully.")?;
        writeln!(output, "Output: {}", String::from_utf8_lossy(&result.stdout))?;
    } else {
        writeln!(output, "Error executing AppleScript:")?;
        writeln!(output, "Error message: {}", String::from_utf8_lossy(&result.stderr))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::testing::ScriptedModel;
    use std::io::Cursor;

    #[test]
    fn test_extract_fenced_code() {
        let response = "Sure!\n```applescript\ntell application \"Calendar\"\nend tell\n```\nEnjoy.";
        assert_eq!(
            extract_fenced_code(response).as_deref(),
            Some("tell application \"Calendar\"\nend tell")
        );
        assert_eq!(extract_fenced_code("```\nset x to 1\n```").as_deref(), Some("set x to 1"));
        assert_eq!(extract_fenced_code("```AppleScript\nset x to 1```").as_deref(), Some("set x to 1"));
        assert_eq!(extract_fenced_code("no code here"), None);
        assert_eq!(extract_fenced_code("```applescript\n```"), None);
        assert_eq!(extract_fenced_code("```applescript\nunterminated"), None);
    }

    #[test]
    fn test_prompt_mentions_year_and_event() {
        let prompt = applescript_prompt("Colloquium Friday 3pm in BA 1180", 2026);
        assert!(prompt.contains("Event info: Colloquium Friday 3pm in BA 1180"));
        assert!(prompt.contains("the current year is 2026"));
        assert!(prompt.contains("tell calendar \"Work\""));
    }

    #[test]
    fn test_read_description_stops_at_end() {
        let input = Cursor::new("Talk by Ada\nFriday 3pm\nend\nignored\n");
        assert_eq!(read_description(input).unwrap(), "Talk by Ada\nFriday 3pm");
    }

    #[test]
    fn test_ask_decision() {
        let mut out = Vec::new();
        assert_eq!(ask_decision(&mut Cursor::new("Y\n"), &mut out).unwrap(), Decision::Execute);
        assert_eq!(ask_decision(&mut Cursor::new("n\n"), &mut out).unwrap(), Decision::Abort);
        assert_eq!(ask_decision(&mut Cursor::new(""), &mut out).unwrap(), Decision::Abort);
        assert_eq!(
            ask_decision(&mut Cursor::new("e\nmake it 4pm\n"), &mut out).unwrap(),
            Decision::Revise("make it 4pm".into())
        );
    }

    #[tokio::test]
    async fn test_revision_happens_in_the_same_conversation() {
        let model = ScriptedModel::new([
            "```applescript\nset time of eventDate to (15 * hours)\n```",
            "```applescript\nset time of eventDate to (16 * hours)\n```",
        ]);
        let mut input = Cursor::new("Talk at 3pm\nEND\ne\nmove it to 4pm\nn\n");
        let mut output = Vec::new();

        run(&model, &mut input, &mut output).await.unwrap();

        let calls = model.calls();
        assert_eq!(calls.len(), 2);
        // the revision request sees the first draft
        assert_eq!(calls[1].len(), 4);
        assert!(calls[1][3].content.contains("move it to 4pm"));

        let printed = String::from_utf8(output).unwrap();
        assert!(printed.contains("(16 * hours)"));
        assert!(printed.ends_with("Exiting...\n"));
    }

    #[tokio::test]
    async fn test_unusable_revision_keeps_previous_script() {
        let model = ScriptedModel::new([
            "```applescript\nset eventTitle to \"Talk\"\n```",
            "Sorry, I am not sure what you mean.",
            "```applescript\nset eventTitle to \"Seminar\"\n```",
        ]);
        let mut input = Cursor::new("Talk\nEND\ne\n???\ne\ncall it a seminar\nn\n");
        let mut output = Vec::new();

        run(&model, &mut input, &mut output).await.unwrap();

        let calls = model.calls();
        assert_eq!(calls.len(), 3);
        // system, first prompt, first draft, second request
        assert_eq!(calls[2].len(), 4);
        assert!(calls[2][3].content.contains("call it a seminar"));
        let printed = String::from_utf8(output).unwrap();
        assert!(printed.contains("keeping the previous script"));
        assert!(printed.contains("\"Seminar\""));
    }

    #[tokio::test]
    async fn test_failed_revision_request_keeps_previous_draft() {
        let model = ScriptedModel::with_results([
            Ok("```applescript\nset eventTitle to \"Talk\"\n```".to_string()),
            Err(crate::layers::testing::api_failure()),
            Ok("```applescript\nset eventTitle to \"Seminar\"\n```".to_string()),
        ]);
        let mut input = Cursor::new("Talk\nEND\ne\nfirst try\ne\nsecond try\nn\n");

        run(&model, &mut input, &mut Vec::new()).await.unwrap();

        // the failed request left nothing behind; the first draft is still there
        let calls = model.calls();
        assert_eq!(calls[2].len(), 4);
        assert_eq!(calls[2][2].content, "```applescript\nset eventTitle to \"Talk\"\n```");
        assert!(calls[2][3].content.contains("second try"));
    }

    #[tokio::test]
    async fn test_execution_reports_through_output() {
        let model = ScriptedModel::new(["```applescript\nreturn \"ok\"\n```"]);
        let mut input = Cursor::new("Talk\nEND\ny\n");
        let mut output = Vec::new();

        // osascript only exists on macOS; either way the file is cleaned up
        let _ = run(&model, &mut input, &mut output).await;

        let printed = String::from_utf8(output).unwrap();
        let saved = printed
            .lines()
            .find_map(|l| l.strip_prefix("AppleScript saved to: "))
            .expect("saved path reported");
        assert!(saved.ends_with(".scpt"));
        assert!(printed.contains(&format!("Temporary file removed: {}", saved)));
        assert!(!std::path::Path::new(saved).exists());
    }

    #[tokio::test]
    async fn test_unparseable_script_is_an_error() {
        let model = ScriptedModel::new(["I can't do that."]);
        let mut input = Cursor::new("Talk\nEND\n");
        assert!(run(&model, &mut input, &mut Vec::new()).await.is_err());
    }
}
