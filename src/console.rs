use std::io::{self, BufRead, IsTerminal, Write};

use crossterm::style::Stylize;
use crossterm::{cursor, queue, style, terminal};

/// Operator console over any line reader and writer.
pub struct Console<R, W> {
    input: R,
    output: W,
    // Colours and cursor control only make sense on a real terminal.
    styled: bool,
}

impl Console<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        let styled = io::stdout().is_terminal();
        Self {
            input: io::stdin().lock(),
            output: io::stdout(),
            styled,
        }
    }
}

impl<R: BufRead, W: Write> Console<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            styled: false,
        }
    }

    pub fn output(&self) -> &W {
        &self.output
    }

    /// Shows `prompt` followed by ` >> ` and reads one line, trimmed.
    /// `None` once input is exhausted.
    pub fn prompt(&mut self, prompt: &str) -> Option<String> {
        if write!(self.output, "{} >> ", prompt).and_then(|_| self.output.flush()).is_err() {
            return None;
        }
        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line.trim().to_string()),
            Err(e) => {
                tracing::error!("Failed to read console input: {}", e);
                None
            }
        }
    }

    pub fn say(&mut self, text: &str) {
        // Nothing sensible to do when the console itself is gone.
        let _ = writeln!(self.output, "{}", text);
    }

    /// Highlighted line, used for warnings the operator must not miss.
    pub fn alert(&mut self, text: &str) {
        if self.styled {
            let _ = writeln!(self.output, "{}", text.yellow().bold());
        } else {
            self.say(text);
        }
    }

    /// Rewrites the current line in place.
    pub fn status_line(&mut self, text: &str) {
        let result = if self.styled {
            queue!(
                self.output,
                cursor::MoveToColumn(0),
                terminal::Clear(terminal::ClearType::CurrentLine),
                style::Print(text)
            )
        } else {
            write!(self.output, "\r{}", text)
        };
        let _ = result.and_then(|_| self.output.flush());
    }

    pub fn end_status_line(&mut self) {
        let _ = writeln!(self.output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn console(input: &str) -> Console<Cursor<Vec<u8>>, Vec<u8>> {
        Console::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    fn written(console: &Console<Cursor<Vec<u8>>, Vec<u8>>) -> String {
        String::from_utf8(console.output().clone()).unwrap()
    }

    #[test]
    fn prompt_appends_marker_and_trims_answer() {
        let mut c = console("  12 \r\n");
        assert_eq!(c.prompt("Choice").as_deref(), Some("12"));
        assert_eq!(written(&c), "Choice >> ");
    }

    #[test]
    fn blank_line_is_empty_string_and_eof_is_none() {
        let mut c = console("\n");
        assert_eq!(c.prompt("x").as_deref(), Some(""));
        assert_eq!(c.prompt("x"), None);
    }

    #[test]
    fn status_line_returns_to_column_zero() {
        let mut c = console("");
        c.status_line("Capture will end in 00:03");
        c.status_line("Capture will end in 00:02");
        c.end_status_line();
        assert_eq!(
            written(&c),
            "\rCapture will end in 00:03\rCapture will end in 00:02\n"
        );
    }
}
