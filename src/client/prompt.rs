use std::future::Future;
use std::io::{self, Write};
use tokio::io::{AsyncBufReadExt, BufReader, Stdin};

/// Operator interaction for the Decide phase.
pub trait Prompt {
    /// Display one line of the catalog listing.
    fn show(&mut self, line: &str) {
        println!("{}", line);
    }

    /// Ask `question` and return the trimmed answer.
    fn read_line(&mut self, question: &str) -> impl Future<Output = io::Result<String>> + Send;
}

/// Interactive prompt on the process's stdin/stdout.
pub struct StdinPrompt {
    input: BufReader<Stdin>,
}

impl StdinPrompt {
    pub fn new() -> Self {
        Self {
            input: BufReader::new(tokio::io::stdin()),
        }
    }
}

impl Default for StdinPrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl Prompt for StdinPrompt {
    async fn read_line(&mut self, question: &str) -> io::Result<String> {
        print!("{}", question);
        io::stdout().flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line).await? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stdin closed before an answer",
            ));
        }
        Ok(line.trim().to_string())
    }
}

/// Answers every question with a fixed reply (`--yes`, tests).
pub struct FixedAnswer {
    answer: String,
    quiet: bool,
}

impl FixedAnswer {
    pub fn yes() -> Self {
        Self::new("y")
    }

    pub fn new(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            quiet: false,
        }
    }

    /// Suppress the catalog listing.
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }
}

impl Prompt for FixedAnswer {
    fn show(&mut self, line: &str) {
        if !self.quiet {
            println!("{}", line);
        }
    }

    async fn read_line(&mut self, _question: &str) -> io::Result<String> {
        Ok(self.answer.trim().to_string())
    }
}
