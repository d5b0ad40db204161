use std::fmt;

/// Output of a command run inside a session container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsoleOutput {
    /// Interleaved stdout and stderr, decoded as UTF-8 (lossy)
    pub text: String,

    /// Exit code reported by the runtime, if the command finished
    pub exit_code: Option<i64>,
}

impl ConsoleOutput {
    pub fn new(text: impl Into<String>, exit_code: Option<i64>) -> Self {
        Self {
            text: text.into(),
            exit_code,
        }
    }

    /// Check if the command exited with code 0
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for ConsoleOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Step of a run that issued a failing command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Preparing the language working directory
    Setup,
    /// Installing libraries
    Install,
    /// Preparing a destination directory for a file copy
    Transfer,
    /// Compiling the source
    Compile,
    /// Running the program
    Run,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Setup => "setup",
            Stage::Install => "install",
            Stage::Transfer => "transfer",
            Stage::Compile => "compile",
            Stage::Run => "run",
        };
        f.write_str(name)
    }
}
