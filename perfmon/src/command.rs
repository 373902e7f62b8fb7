use std::fmt;

/// What `perfmon` was asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run the default test script
    Test,
    /// Run every test script matching the all-tests pattern
    TestAll,
    /// Take a manual heap snapshot
    HeapDump,
    /// Print the configuration report
    Info,
    /// Bootstrap directories, probe services, then print the report
    Init,
}

impl Command {
    /// Map the positional command token. Unknown or missing tokens fall back
    /// to [`Command::Init`].
    pub fn from_token(token: Option<&str>) -> Self {
        match token {
            Some("test") => Command::Test,
            Some("test:all") => Command::TestAll,
            Some("heapdump") => Command::HeapDump,
            Some("info") => Command::Info,
            _ => Command::Init,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Test => "test",
            Command::TestAll => "test:all",
            Command::HeapDump => "heapdump",
            Command::Info => "info",
            Command::Init => "init",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
