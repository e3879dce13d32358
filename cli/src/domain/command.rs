//! `RemoteCommand`: the one place shell text is assembled.
//!
//! Every remote invocation is a POSIX one-liner. Arguments passed through
//! [`RemoteCommand::arg`] are single-quoted unless they consist solely of
//! characters the shell never interprets, so user input (subdomains,
//! versions, release names) cannot break out of its argument position.

use std::borrow::Cow;
use std::fmt;

/// Shell-safe rendering of a single argument.
///
/// Strings made only of `[A-Za-z0-9@%+=:,./_-]` pass through unchanged;
/// everything else is wrapped in single quotes with embedded quotes written
/// as `'\''`.
#[must_use]
pub fn quote(arg: &str) -> Cow<'_, str> {
    let safe = !arg.is_empty()
        && arg
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"@%+=:,./_-".contains(&b));
    if safe {
        Cow::Borrowed(arg)
    } else {
        Cow::Owned(format!("'{}'", arg.replace('\'', r"'\''")))
    }
}

/// A composed remote shell command plus optional stdin payload.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    script: String,
    stdin: Option<Vec<u8>>,
}

impl RemoteCommand {
    /// Start a command invoking `program`.
    #[must_use]
    pub fn new(program: &str) -> Self {
        Self {
            script: quote(program).into_owned(),
            stdin: None,
        }
    }

    /// A literal script fragment. Only accepts `'static` text so it can
    /// never carry runtime input.
    #[must_use]
    pub fn raw(script: &'static str) -> Self {
        Self {
            script: script.to_string(),
            stdin: None,
        }
    }

    /// Append one quoted argument.
    #[must_use]
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.script.push(' ');
        self.script.push_str(&quote(arg.as_ref()));
        self
    }

    /// Append several quoted arguments.
    #[must_use]
    pub fn args<I, S>(self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        args.into_iter().fold(self, |cmd, arg| cmd.arg(arg))
    }

    /// `self | next`
    #[must_use]
    pub fn pipe(self, next: RemoteCommand) -> Self {
        self.join("|", next)
    }

    /// `self && next`
    #[must_use]
    pub fn and_then(self, next: RemoteCommand) -> Self {
        self.join("&&", next)
    }

    /// `self || next`
    #[must_use]
    pub fn or_else(self, next: RemoteCommand) -> Self {
        self.join("||", next)
    }

    #[must_use]
    pub fn discard_stderr(mut self) -> Self {
        self.script.push_str(" 2>/dev/null");
        self
    }

    #[must_use]
    pub fn discard_stdout(mut self) -> Self {
        self.script.push_str(" >/dev/null");
        self
    }

    /// Feed `bytes` to the command's stdin.
    #[must_use]
    pub fn with_stdin(mut self, bytes: Vec<u8>) -> Self {
        self.stdin = Some(bytes);
        self
    }

    /// Write `contents` to `path` on the remote host, creating parent
    /// directories. The path travels as a positional parameter, never as
    /// script text.
    #[must_use]
    pub fn write_file(path: &str, contents: Vec<u8>) -> Self {
        Self::new("sh")
            .arg("-c")
            .arg(r#"mkdir -p "$(dirname "$1")" && cat > "$1""#)
            .arg("sh")
            .arg(path)
            .with_stdin(contents)
    }

    /// The shell text to execute.
    #[must_use]
    pub fn render(&self) -> &str {
        &self.script
    }

    #[must_use]
    pub fn stdin(&self) -> Option<&[u8]> {
        self.stdin.as_deref()
    }

    fn join(mut self, op: &str, next: RemoteCommand) -> Self {
        self.script.push(' ');
        self.script.push_str(op);
        self.script.push(' ');
        self.script.push_str(&next.script);
        if self.stdin.is_none() {
            self.stdin = next.stdin;
        }
        self
    }
}

// Stdin can carry secrets and archives; only its size is shown.
impl fmt::Debug for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCommand")
            .field("script", &self.script)
            .field("stdin_bytes", &self.stdin.as_ref().map(Vec::len))
            .finish()
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.script)
    }
}
