//! Script source loading

use std::io::{self, Read};

/// Display name used for scripts read from standard input
pub const STDIN_NAME: &str = "<stdin>";

/// Raw script bytes together with the name used in error messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSource {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl ScriptSource {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// Source text handed to the engine. Invalid UTF-8 is replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// An empty name or `-` selects standard input
pub fn is_stdin(name: &str) -> bool {
    name.is_empty() || name == "-"
}

/// Name a script is reported under
pub fn display_name(name: &str) -> &str {
    if is_stdin(name) {
        STDIN_NAME
    } else {
        name
    }
}

/// Read a script from a file, or from standard input when `name` is empty or `-`.
pub fn read_source(name: &str) -> io::Result<ScriptSource> {
    if is_stdin(name) {
        return read_from(io::stdin().lock(), STDIN_NAME);
    }
    let bytes = std::fs::read(name)?;
    Ok(ScriptSource::new(name, bytes))
}

/// Read a script from any reader until end of stream.
pub fn read_from<R: Read>(mut reader: R, name: &str) -> io::Result<ScriptSource> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    Ok(ScriptSource::new(name, bytes))
}
