//! Error type shared by every stage of the toolkit

use std::path::PathBuf;

/// Errors raised by volume I/O, validation, fusion and external tools
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or unreadable file, bad output location, malformed argument combination
    #[error("invalid input: {0}")]
    InputValidation(String),

    /// Parameters that are individually valid but inconsistent with each other
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An external program exited unsuccessfully or could not be started
    #[error("{stage}: `{tool}` failed ({status}){}", format_stderr(.stderr))]
    ExternalTool {
        tool: String,
        stage: String,
        status: String,
        stderr: String,
    },

    /// Registration of one input could not be completed
    #[error("registration of input {input} failed: {message}")]
    Registration { input: usize, message: String },

    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error on '{}': {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("NIfTI error: {0}")]
    Nifti(String),

    #[error("malformed transform: {0}")]
    TransformParse(String),
}

fn format_stderr(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {}", trimmed)
    }
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io { path: path.into(), source }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Fail with `InputValidation` unless `path` is an existing regular file
pub fn check_input_file(path: &std::path::Path, what: &str) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(Error::InputValidation(format!(
            "{} '{}' does not exist",
            what,
            path.display()
        )))
    }
}

/// Fail with `InputValidation` unless the directory that would hold `path` exists
pub fn check_output_dir(path: &std::path::Path) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => return Ok(()),
    };
    if parent.is_dir() {
        Ok(())
    } else {
        Err(Error::InputValidation(format!(
            "output directory '{}' does not exist",
            parent.display()
        )))
    }
}
