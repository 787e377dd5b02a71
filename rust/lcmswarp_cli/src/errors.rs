use lcmswarp::AlignmentError;

#[derive(Debug)]
pub enum CliError {
    Config { source: String },
    ParseError { msg: String },
    Io { source: String, path: Option<String> },
    Alignment { source: AlignmentError },
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Config { source } => write!(f, "Error interpreting the config: {}", source),
            CliError::ParseError { msg } => write!(f, "Error parsing input: {}", msg),
            CliError::Io { source, path } => {
                if let Some(path) = path {
                    write!(f, "Error accessing file {}: {}", path, source)
                } else {
                    write!(f, "Error accessing file: {}", source)
                }
            }
            CliError::Alignment { source } => write!(f, "Alignment failed: {}", source),
        }
    }
}

impl std::error::Error for CliError {}

impl From<AlignmentError> for CliError {
    fn from(source: AlignmentError) -> Self {
        CliError::Alignment { source }
    }
}

impl From<csv::Error> for CliError {
    fn from(e: csv::Error) -> Self {
        CliError::ParseError { msg: e.to_string() }
    }
}
