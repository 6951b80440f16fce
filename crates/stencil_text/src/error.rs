use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("template: {name}:{line}: {message}")]
    Parse {
        name: String,
        line: usize,
        message: String,
    },

    /// Failure while executing; `location` is `name:line:col` of the node.
    #[error("template: {location}: executing {name:?} at <{node}>: {message}")]
    Exec {
        location: String,
        name: String,
        node: String,
        message: String,
    },

    #[error("template: {name}: {name:?} is an incomplete or empty template")]
    Incomplete { name: String },

    #[error("template: no template {name:?} associated with template {parent:?}")]
    NoTemplate { name: String, parent: String },

    #[error("template: no files named in call to ParseFiles")]
    NoFiles,

    #[error("template: pattern matches no files: `{0}`")]
    NoMatch(String),

    #[error("open {path}: {reason}")]
    Io { path: String, reason: String },
}

impl EngineError {
    pub(crate) fn io(path: &str, err: &std::io::Error) -> Self {
        let reason = match err.kind() {
            std::io::ErrorKind::NotFound => "no such file or directory".to_string(),
            std::io::ErrorKind::PermissionDenied => "permission denied".to_string(),
            _ => err.to_string(),
        };
        EngineError::Io {
            path: path.to_string(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_error_format() {
        let err = EngineError::Exec {
            location: "t:1:3".into(),
            name: "t".into(),
            node: ".param".into(),
            message: "map has no entry for key \"param\"".into(),
        };
        assert_eq!(
            err.to_string(),
            "template: t:1:3: executing \"t\" at <.param>: map has no entry for key \"param\""
        );
    }

    #[test]
    fn missing_file_reads_like_open() {
        let io = std::io::Error::from(std::io::ErrorKind::NotFound);
        let err = EngineError::io("/nope", &io);
        assert_eq!(err.to_string(), "open /nope: no such file or directory");
    }
}
