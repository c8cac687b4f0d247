use thiserror::Error;

#[derive(Debug, Error)]
pub enum NightrunError {
    #[error("duplicate action: {0}")]
    DuplicateAction(String),

    #[error("action '{action}' depends on '{dependency}', which is not registered before it")]
    UnknownDependency { action: String, dependency: String },

    #[error("command failed with return code {code}: {command}")]
    CommandFailed { command: String, code: i32 },

    #[error("command terminated by signal: {command}")]
    CommandKilled { command: String },

    #[error("process {pid} still alive after SIGKILL")]
    Unkillable { pid: i32 },

    #[error("jobserver pipe closed")]
    JobserverClosed,

    #[error("{call} failed")]
    Sys {
        call: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl NightrunError {
    pub(crate) fn sys(call: &'static str) -> Self {
        NightrunError::Sys {
            call,
            source: std::io::Error::last_os_error(),
        }
    }
}

pub type Result<T> = std::result::Result<T, NightrunError>;
