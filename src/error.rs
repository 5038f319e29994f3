use thiserror::Error;
use trestle_bot_core::error::TaskError;

pub const SUCCESS_EXIT_CODE: i32 = 0;
pub const ERROR_EXIT_CODE: i32 = 1;
pub const INVALID_ARGS_EXIT_CODE: i32 = 2;

/// A command line argument, or a combination of them, that cannot be used.
#[derive(Debug, Error)]
#[error("Invalid args {arg}: {message}")]
pub struct InvalidArgs {
    pub arg: String,
    pub message: String,
}

impl InvalidArgs {
    pub fn new(arg: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            arg: arg.into(),
            message: message.into(),
        }
    }
}

/// Exit code for an error returned by a command.
///
/// Bad arguments anywhere in the cause chain give
/// [`INVALID_ARGS_EXIT_CODE`], everything else [`ERROR_EXIT_CODE`].
pub fn exit_code(err: &anyhow::Error) -> i32 {
    let invalid = err.chain().any(|cause| {
        cause.is::<InvalidArgs>()
            || cause
                .downcast_ref::<TaskError>()
                .is_some_and(TaskError::is_invalid_argument)
    });
    if invalid {
        INVALID_ARGS_EXIT_CODE
    } else {
        ERROR_EXIT_CODE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use std::path::PathBuf;
    use trestle_bot_core::error::RepoError;

    #[test]
    fn invalid_arguments_map_to_exit_code_two() {
        let err = anyhow::Error::new(InvalidArgs::new("--with-token", "missing token"));
        assert_eq!(err.to_string(), "Invalid args --with-token: missing token");
        assert_eq!(exit_code(&err), INVALID_ARGS_EXIT_CODE);

        let err: anyhow::Error = Err::<(), _>(RepoError::PreTask(TaskError::InvalidWorkspace(
            PathBuf::from("ws"),
        )))
        .context("autosync failed")
        .unwrap_err();
        assert_eq!(exit_code(&err), INVALID_ARGS_EXIT_CODE);
    }

    #[test]
    fn runtime_failures_map_to_exit_code_one() {
        let err = anyhow::Error::new(TaskError::NoRules("compdef".into()));
        assert_eq!(exit_code(&err), ERROR_EXIT_CODE);
    }
}
