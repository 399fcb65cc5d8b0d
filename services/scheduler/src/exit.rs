//! Process exit codes observable by the supervisor.

use tracing::error;

/// Exit codes for the scheduler process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    InitializationFailure,
    RegistrationFailure,
    Disconnected,
    Error,
    LockUnavailable,
    ApiServerError,
    AlreadyUninstalling,
    DriverExited,
}

impl ExitCode {
    /// The numeric process exit code.
    #[must_use]
    pub fn value(self) -> i32 {
        match self {
            ExitCode::Success => 0,
            ExitCode::InitializationFailure => 1,
            ExitCode::RegistrationFailure => 2,
            ExitCode::Disconnected => 5,
            ExitCode::Error => 6,
            ExitCode::LockUnavailable => 8,
            ExitCode::ApiServerError => 9,
            ExitCode::AlreadyUninstalling => 11,
            ExitCode::DriverExited => 13,
        }
    }
}

/// Terminates the process immediately with the provided code.
///
/// Used for unrecoverable states where continuing would leave a zombie
/// scheduler holding registrations it can no longer service.
pub fn hard_exit(code: ExitCode) -> ! {
    error!(exit_code = code.value(), "Scheduler exiting");
    std::process::exit(code.value());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_values() {
        assert_eq!(ExitCode::Success.value(), 0);
        assert_eq!(ExitCode::InitializationFailure.value(), 1);
        assert_eq!(ExitCode::RegistrationFailure.value(), 2);
        assert_eq!(ExitCode::Disconnected.value(), 5);
        assert_eq!(ExitCode::Error.value(), 6);
        assert_eq!(ExitCode::LockUnavailable.value(), 8);
        assert_eq!(ExitCode::ApiServerError.value(), 9);
        assert_eq!(ExitCode::AlreadyUninstalling.value(), 11);
        assert_eq!(ExitCode::DriverExited.value(), 13);
    }
}
