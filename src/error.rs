use thiserror::Error;

#[derive(Error, Debug)]
pub enum MkfatError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Geometry not feasible: {0}")]
    GeometryInfeasible(String),

    #[error("Device {path} unavailable: {reason} ({hint})")]
    DeviceUnavailable {
        path: String,
        reason: String,
        hint: String,
    },

    #[error("Device too small: need {needed} bytes, have {available} bytes")]
    DeviceTooSmall { needed: u64, available: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation interrupted")]
    Interrupted,

    #[error("{} bad sector(s) detected: {}", .0.len(), format_lbas(.0))]
    BadSectors(Vec<u64>),
}

impl MkfatError {
    /// Process exit status for this error class.
    pub fn exit_code(&self) -> i32 {
        match self {
            MkfatError::Interrupted => 130,
            MkfatError::Config(_) | MkfatError::GeometryInfeasible(_) => 2,
            _ => 1,
        }
    }
}

/// Exit status for an error chain: the first `MkfatError` found decides,
/// anything else is a generic failure.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|e| e.downcast_ref::<MkfatError>())
        .map(MkfatError::exit_code)
        .unwrap_or(1)
}

fn format_lbas(lbas: &[u64]) -> String {
    const SHOWN: usize = 16;
    let mut s = lbas
        .iter()
        .take(SHOWN)
        .map(|l| l.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    if lbas.len() > SHOWN {
        s.push_str(&format!(", ... (+{} more)", lbas.len() - SHOWN));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_exit_codes() {
        assert_eq!(MkfatError::Interrupted.exit_code(), 130);
        assert_eq!(MkfatError::Config("x".into()).exit_code(), 2);
        assert_eq!(MkfatError::GeometryInfeasible("x".into()).exit_code(), 2);
        assert_eq!(
            MkfatError::DeviceTooSmall {
                needed: 2,
                available: 1
            }
            .exit_code(),
            1
        );
    }

    #[test]
    fn test_exit_code_through_context() {
        let res: Result<(), MkfatError> = Err(MkfatError::Interrupted);
        let err = res.context("formatting image").unwrap_err();
        assert_eq!(exit_code_for(&err), 130);

        let plain = anyhow::anyhow!("something else");
        assert_eq!(exit_code_for(&plain), 1);
    }

    #[test]
    fn test_bad_sector_message() {
        let msg = MkfatError::BadSectors(vec![100, 105]).to_string();
        assert_eq!(msg, "2 bad sector(s) detected: 100, 105");
    }
}
