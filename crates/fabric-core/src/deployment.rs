//! The deployment mode a Connector runs under. Gates `set_config` and
//! selects whether the external configurator or `TESTING`'s direct
//! overrides are authoritative.

use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeploymentMode {
    #[default]
    Local,
    Testing,
    Lab,
    Prod,
}

impl DeploymentMode {
    /// `SetConfig` is only permitted in `LOCAL` and `TESTING`; `LAB`/`PROD`
    /// are expected to be driven by an external configurator instead.
    pub fn allows_set_config(self) -> bool {
        matches!(self, DeploymentMode::Local | DeploymentMode::Testing)
    }
}

impl FromStr for DeploymentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LOCAL" => Ok(DeploymentMode::Local),
            "TESTING" => Ok(DeploymentMode::Testing),
            "LAB" => Ok(DeploymentMode::Lab),
            "PROD" => Ok(DeploymentMode::Prod),
            other => Err(format!("unrecognized deployment mode: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_and_testing_allow_set_config() {
        assert!(DeploymentMode::Local.allows_set_config());
        assert!(DeploymentMode::Testing.allows_set_config());
        assert!(!DeploymentMode::Lab.allows_set_config());
        assert!(!DeploymentMode::Prod.allows_set_config());
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("prod".parse::<DeploymentMode>().unwrap(), DeploymentMode::Prod);
        assert!("unknown".parse::<DeploymentMode>().is_err());
    }
}
