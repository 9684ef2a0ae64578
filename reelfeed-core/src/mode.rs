//! Runtime mode selection for Reelfeed collaborators.

use serde::{Deserialize, Serialize};

/// Which collaborators back a session.
///
/// Production talks to the HTTP feed API and scans a real gallery
/// directory; development wires in the deterministic simulation so the
/// pipeline runs offline with identical interfaces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeMode {
    Production,
    #[default]
    Development,
}

impl RuntimeMode {
    pub fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }

    pub fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }

    /// Mode implied by the simulation switch of the configuration.
    pub fn from_simulation_flag(simulation_enabled: bool) -> Self {
        if simulation_enabled {
            Self::Development
        } else {
            Self::Production
        }
    }
}

impl std::fmt::Display for RuntimeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Development => write!(f, "development"),
        }
    }
}

impl std::str::FromStr for RuntimeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "development" | "dev" | "sim" => Ok(Self::Development),
            _ => Err(format!(
                "Unknown runtime mode '{s}', expected production or development"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!("PROD".parse::<RuntimeMode>(), Ok(RuntimeMode::Production));
        assert_eq!("sim".parse::<RuntimeMode>(), Ok(RuntimeMode::Development));
        assert!("staging".parse::<RuntimeMode>().is_err());
    }

    #[test]
    fn test_default_and_simulation_flag() {
        assert!(RuntimeMode::default().is_development());
        assert!(RuntimeMode::from_simulation_flag(false).is_production());
        assert_eq!(RuntimeMode::Production.to_string(), "production");
    }
}
