//! Backend kinds exposed through the command surface.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One backend kind. Each kind gets its own session registry and config store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// Relational database
    Mysql,
    /// Key-value store
    Redis,
    /// Messaging cluster
    Pulsar,
}

impl ProviderType {
    pub const ALL: [ProviderType; 3] = [ProviderType::Mysql, ProviderType::Redis, ProviderType::Pulsar];

    /// Command namespace, e.g. `mysql` in `connect_mysql` and `mysql_exec`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Mysql => "mysql",
            ProviderType::Redis => "redis",
            ProviderType::Pulsar => "pulsar",
        }
    }

    /// Backend category, used in descriptions.
    pub fn category(&self) -> &'static str {
        match self {
            ProviderType::Mysql => "relational database",
            ProviderType::Redis => "key-value store",
            ProviderType::Pulsar => "messaging cluster",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mysql" => Ok(ProviderType::Mysql),
            "redis" => Ok(ProviderType::Redis),
            "pulsar" => Ok(ProviderType::Pulsar),
            other => Err(format!("unknown provider type '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_names() {
        for provider in ProviderType::ALL {
            assert_eq!(provider.as_str().parse::<ProviderType>().unwrap(), provider);
        }
        assert_eq!("MySQL".parse::<ProviderType>().unwrap(), ProviderType::Mysql);
        assert!("kafka".parse::<ProviderType>().is_err());
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&ProviderType::Pulsar).unwrap();
        assert_eq!(json, "\"pulsar\"");
    }
}
