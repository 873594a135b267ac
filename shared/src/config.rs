use tracing::warn;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Backend {
    Memory(Option<u64>), // max entries
    Sled(String),        // data dir
}

#[derive(Clone, Debug)]
pub struct Config {
    pub backend: Backend,
    pub default_expiry_secs: Option<u64>,
}

impl Config {
    const DEFAULT_DATA_DIR: &str = "./data";

    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source (used by tests)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir =
            lookup("TRIPWIRE_DATA_DIR").unwrap_or_else(|| Self::DEFAULT_DATA_DIR.to_string());
        let max_entries = parse_optional(&lookup, "TRIPWIRE_MAX_ENTRIES");
        let default_expiry_secs = parse_optional(&lookup, "TRIPWIRE_DEFAULT_EXPIRY_SECS");

        let backend = match lookup("TRIPWIRE_BACKEND").as_deref() {
            None | Some("memory") => Backend::Memory(max_entries),
            Some("sled") => Backend::Sled(data_dir),
            Some(other) => {
                warn!("Unknown TRIPWIRE_BACKEND '{}', falling back to memory", other);
                Backend::Memory(max_entries)
            }
        };

        Self {
            backend,
            default_expiry_secs,
        }
    }
}

fn parse_optional(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<u64> {
    let raw = lookup(name)?;
    match raw.trim().parse::<u64>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("{} is not a valid number ('{}'), ignoring", name, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_to_unbounded_memory() {
        let config = Config::from_lookup(lookup(&[]));
        assert_eq!(config.backend, Backend::Memory(None));
        assert_eq!(config.default_expiry_secs, None);
    }

    #[test]
    fn test_sled_backend_uses_data_dir() {
        let config = Config::from_lookup(lookup(&[
            ("TRIPWIRE_BACKEND", "sled"),
            ("TRIPWIRE_DATA_DIR", "/tmp/tripwire"),
            ("TRIPWIRE_DEFAULT_EXPIRY_SECS", "60"),
        ]));
        assert_eq!(config.backend, Backend::Sled("/tmp/tripwire".to_string()));
        assert_eq!(config.default_expiry_secs, Some(60));
    }

    #[test]
    fn test_invalid_numbers_are_ignored() {
        let config = Config::from_lookup(lookup(&[
            ("TRIPWIRE_MAX_ENTRIES", "lots"),
            ("TRIPWIRE_DEFAULT_EXPIRY_SECS", "-1"),
        ]));
        assert_eq!(config.backend, Backend::Memory(None));
        assert_eq!(config.default_expiry_secs, None);
    }

    #[test]
    fn test_unknown_backend_falls_back_to_memory() {
        let config = Config::from_lookup(lookup(&[
            ("TRIPWIRE_BACKEND", "redis"),
            ("TRIPWIRE_MAX_ENTRIES", "100"),
        ]));
        assert_eq!(config.backend, Backend::Memory(Some(100)));
    }
}
