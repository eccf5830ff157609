use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Bound satisfied by every loadable config struct: defaults + (de)serializable.
pub trait ConfigLoaderConfig: Default + Serialize + DeserializeOwned {}
impl<T: Default + Serialize + DeserializeOwned> ConfigLoaderConfig for T {}

/// Loads a `T` by layering, lowest priority first: compiled-in `Default`, an optional TOML
/// file, then environment variables prefixed `NIX_BUILD_`. CLI flags are applied by the
/// caller on top of the loaded value, the same override order `cloud-service` uses.
pub struct ConfigLoader<T> {
    pub config_file_name: PathBuf,
    _marker: std::marker::PhantomData<T>,
}

impl<T: ConfigLoaderConfig> ConfigLoader<T> {
    pub fn new(config_file_name: &Path) -> Self {
        ConfigLoader {
            config_file_name: config_file_name.to_path_buf(),
            _marker: std::marker::PhantomData,
        }
    }

    fn figment(&self) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(T::default()));
        if self.config_file_name.exists() {
            figment = figment.merge(Toml::file(&self.config_file_name));
        }
        figment.merge(Env::prefixed("NIX_BUILD_").split("__"))
    }

    pub fn load(&self) -> figment::Result<T> {
        self.figment().extract()
    }

    /// Loads the effective config unless `dump` is set, in which case it prints the merged
    /// config (redacted via the caller's `SafeDisplay`) and returns `None` so the caller can
    /// exit without starting a server. Mirrors `load_or_dump_config` in the cloud services.
    pub fn load_or_dump<F>(&self, dump: bool, redact: F) -> Option<T>
    where
        F: Fn(&T) -> String,
    {
        match self.load() {
            Ok(config) => {
                if dump {
                    println!("{}", redact(&config));
                    None
                } else {
                    Some(config)
                }
            }
            Err(err) => {
                eprintln!("Failed to load configuration: {err}");
                std::process::exit(1);
            }
        }
    }
}

/// A single worked example of a config variant, used only in tests to assert every
/// documented shape actually deserializes.
pub struct ConfigExample<T>(pub &'static str, pub T);

pub trait HasConfigExamples<T> {
    fn examples() -> Vec<ConfigExample<T>> {
        vec![]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Example {
        port: u16,
    }

    impl Default for Example {
        fn default() -> Self {
            Example { port: 2222 }
        }
    }

    #[test]
    fn loads_defaults_when_no_file_present() {
        let loader = ConfigLoader::<Example>::new(Path::new("/nonexistent/path.toml"));
        let config = loader.load().expect("defaults alone must be loadable");
        assert_eq!(config.port, 2222);
    }
}
