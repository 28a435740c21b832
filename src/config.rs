//! Configuration for the cbmimage crate
#![warn(missing_docs)]
#![warn(unsafe_code)]

use crate::error;
use forbidden_bands::{self, Configuration as ForbiddenBandsConfiguration};

/// Configuration format
pub struct Config {
    /// Version of the configuration root
    pub version: String,

    /// The general settings
    pub settings: config::Config,

    /// Configuration for decoding PETSCII strings (disk names, file
    /// names, partition labels) into Unicode for display.
    pub forbidden_bands_config: forbidden_bands::Config,
}

/// Trait that defines a set of methods that allow loading and
/// unloading configuration data
pub trait Configuration {
    /// Load the configuration data from the default configuration
    /// string
    fn load(settings: config::Config) -> std::result::Result<Config, error::Error>;
}

impl Configuration for Config {
    fn load(settings: config::Config) -> std::result::Result<Config, error::Error> {
        let forbidden_bands_config =
            forbidden_bands::Config::load().expect("Error loading forbidden bands config");

        let config = Config {
            version: String::from("0.1.0"),
            settings,
            forbidden_bands_config,
        };

        Ok(config)
    }
}

/// `forbidden_bands::Config` does not implement `Clone`; rebuild an
/// equivalent value field-by-field from its public fields instead.
pub fn clone_forbidden_bands_config(config: &forbidden_bands::Config) -> forbidden_bands::Config {
    forbidden_bands::Config {
        version: config.version.clone(),
        petscii: config.petscii.clone(),
    }
}

impl Config {
    /// Whether the BAM consistency check (bit/counter/selector
    /// mismatches) should be skipped during validation.  Defaults to
    /// false: BAM errors are reported, never silently ignored.
    pub fn ignore_checksums(&self) -> bool {
        self.settings
            .get_bool("ignore-checksums")
            .unwrap_or(false)
    }

    /// Whether an unrecognized image size should be treated as a
    /// hard error (the default) or given a best-effort guess based on
    /// the closest known geometry.
    pub fn strict_format_detection(&self) -> bool {
        self.settings
            .get_bool("strict-format-detection")
            .unwrap_or(true)
    }
}
