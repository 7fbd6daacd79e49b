use crate::config::AppConfigOverrides;
use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;

const USAGE: &str = "Supported flags: --width, --height, --vsync, --asset, --tools.";

/// Command-line overrides layered on top of the JSON config.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CliOverrides {
    width: Option<u32>,
    height: Option<u32>,
    vsync: Option<bool>,
    asset: Option<PathBuf>,
    tools: Option<PathBuf>,
}

impl CliOverrides {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args())
    }

    /// Accepts `--flag value` and `--flag=value`; the last occurrence of a
    /// repeated flag wins. The first argument is taken to be the program name
    /// and skipped.
    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut overrides = CliOverrides::default();
        let mut iter = args.into_iter().skip(1);
        while let Some(arg) = iter.next() {
            let arg = arg.as_ref();
            let Some(flag) = arg.strip_prefix("--") else {
                bail!("Unexpected argument '{arg}'. {USAGE}");
            };
            let (name, value) = match flag.split_once('=') {
                Some((name, value)) => (name.to_string(), value.to_string()),
                None => {
                    let Some(value) = iter.next() else {
                        bail!("Expected a value after '{arg}'");
                    };
                    (flag.to_string(), value.as_ref().to_string())
                }
            };
            overrides.apply(&name, value)?;
        }
        Ok(overrides)
    }

    fn apply(&mut self, name: &str, value: String) -> Result<()> {
        match name {
            "width" => self.width = Some(parse_dimension("width", &value)?),
            "height" => self.height = Some(parse_dimension("height", &value)?),
            "vsync" => self.vsync = Some(parse_switch("vsync", &value)?),
            "asset" => self.asset = Some(PathBuf::from(value)),
            "tools" => self.tools = Some(PathBuf::from(value)),
            _ => bail!("Unknown flag '--{name}'. {USAGE}"),
        }
        Ok(())
    }

    pub fn into_config_overrides(self) -> AppConfigOverrides {
        AppConfigOverrides {
            width: self.width,
            height: self.height,
            vsync: self.vsync,
            asset: self.asset,
            tools_manifest: self.tools,
        }
    }
}

fn parse_dimension(flag: &str, value: &str) -> Result<u32> {
    let parsed = value.parse::<u32>().with_context(|| format!("Invalid {flag} '{value}'"))?;
    if parsed == 0 {
        bail!("{flag} must be greater than zero");
    }
    Ok(parsed)
}

fn parse_switch(flag: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => bail!("Invalid {flag} value '{other}'. Use on/off or true/false."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_spaced_and_equals_forms() {
        let overrides = CliOverrides::parse(["app", "--width", "1600", "--height=900", "--vsync", "off"])
            .expect("parse");
        assert_eq!(overrides.width, Some(1600));
        assert_eq!(overrides.height, Some(900));
        assert_eq!(overrides.vsync, Some(false));
    }

    #[test]
    fn parses_asset_and_tools_paths() {
        let overrides =
            CliOverrides::parse(["app", "--asset", "models/helmet.gltf", "--tools=custom/tools.json"])
                .expect("parse");
        let cfg = overrides.into_config_overrides();
        assert_eq!(cfg.asset, Some(PathBuf::from("models/helmet.gltf")));
        assert_eq!(cfg.tools_manifest, Some(PathBuf::from("custom/tools.json")));
    }

    #[test]
    fn repeated_flags_keep_the_last_value() {
        let overrides = CliOverrides::parse(["app", "--width", "800", "--width", "1920"]).expect("parse");
        assert_eq!(overrides.width, Some(1920));
        assert_eq!(overrides.height, None);
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        assert!(CliOverrides::parse(["app", "--width", "0"]).is_err());
        assert!(CliOverrides::parse(["app", "--height=0"]).is_err());
    }

    #[test]
    fn missing_values_and_unknown_flags_error() {
        let missing = CliOverrides::parse(["app", "--asset"]).unwrap_err();
        assert!(missing.to_string().contains("Expected a value"));
        let unknown = CliOverrides::parse(["app", "--foo", "bar"]).unwrap_err();
        assert!(unknown.to_string().contains("Unknown flag"));
        let bare = CliOverrides::parse(["app", "oops"]).unwrap_err();
        assert!(bare.to_string().contains("Unexpected argument"));
    }
}
