//! Command line options shared by the binaries

use anyhow::{Context, Result};
use clap::Args;
use schema_flatter::NamingOptions;
use std::fs::File;
use std::io::BufReader;

/// Naming flags; individual flags override values read from `--naming`
#[derive(Args, Debug)]
pub struct NamingArgs {
    /// JSON file with naming options
    #[arg(long, value_name = "FILE")]
    pub naming: Option<String>,

    /// Separator between entity name components (default: "/")
    #[arg(long)]
    pub separator: Option<String>,

    /// Prefix of generated fields (default: "$")
    #[arg(long)]
    pub prefix: Option<String>,

    /// Stand-in for array indices (default: "@")
    #[arg(long)]
    pub placeholder: Option<String>,

    /// Separator between entity and property in inherited fields (default: "~")
    #[arg(long)]
    pub scope: Option<String>,
}

impl NamingArgs {
    pub fn naming_options(&self) -> Result<NamingOptions> {
        let mut options = match &self.naming {
            Some(path) => {
                let file = File::open(path)
                    .with_context(|| format!("Failed to open naming options: {}", path))?;
                serde_json::from_reader(BufReader::new(file))
                    .with_context(|| format!("Failed to parse naming options: {}", path))?
            }
            None => NamingOptions::default(),
        };
        if let Some(separator) = &self.separator {
            options.path_separator = separator.clone();
        }
        if let Some(prefix) = &self.prefix {
            options.generated_field_prefix = prefix.clone();
        }
        if let Some(placeholder) = &self.placeholder {
            options.placeholder = placeholder.clone();
        }
        if let Some(scope) = &self.scope {
            options.scope_specifier = scope.clone();
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    #[derive(Parser, Debug)]
    struct Cli {
        #[command(flatten)]
        naming: NamingArgs,
    }

    #[test]
    fn test_defaults_without_flags() {
        let cli = Cli::parse_from(["cli"]);
        assert_eq!(cli.naming.naming_options().unwrap(), NamingOptions::default());
    }

    #[test]
    fn test_flags_override_naming_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"pathSeparator": ".", "placeholder": "*"}}"#).unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let cli = Cli::parse_from(["cli", "--naming", &path, "--placeholder", "#", "--scope", ":"]);
        let options = cli.naming.naming_options().unwrap();
        assert_eq!(options.path_separator, ".");
        assert_eq!(options.placeholder, "#");
        assert_eq!(options.scope_specifier, ":");
        assert_eq!(options.generated_field_prefix, "$");
    }
}
