/*!
Connector argument handler.
*/

use std::str::FromStr;

use crate::error::{Error, ErrorKind, ErrorOrigin, Result};

use hashbrown::HashMap;

/// Argument wrapper for connectors
///
/// # Examples
///
/// Construct from a string:
/// ```
/// use memscope::connector::ConnectorArgs;
///
/// let argstr = "/dev/mem,arch=x64";
/// let args = ConnectorArgs::parse(argstr).unwrap();
/// assert_eq!(args.get_default().unwrap(), "/dev/mem");
/// ```
///
/// Construct as builder:
/// ```
/// use memscope::connector::ConnectorArgs;
///
/// let args = ConnectorArgs::new()
///     .insert("device", "/dev/mem")
///     .insert("arch", "aarch64");
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConnectorArgs {
    map: HashMap<String, String>,
}

impl ConnectorArgs {
    /// Creates an empty `ConnectorArgs` struct.
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Creates a `ConnectorArgs` struct with a default (unnamed) value.
    pub fn with_default(value: &str) -> Self {
        Self::new().insert("default", value)
    }

    /// Tries to create a `ConnectorArgs` structure from an argument string.
    ///
    /// The argument string is a string of comma seperated key-value pairs.
    ///
    /// An argument string can just contain keys and values:
    /// `opt1=val1,opt2=val2,opt3=val3`
    ///
    /// The argument string can also contain a default value as the first entry
    /// which will be placed as a default argument:
    /// `default_value,opt1=val1,opt2=val2`
    ///
    /// Any other entry without a value is rejected.
    pub fn parse(args: &str) -> Result<Self> {
        let mut map = HashMap::new();

        for (i, kv) in args.split(',').enumerate() {
            match kv.split_once('=') {
                Some((key, value)) if !key.is_empty() => {
                    map.insert(key.to_string(), value.to_string());
                }
                None if i == 0 && !kv.is_empty() => {
                    map.insert("default".to_string(), kv.to_string());
                }
                None if kv.is_empty() => {}
                _ => {
                    return Err(Error(ErrorOrigin::Args, ErrorKind::Configuration)
                        .log_error(format_args!("malformed argument {:?}", kv)))
                }
            }
        }

        Ok(Self { map })
    }

    /// Consumes self, inserts the given key-value pair and returns the self again.
    pub fn insert(mut self, key: &str, value: &str) -> Self {
        self.map.insert(key.to_string(), value.to_string());
        self
    }

    /// Tries to retrieve an entry from the options map.
    /// If the entry was not found this function returns a `None` value.
    pub fn get(&self, key: &str) -> Option<&String> {
        self.map.get(key)
    }

    /// Tries to retrieve the default entry from the options map.
    ///
    /// This function is a convenience wrapper for `args.get("default")`.
    pub fn get_default(&self) -> Option<&String> {
        self.get("default")
    }

    /// Parses the entry `key` into `T`.
    ///
    /// Returns `Ok(None)` if the entry does not exist and a `Configuration` error
    /// if it does not parse.
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        self.get(key)
            .map(|value| {
                value.parse::<T>().map_err(|_| {
                    Error(ErrorOrigin::Args, ErrorKind::Configuration)
                        .log_error(format_args!("invalid value {:?} for {}", value, key))
                })
            })
            .transpose()
    }
}

impl TryFrom<&str> for ConnectorArgs {
    type Error = Error;

    fn try_from(args: &str) -> Result<Self> {
        ConnectorArgs::parse(args)
    }
}

impl FromStr for ConnectorArgs {
    type Err = Error;

    fn from_str(args: &str) -> Result<Self> {
        ConnectorArgs::parse(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::architecture::ArchitectureIdent;

    #[test]
    pub fn from_str() {
        let argstr = "device=/dev/mem,arch=x64";
        let args = ConnectorArgs::parse(argstr).unwrap();
        assert_eq!(args.get("device").unwrap(), "/dev/mem");
        assert_eq!(args.get("arch").unwrap(), "x64");
        assert_eq!(args.get_default(), None);
    }

    #[test]
    pub fn from_str_default() {
        let argstr = "/tmp/image.raw,arch=aarch64";
        let args = ConnectorArgs::parse(argstr).unwrap();
        assert_eq!(args.get_default().unwrap(), "/tmp/image.raw");
        assert_eq!(args.get("arch").unwrap(), "aarch64");
    }

    #[test]
    pub fn default_not_first() {
        assert!(ConnectorArgs::parse("arch=x64,/dev/mem").is_err());
    }

    #[test]
    pub fn parse_empty() {
        let args = ConnectorArgs::parse("").unwrap();
        assert_eq!(args.get_default(), None);
    }

    #[test]
    pub fn builder() {
        let args = ConnectorArgs::with_default("/dev/mem").insert("arch", "arm64");
        assert_eq!(args.get_default().unwrap(), "/dev/mem");
        assert_eq!(
            args.get_parsed::<ArchitectureIdent>("arch").unwrap(),
            Some(ArchitectureIdent::AArch64)
        );
        assert_eq!(args.get_parsed::<ArchitectureIdent>("none").unwrap(), None);
    }

    #[test]
    pub fn parsed_invalid() {
        let args = ConnectorArgs::new().insert("arch", "sparc");
        assert_eq!(
            args.get_parsed::<ArchitectureIdent>("arch").unwrap_err().kind(),
            ErrorKind::Configuration
        );
    }
}
