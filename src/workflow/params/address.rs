//! Value addressing
//!
//! Every value a run produces or consumes lives in the value store under a
//! `ValueId`, written as `"{io_type}.{node_id}.{service_name}.{param_name}"`.
//! The parameter name is the remainder after the third dot, so it may itself
//! contain dots.

use std::fmt;
use std::str::FromStr;

use crate::runtime::ParamResolutionError;

/// Which side of a service a value belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IoType {
    Input,
    Output,
    Env,
    Asset,
}

impl IoType {
    pub fn prefix(self) -> &'static str {
        match self {
            IoType::Input => "I",
            IoType::Output => "O",
            IoType::Env => "E",
            IoType::Asset => "A",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "I" => Some(IoType::Input),
            "O" => Some(IoType::Output),
            "E" => Some(IoType::Env),
            "A" => Some(IoType::Asset),
            _ => None,
        }
    }
}

/// Typed store address
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId {
    pub io_type: IoType,
    pub service_key: String,
    pub param_name: String,
}

impl ValueId {
    pub fn new(io_type: IoType, service_key: &str, param_name: &str) -> Self {
        Self {
            io_type,
            service_key: service_key.to_string(),
            param_name: param_name.to_string(),
        }
    }

    pub fn input(service_key: &str, param_name: &str) -> Self {
        Self::new(IoType::Input, service_key, param_name)
    }

    pub fn output(service_key: &str, param_name: &str) -> Self {
        Self::new(IoType::Output, service_key, param_name)
    }

    pub fn env(service_key: &str, param_name: &str) -> Self {
        Self::new(IoType::Env, service_key, param_name)
    }

    pub fn asset(service_key: &str, param_name: &str) -> Self {
        Self::new(IoType::Asset, service_key, param_name)
    }

    /// Parse an upstream-output reference `node.service.key` as `O.node.service.key`
    pub fn from_output_source(source: &str) -> Result<Self, ParamResolutionError> {
        let mut parts = source.splitn(3, '.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(node), Some(service), Some(param))
                if !node.is_empty() && !service.is_empty() && !param.is_empty() =>
            {
                Ok(Self::output(&format!("{}.{}", node, service), param))
            }
            _ => Err(ParamResolutionError::BadAddress(source.to_string())),
        }
    }

    /// Parse `I.node.service.key` (or `O.`, `E.`, `A.`)
    pub fn parse(address: &str) -> Result<Self, ParamResolutionError> {
        let bad = || ParamResolutionError::BadAddress(address.to_string());
        let mut parts = address.splitn(4, '.');
        let io_type = parts.next().and_then(IoType::from_prefix).ok_or_else(bad)?;
        match (parts.next(), parts.next(), parts.next()) {
            (Some(node), Some(service), Some(param))
                if !node.is_empty() && !service.is_empty() && !param.is_empty() =>
            {
                Ok(Self::new(io_type, &format!("{}.{}", node, service), param))
            }
            _ => Err(bad()),
        }
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}",
            self.io_type.prefix(),
            self.service_key,
            self.param_name
        )
    }
}

impl FromStr for ValueId {
    type Err = ParamResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_and_parse() {
        let id = ValueId::output("node_a.search", "hits");
        assert_eq!(id.to_string(), "O.node_a.search.hits");
        assert_eq!(ValueId::parse("O.node_a.search.hits").unwrap(), id);
    }

    #[test]
    fn test_param_name_keeps_dots() {
        let id: ValueId = "I.n.s.config.depth".parse().unwrap();
        assert_eq!(id.io_type, IoType::Input);
        assert_eq!(id.service_key, "n.s");
        assert_eq!(id.param_name, "config.depth");
    }

    #[test]
    fn test_output_source() {
        let id = ValueId::from_output_source("n.s.total").unwrap();
        assert_eq!(id.to_string(), "O.n.s.total");
        assert!(ValueId::from_output_source("n.s").is_err());
    }

    #[test]
    fn test_rejects_bad_addresses() {
        assert!(ValueId::parse("X.n.s.k").is_err());
        assert!(ValueId::parse("O.n.s").is_err());
        assert!(ValueId::parse("O..s.k").is_err());
        assert_eq!(
            ValueId::parse("nope"),
            Err(ParamResolutionError::BadAddress("nope".to_string()))
        );
    }
}
