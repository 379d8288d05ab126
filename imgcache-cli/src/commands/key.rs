//! Cache key generation command.

use std::collections::BTreeMap;

use clap::Args;
use imgcache::cache::generate_key;
use serde_json::Value;

/// Arguments for `imgcache key`.
#[derive(Debug, Args)]
pub struct KeyArgs {
    /// Source identifier (image URL or content hash)
    pub source: String,

    /// Processing parameter as NAME=VALUE; VALUE is parsed as JSON when
    /// possible (e.g. scale=4, denoise=true), otherwise taken as a string.
    /// May be repeated.
    #[arg(short, long = "param", value_parser = parse_param)]
    pub params: Vec<(String, Value)>,
}

/// Print the cache key for a source and parameter set.
pub fn run(args: KeyArgs) {
    let params: BTreeMap<String, Value> = args.params.into_iter().collect();
    println!("{}", generate_key(&args.source, &params));
}

/// Parse `NAME=VALUE` into a parameter pair.
fn parse_param(s: &str) -> Result<(String, Value), String> {
    let (name, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", s))?;

    let name = name.trim();
    if name.is_empty() {
        return Err(format!("parameter name is empty in '{}'", s));
    }

    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((name.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_param_json_values() {
        assert_eq!(parse_param("scale=4").unwrap(), ("scale".to_string(), json!(4)));
        assert_eq!(parse_param("denoise=true").unwrap().1, json!(true));
        assert_eq!(parse_param("strength=0.5").unwrap().1, json!(0.5));
        assert_eq!(
            parse_param(r#"grade={"contrast":1.1}"#).unwrap().1,
            json!({"contrast": 1.1})
        );
    }

    #[test]
    fn test_parse_param_string_fallback() {
        assert_eq!(parse_param("model=esrgan").unwrap().1, json!("esrgan"));
        assert_eq!(parse_param("note=a=b").unwrap().1, json!("a=b"));
        assert_eq!(parse_param("empty=").unwrap().1, json!(""));
    }

    #[test]
    fn test_parse_param_rejects_malformed() {
        assert!(parse_param("noequals").is_err());
        assert!(parse_param("=4").is_err());
    }
}
