//! Location specifications as accepted by `break` and `-break-insert`.
use std::sync::OnceLock;

use regex::Regex;

/// A parsed location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Linespec {
    /// `[file:]line`; no file means the default file.
    Line {
        /// Source file.
        file: Option<String>,
        /// Line number.
        line: u32,
    },
    /// `[file:]function`
    Function {
        /// Source file.
        file: Option<String>,
        /// Function name.
        name: String,
    },
    /// `*address`
    Address(u64),
}

fn linespec_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:(?P<file>[^:\s]+):)?(?:(?P<line>\d+)|(?P<func>[A-Za-z_][A-Za-z0-9_]*))$")
            .expect("linespec regex is valid")
    })
}

/// Parse a linespec such as `main.c:12`, `util.c:helper`, `main` or `*0x400028`.
pub fn parse_linespec(spec: &str) -> Result<Linespec, String> {
    if let Some(addr) = spec.strip_prefix('*') {
        let parsed = match addr.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => addr.parse(),
        };
        return parsed
            .map(Linespec::Address)
            .map_err(|_| format!("Invalid number \"{addr}\"."));
    }
    let caps = linespec_re()
        .captures(spec)
        .ok_or_else(|| format!("Function \"{spec}\" not defined."))?;
    let file = caps.name("file").map(|m| m.as_str().to_string());
    if let Some(line) = caps.name("line") {
        let line = line
            .as_str()
            .parse()
            .map_err(|_| format!("Invalid line \"{}\".", line.as_str()))?;
        return Ok(Linespec::Line { file, line });
    }
    Ok(Linespec::Function {
        file,
        name: caps["func"].to_string(),
    })
}
