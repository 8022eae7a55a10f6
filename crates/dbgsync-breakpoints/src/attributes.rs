//! Platform breakpoint attributes and their natural key.
//!
//! Two breakpoint specifications denote the same platform breakpoint exactly
//! when their [`BreakpointKey`]s are equal. Keys compare attributes as
//! written, never the code address a location resolves to, so `main` and
//! `main.c:main` stay distinct even though the backend puts them at the same
//! instruction.
use std::fmt;

use dbgsync_mi::command::{BreakInsert, InsertLocation, WatchMode};
use dbgsync_mi::Linespec;
use serde::Serialize;

/// Which family a breakpoint belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakpointKind {
    /// `file:line`
    Line,
    /// `[file:]function`
    Function,
    /// `*address`
    Address,
    /// Data watchpoint.
    Watch,
}

/// Where a breakpoint applies. Doubles as the natural key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BreakpointLocation {
    /// A source line.
    Line {
        /// Source file as written.
        file: String,
        /// 1-based line.
        line: u32,
    },
    /// A function entry. A missing file never matches a present one.
    Function {
        /// Qualifying source file, if given.
        file: Option<String>,
        /// Function name.
        function: String,
    },
    /// A literal code address.
    Address {
        /// The address.
        address: u64,
    },
    /// A watched expression.
    Watch {
        /// Expression text.
        expression: String,
        /// Trigger on reads.
        read: bool,
        /// Trigger on writes.
        write: bool,
    },
}

impl BreakpointLocation {
    /// The breakpoint family.
    pub fn kind(&self) -> BreakpointKind {
        match self {
            BreakpointLocation::Line { .. } => BreakpointKind::Line,
            BreakpointLocation::Function { .. } => BreakpointKind::Function,
            BreakpointLocation::Address { .. } => BreakpointKind::Address,
            BreakpointLocation::Watch { .. } => BreakpointKind::Watch,
        }
    }

    /// The natural key of this location.
    pub fn key(&self) -> BreakpointKey {
        BreakpointKey(self.clone())
    }

    /// Build a code location from a parsed linespec.
    ///
    /// A bare line number takes `default_file`; without one there is no
    /// usable key.
    pub fn from_linespec(spec: Linespec, default_file: Option<&str>) -> Option<Self> {
        match spec {
            Linespec::Line { file, line } => Some(BreakpointLocation::Line {
                file: file.or_else(|| default_file.map(str::to_string))?,
                line,
            }),
            Linespec::Function { file, name } => Some(BreakpointLocation::Function {
                file,
                function: name,
            }),
            Linespec::Address(address) => Some(BreakpointLocation::Address { address }),
        }
    }

    /// Watch mode for a watch location; `None` for code locations.
    pub fn watch_mode(&self) -> Option<WatchMode> {
        match self {
            BreakpointLocation::Watch { read, write, .. } => Some(match (read, write) {
                (true, true) => WatchMode::Access,
                (true, false) => WatchMode::Read,
                _ => WatchMode::Write,
            }),
            _ => None,
        }
    }

    fn insert_location(&self) -> Option<InsertLocation> {
        match self {
            BreakpointLocation::Line { file, line } => Some(InsertLocation::Line {
                file: file.clone(),
                line: *line,
            }),
            BreakpointLocation::Function { file, function } => Some(InsertLocation::Function {
                file: file.clone(),
                function: function.clone(),
            }),
            BreakpointLocation::Address { address } => {
                Some(InsertLocation::Address(format!("{address:#x}")))
            }
            BreakpointLocation::Watch { .. } => None,
        }
    }
}

impl fmt::Display for BreakpointLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakpointLocation::Line { file, line } => write!(f, "line {file}:{line}"),
            BreakpointLocation::Function {
                file: Some(file),
                function,
            } => write!(f, "function {file}:{function}"),
            BreakpointLocation::Function {
                file: None,
                function,
            } => write!(f, "function {function}"),
            BreakpointLocation::Address { address } => write!(f, "address {address:#x}"),
            BreakpointLocation::Watch {
                expression,
                read,
                write,
            } => {
                let mode = match (read, write) {
                    (true, true) => "rw",
                    (true, false) => "r",
                    _ => "w",
                };
                write!(f, "watch {expression} ({mode})")
            }
        }
    }
}

/// Identity of a platform breakpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BreakpointKey(BreakpointLocation);

impl BreakpointKey {
    /// The location this key was derived from.
    pub fn location(&self) -> &BreakpointLocation {
        &self.0
    }
}

impl fmt::Display for BreakpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Attributes of a platform breakpoint, also used to request one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakpointAttributes {
    /// Location and natural key.
    pub location: BreakpointLocation,
    /// Whether the breakpoint is enabled.
    pub enabled: bool,
    /// Condition expression; never empty.
    pub condition: Option<String>,
    /// Crossings to skip before stopping.
    pub ignore_count: u32,
}

impl BreakpointAttributes {
    /// Enabled, unconditional attributes at `location`.
    pub fn new(location: BreakpointLocation) -> Self {
        Self {
            location,
            enabled: true,
            condition: None,
            ignore_count: 0,
        }
    }

    /// A line breakpoint.
    pub fn line(file: impl Into<String>, line: u32) -> Self {
        Self::new(BreakpointLocation::Line {
            file: file.into(),
            line,
        })
    }

    /// A function breakpoint, optionally qualified by file.
    pub fn function(file: Option<&str>, function: impl Into<String>) -> Self {
        Self::new(BreakpointLocation::Function {
            file: file.map(str::to_string),
            function: function.into(),
        })
    }

    /// An address breakpoint.
    pub fn address(address: u64) -> Self {
        Self::new(BreakpointLocation::Address { address })
    }

    /// A watchpoint.
    pub fn watch(expression: impl Into<String>, read: bool, write: bool) -> Self {
        Self::new(BreakpointLocation::Watch {
            expression: expression.into(),
            read,
            write,
        })
    }

    /// Set the condition. An empty string clears it.
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = normalize_condition(condition.into());
        self
    }

    /// Set the ignore count.
    pub fn with_ignore_count(mut self, count: u32) -> Self {
        self.ignore_count = count;
        self
    }

    /// Mark as disabled.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// The natural key.
    pub fn key(&self) -> BreakpointKey {
        self.location.key()
    }

    /// Reject specifications no backend could accept.
    pub fn validate(&self) -> Result<(), String> {
        match &self.location {
            BreakpointLocation::Line { file, line } => {
                if file.trim().is_empty() {
                    return Err("line breakpoint needs a file".into());
                }
                if *line == 0 {
                    return Err("line numbers start at 1".into());
                }
            }
            BreakpointLocation::Function { function, .. } if function.trim().is_empty() => {
                return Err("function name is empty".into());
            }
            BreakpointLocation::Watch {
                expression,
                read,
                write,
            } => {
                if expression.trim().is_empty() {
                    return Err("watch expression is empty".into());
                }
                if !read && !write {
                    return Err("watchpoint must trigger on read, write or both".into());
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// `-break-insert` arguments for a code breakpoint; `None` for watches.
    pub fn insert_args(&self, allow_pending: bool) -> Option<BreakInsert> {
        let mut args = BreakInsert::at(self.location.insert_location()?);
        args.allow_pending = allow_pending;
        args.disabled = !self.enabled;
        args.condition = self.condition.clone();
        args.ignore_count = self.ignore_count;
        Some(args)
    }
}

/// Treat blank conditions as no condition.
pub fn normalize_condition(condition: String) -> Option<String> {
    let trimmed = condition.trim();
    if trimmed.is_empty() {
        None
    } else if trimmed.len() == condition.len() {
        Some(condition)
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_file_never_matches_present_file() {
        let bare = BreakpointAttributes::function(None, "helper");
        let qualified = BreakpointAttributes::function(Some("util.c"), "helper");
        assert_ne!(bare.key(), qualified.key());
        assert_eq!(bare.key(), BreakpointAttributes::function(None, "helper").key());
    }

    #[test]
    fn key_ignores_enable_condition_and_ignore() {
        let a = BreakpointAttributes::line("main.c", 12);
        let b = BreakpointAttributes::line("main.c", 12)
            .with_condition("counter > 1")
            .with_ignore_count(3)
            .disabled();
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn watch_flags_are_part_of_key() {
        let read = BreakpointAttributes::watch("total", true, false);
        let access = BreakpointAttributes::watch("total", true, true);
        assert_ne!(read.key(), access.key());
        assert_eq!(read.location.watch_mode(), Some(WatchMode::Read));
        assert_eq!(access.location.watch_mode(), Some(WatchMode::Access));
    }

    #[test]
    fn blank_condition_is_none() {
        assert_eq!(normalize_condition("   ".into()), None);
        assert_eq!(normalize_condition(" x > 1 ".into()).as_deref(), Some("x > 1"));
        assert_eq!(
            BreakpointAttributes::line("main.c", 3).with_condition("").condition,
            None
        );
    }

    #[test]
    fn from_linespec_uses_default_file_for_bare_lines() {
        let loc = BreakpointLocation::from_linespec(
            Linespec::Line {
                file: None,
                line: 7,
            },
            Some("main.c"),
        );
        assert_eq!(
            loc,
            Some(BreakpointLocation::Line {
                file: "main.c".into(),
                line: 7
            })
        );
        assert_eq!(
            BreakpointLocation::from_linespec(Linespec::Line { file: None, line: 7 }, None),
            None
        );
    }

    #[test]
    fn validate_rejects_nonsense() {
        assert!(BreakpointAttributes::line("main.c", 0).validate().is_err());
        assert!(BreakpointAttributes::watch("x", false, false).validate().is_err());
        assert!(BreakpointAttributes::function(None, " ").validate().is_err());
        assert!(BreakpointAttributes::address(0x400028).validate().is_ok());
    }

    #[test]
    fn insert_args_carry_options() {
        let args = BreakpointAttributes::line("main.c", 12)
            .with_condition("flag")
            .with_ignore_count(2)
            .disabled()
            .insert_args(true)
            .unwrap();
        assert!(args.allow_pending && args.disabled);
        assert_eq!(args.condition.as_deref(), Some("flag"));
        assert_eq!(args.ignore_count, 2);
        assert!(BreakpointAttributes::watch("x", false, true)
            .insert_args(true)
            .is_none());
    }

    #[test]
    fn locations_display_compactly() {
        assert_eq!(
            BreakpointAttributes::function(Some("util.c"), "helper")
                .location
                .to_string(),
            "function util.c:helper"
        );
        assert_eq!(
            BreakpointAttributes::watch("total", true, true).location.to_string(),
            "watch total (rw)"
        );
    }
}
