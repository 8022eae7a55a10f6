//! Recognizes console commands that may change backend breakpoints.

/// Breakpoint-affecting commands and the shortest prefix GDB accepts.
const COMMANDS: &[(&str, usize)] = &[
    ("break", 1),
    ("tbreak", 2),
    ("hbreak", 2),
    ("thbreak", 3),
    ("rbreak", 2),
    ("delete", 1),
    ("enable", 2),
    ("disable", 3),
    ("condition", 4),
    ("ignore", 2),
    ("watch", 2),
    ("rwatch", 2),
    ("awatch", 2),
    ("clear", 2),
    ("source", 2),
];

/// Whether running `text` on the console may have touched breakpoints.
///
/// Only the command word is inspected, so `delete display 1` counts too;
/// a spurious refresh is harmless.
pub fn affects_breakpoints(text: &str) -> bool {
    let Some(word) = text.split_whitespace().next() else {
        return false;
    };
    COMMANDS
        .iter()
        .any(|(name, min)| word.len() >= *min && name.starts_with(word))
}
