//! Symbol model of the simulated inferior.
//!
//! A [`Program`] knows its source files (with line counts), functions and
//! global variables. Addresses are synthetic but stable: every line of every
//! file maps to a unique address and back.

/// Base address of the first file's code.
const TEXT_BASE: u64 = 0x400000;
/// Address space reserved per file.
const FILE_STRIDE: u64 = 0x1000;
/// Bytes per source line.
const LINE_STRIDE: u64 = 4;

/// A source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// File name as the user refers to it, e.g. `main.c`.
    pub name: String,
    /// Number of lines.
    pub lines: u32,
}

/// A function definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    /// Function name.
    pub name: String,
    /// Defining file.
    pub file: String,
    /// First line of the body.
    pub line: u32,
}

/// A resolved code location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// File name.
    pub file: String,
    /// Absolute path reported as `fullname`.
    pub fullname: String,
    /// Line.
    pub line: u32,
    /// Enclosing function, if any.
    pub function: Option<String>,
    /// Code address.
    pub address: u64,
}

/// Symbols of the simulated program.
#[derive(Debug, Clone, Default)]
pub struct Program {
    files: Vec<SourceFile>,
    functions: Vec<Function>,
    variables: Vec<String>,
}

impl Program {
    /// An empty program.
    pub fn new() -> Self {
        Self::default()
    }

    /// A small two-file program used by tests and the CLI.
    pub fn demo() -> Self {
        Self::new()
            .file("main.c", 60)
            .file("util.c", 40)
            .function("main", "main.c", 10)
            .function("compute", "main.c", 30)
            .function("helper", "util.c", 5)
            .function("accumulate", "util.c", 20)
            .variable("counter")
            .variable("total")
            .variable("flag")
    }

    /// Add a source file.
    pub fn file(mut self, name: impl Into<String>, lines: u32) -> Self {
        self.files.push(SourceFile {
            name: name.into(),
            lines,
        });
        self
    }

    /// Add a function.
    pub fn function(mut self, name: impl Into<String>, file: impl Into<String>, line: u32) -> Self {
        self.functions.push(Function {
            name: name.into(),
            file: file.into(),
            line,
        });
        self
    }

    /// Add a global variable.
    pub fn variable(mut self, name: impl Into<String>) -> Self {
        self.variables.push(name.into());
        self
    }

    /// Absorb the symbols of `other`, as when a shared library is loaded.
    pub fn merge(&mut self, other: Program) {
        self.files.extend(other.files);
        self.functions.extend(other.functions);
        self.variables.extend(other.variables);
    }

    fn file_index(&self, name: &str) -> Option<usize> {
        self.files
            .iter()
            .position(|f| f.name == name || f.name.rsplit('/').next() == Some(name))
    }

    /// Name of the first file, used for bare line numbers.
    pub fn default_file(&self) -> Option<&str> {
        self.files.first().map(|f| f.name.as_str())
    }

    /// Resolve `file:line`.
    pub fn resolve_line(&self, file: &str, line: u32) -> Result<Location, String> {
        let idx = self
            .file_index(file)
            .ok_or_else(|| format!("No source file named {file}."))?;
        let source = &self.files[idx];
        if line == 0 || line > source.lines {
            return Err(format!(
                "Line {line} out of range; \"{}\" has {} lines.",
                source.name, source.lines
            ));
        }
        Ok(self.location(idx, line))
    }

    /// Resolve `[file:]function`.
    pub fn resolve_function(&self, file: Option<&str>, name: &str) -> Result<Location, String> {
        if let Some(file) = file {
            if self.file_index(file).is_none() {
                return Err(format!("No source file named {file}."));
            }
        }
        let func = self
            .functions
            .iter()
            .find(|f| f.name == name && file.map_or(true, |file| self.same_file(&f.file, file)))
            .ok_or_else(|| match file {
                Some(file) => format!("Function \"{name}\" not defined in \"{file}\"."),
                None => format!("Function \"{name}\" not defined."),
            })?;
        let idx = self
            .file_index(&func.file)
            .ok_or_else(|| format!("No source file named {}.", func.file))?;
        Ok(self.location(idx, func.line))
    }

    /// Map an address back to a source location, if it falls inside a file.
    pub fn resolve_address(&self, address: u64) -> Option<Location> {
        let offset = address.checked_sub(TEXT_BASE)?;
        let idx = usize::try_from(offset / FILE_STRIDE).ok()?;
        let line = u32::try_from((offset % FILE_STRIDE) / LINE_STRIDE).ok()?;
        let source = self.files.get(idx)?;
        if line == 0 || line > source.lines {
            return None;
        }
        Some(self.location(idx, line))
    }

    /// Whether `expression` names a known variable (its leading identifier).
    pub fn has_symbol(&self, expression: &str) -> bool {
        let ident: String = expression
            .trim_start_matches(['*', '&', '('])
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        !ident.is_empty() && self.variables.iter().any(|v| *v == ident)
    }

    fn same_file(&self, a: &str, b: &str) -> bool {
        match (self.file_index(a), self.file_index(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }

    fn location(&self, idx: usize, line: u32) -> Location {
        let source = &self.files[idx];
        let function = self
            .functions
            .iter()
            .filter(|f| self.same_file(&f.file, &source.name) && f.line <= line)
            .max_by_key(|f| f.line)
            .map(|f| f.name.clone());
        Location {
            file: source.name.clone(),
            fullname: format!("/src/{}", source.name),
            line,
            function,
            address: TEXT_BASE + idx as u64 * FILE_STRIDE + u64::from(line) * LINE_STRIDE,
        }
    }
}

/// Render an address the way the backend does.
pub fn format_address(address: u64) -> String {
    format!("{address:#018x}")
}
