//! Hierarchical context handles.
//!
//! A handle names a debug entity (a thread, a frame, a breakpoint target)
//! by its path from the owning session. Handles are plain values used to
//! correlate data across services; they never own anything.

use std::fmt;

/// Identifier of a debug session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u32);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One level of a [`ContextHandle`] path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContextSegment {
    /// A thread group (inferior), e.g. `i1`.
    ThreadGroup(String),
    /// A thread by backend id.
    Thread(u32),
    /// A stack frame by level.
    Frame(u32),
    /// The breakpoint target: the scope that owns target breakpoints.
    BreakpointTarget,
    /// A single target breakpoint by backend number.
    Breakpoint(u32),
}

/// Which kind of entity a segment denotes; used for ancestor lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    /// [`ContextSegment::ThreadGroup`].
    ThreadGroup,
    /// [`ContextSegment::Thread`].
    Thread,
    /// [`ContextSegment::Frame`].
    Frame,
    /// [`ContextSegment::BreakpointTarget`].
    BreakpointTarget,
    /// [`ContextSegment::Breakpoint`].
    Breakpoint,
}

impl ContextSegment {
    /// The kind of this segment.
    pub fn kind(&self) -> ContextKind {
        match self {
            ContextSegment::ThreadGroup(_) => ContextKind::ThreadGroup,
            ContextSegment::Thread(_) => ContextKind::Thread,
            ContextSegment::Frame(_) => ContextKind::Frame,
            ContextSegment::BreakpointTarget => ContextKind::BreakpointTarget,
            ContextSegment::Breakpoint(_) => ContextKind::Breakpoint,
        }
    }
}

/// Path-style identifier of a debug entity within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextHandle {
    session: SessionId,
    path: Vec<ContextSegment>,
}

impl ContextHandle {
    /// The root handle of a session.
    pub fn session(session: SessionId) -> Self {
        Self {
            session,
            path: Vec::new(),
        }
    }

    /// The breakpoint target of a session.
    pub fn breakpoint_target(session: SessionId) -> Self {
        Self::session(session).child(ContextSegment::BreakpointTarget)
    }

    /// Return a new handle one level below this one.
    pub fn child(&self, segment: ContextSegment) -> Self {
        let mut path = self.path.clone();
        path.push(segment);
        Self {
            session: self.session,
            path,
        }
    }

    /// The owning session.
    pub fn session_id(&self) -> SessionId {
        self.session
    }

    /// The innermost segment, or `None` for a session root.
    pub fn leaf(&self) -> Option<&ContextSegment> {
        self.path.last()
    }

    /// The handle one level up, or `None` for a session root.
    pub fn parent(&self) -> Option<Self> {
        if self.path.is_empty() {
            return None;
        }
        let mut path = self.path.clone();
        path.pop();
        Some(Self {
            session: self.session,
            path,
        })
    }

    /// Find the nearest handle (self included) whose leaf is of `kind`.
    pub fn ancestor_of_kind(&self, kind: ContextKind) -> Option<Self> {
        let pos = self.path.iter().rposition(|s| s.kind() == kind)?;
        Some(Self {
            session: self.session,
            path: self.path[..=pos].to_vec(),
        })
    }

    /// Whether `self` equals `other` or lies below it.
    pub fn is_within(&self, other: &ContextHandle) -> bool {
        self.session == other.session && self.path.starts_with(&other.path)
    }
}

impl fmt::Display for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session:{}", self.session)?;
        for seg in &self.path {
            match seg {
                ContextSegment::ThreadGroup(g) => write!(f, "/group:{g}")?,
                ContextSegment::Thread(t) => write!(f, "/thread:{t}")?,
                ContextSegment::Frame(l) => write!(f, "/frame:{l}")?,
                ContextSegment::BreakpointTarget => write!(f, "/breakpoints")?,
                ContextSegment::Breakpoint(n) => write!(f, "/bp:{n}")?,
            }
        }
        Ok(())
    }
}
