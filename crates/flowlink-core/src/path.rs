// ── Datamodel paths and naming conventions ──
//
// A path is an ordered chain of (component, instance) segments. Components
// are stored in the server's convention (joined capitalized words); the
// client convention (underscore-separated lowercase words) is converted at
// the proxy boundary. Paths are immutable — child proxies extend a clone.

use std::fmt;

/// One step in a datamodel path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathSegment {
    /// Schema node name, server convention.
    pub component: String,
    /// Instance selector; empty for singletons.
    pub instance: String,
}

/// An immutable datamodel path. The root path has no segments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Path {
    segments: Vec<PathSegment>,
}

impl Path {
    /// The root path (empty segment chain).
    pub fn root() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Extend with a singleton segment.
    pub fn child(&self, component: impl Into<String>) -> Self {
        self.instance(component, "")
    }

    /// Extend with an instance-selecting segment.
    pub fn instance(&self, component: impl Into<String>, instance: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(PathSegment {
            component: component.into(),
            instance: instance.into(),
        });
        Self { segments }
    }

    /// The path with the final segment removed; `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// The final segment, if any.
    pub fn last(&self) -> Option<&PathSegment> {
        self.segments.last()
    }

    /// Encode to the server's flat form: `/Comp` per segment, plus
    /// `:inst` when the instance is non-empty. The root encodes to `""`.
    pub fn to_wire(&self) -> String {
        let mut out = String::new();
        for seg in &self.segments {
            out.push('/');
            out.push_str(&seg.component);
            if !seg.instance.is_empty() {
                out.push(':');
                out.push_str(&seg.instance);
            }
        }
        out
    }

    /// Parse a flat wire path back into segments.
    ///
    /// Used when materializing proxies from event tags, which arrive in
    /// wire form. Instance names containing `/` are not representable in
    /// the flat form; the server never emits them.
    pub fn from_wire(wire: &str) -> Self {
        let segments = wire
            .split('/')
            .filter(|part| !part.is_empty())
            .map(|part| match part.split_once(':') {
                Some((component, instance)) => PathSegment {
                    component: component.to_owned(),
                    instance: instance.to_owned(),
                },
                None => PathSegment {
                    component: part.to_owned(),
                    instance: String::new(),
                },
            })
            .collect();
        Self { segments }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

// ── Naming conventions ───────────────────────────────────────────────

/// Client convention → server convention: split on underscores, capitalize
/// the first letter of each word, join with no separator.
pub fn to_server_name(name: &str) -> String {
    name.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// Server convention → client convention: insert an underscore before each
/// uppercase letter, lowercase everything, strip a leading underscore.
///
/// This is the inverse of [`to_server_name`] for identifiers of the form
/// `^[a-z]+(_[a-z0-9]+)*$`. Server names with consecutive capitals or
/// digit-led words ("2D", "XYPlot") round-trip lossily — a known property
/// of the convention, not something this function papers over.
pub fn to_client_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for ch in name.chars() {
        if ch.is_uppercase() {
            out.push('_');
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    if out.starts_with('_') {
        out.remove(0);
    }
    out
}

// ── Tests ────────────────────────────────────────────────────────────
