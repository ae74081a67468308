#![forbid(unsafe_code)]

//! Structural paths used in diagnostics (`$.items[2].tags{0}`).

use core::fmt;

use weft_core::Key;

/// One step from a container to a child.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Property or array element.
    Key(Key),
    /// Set member, by insertion position.
    SetMember(usize),
    /// Key of the map entry at this position.
    MapKey(usize),
    /// Value of the map entry at this position.
    MapValue(usize),
}

/// Path from the reconciliation root to a value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct GraphPath {
    segments: Vec<Segment>,
}

impl GraphPath {
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    /// This path extended by one segment.
    #[must_use]
    pub fn child(&self, segment: Segment) -> Self {
        let mut segments = Vec::with_capacity(self.segments.len() + 1);
        segments.extend_from_slice(&self.segments);
        segments.push(segment);
        Self { segments }
    }

    #[must_use]
    pub fn key(&self, key: impl Into<Key>) -> Self {
        self.child(Segment::Key(key.into()))
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

impl fmt::Display for GraphPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("$")?;
        for segment in &self.segments {
            match segment {
                Segment::Key(Key::Index(i)) => write!(f, "[{i}]")?,
                Segment::Key(Key::Name(name)) if is_identifier(name) => write!(f, ".{name}")?,
                Segment::Key(Key::Name(name)) => write!(f, "[{:?}]", &**name)?,
                Segment::SetMember(i) => write!(f, "{{{i}}}")?,
                Segment::MapKey(i) => write!(f, "{{{i}}}.key")?,
                Segment::MapValue(i) => write!(f, "{{{i}}}.value")?,
            }
        }
        Ok(())
    }
}
