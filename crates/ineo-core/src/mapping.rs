//! INEO mapping table: which providers and harvest roots feed INEO.
//!
//! The mapping document is a small XML file:
//!
//! ```xml
//! <datasets default="false">
//!     <provider name="Meertens Institute - Research Collections">
//!         <profile>clarin.eu:cr1:p_1440426460262</profile>
//!     </provider>
//!     <provider name="The Language Archive">
//!         <level>0</level>
//!         <assessment>true</assessment>
//!     </provider>
//!     <root name="CLARIN Partners">
//!         <default>true</default>
//!     </root>
//! </datasets>
//! ```
//!
//! Providers and roots share one namespace and one shape. The parsed
//! [`MappingTable`] is read-only once built.

use std::collections::HashMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("malformed mapping XML")]
    Xml(#[from] quick_xml::Error),

    #[error("malformed mapping XML: {0}")]
    Malformed(&'static str),

    #[error("invalid <level> for '{provider}': {value:?} is not an integer")]
    InvalidLevel { provider: String, value: String },
}

/// Explicit three-valued flag for `"true"` / other / absent text nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriState {
    #[default]
    Unspecified,
    True,
    False,
}

impl TriState {
    /// `None` → `Unspecified`, `"true"` → `True`, anything else → `False`.
    pub fn parse(text: Option<&str>) -> Self {
        match text.map(str::trim) {
            None => Self::Unspecified,
            Some("true") => Self::True,
            Some(_) => Self::False,
        }
    }

    pub fn value(self) -> Option<bool> {
        match self {
            Self::Unspecified => None,
            Self::True => Some(true),
            Self::False => Some(false),
        }
    }

    pub fn is_true(self) -> bool {
        self == Self::True
    }
}

/// Whether an entry came from a `<provider>` or a `<root>` element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Provider,
    Root,
}

/// One mapping entry (a data provider or a harvest root).
#[derive(Debug, Clone, PartialEq)]
pub struct Provider {
    pub name: String,
    pub kind: EntryKind,
    /// Component profile id that marks a record as INEO.
    pub profile: Option<String>,
    /// Hierarchy weight that marks a record as INEO.
    pub level: Option<i64>,
    pub assessment_required: bool,
    pub default_membership: TriState,
}

impl Provider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Provider,
            profile: None,
            level: None,
            assessment_required: false,
            default_membership: TriState::Unspecified,
        }
    }

    pub fn root(name: impl Into<String>) -> Self {
        Self {
            kind: EntryKind::Root,
            ..Self::new(name)
        }
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    pub fn with_level(mut self, level: i64) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_default(mut self, member: bool) -> Self {
        self.default_membership = if member {
            TriState::True
        } else {
            TriState::False
        };
        self
    }

    pub fn with_assessment(mut self, required: bool) -> Self {
        self.assessment_required = required;
        self
    }
}

/// Parsed mapping snapshot, looked up by provider or root name.
#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    global_default: bool,
    providers: Vec<Provider>,
    index: HashMap<String, usize>,
}

impl MappingTable {
    /// Build a table from entries in document order.
    ///
    /// Names are unique; a repeated name keeps the first entry.
    pub fn new(global_default: bool, entries: impl IntoIterator<Item = Provider>) -> Self {
        let mut providers = Vec::new();
        let mut index = HashMap::new();
        for provider in entries {
            if index.contains_key(&provider.name) {
                warn!(name = %provider.name, "duplicate mapping entry ignored");
                continue;
            }
            index.insert(provider.name.clone(), providers.len());
            providers.push(provider);
        }
        Self {
            global_default,
            providers,
            index,
        }
    }

    /// Membership decision for records whose provider is not mapped.
    pub fn global_default(&self) -> bool {
        self.global_default
    }

    pub fn get(&self, name: &str) -> Option<&Provider> {
        self.index.get(name).map(|&i| &self.providers[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Entries in document order: providers first, then roots.
    pub fn providers(&self) -> &[Provider] {
        &self.providers
    }

    pub fn provider_names(&self) -> impl Iterator<Item = &str> {
        self.providers.iter().map(|p| p.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

// ── Parsing ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChildKind {
    Profile,
    Level,
    Default,
    Assessment,
}

impl ChildKind {
    fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"profile" => Some(Self::Profile),
            b"level" => Some(Self::Level),
            b"default" => Some(Self::Default),
            b"assessment" => Some(Self::Assessment),
            _ => None,
        }
    }
}

/// Raw child texts of one entry; `Some("")` means present but empty.
struct EntryDraft {
    kind: EntryKind,
    name: Option<String>,
    profile: Option<String>,
    level: Option<String>,
    default: Option<String>,
    assessment: Option<String>,
}

impl EntryDraft {
    fn slot(&mut self, child: ChildKind) -> &mut Option<String> {
        match child {
            ChildKind::Profile => &mut self.profile,
            ChildKind::Level => &mut self.level,
            ChildKind::Default => &mut self.default,
            ChildKind::Assessment => &mut self.assessment,
        }
    }

    fn finish(self) -> Result<Option<Provider>, MappingError> {
        let Some(name) = self.name else {
            warn!(kind = ?self.kind, "mapping entry without a name attribute skipped");
            return Ok(None);
        };

        let level = match self.level {
            None => None,
            Some(text) => Some(text.trim().parse::<i64>().map_err(|_| {
                MappingError::InvalidLevel {
                    provider: name.clone(),
                    value: text.clone(),
                }
            })?),
        };

        Ok(Some(Provider {
            kind: self.kind,
            profile: self.profile.filter(|p| !p.is_empty()),
            level,
            assessment_required: TriState::parse(self.assessment.as_deref()).is_true(),
            default_membership: TriState::parse(self.default.as_deref()),
            name,
        }))
    }
}

#[derive(Default)]
struct DocumentState {
    depth: usize,
    root_seen: bool,
    global_default: bool,
    providers: Vec<EntryDraft>,
    roots: Vec<EntryDraft>,
    entry: Option<EntryDraft>,
    child: Option<(ChildKind, String)>,
}

impl DocumentState {
    fn open(&mut self, e: &BytesStart<'_>) -> Result<(), MappingError> {
        self.depth += 1;
        match self.depth {
            1 => {
                if self.root_seen {
                    return Err(MappingError::Malformed("more than one root element"));
                }
                self.root_seen = true;
                let default = attribute(e, b"default")?;
                self.global_default = TriState::parse(default.as_deref()).is_true();
            }
            2 => {
                let kind = match e.name().as_ref() {
                    b"provider" => Some(EntryKind::Provider),
                    b"root" => Some(EntryKind::Root),
                    _ => None,
                };
                if let Some(kind) = kind {
                    self.entry = Some(EntryDraft {
                        kind,
                        name: attribute(e, b"name")?,
                        profile: None,
                        level: None,
                        default: None,
                        assessment: None,
                    });
                }
            }
            3 if self.entry.is_some() => {
                self.child = ChildKind::from_tag(e.name().as_ref()).map(|k| (k, String::new()));
            }
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self) {
        match self.depth {
            3 => {
                if let (Some(entry), Some((kind, text))) = (self.entry.as_mut(), self.child.take())
                {
                    let slot = entry.slot(kind);
                    if slot.is_none() {
                        *slot = Some(text.trim().to_string());
                    }
                }
            }
            2 => {
                if let Some(entry) = self.entry.take() {
                    match entry.kind {
                        EntryKind::Provider => self.providers.push(entry),
                        EntryKind::Root => self.roots.push(entry),
                    }
                }
            }
            _ => {}
        }
        self.depth = self.depth.saturating_sub(1);
    }

    fn text(&mut self, text: &str) -> Result<(), MappingError> {
        if self.depth == 0 && !text.trim().is_empty() {
            return Err(MappingError::Malformed("text outside the root element"));
        }
        if self.depth == 3
            && let Some((_, buf)) = self.child.as_mut()
        {
            buf.push_str(text);
        }
        Ok(())
    }

    fn finish(self) -> Result<MappingTable, MappingError> {
        if self.depth != 0 {
            return Err(MappingError::Malformed("unclosed element at end of document"));
        }
        if !self.root_seen {
            return Err(MappingError::Malformed("no root element"));
        }

        let mut entries = Vec::with_capacity(self.providers.len() + self.roots.len());
        for draft in self.providers.into_iter().chain(self.roots) {
            if let Some(provider) = draft.finish()? {
                entries.push(provider);
            }
        }
        debug!(entries = entries.len(), global_default = self.global_default, "parsed mapping");
        Ok(MappingTable::new(self.global_default, entries))
    }
}

fn attribute(e: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>, MappingError> {
    match e.try_get_attribute(name).map_err(quick_xml::Error::from)? {
        Some(attr) => Ok(Some(
            attr.unescape_value()
                .map_err(quick_xml::Error::from)?
                .into_owned(),
        )),
        None => Ok(None),
    }
}

/// Parse a mapping document into a [`MappingTable`].
///
/// `<provider>` entries are read before `<root>` entries, each in document
/// order. Fails on XML that is not well-formed and on non-integer `<level>`s.
pub fn parse_mapping(xml: &str) -> Result<MappingTable, MappingError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut state = DocumentState::default();
    loop {
        match reader.read_event()? {
            Event::Start(e) => state.open(&e)?,
            Event::Empty(e) => {
                state.open(&e)?;
                state.close();
            }
            Event::End(_) => state.close(),
            Event::Text(t) => state.text(&t.unescape().map_err(quick_xml::Error::from)?)?,
            Event::CData(c) => state.text(&String::from_utf8_lossy(&c.into_inner()))?,
            Event::Eof => break,
            _ => {}
        }
    }
    state.finish()
}
