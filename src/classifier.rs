//! Decides whether an event happened inside something the user types into.
//!
//! Pages are described with plain values: an [`Element`] chain for the event
//! target and a [`PageContext`] for the document's location and focus. Hosts
//! whose editors render to a canvas are recognized by an ordered list of
//! [`HostEditorHeuristic`]s instead of DOM inspection.

use serde::{Deserialize, Serialize};

/// Input types that accept free text. Everything else (checkbox, radio,
/// file, range, color, ...) is not a typing surface.
pub const TEXT_INPUT_TYPES: &[&str] = &[
    "text", "password", "email", "search", "url", "tel", "number",
];

const TEXTBOX_ROLES: &[&str] = &["textbox", "combobox"];

/// Minimal description of a DOM element and its ancestry
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Element {
    pub tag: String,
    pub input_type: Option<String>,
    pub content_editable: Option<String>,
    pub role: Option<String>,
    pub parent: Option<Box<Element>>,
}

impl Element {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            ..Default::default()
        }
    }

    pub fn textarea() -> Self {
        Self::new("textarea")
    }

    pub fn input(input_type: &str) -> Self {
        Self {
            input_type: Some(input_type.to_ascii_lowercase()),
            ..Self::new("input")
        }
    }

    pub fn body() -> Self {
        Self::new("body").within(Self::new("html"))
    }

    pub fn iframe() -> Self {
        Self::new("iframe")
    }

    pub fn with_content_editable(mut self, value: &str) -> Self {
        self.content_editable = Some(value.to_ascii_lowercase());
        self
    }

    pub fn with_role(mut self, role: &str) -> Self {
        self.role = Some(role.to_ascii_lowercase());
        self
    }

    pub fn within(mut self, parent: Element) -> Self {
        self.parent = Some(Box::new(parent));
        self
    }

    pub fn ancestors(&self) -> impl Iterator<Item = &Element> {
        std::iter::successors(self.parent.as_deref(), |el| el.parent.as_deref())
    }

    /// Effective editability, following the DOM's inheritance rule: the
    /// nearest element carrying an explicit `contenteditable` decides.
    pub fn is_content_editable(&self) -> bool {
        std::iter::once(self)
            .chain(self.ancestors())
            .find_map(|el| match el.content_editable.as_deref() {
                Some("" | "true" | "plaintext-only") => Some(true),
                Some("false") => Some(false),
                _ => None,
            })
            .unwrap_or(false)
    }

    /// True for `<body>` and `<html>`: focus resting there means nothing
    /// specific holds it.
    pub fn is_document_root(&self) -> bool {
        matches!(self.tag.as_str(), "body" | "html")
    }
}

/// Where an event was observed: the top-level page location and its
/// currently focused element (`document.activeElement`).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PageContext {
    pub host: String,
    pub path: String,
    pub focused: Option<Element>,
}

impl PageContext {
    pub fn new(host: &str, path: &str) -> Self {
        Self {
            host: host.to_ascii_lowercase(),
            path: path.to_string(),
            focused: None,
        }
    }

    pub fn with_focus(mut self, focused: Element) -> Self {
        self.focused = Some(focused);
        self
    }
}

/// A host-specific rule recognizing editors that expose no editable DOM
pub trait HostEditorHeuristic: std::fmt::Debug {
    fn matches(&self, host: &str, path: &str) -> bool;
}

/// Host plus optional path prefixes. No prefixes means any path on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPattern {
    pub host: String,
    #[serde(default)]
    pub path_prefixes: Vec<String>,
}

impl HostPattern {
    pub fn new(host: &str, path_prefixes: &[&str]) -> Self {
        Self {
            host: host.to_ascii_lowercase(),
            path_prefixes: path_prefixes.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl HostEditorHeuristic for HostPattern {
    fn matches(&self, host: &str, path: &str) -> bool {
        host.eq_ignore_ascii_case(&self.host)
            && (self.path_prefixes.is_empty()
                || self.path_prefixes.iter().any(|p| path.starts_with(p)))
    }
}

/// Canvas-rendered productivity editors known out of the box
pub fn builtin_editor_hosts() -> Vec<HostPattern> {
    vec![HostPattern::new(
        "docs.google.com",
        &["/document/", "/spreadsheets/", "/presentation/"],
    )]
}

pub fn is_typing_context(target: &Element) -> bool {
    match target.tag.as_str() {
        "textarea" => return true,
        "input" => {
            let kind = target.input_type.as_deref().unwrap_or("text");
            if TEXT_INPUT_TYPES.contains(&kind) {
                return true;
            }
        }
        _ => {}
    }

    target.is_content_editable()
        || target
            .role
            .as_deref()
            .is_some_and(|role| TEXTBOX_ROLES.contains(&role))
}

#[derive(Debug)]
pub struct Classifier {
    heuristics: Vec<Box<dyn HostEditorHeuristic>>,
}

impl Classifier {
    /// A classifier with no host heuristics at all
    pub fn empty() -> Self {
        Self {
            heuristics: Vec::new(),
        }
    }

    pub fn new() -> Self {
        builtin_editor_hosts()
            .into_iter()
            .fold(Self::empty(), |c, p| c.with_heuristic(p))
    }

    /// Heuristics are consulted in insertion order.
    pub fn with_heuristic(mut self, heuristic: impl HostEditorHeuristic + 'static) -> Self {
        self.heuristics.push(Box::new(heuristic));
        self
    }

    pub fn heuristic_count(&self) -> usize {
        self.heuristics.len()
    }

    pub fn is_typing_context(&self, target: &Element) -> bool {
        is_typing_context(target)
    }

    /// Any non-root focus on a matching host counts as editing. Focusing a
    /// toolbar button on such a page is therefore a known false positive.
    pub fn is_host_editor_active(&self, page: &PageContext) -> bool {
        let focused_specific = page
            .focused
            .as_ref()
            .is_some_and(|el| !el.is_document_root());

        focused_specific
            && self
                .heuristics
                .iter()
                .any(|h| h.matches(&page.host, &page.path))
    }

    pub fn is_eligible(&self, target: Option<&Element>, page: &PageContext) -> bool {
        target.is_some_and(is_typing_context)
            || page.focused.as_ref().is_some_and(is_typing_context)
            || self.is_host_editor_active(page)
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}
