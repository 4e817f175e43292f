//! Page DOM surface the engine reads and mutates.
//!
//! The content script never owns the document; it sees it through
//! [`PageDom`]. [`MemoryDom`] is an arena-backed implementation used by the
//! CLI and the tests.

pub mod memory;

pub use memory::{MemoryDom, Navigation, NodeSpec};

use std::collections::BTreeMap;
use url::Url;

/// ID used to address nodes in the DOM arena.
pub type NodeId = u64;

pub const LOADED_ATTR: &str = "data-xdynamic-loaded";
pub const BLOCKED_ATTR: &str = "data-xdynamic-blocked";
pub const WARNED_ATTR: &str = "data-xdynamic-warned";
pub const REASON_ATTR: &str = "data-xdynamic-reason";

pub const BLACKLIST_OVERLAY_ID: &str = "xdynamic-blacklist-overlay";
pub const RELOAD_BANNER_ID: &str = "xdynamic-reload-banner";

/// Where the page currently lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLocation {
    pub href: String,
    /// Scheme without the trailing colon, e.g. `https`.
    pub scheme: String,
    /// Lowercased hostname, empty for host-less URLs such as `about:blank`.
    pub hostname: String,
}

impl PageLocation {
    pub fn parse(href: &str) -> Option<Self> {
        let url = Url::parse(href).ok()?;
        Some(Self {
            href: url.as_str().to_string(),
            scheme: url.scheme().to_string(),
            hostname: url.host_str().unwrap_or_default().to_ascii_lowercase(),
        })
    }
}

/// Snapshot of an `<img>` element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageElement {
    pub src: Option<String>,
    pub data_src: Option<String>,
    pub natural_width: u32,
    pub natural_height: u32,
    pub attributes: BTreeMap<String, String>,
    pub style: BTreeMap<String, String>,
    pub title: Option<String>,
}

impl ImageElement {
    pub fn new(src: impl Into<String>, natural_width: u32, natural_height: u32) -> Self {
        Self {
            src: Some(src.into()),
            natural_width,
            natural_height,
            ..Self::default()
        }
    }

    /// Lazy-loaded image whose real source sits in `data-src`.
    pub fn lazy(data_src: impl Into<String>, natural_width: u32, natural_height: u32) -> Self {
        Self {
            data_src: Some(data_src.into()),
            natural_width,
            natural_height,
            ..Self::default()
        }
    }

    /// `src` when set and non-empty, otherwise `data-src`.
    pub fn source_url(&self) -> Option<&str> {
        self.src
            .as_deref()
            .filter(|src| !src.is_empty())
            .or_else(|| self.data_src.as_deref().filter(|src| !src.is_empty()))
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn is_blocked(&self) -> bool {
        self.attributes.contains_key(BLOCKED_ATTR)
    }

    pub fn is_warned(&self) -> bool {
        self.attributes.contains_key(WARNED_ATTR)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayKind {
    /// Full-viewport cover shown when the page matched a blacklist pattern.
    Blacklist { pattern: String },
    /// Fixed banner asking the user to reload after the extension restarted.
    ReloadBanner,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlay {
    pub element_id: String,
    pub kind: OverlayKind,
    pub text: String,
}

/// Document operations needed by the engine. Implementations use interior
/// mutability; every method is a short, synchronous DOM access.
pub trait PageDom: Send + Sync {
    fn location(&self) -> PageLocation;

    /// Every image in document order.
    fn document_images(&self) -> Vec<NodeId>;

    /// `node` itself when it is an image, otherwise its descendant images in
    /// document order. Unknown nodes yield nothing.
    fn images_within(&self, node: NodeId) -> Vec<NodeId>;

    fn image(&self, node: NodeId) -> Option<ImageElement>;

    fn set_image_style(&self, node: NodeId, property: &str, value: &str);

    fn set_image_attribute(&self, node: NodeId, name: &str, value: &str);

    fn set_image_title(&self, node: NodeId, title: &str);

    fn set_root_attribute(&self, name: &str, value: &str);

    fn has_element(&self, element_id: &str) -> bool;

    fn append_overlay(&self, overlay: Overlay);

    /// Stops the document from scrolling underneath a full-page overlay.
    fn lock_scroll(&self);

    /// Blocking yes/no prompt shown to the user.
    fn confirm(&self, message: &str) -> bool;

    fn history_length(&self) -> usize;

    fn history_back(&self);

    fn replace_location(&self, href: &str);
}
