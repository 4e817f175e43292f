use super::state::ScanSession;
use crate::config::PageConfig;
use crate::dom::{ImageElement, NodeId, PageDom};
use std::sync::Arc;

/// An image that passed the eligibility filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub node: NodeId,
    pub url: String,
}

/// Finds images worth sending to the detector.
pub struct ImageDiscovery {
    dom: Arc<dyn PageDom>,
    session: Arc<ScanSession>,
    min_width: u32,
    min_height: u32,
}

impl ImageDiscovery {
    pub fn new(dom: Arc<dyn PageDom>, session: Arc<ScanSession>, page: &PageConfig) -> Self {
        Self {
            dom,
            session,
            min_width: page.min_image_width,
            min_height: page.min_image_height,
        }
    }

    /// The image's source URL if it should be scanned now.
    pub fn eligible_url(&self, image: &ImageElement) -> Option<String> {
        let url = image.source_url()?;
        if url.starts_with("data:") || url.starts_with("blob:") {
            return None;
        }
        if self.session.is_processed(url) {
            return None;
        }
        if image.natural_width < self.min_width || image.natural_height < self.min_height {
            return None;
        }
        if image.is_blocked() || image.is_warned() {
            return None;
        }
        Some(url.to_string())
    }

    /// Every eligible image of the document, in document order.
    pub fn document_candidates(&self) -> Candidates<'_> {
        Candidates {
            discovery: self,
            nodes: self.dom.document_images().into_iter(),
        }
    }

    /// Eligible images inside a freshly inserted subtree.
    pub fn candidates_under(&self, node: NodeId) -> Candidates<'_> {
        Candidates {
            discovery: self,
            nodes: self.dom.images_within(node).into_iter(),
        }
    }
}

/// Lazy candidate stream. Eligibility is evaluated as each node is pulled, so
/// images claimed by a concurrent sweep in the meantime are skipped.
pub struct Candidates<'a> {
    discovery: &'a ImageDiscovery,
    nodes: std::vec::IntoIter<NodeId>,
}

impl Iterator for Candidates<'_> {
    type Item = Candidate;

    fn next(&mut self) -> Option<Candidate> {
        for node in self.nodes.by_ref() {
            let Some(image) = self.discovery.dom.image(node) else {
                continue;
            };
            if let Some(url) = self.discovery.eligible_url(&image) {
                return Some(Candidate { node, url });
            }
        }
        None
    }
}
