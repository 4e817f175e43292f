use super::{ImageElement, NodeId, Overlay, PageDom, PageLocation};
use anyhow::{anyhow, Result};
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Tree fragment to insert into a [`MemoryDom`].
#[derive(Debug, Clone)]
pub enum NodeSpec {
    Image(ImageElement),
    Element { tag: String, children: Vec<NodeSpec> },
}

impl NodeSpec {
    pub fn container(tag: impl Into<String>, children: Vec<NodeSpec>) -> Self {
        Self::Element {
            tag: tag.into(),
            children,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Back,
    Replace(String),
}

#[derive(Debug)]
enum NodeKind {
    Element { tag: String },
    Image(ImageElement),
}

#[derive(Debug)]
struct Node {
    children: Vec<NodeId>,
    kind: NodeKind,
}

#[derive(Debug)]
struct DomTree {
    next_id: NodeId,
    nodes: FxHashMap<NodeId, Node>,
    root: NodeId,
    body: NodeId,
    location: PageLocation,
    root_attributes: BTreeMap<String, String>,
    overlays: Vec<Overlay>,
    scroll_locked: bool,
    confirm_answers: VecDeque<bool>,
    confirm_prompts: Vec<String>,
    history_length: usize,
    navigations: Vec<Navigation>,
}

impl DomTree {
    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.insert(
            id,
            Node {
                children: Vec::new(),
                kind,
            },
        );
        id
    }

    fn insert(&mut self, parent: NodeId, spec: NodeSpec) -> NodeId {
        let id = match spec {
            NodeSpec::Image(image) => self.alloc(NodeKind::Image(image)),
            NodeSpec::Element { tag, children } => {
                let id = self.alloc(NodeKind::Element { tag });
                for child in children {
                    self.insert(id, child);
                }
                id
            }
        };
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.push(id);
        }
        id
    }

    fn collect_images(&self, start: NodeId, out: &mut Vec<NodeId>) {
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            if matches!(node.kind, NodeKind::Image(_)) {
                out.push(id);
            }
            stack.extend(node.children.iter().rev());
        }
    }

    fn image_mut(&mut self, id: NodeId) -> Option<&mut ImageElement> {
        match self.nodes.get_mut(&id).map(|node| &mut node.kind) {
            Some(NodeKind::Image(image)) => Some(image),
            _ => None,
        }
    }
}

/// In-memory document with a `<html><body>` skeleton.
#[derive(Debug)]
pub struct MemoryDom {
    tree: Mutex<DomTree>,
}

impl MemoryDom {
    pub fn new(href: &str) -> Result<Self> {
        let location =
            PageLocation::parse(href).ok_or_else(|| anyhow!("invalid page URL `{}`", href))?;
        let mut tree = DomTree {
            next_id: 1,
            nodes: FxHashMap::default(),
            root: 0,
            body: 0,
            location,
            root_attributes: BTreeMap::new(),
            overlays: Vec::new(),
            scroll_locked: false,
            confirm_answers: VecDeque::new(),
            confirm_prompts: Vec::new(),
            history_length: 1,
            navigations: Vec::new(),
        };
        let root = tree.alloc(NodeKind::Element {
            tag: "html".to_string(),
        });
        tree.root = root;
        tree.body = tree.insert(root, NodeSpec::container("body", Vec::new()));
        Ok(Self {
            tree: Mutex::new(tree),
        })
    }

    fn tree(&self) -> MutexGuard<'_, DomTree> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn body(&self) -> NodeId {
        self.tree().body
    }

    /// Inserts `spec` under `parent` and returns the new subtree root, which
    /// is what a mutation record would report as the added node.
    pub fn insert(&self, parent: NodeId, spec: NodeSpec) -> NodeId {
        self.tree().insert(parent, spec)
    }

    pub fn append_to_body(&self, spec: NodeSpec) -> NodeId {
        let mut tree = self.tree();
        let body = tree.body;
        tree.insert(body, spec)
    }

    pub fn set_natural_size(&self, node: NodeId, width: u32, height: u32) {
        if let Some(image) = self.tree().image_mut(node) {
            image.natural_width = width;
            image.natural_height = height;
        }
    }

    pub fn tag(&self, node: NodeId) -> Option<String> {
        self.tree().nodes.get(&node).map(|n| match &n.kind {
            NodeKind::Element { tag } => tag.clone(),
            NodeKind::Image(_) => "img".to_string(),
        })
    }

    pub fn overlays(&self) -> Vec<Overlay> {
        self.tree().overlays.clone()
    }

    pub fn count_elements(&self, element_id: &str) -> usize {
        self.tree()
            .overlays
            .iter()
            .filter(|overlay| overlay.element_id == element_id)
            .count()
    }

    pub fn root_attribute(&self, name: &str) -> Option<String> {
        self.tree().root_attributes.get(name).cloned()
    }

    pub fn is_scroll_locked(&self) -> bool {
        self.tree().scroll_locked
    }

    /// Queues the answer for the next `confirm` prompt. Unanswered prompts
    /// are treated as cancelled.
    pub fn queue_confirm(&self, answer: bool) {
        self.tree().confirm_answers.push_back(answer);
    }

    pub fn confirm_prompts(&self) -> Vec<String> {
        self.tree().confirm_prompts.clone()
    }

    pub fn set_history_length(&self, length: usize) {
        self.tree().history_length = length;
    }

    pub fn navigations(&self) -> Vec<Navigation> {
        self.tree().navigations.clone()
    }
}

impl PageDom for MemoryDom {
    fn location(&self) -> PageLocation {
        self.tree().location.clone()
    }

    fn document_images(&self) -> Vec<NodeId> {
        let tree = self.tree();
        let mut out = Vec::new();
        tree.collect_images(tree.root, &mut out);
        out
    }

    fn images_within(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.tree().collect_images(node, &mut out);
        out
    }

    fn image(&self, node: NodeId) -> Option<ImageElement> {
        match self.tree().nodes.get(&node).map(|n| &n.kind) {
            Some(NodeKind::Image(image)) => Some(image.clone()),
            _ => None,
        }
    }

    fn set_image_style(&self, node: NodeId, property: &str, value: &str) {
        if let Some(image) = self.tree().image_mut(node) {
            image.style.insert(property.to_string(), value.to_string());
        }
    }

    fn set_image_attribute(&self, node: NodeId, name: &str, value: &str) {
        if let Some(image) = self.tree().image_mut(node) {
            image.attributes.insert(name.to_string(), value.to_string());
        }
    }

    fn set_image_title(&self, node: NodeId, title: &str) {
        if let Some(image) = self.tree().image_mut(node) {
            image.title = Some(title.to_string());
        }
    }

    fn set_root_attribute(&self, name: &str, value: &str) {
        self.tree()
            .root_attributes
            .insert(name.to_string(), value.to_string());
    }

    fn has_element(&self, element_id: &str) -> bool {
        self.count_elements(element_id) > 0
    }

    fn append_overlay(&self, overlay: Overlay) {
        self.tree().overlays.push(overlay);
    }

    fn lock_scroll(&self) {
        self.tree().scroll_locked = true;
    }

    fn confirm(&self, message: &str) -> bool {
        let mut tree = self.tree();
        tree.confirm_prompts.push(message.to_string());
        tree.confirm_answers.pop_front().unwrap_or(false)
    }

    fn history_length(&self) -> usize {
        self.tree().history_length
    }

    fn history_back(&self) {
        self.tree().navigations.push(Navigation::Back);
    }

    fn replace_location(&self, href: &str) {
        let mut tree = self.tree();
        tree.navigations.push(Navigation::Replace(href.to_string()));
        if let Some(location) = PageLocation::parse(href) {
            tree.location = location;
        }
    }
}
