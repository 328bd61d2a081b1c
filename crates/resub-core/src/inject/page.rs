//! The page being modified, reduced to what the injector needs.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mount {
    Head,
    Body,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Script,
    /// `<link rel="stylesheet">`
    Stylesheet,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub id: String,
    pub kind: ElementKind,
    /// Ephemeral handle returned by [`PageHandle::create_object_url`].
    pub src: String,
}

/// Host object a loaded module registers itself with (e.g. a UI framework app).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    pub name: String,
}

/// Finds a named capability in the page's global scope.
pub trait CapabilityLookup: Send + Sync {
    fn lookup(&self, name: &str) -> Option<Capability>;
}

/// Module global a loaded script exposes, with an install entry point.
pub trait PluginModule: Send + Sync {
    fn install(&self, capability: &Capability);
}

pub trait PageHandle: CapabilityLookup {
    /// Remove the element tagged `id`; returns it if it existed.
    fn remove_element(&self, id: &str) -> Option<Element>;

    fn append(&self, mount: Mount, element: Element);

    /// Opaque same-origin handle to `bytes`, usable as an element source.
    fn create_object_url(&self, bytes: &[u8], mime: &str) -> String;

    fn revoke_object_url(&self, url: &str);

    /// Module the script loaded as `element_id` registered under `global_name`.
    /// `None` when the load failed or the module has no install hook.
    fn loaded_module(&self, element_id: &str, global_name: &str) -> Option<Arc<dyn PluginModule>>;
}

#[derive(Debug, Default)]
struct Document {
    head: Vec<Element>,
    body: Vec<Element>,
    objects: HashMap<String, (String, Vec<u8>)>,
}

/// In-memory document. Scripts "load" as soon as they are appended; modules
/// are whatever was registered with [`MemoryPage::register_module`].
#[derive(Default)]
pub struct MemoryPage {
    doc: Mutex<Document>,
    capabilities: Mutex<BTreeSet<String>>,
    modules: Mutex<HashMap<String, Arc<dyn PluginModule>>>,
}

impl MemoryPage {
    pub fn new() -> Self {
        Self::default()
    }

    fn doc(&self) -> MutexGuard<'_, Document> {
        self.doc.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn expose_capability(&self, name: &str) {
        self.capabilities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string());
    }

    pub fn register_module(&self, global_name: &str, module: Arc<dyn PluginModule>) {
        self.modules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(global_name.to_string(), module);
    }

    pub fn head(&self) -> Vec<Element> {
        self.doc().head.clone()
    }

    pub fn body(&self) -> Vec<Element> {
        self.doc().body.clone()
    }

    /// Elements tagged `id` anywhere in the document.
    pub fn count_id(&self, id: &str) -> usize {
        let doc = self.doc();
        doc.head.iter().chain(doc.body.iter()).filter(|e| e.id == id).count()
    }

    /// Bytes behind a live object URL.
    pub fn object(&self, url: &str) -> Option<Vec<u8>> {
        self.doc().objects.get(url).map(|(_, b)| b.clone())
    }

    pub fn live_objects(&self) -> usize {
        self.doc().objects.len()
    }
}

impl CapabilityLookup for MemoryPage {
    fn lookup(&self, name: &str) -> Option<Capability> {
        self.capabilities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
            .then(|| Capability { name: name.to_string() })
    }
}

impl PageHandle for MemoryPage {
    fn remove_element(&self, id: &str) -> Option<Element> {
        let mut guard = self.doc();
        let doc = &mut *guard;
        for list in [&mut doc.head, &mut doc.body] {
            if let Some(pos) = list.iter().position(|e| e.id == id) {
                return Some(list.remove(pos));
            }
        }
        None
    }

    fn append(&self, mount: Mount, element: Element) {
        let mut doc = self.doc();
        match mount {
            Mount::Head => doc.head.push(element),
            Mount::Body => doc.body.push(element),
        }
    }

    fn create_object_url(&self, bytes: &[u8], mime: &str) -> String {
        let url = format!("blob:resub/{}", uuid::Uuid::new_v4());
        self.doc()
            .objects
            .insert(url.clone(), (mime.to_string(), bytes.to_vec()));
        url
    }

    fn revoke_object_url(&self, url: &str) {
        self.doc().objects.remove(url);
    }

    fn loaded_module(&self, element_id: &str, global_name: &str) -> Option<Arc<dyn PluginModule>> {
        let doc = self.doc();
        let loaded = doc
            .head
            .iter()
            .chain(doc.body.iter())
            .any(|e| e.id == element_id && doc.objects.contains_key(&e.src));
        if !loaded {
            return None;
        }
        self.modules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(global_name)
            .cloned()
    }
}
