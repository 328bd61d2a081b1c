//! Splicing replacement scripts and stylesheets into a live page.
//!
//! Each asset class owns one element id derived from the file's base name.
//! Injection removes the tagged element (revoking its content handle) before
//! appending the new one, so the id is never present twice.

mod classify;
mod page;

pub use classify::{split_file_names, FileNameParts};
pub use page::{
    Capability, CapabilityLookup, Element, ElementKind, MemoryPage, Mount,
    PageHandle, PluginModule,
};

use thiserror::Error;

use crate::blob_store::{AssetStore, BlobError};
use crate::config::InjectConfig;

#[derive(Debug, Error)]
pub enum InjectError {
    #[error("{0} is not an injectable script or stylesheet")]
    Unsupported(String),
    #[error("asset {file}: {source}")]
    Asset {
        file: String,
        #[source]
        source: BlobError,
    },
}

/// What one injection did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Injected {
    pub element_id: String,
    /// Whether the loaded module was installed into the page capability.
    pub installed: bool,
}

#[derive(Debug, Clone)]
pub struct ResourceInjector {
    capability_name: String,
}

impl ResourceInjector {
    /// `capability_name` is the page global modules install into.
    pub fn new(capability_name: impl Into<String>) -> Self {
        Self {
            capability_name: capability_name.into(),
        }
    }

    pub fn from_config(cfg: &InjectConfig) -> Self {
        Self::new(cfg.capability_name.clone())
    }

    pub fn inject(
        &self,
        page: &dyn PageHandle,
        file_name: &str,
        content: &[u8],
    ) -> Result<Injected, InjectError> {
        let parts = split_file_names(file_name);
        let element_id = parts
            .element_id()
            .ok_or_else(|| InjectError::Unsupported(file_name.to_string()))?;

        if let Some(old) = page.remove_element(&element_id) {
            page.revoke_object_url(&old.src);
        }

        let (kind, mount, mime) = if parts.is_css {
            (ElementKind::Stylesheet, Mount::Head, "text/css")
        } else {
            (ElementKind::Script, Mount::Body, "text/javascript")
        };
        let src = page.create_object_url(content, mime);
        page.append(
            mount,
            Element {
                id: element_id.clone(),
                kind,
                src,
            },
        );
        tracing::debug!(file = file_name, element = %element_id, bytes = content.len(), "injected");

        let installed = parts.is_umd_js && self.install_module(page, &element_id, &parts.base_name);
        Ok(Injected {
            element_id,
            installed,
        })
    }

    /// Run the loaded module's install hook against the page capability.
    /// A missing capability or module is normal on pages without the framework.
    fn install_module(&self, page: &dyn PageHandle, element_id: &str, module_name: &str) -> bool {
        let Some(capability) = page.lookup(&self.capability_name) else {
            tracing::debug!(capability = %self.capability_name, "capability absent, skipping install");
            return false;
        };
        let Some(module) = page.loaded_module(element_id, module_name) else {
            tracing::debug!(module = module_name, "module exposes no install hook");
            return false;
        };
        module.install(&capability);
        tracing::info!(module = module_name, capability = %capability.name, "module installed");
        true
    }

    /// Inject a file whose content lives in the asset store.
    pub async fn inject_stored(
        &self,
        page: &dyn PageHandle,
        assets: &AssetStore,
        file_name: &str,
    ) -> Result<Injected, InjectError> {
        let content = assets
            .get(file_name)
            .await
            .map_err(|source| InjectError::Asset {
                file: file_name.to_string(),
                source,
            })?;
        self.inject(page, file_name, &content)
    }
}
