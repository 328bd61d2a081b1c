/// Asset class of a file, derived from its name alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNameParts {
    /// `.js` whose name mentions `worker`.
    pub is_worker: bool,
    pub is_css: bool,
    /// Non-worker `.js` whose second-to-last segment is `umd`.
    pub is_umd_js: bool,
    /// Name up to the first `.`, directories stripped.
    pub base_name: String,
}

impl FileNameParts {
    /// Id of the page element carrying this asset, if it is an injectable class.
    pub fn element_id(&self) -> Option<String> {
        if self.is_worker {
            Some(format!("{}-worker-script", self.base_name))
        } else if self.is_umd_js {
            Some(format!("{}-script", self.base_name))
        } else if self.is_css {
            Some(format!("{}-style", self.base_name))
        } else {
            None
        }
    }
}

pub fn split_file_names(file_name: &str) -> FileNameParts {
    let name = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
    let segments: Vec<&str> = name.split('.').collect();
    let is_js = segments.len() > 1 && segments.last() == Some(&"js");
    let is_worker = is_js && name.contains("worker");
    let is_umd_js = is_js && !is_worker && segments.len() >= 3 && segments[segments.len() - 2] == "umd";
    FileNameParts {
        is_worker,
        is_css: segments.len() > 1 && segments.last() == Some(&"css"),
        is_umd_js,
        base_name: segments[0].to_string(),
    }
}
