//! 项目目录结构：
//! - 读取 `deploy.xml`（可选）得到 objects 与 files 目录
//! - 扫描 objects 目录下的主题 / 扩展清单

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::{
    error::{BuildError, BuildResult},
    extension::{EXTENSION_ROOT, THEME_ROOT},
    manifest::{self, XmlNode},
    utils::{extension_of, join_rel, normalize_rel},
};

const DEPLOY_XML: &str = "deploy.xml";
const DEFAULT_FILES: &str = "FileCabinet";
const DEFAULT_OBJECTS: &str = "Objects";

#[derive(Debug, Clone)]
pub(crate) struct ProjectLayout {
    pub(crate) project_folder: PathBuf,
    pub(crate) objects_path: PathBuf,
    pub(crate) files_path: PathBuf,
    /// 清单名（文件名去掉 `.xml`）-> 清单路径
    pub(crate) themes: BTreeMap<String, PathBuf>,
    pub(crate) extensions: BTreeMap<String, PathBuf>,
}

impl ProjectLayout {
    pub(crate) fn discover(project_folder: &Path) -> BuildResult<Self> {
        if !project_folder.is_dir() {
            return Err(BuildError::ResourceNotFound {
                name: "project folder".into(),
                dir: project_folder.to_path_buf(),
            });
        }
        let deploy = project_folder.join(DEPLOY_XML);
        let doc = if deploy.is_file() { Some(manifest::parse_file(&deploy)?) } else { None };
        let folder = |section: &str, default: &str| {
            let rel = doc
                .as_ref()
                .and_then(|d| deploy_path(d, section))
                .unwrap_or_else(|| default.to_string());
            join_rel(project_folder, &rel)
        };
        let objects_path = folder("objects", DEFAULT_OBJECTS);
        let files_path = folder("files", DEFAULT_FILES);

        let mut themes = BTreeMap::new();
        let mut extensions = BTreeMap::new();
        for entry in WalkDir::new(&objects_path).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if !entry.file_type().is_file() || extension_of(path) != "xml" {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            match manifest::parse_file(path) {
                Ok(doc) if doc.get(THEME_ROOT).is_some() => { themes.insert(key, path.to_path_buf()); }
                Ok(doc) if doc.get(EXTENSION_ROOT).is_some() => { extensions.insert(key, path.to_path_buf()); }
                Ok(_) => debug!("跳过非主题/扩展对象: {}", path.display()),
                Err(e) => warn!("跳过无法解析的对象: {}", e),
            }
        }

        Ok(ProjectLayout {
            project_folder: project_folder.to_path_buf(),
            objects_path,
            files_path,
            themes,
            extensions,
        })
    }

    pub(crate) fn validate_theme(&self, theme: &str) -> BuildResult<()> {
        if self.themes.is_empty() {
            return Err(BuildError::ResourceNotFound { name: "theme".into(), dir: self.objects_path.clone() });
        }
        if !self.themes.contains_key(theme) {
            return Err(BuildError::ResourceNotFound { name: theme.into(), dir: self.objects_path.clone() });
        }
        Ok(())
    }

    pub(crate) fn validate_extensions(&self, extensions: &[String]) -> BuildResult<()> {
        match extensions.iter().find(|e| !self.extensions.contains_key(e.as_str())) {
            Some(missing) => Err(BuildError::ResourceNotFound {
                name: missing.clone(),
                dir: self.objects_path.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// `<deploy><files><path>~/FileCabinet/*</path></files></deploy>` -> `FileCabinet`
fn deploy_path(doc: &XmlNode, section: &str) -> Option<String> {
    let node = doc.path(&["deploy", section, "path"])?;
    let first = node.items().into_iter().find_map(XmlNode::as_text)?;
    let trimmed = first.trim_start_matches("~/").trim_end_matches('*');
    let rel = normalize_rel(trimmed);
    if rel.is_empty() { None } else { Some(rel) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn discovers_layout_from_deploy_xml() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(
            root.join("deploy.xml"),
            "<deploy><files><path>~/FileCabinet/SuiteScripts/*</path></files><objects><path>~/Objects/*</path></objects></deploy>",
        )
        .unwrap();
        fs::create_dir_all(root.join("Objects/sub")).unwrap();
        fs::write(root.join("Objects/Pure.xml"), "<commercetheme><name>Pure</name></commercetheme>").unwrap();
        fs::write(root.join("Objects/sub/Widgets.xml"), "<commerceextension><name>Widgets</name></commerceextension>").unwrap();
        fs::write(root.join("Objects/custrecord.xml"), "<customrecordtype/>").unwrap();

        let layout = ProjectLayout::discover(root).unwrap();
        assert_eq!(layout.files_path, root.join("FileCabinet").join("SuiteScripts"));
        assert_eq!(layout.themes.keys().collect::<Vec<_>>(), vec!["Pure"]);
        assert_eq!(layout.extensions.keys().collect::<Vec<_>>(), vec!["Widgets"]);
        assert!(layout.validate_theme("Pure").is_ok());
        assert!(matches!(layout.validate_theme("Nope"), Err(BuildError::ResourceNotFound { .. })));
        assert!(layout.validate_extensions(&["Widgets".into()]).is_ok());
        assert!(layout.validate_extensions(&["Gadgets".into()]).is_err());
    }

    #[test]
    fn defaults_without_deploy_xml() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ProjectLayout::discover(dir.path()).unwrap();
        assert_eq!(layout.objects_path, dir.path().join("Objects"));
        assert_eq!(layout.files_path, dir.path().join("FileCabinet"));
        assert!(layout.validate_theme("Any").is_err());
    }
}
