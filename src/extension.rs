//! 扩展与主题描述：
//! - 从清单节点树得到名称、厂商、版本与 base path
//! - 按需计算并缓存 templates / sass / assets / javascript 资源表
//! - 主题额外提供按扩展名过滤的覆盖表（以规范化后的目标路径为键）

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    sync::OnceLock,
};

use url::Url;

use crate::{
    error::{BuildError, BuildResult},
    manifest::{self, iterate_resources, parse_file_name, XmlNode},
    resource::{Javascript, Resource, Template},
    utils::{file_stem_of, normalize_rel},
};

pub(crate) const EXTENSION_ROOT: &str = "commerceextension";
pub(crate) const THEME_ROOT: &str = "commercetheme";
pub(crate) const ASSETS_FOLDER: &str = "assets";

/// `sass` 段：文件列表与每个应用的入口
#[derive(Debug, Default)]
pub(crate) struct SassDecl {
    pub(crate) files: Vec<String>,
    pub(crate) entrypoints: Vec<(String, String)>,
}

#[derive(Debug, Default)]
pub(crate) struct JavascriptDecl {
    pub(crate) modules: BTreeMap<String, Javascript>,
    pub(crate) entrypoints: Vec<(String, String)>,
}

#[derive(Debug)]
pub(crate) struct Extension {
    pub(crate) name: String,
    pub(crate) vendor: String,
    pub(crate) version: String,
    pub(crate) base_path: String,
    raw: XmlNode,
    content_root: PathBuf,
    server_url: Url,
    templates: OnceLock<BTreeMap<String, Template>>,
    sass: OnceLock<SassDecl>,
    assets: OnceLock<BTreeMap<String, Resource>>,
    javascript: OnceLock<JavascriptDecl>,
}

impl Extension {
    /// 在 `objects_path` 下查找 `manifest_file` 并解析
    pub(crate) fn load(
        objects_path: &Path,
        manifest_file: &str,
        root_tag: &str,
        content_root: &Path,
        server_url: &Url,
    ) -> BuildResult<Self> {
        let doc = manifest::parse(objects_path, manifest_file)?;
        Self::from_document(&doc, root_tag, content_root, server_url).map_err(|message| {
            BuildError::InvalidManifest { path: objects_path.join(manifest_file), message }
        })
    }

    pub(crate) fn from_document(
        doc: &XmlNode,
        root_tag: &str,
        content_root: &Path,
        server_url: &Url,
    ) -> Result<Self, String> {
        let raw = doc
            .get(root_tag)
            .cloned()
            .ok_or_else(|| format!("缺少根元素 <{root_tag}>"))?;
        let field = |key: &str| raw.get(key).and_then(XmlNode::as_text).unwrap_or("").to_string();
        let name = field("name");
        if name.is_empty() {
            return Err("缺少 <name>".into());
        }
        Ok(Extension {
            vendor: field("vendor"),
            version: field("version"),
            base_path: field("basepath"),
            name,
            raw,
            content_root: content_root.to_path_buf(),
            server_url: server_url.clone(),
            templates: OnceLock::new(),
            sass: OnceLock::new(),
            assets: OnceLock::new(),
            javascript: OnceLock::new(),
        })
    }

    pub(crate) fn full_name(&self, separator: &str) -> String {
        [self.vendor.as_str(), self.name.as_str(), self.version.as_str()].join(separator)
    }

    pub(crate) fn local_assets_path(&self, folder: &str) -> String {
        normalize_rel(&format!("{}/{}", folder, self.full_name("/")))
    }

    /// 本扩展静态资源的访问地址，结尾不带 `/`
    pub(crate) fn assets_url(&self) -> String {
        let rel = format!("{ASSETS_FOLDER}/{}", self.local_assets_path(""));
        match self.server_url.join(&rel) {
            Ok(u) => u.as_str().trim_end_matches('/').to_string(),
            Err(_) => format!("{}/{}", self.server_url.as_str().trim_end_matches('/'), rel),
        }
    }

    /// 去掉清单声明的 base path 前缀，再以扩展名作为首段
    pub(crate) fn exclude_base_path(&self, file: &str) -> String {
        let rest = if self.base_path.is_empty() {
            file
        } else {
            file.strip_prefix(self.base_path.as_str()).unwrap_or(file)
        };
        normalize_rel(&format!("{}/{}", self.name, rest))
    }

    pub(crate) fn templates(&self) -> &BTreeMap<String, Template> {
        self.templates.get_or_init(|| {
            let mut map: BTreeMap<String, Template> = BTreeMap::new();
            if let Some(apps) = self.raw.path(&["templates", "application"]) {
                iterate_resources(apps, |path, app| {
                    if let Some(existing) = map.get_mut(&path) {
                        existing.resource.add_application(app);
                        return;
                    }
                    let src = self.exclude_base_path(&path);
                    let resource = Resource::new(
                        &self.content_root,
                        src.clone(),
                        format!("{src}.js"),
                        file_stem_of(&path).to_string(),
                        app,
                    );
                    map.insert(path, Template::new(resource, self.assets_url()));
                });
            }
            map
        })
    }

    pub(crate) fn sass(&self) -> &SassDecl {
        self.sass.get_or_init(|| {
            let Some(sass) = self.raw.get("sass") else {
                return SassDecl::default();
            };
            let files = manifest::parse_files_with(sass, |f| self.exclude_base_path(&f));
            let entrypoints = sass
                .get("entrypoints")
                .map(|e| e.entries())
                .unwrap_or_default()
                .iter()
                .filter_map(|(app, entry)| {
                    parse_file_name(entry).map(|f| (app.clone(), self.exclude_base_path(&f)))
                })
                .collect();
            SassDecl { files, entrypoints }
        })
    }

    pub(crate) fn assets(&self) -> &BTreeMap<String, Resource> {
        self.assets.get_or_init(|| {
            let mut map = BTreeMap::new();
            let local = self.local_assets_path(ASSETS_FOLDER);
            if let Some(assets) = self.raw.get("assets") {
                iterate_resources(assets, |path, kind| {
                    let src = self.exclude_base_path(&path);
                    let dst = format!("{local}/{}", self.strip_asset_segments(&src));
                    let name = file_stem_of(&src).to_string();
                    map.insert(path, Resource::new(&self.content_root, src, normalize_rel(&dst), name, kind));
                });
            }
            map
        })
    }

    /// 去掉第一个 `assets` 段与第一个扩展名段（各一次）
    fn strip_asset_segments(&self, src: &str) -> String {
        let mut dropped_assets = false;
        let mut dropped_name = false;
        src.split('/')
            .filter(|seg| {
                if !dropped_assets && *seg == ASSETS_FOLDER {
                    dropped_assets = true;
                    return false;
                }
                if !dropped_name && *seg == self.name {
                    dropped_name = true;
                    return false;
                }
                true
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    pub(crate) fn javascript(&self) -> &JavascriptDecl {
        self.javascript.get_or_init(|| {
            let Some(js) = self.raw.get("javascript") else {
                return JavascriptDecl::default();
            };
            let entrypoints: Vec<(String, String)> = js
                .get("entrypoints")
                .map(|e| e.entries())
                .unwrap_or_default()
                .iter()
                .filter_map(|(app, entry)| {
                    parse_file_name(entry).map(|f| (app.clone(), self.exclude_base_path(&f)))
                })
                .collect();
            let entry_set: BTreeSet<&str> = entrypoints.iter().map(|(_, e)| e.as_str()).collect();
            let mut modules: BTreeMap<String, Javascript> = BTreeMap::new();
            if let Some(apps) = js.get("application") {
                iterate_resources(apps, |path, app| {
                    if let Some(existing) = modules.get_mut(&path) {
                        existing.resource.add_application(app);
                        return;
                    }
                    let src = self.exclude_base_path(&path);
                    let mut resource = Resource::new(
                        &self.content_root,
                        src.clone(),
                        format!("javascript/{src}"),
                        file_stem_of(&src).to_string(),
                        app,
                    );
                    resource.format = Some(".js".into());
                    let is_entrypoint = entry_set.contains(src.as_str());
                    modules.insert(
                        path,
                        Javascript { resource, is_entrypoint, extension_full_name: self.full_name(" - ") },
                    );
                });
            }
            JavascriptDecl { modules, entrypoints }
        })
    }
}

/// 覆盖表过滤条件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OverrideFilter {
    Tpl,
    Scss,
    All,
}

impl OverrideFilter {
    fn slot(self) -> usize {
        match self {
            OverrideFilter::Tpl => 0,
            OverrideFilter::Scss => 1,
            OverrideFilter::All => 2,
        }
    }

    fn accepts(self, src: &str) -> bool {
        match self {
            OverrideFilter::Tpl => src.ends_with(".tpl"),
            OverrideFilter::Scss => src.ends_with(".scss"),
            OverrideFilter::All => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Override {
    pub(crate) src: String,
    pub(crate) dst: String,
}

pub(crate) type OverrideTable = BTreeMap<String, Override>;

#[derive(Debug)]
pub(crate) struct Theme {
    pub(crate) extension: Extension,
    overrides: [OnceLock<OverrideTable>; 3],
}

impl Theme {
    pub(crate) fn new(extension: Extension) -> Self {
        Theme { extension, overrides: Default::default() }
    }

    pub(crate) fn tpl_overrides(&self) -> &OverrideTable {
        self.overrides(OverrideFilter::Tpl)
    }

    pub(crate) fn sass_overrides(&self) -> &OverrideTable {
        self.overrides(OverrideFilter::Scss)
    }

    pub(crate) fn overrides(&self, filter: OverrideFilter) -> &OverrideTable {
        self.overrides[filter.slot()].get_or_init(|| {
            let declared = self
                .extension
                .raw
                .path(&["overrides", "override"])
                .map(|o| o.items())
                .unwrap_or_default();
            declared
                .into_iter()
                .filter_map(|o| {
                    let src = parse_file_name(o.get("src")?)?;
                    let dst = normalize_override_dst(o.get("dst")?.as_text()?);
                    Some(Override { src, dst })
                })
                .filter(|o| filter.accepts(&o.src))
                .map(|o| (o.dst.clone(), o))
                .collect()
        })
    }
}

/// 去掉首段；Sass partial 文件名 `_foo.scss` 改写为 `foo.scss`
pub(crate) fn normalize_override_dst(dst: &str) -> String {
    let normalized = normalize_rel(dst);
    let mut segs: Vec<String> = normalized.split('/').skip(1).map(str::to_string).collect();
    if let Some(last) = segs.last_mut() {
        let public = last
            .strip_prefix('_')
            .filter(|s| s.ends_with(".scss") && s.len() > ".scss".len())
            .map(str::to_string);
        if let Some(p) = public {
            *last = p;
        }
    }
    segs.join("/")
}
