//! 编译上下文：
//! - 汇总主题与所选扩展的 templates / sass / assets / javascript
//! - 应用主题的模板覆盖
//! - 记录输出根目录与内容根目录，供各编译器与监视器使用

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{OnceLock, RwLock},
};

use tracing::{debug, info, warn};
use url::Url;

use crate::{
    error::{BuildError, BuildResult},
    extension::{Extension, OverrideFilter, OverrideTable, Theme, ASSETS_FOLDER, EXTENSION_ROOT, THEME_ROOT},
    project::ProjectLayout,
    resource::{Javascript, Resource, Template},
    utils::{find_under, forward_slashes},
};

/// 某个应用的一个 Sass 入口，以及其所属扩展的静态资源目录
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SassEntry {
    pub(crate) entry: String,
    pub(crate) assets_path: String,
}

#[derive(Debug)]
pub(crate) struct CompilationContext {
    pub(crate) theme: Theme,
    pub(crate) extensions: Vec<Extension>,
    pub(crate) project_folder: PathBuf,
    /// 内容根目录：所有资源的 `src` 相对于此
    pub(crate) files_path: PathBuf,
    pub(crate) server_url: Url,
    output_root: PathBuf,
    local_server_path: RwLock<Option<PathBuf>>,
    templates: OnceLock<Vec<Template>>,
    assets: OnceLock<Vec<Resource>>,
    javascript: OnceLock<Vec<Javascript>>,
    sass_entrypoints: OnceLock<BTreeMap<String, Vec<SassEntry>>>,
}

impl CompilationContext {
    /// 校验主题与扩展名称并加载其清单
    pub(crate) fn load(
        layout: &ProjectLayout,
        theme: &str,
        extensions: &[String],
        server_url: Url,
        output_root: PathBuf,
    ) -> BuildResult<Self> {
        layout.validate_theme(theme)?;
        layout.validate_extensions(extensions)?;
        let load = |key: &str, root: &str| {
            Extension::load(&layout.objects_path, &format!("{key}.xml"), root, &layout.files_path, &server_url)
        };
        let theme = Theme::new(load(theme, THEME_ROOT)?);
        info!(
            "主题 {} 声明了 {} 个覆盖",
            theme.extension.full_name(" - "),
            theme.overrides(OverrideFilter::All).len()
        );
        let extensions = extensions
            .iter()
            .map(|e| load(e, EXTENSION_ROOT))
            .collect::<BuildResult<Vec<_>>>()?;
        Ok(Self::from_parts(
            theme,
            extensions,
            layout.project_folder.clone(),
            layout.files_path.clone(),
            server_url,
            output_root,
        ))
    }

    pub(crate) fn from_parts(
        theme: Theme,
        extensions: Vec<Extension>,
        project_folder: PathBuf,
        files_path: PathBuf,
        server_url: Url,
        output_root: PathBuf,
    ) -> Self {
        CompilationContext {
            theme,
            extensions,
            project_folder,
            files_path,
            server_url,
            output_root,
            local_server_path: RwLock::new(None),
            templates: OnceLock::new(),
            assets: OnceLock::new(),
            javascript: OnceLock::new(),
            sass_entrypoints: OnceLock::new(),
        }
    }

    /// 所有参与构建的扩展，主题在最后
    pub(crate) fn all_extensions(&self) -> impl Iterator<Item = &Extension> {
        self.extensions.iter().chain(std::iter::once(&self.theme.extension))
    }

    pub(crate) fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub(crate) fn set_local_server_path(&self, path: PathBuf) {
        if let Ok(mut slot) = self.local_server_path.write() {
            *slot = Some(path);
        }
    }

    pub(crate) fn local_server_path(&self) -> BuildResult<PathBuf> {
        self.local_server_path
            .read()
            .ok()
            .and_then(|slot| slot.clone())
            .ok_or(BuildError::OutputRootNotPrepared)
    }

    pub(crate) fn tpl_overrides(&self) -> &OverrideTable {
        self.theme.tpl_overrides()
    }

    pub(crate) fn sass_overrides(&self) -> &OverrideTable {
        self.theme.sass_overrides()
    }

    /// 在项目目录下查找覆盖声明的源文件
    pub(crate) fn locate_override(&self, declared_src: &str) -> Option<PathBuf> {
        find_under(&self.project_folder, declared_src)
    }

    pub(crate) fn templates(&self) -> &[Template] {
        self.templates.get_or_init(|| {
            let overrides = self.tpl_overrides();
            self.all_extensions()
                .flat_map(|ext| ext.templates().values().cloned())
                .map(|mut t| {
                    if let Some(o) = overrides.get(&t.resource.src) {
                        match self.locate_override(&o.src) {
                            Some(full) => t.resource.apply_override(&o.src, full),
                            None => warn!("覆盖源文件不存在: {}", o.src),
                        }
                    }
                    t
                })
                .collect()
        })
    }

    pub(crate) fn assets(&self) -> &[Resource] {
        self.assets.get_or_init(|| {
            self.all_extensions().flat_map(|ext| ext.assets().values().cloned()).collect()
        })
    }

    pub(crate) fn javascript(&self) -> &[Javascript] {
        self.javascript.get_or_init(|| {
            self.all_extensions()
                .flat_map(|ext| ext.javascript().modules.values().cloned())
                .collect()
        })
    }

    /// 应用 -> 按扩展顺序排列的 Sass 入口
    pub(crate) fn sass_entrypoints(&self) -> &BTreeMap<String, Vec<SassEntry>> {
        self.sass_entrypoints.get_or_init(|| {
            let mut map: BTreeMap<String, Vec<SassEntry>> = BTreeMap::new();
            for ext in self.all_extensions() {
                let assets_path = ext.local_assets_path(ASSETS_FOLDER);
                let sass = ext.sass();
                debug!("{}: {} 个样式文件，{} 个入口", ext.name, sass.files.len(), sass.entrypoints.len());
                for (app, entry) in &sass.entrypoints {
                    map.entry(app.clone()).or_default().push(SassEntry {
                        entry: entry.clone(),
                        assets_path: assets_path.clone(),
                    });
                }
            }
            debug!("Sass 入口应用: {:?}", map.keys().collect::<Vec<_>>());
            map
        })
    }

    /// 应用 -> JavaScript 入口模块名
    pub(crate) fn javascript_entrypoints(&self) -> BTreeMap<String, Vec<String>> {
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for js in self.javascript().iter().filter(|j| j.is_entrypoint) {
            for app in &js.resource.applications {
                map.entry(app.clone()).or_default().push(js.resource.name.clone());
            }
        }
        map
    }

    /// 出现在任一资源中的应用 id
    pub(crate) fn applications(&self) -> Vec<String> {
        let mut apps: Vec<String> = self
            .templates()
            .iter()
            .flat_map(|t| t.resource.applications.iter().cloned())
            .chain(self.sass_entrypoints().keys().cloned())
            .chain(self.javascript_entrypoints().into_keys())
            .collect();
        apps.sort();
        apps.dedup();
        apps
    }

    /// 绝对路径 -> 相对内容根目录的 `/` 分隔路径；不在内容根下时返回 `None`
    pub(crate) fn exclude_base_files_path(&self, path: &Path) -> Option<String> {
        path.strip_prefix(&self.files_path).ok().map(forward_slashes)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{extension::tests::{server, WIDGETS_XML}, manifest};
    use std::fs;

    pub(crate) const PURE_XML: &str = r#"<commercetheme>
  <vendor>Acme</vendor><name>Pure</name><version>2.0</version>
  <basepath>SuiteScripts/Acme/Pure</basepath>
  <sass><entrypoints><shopping>SuiteScripts/Acme/Pure/Sass/theme.scss</shopping></entrypoints></sass>
  <overrides>
    <override><src>Pure/Overrides/Widgets/views/main.tpl</src><dst>Acme/Widgets/views/main.tpl</dst></override>
    <override><src>Pure/Overrides/Widgets/Sass/_foo.scss</src><dst>Acme/Widgets/Sass/_foo.scss</dst></override>
  </overrides>
</commercetheme>"#;

    /// 在临时目录中搭建一个含主题与扩展源码的项目
    pub(crate) fn fixture(root: &Path) -> CompilationContext {
        let files = root.join("FileCabinet");
        let write = |rel: &str, content: &str| {
            let p = files.join(rel);
            fs::create_dir_all(p.parent().unwrap()).unwrap();
            fs::write(p, content).unwrap();
        };
        write("Widgets/views/main.tpl", "<div>{{#if name}}{{name}}{{/if}}</div>");
        write("Widgets/Sass/main.scss", "@import \"foo\";\n.widgets { color: red; }\n");
        write("Widgets/Sass/_foo.scss", ".foo { color: blue; }\n");
        write("Widgets/assets/img/logo.png", "PNG");
        write("Widgets/JavaScript/Widgets.Main.js", "define('Widgets.Main', [], function () { return {}; });");
        write("Widgets/JavaScript/Widgets.View.js", "define('Widgets.View', [], function () { return {}; });");
        write("Pure/Sass/theme.scss", ".theme { background: getThemeAssetsPath('img/bg.png'); }\n");
        write("Pure/Overrides/Widgets/views/main.tpl", "<section>{{name}}</section>");
        write("Pure/Overrides/Widgets/Sass/_foo.scss", ".foo { color: green; }\n");

        let ext = Extension::from_document(
            &manifest::parse_str(WIDGETS_XML).unwrap(),
            EXTENSION_ROOT,
            &files,
            &server(),
        )
        .unwrap();
        let theme = Theme::new(
            Extension::from_document(&manifest::parse_str(PURE_XML).unwrap(), THEME_ROOT, &files, &server())
                .unwrap(),
        );
        CompilationContext::from_parts(
            theme,
            vec![ext],
            root.to_path_buf(),
            files,
            server(),
            root.join("LocalServer"),
        )
    }

    #[test]
    fn union_includes_theme_and_applies_template_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = fixture(dir.path());
        let templates = ctx.templates();
        assert_eq!(templates.len(), 1);
        let main = &templates[0];
        assert_eq!(main.resource.override_src.as_deref(), Some("Pure/Overrides/Widgets/views/main.tpl"));
        assert!(main.resource.full_src().ends_with("Pure/Overrides/Widgets/views/main.tpl"));

        let sass = ctx.sass_entrypoints();
        let shopping = &sass["shopping"];
        assert_eq!(shopping.len(), 2);
        assert_eq!(shopping[0].entry, "Widgets/Sass/main.scss");
        assert_eq!(shopping[0].assets_path, "assets/Acme/Widgets/1.0");
        assert_eq!(shopping[1].assets_path, "assets/Acme/Pure/2.0");
    }

    #[test]
    fn local_server_path_must_be_recorded_first() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = fixture(dir.path());
        assert!(matches!(ctx.local_server_path(), Err(BuildError::OutputRootNotPrepared)));
        ctx.set_local_server_path(dir.path().join("LocalServer"));
        assert_eq!(ctx.local_server_path().unwrap(), dir.path().join("LocalServer"));
    }

    #[test]
    fn exclude_base_files_path_makes_relative() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = fixture(dir.path());
        let changed = ctx.files_path.join("Widgets").join("views").join("main.tpl");
        assert_eq!(ctx.exclude_base_files_path(&changed).as_deref(), Some("Widgets/views/main.tpl"));
        assert_eq!(ctx.exclude_base_files_path(Path::new("/elsewhere/x.tpl")), None);
        assert_eq!(ctx.applications(), vec!["checkout".to_string(), "shopping".to_string()]);
    }
}
