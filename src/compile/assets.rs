//! 静态资源与 JavaScript：
//! - 资源：按目标路径平铺复制，不做转换
//! - JavaScript：复制模块文件，并为每个应用写入加载器配置与入口 `require`

use std::{collections::BTreeMap, fs, path::Path};

use serde_json::json;
use tracing::debug;

use super::{ResourceCompiler, Selection};
use crate::{
    context::CompilationContext,
    error::{BuildError, BuildResult},
    resource::{Javascript, Resource, ResourceKind},
    utils::{join_rel, run_parallel},
};

const JAVASCRIPT_FOLDER: &str = "javascript";

fn copy_resource(kind: ResourceKind, resource: &Resource, root: &Path) -> BuildResult<()> {
    let from = resource.full_src();
    let to = join_rel(root, &resource.dst);
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(|e| BuildError::io(kind, parent, e))?;
    }
    fs::copy(&from, &to).map_err(|e| BuildError::io(kind, &from, e))?;
    debug!("复制 {} -> {}", resource.src, to.display());
    Ok(())
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct AssetsCompiler;

impl ResourceCompiler for AssetsCompiler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Assets
    }

    fn compile(&self, ctx: &CompilationContext, selection: &Selection) -> BuildResult<()> {
        let root = ctx.local_server_path()?;
        let selected: Vec<&Resource> = ctx.assets().iter().filter(|a| selection.includes(&a.src)).collect();
        run_parallel(&selected, |a| copy_resource(ResourceKind::Assets, a, &root))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct JavascriptCompiler;

impl JavascriptCompiler {
    /// `require.config({ paths })` + `require([入口...])`
    fn write_entrypoint(ctx: &CompilationContext, folder: &Path, app: &str, entrypoints: &[String]) -> BuildResult<()> {
        let base = ctx.server_url.as_str().trim_end_matches('/');
        let paths: BTreeMap<&str, String> = ctx
            .javascript()
            .iter()
            .filter(|js| js.resource.applications.contains(app))
            .map(|js| {
                (js.resource.name.as_str(), format!("{base}/{}", js.resource.module_path()))
            })
            .collect();
        let path = folder.join(format!("{app}-javascript.js"));
        let fail = |message: String| BuildError::CompilationFailure {
            pass: ResourceKind::Javascript,
            path: path.clone(),
            message,
        };
        let config = serde_json::to_string_pretty(&json!({ "paths": paths })).map_err(|e| fail(e.to_string()))?;
        let modules = serde_json::to_string(entrypoints).map_err(|e| fail(e.to_string()))?;
        fs::write(&path, format!("require.config({config});\nrequire({modules});\n"))
            .map_err(|e| BuildError::io(ResourceKind::Javascript, &path, e))
    }
}

impl ResourceCompiler for JavascriptCompiler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Javascript
    }

    fn compile(&self, ctx: &CompilationContext, selection: &Selection) -> BuildResult<()> {
        let root = ctx.local_server_path()?;
        let folder = root.join(JAVASCRIPT_FOLDER);
        fs::create_dir_all(&folder).map_err(|e| BuildError::io(ResourceKind::Javascript, &folder, e))?;

        let selected: Vec<&Javascript> =
            ctx.javascript().iter().filter(|js| selection.includes(&js.resource.src)).collect();
        run_parallel(&selected, |js| {
            debug!("脚本 {} ({})", js.resource.name, js.extension_full_name);
            copy_resource(ResourceKind::Javascript, &js.resource, &root)
        })?;

        let apps: Vec<(String, Vec<String>)> = ctx.javascript_entrypoints().into_iter().collect();
        run_parallel(&apps, |(app, entrypoints)| Self::write_entrypoint(ctx, &folder, app, entrypoints))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::fixture;
    use std::collections::BTreeSet;

    fn prepared(root: &Path) -> CompilationContext {
        let ctx = fixture(root);
        let out = root.join("LocalServer");
        fs::create_dir_all(&out).unwrap();
        ctx.set_local_server_path(out);
        ctx
    }

    #[test]
    fn assets_are_copied_to_versioned_folder() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = prepared(dir.path());
        AssetsCompiler.compile(&ctx, &Selection::All).unwrap();
        let copied = dir.path().join("LocalServer/assets/Acme/Widgets/1.0/img/logo.png");
        assert_eq!(fs::read_to_string(copied).unwrap(), "PNG");
    }

    #[test]
    fn empty_selection_copies_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = prepared(dir.path());
        AssetsCompiler.compile(&ctx, &Selection::Only(BTreeSet::new())).unwrap();
        assert!(!dir.path().join("LocalServer/assets").exists());
    }

    #[test]
    fn missing_source_fails_the_pass() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = prepared(dir.path());
        fs::remove_file(ctx.files_path.join("Widgets/assets/img/logo.png")).unwrap();
        let err = AssetsCompiler.compile(&ctx, &Selection::All).unwrap_err();
        assert!(err.is_compilation_failure());
    }

    #[test]
    fn javascript_modules_and_app_loader() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = prepared(dir.path());
        JavascriptCompiler.compile(&ctx, &Selection::All).unwrap();
        let out = dir.path().join("LocalServer/javascript");
        assert!(out.join("Widgets/JavaScript/Widgets.Main.js").is_file());
        assert!(out.join("Widgets/JavaScript/Widgets.View.js").is_file());

        let loader = fs::read_to_string(out.join("shopping-javascript.js")).unwrap();
        assert!(loader.contains(
            "\"Widgets.Main\": \"http://localhost:7777/javascript/Widgets/JavaScript/Widgets.Main\""
        ));
        assert!(loader.contains("\"Widgets.View\""));
        assert!(loader.ends_with("require([\"Widgets.Main\"]);\n"));
    }
}
