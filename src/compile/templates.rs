//! 模板编译：
//! - 第一阶段：并行读取、预编译、包装为具名模块，写入 `templates/processed-templates`
//! - 第二阶段（第一阶段全部成功后）：每个应用一个 `<app>-templates.js` 加载器配置
//! - 每次编译写一次 `javascript-libs.js`（模板运行时辅助脚本）

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use serde_json::json;
use tera::{Context as TContext, Tera};
use tracing::debug;

use super::{ResourceCompiler, Selection};
use crate::{
    context::CompilationContext,
    error::{BuildError, BuildResult},
    resource::{ResourceKind, Template},
    runtime,
    utils::{join_rel, run_parallel},
};

const TEMPLATES_FOLDER: &str = "templates";
const PROCESSED_FOLDER: &str = "processed-templates";
const LIBS_FILE: &str = "javascript-libs.js";
const WRAPPER_NAME: &str = "template.js";

/// 包装后的模块：注入 `_extension_path` / `_theme_path`，并给渲染函数标上 `Name`
const WRAPPER: &str = r#"define({{ name | json_encode() }}, {{ dependencies | json_encode() }}, function (Handlebars, compilerNameLookup)
{
	var template = Handlebars.template({{ precompiled }});
	var render = function (context, options)
	{
		context = context || {};
		context._extension_path = {{ extension_path | json_encode() }};
		context._theme_path = {{ theme_path | json_encode() }};
		return template(context, options);
	};
	render.Name = {{ name | json_encode() }};
	return render;
});
"#;

/// 模板预编译步骤
pub(crate) trait Precompile: Send + Sync {
    /// 返回可交给 `Handlebars.template()` 的 JS 表达式
    fn precompile(&self, source: &str) -> Result<String, String>;
}

/// 默认预编译：检查块标签配对，生成在浏览器端首次渲染时才编译的模板规格对象。
/// 浏览器端编译出的名称查找由 `Handlebars.CompilerNameLookup` 接管（见 `javascript-libs.js`）
#[derive(Debug, Default)]
pub(crate) struct RuntimePrecompiler;

impl Precompile for RuntimePrecompiler {
    fn precompile(&self, source: &str) -> Result<String, String> {
        check_blocks(source)?;
        let literal = serde_json::to_string(source).map_err(|e| e.to_string())?;
        Ok(format!(
            "(function(){{var compiled;return {{\"compiler\":[8,\">= 4.3.0\"],\
\"main\":function(container,depth0,helpers,partials,data){{\
compiled=compiled||Handlebars.compile({literal});\
return compiled(depth0,{{helpers:helpers,partials:partials,data:data}});}},\
\"useData\":true}};}})()"
        ))
    }
}

/// 模板里直接拼接 `{{_theme_path}}img/x.png`
fn with_trailing_slash(url: &str) -> String {
    format!("{}/", url.trim_end_matches('/'))
}

/// `{{#name}}` 与 `{{/name}}` 必须成对嵌套
fn check_blocks(source: &str) -> Result<(), String> {
    let mut stack: Vec<String> = Vec::new();
    let mut rest = source;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start..];
        let (close, skip) = if after.starts_with("{{!--") {
            ("--}}", 5)
        } else if after.starts_with("{{{") {
            ("}}}", 3)
        } else {
            ("}}", 2)
        };
        let Some(end) = after[skip..].find(close) else {
            return Err(format!("未闭合的标签: {}", after.lines().next().unwrap_or(after)));
        };
        let inner = &after[skip..skip + end];
        rest = &after[skip + end + close.len()..];
        if skip != 2 || inner.starts_with('!') {
            continue;
        }
        let tag = inner.trim_matches(|c: char| c == '~' || c.is_whitespace());
        if let Some(open) = tag.strip_prefix('#').or_else(|| tag.strip_prefix('^').filter(|t| !t.trim().is_empty())) {
            let open = open.trim_start_matches(['>', '*']).trim_start();
            let name = open.split_whitespace().next().unwrap_or_default();
            stack.push(name.to_string());
        } else if let Some(close) = tag.strip_prefix('/') {
            let name = close.trim();
            match stack.pop() {
                Some(open) if open == name => {}
                Some(open) => return Err(format!("块标签不匹配: 期望 {{{{/{open}}}}}，实际 {{{{/{name}}}}}")),
                None => return Err(format!("多余的结束标签: {{{{/{name}}}}}")),
            }
        }
    }
    match stack.pop() {
        Some(open) => Err(format!("块标签未闭合: {{{{#{open}}}}}")),
        None => Ok(()),
    }
}

pub(crate) struct TemplatesCompiler {
    precompiler: Box<dyn Precompile>,
    tera: Tera,
    /// 应用 -> { 模板名: 模板名 }；在监视重编之间保留
    entrypoints: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
}

impl TemplatesCompiler {
    pub(crate) fn new() -> BuildResult<Self> {
        Self::with_precompiler(Box::new(RuntimePrecompiler))
    }

    pub(crate) fn with_precompiler(precompiler: Box<dyn Precompile>) -> BuildResult<Self> {
        let mut tera = Tera::default();
        tera.add_raw_template(WRAPPER_NAME, WRAPPER).map_err(|e| BuildError::CompilationFailure {
            pass: ResourceKind::Templates,
            path: PathBuf::from(WRAPPER_NAME),
            message: e.to_string(),
        })?;
        Ok(TemplatesCompiler { precompiler, tera, entrypoints: Mutex::new(BTreeMap::new()) })
    }

    fn fail(path: &Path, message: impl ToString) -> BuildError {
        BuildError::CompilationFailure {
            pass: ResourceKind::Templates,
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }

    fn write_libs(&self, folder: &Path) -> BuildResult<()> {
        let body: String = runtime::TEMPLATE_HELPERS
            .iter()
            .filter_map(|name| runtime::script(name))
            .collect::<Vec<_>>()
            .join("\n");
        let path = folder.join(LIBS_FILE);
        fs::write(&path, body).map_err(|e| BuildError::io(ResourceKind::Templates, &path, e))
    }

    fn process(&self, template: &Template, processed: &Path, theme_path: &str) -> BuildResult<()> {
        let resource = &template.resource;
        resource.log_override_message();
        let full_src = resource.full_src();
        let content = resource
            .source_content()
            .map_err(|e| BuildError::io(ResourceKind::Templates, &full_src, e))?;
        let precompiled = self.precompiler.precompile(&content).map_err(|m| Self::fail(&full_src, m))?;

        let mut tctx = TContext::new();
        tctx.insert("name", &resource.name);
        tctx.insert("dependencies", &template.dependencies);
        tctx.insert("precompiled", &precompiled);
        tctx.insert("extension_path", &with_trailing_slash(&template.extension_asset_url));
        tctx.insert("theme_path", theme_path);
        let wrapped = self.tera.render(WRAPPER_NAME, &tctx).map_err(|e| Self::fail(&full_src, e))?;

        let dst = join_rel(processed, &resource.dst);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).map_err(|e| BuildError::io(ResourceKind::Templates, parent, e))?;
        }
        fs::write(&dst, wrapped).map_err(|e| BuildError::io(ResourceKind::Templates, &dst, e))?;
        debug!("模板 {} -> {}", resource.src, dst.display());

        let mut entrypoints = self.entrypoints.lock().unwrap_or_else(|e| e.into_inner());
        for app in &resource.applications {
            entrypoints
                .entry(app.clone())
                .or_default()
                .insert(resource.name.clone(), resource.name.clone());
        }
        Ok(())
    }

    fn write_entrypoint(
        &self,
        folder: &Path,
        base_url: &str,
        app: &str,
        paths: &BTreeMap<String, String>,
    ) -> BuildResult<()> {
        let path = folder.join(format!("{app}-templates.js"));
        let config = json!({ "paths": paths, "baseUrl": base_url });
        let body = serde_json::to_string_pretty(&config).map_err(|e| Self::fail(&path, e))?;
        fs::write(&path, format!("require.config({body});\n"))
            .map_err(|e| BuildError::io(ResourceKind::Templates, &path, e))
    }
}

impl ResourceCompiler for TemplatesCompiler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Templates
    }

    fn compile(&self, ctx: &CompilationContext, selection: &Selection) -> BuildResult<()> {
        let folder = ctx.local_server_path()?.join(TEMPLATES_FOLDER);
        let processed = folder.join(PROCESSED_FOLDER);
        fs::create_dir_all(&processed).map_err(|e| BuildError::io(ResourceKind::Templates, &processed, e))?;
        self.write_libs(&folder)?;

        let theme_path = with_trailing_slash(&ctx.theme.extension.assets_url());
        let selected: Vec<&Template> =
            ctx.templates().iter().filter(|t| selection.includes(&t.resource.src)).collect();
        run_parallel(&selected, |t| self.process(t, &processed, &theme_path))?;

        let base_url = format!(
            "{}/{TEMPLATES_FOLDER}/{PROCESSED_FOLDER}",
            ctx.server_url.as_str().trim_end_matches('/')
        );
        let apps: Vec<(String, BTreeMap<String, String>)> = self
            .entrypoints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(app, paths)| (app.clone(), paths.clone()))
            .collect();
        run_parallel(&apps, |(app, paths)| self.write_entrypoint(&folder, &base_url, app, paths))
    }
}
