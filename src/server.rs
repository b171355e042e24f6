//! 本地预览服务：
//! - 以输出目录为根提供静态文件（允许跨域）
//! - `/who/<app>`：某个应用需要加载的文件列表（JSON）
//! - `/define_patch.js`：忽略空模板 define 的加载器补丁

use std::{fs, path::Path, sync::Arc};

use anyhow::Result;
use serde_json::{json, Value};
use tiny_http::{Header, Method, Request, Response};
use tracing::debug;

use crate::{compile::Compiler, runtime, utils::safe_subpath};

const WHO_PREFIX: &str = "/who/";

/// 阻塞运行，直到进程退出
pub(crate) fn serve(compiler: Arc<Compiler>, addr: &str) -> Result<()> {
    let server = tiny_http::Server::http(addr).map_err(|e| anyhow::anyhow!("绑定地址失败: {}: {}", addr, e))?;
    let ctx = compiler.context();
    println!("🚀 访问: {}", ctx.server_url.as_str().trim_end_matches('/'));
    println!("📂 输出目录: {}", ctx.output_root().display());
    println!("⏹  按 Ctrl+C 停止");

    for rq in server.incoming_requests() {
        let origin = rq
            .headers()
            .iter()
            .find(|h| h.field.equiv("Origin"))
            .map(|h| h.value.as_str().to_string());
        debug!("{} {}", rq.method(), rq.url());
        let resp = route(&compiler, &rq);
        let resp = with_cors(resp, origin.as_deref());
        let _ = rq.respond(resp);
    }
    Ok(())
}

fn route(compiler: &Compiler, rq: &Request) -> Response<std::io::Cursor<Vec<u8>>> {
    if *rq.method() == Method::Options {
        return Response::from_data(Vec::new()).with_status_code(204);
    }
    let path_only = rq.url().split('?').next().unwrap_or("/");

    if path_only == "/define_patch.js" {
        let body = runtime::script(runtime::DEFINE_PATCH).unwrap_or_default();
        return typed(Response::from_string(body), "application/javascript; charset=utf-8");
    }
    if let Some(app) = path_only.strip_prefix(WHO_PREFIX) {
        let app = app.trim_matches('/');
        return match who(compiler, app) {
            Some(v) => typed(Response::from_string(v.to_string()), "application/json; charset=utf-8"),
            None => typed(
                Response::from_string(json!({ "error": format!("unknown application: {app}") }).to_string()),
                "application/json; charset=utf-8",
            )
            .with_status_code(404),
        };
    }

    let root = compiler.context().output_root();
    let Some(rel) = safe_subpath(path_only) else {
        return not_found();
    };
    let fpath = root.join(rel);
    if !fpath.is_file() {
        return not_found();
    }
    match fs::read(&fpath) {
        Ok(bytes) => typed(Response::from_data(bytes), &content_type_for_path(&fpath)),
        Err(_) => not_found(),
    }
}

/// 某个应用加载的文件；未知应用返回 `None`
pub(crate) fn who(compiler: &Compiler, app: &str) -> Option<Value> {
    let ctx = compiler.context();
    if !ctx.applications().iter().any(|a| a == app) {
        return None;
    }
    let base = ctx.server_url.as_str().trim_end_matches('/');
    let url = |rel: &str| format!("{base}/{rel}");
    let processed: Vec<String> = ctx
        .templates()
        .iter()
        .filter(|t| t.resource.applications.contains(app))
        .map(|t| url(&format!("templates/processed-templates/{}", t.resource.dst)))
        .collect();
    let css: Vec<String> = ctx
        .sass_entrypoints()
        .contains_key(app)
        .then(|| url(&format!("css/{app}.css")))
        .into_iter()
        .collect();
    let javascript: Vec<String> = ctx
        .javascript_entrypoints()
        .contains_key(app)
        .then(|| url(&format!("javascript/{app}-javascript.js")))
        .into_iter()
        .collect();
    Some(json!({
        "application": app,
        "require": url(runtime::MODULE_LOADER),
        "define_patch": url(runtime::DEFINE_PATCH),
        "templates": [url("templates/javascript-libs.js"), url(&format!("templates/{app}-templates.js"))],
        "processed_templates": processed,
        "css": css,
        "javascript": javascript,
        "state": format!("{:?}", compiler.state()),
        "built_at": compiler.last_build().map(|t| t.to_rfc3339()),
    }))
}

fn header(name: &str, value: &str) -> Option<Header> {
    Header::from_bytes(name.as_bytes(), value.as_bytes()).ok()
}

fn typed<R: std::io::Read>(resp: Response<R>, content_type: &str) -> Response<R> {
    match header("Content-Type", content_type) {
        Some(h) => resp.with_header(h),
        None => resp,
    }
}

fn with_cors<R: std::io::Read>(mut resp: Response<R>, origin: Option<&str>) -> Response<R> {
    let origin = origin.unwrap_or("*");
    for (name, value) in [
        ("Access-Control-Allow-Origin", origin),
        ("Access-Control-Allow-Methods", "GET, HEAD, OPTIONS"),
        ("Access-Control-Allow-Headers", "*"),
        ("Vary", "Origin"),
    ] {
        if let Some(h) = header(name, value) {
            resp.add_header(h);
        }
    }
    resp
}

fn not_found() -> Response<std::io::Cursor<Vec<u8>>> {
    Response::from_string("Not Found").with_status_code(404)
}

fn content_type_for_path(p: &Path) -> String {
    match p.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase().as_str() {
        "html" => "text/html; charset=utf-8".into(),
        "css" => "text/css; charset=utf-8".into(),
        "js" => "application/javascript; charset=utf-8".into(),
        "map" | "json" => "application/json; charset=utf-8".into(),
        "txt" => "text/plain; charset=utf-8".into(),
        "svg" => "image/svg+xml".into(),
        "png" => "image/png".into(),
        "jpg" | "jpeg" => "image/jpeg".into(),
        "gif" => "image/gif".into(),
        "webp" => "image/webp".into(),
        "ico" => "image/x-icon".into(),
        "woff" => "font/woff".into(),
        "woff2" => "font/woff2".into(),
        "ttf" => "font/ttf".into(),
        "otf" => "font/otf".into(),
        "eot" => "application/vnd.ms-fontobject".into(),
        _ => "application/octet-stream".into(),
    }
}
