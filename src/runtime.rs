//! 内置运行时脚本（模块加载器、模板辅助函数、define 补丁）

use include_dir::{include_dir, Dir};

static RUNTIME_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/runtime");

pub(crate) const MODULE_LOADER: &str = "require.js";
pub(crate) const DEFINE_PATCH: &str = "define_patch.js";
/// 每个模板包都依赖的两个辅助脚本，按此顺序拼接
pub(crate) const TEMPLATE_HELPERS: [&str; 2] = ["LoadTemplateSafe.js", "Handlebars.CompilerNameLookup.js"];

pub(crate) fn script(name: &str) -> Option<&'static str> {
    RUNTIME_DIR.get_file(name).and_then(|f| f.contents_utf8())
}
