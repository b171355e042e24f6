//! 通用辅助函数：
//! - 环境变量读取与解析
//! - 相对路径处理（统一使用 `/` 分隔）
//! - 并行执行任务并汇总首个错误

use std::{
    env,
    path::{Path, PathBuf},
    thread,
};

use walkdir::WalkDir;

/// 将字符串转为安全子路径（过滤 `.` / `..` 等危险片段）。
pub(crate) fn safe_subpath(s: &str) -> Option<PathBuf> {
    let mut p = PathBuf::new();
    for seg in s.split('/') {
        let t = seg.trim();
        if t.is_empty() || t == "." || t == ".." { continue; }
        p.push(t);
    }
    if p.components().next().is_none() { None } else { Some(p) }
}

/// 可选读取 PATH 环境变量为 PathBuf。
pub(crate) fn env_opt_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

/// 可选读取 String 环境变量。
pub(crate) fn env_opt_string(key: &str) -> Option<String> {
    env::var(key).ok().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// 可选读取 u16 环境变量（端口）。
pub(crate) fn env_opt_u16(key: &str) -> Option<u16> {
    env::var(key).ok().and_then(|s| s.trim().parse::<u16>().ok())
}

/// 读取布尔环境变量的真值（1/true/on/yes/y）。
pub(crate) fn env_bool_truthy(key: &str) -> Option<bool> {
    env::var(key).ok().map(|v| {
        matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "on" | "yes" | "y")
    })
}

/// 逗号分隔列表，去空白、去空项
pub(crate) fn split_list(s: &str) -> Vec<String> {
    s.split(',').map(|x| x.trim().to_string()).filter(|x| !x.is_empty()).collect()
}

/// 规范化相对路径：`\` 转 `/`，去掉空段与 `.`，处理 `..`
pub(crate) fn normalize_rel(p: &str) -> String {
    let mut segs: Vec<&str> = Vec::new();
    for seg in p.split(['/', '\\']) {
        match seg {
            "" | "." => {}
            ".." => { segs.pop(); }
            s => segs.push(s),
        }
    }
    segs.join("/")
}

pub(crate) fn forward_slashes(p: &Path) -> String {
    p.to_string_lossy().replace('\\', "/")
}

pub(crate) fn join_rel(base: &Path, rel: &str) -> PathBuf {
    let mut p = base.to_path_buf();
    for seg in rel.split('/').filter(|s| !s.is_empty()) {
        p.push(seg);
    }
    p
}

pub(crate) fn file_name_of(rel: &str) -> &str {
    rel.rsplit('/').next().unwrap_or(rel)
}

/// 去掉最后一个扩展名
pub(crate) fn file_stem_of(rel: &str) -> &str {
    let name = file_name_of(rel);
    match name.rfind('.') {
        Some(i) if i > 0 => &name[..i],
        _ => name,
    }
}

pub(crate) fn extension_of(path: &Path) -> String {
    path.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase()
}

/// 在 `root` 下递归查找以 `rel` 结尾的文件（按文件名排序，取第一个）
pub(crate) fn find_under(root: &Path, rel: &str) -> Option<PathBuf> {
    let suffix = PathBuf::from(normalize_rel(rel));
    if suffix.as_os_str().is_empty() {
        return None;
    }
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| e.file_type().is_file() && e.path().ends_with(&suffix))
        .map(|e| e.into_path())
}

/// 分块并行执行任务；全部结束后返回第一个错误
pub(crate) fn run_parallel<T, E, F>(items: &[T], task: F) -> Result<(), E>
where
    T: Sync,
    E: Send,
    F: Fn(&T) -> Result<(), E> + Sync,
{
    if items.is_empty() {
        return Ok(());
    }
    let total = items.len();
    let workers = thread::available_parallelism().map(|n| n.get()).unwrap_or(4).min(total);
    let chunk_size = (total + workers - 1) / workers; // 向上取整
    thread::scope(|s| {
        let task = &task;
        let handles: Vec<_> = items
            .chunks(chunk_size)
            .map(|chunk| s.spawn(move || chunk.iter().try_for_each(task)))
            .collect();
        let mut first_err = None;
        for h in handles {
            match h.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
        first_err.map_or(Ok(()), Err)
    })
}
