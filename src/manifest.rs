//! 清单解析模块：
//! - 在目录下递归查找清单文件并解析 XML 为有序节点树
//! - 空标签解析为 `Null`，文本去除首尾空白，重复的同名兄弟节点折叠为列表
//! - 提供文件引用、文件列表与按应用分组的资源遍历工具

use std::{
    fs,
    path::{Path, PathBuf},
};

use quick_xml::{events::Event, Reader};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{BuildError, BuildResult};

/// XML 解析结果。`Map` 保留元素出现顺序。
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum XmlNode {
    Null,
    Text(String),
    Map(Vec<(String, XmlNode)>),
    List(Vec<XmlNode>),
}

impl XmlNode {
    pub(crate) fn get(&self, key: &str) -> Option<&XmlNode> {
        match self {
            XmlNode::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// 逐级取子节点，例如 `["templates", "application"]`
    pub(crate) fn path(&self, keys: &[&str]) -> Option<&XmlNode> {
        keys.iter().try_fold(self, |node, key| node.get(key))
    }

    pub(crate) fn as_text(&self) -> Option<&str> {
        match self {
            XmlNode::Text(s) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn entries(&self) -> &[(String, XmlNode)] {
        match self {
            XmlNode::Map(entries) => entries,
            _ => &[],
        }
    }

    /// 单个或列表统一视为列表；`Null` 视为空列表
    pub(crate) fn items(&self) -> Vec<&XmlNode> {
        match self {
            XmlNode::Null => Vec::new(),
            XmlNode::List(items) => items.iter().collect(),
            other => vec![other],
        }
    }

    fn insert(entries: &mut Vec<(String, XmlNode)>, key: String, value: XmlNode) {
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, XmlNode::List(items))) => items.push(value),
            Some((_, existing)) => {
                let first = std::mem::replace(existing, XmlNode::Null);
                *existing = XmlNode::List(vec![first, value]);
            }
            None => entries.push((key, value)),
        }
    }
}

/// 在 `base_dir` 下查找名为 `file_name` 的清单并解析。
/// 多个同名文件时取遍历顺序（按文件名排序）中的第一个。
pub(crate) fn parse(base_dir: &Path, file_name: &str) -> BuildResult<XmlNode> {
    let path = find_file(base_dir, file_name)?;
    parse_file(&path)
}

pub(crate) fn parse_file(path: &Path) -> BuildResult<XmlNode> {
    let text = fs::read_to_string(path).map_err(|e| BuildError::InvalidManifest {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    parse_str(&text).map_err(|message| BuildError::InvalidManifest {
        path: path.to_path_buf(),
        message,
    })
}

pub(crate) fn find_file(base_dir: &Path, file_name: &str) -> BuildResult<PathBuf> {
    let matches: Vec<PathBuf> = WalkDir::new(base_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.file_name().to_str() == Some(file_name))
        .map(|e| e.into_path())
        .collect();
    match matches.as_slice() {
        [] => Err(BuildError::ResourceNotFound {
            name: file_name.to_string(),
            dir: base_dir.to_path_buf(),
        }),
        [only] => Ok(only.clone()),
        [first, ..] => {
            warn!(
                "找到 {} 个 {}，使用第一个: {}",
                matches.len(),
                file_name,
                first.display()
            );
            Ok(first.clone())
        }
    }
}

struct Frame {
    name: String,
    children: Vec<(String, XmlNode)>,
    text: String,
}

impl Frame {
    fn new(name: String) -> Self {
        Frame { name, children: Vec::new(), text: String::new() }
    }

    fn finish(self) -> (String, XmlNode) {
        let node = if !self.children.is_empty() {
            XmlNode::Map(self.children)
        } else {
            match self.text.trim() {
                "" => XmlNode::Null,
                t => XmlNode::Text(t.to_string()),
            }
        };
        (self.name, node)
    }
}

/// 解析 XML 文本，根元素作为结果 `Map` 的唯一键
pub(crate) fn parse_str(text: &str) -> Result<XmlNode, String> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Frame> = Vec::new();
    let mut root: Vec<(String, XmlNode)> = Vec::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| format!("位置 {}: {}", reader.buffer_position(), e))?;
        match event {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                stack.push(Frame::new(name));
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match stack.last_mut() {
                    Some(parent) => XmlNode::insert(&mut parent.children, name, XmlNode::Null),
                    None => XmlNode::insert(&mut root, name, XmlNode::Null),
                }
            }
            Event::Text(t) => {
                if let Some(frame) = stack.last_mut() {
                    let s = t.unescape().map_err(|e| e.to_string())?;
                    frame.text.push_str(&s);
                }
            }
            Event::CData(c) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::End(_) => {
                let frame = stack.pop().ok_or_else(|| "多余的结束标签".to_string())?;
                let (name, node) = frame.finish();
                match stack.last_mut() {
                    Some(parent) => XmlNode::insert(&mut parent.children, name, node),
                    None => XmlNode::insert(&mut root, name, node),
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    if let Some(open) = stack.last() {
        return Err(format!("标签未闭合: <{}>", open.name));
    }
    if root.is_empty() {
        return Err("缺少根元素".to_string());
    }
    Ok(XmlNode::Map(root))
}

/// 文件引用可能是纯文本或带 `filename` 的对象；去掉一层 `[...]`。
/// 方括号表示“文件可缺失”，此语义在这里被丢弃。
pub(crate) fn parse_file_name(entry: &XmlNode) -> Option<String> {
    let raw = match entry {
        XmlNode::Text(s) => s.as_str(),
        other => other.get("filename")?.as_text()?,
    };
    let name = raw
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(raw);
    Some(name.to_string())
}

pub(crate) fn parse_files(container: &XmlNode) -> Vec<String> {
    parse_files_with(container, |f| f)
}

/// `files.file` 统一为列表，逐个经过 `parse_file_name` 与 `transform`
pub(crate) fn parse_files_with<F>(container: &XmlNode, transform: F) -> Vec<String>
where
    F: Fn(String) -> String,
{
    container
        .path(&["files", "file"])
        .map(|files| files.items())
        .unwrap_or_default()
        .into_iter()
        .filter_map(parse_file_name)
        .map(transform)
        .collect()
}

/// 按键（应用 id 或资源类型）遍历资源声明，值为单个文件引用或文件容器
pub(crate) fn iterate_resources<F>(resources: &XmlNode, mut callback: F)
where
    F: FnMut(String, &str),
{
    for (key, value) in resources.entries() {
        for item in value.items() {
            match item {
                XmlNode::Text(_) => {
                    if let Some(path) = parse_file_name(item) {
                        callback(path, key);
                    }
                }
                container => {
                    for path in parse_files(container) {
                        callback(path, key);
                    }
                }
            }
        }
        debug!("已遍历资源声明: {}", key);
    }
}
