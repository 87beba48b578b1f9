//! Minimal per-layer file tree. Diffing and squashing happen elsewhere; this
//! type only records what a single layer archive contains.

use std::collections::HashMap;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
    Symlink { target: String },
    Hardlink { target: String },
    Other,
}

/// Metadata taken from one tar header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub path: PathBuf,
    pub size: u64,
    pub kind: FileKind,
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
}

impl FileInfo {
    pub fn from_entry<R: Read>(entry: &tar::Entry<'_, R>) -> io::Result<Self> {
        let header = entry.header();
        let link_target = || -> io::Result<String> {
            Ok(entry
                .link_name()?
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default())
        };
        let kind = match header.entry_type() {
            tar::EntryType::Regular | tar::EntryType::Continuous => FileKind::File,
            tar::EntryType::Directory => FileKind::Directory,
            tar::EntryType::Symlink => FileKind::Symlink {
                target: link_target()?,
            },
            tar::EntryType::Link => FileKind::Hardlink {
                target: link_target()?,
            },
            _ => FileKind::Other,
        };

        Ok(Self {
            path: entry.path()?.into_owned(),
            size: entry.size(),
            kind,
            mode: header.mode().unwrap_or(0),
            uid: header.uid().unwrap_or(0),
            gid: header.gid().unwrap_or(0),
        })
    }
}

#[derive(Debug)]
pub struct TreeNode {
    name: String,
    info: Option<FileInfo>,
    children: HashMap<String, TreeNode>,
}

impl TreeNode {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            info: None,
            children: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Metadata of the entry, `None` for directories implied by a deeper path.
    pub fn info(&self) -> Option<&FileInfo> {
        self.info.as_ref()
    }

    pub fn children(&self) -> impl Iterator<Item = &TreeNode> {
        self.children.values()
    }

    fn print(&self, depth: usize, max_depth: usize, is_last: bool, prefix: &str) {
        if depth > max_depth {
            return;
        }

        let new_prefix = if depth == 0 {
            println!("{}", &self.name);
            prefix.to_string()
        } else {
            let connector = if is_last { "└── " } else { "├── " };
            let size = match &self.info {
                Some(FileInfo {
                    kind: FileKind::File,
                    size,
                    ..
                }) => format!(" ({size} B)"),
                _ => String::new(),
            };
            println!("{prefix}{connector}{}{size}", &self.name);
            format!("{}{}", prefix, if is_last { "    " } else { "│   " })
        };

        let mut sorted_children: Vec<&TreeNode> = self.children.values().collect();
        sorted_children.sort_by(|a, b| a.name.cmp(&b.name));
        let total = sorted_children.len();
        for (index, child) in sorted_children.iter().enumerate() {
            child.print(depth + 1, max_depth, index == total - 1, &new_prefix);
        }
    }
}

#[derive(Debug)]
pub struct FileTree {
    name: String,
    root: TreeNode,
    file_size: u64,
    entry_count: usize,
}

impl FileTree {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            root: TreeNode::new("/"),
            file_size: 0,
            entry_count: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sum of the declared sizes of every inserted entry.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    pub fn root(&self) -> &TreeNode {
        &self.root
    }

    /// Insert `info` at `path`, creating intermediate directories. Re-adding a
    /// path replaces its metadata; the size is counted for every insertion.
    pub fn add_path<P: AsRef<Path>>(&mut self, path: P, info: FileInfo) {
        let components = normalize(path.as_ref());
        self.file_size += info.size;
        self.entry_count += 1;

        if components.is_empty() {
            return;
        }

        let mut current = &mut self.root;
        for component in components {
            current = current
                .children
                .entry(component.clone())
                .or_insert_with(|| TreeNode::new(&component));
        }
        current.info = Some(info);
    }

    pub fn find(&self, path: &str) -> Option<&TreeNode> {
        let mut current = &self.root;
        for component in normalize(Path::new(path)) {
            current = current.children.get(&component)?;
        }
        Some(current)
    }

    pub fn print(&self, max_depth: usize) {
        self.root.print(0, max_depth, true, "");
    }
}

fn normalize(path: &Path) -> Vec<String> {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect()
}
