//! Inode management for the FUSE layer.
//!
//! The remote side is addressed by path while the kernel speaks inode
//! numbers, so this keeps a bidirectional mapping between the two.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Reserved inode for the root directory.
pub const ROOT_INO: u64 = 1;

#[derive(Debug)]
struct Maps {
    path_to_ino: HashMap<String, u64>,
    ino_to_path: HashMap<u64, String>,
    next_ino: u64,
}

/// Inode table managing path-to-inode and inode-to-path mappings.
#[derive(Debug)]
pub struct InodeTable {
    maps: RwLock<Maps>,
}

impl InodeTable {
    /// Create a new inode table with the root directory mapped.
    pub fn new() -> Self {
        let mut maps = Maps {
            path_to_ino: HashMap::new(),
            ino_to_path: HashMap::new(),
            next_ino: ROOT_INO + 1,
        };
        maps.path_to_ino.insert("/".to_string(), ROOT_INO);
        maps.ino_to_path.insert(ROOT_INO, "/".to_string());
        InodeTable {
            maps: RwLock::new(maps),
        }
    }

    /// Get or allocate the inode for a path.
    pub fn get_or_insert(&self, path: &str) -> u64 {
        let normalized = normalize_path(path);
        if let Some(&ino) = self.maps.read().path_to_ino.get(&normalized) {
            return ino;
        }

        let mut maps = self.maps.write();
        // Another thread may have inserted it between the two locks.
        if let Some(&ino) = maps.path_to_ino.get(&normalized) {
            return ino;
        }
        let ino = maps.next_ino;
        maps.next_ino += 1;
        maps.path_to_ino.insert(normalized.clone(), ino);
        maps.ino_to_path.insert(ino, normalized);
        ino
    }

    /// Get inode for a path (if mapped).
    pub fn get_ino(&self, path: &str) -> Option<u64> {
        self.maps.read().path_to_ino.get(&normalize_path(path)).copied()
    }

    /// Get path for an inode (if mapped).
    pub fn get_path(&self, ino: u64) -> Option<String> {
        self.maps.read().ino_to_path.get(&ino).cloned()
    }

    /// Drop the mapping for a removed path. The root is never removed.
    pub fn remove_path(&self, path: &str) {
        let normalized = normalize_path(path);
        if normalized == "/" {
            return;
        }
        let mut maps = self.maps.write();
        if let Some(ino) = maps.path_to_ino.remove(&normalized) {
            maps.ino_to_path.remove(&ino);
        }
    }

    /// Move `from` and everything beneath it to `to`, keeping inode numbers.
    /// Whatever was mapped at `to` is dropped.
    pub fn rename(&self, from: &str, to: &str) {
        let from = normalize_path(from);
        let to = normalize_path(to);
        if from == to || from == "/" {
            return;
        }

        let mut maps = self.maps.write();
        let replaced: Vec<String> = maps
            .path_to_ino
            .keys()
            .filter(|p| is_within(p, &to))
            .cloned()
            .collect();
        for path in replaced {
            if let Some(ino) = maps.path_to_ino.remove(&path) {
                maps.ino_to_path.remove(&ino);
            }
        }

        let moved: Vec<(String, u64)> = maps
            .path_to_ino
            .iter()
            .filter(|(p, _)| is_within(p, &from))
            .map(|(p, &ino)| (p.clone(), ino))
            .collect();
        for (old_path, ino) in moved {
            let new_path = format!("{}{}", to, &old_path[from.len()..]);
            maps.path_to_ino.remove(&old_path);
            maps.path_to_ino.insert(new_path.clone(), ino);
            maps.ino_to_path.insert(ino, new_path);
        }
    }

    /// Resolve a child path from parent inode and name.
    pub fn resolve_child(&self, parent_ino: u64, name: &str) -> Option<String> {
        let parent_path = self.get_path(parent_ino)?;
        Some(child_path(&parent_path, name))
    }

    /// Number of mapped inodes, root included.
    pub fn len(&self) -> usize {
        self.maps.read().ino_to_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Join a parent directory path and an entry name.
pub fn child_path(parent_path: &str, name: &str) -> String {
    if parent_path == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent_path, name)
    }
}

/// Parent directory of a normalized path.
pub fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// True if `path` is `dir` or lies beneath it.
fn is_within(path: &str, dir: &str) -> bool {
    path == dir || (path.starts_with(dir) && path.as_bytes().get(dir.len()) == Some(&b'/'))
}

/// Normalize a path for consistent lookup.
fn normalize_path(path: &str) -> String {
    let mut normalized = path.to_string();

    // Ensure leading slash
    if !normalized.starts_with('/') {
        normalized = format!("/{}", normalized);
    }

    // Remove trailing slash (except for root)
    while normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }

    normalized
}
