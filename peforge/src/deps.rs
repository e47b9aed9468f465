//! Recursive DLL dependency analysis.
//!
//! Walks the import tables of an executable and of every dependency it can
//! locate next to it, up to a depth limit. Well-known Windows system DLLs
//! (and the `api-ms-win-*` / `ext-ms-win-*` API-set names) are reported but
//! not recursed into - they resolve from the system, not from the
//! application directory.

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    path::{Path, PathBuf},
};

use serde::Serialize;

use crate::{analysis::Reader, Result};

/// Well-known system DLLs that are not resolved from the application
/// directory.
const SYSTEM_DLLS: &[&str] = &[
    "advapi32.dll",
    "bcrypt.dll",
    "cfgmgr32.dll",
    "comctl32.dll",
    "comdlg32.dll",
    "crypt32.dll",
    "dbghelp.dll",
    "dwmapi.dll",
    "gdi32.dll",
    "imagehlp.dll",
    "imm32.dll",
    "iphlpapi.dll",
    "kernel32.dll",
    "msimg32.dll",
    "msvcrt.dll",
    "netapi32.dll",
    "ntdll.dll",
    "ole32.dll",
    "oleaut32.dll",
    "powrprof.dll",
    "psapi.dll",
    "rpcrt4.dll",
    "secur32.dll",
    "setupapi.dll",
    "shell32.dll",
    "shlwapi.dll",
    "user32.dll",
    "userenv.dll",
    "uxtheme.dll",
    "version.dll",
    "wininet.dll",
    "winspool.drv",
    "wintrust.dll",
    "ws2_32.dll",
];

fn is_system_dll(name: &str) -> bool {
    let lower = name.to_lowercase();
    SYSTEM_DLLS.contains(&lower.as_str())
        || lower.starts_with("api-ms-win-")
        || lower.starts_with("ext-ms-win-")
}

/// A node in the dependency tree.
#[derive(Debug, Clone, Serialize)]
pub struct DependencyNode {
    /// DLL or executable name
    pub name: String,
    /// Resolved path, `None` for system DLLs and missing files
    pub path: Option<PathBuf>,
    /// Whether the dependency resolved at all
    pub found: bool,
    /// Resolved from the system rather than the application directory
    pub system: bool,
    /// Depth in the tree, 0 for the root
    pub depth: usize,
    /// Dependencies of this node
    pub children: Vec<DependencyNode>,
}

/// The complete dependency analysis result.
#[derive(Debug, Clone, Serialize)]
pub struct DependencyAnalysis {
    /// The root executable
    pub root: DependencyNode,
    /// Every unique dependency seen; `None` paths are system DLLs
    pub resolved: BTreeMap<String, Option<PathBuf>>,
    /// Dependencies that could not be located
    pub missing: Vec<String>,
    /// Deepest level reached
    pub max_depth: usize,
    /// Whether a dependency cycle was encountered
    pub has_cycles: bool,
}

impl DependencyAnalysis {
    /// Number of unique dependencies (excluding the root).
    #[must_use]
    pub fn total_count(&self) -> usize {
        self.resolved.len()
    }
}

struct Walker {
    resolved: BTreeMap<String, Option<PathBuf>>,
    missing: BTreeSet<String>,
    max_depth_seen: usize,
    has_cycles: bool,
    depth_limit: usize,
}

impl Walker {
    fn walk(
        &mut self,
        path: &Path,
        depth: usize,
        visited: &mut HashSet<String>,
    ) -> Result<DependencyNode> {
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        let normalized = name.to_lowercase();

        if visited.contains(&normalized) {
            self.has_cycles = true;
            return Ok(DependencyNode {
                name,
                path: Some(path.to_path_buf()),
                found: true,
                system: false,
                depth,
                children: Vec::new(),
            });
        }

        visited.insert(normalized.clone());
        self.max_depth_seen = self.max_depth_seen.max(depth);

        let mut node = DependencyNode {
            name,
            path: Some(path.to_path_buf()),
            found: true,
            system: false,
            depth,
            children: Vec::new(),
        };

        let imports = match Reader::open(path).and_then(|reader| reader.imports()) {
            Ok(imports) => imports,
            Err(error) => {
                // A dependency that exists but does not decode still counts
                // as resolved; it just contributes no children.
                log::warn!("skipping imports of {}: {}", path.display(), error);
                visited.remove(&normalized);
                return Ok(node);
            }
        };

        let directory = path.parent().unwrap_or(Path::new("."));

        for import in imports {
            let child_name = import.dll;
            let child_normalized = child_name.to_lowercase();
            log::debug!("resolving {child_name} at depth {depth}");

            if is_system_dll(&child_name) {
                self.resolved.entry(child_normalized).or_insert(None);
                node.children.push(DependencyNode {
                    name: child_name,
                    path: None,
                    found: true,
                    system: true,
                    depth: depth + 1,
                    children: Vec::new(),
                });
                continue;
            }

            let candidate = directory.join(&child_name);
            if candidate.is_file() {
                self.resolved
                    .entry(child_normalized)
                    .or_insert_with(|| Some(candidate.clone()));

                if depth + 1 < self.depth_limit {
                    node.children.push(self.walk(&candidate, depth + 1, visited)?);
                } else {
                    node.children.push(DependencyNode {
                        name: child_name,
                        path: Some(candidate),
                        found: true,
                        system: false,
                        depth: depth + 1,
                        children: Vec::new(),
                    });
                }
            } else {
                self.missing.insert(child_normalized);
                node.children.push(DependencyNode {
                    name: child_name,
                    path: None,
                    found: false,
                    system: false,
                    depth: depth + 1,
                    children: Vec::new(),
                });
            }
        }

        // Unmark on the way out so diamond-shaped dependency graphs are not
        // misreported as cycles.
        visited.remove(&normalized);

        Ok(node)
    }
}

/// Analyze the dependency tree of the PE file at `path`, descending at most
/// `max_depth` levels.
///
/// # Errors
/// Returns an open or parse error for the root file; unreadable
/// dependencies further down degrade to leaf nodes instead.
pub fn analyze_dependencies(path: &Path, max_depth: usize) -> Result<DependencyAnalysis> {
    // The root must parse; its absence is the caller's error.
    Reader::open(path)?;

    let mut walker = Walker {
        resolved: BTreeMap::new(),
        missing: BTreeSet::new(),
        max_depth_seen: 0,
        has_cycles: false,
        depth_limit: max_depth.max(1),
    };

    let mut visited = HashSet::new();
    let root = walker.walk(path, 0, &mut visited)?;

    Ok(DependencyAnalysis {
        root,
        resolved: walker.resolved,
        missing: walker.missing.into_iter().collect(),
        max_depth: walker.max_depth_seen,
        has_cycles: walker.has_cycles,
    })
}
