use crate::app::models::{FileEntry, ScanSettings};
use anyhow::{bail, Context, Result};
use ignore::WalkBuilder;
use pathdiff::diff_paths;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Kernel-provided trees that are never part of the image content.
const PSEUDO_FS: &[&str] = &["/proc", "/sys", "/dev", "/run"];

const MAX_LINK_HOPS: usize = 40;

/// Result of resolving a path inside the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Every symlink traversed on the way, in order.
    pub links: Vec<PathBuf>,
    /// The final, symlink-free path.
    pub path: PathBuf,
    pub exists: bool,
}

/// A root filesystem tree on the host, addressed with image paths.
pub struct RootFs {
    root: PathBuf,
    skipped: Vec<PathBuf>,
}

impl RootFs {
    pub fn new(root: PathBuf, settings: &ScanSettings) -> Result<Self> {
        let meta = fs::metadata(&root).with_context(|| format!("Cannot access root {:?}", root))?;
        if !meta.is_dir() {
            bail!("Root {:?} is not a directory", root);
        }

        let mut skipped: Vec<PathBuf> = PSEUDO_FS.iter().map(PathBuf::from).collect();
        if settings.keep_tmp {
            skipped.push(PathBuf::from("/tmp"));
        }

        Ok(Self { root, skipped })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn host_path(&self, image: &Path) -> PathBuf {
        self.root.join(image.strip_prefix("/").unwrap_or(image))
    }

    pub fn image_path(&self, host: &Path) -> Option<PathBuf> {
        let relative = diff_paths(host, &self.root)?;
        if relative.components().any(|c| c == Component::ParentDir) {
            return None;
        }
        Some(Path::new("/").join(relative))
    }

    /// Directories excluded from walking, as image paths.
    pub fn is_skipped(&self, image: &Path) -> bool {
        self.skipped.iter().any(|s| image.starts_with(s))
    }

    pub fn exists(&self, image: &Path) -> bool {
        fs::symlink_metadata(self.host_path(image)).is_ok()
    }

    pub fn is_locked(&self, lockfile: &Path) -> bool {
        self.exists(lockfile)
    }

    /// List every entry in the image, sorted by path.
    pub fn walk(&self) -> Vec<FileEntry> {
        let mut entries = Vec::new();

        let root = self.root.clone();
        let skipped: Vec<PathBuf> = self.skipped.iter().map(|s| self.host_path(s)).collect();

        let walker = WalkBuilder::new(&root)
            .standard_filters(false)
            .hidden(false)
            .follow_links(false)
            .filter_entry(move |e| !skipped.iter().any(|s| e.path() == s))
            .build();

        for result in walker {
            match result {
                Ok(entry) => {
                    if let Some(processed) = self.process_entry(entry.path()) {
                        entries.push(processed);
                    }
                }
                Err(err) => log::warn!("Error walking entry: {}", err),
            }
        }

        entries.sort_by(|a, b| a.image_path.cmp(&b.image_path));
        entries
    }

    fn process_entry(&self, path: &Path) -> Option<FileEntry> {
        if path == self.root {
            return None;
        }

        let image_path = self.image_path(path)?;
        let meta = match fs::symlink_metadata(path) {
            Ok(m) => m,
            Err(err) => {
                log::warn!("Cannot stat {:?}: {}", path, err);
                return None;
            }
        };

        let is_symlink = meta.file_type().is_symlink();
        let link_target = if is_symlink {
            fs::read_link(path).ok()
        } else {
            None
        };

        Some(FileEntry {
            path: path.to_path_buf(),
            image_path,
            is_dir: meta.is_dir(),
            is_symlink,
            link_target,
            size: meta.len(),
        })
    }

    /// Resolve an image path component by component, following symlinks
    /// without ever leaving the image root.
    pub fn resolve(&self, image: &Path) -> Result<Resolution> {
        let mut pending: VecDeque<OsString> = components_of(image).into();
        let mut current = PathBuf::from("/");
        let mut links = Vec::new();
        let mut exists = true;
        let mut hops = 0;

        while let Some(name) = pending.pop_front() {
            if name == ".." {
                current.pop();
                continue;
            }

            let candidate = current.join(&name);
            if !exists {
                current = candidate;
                continue;
            }

            let host = self.host_path(&candidate);
            match fs::symlink_metadata(&host) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    hops += 1;
                    if hops > MAX_LINK_HOPS {
                        bail!("Too many levels of symbolic links resolving {:?}", image);
                    }

                    let target = fs::read_link(&host)
                        .with_context(|| format!("Failed to read link {:?}", host))?;
                    links.push(candidate);

                    if target.is_absolute() {
                        current = PathBuf::from("/");
                    }
                    for part in components_of(&target).into_iter().rev() {
                        pending.push_front(part);
                    }
                }
                Ok(_) => current = candidate,
                Err(_) => {
                    exists = false;
                    current = candidate;
                }
            }
        }

        Ok(Resolution {
            links,
            path: current,
            exists,
        })
    }
}

/// Normal and parent components only; root and `.` are dropped.
fn components_of(path: &Path) -> Vec<OsString> {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(n) => Some(n.to_os_string()),
            Component::ParentDir => Some(OsString::from("..")),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::tempdir;

    fn touch(root: &Path, image: &str) {
        let p = root.join(image.trim_start_matches('/'));
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, b"data").unwrap();
    }

    #[test]
    fn maps_between_host_and_image() {
        let tmp = tempdir().unwrap();
        let rootfs = RootFs::new(tmp.path().to_path_buf(), &ScanSettings::default()).unwrap();

        let host = rootfs.host_path(Path::new("/usr/bin/env"));
        assert_eq!(host, tmp.path().join("usr/bin/env"));
        assert_eq!(rootfs.image_path(&host), Some(PathBuf::from("/usr/bin/env")));
        assert_eq!(rootfs.image_path(Path::new("/somewhere/else")), None);
    }

    #[test]
    fn walk_skips_pseudo_filesystems() {
        let tmp = tempdir().unwrap();
        touch(tmp.path(), "/usr/bin/env");
        touch(tmp.path(), "/proc/1/status");
        touch(tmp.path(), "/tmp/scratch");
        touch(tmp.path(), "/.hidden");

        let rootfs = RootFs::new(tmp.path().to_path_buf(), &ScanSettings::default()).unwrap();
        let paths: Vec<PathBuf> = rootfs.walk().into_iter().map(|e| e.image_path).collect();

        assert!(paths.contains(&PathBuf::from("/usr/bin/env")));
        assert!(paths.contains(&PathBuf::from("/usr/bin")));
        assert!(paths.contains(&PathBuf::from("/tmp/scratch")));
        assert!(paths.contains(&PathBuf::from("/.hidden")));
        assert!(!paths.iter().any(|p| p.starts_with("/proc")));

        let keep_tmp = ScanSettings {
            keep_tmp: true,
            ..ScanSettings::default()
        };
        let rootfs = RootFs::new(tmp.path().to_path_buf(), &keep_tmp).unwrap();
        assert!(!rootfs.walk().iter().any(|e| e.image_path.starts_with("/tmp")));
    }

    #[test]
    fn walk_records_symlinks_without_following() {
        let tmp = tempdir().unwrap();
        touch(tmp.path(), "/usr/lib/libz.so.1.3");
        symlink("libz.so.1.3", tmp.path().join("usr/lib/libz.so.1")).unwrap();

        let rootfs = RootFs::new(tmp.path().to_path_buf(), &ScanSettings::default()).unwrap();
        let entries = rootfs.walk();
        let link = entries
            .iter()
            .find(|e| e.image_path == Path::new("/usr/lib/libz.so.1"))
            .unwrap();

        assert!(link.is_symlink);
        assert!(!link.is_dir);
        assert_eq!(link.link_target, Some(PathBuf::from("libz.so.1.3")));
        assert_eq!(link.size, "libz.so.1.3".len() as u64);
    }

    #[test]
    fn resolves_through_directory_links() {
        let tmp = tempdir().unwrap();
        touch(tmp.path(), "/usr/lib/ld-linux.so.2");
        symlink("usr/lib", tmp.path().join("lib")).unwrap();
        symlink("/lib/ld-linux.so.2", tmp.path().join("usr/lib/ld.so")).unwrap();

        let rootfs = RootFs::new(tmp.path().to_path_buf(), &ScanSettings::default()).unwrap();
        let res = rootfs.resolve(Path::new("/usr/lib/ld.so")).unwrap();

        assert!(res.exists);
        assert_eq!(res.path, PathBuf::from("/usr/lib/ld-linux.so.2"));
        assert_eq!(
            res.links,
            vec![PathBuf::from("/usr/lib/ld.so"), PathBuf::from("/lib")]
        );
    }

    #[test]
    fn resolution_stays_inside_root() {
        let tmp = tempdir().unwrap();
        touch(tmp.path(), "/etc/passwd");
        symlink("../../../../etc/passwd", tmp.path().join("escape")).unwrap();

        let rootfs = RootFs::new(tmp.path().to_path_buf(), &ScanSettings::default()).unwrap();
        let res = rootfs.resolve(Path::new("/escape")).unwrap();
        assert_eq!(res.path, PathBuf::from("/etc/passwd"));
        assert!(res.exists);
    }

    #[test]
    fn detects_link_loops_and_missing_paths() {
        let tmp = tempdir().unwrap();
        symlink("b", tmp.path().join("a")).unwrap();
        symlink("a", tmp.path().join("b")).unwrap();

        let rootfs = RootFs::new(tmp.path().to_path_buf(), &ScanSettings::default()).unwrap();
        assert!(rootfs.resolve(Path::new("/a")).is_err());

        let res = rootfs.resolve(Path::new("/no/such/file")).unwrap();
        assert!(!res.exists);
        assert_eq!(res.path, PathBuf::from("/no/such/file"));
    }
}
