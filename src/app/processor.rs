use crate::app::filters::{CategoryFilter, DataFilter};
use crate::app::models::{FileEntry, Plan};
use crate::app::packages::PackageIndex;
use crate::app::profile::Profile;
use crate::app::scanner::RootFs;
use anyhow::{bail, Context, Result};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Main processing of a profile against an image.
pub struct TintProcessor {
    rootfs: RootFs,
    profile: Profile,
    lockfile: PathBuf,
}

impl TintProcessor {
    pub fn new(rootfs: RootFs, profile: Profile, lockfile: PathBuf) -> Self {
        Self {
            rootfs,
            profile,
            lockfile,
        }
    }

    /// Decide what stays in the image. Nothing is touched on disk.
    pub fn plan(&self) -> Result<Plan> {
        if self.rootfs.is_locked(&self.lockfile) {
            bail!(
                "This image seems already tinted ({:?} exists)",
                self.lockfile
            );
        }

        log::debug!("Scanning {:?}", self.rootfs.root());
        let entries: BTreeMap<PathBuf, FileEntry> = self
            .rootfs
            .walk()
            .into_iter()
            .map(|e| (e.image_path.clone(), e))
            .collect();

        let targets = self.target_paths()?;
        let mut paths: BTreeSet<PathBuf> = targets.iter().cloned().collect();

        log::debug!("Collecting package contents");
        let index = PackageIndex::new(self.rootfs.root());
        for name in self.profile.packages() {
            for owned in index.contents(name)? {
                // Listed paths may run through directory links (merged /usr).
                let res = match self.rootfs.resolve(&owned) {
                    Ok(res) if res.exists => res,
                    Ok(_) => continue,
                    Err(err) => {
                        log::warn!("Skipping {:?} of package \"{}\": {}", owned, name, err);
                        continue;
                    }
                };
                paths.extend(
                    res.links
                        .into_iter()
                        .chain(std::iter::once(res.path))
                        .filter(|p| entries.contains_key(p)),
                );
            }
        }

        log::debug!("Filtering data categories");
        CategoryFilter::new(&self.profile, targets.clone())?.filter(&mut paths);

        let keep = self.profile.keep_rules()?;
        if !keep.is_empty() {
            log::debug!("Applying keep rules");
            paths.extend(
                entries
                    .keys()
                    .filter(|p| keep.matches(p))
                    .cloned(),
            );
            self.keep_literal_paths(&mut paths, &entries);
        }

        let prune = self.profile.prune_rules()?;
        if !prune.is_empty() {
            log::debug!("Applying prune rules");
            paths.retain(|p| {
                if !prune.matches(p) {
                    return true;
                }
                if targets.contains(p) {
                    log::warn!("Prune rules match target {:?}, keeping it", p);
                    return true;
                }
                false
            });
        }

        self.close_links(&mut paths, &entries)?;

        let mut plan = Plan::default();
        for (path, entry) in entries {
            if entry.is_dir {
                continue;
            }
            if paths.contains(&path) {
                plan.kept.push(entry);
            } else {
                plan.removed.push(entry);
            }
        }

        Ok(plan)
    }

    /// Targets plus every symlink needed to reach them.
    fn target_paths(&self) -> Result<HashSet<PathBuf>> {
        let mut out = HashSet::new();
        for target in self.profile.targets() {
            let res = self.rootfs.resolve(target)?;
            if !res.exists {
                bail!("Target {:?} does not exist in the image", target);
            }
            log::debug!("Keeping target {:?} ({:?})", target, res.path);
            out.insert(target.clone());
            out.extend(res.links);
            out.insert(res.path);
        }
        Ok(out)
    }

    /// Plain keep paths reached through directory links, e.g. `/lib/...`
    /// on a merged /usr image. Globs only match walked paths.
    fn keep_literal_paths(
        &self,
        paths: &mut BTreeSet<PathBuf>,
        entries: &BTreeMap<PathBuf, FileEntry>,
    ) {
        let literals = self
            .profile
            .keep_patterns()
            .iter()
            .filter(|p| !p.contains(['*', '?', '[', '{', '\\']));

        for literal in literals {
            let res = match self.rootfs.resolve(Path::new(literal)) {
                Ok(res) if res.exists && !res.links.is_empty() => res,
                Ok(_) => continue,
                Err(err) => {
                    log::warn!("Cannot resolve keep path {:?}: {}", literal, err);
                    continue;
                }
            };

            paths.extend(res.links.into_iter().filter(|p| entries.contains_key(p)));
            paths.extend(
                entries
                    .keys()
                    .filter(|p| p.starts_with(&res.path))
                    .cloned(),
            );
        }
    }

    /// Keep whatever kept symlinks point to, until nothing new shows up.
    fn close_links(
        &self,
        paths: &mut BTreeSet<PathBuf>,
        entries: &BTreeMap<PathBuf, FileEntry>,
    ) -> Result<()> {
        let mut pending: Vec<PathBuf> = paths
            .iter()
            .filter(|p| entries.get(*p).is_some_and(|e| e.is_symlink))
            .cloned()
            .collect();

        while let Some(link) = pending.pop() {
            let res = match self.rootfs.resolve(&link) {
                Ok(res) => res,
                Err(err) => {
                    log::warn!("Skipping symlink {:?}: {}", link, err);
                    continue;
                }
            };
            if !res.exists {
                log::debug!("Dangling symlink {:?}", link);
            }

            for p in res.links.into_iter().chain(std::iter::once(res.path)) {
                if !entries.contains_key(&p) || !paths.insert(p.clone()) {
                    continue;
                }
                if entries.get(&p).is_some_and(|e| e.is_symlink) {
                    pending.push(p);
                }
            }
        }

        Ok(())
    }

    /// Remove files from the image and mark it as processed.
    pub fn apply(&self, plan: &Plan) -> Result<()> {
        for entry in &plan.removed {
            if let Err(err) = fs::remove_file(&entry.path) {
                log::error!("Unable to remove {:?}: {}", entry.image_path, err);
            }
        }

        // Emptied directories can leave links dangling, and removed links
        // can leave directories empty.
        loop {
            let mut removed = 0;
            self.remove_empty_dirs(self.rootfs.root(), &mut removed)?;
            self.remove_broken_symlinks(self.rootfs.root(), &mut removed)?;
            if removed == 0 {
                break;
            }
        }

        let lock = self.rootfs.host_path(&self.lockfile);
        if let Some(parent) = lock.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create lockfile directory {:?}", parent))?;
        }
        fs::File::create(&lock).with_context(|| format!("Failed to create lockfile {:?}", lock))?;

        Ok(())
    }

    /// Returns whether `dir` ended up empty.
    fn remove_empty_dirs(&self, dir: &Path, removed: &mut usize) -> Result<bool> {
        let mut empty = true;

        for e in fs::read_dir(dir).with_context(|| format!("Failed to read {:?}", dir))? {
            let e = e?;
            let path = e.path();

            if !e.file_type()?.is_dir() {
                empty = false;
                continue;
            }

            let skipped = self
                .rootfs
                .image_path(&path)
                .is_some_and(|p| self.rootfs.is_skipped(&p));
            if skipped {
                empty = false;
                continue;
            }

            if self.remove_empty_dirs(&path, removed)? {
                log::debug!("Removing empty directory {:?}", path);
                match fs::remove_dir(&path) {
                    Ok(()) => *removed += 1,
                    Err(err) => {
                        log::error!("Unable to remove directory {:?}: {}", path, err);
                        empty = false;
                    }
                }
            } else {
                empty = false;
            }
        }

        Ok(empty)
    }

    fn remove_broken_symlinks(&self, dir: &Path, removed: &mut usize) -> Result<()> {
        for e in fs::read_dir(dir).with_context(|| format!("Failed to read {:?}", dir))? {
            let e = e?;
            let path = e.path();
            let ft = e.file_type()?;

            if ft.is_symlink() {
                let Some(image) = self.rootfs.image_path(&path) else {
                    continue;
                };
                if !self.rootfs.resolve(&image).map(|r| r.exists).unwrap_or(false) {
                    log::debug!("Removing broken symlink {:?}", image);
                    match fs::remove_file(&path) {
                        Ok(()) => *removed += 1,
                        Err(err) => log::error!("Unable to remove {:?}: {}", image, err),
                    }
                }
            } else if ft.is_dir() {
                let skipped = self
                    .rootfs
                    .image_path(&path)
                    .is_some_and(|p| self.rootfs.is_skipped(&p));
                if !skipped {
                    self.remove_broken_symlinks(&path, removed)?;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::models::{ScanSettings, DEFAULT_LOCKFILE};
    use std::os::unix::fs::symlink;
    use tempfile::{tempdir, TempDir};

    fn touch(root: &Path, image: &str) {
        let p = root.join(image.trim_start_matches('/'));
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, b"data").unwrap();
    }

    /// A small image with a binary, its library chain, a package and some clutter.
    fn image() -> TempDir {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        for f in [
            "/usr/bin/app",
            "/usr/bin/other",
            "/usr/lib/libapp.so.1.0",
            "/usr/share/doc/app/README",
            "/usr/share/man/man1/app.1.gz",
            "/usr/share/zoneinfo/UTC",
            "/usr/share/zoneinfo/right/UTC",
            "/usr/include/app.h",
            "/etc/app/app.conf",
            "/etc/app/app.conf.bak",
            "/var/log/app.log",
        ] {
            touch(root, f);
        }
        symlink("libapp.so.1.0", root.join("usr/lib/libapp.so.1")).unwrap();
        symlink("usr/bin", root.join("bin")).unwrap();

        fs::create_dir_all(root.join("var/lib/dpkg/info")).unwrap();
        fs::write(
            root.join("var/lib/dpkg/info/app.list"),
            "/.\n/usr\n/usr/lib/libapp.so.1\n/usr/share/doc/app/README\n/usr/share/man/man1/app.1.gz\n/usr/include/app.h\n",
        )
        .unwrap();
        tmp
    }

    fn processor(root: &Path, yaml: &str) -> TintProcessor {
        let rootfs = RootFs::new(root.to_path_buf(), &ScanSettings::default()).unwrap();
        let profile = Profile::from_yaml(yaml).unwrap();
        TintProcessor::new(rootfs, profile, PathBuf::from(DEFAULT_LOCKFILE))
    }

    fn kept(plan: &Plan) -> Vec<String> {
        plan.kept
            .iter()
            .map(|e| e.image_path.to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn keeps_targets_packages_and_link_chains() {
        let tmp = image();
        let plan = processor(
            tmp.path(),
            "targets: [/bin/app]\npackages: [app]\nconfig:\n  filters: [doc, junk]",
        )
        .plan()
        .unwrap();

        assert_eq!(
            kept(&plan),
            vec![
                "/bin",
                "/usr/bin/app",
                "/usr/lib/libapp.so.1",
                "/usr/lib/libapp.so.1.0",
                "/usr/share/man/man1/app.1.gz",
            ]
        );
        assert!(plan
            .removed
            .iter()
            .any(|e| e.image_path == Path::new("/usr/bin/other")));
        assert!(plan
            .removed
            .iter()
            .any(|e| e.image_path == Path::new("/var/lib/dpkg/info/app.list")));
    }

    #[test]
    fn package_and_keep_paths_through_directory_links() {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        for f in [
            "/usr/bin/app",
            "/usr/lib/x86_64-linux-gnu/libc.so.6",
            "/usr/lib/x86_64-linux-gnu/libm.so.6",
            "/usr/lib/x86_64-linux-gnu/libunused.so",
            "/opt/data/blob",
        ] {
            touch(root, f);
        }
        symlink("usr/lib", root.join("lib")).unwrap();
        symlink("opt/data", root.join("data")).unwrap();
        fs::create_dir_all(root.join("var/lib/dpkg/info")).unwrap();
        fs::write(
            root.join("var/lib/dpkg/info/libc6:amd64.list"),
            "/.\n/lib/x86_64-linux-gnu\n/lib/x86_64-linux-gnu/libc.so.6\n",
        )
        .unwrap();

        let plan = processor(
            root,
            "targets: [/usr/bin/app]\npackages: [libc6]\nconfig:\n  keep: [/lib/x86_64-linux-gnu/libm.so.6, /data]",
        )
        .plan()
        .unwrap();

        assert_eq!(
            kept(&plan),
            vec![
                "/data",
                "/lib",
                "/opt/data/blob",
                "/usr/bin/app",
                "/usr/lib/x86_64-linux-gnu/libc.so.6",
                "/usr/lib/x86_64-linux-gnu/libm.so.6",
            ]
        );
    }

    #[test]
    fn self_referencing_link_does_not_abort_planning() {
        let tmp = image();
        symlink("loop", tmp.path().join("etc/app/loop")).unwrap();

        let plan = processor(tmp.path(), "targets: [/usr/bin/app]\nconfig:\n  keep: [/etc/app]")
            .plan()
            .unwrap();

        assert_eq!(
            kept(&plan),
            vec![
                "/etc/app/app.conf",
                "/etc/app/app.conf.bak",
                "/etc/app/loop",
                "/usr/bin/app"
            ]
        );
    }

    #[test]
    fn keep_and_prune_rules_override_detection() {
        let tmp = image();
        let plan = processor(
            tmp.path(),
            "targets: [/usr/bin/app]\nconfig:\n  keep: [/usr/share/zoneinfo, /etc/app/*]\n  prune: ['/usr/share/zoneinfo/right', '**/*.bak', /usr/bin/app]",
        )
        .plan()
        .unwrap();

        assert_eq!(
            kept(&plan),
            vec!["/etc/app/app.conf", "/usr/bin/app", "/usr/share/zoneinfo/UTC"]
        );
    }

    #[test]
    fn missing_target_is_an_error() {
        let tmp = image();
        let err = processor(tmp.path(), "targets: [/usr/bin/nope]")
            .plan()
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn apply_trims_image_and_locks_it() {
        let tmp = image();
        let root = tmp.path();
        symlink("/usr/bin/other", root.join("usr/lib/other-link")).unwrap();

        let p = processor(root, "targets: [/usr/bin/app]\nconfig:\n  keep: [/usr/lib/other-link]");
        let plan = p.plan().unwrap();
        p.apply(&plan).unwrap();

        assert!(root.join("usr/bin/app").exists());
        assert!(!root.join("usr/lib/libapp.so.1.0").exists());
        assert!(!root.join("bin").exists());
        assert!(!root.join("usr/share").exists());
        assert!(!root.join("var").exists());
        assert!(root.join(".tinted.lock").exists());

        // The kept link pulled its target in.
        assert!(root.join("usr/lib/other-link").exists());
        assert!(root.join("usr/bin/other").exists());

        let again = processor(root, "targets: [/usr/bin/app]").plan();
        assert!(again.unwrap_err().to_string().contains("already tinted"));
    }

    #[test]
    fn apply_leaves_no_links_into_emptied_directories() {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        touch(root, "/usr/bin/app");
        touch(root, "/opt/data/blob");
        symlink("opt/data", root.join("data")).unwrap();
        fs::create_dir_all(root.join("var/lib/dpkg/info")).unwrap();
        fs::write(root.join("var/lib/dpkg/info/data.list"), "/data\n").unwrap();

        let p = processor(root, "targets: [/usr/bin/app]\npackages: [data]");
        let plan = p.plan().unwrap();
        assert_eq!(kept(&plan), vec!["/data", "/usr/bin/app"]);

        p.apply(&plan).unwrap();
        assert!(root.join("usr/bin/app").exists());
        assert!(!root.join("opt").exists());
        assert!(fs::symlink_metadata(root.join("data")).is_err());
    }

    #[test]
    fn lockfile_directory_is_recreated_after_trim() {
        let tmp = image();
        let root = tmp.path();
        let rootfs = RootFs::new(root.to_path_buf(), &ScanSettings::default()).unwrap();
        let profile = Profile::from_yaml("targets: [/usr/bin/app]").unwrap();
        let p = TintProcessor::new(rootfs, profile, PathBuf::from("/var/lib/tint/lock"));

        let plan = p.plan().unwrap();
        p.apply(&plan).unwrap();

        assert!(root.join("var/lib/tint/lock").is_file());
        assert!(!root.join("var/log").exists());
        assert!(p.plan().unwrap_err().to_string().contains("already tinted"));
    }

    #[test]
    fn apply_drops_dangling_links() {
        let tmp = image();
        let root = tmp.path();
        symlink("missing.so", root.join("usr/lib/libgone.so")).unwrap();

        let p = processor(root, "targets: [/usr/bin/app]\nconfig:\n  keep: [/usr/lib/libgone.so]");
        let plan = p.plan().unwrap();
        assert!(plan
            .kept
            .iter()
            .any(|e| e.image_path == Path::new("/usr/lib/libgone.so")));

        p.apply(&plan).unwrap();
        assert!(fs::symlink_metadata(root.join("usr/lib/libgone.so")).is_err());
    }
}
