use crate::app::models::{FileEntry, Plan};
use std::path::Path;

pub struct OutputGenerator;

impl OutputGenerator {
    /// Kept entries grouped under their directory.
    pub fn generate_tree(entries: &[FileEntry]) -> String {
        let mut output = String::new();
        let mut last_dir: Option<&Path> = None;

        for (i, entry) in entries.iter().enumerate() {
            let dir = entry.image_path.parent().unwrap_or(Path::new("/"));

            if last_dir != Some(dir) {
                if last_dir.is_some() {
                    output.push('\n');
                }
                output.push_str(&format!("{}\n──┬──\n", dir.display()));
                last_dir = Some(dir);
            }

            let is_last = entries
                .get(i + 1)
                .map_or(true, |next| next.image_path.parent() != Some(dir));
            let leaf = if is_last { "  ╰─" } else { "  ├─" };

            let name = entry
                .image_path
                .file_name()
                .unwrap_or_default()
                .to_string_lossy();

            match &entry.link_target {
                Some(target) => {
                    output.push_str(&format!("{} {} -> {}\n", leaf, name, target.display()))
                }
                None => output.push_str(&format!("{} {}\n", leaf, name)),
            }
        }

        output.trim_end().to_string()
    }

    pub fn generate_removed(entries: &[FileEntry]) -> String {
        entries
            .iter()
            .map(|e| format!("- {}", e.image_path.display()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn summary(plan: &Plan) -> String {
        format!(
            "Preserved {} files, taking {} bytes; removing {} files, freeing {} bytes",
            plan.kept.len(),
            plan.kept_size(),
            plan.removed.len(),
            plan.removed_size()
        )
    }

    pub fn format_report(tree: &str, removed: Option<&str>, summary: &str) -> String {
        let mut out = String::new();
        out.push_str(tree);

        if let Some(removed) = removed.filter(|r| !r.is_empty()) {
            out.push_str("\n\nRemoved:\n");
            out.push_str(removed);
        }

        out.push_str("\n\n");
        out.push_str(summary);
        out
    }
}
