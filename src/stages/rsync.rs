//! rsync argument vectors shared by the download stage and the rsync mirror.

use std::path::Path;

use crate::executor::CommandSpec;
use crate::pipeline::SectionConfig;

/// Flags common to every transfer of one section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RsyncOptions {
    /// Keep source permissions instead of forcing `ugo=rwX`.
    pub permission: bool,
    pub compress: bool,
    /// Remote shell, e.g. `ssh -p 2222`.
    pub rsh: Option<String>,
}

impl RsyncOptions {
    pub fn for_section(section: &SectionConfig, permission: bool) -> Self {
        Self {
            permission,
            compress: section.compress,
            rsh: section.rsh(),
        }
    }

    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["--recursive", "--links", "--times", "--verbose"]
            .into_iter()
            .map(String::from)
            .collect();
        if self.permission {
            args.push("--perms".to_string());
        } else {
            args.push("--no-perms".to_string());
            args.push("--chmod=ugo=rwX".to_string());
        }
        if self.compress {
            args.push("--compress".to_string());
        }
        if let Some(rsh) = &self.rsh {
            args.push(format!("--rsh={}", rsh));
        }
        args
    }

    /// `rsync <flags> <source> <dest>`.
    pub fn command(&self, source: &str, dest: &str) -> CommandSpec {
        CommandSpec::new("rsync").args(self.args()).arg(source).arg(dest)
    }

    /// `rsync <flags> --files-from=<list> <source> <dest>`.
    pub fn files_from_command(&self, list: &Path, source: &str, dest: &str) -> CommandSpec {
        CommandSpec::new("rsync")
            .args(self.args())
            .arg(format!("--files-from={}", list.display()))
            .arg(source)
            .arg(dest)
    }
}

/// `rsync --archive --verbose <source>/ <dest>/`.
pub fn archive_command(source: &Path, dest: &Path) -> CommandSpec {
    CommandSpec::new("rsync")
        .args(["--archive", "--verbose"])
        .arg(format!("{}/", source.display()))
        .arg(format!("{}/", dest.display()))
}
