//! Verify stage: checks downloaded nights against their sum files.
//!
//! Every section with data on disk gets a manifest snapshot written to the
//! summaries area, whatever the verification outcome.

use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use regex::Regex;
use tracing::{error, info, warn};

use super::{run_checked, status_from};
use crate::error::ExecutorError;
use crate::executor::CommandSpec;
use crate::pipeline::{RunContext, SectionConfig, StageStatus, VerifyMethod};
use crate::storage::export_section;

/// Frame list written by the infrared camera.
pub const IRCAM_LOG: &str = "irsc.log.gz";

/// Lines of checksum tool output that do not report `OK`.
///
/// Each line is split at its last `:`; the remainder must end with `OK`.
pub fn checksum_mismatches(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| !line.is_empty())
        .filter_map(|line| match line.rsplit_once(':') {
            Some((_, status)) if status.trim_end().ends_with("OK") => None,
            Some((file, _)) => Some(file.to_string()),
            None => Some(line.to_string()),
        })
        .collect()
}

/// Frame file names: `cR` plus six digits, optionally gzipped.
const FRAME_PATTERN: &str = r"^(cR\d{6}\.fit)(\.gz|)\s*";

fn compile_frame_pattern(pattern: &str) -> std::io::Result<Regex> {
    Regex::new(pattern).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
}

/// Frame names listed in an ircam log body.
pub fn ircam_log_frames(frame: &Regex, log: &str) -> BTreeSet<String> {
    log.lines()
        .filter_map(|line| frame.captures(line))
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Frame names present in a night directory, compression suffix dropped.
pub fn ircam_disk_frames(frame: &Regex, night: &Path) -> std::io::Result<Vec<String>> {
    let mut frames = Vec::new();
    for entry in std::fs::read_dir(night)? {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if let Some(caps) = frame.captures(&name) {
            frames.push(caps[1].to_string());
        }
    }
    frames.sort();
    Ok(frames)
}

/// Compares the frames in `irsc.log.gz` against the files on disk.
pub fn verify_ircam(night: &Path) -> std::io::Result<bool> {
    let frame = compile_frame_pattern(FRAME_PATTERN)?;
    let mut body = String::new();
    GzDecoder::new(std::fs::File::open(night.join(IRCAM_LOG))?).read_to_string(&mut body)?;
    let logged: Vec<String> = ircam_log_frames(&frame, &body).into_iter().collect();
    let on_disk = ircam_disk_frames(&frame, night)?;

    if logged.len() == on_disk.len() {
        info!("Number of files in irsc.log equals number of files on disk ({})", logged.len());
        let mut ok = true;
        for (k, (disk, log)) in on_disk.iter().zip(logged.iter()).enumerate() {
            if disk != log {
                error!("File #{}: {} {}", k, disk, log);
                ok = false;
            }
        }
        return Ok(ok);
    }

    error!(
        "irsc.log lists {} files but {} are on disk",
        logged.len(),
        on_disk.len()
    );
    for file in logged.iter().filter(|f| !on_disk.contains(f)) {
        error!("    --> Missing {} on disk", file);
    }
    for file in on_disk.iter().filter(|f| !logged.contains(f)) {
        error!("    --> Missing {} in irsc.log", file);
    }
    Ok(false)
}

fn is_non_empty_dir(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Runs the verify stage over all sections.
#[derive(Debug, Clone, Default)]
pub struct VerifyStage;

impl VerifyStage {
    pub fn new() -> Self {
        Self
    }

    pub async fn run(
        &self,
        ctx: &RunContext,
        sections: &[SectionConfig],
    ) -> Result<StageStatus, ExecutorError> {
        let mut ok = true;
        for section in sections {
            let night = section.local_dir(ctx.staging(), ctx.mjd);
            if !is_non_empty_dir(&night) {
                info!("No {} data found.", section.name);
                continue;
            }

            if !self.verify_section(ctx, section, &night).await? {
                ok = false;
            }

            if let Err(e) = export_section(
                ctx.staging(),
                &section.name,
                &section.local_root(ctx.staging()),
                ctx.mjd,
            ) {
                warn!("Manifest export for {} failed: {}", section.name, e);
            }
        }
        Ok(status_from(ok))
    }

    async fn verify_section(
        &self,
        ctx: &RunContext,
        section: &SectionConfig,
        night: &Path,
    ) -> Result<bool, ExecutorError> {
        match &section.verify {
            VerifyMethod::Skip => {
                info!("Verification of {} is skipped", section.name);
                Ok(true)
            }
            VerifyMethod::Ircam => {
                if !night.join(IRCAM_LOG).exists() {
                    error!("{} does not appear to exist!", night.join(IRCAM_LOG).display());
                    return Ok(false);
                }
                match verify_ircam(night) {
                    Ok(ok) => Ok(ok),
                    Err(e) => {
                        error!("Cannot read {}: {}", IRCAM_LOG, e);
                        Ok(false)
                    }
                }
            }
            VerifyMethod::Checksum(argv) => {
                let (Some(program), Some(tool)) = (argv.first(), section.verify.tool()) else {
                    return Ok(true);
                };
                let sumfile = format!("{}.{}", ctx.mjd, tool);
                if !night.join(&sumfile).exists() {
                    error!("{} does not appear to exist!", night.join(&sumfile).display());
                    return Ok(false);
                }
                info!("{} file exists, running {} verification stage.", sumfile, section.name);

                let command = CommandSpec::new(program.as_str())
                    .args(argv[1..].iter().cloned())
                    .arg(sumfile)
                    .current_dir(night);
                let Some(outcome) = run_checked(&ctx.executor, &command, false).await? else {
                    return Ok(false);
                };
                let mismatches = checksum_mismatches(&outcome.stdout);
                for file in &mismatches {
                    error!("Checksum mismatch: {}", file);
                }
                Ok(outcome.success() && mismatches.is_empty())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ProcessExecutor;
    use crate::pipeline::{Mjd, TransferConfig};
    use crate::storage::manifest_path;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn context(staging: &Path) -> RunContext {
        RunContext::new(
            Arc::new(TransferConfig::new("apo", None, staging)),
            Mjd(60000),
            staging.join("atlogs/60000/0"),
            Arc::new(ProcessExecutor::default()),
        )
    }

    fn write_gz(path: &Path, body: &str) {
        let mut encoder = GzEncoder::new(std::fs::File::create(path).unwrap(), Compression::default());
        encoder.write_all(body.as_bytes()).unwrap();
        encoder.finish().unwrap();
    }

    #[test]
    fn test_checksum_mismatches() {
        let output = "a.fits: OK\nb.fits: FAILED\n\nweird line\ndir/c:d.fits: OK\n";
        assert_eq!(checksum_mismatches(output), vec!["b.fits", "weird line"]);
        assert!(checksum_mismatches("").is_empty());
    }

    #[test]
    fn test_ircam_frames_compare() {
        let temp = TempDir::new().unwrap();
        let night = temp.path();
        std::fs::write(night.join("cR000001.fit.gz"), b"").unwrap();
        std::fs::write(night.join("cR000002.fit"), b"").unwrap();
        write_gz(
            &night.join(IRCAM_LOG),
            "cR000001.fit.gz  12:00\ncR000002.fit 12:01\ncR000002.fit again\nnoise\n",
        );
        assert!(verify_ircam(night).unwrap());

        std::fs::write(night.join("cR000003.fit"), b"").unwrap();
        assert!(!verify_ircam(night).unwrap());
    }

    #[test]
    fn test_bad_frame_pattern_is_an_error() {
        let err = compile_frame_pattern("(cR").unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);

        let frame = compile_frame_pattern(FRAME_PATTERN).unwrap();
        let logged = ircam_log_frames(&frame, "cR000001.fit.gz 12:00\nxcR000002.fit\n");
        assert_eq!(logged.into_iter().collect::<Vec<_>>(), vec!["cR000001.fit"]);
    }

    #[tokio::test]
    async fn test_checksum_verification_and_manifest() {
        let temp = TempDir::new().unwrap();
        let ctx = context(temp.path());
        let section = SectionConfig::new("apogee", "/remote/apogee")
            .with_verify(VerifyMethod::Checksum(vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo \"a.fits: OK\"".to_string(),
            ]));
        let night = section.local_dir(ctx.staging(), ctx.mjd);
        std::fs::create_dir_all(&night).unwrap();
        std::fs::write(night.join("a.fits"), b"data").unwrap();
        std::fs::write(night.join("60000.sh"), b"").unwrap();

        let status = VerifyStage::new().run(&ctx, &[section]).await.unwrap();
        assert_eq!(status, StageStatus::Success);
        assert!(manifest_path(ctx.staging(), "apogee", ctx.mjd).exists());
    }

    #[tokio::test]
    async fn test_missing_sum_file_fails_but_manifest_is_exported() {
        let temp = TempDir::new().unwrap();
        let ctx = context(temp.path());
        let section = SectionConfig::new("apogee", "/remote/apogee")
            .with_verify(VerifyMethod::from("md5sum -c".to_string()));
        let night = section.local_dir(ctx.staging(), ctx.mjd);
        std::fs::create_dir_all(&night).unwrap();
        std::fs::write(night.join("a.fits"), b"data").unwrap();

        let status = VerifyStage::new().run(&ctx, &[section]).await.unwrap();
        assert_eq!(status, StageStatus::Failure);
        assert!(manifest_path(ctx.staging(), "apogee", ctx.mjd).exists());
    }

    #[tokio::test]
    async fn test_empty_sections_are_not_verified() {
        let temp = TempDir::new().unwrap();
        let ctx = context(temp.path());
        let section = SectionConfig::new("boss", "/remote/boss")
            .with_verify(VerifyMethod::from("md5sum -c".to_string()));
        std::fs::create_dir_all(section.local_dir(ctx.staging(), ctx.mjd)).unwrap();

        let status = VerifyStage::new().run(&ctx, &[section]).await.unwrap();
        assert_eq!(status, StageStatus::Success);
        assert!(!manifest_path(ctx.staging(), "boss", ctx.mjd).exists());
    }
}
