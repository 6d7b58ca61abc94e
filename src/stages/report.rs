//! Night report discovery.
//!
//! The observatory publishes one log file per mail message in an HTML
//! directory listing. Recent files are mirrored into
//! `<staging>/reports/<mode>/` and scanned for the subject line naming the
//! run's MJD. The basename of the first match is recorded as the ledger's
//! `logfile`. Nothing here can fail the pipeline.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Days, NaiveDate, Utc};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::ReportError;
use crate::pipeline::{Mjd, RunContext};

/// Listing entries newer than this are mirrored locally.
pub const DOWNLOAD_DAYS: u64 = 30;

/// Only mirrored files from this many most recent days are scanned.
pub const RECENT_DAYS: u64 = 3;

/// One entry of the report listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportLink {
    /// The href as published, used to build the download URL.
    pub href: String,
    /// Decoded basename, used for the local copy.
    pub name: String,
}

/// Extracts `href` targets from an HTML listing, reduced to basenames.
pub fn parse_links(html: &str) -> Vec<ReportLink> {
    let Ok(href) = Regex::new(r#"(?i)href\s*=\s*["']([^"']+)["']"#) else {
        return Vec::new();
    };
    href.captures_iter(html)
        .filter_map(|caps| {
            let raw = caps.get(1)?.as_str();
            let base = raw.trim_end_matches('/').rsplit('/').next()?;
            if base.is_empty() || base.starts_with('?') {
                return None;
            }
            let name = urlencoding::decode(base)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| base.replace("%3A", ":"));
            Some(ReportLink {
                href: base.to_string(),
                name,
            })
        })
        .collect()
}

/// File name pattern of published reports; lco publishes HTML renderings.
pub fn report_name_pattern(observatory: &str) -> Result<Regex, ReportError> {
    let suffix = if observatory == "lco" { r"\.html" } else { "" };
    Ok(Regex::new(&format!(
        r"^(\d{{4}})-(\d{{2}})-(\d{{2}})\.\d{{2}}:\d{{2}}:\d{{2}}\.log{}",
        suffix
    ))?)
}

/// Subject patterns per observatory and mode. Group 2 captures the MJD.
pub fn subject_patterns(observatory: &str, mode: Option<&str>) -> Vec<String> {
    const LCO_MOS: &[&str] = &[
        r"LCO Night Log \(MJD ([0-9]+)\)",
        r"LCO Night Log  \(MJD ([0-9]+)\)",
        r"LCO Night Log \(MJD([0-9]+)\)",
        r"LCO Night Log \(([0-9]+)\)",
    ];
    const LCO_LVM: &[&str] = &[
        r"LVM Observing Summary for MJD ([0-9]+)",
        r"LVM Observing Summary MJD ([0-9]+)",
        r"\[.*\] LVM Observing Summary for MJD ([0-9]+)",
        r"\[.*\] LVM Observing Summary MJD ([0-9]+)",
    ];

    match (observatory, mode.unwrap_or("mos")) {
        ("apo", "mos") => vec![r"subject: 2\.5m obslog ([0-9]+) \([ms]jd ([0-9]+)\)".to_string()],
        ("lco", "mos") => LCO_MOS
            .iter()
            .map(|subject| format!(r"<TITLE> \[lco-operations ([0-9]+)\] {}", subject))
            .collect(),
        ("lco", "lvm") => LCO_LVM
            .iter()
            .map(|subject| format!(r"<TITLE> \[lvm-inst ([0-9]+)\] {}", subject))
            .collect(),
        _ => Vec::new(),
    }
}

/// Compiles subject patterns, case-insensitive and anchored at line start.
pub fn compile_subjects(patterns: &[String]) -> Result<Vec<Regex>, ReportError> {
    patterns
        .iter()
        .map(|p| Regex::new(&format!("(?i)^{}", p)).map_err(ReportError::from))
        .collect()
}

/// True when a stripped line matches a subject naming `mjd`.
pub fn line_names_mjd(subjects: &[Regex], line: &str, mjd: Mjd) -> bool {
    let line = line.trim();
    subjects.iter().any(|re| {
        re.captures(line)
            .and_then(|caps| caps.get(2))
            .and_then(|m| m.as_str().parse::<u32>().ok())
            == Some(mjd.value())
    })
}

/// Mirrors and searches the report listing for one run.
#[derive(Debug, Clone)]
pub struct ReportLocator {
    url: String,
    reports_dir: PathBuf,
    observatory: String,
    mode: Option<String>,
    mjd: Mjd,
    today: NaiveDate,
    client: reqwest::Client,
}

impl ReportLocator {
    pub fn new(
        url: impl Into<String>,
        staging: &Path,
        observatory: impl Into<String>,
        mode: Option<&str>,
        mjd: Mjd,
    ) -> Result<Self, ReportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        let reports_dir = match mode {
            Some(mode) => staging.join("reports").join(mode),
            None => staging.join("reports"),
        };
        Ok(Self {
            url: url.into(),
            reports_dir,
            observatory: observatory.into(),
            mode: mode.map(String::from),
            mjd,
            today: Utc::now().date_naive(),
            client,
        })
    }

    /// Pins "today" for date-window checks.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn reports_dir(&self) -> &Path {
        &self.reports_dir
    }

    /// Listing entries that are reports published in the download window.
    pub fn candidates(&self, links: Vec<ReportLink>) -> Result<Vec<ReportLink>, ReportError> {
        let pattern = report_name_pattern(&self.observatory)?;
        let cutoff = self.today.checked_sub_days(Days::new(DOWNLOAD_DAYS));
        Ok(links
            .into_iter()
            .filter(|link| {
                let Some(caps) = pattern.captures(&link.name) else {
                    return false;
                };
                let date = NaiveDate::from_ymd_opt(
                    caps[1].parse().unwrap_or(0),
                    caps[2].parse().unwrap_or(0),
                    caps[3].parse().unwrap_or(0),
                );
                match (date, cutoff) {
                    (Some(date), Some(cutoff)) => date > cutoff,
                    (Some(_), None) => true,
                    _ => false,
                }
            })
            .collect())
    }

    /// Local report files from the most recent days, newest day first.
    pub fn recent_files(&self) -> Result<Vec<PathBuf>, ReportError> {
        if !self.reports_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names: Vec<String> = std::fs::read_dir(&self.reports_dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();

        let mut recent = Vec::new();
        for days in 0..RECENT_DAYS {
            let Some(day) = self.today.checked_sub_days(Days::new(days)) else {
                continue;
            };
            let prefix = day.format("%Y-%m-%d").to_string();
            recent.extend(
                names
                    .iter()
                    .filter(|name| name.starts_with(&prefix))
                    .map(|name| self.reports_dir.join(name)),
            );
        }
        Ok(recent)
    }

    /// File whose subject line names this run's MJD.
    ///
    /// Subject patterns are tried in order; each one is checked against
    /// every file before the next pattern is considered.
    pub fn find_report(&self, files: &[PathBuf]) -> Result<Option<String>, ReportError> {
        let subjects = compile_subjects(&subject_patterns(&self.observatory, self.mode.as_deref()))?;
        if subjects.is_empty() {
            warn!(
                "No report subject patterns for {} {}",
                self.observatory,
                self.mode.as_deref().unwrap_or("mos")
            );
            return Ok(None);
        }

        let mut texts = Vec::with_capacity(files.len());
        for file in files {
            match std::fs::read(file) {
                Ok(bytes) => texts.push((file, String::from_utf8_lossy(&bytes).into_owned())),
                Err(e) => debug!("Skipping {}: {}", file.display(), e),
            }
        }

        for subject in &subjects {
            let found = texts.iter().find(|(_, text)| {
                text.lines()
                    .any(|line| line_names_mjd(std::slice::from_ref(subject), line, self.mjd))
            });
            if let Some((file, _)) = found {
                let name = file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                return Ok(Some(name));
            }
            debug!("No report with subject ~ {}", subject.as_str());
        }
        Ok(None)
    }

    async fn listing(&self) -> Result<Vec<ReportLink>, ReportError> {
        info!("Fetching {}", self.url);
        let html = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(parse_links(&html))
    }

    async fn download(&self, link: &ReportLink) -> Result<(), ReportError> {
        let target = self.reports_dir.join(&link.name);
        if target.exists() {
            return Ok(());
        }
        let url = format!("{}/{}", self.url.trim_end_matches('/'), link.href);
        debug!("GET {}", url);
        let body = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        std::fs::write(&target, &body)?;
        Ok(())
    }

    /// Mirrors new reports, then searches the recent ones.
    pub async fn locate(&self) -> Result<Option<String>, ReportError> {
        std::fs::create_dir_all(&self.reports_dir)?;
        let links = self.candidates(self.listing().await?)?;
        debug!("{} reports in the download window", links.len());
        for link in &links {
            if let Err(e) = self.download(link).await {
                warn!("Failed to download {}: {}", link.name, e);
            }
        }
        let recent = self.recent_files()?;
        self.find_report(&recent)
    }
}

/// Runs report discovery for a run. Returns the report basename, if found.
pub async fn run_report(ctx: &RunContext) -> Option<String> {
    let Some(url) = ctx.config.general.report_url() else {
        info!("Report URL is SKIP; not looking for a report");
        return None;
    };
    let locator = match ReportLocator::new(url, ctx.staging(), ctx.observatory(), ctx.mode(), ctx.mjd) {
        Ok(locator) => locator,
        Err(e) => {
            warn!("Cannot search for reports: {}", e);
            return None;
        }
    };
    match locator.locate().await {
        Ok(Some(name)) => {
            info!("Report for {}: {}", ctx.mjd, name);
            Some(name)
        }
        Ok(None) => {
            warn!("No report found for {}", ctx.mjd);
            None
        }
        Err(e) => {
            warn!("Report search failed: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn locator(staging: &Path, observatory: &str, mode: Option<&str>, mjd: u32) -> ReportLocator {
        ReportLocator::new("http://localhost/reports/", staging, observatory, mode, Mjd(mjd))
            .unwrap()
            .with_today(NaiveDate::from_ymd_opt(2024, 3, 10).unwrap())
    }

    #[test]
    fn test_parse_links_decodes_basenames() {
        let html = r#"<a href="?C=N;O=D">Name</a>
            <a href="/reports/2024-03-09.07%3A12%3A01.log.html">x</a>
            <A HREF='2024-03-08.06:00:00.log'>y</A>
            <a href="sub/">sub</a>"#;
        let links = parse_links(html);
        let names: Vec<_> = links.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["2024-03-09.07:12:01.log.html", "2024-03-08.06:00:00.log", "sub"]
        );
        assert_eq!(links[0].href, "2024-03-09.07%3A12%3A01.log.html");
    }

    #[test]
    fn test_candidates_keep_matching_names_in_window() {
        let temp = TempDir::new().unwrap();
        let apo = locator(temp.path(), "apo", None, 60379);
        let links = parse_links(
            r#"<a href="2024-03-09.07:12:01.log">a</a>
               <a href="2024-01-01.07:12:01.log">old</a>
               <a href="notes.txt">n</a>"#,
        );
        let kept = apo.candidates(links).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "2024-03-09.07:12:01.log");

        let lco = locator(temp.path(), "lco", Some("mos"), 60379);
        let links = parse_links(
            r#"<a href="2024-03-09.07:12:01.log">plain</a>
               <a href="2024-03-09.07%3A12%3A01.log.html">html</a>"#,
        );
        let kept = lco.candidates(links).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "2024-03-09.07:12:01.log.html");
    }

    #[test]
    fn test_subject_lines() {
        let apo = compile_subjects(&subject_patterns("apo", Some("mos"))).unwrap();
        assert!(line_names_mjd(&apo, "  Subject: 2.5m obslog 1234 (MJD 60379)", Mjd(60379)));
        assert!(line_names_mjd(&apo, "subject: 2.5m obslog 1234 (sjd 60379)", Mjd(60379)));
        assert!(!line_names_mjd(&apo, "subject: 2.5m obslog 1234 (mjd 60378)", Mjd(60379)));
        assert!(!line_names_mjd(&apo, "Re: subject: 2.5m obslog 1 (mjd 60379)", Mjd(60379)));

        let lco = compile_subjects(&subject_patterns("lco", Some("mos"))).unwrap();
        assert!(line_names_mjd(
            &lco,
            "<TITLE> [lco-operations 812] LCO Night Log (MJD60379)</TITLE>",
            Mjd(60379)
        ));

        let lvm = compile_subjects(&subject_patterns("lco", Some("lvm"))).unwrap();
        assert!(line_names_mjd(
            &lvm,
            "<title> [lvm-inst 77] [LVM] LVM Observing Summary MJD 60379",
            Mjd(60379)
        ));
        assert!(subject_patterns("apo", Some("lvm")).is_empty());
    }

    #[test]
    fn test_find_report_in_recent_files() {
        let temp = TempDir::new().unwrap();
        let finder = locator(temp.path(), "apo", None, 60379);
        let dir = finder.reports_dir().to_path_buf();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("2024-03-10.08:00:00.log"),
            "From: ops\nsubject: 2.5m obslog 5 (mjd 60380)\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("2024-03-09.08:00:00.log"),
            "From: ops\nsubject: 2.5m obslog 4 (mjd 60379)\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("2024-03-01.08:00:00.log"),
            "subject: 2.5m obslog 1 (mjd 60379)\n",
        )
        .unwrap();

        let recent = finder.recent_files().unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(
            finder.find_report(&recent).unwrap().as_deref(),
            Some("2024-03-09.08:00:00.log")
        );
    }

    #[test]
    fn test_find_report_prefers_earlier_subject_pattern() {
        let temp = TempDir::new().unwrap();
        let finder = locator(temp.path(), "lco", Some("mos"), 60379);
        let dir = finder.reports_dir().to_path_buf();
        std::fs::create_dir_all(&dir).unwrap();
        let late = dir.join("2024-03-10.08:00:00.log.html");
        let early = dir.join("2024-03-09.08:00:00.log.html");
        std::fs::write(&late, "<TITLE> [lco-operations 9] LCO Night Log (60379)</TITLE>\n").unwrap();
        std::fs::write(&early, "<TITLE> [lco-operations 8] LCO Night Log (MJD 60379)</TITLE>\n").unwrap();

        assert_eq!(
            finder.find_report(&[late, early]).unwrap().as_deref(),
            Some("2024-03-09.08:00:00.log.html")
        );
    }
}
