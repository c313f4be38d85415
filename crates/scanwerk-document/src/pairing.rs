// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Filename pairing — parses scan filenames into (sequence, side), normalizes
// names, and groups files into recto/verso pairs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use regex::{Captures, Regex};
use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::types::Side;
use tracing::debug;

/// What a filename tells us about a scan, before normalization.
///
/// Either part can be undetermined: a bare numeric name carries a sequence
/// but no side; an unrecognized name carries neither.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub sequence: Option<String>,
    pub side: Option<Side>,
}

/// A scan file with its detected identity and normalized name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedScan {
    /// Zero-padded sequence number shared by both sides of the card.
    pub sequence: String,
    pub side: Side,
    pub original_path: PathBuf,
    /// `<sequence>_<side><ext>` form, e.g. `001_recto.jpg`.
    pub normalized_name: String,
}

/// A matched recto/verso pair sharing a normalized sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPair {
    pub sequence: String,
    pub recto: PathBuf,
    pub verso: PathBuf,
}

/// One naming convention: a pattern over the lowercased file stem and an
/// extractor pulling (sequence, side) out of its captures.
struct NamingRule {
    pattern: Regex,
    extract: fn(&Captures<'_>) -> ParsedName,
}

/// Filename pattern dispatch for scanned record cards.
///
/// Rules are evaluated in fixed priority order and the first match wins:
///
/// 1. `<seq>-R` / `<seq>-V` (single-letter side suffix, `-` or `_`)
/// 2. `<seq>_recto` / `<seq>_verso`
/// 3. `<seq>_page1` / `<seq>_page2` (page 1 = recto)
/// 4. bare digits (sequence only, side undetermined)
///
/// The rule list is compiled once at construction and carried by value, so
/// callers decide its lifetime instead of relying on process-wide state.
pub struct ScanNaming {
    rules: Vec<NamingRule>,
}

impl ScanNaming {
    pub fn new() -> Self {
        let rule = |pattern: &str, extract: fn(&Captures<'_>) -> ParsedName| NamingRule {
            pattern: Regex::new(pattern).expect("hard-coded naming pattern"),
            extract,
        };

        Self {
            rules: vec![
                rule(r"^(.+?)[-_]([rv])$", |caps| ParsedName {
                    sequence: Some(caps[1].to_string()),
                    side: Some(if &caps[2] == "r" { Side::Recto } else { Side::Verso }),
                }),
                rule(r"^(.+?)[-_](recto|verso)$", |caps| ParsedName {
                    sequence: Some(caps[1].to_string()),
                    side: Some(if &caps[2] == "recto" { Side::Recto } else { Side::Verso }),
                }),
                rule(r"^(.+?)[-_]page([12])$", |caps| ParsedName {
                    sequence: Some(caps[1].to_string()),
                    side: Some(if &caps[2] == "1" { Side::Recto } else { Side::Verso }),
                }),
                rule(r"^(\d+)$", |caps| ParsedName {
                    sequence: Some(caps[1].to_string()),
                    side: None,
                }),
            ],
        }
    }

    /// Detect the sequence number and side from a bare filename (with or
    /// without extension). Returns undetermined parts when no rule matches.
    pub fn detect(&self, file_name: &str) -> ParsedName {
        let stem = Path::new(file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        for rule in &self.rules {
            if let Some(caps) = rule.pattern.captures(&stem) {
                return (rule.extract)(&caps);
            }
        }

        ParsedName {
            sequence: None,
            side: None,
        }
    }

    /// Produce the normalized `<sequence>_<side><ext>` name for a file,
    /// auto-detecting whichever of `sequence`/`side` is not supplied.
    ///
    /// All-digit sequences are zero-padded to at least three digits; the
    /// extension is lowercased and defaults to `.jpg`. Fails with
    /// [`ScanwerkError::Naming`] when the name matches no known pattern.
    pub fn normalize(
        &self,
        file_name: &str,
        sequence: Option<&str>,
        side: Option<Side>,
    ) -> Result<String> {
        let extension = Path::new(file_name)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_else(|| ".jpg".into());

        let (sequence, side) = match (sequence, side) {
            (Some(seq), Some(side)) => (seq.to_string(), side),
            (seq, side) => {
                let detected = self.detect(file_name);
                let seq = seq
                    .map(str::to_string)
                    .or(detected.sequence)
                    .ok_or_else(|| naming_error(file_name))?;
                let side = side.or(detected.side).ok_or_else(|| naming_error(file_name))?;
                (seq, side)
            }
        };

        Ok(format!("{}_{}{}", pad_sequence(&sequence), side, extension))
    }

    /// Normalize a caller-supplied two-file pair, checking that the files
    /// actually belong together: same sequence, exactly one recto and one
    /// verso. Returns (recto, verso) in that order.
    pub fn normalize_pair(
        &self,
        first: &Path,
        second: &Path,
    ) -> Result<(NormalizedScan, NormalizedScan)> {
        let mut scans = Vec::with_capacity(2);
        for path in [first, second] {
            let name = file_name_of(path);
            let parsed = self.detect(&name);
            let (Some(sequence), Some(side)) = (parsed.sequence, parsed.side) else {
                return Err(naming_error(&name));
            };
            let normalized_name = self.normalize(&name, Some(&sequence), Some(side))?;
            scans.push(NormalizedScan {
                sequence: pad_sequence(&sequence),
                side,
                original_path: path.to_path_buf(),
                normalized_name,
            });
        }

        let (a, b) = (scans.remove(0), scans.remove(0));
        if a.sequence != b.sequence {
            return Err(ScanwerkError::Naming(format!(
                "files do not form a pair: sequence {} vs {}",
                a.sequence, b.sequence
            )));
        }
        if a.side == b.side {
            return Err(ScanwerkError::Naming(format!(
                "files do not form a pair: both sides detected as {}",
                a.side
            )));
        }

        match a.side {
            Side::Recto => Ok((a, b)),
            Side::Verso => Ok((b, a)),
        }
    }

    /// Group a file list into recto/verso pairs by normalized sequence.
    ///
    /// Files matching no naming rule, or carrying no side, are skipped.
    /// A pair is emitted only when both sides are present for a sequence;
    /// when the same (sequence, side) key appears twice, the later file
    /// replaces the earlier one. Output is ordered by ascending sequence.
    pub fn discover_pairs(&self, files: &[PathBuf]) -> Vec<ScanPair> {
        let mut by_sequence: BTreeMap<String, (Option<PathBuf>, Option<PathBuf>)> =
            BTreeMap::new();

        for path in files {
            let name = file_name_of(path);
            let parsed = self.detect(&name);
            let (Some(sequence), Some(side)) = (parsed.sequence, parsed.side) else {
                debug!(file = %name, "no naming rule matched, skipping");
                continue;
            };

            let entry = by_sequence.entry(pad_sequence(&sequence)).or_default();
            let slot = match side {
                Side::Recto => &mut entry.0,
                Side::Verso => &mut entry.1,
            };
            if let Some(previous) = slot.replace(path.clone()) {
                debug!(
                    file = %name,
                    replaced = %previous.display(),
                    "duplicate (sequence, side), keeping the later file"
                );
            }
        }

        by_sequence
            .into_iter()
            .filter_map(|(sequence, sides)| match sides {
                (Some(recto), Some(verso)) => Some(ScanPair {
                    sequence,
                    recto,
                    verso,
                }),
                _ => None,
            })
            .collect()
    }
}

impl Default for ScanNaming {
    fn default() -> Self {
        Self::new()
    }
}

/// Zero-pad all-digit sequences to at least three digits; leave anything
/// else untouched.
fn pad_sequence(sequence: &str) -> String {
    if !sequence.is_empty() && sequence.chars().all(|c| c.is_ascii_digit()) {
        format!("{sequence:0>3}")
    } else {
        sequence.to_string()
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn naming_error(file_name: &str) -> ScanwerkError {
    ScanwerkError::Naming(format!(
        "cannot detect sequence/side from '{file_name}' \
         (supported: xxx-R.jpeg, xxx_recto.jpg, xxx_page1.jpg)"
    ))
}
