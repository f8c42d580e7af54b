//! Layout chopping: turn a layout-analysis report into reading-order regions.
//!
//! The layout tool (tesseract in TSV mode) reports a hierarchy of
//! page → block → paragraph → line → word rows, each with a bounding box and,
//! for words, the recognised text. Only two levels matter here: blocks (level
//! 2) give the regions, words (level 5) tell us whether a block holds text.
//!
//! A block with at least one non-empty word is a `Text` region, anything else
//! (figures, photos, rules) is an `Image` region. Regions are ordered
//! top-to-bottom then left-to-right, and runs of nearby text blocks are merged
//! so the vision model sees whole passages instead of fragments.

use crate::config::PipelineConfig;
use crate::error::ToolError;
use crate::process::{run_checked, ToolCommand};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::debug;

/// Report level of a block row.
const LEVEL_BLOCK: u32 = 2;

/// Report level of a word row.
const LEVEL_WORD: u32 = 5;

/// Consecutive text regions closer than this (vertically) are merged.
pub const MERGE_GAP_PX: i64 = 80;

/// What a region holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionKind {
    Text,
    Image,
}

/// An axis-aligned rectangle on the page, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub kind: RegionKind,
}

impl Region {
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// Smallest rectangle covering both; keeps `self.kind`.
    pub fn union(&self, other: &Region) -> Region {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        Region {
            x,
            y,
            width: self.right().max(other.right()) - x,
            height: self.bottom().max(other.bottom()) - y,
            kind: self.kind,
        }
    }
}

/// Column positions, resolved from the header row by name.
struct Columns {
    level: usize,
    block: usize,
    left: usize,
    top: usize,
    width: usize,
    height: usize,
    text: usize,
}

impl Columns {
    fn from_header(header: &str) -> Result<Self, ToolError> {
        let names: HashMap<&str, usize> = header
            .split('\t')
            .enumerate()
            .map(|(i, name)| (name.trim(), i))
            .collect();
        let find = |name: &str| {
            names
                .get(name)
                .copied()
                .ok_or_else(|| ToolError::Parse(format!("layout report has no '{name}' column")))
        };
        Ok(Self {
            level: find("level")?,
            block: find("block_num")?,
            left: find("left")?,
            top: find("top")?,
            width: find("width")?,
            height: find("height")?,
            text: find("text")?,
        })
    }
}

/// Parse a TSV layout report into ordered, merged regions.
///
/// Fails only when the report has no header or lacks a required column.
/// Individual malformed rows are skipped, including blocks whose box would
/// overflow the pixel range.
///
/// Word text is only checked for being non-empty; the recognised text itself
/// is dropped, since the vision model transcribes each region from its crop.
pub fn chop_layout(report: &str) -> Result<Vec<Region>, ToolError> {
    let mut lines = report.lines().filter(|l| !l.trim().is_empty());
    let header = lines
        .next()
        .ok_or_else(|| ToolError::Parse("empty layout report".into()))?;
    let cols = Columns::from_header(header)?;

    let mut blocks: Vec<(u32, Region)> = Vec::new();
    let mut blocks_with_words: HashSet<u32> = HashSet::new();

    for line in lines {
        let fields: Vec<&str> = line.split('\t').collect();
        let num = |idx: usize| fields.get(idx).and_then(|v| v.trim().parse::<i64>().ok());
        let (Some(level), Some(block)) = (num(cols.level), num(cols.block)) else {
            continue;
        };
        let (Ok(level), Ok(block)) = (u32::try_from(level), u32::try_from(block)) else {
            continue;
        };

        match level {
            LEVEL_WORD => {
                let text = fields.get(cols.text).copied().unwrap_or("");
                if !text.trim().is_empty() {
                    blocks_with_words.insert(block);
                }
            }
            LEVEL_BLOCK => {
                let bbox = (num(cols.left), num(cols.top), num(cols.width), num(cols.height));
                let (Some(x), Some(y), Some(w), Some(h)) = bbox else {
                    continue;
                };
                let Some(region) = block_region(x, y, w, h) else {
                    debug!("Layout: skipping block {block} with box {x},{y} {w}x{h}");
                    continue;
                };
                blocks.push((block, region));
            }
            _ => {}
        }
    }

    let mut regions: Vec<Region> = blocks
        .into_iter()
        .map(|(block, mut region)| {
            if blocks_with_words.contains(&block) {
                region.kind = RegionKind::Text;
            }
            region
        })
        .collect();
    regions.sort_by_key(|r| (r.y, r.x));

    let merged = merge_text_runs(regions);
    debug!("Layout: {} regions after merge", merged.len());
    Ok(merged)
}

/// A block's box as a region, or `None` when it is empty, negative, or its
/// right/bottom edge does not fit in `u32`.
fn block_region(x: i64, y: i64, w: i64, h: i64) -> Option<Region> {
    let (x, y) = (u32::try_from(x).ok()?, u32::try_from(y).ok()?);
    let (width, height) = (u32::try_from(w).ok()?, u32::try_from(h).ok()?);
    if width == 0 || height == 0 {
        return None;
    }
    x.checked_add(width)?;
    y.checked_add(height)?;
    Some(Region {
        x,
        y,
        width,
        height,
        kind: RegionKind::Image,
    })
}

/// Merge each text region into its text predecessor when the vertical gap
/// between them is under [`MERGE_GAP_PX`]. Image regions never merge.
pub fn merge_text_runs(regions: Vec<Region>) -> Vec<Region> {
    let mut out: Vec<Region> = Vec::with_capacity(regions.len());
    for region in regions {
        if let Some(prev) = out.last_mut() {
            let gap = i64::from(region.y) - i64::from(prev.bottom());
            if prev.kind == RegionKind::Text && region.kind == RegionKind::Text && gap < MERGE_GAP_PX {
                *prev = prev.union(&region);
                continue;
            }
        }
        out.push(region);
    }
    out
}

/// Run the layout tool on a page image and chop its report.
pub async fn analyze_layout(image: &Path, config: &PipelineConfig) -> Result<Vec<Region>, ToolError> {
    let cmd = ToolCommand::new(&config.tools.layout_tool, config.process_timeout())
        .arg(image)
        .arg("stdout")
        .arg("tsv");
    let output = run_checked(config.runner.as_ref(), &cmd).await?;
    chop_layout(&output.stdout_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    fn row(level: u32, block: u32, l: u32, t: u32, w: u32, h: u32, text: &str) -> String {
        format!("{level}\t1\t{block}\t0\t0\t0\t{l}\t{t}\t{w}\t{h}\t-1\t{text}")
    }

    fn text(x: u32, y: u32, width: u32, height: u32) -> Region {
        Region { x, y, width, height, kind: RegionKind::Text }
    }

    fn image(x: u32, y: u32, width: u32, height: u32) -> Region {
        Region { x, y, width, height, kind: RegionKind::Image }
    }

    #[test]
    fn classifies_blocks_by_words() {
        let report = [
            HEADER.to_string(),
            row(1, 0, 0, 0, 1000, 1400, ""),
            row(2, 1, 100, 100, 800, 200, ""),
            row(5, 1, 100, 100, 90, 30, "Hello"),
            row(2, 2, 100, 600, 800, 400, ""),
            row(5, 2, 120, 620, 10, 10, "   "),
        ]
        .join("\n");

        let regions = chop_layout(&report).unwrap();
        assert_eq!(regions, vec![text(100, 100, 800, 200), image(100, 600, 800, 400)]);
    }

    #[test]
    fn orders_top_then_left() {
        let regions = merge_text_runs(vec![]);
        assert!(regions.is_empty());

        let report = [
            HEADER.to_string(),
            row(2, 1, 500, 300, 100, 100, ""),
            row(2, 2, 50, 300, 100, 100, ""),
            row(2, 3, 50, 10, 100, 100, ""),
        ]
        .join("\n");
        let regions = chop_layout(&report).unwrap();
        let origins: Vec<(u32, u32)> = regions.iter().map(|r| (r.x, r.y)).collect();
        assert_eq!(origins, vec![(50, 10), (50, 300), (500, 300)]);
    }

    #[test]
    fn text_gap_of_79_merges() {
        let merged = merge_text_runs(vec![text(100, 100, 400, 100), text(120, 279, 300, 50)]);
        assert_eq!(merged, vec![text(100, 100, 400, 229)]);
    }

    #[test]
    fn text_gap_of_80_does_not_merge() {
        let a = text(100, 100, 400, 100);
        let b = text(100, 280, 400, 50);
        assert_eq!(merge_text_runs(vec![a, b]), vec![a, b]);
    }

    #[test]
    fn overlapping_text_merges() {
        let merged = merge_text_runs(vec![text(0, 0, 100, 100), text(50, 50, 100, 100)]);
        assert_eq!(merged, vec![text(0, 0, 150, 150)]);
    }

    #[test]
    fn image_regions_never_merge() {
        let t = text(0, 0, 100, 100);
        let i = image(0, 101, 100, 100);
        let t2 = text(0, 202, 100, 100);
        assert_eq!(merge_text_runs(vec![t, i, t2]), vec![t, i, t2]);

        let i2 = image(0, 202, 100, 100);
        assert_eq!(merge_text_runs(vec![i, i2]), vec![i, i2]);
    }

    #[test]
    fn merged_region_keeps_absorbing() {
        let merged = merge_text_runs(vec![
            text(0, 0, 100, 100),
            text(0, 150, 100, 100),
            text(0, 300, 100, 100),
        ]);
        assert_eq!(merged, vec![text(0, 0, 100, 400)]);
    }

    #[test]
    fn columns_resolved_by_name() {
        let report = "text\theight\twidth\ttop\tleft\tblock_num\tlevel\n\
                      \t50\t200\t10\t20\t1\t2\n\
                      word\t10\t10\t10\t20\t1\t5\n";
        let regions = chop_layout(report).unwrap();
        assert_eq!(regions, vec![text(20, 10, 200, 50)]);
    }

    #[test]
    fn missing_column_is_a_parse_error() {
        let err = chop_layout("level\tblock_num\tleft\ttop\twidth\theight\n2\t1\t0\t0\t1\t1").unwrap_err();
        assert!(err.to_string().contains("'text'"), "got: {err}");
        assert!(chop_layout("").is_err());
    }

    #[test]
    fn header_only_report_has_no_regions() {
        assert!(chop_layout(HEADER).unwrap().is_empty());
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let report = [
            HEADER.to_string(),
            "2\t1\tx\t0\t0\t0\t1\t1\t1\t1\t-1\t".to_string(),
            row(2, 2, 0, 0, 0, 10, ""),
            row(2, 3, 5, 5, 10, 10, ""),
        ]
        .join("\n");
        assert_eq!(chop_layout(&report).unwrap(), vec![image(5, 5, 10, 10)]);
    }

    #[test]
    fn overflowing_boxes_are_skipped() {
        let report = "level\tblock_num\tleft\ttop\twidth\theight\ttext\n\
                      2\t1\t0\t4294967000\t10\t1000\t\n\
                      2\t2\t0\t4294967100\t10\t10\t\n\
                      2\t3\t4294967295\t0\t1\t10\t\n\
                      2\t4\t0\t0\t5000000000\t10\t\n\
                      2\t5\t0\t20\t10\t10\t\n";
        assert_eq!(
            chop_layout(report).unwrap(),
            vec![image(0, 20, 10, 10), image(0, 4_294_967_100, 10, 10)]
        );
    }
}
