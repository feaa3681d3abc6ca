//! Shared text shapes for the console stream and the per-run log files.

pub const BOX_TOP: char = '┌';
pub const BOX_SIDE: char = '│';
pub const BOX_BOTTOM: char = '└';
pub const BOX_RULE: char = '─';

pub const DEFAULT_WIDTH: usize = 78;

pub const ICON_OK: &str = "✅";
pub const ICON_WARN: &str = "⚠️";
pub const ICON_FAIL: &str = "❌";
pub const ICON_SKIP: &str = "⏭️";
pub const ICON_PENDING: &str = "⏳";

/// `┌─ title ────…` padded with rules up to `width` columns after the corner.
pub fn box_top(title: &str, width: usize) -> String {
    ruled(BOX_TOP, title, width)
}

/// `└─ summary ───…`, or a bare rule when `summary` is empty.
pub fn box_bottom(summary: &str, width: usize) -> String {
    ruled(BOX_BOTTOM, summary, width)
}

pub fn box_line(content: &str) -> String {
    if content.is_empty() {
        BOX_SIDE.to_string()
    } else {
        format!("{} {}", BOX_SIDE, content)
    }
}

fn ruled(corner: char, label: &str, width: usize) -> String {
    if label.is_empty() {
        let mut out = String::with_capacity(width * 3 + 3);
        out.push(corner);
        out.extend(std::iter::repeat(BOX_RULE).take(width));
        return out;
    }
    let used = label.chars().count() + 3;
    let fill = width.saturating_sub(used).max(1);
    let mut out = format!("{}{} {} ", corner, BOX_RULE, label);
    out.extend(std::iter::repeat(BOX_RULE).take(fill));
    out
}

/// Replace anything outside `[A-Za-z0-9._+-]` with `_` for use in file names.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub fn indent(depth: usize) -> String {
    "  ".repeat(depth)
}
