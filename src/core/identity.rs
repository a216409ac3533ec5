//! 产物身份识别
//!
//! 文件名形如 `20250219T171207_output_image r[3.4].png`：前 15 个字符是
//! 生成时间戳，评分标记插在扩展名之前。评分会改变文件名，所以本地与远程的
//! 匹配使用去掉中间部分的近似键。

use once_cell::sync::Lazy;
use regex::Regex;

/// 时间戳前缀长度（`YYYYMMDDTHHMMSS`）
pub const TIMESTAMP_LEN: usize = 15;
pub const MIN_RATING: f64 = 0.0;
pub const MAX_RATING: f64 = 5.0;

static RATED_STEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^.* r\[(\d\.\d)\]$").expect("valid rating regex"));

static STRIP_RATING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*?)(?:\s*r\[-?\d\.\d\])?$").expect("valid strip regex"));

/// 按最后一个 `.` 拆分文件名和扩展名（扩展名包含 `.`，隐藏文件无扩展名）
pub fn split_extension(file_name: &str) -> (&str, &str) {
    match file_name.rfind('.') {
        Some(idx) if idx > 0 && !file_name[..idx].chars().all(|c| c == '.') => {
            file_name.split_at(idx)
        }
        _ => (file_name, ""),
    }
}

/// 拆分目录与文件名
fn split_dir(path: &str) -> (&str, &str) {
    path.rsplit_once('/').unwrap_or(("", path))
}

/// 文件名的时间戳前缀；不足 15 个字符时返回整个文件名
pub fn timestamp_prefix(file_name: &str) -> &str {
    match file_name.char_indices().nth(TIMESTAMP_LEN) {
        Some((idx, _)) => &file_name[..idx],
        None => file_name,
    }
}

/// 近似键：`{目录}/{前15字符}{扩展名}`
///
/// `halloween/20250218T160340_prompt.txt` -> `halloween/20250218T160340.txt`。
/// 对 `christmas/` 这类异常键原样返回。
pub fn approximate_key(path: &str) -> String {
    let path = normalize_key(path);
    let (dir, file_name) = split_dir(&path);
    let (_, extension) = split_extension(file_name);
    let prefix = timestamp_prefix(file_name);

    if path.contains('/') {
        format!("{}/{}{}", dir, prefix, extension)
    } else {
        format!("{}{}", prefix, extension)
    }
}

/// 解析文件名中的评分，仅接受扩展名前的 ` r[D.D]` 且值在 0.0-5.0 之间
pub fn parse_rating(name: &str) -> Option<f64> {
    let (_, file_name) = split_dir(name);
    let (stem, _) = split_extension(file_name);
    let caps = RATED_STEM.captures(stem)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    (MIN_RATING..=MAX_RATING).contains(&value).then_some(value)
}

pub fn has_rating(name: &str) -> bool {
    parse_rating(name).is_some()
}

/// 插入或替换评分标记，保留描述部分和扩展名
pub fn with_rating(file_name: &str, rating: f64) -> String {
    // -0.0 按 0.0 写，否则会出现无法解析的 `r[-0.0]`
    let rating = if rating == 0.0 { 0.0 } else { rating };
    let (stem, extension) = split_extension(file_name);
    let base = STRIP_RATING
        .captures(stem)
        .and_then(|c| c.get(1))
        .map_or(stem, |m| m.as_str());
    format!("{} r[{:.1}]{}", base, rating, extension)
}

/// 规范化对象键：统一 `/`，折叠连续的 `/`，去掉开头的 `/`
pub fn normalize_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for c in key.chars().map(|c| if c == '\\' { '/' } else { c }) {
        if c == '/' && (out.is_empty() || out.ends_with('/')) {
            continue;
        }
        out.push(c);
    }
    out
}

/// 远程键 `{分类}/{文件名}`
pub fn remote_key(category: &str, file_name: &str) -> String {
    normalize_key(&format!("{}/{}", category, file_name))
}

/// 是否为图片文件（按扩展名判断）
pub fn is_image_file(name: &str) -> bool {
    const IMAGE_EXTENSIONS: [&str; 6] = [".png", ".jpg", ".jpeg", ".gif", ".bmp", ".tiff"];
    let (_, extension) = split_extension(name);
    let extension = extension.to_lowercase();
    IMAGE_EXTENSIONS.contains(&extension.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approximate_key_strips_middle_segment() {
        assert_eq!(
            approximate_key("halloween/20250218T160340_prompt.txt"),
            "halloween/20250218T160340.txt"
        );
        assert_eq!(
            approximate_key("creative/20250202T105414 output_image r[3.0].png"),
            "creative/20250202T105414.png"
        );
    }

    #[test]
    fn test_approximate_key_degenerate_names() {
        assert_eq!(approximate_key("christmas/"), "christmas/");
        assert_eq!(approximate_key("a/b.png"), "a/b.png.png");
        assert_eq!(approximate_key("20250218T160340_x.png"), "20250218T160340.png");
        // 多字节字符不能在字节边界上截断
        assert_eq!(
            approximate_key("art/日本語日本語日本語日本語日本語日本語.png"),
            "art/日本語日本語日本語日本語日本語.png"
        );
    }

    #[test]
    fn test_identity_stable_under_rating() {
        let names = [
            "creative/20250101T100000_img.png",
            "creative/20250101T100000_prompt.txt",
            "halloween/20250218T160340 output_image r[1.0].png",
        ];
        for name in names {
            for tenths in 0..=50 {
                let rating = tenths as f64 / 10.0;
                let (dir, file) = name.rsplit_once('/').unwrap();
                let rated = format!("{}/{}", dir, with_rating(file, rating));
                assert_eq!(approximate_key(&rated), approximate_key(name), "{}", rated);
                assert_eq!(parse_rating(&rated), Some(rating));
            }
        }
    }

    #[test]
    fn test_negative_zero_writes_parsable_marker() {
        let rated = with_rating("20250101T100000_img.png", -0.0);
        assert_eq!(rated, "20250101T100000_img r[0.0].png");
        assert_eq!(parse_rating(&rated), Some(0.0));
        // 旧版本留下的 `r[-0.0]` 会被替换而不是叠加
        assert_eq!(
            with_rating("20250101T100000_img r[-0.0].png", 3.0),
            "20250101T100000_img r[3.0].png"
        );
    }

    #[test]
    fn test_with_rating_inserts_and_replaces() {
        assert_eq!(
            with_rating("20250219T171207_output_image.png", 3.4),
            "20250219T171207_output_image r[3.4].png"
        );
        assert_eq!(
            with_rating("20250219T171207_output_image r[1.0].png", 4.2),
            "20250219T171207_output_image r[4.2].png"
        );
        assert_eq!(with_rating("20250219T171207_prompt.txt", 5.0), "20250219T171207_prompt r[5.0].txt");
    }

    #[test]
    fn test_parse_rating_requires_valid_suffix() {
        assert_eq!(parse_rating("creative/20250101T100000_img r[4.0].png"), Some(4.0));
        assert_eq!(parse_rating("creative/20250101T100000_img.png"), None);
        assert_eq!(parse_rating("20250101T100000_img r[7.5].png"), None);
        assert_eq!(parse_rating("20250101T100000_img r[4.0] copy.png"), None);
        assert_eq!(parse_rating("20250101T100000_imgr[4.0].png"), None);
    }

    #[test]
    fn test_remote_key_collapses_slashes() {
        assert_eq!(remote_key("creative", "x.png"), "creative/x.png");
        assert_eq!(remote_key("creative/", "/x.png"), "creative/x.png");
        assert_eq!(normalize_key("//a\\\\b//c"), "a/b/c");
    }

    #[test]
    fn test_is_image_file() {
        assert!(is_image_file("sample_image.JPG"));
        assert!(is_image_file("dir/x r[2.0].png"));
        assert!(!is_image_file("document.txt"));
    }
}
