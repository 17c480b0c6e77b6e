use tracing::info;
use unicode_normalization::UnicodeNormalization;

pub const DEFAULT_MIN_SIMILARITY: f32 = 0.6;

/// 在候选列表中找出第一个与 OCR 文本“足够相似”的名字，按列表顺序优先。
///
/// 匹配忽略大小写，两边都先做 NFKC 归一化并去掉空白。
pub fn fuzzy_match<'a, S: AsRef<str>>(
    text: &str,
    candidates: &'a [S],
    min_similarity: f32,
) -> Option<&'a str> {
    if text.trim().is_empty() {
        return None;
    }

    let normalized_text = normalize(text);
    for candidate in candidates {
        let candidate = candidate.as_ref();
        let normalized_candidate = normalize(candidate);
        if normalized_candidate.is_empty() {
            continue;
        }

        if contains_either(&normalized_text, &normalized_candidate) {
            return Some(candidate);
        }

        let score = composite_similarity(&normalized_text, &normalized_candidate);
        if score >= min_similarity {
            info!(text, candidate, score, "fuzzy match");
            return Some(candidate);
        }
    }
    None
}

/// 子串完全出现时直接认为匹配，短名字被横幅里其他文字包围时很常见。
fn contains_either(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.contains(b) || b.contains(a)
}

/// 取 Levenshtein 相似度与 LCS 相似度的最大值：
/// 前者应对错字和噪声，后者应对字符缺失或粘连。
fn composite_similarity(a: &str, b: &str) -> f32 {
    similarity_ratio(a, b).max(lcs_ratio(a, b))
}

fn similarity_ratio(a: &str, b: &str) -> f32 {
    let max_len = a.chars().count().max(b.chars().count()) as f32;
    if max_len == 0.0 {
        return 1.0;
    }

    let dist = levenshtein(a, b) as f32;
    (1.0 - dist / max_len).max(0.0)
}

/// 最长公共子序列长度占较长串长度的比例。
fn lcs_ratio(a: &str, b: &str) -> f32 {
    let max_len = a.chars().count().max(b.chars().count()) as f32;
    if max_len == 0.0 {
        return 1.0;
    }

    lcs_len(a, b) as f32 / max_len
}

fn normalize(s: &str) -> String {
    let mut normalized: String = s.nfkc().collect();
    normalized.retain(|c| !c.is_whitespace());
    normalized.to_lowercase()
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr: Vec<usize> = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        prev.clone_from(&curr);
    }

    prev[b.len()]
}

/// O(n*m) 动态规划，名字都很短，够用。
fn lcs_len(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut dp = vec![vec![0; b.len() + 1]; a.len() + 1];
    for i in 1..=a.len() {
        for j in 1..=b.len() {
            dp[i][j] = if a[i - 1] == b[j - 1] {
                dp[i - 1][j - 1] + 1
            } else {
                dp[i - 1][j].max(dp[i][j - 1])
            };
        }
    }
    dp[a.len()][b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn containment_matches_banner_with_extra_text() {
        let targets = ["Sally", "Brown"];
        assert_eq!(fuzzy_match("NEW! Sally  ★5", &targets, 0.6), Some("Sally"));
    }

    #[test]
    fn ocr_noise_still_matches() {
        let targets = vec!["Leonard".to_string()];
        assert_eq!(fuzzy_match("Le0nard", &targets, 0.6), Some("Leonard"));
    }

    #[test]
    fn unrelated_text_does_not_match() {
        let targets = ["Leonard"];
        assert_eq!(fuzzy_match("Summon x10", &targets, 0.6), None);
        assert_eq!(fuzzy_match("   ", &targets, 0.6), None);
    }

    #[test]
    fn first_candidate_in_list_order_wins() {
        let targets = ["Cony", "Cony Special"];
        assert_eq!(fuzzy_match("cony special", &targets, 0.6), Some("Cony"));
    }

    #[test]
    fn full_width_characters_are_normalized() {
        assert_eq!(fuzzy_match("ＳＡＬＬＹ", &["sally"], DEFAULT_MIN_SIMILARITY), Some("sally"));
        assert_eq!(normalize("Ｃｏｎｙ　Ｓ"), "conys");
    }
}
