//! Comment normalization: provider-raw entries to the canonical wire shape.

pub mod path_template;
pub mod xml;

use std::collections::{HashMap, HashSet};

use crate::models::Comment;
use crate::provider::RawComment;

/// Default font size when a provider omits one.
pub const DEFAULT_FONT_SIZE: u32 = 25;

/// Normalize one provider batch into wire comments.
///
/// NULs are stripped from text (entries empty afterwards are dropped), the
/// `p` attribute is assembled as `time,mode,font_size,color,[provider]`,
/// duplicate cids within the batch are dropped, and identical texts collapse
/// into the earliest entry suffixed with ` Xn`.
#[must_use]
pub fn normalize(provider: &str, raw: Vec<RawComment>) -> Vec<Comment> {
    let mut out = Vec::with_capacity(raw.len());
    let mut seen_cids = HashSet::new();

    for entry in raw {
        let text: String = entry.text.chars().filter(|c| *c != '\0').collect();
        if text.is_empty() {
            continue;
        }
        if !seen_cids.insert(entry.id.clone()) {
            continue;
        }

        let mode = match entry.mode {
            4 | 5 => entry.mode,
            _ => 1,
        };
        let font_size = if entry.font_size == 0 {
            DEFAULT_FONT_SIZE
        } else {
            entry.font_size
        };
        let color = entry.color & 0x00FF_FFFF;
        let time_sec = if entry.time_sec.is_finite() {
            entry.time_sec
        } else {
            0.0
        };

        out.push(Comment {
            cid: entry.id,
            p: format!("{time_sec:.2},{mode},{font_size},{color},[{provider}]"),
            m: text,
            t: time_sec,
        });
    }

    collapse_duplicate_texts(out)
}

/// Collapse groups of identical text into one comment.
///
/// The earliest-timestamp entry of each group survives with its text
/// rewritten to `"{text} Xn"`. Already-collapsed batches pass through
/// unchanged, so the operation is a fixed point.
#[must_use]
pub fn collapse_duplicate_texts(comments: Vec<Comment>) -> Vec<Comment> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for comment in &comments {
        *counts.entry(comment.m.clone()).or_default() += 1;
    }
    if counts.values().all(|&n| n == 1) {
        return comments;
    }

    // Earliest timestamp per duplicated text.
    let mut keeper: HashMap<String, (f64, String)> = HashMap::new();
    for comment in &comments {
        if counts[comment.m.as_str()] > 1 {
            let entry = keeper
                .entry(comment.m.clone())
                .or_insert((comment.t, comment.cid.clone()));
            if comment.t < entry.0 {
                *entry = (comment.t, comment.cid.clone());
            }
        }
    }

    let mut out = Vec::with_capacity(comments.len());
    for mut comment in comments {
        let count = counts[comment.m.as_str()];
        if count > 1 {
            let (_, keep_cid) = &keeper[&comment.m];
            if &comment.cid != keep_cid {
                continue;
            }
            comment.m = format!("{} X{count}", comment.m);
        }
        out.push(comment);
    }
    out
}

/// Down-sample a comment list to `limit` entries, spread evenly across the
/// time axis. Negative limits mean unlimited.
#[must_use]
pub fn sample_comments_evenly(mut comments: Vec<Comment>, limit: i64) -> Vec<Comment> {
    if limit < 0 || comments.len() as i64 <= limit {
        return comments;
    }
    if limit == 0 {
        return Vec::new();
    }
    comments.sort_by(|a, b| a.t.total_cmp(&b.t));

    let total = comments.len();
    let limit = limit as usize;
    let mut out = Vec::with_capacity(limit);
    for i in 0..limit {
        // Even positions over the sorted-by-time list.
        let index = i * total / limit;
        out.push(comments[index].clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(id: &str, time: f64, text: &str) -> RawComment {
        RawComment {
            id: id.to_string(),
            time_sec: time,
            mode: 1,
            font_size: 25,
            color: 16_777_215,
            text: text.to_string(),
        }
    }

    #[test]
    fn p_attribute_shape() {
        let out = normalize("tencent", vec![raw("a", 12.345, "hello")]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].p, "12.35,1,25,16777215,[tencent]");
        assert_eq!(out[0].t, 12.345);
    }

    #[test]
    fn nul_bytes_are_stripped_and_empty_dropped() {
        let out = normalize(
            "youku",
            vec![raw("a", 1.0, "he\0llo"), raw("b", 2.0, "\0\0")],
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].m, "hello");
    }

    #[test]
    fn duplicate_cids_keep_first() {
        let out = normalize("iqiyi", vec![raw("a", 1.0, "x"), raw("a", 2.0, "y")]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].m, "x");
    }

    #[test]
    fn unknown_modes_fall_back_to_scroll() {
        let mut entry = raw("a", 1.0, "x");
        entry.mode = 7;
        let out = normalize("mgtv", vec![entry]);
        assert!(out[0].p.contains(",1,"));
    }

    #[test]
    fn identical_texts_collapse_to_earliest_with_count() {
        let out = normalize(
            "bilibili",
            vec![raw("a", 10.5, "lol"), raw("b", 11.0, "lol"), raw("c", 12.0, "lol")],
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].cid, "a");
        assert_eq!(out[0].m, "lol X3");
        assert!((out[0].t - 10.5).abs() < f64::EPSILON);
    }

    #[test]
    fn collapse_is_a_fixed_point() {
        let once = normalize(
            "bilibili",
            vec![raw("a", 1.0, "gg"), raw("b", 2.0, "gg"), raw("c", 3.0, "hi")],
        );
        let twice = collapse_duplicate_texts(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn sampling_keeps_endpoints_spread() {
        let comments: Vec<Comment> = (0..100)
            .map(|i| Comment {
                cid: i.to_string(),
                p: String::new(),
                m: "x".into(),
                t: f64::from(i),
            })
            .collect();
        let sampled = sample_comments_evenly(comments.clone(), 10);
        assert_eq!(sampled.len(), 10);
        assert!((sampled[0].t - 0.0).abs() < f64::EPSILON);
        assert!(sampled[9].t >= 90.0);

        // Unlimited passes through.
        assert_eq!(sample_comments_evenly(comments, -1).len(), 100);
    }
}
