//! Fixed text layouts for replies and reports. The timestamp is always passed in.

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::chain::AnalysisResult;

const HEAVY_RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";
const LIGHT_RULE: &str = "────────────────────────────────────────────────────────────";

fn boxed_title(title: &str, width: usize) -> String {
    let inner = title.chars().count();
    let pad = width.saturating_sub(inner);
    let left = pad / 2;
    format!(
        "╔{bar}╗\n║{}{title}{}║\n╚{bar}╝",
        " ".repeat(left),
        " ".repeat(pad - left),
        bar = "═".repeat(width),
    )
}

pub fn format_customer_reply(reply: &str, at: NaiveDateTime) -> String {
    let title = format!("客服系統回覆 - {}", at.format("%Y-%m-%d %H:%M"));
    format!(
        "{}\n\n{}\n\n{LIGHT_RULE}\n\n💡 其他服務：\n   • 客服專線：0800-123-456\n   • 線上客服：週一至週五 09:00-18:00\n   • Email：service@example.com\n\n感謝您的來信，祝您有美好的一天！",
        boxed_title(&title, 58),
        reply.trim(),
    )
}

const SECTIONS: [(&str, &str); 4] = [
    ("sentiment", "📊 情感分析"),
    ("keywords", "🔑 關鍵字分析"),
    ("audience", "👥 目標受眾分析"),
    ("improvement", "💡 改善建議"),
];

fn section(heading: &str, body: &str) -> String {
    format!("{HEAVY_RULE}\n{heading}\n{HEAVY_RULE}\n{body}\n\n")
}

pub fn format_analysis_report(results: &AnalysisResult, at: NaiveDateTime) -> String {
    let title = format!("內容分析報告 - {}", at.format("%Y-%m-%d %H:%M"));
    let mut report = format!("{}\n\n", boxed_title(&title, 66));

    for (key, heading) in SECTIONS {
        let body = match results.get(key) {
            Some(Ok(text)) => text.clone(),
            Some(Err(err)) => format!("⚠️ 此項分析失敗：{err}"),
            None => "⚠️ 此項分析未執行".to_string(),
        };
        report.push_str(&section(heading, &body));
    }

    let failed = results.values().filter(|r| r.is_err()).count();
    report.push_str(&format!(
        "{HEAVY_RULE}\n📈 分析摘要\n{HEAVY_RULE}\n✅ 完成 {} 項分析，失敗 {failed} 項",
        results.len() - failed
    ));

    report
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ContentStats {
    /// Every character, whitespace included
    pub total_chars: usize,
    /// Characters left after dropping spaces and newlines
    pub visible_chars: usize,
    pub lines: usize,
}

impl ContentStats {
    pub fn of(content: &str) -> Self {
        Self {
            total_chars: content.chars().count(),
            visible_chars: content.chars().filter(|c| *c != ' ' && *c != '\n').count(),
            lines: content.lines().count(),
        }
    }
}

pub fn format_statistics(stats: &ContentStats, at: NaiveDateTime) -> String {
    format!(
        "\n\n{HEAVY_RULE}\n📋 文本統計\n{HEAVY_RULE}\n• 總字數：{} 字\n• 總字元數：{} 字元\n• 行數：{} 行\n• 分析完成時間：{}",
        stats.total_chars,
        stats.visible_chars,
        stats.lines,
        at.format("%Y-%m-%d %H:%M:%S"),
    )
}

pub fn format_research_report(topic: &str, body: &str, at: NaiveDateTime) -> String {
    let rule = "=".repeat(60);
    format!(
        "{rule}\n研究報告：{topic}\n{rule}\n\n{}\n\n{rule}\n報告生成時間：{}\n{rule}",
        body.trim(),
        at.format("%Y-%m-%d %H:%M:%S"),
    )
}
